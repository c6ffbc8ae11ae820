//! # dockside-sync
//!
//! One-way mirror between two docker context stores.
//!
//! Call [`pipeline::run`] with the configured [`ContextRoots`] to bring the
//! target store in line with the source, or drive a [`ContextMirror`]
//! directly for arbitrary roots. The context named after dockside itself is
//! never copied or deleted in either direction.

pub mod error;
pub mod meta;
pub mod mirror;
pub mod pipeline;

pub use error::SyncError;
pub use meta::{context_hash, ContextMeta, MetaState};
pub use mirror::{ContextMirror, Direction, RecordFailure, SyncReport};
pub use pipeline::ContextRoots;
