pub mod check;
pub mod config;
pub mod context;
pub mod update;
