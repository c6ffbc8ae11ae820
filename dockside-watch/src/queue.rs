//! Bounded, coalescing queue of mirror directions.
//!
//! The notify callback runs on a plain OS thread and must never block, so it
//! uses `try_send`. When the channel is full the direction is recorded in a
//! per-direction pending flag instead and the worker is woken through a
//! [`Notify`]. A direction is therefore never lost, only merged with a pass
//! that is already queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;

use dockside_sync::Direction;

#[derive(Debug, Default)]
struct Pending {
    host_to_sandbox: AtomicBool,
    sandbox_to_host: AtomicBool,
    wake: Notify,
}

impl Pending {
    fn flag(&self, direction: Direction) -> &AtomicBool {
        match direction {
            Direction::HostToSandbox => &self.host_to_sandbox,
            Direction::SandboxToHost => &self.sandbox_to_host,
        }
    }

    fn take_any(&self) -> Option<Direction> {
        [Direction::HostToSandbox, Direction::SandboxToHost]
            .into_iter()
            .find(|d| self.flag(*d).swap(false, Ordering::AcqRel))
    }
}

/// Producer half, cloned into the notify callback.
#[derive(Debug, Clone)]
pub struct QueueSender {
    tx: mpsc::Sender<Direction>,
    pending: Arc<Pending>,
}

impl QueueSender {
    /// Queue a pass. Returns `false` once the receiver is gone.
    pub fn push(&self, direction: Direction) -> bool {
        match self.tx.try_send(direction) {
            Ok(()) => true,
            Err(TrySendError::Full(direction)) => {
                self.pending.flag(direction).store(true, Ordering::Release);
                self.pending.wake.notify_one();
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

/// Consumer half, owned by the sync worker.
#[derive(Debug)]
pub struct QueueReceiver {
    rx: mpsc::Receiver<Direction>,
    pending: Arc<Pending>,
}

impl QueueReceiver {
    /// Next direction to sync. Coalesced directions come out before channel
    /// messages. Returns `None` once every sender is dropped and nothing is
    /// pending.
    pub async fn next(&mut self) -> Option<Direction> {
        loop {
            if let Some(direction) = self.pending.take_any() {
                return Some(direction);
            }
            tokio::select! {
                biased;
                msg = self.rx.recv() => {
                    return match msg {
                        Some(direction) => Some(direction),
                        None => self.pending.take_any(),
                    };
                }
                _ = self.pending.wake.notified() => continue,
            }
        }
    }
}

pub fn channel(capacity: usize) -> (QueueSender, QueueReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    let pending = Arc::new(Pending::default());
    (
        QueueSender {
            tx,
            pending: pending.clone(),
        },
        QueueReceiver { rx, pending },
    )
}
