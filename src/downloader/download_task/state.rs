//! Task state cell and the suspension gate shared with chunk fetchers.

use std::sync::atomic::{AtomicU8, Ordering};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::types::Status;

/// Atomically updated task status
///
/// Every transition is a compare-and-set, so a losing writer learns that someone
/// else (pause, cancel, the coordinator) got there first.
#[derive(Debug)]
pub(super) struct StateCell(AtomicU8);

impl StateCell {
    pub(super) fn new(status: Status) -> Self {
        Self(AtomicU8::new(status.to_u8()))
    }

    pub(super) fn load(&self) -> Status {
        Status::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Move from `from` to `to`; false if the current status is not `from`
    pub(super) fn transition(&self, from: Status, to: Status) -> bool {
        self.0
            .compare_exchange(from.to_u8(), to.to_u8(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

/// Owner side of a task's suspension flag
#[derive(Debug)]
pub(super) struct SuspendGate {
    tx: watch::Sender<bool>,
}

impl SuspendGate {
    pub(super) fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub(super) fn suspend(&self) {
        self.tx.send_replace(true);
    }

    /// Clear the flag and wake every parked fetcher
    pub(super) fn release(&self) {
        self.tx.send_replace(false);
    }

    pub(super) fn is_suspended(&self) -> bool {
        *self.tx.borrow()
    }

    /// Token for one fetcher (or the coordinator) to park on
    pub(super) fn token(&self) -> SuspendToken {
        SuspendToken {
            rx: self.tx.subscribe(),
        }
    }
}

/// Observer side of the suspension flag, handed to each chunk fetcher
#[derive(Clone, Debug)]
pub(super) struct SuspendToken {
    rx: watch::Receiver<bool>,
}

impl SuspendToken {
    /// Park until the flag is cleared
    ///
    /// Returns immediately when not suspended. Returns false if `cancel` fires
    /// first (or the gate is gone), true once writing may continue.
    pub(super) async fn wait_released(&mut self, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() {
            return false;
        }
        let rx = &mut self.rx;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            released = async { rx.wait_for(|suspended| !*suspended).await.is_ok() } => released,
        }
    }
}
