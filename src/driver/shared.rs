use super::snapshot::LiveSnapshot;
use crate::controls::OperatingMode;
use std::sync::Arc;
use tokio::sync::watch;

/// The only channel between the control loop and the query surface.
///
/// The loop publishes a fresh `LiveSnapshot` per tick; readers get an `Arc`
/// to a complete snapshot and never observe a half-written one. The mode is
/// written by the query side and picked up by the loop.
#[derive(Clone)]
pub struct SharedState {
    snapshot_tx: Arc<watch::Sender<Arc<LiveSnapshot>>>,
    mode_tx: Arc<watch::Sender<OperatingMode>>,
}

impl SharedState {
    pub fn new(initial_mode: OperatingMode) -> Self {
        let (snapshot_tx, _) = watch::channel(Arc::new(LiveSnapshot::initial(initial_mode)));
        let (mode_tx, _) = watch::channel(initial_mode);
        Self {
            snapshot_tx: Arc::new(snapshot_tx),
            mode_tx: Arc::new(mode_tx),
        }
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> Arc<LiveSnapshot> {
        self.snapshot_tx.borrow().clone()
    }

    pub fn subscribe_snapshot(&self) -> watch::Receiver<Arc<LiveSnapshot>> {
        self.snapshot_tx.subscribe()
    }

    pub(crate) fn publish(&self, snapshot: LiveSnapshot) {
        self.snapshot_tx.send_replace(Arc::new(snapshot));
    }

    pub fn mode(&self) -> OperatingMode {
        *self.mode_tx.borrow()
    }

    /// Request a mode; returns the previous one. Receivers are only woken
    /// when the mode actually changes.
    pub fn set_mode(&self, mode: OperatingMode) -> OperatingMode {
        let mut previous = mode;
        self.mode_tx.send_if_modified(|current| {
            previous = *current;
            if *current == mode {
                false
            } else {
                *current = mode;
                true
            }
        });
        previous
    }

    pub fn subscribe_mode(&self) -> watch::Receiver<OperatingMode> {
        self.mode_tx.subscribe()
    }
}
