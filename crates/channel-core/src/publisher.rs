use tokio::sync::watch;

use crate::state::PublishedState;

/// Receiver side handed to the presentation layer.
pub type StateStream = watch::Receiver<PublishedState>;

/// Single-slot publisher for [`PublishedState`] snapshots.
///
/// Readers always see a whole snapshot; intermediate snapshots may be skipped
/// by slow readers, which is fine for rendering.
#[derive(Clone, Debug)]
pub struct StatePublisher {
    tx: watch::Sender<PublishedState>,
}

impl Default for StatePublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl StatePublisher {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(PublishedState::default());
        Self { tx }
    }

    /// Subscribe to published snapshots.
    pub fn subscribe(&self) -> StateStream {
        self.tx.subscribe()
    }

    /// Latest published snapshot.
    pub fn current(&self) -> PublishedState {
        self.tx.borrow().clone()
    }

    /// Replace the current snapshot and return its revision.
    pub fn publish(&self, mut state: PublishedState) -> u64 {
        let mut revision = 0;
        self.tx.send_modify(|current| {
            state.revision = current.revision + 1;
            revision = state.revision;
            *current = state;
        });
        revision
    }
}
