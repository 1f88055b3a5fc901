use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::chain::BlockHeader;

#[derive(Clone, Debug)]
pub enum BlockNtfn {
    Connected(BlockHeader),
    Disconnected(BlockHeader),
}

/// Fan-in queue between upstream callbacks and the indexer.
///
/// Producers append under the mutex and kick a one-slot wake channel with a
/// non-blocking send, so a callback can never stall behind a slow consumer
/// (the indexer may be deep in a reorg). The consumer drains the whole
/// backlog per wakeup and processes it in FIFO order.
pub struct NotificationQueue {
    ntfns: Mutex<Vec<BlockNtfn>>,
    wake: mpsc::Sender<()>,
}

impl NotificationQueue {
    pub fn new() -> (Arc<Self>, mpsc::Receiver<()>) {
        let (wake, wake_rx) = mpsc::channel(1);
        let queue = Arc::new(NotificationQueue {
            ntfns: Mutex::new(Vec::new()),
            wake,
        });
        (queue, wake_rx)
    }

    pub fn push(&self, ntfn: BlockNtfn) {
        self.ntfns.lock().expect("ntfn lock").push(ntfn);
        // A full slot already guarantees a pending wakeup.
        let _ = self.wake.try_send(());
    }

    pub fn drain(&self) -> Vec<BlockNtfn> {
        std::mem::take(&mut *self.ntfns.lock().expect("ntfn lock"))
    }

    pub fn len(&self) -> usize {
        self.ntfns.lock().expect("ntfn lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
