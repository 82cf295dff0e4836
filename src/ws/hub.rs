use tokio::sync::broadcast;
use tracing::debug;

use crate::model::clipboard::ClipboardItem;

const HUB_CAPACITY: usize = 256;

/// Fan-out of newly created clipboard items to every open socket.
#[derive(Clone)]
pub struct ClipboardHub {
    tx: broadcast::Sender<ClipboardItem>,
}

impl ClipboardHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(HUB_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClipboardItem> {
        self.tx.subscribe()
    }

    /// Returns how many sockets will see the item.
    pub fn publish(&self, item: ClipboardItem) -> usize {
        match self.tx.send(item) {
            Ok(receivers) => receivers,
            Err(_) => {
                debug!("no websocket listeners for clipboard item");
                0
            }
        }
    }
}

impl Default for ClipboardHub {
    fn default() -> Self {
        Self::new()
    }
}
