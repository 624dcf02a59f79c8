use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::sync::mpsc;

use crate::{external::backlight::BacklightChange, facade::BacklightListener};

/// Collects the changes delivered to the listeners it hands out.
pub struct ChangeRecorder {
    changes: Arc<Mutex<Vec<BacklightChange>>>,
    sender: mpsc::UnboundedSender<BacklightChange>,
    receiver: mpsc::UnboundedReceiver<BacklightChange>,
}

impl ChangeRecorder {
    pub fn new() -> ChangeRecorder {
        let (sender, receiver) = mpsc::unbounded_channel();
        ChangeRecorder {
            changes: Arc::new(Mutex::new(Vec::new())),
            sender,
            receiver,
        }
    }

    pub fn listener(&self) -> impl BacklightListener {
        let changes = self.changes.clone();
        let sender = self.sender.clone();
        move |change: &BacklightChange| {
            changes.lock().unwrap().push(*change);
            let _ = sender.send(*change);
        }
    }

    /// Wait for the next delivered change, giving up after a second
    pub async fn next(&mut self) -> Option<BacklightChange> {
        tokio::time::timeout(Duration::from_secs(1), self.receiver.recv())
            .await
            .ok()
            .flatten()
    }

    /// Give the delivery tasks a chance to run and return everything
    /// delivered so far
    pub async fn settle(&self) -> Vec<BacklightChange> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.changes.lock().unwrap().clone()
    }
}
