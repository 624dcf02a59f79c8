//! Lifecycle primitives for background tasks.

use tokio::sync::{mpsc, watch};

/// A handle which allows signalizing termination to a background task and
/// waiting for it to finish.
///
/// The handle keeps the sending side of a channel. Once it's dropped (or
/// [Handle::await_shutdown] is called), [HandleChild::should_terminate]
/// returns in the task owning the other side.
#[derive(Debug)]
pub struct Handle {
    terminate_sender: mpsc::Sender<()>,
    finished_receiver: watch::Receiver<()>,
}

impl Handle {
    /// Create a new Handle and return it and its associated child.
    ///
    /// The handle should be kept by the owner of the task while the task
    /// itself keeps the [HandleChild].
    pub fn new() -> (Handle, HandleChild) {
        let (terminate_sender, terminate_receiver) = mpsc::channel(1);
        let (finished_sender, finished_receiver) = watch::channel(());
        (
            Handle {
                terminate_sender,
                finished_receiver,
            },
            HandleChild {
                terminate_receiver,
                _finished_sender: finished_sender,
            },
        )
    }

    /// Request termination and wait until the task drops its [HandleChild].
    pub async fn await_shutdown(self) {
        drop(self.terminate_sender);
        let mut finished_receiver = self.finished_receiver;
        // The child never sends anything, so the only way for this to return
        // is the sender being dropped.
        let result = finished_receiver.changed().await;
        debug_assert!(result.is_err());
    }
}

/// The side of the [Handle] belonging to the background task.
///
/// Dropping this struct is the signal that the task has finished, so it must
/// be the last thing the task does.
#[derive(Debug)]
pub struct HandleChild {
    terminate_receiver: mpsc::Receiver<()>,
    _finished_sender: watch::Sender<()>,
}

impl HandleChild {
    /// Wait until the parent [Handle] is dropped or its
    /// [await_shutdown](`Handle::await_shutdown`) method is called.
    ///
    /// Since this function will not return until these conditions are
    /// fulfilled, you should call it within a [tokio::select!] block.
    pub async fn should_terminate(&mut self) {
        while self.terminate_receiver.recv().await.is_some() {}
    }
}
