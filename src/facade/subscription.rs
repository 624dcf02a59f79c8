use crate::external::backlight::{BacklightChange, BacklightProperty, KeyboardId};
use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};
use tokio::{
    select,
    sync::{
        broadcast::{self, error::RecvError},
        oneshot,
    },
};

/// Receiver of backlight change notifications.
///
/// Listeners are called from a tokio task, never from the thread which
/// registered them, and may run concurrently with requests on the facade.
pub trait BacklightListener: Send + Sync + 'static {
    fn backlight_changed(&self, change: &BacklightChange);
}

impl<F> BacklightListener for F
where
    F: Fn(&BacklightChange) + Send + Sync + 'static,
{
    fn backlight_changed(&self, change: &BacklightChange) {
        self(change)
    }
}

struct SubscriptionState {
    listener: Mutex<Option<Arc<dyn BacklightListener>>>,
    stop_sender: Mutex<Option<oneshot::Sender<()>>>,
}

/// A registration of a [BacklightListener] for changes of one keyboard.
///
/// Cloning the subscription gives another handle to the same registration.
/// Cancelling it through any handle stops the deliveries.
#[derive(Clone)]
pub struct Subscription {
    keyboard: KeyboardId,
    state: Arc<SubscriptionState>,
}

impl Subscription {
    /// Start delivering changes from `source` which concern `keyboard` and
    /// one of `keys` to `listener`. Empty `keys` match all properties.
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn start(
        mut source: broadcast::Receiver<BacklightChange>,
        keys: HashSet<BacklightProperty>,
        keyboard: KeyboardId,
        listener: Arc<dyn BacklightListener>,
    ) -> Subscription {
        let (stop_sender, mut stop_receiver) = oneshot::channel();
        let state = Arc::new(SubscriptionState {
            listener: Mutex::new(Some(listener)),
            stop_sender: Mutex::new(Some(stop_sender)),
        });

        let delivery_state = state.clone();
        tokio::spawn(async move {
            loop {
                select! {
                    Err(_) = &mut stop_receiver => return,
                    received = source.recv() => match received {
                        Ok(change) => {
                            if change.keyboard != keyboard
                                || !(keys.is_empty() || keys.contains(&change.property))
                            {
                                continue;
                            }
                            let listener = delivery_state.listener.lock().unwrap().clone();
                            match listener {
                                Some(listener) => listener.backlight_changed(&change),
                                None => return,
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            log::warn!(
                                "Listener for keyboard {} missed {} changes",
                                keyboard,
                                skipped
                            );
                        }
                        Err(RecvError::Closed) => {
                            log::debug!("Backlight service went away, ending subscription");
                            return;
                        }
                    }
                }
            }
        });

        Subscription { keyboard, state }
    }

    /// The keyboard whose changes are delivered
    pub fn keyboard(&self) -> KeyboardId {
        self.keyboard
    }

    /// Stop the deliveries. Calling this on an already cancelled subscription
    /// does nothing.
    ///
    /// A change which was already being delivered when this is called may
    /// still reach the listener.
    pub fn cancel(&self) {
        self.state.listener.lock().unwrap().take();
        // Dropping the sender stops the delivery task
        self.state.stop_sender.lock().unwrap().take();
    }

    pub fn is_active(&self) -> bool {
        self.state.listener.lock().unwrap().is_some()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("keyboard", &self.keyboard)
            .field("active", &self.is_active())
            .finish()
    }
}
