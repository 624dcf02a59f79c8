//! Typed request/response boundary over a [BacklightService]
//!
//! The facade never fails. Requests which the service doesn't honor are
//! logged and answered with `false` or a default value, the caller decides
//! whether to retry.

mod subscription;

pub use subscription::{BacklightListener, Subscription};

use crate::external::backlight::{
    BacklightProperty, BacklightService, BacklightState, KeyboardId, Result,
};
use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

pub struct BacklightFacade<S: BacklightService + ?Sized> {
    service: Arc<S>,
    subscription: Mutex<Option<Subscription>>,
}

impl<S: BacklightService> BacklightFacade<S> {
    pub fn new(service: S) -> BacklightFacade<S> {
        Self::from_shared(Arc::new(service))
    }
}

impl<S: BacklightService + ?Sized> BacklightFacade<S> {
    /// Create a facade over a service which is shared with other users
    pub fn from_shared(service: Arc<S>) -> BacklightFacade<S> {
        BacklightFacade {
            service,
            subscription: Mutex::new(None),
        }
    }

    /// Currently known backlit keyboards, in ascending order. An empty list
    /// means no backlit keyboard was detected.
    pub async fn enumerate_keyboards(&self) -> Vec<KeyboardId> {
        let mut keyboards = or_default(self.service.keyboards().await, "enumerate keyboards");
        keyboards.sort_unstable();
        keyboards.dedup();
        keyboards
    }

    pub async fn brightness(&self, keyboard: KeyboardId) -> f64 {
        or_default(self.service.brightness(keyboard).await, "read brightness")
    }

    /// Request a new brightness level in [0.0, 1.0]. Returns whether the
    /// service accepted it.
    pub async fn set_brightness(&self, keyboard: KeyboardId, level: f64) -> bool {
        log::debug!("Setting brightness of keyboard {} to {}", keyboard, level);
        honored(
            self.service.set_brightness(keyboard, level).await,
            "set brightness",
        )
    }

    pub async fn is_auto_brightness_enabled(&self, keyboard: KeyboardId) -> bool {
        or_default(
            self.service.auto_brightness(keyboard).await,
            "read auto-brightness",
        )
    }

    pub async fn set_auto_brightness(&self, keyboard: KeyboardId, enabled: bool) -> bool {
        honored(
            self.service.set_auto_brightness(keyboard, enabled).await,
            "set auto-brightness",
        )
    }

    /// Seconds of inactivity after which the backlight dims, 0 if it never does
    pub async fn idle_dim_timeout(&self, keyboard: KeyboardId) -> f64 {
        or_default(
            self.service.idle_dim_timeout(keyboard).await,
            "read idle dim timeout",
        )
    }

    pub async fn set_idle_dim_timeout(&self, keyboard: KeyboardId, timeout: f64) -> bool {
        honored(
            self.service.set_idle_dim_timeout(keyboard, timeout).await,
            "set idle dim timeout",
        )
    }

    pub async fn is_built_in(&self, keyboard: KeyboardId) -> bool {
        or_default(
            self.service.is_built_in(keyboard).await,
            "check whether keyboard is built in",
        )
    }

    pub async fn is_ambient_feature_available(&self, keyboard: KeyboardId) -> bool {
        or_default(
            self.service.ambient_feature_available(keyboard).await,
            "check ambient light sensor",
        )
    }

    /// All state flags of a keyboard at once
    pub async fn state(&self, keyboard: KeyboardId) -> BacklightState {
        or_default(self.service.state(keyboard).await, "read backlight state")
    }

    pub async fn is_dimmed(&self, keyboard: KeyboardId) -> bool {
        self.state(keyboard).await.dimmed
    }

    pub async fn is_saturated(&self, keyboard: KeyboardId) -> bool {
        self.state(keyboard).await.saturated
    }

    pub async fn is_suppressed(&self, keyboard: KeyboardId) -> bool {
        self.state(keyboard).await.suppressed
    }

    /// Deliver changes of `keys` on `keyboard` to `listener`. Empty `keys`
    /// watch every property.
    ///
    /// A facade has at most one active registration, a previous one is
    /// cancelled. The returned [Subscription] can cancel the registration too.
    /// Must be called from within a tokio runtime.
    pub fn register_change_notification(
        &self,
        keys: impl IntoIterator<Item = BacklightProperty>,
        keyboard: KeyboardId,
        listener: impl BacklightListener,
    ) -> Subscription {
        let keys: HashSet<BacklightProperty> = keys.into_iter().collect();
        log::debug!(
            "Registering listener for {:?} of keyboard {}",
            keys,
            keyboard
        );
        let mut slot = self.subscription.lock().unwrap();
        if let Some(previous) = slot.take() {
            previous.cancel();
        }
        let subscription =
            Subscription::start(self.service.subscribe(), keys, keyboard, Arc::new(listener));
        *slot = Some(subscription.clone());
        subscription
    }

    /// Cancel the active registration, if there is one.
    pub fn unregister_change_notification(&self) {
        if let Some(subscription) = self.subscription.lock().unwrap().take() {
            log::debug!(
                "Unregistering listener of keyboard {}",
                subscription.keyboard()
            );
            subscription.cancel();
        }
    }

    /// Whether a registration is active. A registration cancelled through its
    /// [Subscription] handle doesn't count.
    pub fn has_subscription(&self) -> bool {
        self.subscription
            .lock()
            .unwrap()
            .as_ref()
            .map_or(false, Subscription::is_active)
    }

    pub fn service(&self) -> &Arc<S> {
        &self.service
    }
}

impl<S: BacklightService + ?Sized> Drop for BacklightFacade<S> {
    fn drop(&mut self) {
        self.unregister_change_notification();
    }
}

fn or_default<T: Default>(result: Result<T>, action: &str) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            log::warn!("Couldn't {}: {}", action, e);
            T::default()
        }
    }
}

fn honored(result: Result<()>, action: &str) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            log::warn!("Couldn't {}: {}", action, e);
            false
        }
    }
}

#[cfg(test)]
mod test;
