use super::{
    interface::{validate_timeout, Result},
    BacklightChange, BacklightProperty, BacklightService, BacklightState, KeyboardId,
    CHANGE_CHANNEL_CAPACITY,
};
use crate::{
    external::idle::IdleTimeSource,
    handle::{Handle, HandleChild},
};
use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::{
    sync::{
        broadcast::{self, error::RecvError},
        Mutex as AsyncMutex,
    },
    time::MissedTickBehavior,
};

/// Parameters of the idle dimming.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IdleDimmingOptions {
    /// Timeout in seconds for keyboards which didn't get one set explicitly.
    /// 0 disables dimming.
    pub default_timeout: f64,
    /// Fraction of the current brightness the backlight is dimmed to
    pub dim_fraction: f64,
    /// How often the idle time is checked
    pub poll_interval: Duration,
}

impl Default for IdleDimmingOptions {
    fn default() -> Self {
        IdleDimmingOptions {
            default_timeout: 0.0,
            dim_fraction: 0.0,
            poll_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct DimSettings {
    timeout: f64,
    /// Brightness before dimming, present while the keyboard is dimmed
    dimmed_from: Option<f64>,
    /// Set when brightness was changed manually during idleness. No dimming
    /// happens until the user becomes active again.
    held: bool,
}

struct Dimmer<S: BacklightService + ?Sized> {
    inner: Arc<S>,
    settings: Mutex<HashMap<KeyboardId, DimSettings>>,
    /// Held across every brightness write together with the settings update
    /// that belongs to it
    writes: AsyncMutex<()>,
    options: IdleDimmingOptions,
    sender: broadcast::Sender<BacklightChange>,
}

impl<S: BacklightService + ?Sized> Dimmer<S> {
    fn settings(&self, keyboard: KeyboardId) -> DimSettings {
        self.settings
            .lock()
            .unwrap()
            .get(&keyboard)
            .copied()
            .unwrap_or(DimSettings {
                timeout: self.options.default_timeout,
                dimmed_from: None,
                held: false,
            })
    }

    fn update_settings(&self, keyboard: KeyboardId, f: impl FnOnce(&mut DimSettings)) {
        let mut settings = self.settings(keyboard);
        f(&mut settings);
        self.settings.lock().unwrap().insert(keyboard, settings);
    }

    /// Drop the settings of keyboards which are gone
    fn forget_missing(&self, present: &[KeyboardId]) {
        self.settings
            .lock()
            .unwrap()
            .retain(|keyboard, _| present.contains(keyboard));
    }

    fn announce(&self, keyboard: KeyboardId, property: BacklightProperty) {
        let _ = self.sender.send(BacklightChange::new(keyboard, property));
    }

    async fn reconcile(&self, idle_time: Duration) -> Result<()> {
        let keyboards = self.inner.keyboards().await?;
        self.forget_missing(&keyboards);
        for keyboard in keyboards {
            if let Err(e) = self.reconcile_keyboard(keyboard, idle_time).await {
                log::warn!("Idle dimming of keyboard {} failed: {}", keyboard, e);
            }
        }
        Ok(())
    }

    async fn reconcile_keyboard(&self, keyboard: KeyboardId, idle_time: Duration) -> Result<()> {
        let settings = self.settings(keyboard);
        let idle = settings.timeout > 0.0 && idle_time.as_secs_f64() >= settings.timeout;
        if !idle {
            if settings.held {
                self.update_settings(keyboard, |s| s.held = false);
            }
            if settings.dimmed_from.is_some() {
                self.undim(keyboard).await?;
            }
        } else if settings.dimmed_from.is_none() && !settings.held {
            self.dim(keyboard).await?;
        }
        Ok(())
    }

    async fn dim(&self, keyboard: KeyboardId) -> Result<()> {
        let _write = self.writes.lock().await;
        let settings = self.settings(keyboard);
        if settings.dimmed_from.is_some() || settings.held {
            return Ok(());
        }
        let current = self.inner.brightness(keyboard).await?;
        self.inner
            .set_brightness(keyboard, current * self.options.dim_fraction)
            .await?;
        log::debug!("Dimmed keyboard {} from {}", keyboard, current);
        self.update_settings(keyboard, |s| s.dimmed_from = Some(current));
        self.announce(keyboard, BacklightProperty::Dimmed);
        Ok(())
    }

    async fn undim(&self, keyboard: KeyboardId) -> Result<()> {
        let _write = self.writes.lock().await;
        let original = match self.settings(keyboard).dimmed_from {
            Some(original) => original,
            None => return Ok(()),
        };
        self.inner.set_brightness(keyboard, original).await?;
        log::debug!("Restored keyboard {} to {}", keyboard, original);
        self.update_settings(keyboard, |s| s.dimmed_from = None);
        self.announce(keyboard, BacklightProperty::Dimmed);
        Ok(())
    }

    async fn undim_all(&self) {
        let dimmed: Vec<KeyboardId> = self
            .settings
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, s)| s.dimmed_from.is_some())
            .map(|(k, _)| *k)
            .collect();
        for keyboard in dimmed {
            if let Err(e) = self.undim(keyboard).await {
                log::error!("Couldn't restore brightness of keyboard {}: {}", keyboard, e);
            }
        }
    }
}

/// A [BacklightService] decorator dimming keyboard backlights after a period
/// of user inactivity.
///
/// Provides the idle dim timeout and the `dimmed` flag for services which
/// don't have them. All other requests are passed to the wrapped service.
pub struct IdleDimmingService<S: BacklightService + ?Sized> {
    dimmer: Arc<Dimmer<S>>,
    _forwarder: Handle,
}

impl<S: BacklightService + ?Sized> IdleDimmingService<S> {
    /// Wrap `inner` and start watching `idle_source`.
    ///
    /// The returned [Handle] controls the dimming task. When it's shut down,
    /// all dimmed keyboards are restored to their previous brightness.
    pub fn spawn<I: IdleTimeSource>(
        inner: Arc<S>,
        idle_source: I,
        options: IdleDimmingOptions,
    ) -> (IdleDimmingService<S>, Handle) {
        let (sender, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let inner_changes = inner.subscribe();
        let dimmer = Arc::new(Dimmer {
            inner,
            settings: Mutex::new(HashMap::new()),
            writes: AsyncMutex::new(()),
            options,
            sender: sender.clone(),
        });

        let (dimming_handle, dimming_child) = Handle::new();
        tokio::spawn(run_dimmer(dimmer.clone(), Arc::new(idle_source), dimming_child));
        let (forwarder_handle, forwarder_child) = Handle::new();
        tokio::spawn(forward_changes(inner_changes, sender, forwarder_child));

        (
            IdleDimmingService {
                dimmer,
                _forwarder: forwarder_handle,
            },
            dimming_handle,
        )
    }
}

#[async_trait]
impl<S: BacklightService + ?Sized> BacklightService for IdleDimmingService<S> {
    async fn keyboards(&self) -> Result<Vec<KeyboardId>> {
        self.dimmer.inner.keyboards().await
    }

    async fn brightness(&self, keyboard: KeyboardId) -> Result<f64> {
        self.dimmer.inner.brightness(keyboard).await
    }

    async fn set_brightness(&self, keyboard: KeyboardId, level: f64) -> Result<()> {
        let _write = self.dimmer.writes.lock().await;
        self.dimmer.inner.set_brightness(keyboard, level).await?;
        let settings = self.dimmer.settings(keyboard);
        if settings.dimmed_from.is_some() {
            self.dimmer.update_settings(keyboard, |s| {
                s.dimmed_from = None;
                s.held = true;
            });
            self.dimmer.announce(keyboard, BacklightProperty::Dimmed);
        }
        Ok(())
    }

    async fn auto_brightness(&self, keyboard: KeyboardId) -> Result<bool> {
        self.dimmer.inner.auto_brightness(keyboard).await
    }

    async fn set_auto_brightness(&self, keyboard: KeyboardId, enabled: bool) -> Result<()> {
        self.dimmer.inner.set_auto_brightness(keyboard, enabled).await
    }

    async fn idle_dim_timeout(&self, keyboard: KeyboardId) -> Result<f64> {
        self.dimmer.inner.state(keyboard).await?;
        Ok(self.dimmer.settings(keyboard).timeout)
    }

    async fn set_idle_dim_timeout(&self, keyboard: KeyboardId, timeout: f64) -> Result<()> {
        let timeout = validate_timeout(timeout)?;
        self.dimmer.inner.state(keyboard).await?;
        let previous = self.dimmer.settings(keyboard).timeout;
        self.dimmer.update_settings(keyboard, |s| s.timeout = timeout);
        if previous != timeout {
            self.dimmer.announce(keyboard, BacklightProperty::IdleDimTimeout);
        }
        Ok(())
    }

    async fn is_built_in(&self, keyboard: KeyboardId) -> Result<bool> {
        self.dimmer.inner.is_built_in(keyboard).await
    }

    async fn ambient_feature_available(&self, keyboard: KeyboardId) -> Result<bool> {
        self.dimmer.inner.ambient_feature_available(keyboard).await
    }

    async fn state(&self, keyboard: KeyboardId) -> Result<BacklightState> {
        let mut state = self.dimmer.inner.state(keyboard).await?;
        state.dimmed |= self.dimmer.settings(keyboard).dimmed_from.is_some();
        Ok(state)
    }

    fn subscribe(&self) -> broadcast::Receiver<BacklightChange> {
        self.dimmer.sender.subscribe()
    }
}

async fn run_dimmer<S, I>(
    dimmer: Arc<Dimmer<S>>,
    idle_source: Arc<I>,
    mut handle_child: HandleChild,
)
where
    S: BacklightService + ?Sized,
    I: IdleTimeSource,
{
    let mut ticker = tokio::time::interval(dimmer.options.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = handle_child.should_terminate() => {
                log::debug!("Idle dimmer stopping");
                dimmer.undim_all().await;
                return;
            }
            _ = ticker.tick() => {
                // X11 sources wait for the server's reply
                let source = idle_source.clone();
                let queried = tokio::task::spawn_blocking(move || source.idle_time()).await;
                let idle_time = match queried {
                    Ok(Ok(idle_time)) => idle_time,
                    Ok(Err(e)) => {
                        log::error!("Couldn't determine idle time: {}", e);
                        continue;
                    }
                    Err(e) => {
                        log::error!("Idle time query panicked: {}", e);
                        continue;
                    }
                };
                if let Err(e) = dimmer.reconcile(idle_time).await {
                    log::error!("Idle dimming failed: {}", e);
                }
            }
        }
    }
}

async fn forward_changes(
    mut changes: broadcast::Receiver<BacklightChange>,
    sender: broadcast::Sender<BacklightChange>,
    mut handle_child: HandleChild,
) {
    loop {
        tokio::select! {
            _ = handle_child.should_terminate() => return,
            received = changes.recv() => match received {
                Ok(change) => {
                    let _ = sender.send(change);
                }
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("Missed {} backlight changes of the wrapped service", skipped);
                }
                Err(RecvError::Closed) => return,
            }
        }
    }
}
