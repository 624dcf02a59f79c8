use crate::{
    external::backlight::{BacklightChange, BacklightProperty, BacklightService, KeyboardId},
    facade::BacklightFacade,
    handle::{Handle, HandleChild},
};
use std::{collections::BTreeMap, sync::Arc};
use tokio::sync::{
    broadcast::{self, error::RecvError},
    mpsc,
};
use zbus::{dbus_interface, SignalContext};

pub const DEFAULT_NAME: &str = "org.keylight.Backlight";
pub const DEFAULT_PATH: &str = "/org/keylight/Backlight";

/// Exports a backlight service on the session bus.
///
/// Every request is answered through a [BacklightFacade], so failing requests
/// come back as `false` or default values instead of D-Bus errors. Changes
/// of every keyboard are emitted as `BacklightChanged` signals, keyboards
/// which appear or go away are announced with the `devices` property.
pub struct BacklightServer {
    name: String,
    path: String,
    facade: BacklightFacade<dyn BacklightService>,
}

impl BacklightServer {
    pub fn new(name: Option<&str>, path: Option<&str>, service: Arc<dyn BacklightService>) -> Self {
        BacklightServer {
            name: name.unwrap_or(DEFAULT_NAME).to_owned(),
            path: path.unwrap_or(DEFAULT_PATH).to_owned(),
            facade: BacklightFacade::from_shared(service),
        }
    }

    pub async fn spawn(self) -> anyhow::Result<Handle> {
        let (handle, mut handle_child) = Handle::new();
        let name = self.name.clone();
        let path = self.path.clone();
        let service = self.facade.service().clone();
        let connection = zbus::ConnectionBuilder::session()?
            .name(name.as_str())?
            .serve_at(path.as_str(), self)?
            .build()
            .await?;
        log::debug!("Serving {} at {}", name, path);

        let (change_sender, change_receiver) = mpsc::unbounded_channel();
        let watchers = forward_keyboard_changes(service, change_sender).await;
        let signal_context = SignalContext::new(&connection, path.clone())?;
        tokio::spawn(emit_signals(change_receiver, signal_context));

        tokio::spawn(async move {
            let moved_connection = connection;
            handle_child.should_terminate().await;
            // Cancels the registrations, which ends the signal emitter
            watchers.await_shutdown().await;
            if let Err(e) = moved_connection
                .object_server()
                .remove::<Self, String>(path)
                .await
            {
                log::error!("Failed to unregister server: {}", e);
            }
            log::debug!("Terminated");
        });
        Ok(handle)
    }
}

/// One facade per keyboard, since a facade holds a single registration
struct KeyboardWatchers {
    service: Arc<dyn BacklightService>,
    sender: mpsc::UnboundedSender<BacklightChange>,
    watchers: BTreeMap<KeyboardId, BacklightFacade<dyn BacklightService>>,
}

impl KeyboardWatchers {
    /// Start watching new keyboards and stop watching the ones which are gone.
    /// With `announce`, both are sent as `Devices` changes.
    async fn sync(&mut self, announce: bool) {
        let present = match self.service.keyboards().await {
            Ok(present) => present,
            Err(e) => {
                log::warn!("Couldn't enumerate keyboards: {}", e);
                return;
            }
        };
        let gone: Vec<KeyboardId> = self
            .watchers
            .keys()
            .filter(|keyboard| !present.contains(*keyboard))
            .copied()
            .collect();
        for keyboard in gone {
            log::debug!("Keyboard {} went away", keyboard);
            self.watchers.remove(&keyboard);
            if announce {
                self.send(BacklightChange::new(keyboard, BacklightProperty::Devices));
            }
        }
        for keyboard in present {
            if self.watchers.contains_key(&keyboard) {
                continue;
            }
            log::debug!("Watching keyboard {}", keyboard);
            let watcher = BacklightFacade::from_shared(self.service.clone());
            let sender = self.sender.clone();
            watcher.register_change_notification(
                BacklightProperty::ALL
                    .into_iter()
                    .filter(|property| *property != BacklightProperty::Devices),
                keyboard,
                move |change: &BacklightChange| {
                    let _ = sender.send(*change);
                },
            );
            self.watchers.insert(keyboard, watcher);
            if announce {
                self.send(BacklightChange::new(keyboard, BacklightProperty::Devices));
            }
        }
    }

    fn send(&self, change: BacklightChange) {
        let _ = self.sender.send(change);
    }
}

/// Send changes of every keyboard of `service` to `sender`, following
/// keyboards as they're plugged in and out. Keyboards present when this
/// returns are watched already.
///
/// Shutting down the returned [Handle] drops the registrations and with them
/// every clone of `sender`.
pub(crate) async fn forward_keyboard_changes(
    service: Arc<dyn BacklightService>,
    sender: mpsc::UnboundedSender<BacklightChange>,
) -> Handle {
    let changes = service.subscribe();
    let mut watchers = KeyboardWatchers {
        service,
        sender,
        watchers: BTreeMap::new(),
    };
    watchers.sync(false).await;
    let (handle, handle_child) = Handle::new();
    tokio::spawn(track_keyboards(watchers, changes, handle_child));
    handle
}

async fn track_keyboards(
    mut watchers: KeyboardWatchers,
    mut changes: broadcast::Receiver<BacklightChange>,
    mut handle_child: HandleChild,
) {
    loop {
        tokio::select! {
            _ = handle_child.should_terminate() => {
                drop(watchers);
                return;
            }
            received = changes.recv() => match received {
                Ok(change) if change.property == BacklightProperty::Devices => {
                    watchers.sync(true).await;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => watchers.sync(true).await,
                Err(RecvError::Closed) => {
                    log::debug!("Backlight service went away, no more keyboards to watch");
                    drop(watchers);
                    return;
                }
            }
        }
    }
}

async fn emit_signals(
    mut changes: mpsc::UnboundedReceiver<BacklightChange>,
    signal_context: SignalContext<'static>,
) {
    while let Some(change) = changes.recv().await {
        if let Err(e) = BacklightServer::backlight_changed(
            &signal_context,
            change.keyboard.0,
            change.property.as_str(),
        )
        .await
        {
            log::warn!("Couldn't emit change of keyboard {}: {}", change.keyboard, e);
        }
    }
}

#[dbus_interface(name = "org.keylight.Backlight")]
impl BacklightServer {
    async fn keyboards(&self) -> Vec<u64> {
        self.facade
            .enumerate_keyboards()
            .await
            .into_iter()
            .map(|keyboard| keyboard.0)
            .collect()
    }

    async fn brightness(&self, keyboard: u64) -> f64 {
        self.facade.brightness(KeyboardId(keyboard)).await
    }

    async fn set_brightness(&self, keyboard: u64, level: f64) -> bool {
        log::info!("Brightness of keyboard {} requested over D-Bus", keyboard);
        self.facade.set_brightness(KeyboardId(keyboard), level).await
    }

    async fn auto_brightness(&self, keyboard: u64) -> bool {
        self.facade
            .is_auto_brightness_enabled(KeyboardId(keyboard))
            .await
    }

    async fn set_auto_brightness(&self, keyboard: u64, enabled: bool) -> bool {
        self.facade
            .set_auto_brightness(KeyboardId(keyboard), enabled)
            .await
    }

    async fn idle_dim_timeout(&self, keyboard: u64) -> f64 {
        self.facade.idle_dim_timeout(KeyboardId(keyboard)).await
    }

    async fn set_idle_dim_timeout(&self, keyboard: u64, timeout: f64) -> bool {
        self.facade
            .set_idle_dim_timeout(KeyboardId(keyboard), timeout)
            .await
    }

    async fn is_built_in(&self, keyboard: u64) -> bool {
        self.facade.is_built_in(KeyboardId(keyboard)).await
    }

    async fn is_ambient_feature_available(&self, keyboard: u64) -> bool {
        self.facade
            .is_ambient_feature_available(KeyboardId(keyboard))
            .await
    }

    /// Dimmed, saturated and suppressed flags
    async fn state(&self, keyboard: u64) -> (bool, bool, bool) {
        let state = self.facade.state(KeyboardId(keyboard)).await;
        (state.dimmed, state.saturated, state.suppressed)
    }

    #[dbus_interface(signal)]
    async fn backlight_changed(
        ctxt: &SignalContext<'_>,
        keyboard: u64,
        property: &str,
    ) -> zbus::Result<()>;
}
