use super::{
    interface::{validate_level, validate_timeout, Result},
    BacklightChange, BacklightProperty, BacklightService, BacklightState, KeyboardId,
    ServiceError, CHANGE_CHANNEL_CAPACITY,
};
use crate::handle::{Handle, HandleChild};
use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use zbus::dbus_proxy;

/// UPower only knows a single keyboard backlight
pub const UPOWER_KEYBOARD: KeyboardId = KeyboardId(1);

#[dbus_proxy(
    interface = "org.freedesktop.UPower.KbdBacklight",
    default_service = "org.freedesktop.UPower",
    default_path = "/org/freedesktop/UPower/KbdBacklight"
)]
trait KbdBacklight {
    fn get_max_brightness(&self) -> zbus::Result<i32>;

    fn get_brightness(&self) -> zbus::Result<i32>;

    fn set_brightness(&self, value: i32) -> zbus::Result<()>;

    #[dbus_proxy(signal)]
    fn brightness_changed(&self, value: i32) -> zbus::Result<()>;
}

/// A [BacklightService] talking to UPower's KbdBacklight interface on the
/// system bus.
pub struct UPowerBacklightService {
    proxy: KbdBacklightProxy<'static>,
    max_brightness: i32,
    sender: broadcast::Sender<BacklightChange>,
    _forwarder: Handle,
}

impl UPowerBacklightService {
    pub async fn new(system_connection: zbus::Connection) -> Result<UPowerBacklightService> {
        let proxy = KbdBacklightProxy::new(&system_connection).await?;
        let max_brightness = proxy.get_max_brightness().await?;
        if max_brightness <= 0 {
            return Err(ServiceError::Malformed(format!(
                "UPower reports a maximal keyboard brightness of {}",
                max_brightness
            )));
        }
        log::debug!(
            "UPower keyboard backlight has {} brightness steps",
            max_brightness
        );
        let stream = proxy.receive_brightness_changed().await?;
        let (sender, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let (handle, handle_child) = Handle::new();
        tokio::spawn(forward_changes(stream, sender.clone(), handle_child));
        Ok(UPowerBacklightService {
            proxy,
            max_brightness,
            sender,
            _forwarder: handle,
        })
    }

    fn check_keyboard(keyboard: KeyboardId) -> Result<()> {
        if keyboard == UPOWER_KEYBOARD {
            Ok(())
        } else {
            Err(ServiceError::UnknownKeyboard(keyboard))
        }
    }
}

#[async_trait]
impl BacklightService for UPowerBacklightService {
    async fn keyboards(&self) -> Result<Vec<KeyboardId>> {
        Ok(vec![UPOWER_KEYBOARD])
    }

    async fn brightness(&self, keyboard: KeyboardId) -> Result<f64> {
        Self::check_keyboard(keyboard)?;
        let raw = self.proxy.get_brightness().await?;
        Ok(raw as f64 / self.max_brightness as f64)
    }

    async fn set_brightness(&self, keyboard: KeyboardId, level: f64) -> Result<()> {
        Self::check_keyboard(keyboard)?;
        let level = validate_level(level)?;
        let raw = (self.max_brightness as f64 * level).round() as i32;
        Ok(self.proxy.set_brightness(raw).await?)
    }

    async fn auto_brightness(&self, keyboard: KeyboardId) -> Result<bool> {
        Self::check_keyboard(keyboard)?;
        Ok(false)
    }

    async fn set_auto_brightness(&self, keyboard: KeyboardId, _enabled: bool) -> Result<()> {
        Self::check_keyboard(keyboard)?;
        Err(ServiceError::Unsupported("auto-brightness"))
    }

    async fn idle_dim_timeout(&self, keyboard: KeyboardId) -> Result<f64> {
        Self::check_keyboard(keyboard)?;
        Err(ServiceError::Unsupported("idle dimming"))
    }

    async fn set_idle_dim_timeout(&self, keyboard: KeyboardId, timeout: f64) -> Result<()> {
        Self::check_keyboard(keyboard)?;
        validate_timeout(timeout)?;
        Err(ServiceError::Unsupported("idle dimming"))
    }

    async fn is_built_in(&self, keyboard: KeyboardId) -> Result<bool> {
        Self::check_keyboard(keyboard)?;
        Ok(true)
    }

    async fn ambient_feature_available(&self, keyboard: KeyboardId) -> Result<bool> {
        Self::check_keyboard(keyboard)?;
        Ok(false)
    }

    async fn state(&self, keyboard: KeyboardId) -> Result<BacklightState> {
        Self::check_keyboard(keyboard)?;
        Ok(BacklightState::default())
    }

    fn subscribe(&self) -> broadcast::Receiver<BacklightChange> {
        self.sender.subscribe()
    }
}

async fn forward_changes(
    mut stream: BrightnessChangedStream<'static>,
    sender: broadcast::Sender<BacklightChange>,
    mut handle_child: HandleChild,
) {
    loop {
        tokio::select! {
            _ = handle_child.should_terminate() => {
                log::debug!("UPower signal forwarder stopping");
                return;
            }
            signal = stream.next() => match signal {
                Some(signal) => {
                    match signal.args() {
                        Ok(args) => {
                            log::debug!("UPower reports keyboard brightness {}", args.value)
                        }
                        Err(e) => log::warn!("Malformed BrightnessChanged signal: {}", e),
                    }
                    let _ = sender.send(BacklightChange::new(
                        UPOWER_KEYBOARD,
                        BacklightProperty::Brightness,
                    ));
                }
                None => {
                    log::error!("UPower BrightnessChanged stream ended");
                    return;
                }
            }
        }
    }
}
