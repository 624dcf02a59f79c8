use async_trait::async_trait;
use std::{fmt, str::FromStr};
use thiserror::Error;
use tokio::sync::broadcast;

/// Opaque identifier of a physical backlit keyboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyboardId(pub u64);

impl fmt::Display for KeyboardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for KeyboardId {
    fn from(id: u64) -> Self {
        KeyboardId(id)
    }
}

/// Flags explaining why the actual brightness of a keyboard may differ from
/// the requested one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BacklightState {
    /// Brightness was lowered because the user is idle
    pub dimmed: bool,
    /// The requested brightness can't be reached by the hardware
    pub saturated: bool,
    /// The backlight is held off by the service, e.g. because the lid is closed
    pub suppressed: bool,
}

/// A watchable property of a keyboard backlight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BacklightProperty {
    Brightness,
    AutoBrightness,
    IdleDimTimeout,
    Dimmed,
    Saturated,
    Suppressed,
    /// The keyboard appeared or went away
    Devices,
}

impl BacklightProperty {
    pub const ALL: [BacklightProperty; 7] = [
        BacklightProperty::Brightness,
        BacklightProperty::AutoBrightness,
        BacklightProperty::IdleDimTimeout,
        BacklightProperty::Dimmed,
        BacklightProperty::Saturated,
        BacklightProperty::Suppressed,
        BacklightProperty::Devices,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BacklightProperty::Brightness => "brightness",
            BacklightProperty::AutoBrightness => "auto-brightness",
            BacklightProperty::IdleDimTimeout => "idle-dim-timeout",
            BacklightProperty::Dimmed => "dimmed",
            BacklightProperty::Saturated => "saturated",
            BacklightProperty::Suppressed => "suppressed",
            BacklightProperty::Devices => "devices",
        }
    }
}

impl fmt::Display for BacklightProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BacklightProperty {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self> {
        BacklightProperty::ALL
            .iter()
            .find(|p| p.as_str() == s)
            .copied()
            .ok_or_else(|| ServiceError::Malformed(format!("unknown backlight property {}", s)))
    }
}

/// Notification about a change of a backlight property, broadcast by
/// [BacklightService]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BacklightChange {
    pub keyboard: KeyboardId,
    pub property: BacklightProperty,
}

impl BacklightChange {
    pub fn new(keyboard: KeyboardId, property: BacklightProperty) -> BacklightChange {
        BacklightChange { keyboard, property }
    }
}

/// Reasons for a [BacklightService] not honoring a request.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServiceError {
    #[error("unknown keyboard {0}")]
    UnknownKeyboard(KeyboardId),

    #[error("brightness {0} is outside of the accepted range")]
    OutOfRange(f64),

    #[error("idle dim timeout {0} is not a valid duration")]
    InvalidTimeout(f64),

    #[error("{0} is not supported by this service")]
    Unsupported(&'static str),

    #[error("not authorized to control keyboard {0}")]
    Unauthorized(KeyboardId),

    #[error("malformed value: {0}")]
    Malformed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("D-Bus error: {0}")]
    DBus(#[from] zbus::Error),
}

pub type Result<T> = std::result::Result<T, ServiceError>;

/// Check that a brightness level lies in [0.0, 1.0].
pub fn validate_level(level: f64) -> Result<f64> {
    if level.is_finite() && (0.0..=1.0).contains(&level) {
        Ok(level)
    } else {
        Err(ServiceError::OutOfRange(level))
    }
}

/// Check that an idle dim timeout is a non-negative finite number of seconds.
pub fn validate_timeout(timeout: f64) -> Result<f64> {
    if timeout.is_finite() && timeout >= 0.0 {
        Ok(timeout)
    } else {
        Err(ServiceError::InvalidTimeout(timeout))
    }
}

/// The system component which actually stores and applies keyboard backlight
/// settings.
///
/// Implementations are addressed by [KeyboardId]s. Levels are normalized to
/// [0.0, 1.0], timeouts are in seconds.
#[async_trait]
pub trait BacklightService: Send + Sync + 'static {
    /// Identifiers of the currently known backlit keyboards
    async fn keyboards(&self) -> Result<Vec<KeyboardId>>;

    async fn brightness(&self, keyboard: KeyboardId) -> Result<f64>;
    async fn set_brightness(&self, keyboard: KeyboardId, level: f64) -> Result<()>;

    async fn auto_brightness(&self, keyboard: KeyboardId) -> Result<bool>;
    async fn set_auto_brightness(&self, keyboard: KeyboardId, enabled: bool) -> Result<()>;

    async fn idle_dim_timeout(&self, keyboard: KeyboardId) -> Result<f64>;
    async fn set_idle_dim_timeout(&self, keyboard: KeyboardId, timeout: f64) -> Result<()>;

    async fn is_built_in(&self, keyboard: KeyboardId) -> Result<bool>;

    /// Whether the keyboard has an ambient light sensor driving auto-brightness
    async fn ambient_feature_available(&self, keyboard: KeyboardId) -> Result<bool>;

    async fn state(&self, keyboard: KeyboardId) -> Result<BacklightState>;

    /// Get a [broadcast::Receiver] on which changes of any keyboard's
    /// properties are announced.
    fn subscribe(&self) -> broadcast::Receiver<BacklightChange>;
}
