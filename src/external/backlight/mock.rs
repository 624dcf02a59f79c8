use std::io::{Error, ErrorKind};
use std::{
    cell::Cell,
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::broadcast;

use super::{
    interface::{validate_level, validate_timeout, Result},
    BacklightChange, BacklightProperty, BacklightService, BacklightState, KeyboardId,
    ServiceError, CHANGE_CHANNEL_CAPACITY,
};

/// What happens to auto-brightness when brightness is set manually.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManualPrecedence {
    /// Auto-brightness stays enabled, the manual level is stored as is
    KeepAuto,
    /// A manual level switches auto-brightness off
    DisableAuto,
}

impl Default for ManualPrecedence {
    fn default() -> Self {
        ManualPrecedence::KeepAuto
    }
}

#[derive(Debug, Clone)]
struct MockKeyboard {
    brightness: f64,
    auto_brightness: bool,
    idle_dim_timeout: f64,
    built_in: bool,
    ambient_available: bool,
    writable: bool,
    state: BacklightState,
}

impl MockKeyboard {
    fn new(built_in: bool) -> MockKeyboard {
        MockKeyboard {
            brightness: 1.0,
            auto_brightness: false,
            idle_dim_timeout: 0.0,
            built_in,
            ambient_available: built_in,
            writable: true,
            state: BacklightState::default(),
        }
    }
}

/// A mock [BacklightService], keeping all keyboards in memory.
///
/// Used when testing code which uses the trait and by the `mock` backend.
#[derive(Clone)]
pub struct MockBacklightService {
    keyboards: Arc<Mutex<BTreeMap<KeyboardId, MockKeyboard>>>,
    should_fail: Arc<Mutex<Cell<bool>>>,
    precedence: Arc<Mutex<Cell<ManualPrecedence>>>,
    sender: broadcast::Sender<BacklightChange>,
}

impl MockBacklightService {
    /// Create a new service without any keyboards
    pub fn new() -> MockBacklightService {
        let (sender, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        MockBacklightService {
            keyboards: Arc::new(Mutex::new(BTreeMap::new())),
            should_fail: Arc::new(Mutex::new(Cell::new(false))),
            precedence: Arc::new(Mutex::new(Cell::new(ManualPrecedence::default()))),
            sender,
        }
    }

    /// Builder-style variant of [Self::add_keyboard]
    pub fn with_keyboard(self, keyboard: impl Into<KeyboardId>, built_in: bool) -> Self {
        self.add_keyboard(keyboard, built_in);
        self
    }

    /// Plug in a keyboard at full brightness. Built-in keyboards get an
    /// ambient light sensor.
    pub fn add_keyboard(&self, keyboard: impl Into<KeyboardId>, built_in: bool) {
        let keyboard = keyboard.into();
        self.keyboards
            .lock()
            .unwrap()
            .insert(keyboard, MockKeyboard::new(built_in));
        self.notify(BacklightChange::new(keyboard, BacklightProperty::Devices));
    }

    pub fn remove_keyboard(&self, keyboard: impl Into<KeyboardId>) {
        let keyboard = keyboard.into();
        if self.keyboards.lock().unwrap().remove(&keyboard).is_some() {
            self.notify(BacklightChange::new(keyboard, BacklightProperty::Devices));
        }
    }

    /// Set whether operations on this service should return an error or not
    pub fn set_failure_mode(&self, should_fail: bool) {
        self.should_fail.lock().unwrap().set(should_fail);
    }

    pub fn set_manual_precedence(&self, precedence: ManualPrecedence) {
        self.precedence.lock().unwrap().set(precedence);
    }

    pub fn set_ambient_available(&self, keyboard: impl Into<KeyboardId>, available: bool) {
        let _ = self.with_keyboard_mut(keyboard.into(), |k| k.ambient_available = available);
    }

    /// Make brightness writes to a keyboard fail with
    /// [ServiceError::Unauthorized], like a sysfs file without write access.
    pub fn set_writable(&self, keyboard: impl Into<KeyboardId>, writable: bool) {
        let _ = self.with_keyboard_mut(keyboard.into(), |k| k.writable = writable);
    }

    /// Replace the state flags of a keyboard, announcing each flag that changed.
    pub fn set_state(&self, keyboard: impl Into<KeyboardId>, state: BacklightState) {
        let keyboard = keyboard.into();
        let previous = match self.with_keyboard_mut(keyboard, |k| {
            std::mem::replace(&mut k.state, state)
        }) {
            Ok(previous) => previous,
            Err(_) => return,
        };
        let flags = [
            (previous.dimmed != state.dimmed, BacklightProperty::Dimmed),
            (previous.saturated != state.saturated, BacklightProperty::Saturated),
            (previous.suppressed != state.suppressed, BacklightProperty::Suppressed),
        ];
        for (changed, property) in flags {
            if changed {
                self.notify(BacklightChange::new(keyboard, property));
            }
        }
    }

    /// Announce a change, as if it came from the system.
    pub fn notify(&self, change: BacklightChange) {
        // Nobody listening is fine
        let _ = self.sender.send(change);
    }

    fn with_keyboard_mut<T>(
        &self,
        keyboard: KeyboardId,
        f: impl FnOnce(&mut MockKeyboard) -> T,
    ) -> Result<T> {
        if self.should_fail.lock().unwrap().get() {
            return Err(mock_failure());
        }
        let mut keyboards = self.keyboards.lock().unwrap();
        let entry = keyboards
            .get_mut(&keyboard)
            .ok_or(ServiceError::UnknownKeyboard(keyboard))?;
        Ok(f(entry))
    }
}

fn mock_failure() -> ServiceError {
    ServiceError::Io(Error::new(ErrorKind::Other, "Mock failure"))
}

impl Default for MockBacklightService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BacklightService for MockBacklightService {
    async fn keyboards(&self) -> Result<Vec<KeyboardId>> {
        if self.should_fail.lock().unwrap().get() {
            return Err(mock_failure());
        }
        Ok(self.keyboards.lock().unwrap().keys().copied().collect())
    }

    async fn brightness(&self, keyboard: KeyboardId) -> Result<f64> {
        self.with_keyboard_mut(keyboard, |k| k.brightness)
    }

    async fn set_brightness(&self, keyboard: KeyboardId, level: f64) -> Result<()> {
        let level = validate_level(level)?;
        if !self.with_keyboard_mut(keyboard, |k| k.writable)? {
            return Err(ServiceError::Unauthorized(keyboard));
        }
        let precedence = self.precedence.lock().unwrap().get();
        let (brightness_changed, auto_disabled) = self.with_keyboard_mut(keyboard, |k| {
            let brightness_changed = k.brightness != level;
            k.brightness = level;
            let auto_disabled = precedence == ManualPrecedence::DisableAuto && k.auto_brightness;
            if auto_disabled {
                k.auto_brightness = false;
            }
            (brightness_changed, auto_disabled)
        })?;
        if brightness_changed {
            self.notify(BacklightChange::new(keyboard, BacklightProperty::Brightness));
        }
        if auto_disabled {
            self.notify(BacklightChange::new(
                keyboard,
                BacklightProperty::AutoBrightness,
            ));
        }
        Ok(())
    }

    async fn auto_brightness(&self, keyboard: KeyboardId) -> Result<bool> {
        self.with_keyboard_mut(keyboard, |k| k.auto_brightness)
    }

    async fn set_auto_brightness(&self, keyboard: KeyboardId, enabled: bool) -> Result<()> {
        let changed = self.with_keyboard_mut(keyboard, |k| {
            std::mem::replace(&mut k.auto_brightness, enabled) != enabled
        })?;
        if changed {
            self.notify(BacklightChange::new(
                keyboard,
                BacklightProperty::AutoBrightness,
            ));
        }
        Ok(())
    }

    async fn idle_dim_timeout(&self, keyboard: KeyboardId) -> Result<f64> {
        self.with_keyboard_mut(keyboard, |k| k.idle_dim_timeout)
    }

    async fn set_idle_dim_timeout(&self, keyboard: KeyboardId, timeout: f64) -> Result<()> {
        let timeout = validate_timeout(timeout)?;
        let changed = self.with_keyboard_mut(keyboard, |k| {
            std::mem::replace(&mut k.idle_dim_timeout, timeout) != timeout
        })?;
        if changed {
            self.notify(BacklightChange::new(
                keyboard,
                BacklightProperty::IdleDimTimeout,
            ));
        }
        Ok(())
    }

    async fn is_built_in(&self, keyboard: KeyboardId) -> Result<bool> {
        self.with_keyboard_mut(keyboard, |k| k.built_in)
    }

    async fn ambient_feature_available(&self, keyboard: KeyboardId) -> Result<bool> {
        self.with_keyboard_mut(keyboard, |k| k.ambient_available)
    }

    async fn state(&self, keyboard: KeyboardId) -> Result<BacklightState> {
        self.with_keyboard_mut(keyboard, |k| k.state)
    }

    fn subscribe(&self) -> broadcast::Receiver<BacklightChange> {
        self.sender.subscribe()
    }
}
