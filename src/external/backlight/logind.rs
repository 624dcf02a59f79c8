use super::{
    interface::{validate_level, validate_timeout, Result},
    BacklightChange, BacklightProperty, BacklightService, BacklightState, KeyboardId,
    ServiceError, CHANGE_CHANNEL_CAPACITY,
};
use crate::handle::{Handle, HandleChild};
use async_trait::async_trait;
use serde::Deserialize;
use std::{
    collections::BTreeMap,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::{fs, sync::broadcast, time::MissedTickBehavior};
use tokio_stream::{wrappers::ReadDirStream, StreamExt};
use zbus::dbus_proxy;

/// Only LED class devices with this in their name are keyboard backlights
const KBD_BACKLIGHT_MARKER: &str = "kbd_backlight";

#[dbus_proxy(
    interface = "org.freedesktop.login1.Session",
    default_service = "org.freedesktop.login1"
)]
trait Session {
    fn set_brightness(&self, subsystem: &str, name: &str, brightness: u32) -> zbus::Result<()>;
}

/// How brightness gets written to the LED class device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Through logind's Session.SetBrightness, which doesn't need root
    Logind,
    /// Straight into the sysfs brightness file
    Direct,
}

impl Default for WriteMode {
    fn default() -> Self {
        WriteMode::Logind
    }
}

enum LedWriter {
    Logind(SessionProxy<'static>),
    Direct,
}

#[derive(Debug, Clone)]
struct LedDevice {
    name: String,
    path: PathBuf,
    max_brightness: u32,
    built_in: bool,
    last_brightness: u32,
}

#[derive(Debug, Default)]
struct Devices {
    by_id: BTreeMap<KeyboardId, LedDevice>,
    next_id: u64,
}

impl Devices {
    fn get(&self, keyboard: KeyboardId) -> Result<LedDevice> {
        self.by_id
            .get(&keyboard)
            .cloned()
            .ok_or(ServiceError::UnknownKeyboard(keyboard))
    }

    fn id_of(&self, name: &str) -> Option<KeyboardId> {
        self.by_id
            .iter()
            .find(|(_, d)| d.name == name)
            .map(|(id, _)| *id)
    }
}

/// Keyboard backlights found in the kernel's LED class directory
struct LedRegistry {
    leds_path: PathBuf,
    devices: Mutex<Devices>,
    sender: broadcast::Sender<BacklightChange>,
}

impl LedRegistry {
    fn device(&self, keyboard: KeyboardId) -> Result<LedDevice> {
        self.devices.lock().unwrap().get(keyboard)
    }

    fn announce(&self, keyboard: KeyboardId, property: BacklightProperty) {
        let _ = self.sender.send(BacklightChange::new(keyboard, property));
    }

    /// Re-read the LED class directory, keeping ids of the devices which are
    /// still present and assigning new ones to the newcomers.
    async fn rescan(&self) -> Result<()> {
        let mut found = Vec::new();
        let mut entries = ReadDirStream::new(fs::read_dir(&self.leds_path).await?);
        while let Some(entry) = entries.next().await {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.contains(KBD_BACKLIGHT_MARKER) {
                continue;
            }
            match probe_device(&name, entry.path()).await {
                Ok(device) => found.push(device),
                Err(e) => log::warn!("Skipping LED device {}: {}", name, e),
            }
        }
        // Built-in keyboards get the lowest ids
        found.sort_by(|a, b| b.built_in.cmp(&a.built_in).then(a.name.cmp(&b.name)));

        let mut changed = Vec::new();
        {
            let mut devices = self.devices.lock().unwrap();
            let gone: Vec<KeyboardId> = devices
                .by_id
                .iter()
                .filter(|(_, d)| !found.iter().any(|f| f.name == d.name))
                .map(|(id, _)| *id)
                .collect();
            for id in gone {
                if let Some(device) = devices.by_id.remove(&id) {
                    log::info!("Keyboard backlight {} ({}) went away", id, device.name);
                }
                changed.push(id);
            }
            for device in found {
                if devices.id_of(&device.name).is_some() {
                    continue;
                }
                devices.next_id += 1;
                let id = KeyboardId(devices.next_id);
                log::info!(
                    "Found keyboard backlight {} ({}, built in: {})",
                    id,
                    device.name,
                    device.built_in
                );
                devices.by_id.insert(id, device);
                changed.push(id);
            }
        }
        for id in changed {
            self.announce(id, BacklightProperty::Devices);
        }
        Ok(())
    }

    /// Compare the brightness of every device with the last known value and
    /// announce the differences.
    async fn detect_brightness_changes(&self) -> Result<()> {
        let snapshot: Vec<(KeyboardId, LedDevice)> = self
            .devices
            .lock()
            .unwrap()
            .by_id
            .iter()
            .map(|(id, d)| (*id, d.clone()))
            .collect();
        for (id, device) in snapshot {
            let current = read_number_from_file(device.path.join("brightness")).await?;
            if current != device.last_brightness && self.remember_brightness(id, current) {
                log::debug!("Brightness of keyboard {} changed to {}", id, current);
                self.announce(id, BacklightProperty::Brightness);
            }
        }
        Ok(())
    }

    /// Store the raw brightness of a device. Returns whether it differed from
    /// the stored one.
    fn remember_brightness(&self, keyboard: KeyboardId, raw: u32) -> bool {
        let mut devices = self.devices.lock().unwrap();
        match devices.by_id.get_mut(&keyboard) {
            Some(device) => std::mem::replace(&mut device.last_brightness, raw) != raw,
            None => false,
        }
    }
}

/// A [BacklightService] which uses the kernel's /sys/class/leds device class
/// to control keyboard backlights.
///
/// The brightness is read directly from the filesystem but writing is
/// mediated via logind Session's SetBrightness method by default, to allow
/// root-less brightness setting. The kernel doesn't announce brightness
/// changes, so the devices are polled.
pub struct LogindBacklightService {
    registry: Arc<LedRegistry>,
    writer: LedWriter,
    _poller: Handle,
}

impl LogindBacklightService {
    /// Create a service controlling the keyboard backlights under `leds_path`,
    /// writing through the logind session at `session_path`.
    pub async fn new(
        leds_path: impl Into<PathBuf>,
        connection: zbus::Connection,
        session_path: &str,
        poll_interval: Duration,
    ) -> Result<LogindBacklightService> {
        let proxy = SessionProxy::builder(&connection)
            .path(session_path.to_owned())?
            .build()
            .await?;
        Self::with_writer(leds_path.into(), LedWriter::Logind(proxy), poll_interval).await
    }

    /// Create a service which writes into the sysfs files itself. The process
    /// needs write access to them.
    pub async fn with_direct_writes(
        leds_path: impl Into<PathBuf>,
        poll_interval: Duration,
    ) -> Result<LogindBacklightService> {
        Self::with_writer(leds_path.into(), LedWriter::Direct, poll_interval).await
    }

    async fn with_writer(
        leds_path: PathBuf,
        writer: LedWriter,
        poll_interval: Duration,
    ) -> Result<LogindBacklightService> {
        let (sender, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let registry = Arc::new(LedRegistry {
            leds_path,
            devices: Mutex::new(Devices::default()),
            sender,
        });
        registry.rescan().await?;
        let (handle, handle_child) = Handle::new();
        tokio::spawn(poll(registry.clone(), poll_interval, handle_child));
        Ok(LogindBacklightService {
            registry,
            writer,
            _poller: handle,
        })
    }

    /// Name of the LED class device behind a keyboard id
    pub fn device_name(&self, keyboard: KeyboardId) -> Option<String> {
        self.registry.device(keyboard).ok().map(|d| d.name)
    }
}

#[async_trait]
impl BacklightService for LogindBacklightService {
    async fn keyboards(&self) -> Result<Vec<KeyboardId>> {
        self.registry.rescan().await?;
        Ok(self
            .registry
            .devices
            .lock()
            .unwrap()
            .by_id
            .keys()
            .copied()
            .collect())
    }

    async fn brightness(&self, keyboard: KeyboardId) -> Result<f64> {
        let device = self.registry.device(keyboard)?;
        let raw = read_number_from_file(device.path.join("brightness")).await?;
        Ok(raw as f64 / device.max_brightness as f64)
    }

    async fn set_brightness(&self, keyboard: KeyboardId, level: f64) -> Result<()> {
        let level = validate_level(level)?;
        let device = self.registry.device(keyboard)?;
        let raw = (device.max_brightness as f64 * level).round() as u32;
        match &self.writer {
            LedWriter::Logind(proxy) => proxy.set_brightness("leds", &device.name, raw).await?,
            LedWriter::Direct => fs::write(device.path.join("brightness"), raw.to_string())
                .await
                .map_err(|e| match e.kind() {
                    ErrorKind::PermissionDenied => ServiceError::Unauthorized(keyboard),
                    _ => ServiceError::Io(e),
                })?,
        }
        if self.registry.remember_brightness(keyboard, raw) {
            self.registry.announce(keyboard, BacklightProperty::Brightness);
        }
        Ok(())
    }

    async fn auto_brightness(&self, keyboard: KeyboardId) -> Result<bool> {
        self.registry.device(keyboard)?;
        Ok(false)
    }

    async fn set_auto_brightness(&self, keyboard: KeyboardId, _enabled: bool) -> Result<()> {
        self.registry.device(keyboard)?;
        Err(ServiceError::Unsupported("auto-brightness"))
    }

    async fn idle_dim_timeout(&self, keyboard: KeyboardId) -> Result<f64> {
        self.registry.device(keyboard)?;
        Err(ServiceError::Unsupported("idle dimming"))
    }

    async fn set_idle_dim_timeout(&self, keyboard: KeyboardId, timeout: f64) -> Result<()> {
        self.registry.device(keyboard)?;
        validate_timeout(timeout)?;
        Err(ServiceError::Unsupported("idle dimming"))
    }

    async fn is_built_in(&self, keyboard: KeyboardId) -> Result<bool> {
        Ok(self.registry.device(keyboard)?.built_in)
    }

    async fn ambient_feature_available(&self, keyboard: KeyboardId) -> Result<bool> {
        self.registry.device(keyboard)?;
        Ok(false)
    }

    async fn state(&self, keyboard: KeyboardId) -> Result<BacklightState> {
        self.registry.device(keyboard)?;
        Ok(BacklightState::default())
    }

    fn subscribe(&self) -> broadcast::Receiver<BacklightChange> {
        self.registry.sender.subscribe()
    }
}

async fn poll(registry: Arc<LedRegistry>, interval: Duration, mut handle_child: HandleChild) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = handle_child.should_terminate() => {
                log::debug!("LED poller stopping");
                return;
            }
            _ = ticker.tick() => {
                if let Err(e) = registry.rescan().await {
                    log::error!("Couldn't rescan LED devices: {}", e);
                    continue;
                }
                if let Err(e) = registry.detect_brightness_changes().await {
                    log::error!("Couldn't read keyboard backlight brightness: {}", e);
                }
            }
        }
    }
}

async fn probe_device(name: &str, path: PathBuf) -> Result<LedDevice> {
    let max_brightness = read_number_from_file(path.join("max_brightness")).await?;
    if max_brightness == 0 {
        return Err(ServiceError::Malformed(format!(
            "{} reports a maximal brightness of 0",
            name
        )));
    }
    let last_brightness = read_number_from_file(path.join("brightness")).await?;
    let built_in = is_built_in(&path).await;
    Ok(LedDevice {
        name: name.to_owned(),
        path,
        max_brightness,
        built_in,
        last_brightness,
    })
}

/// Keyboards hanging off an USB bus or connected through uhid (Bluetooth) are
/// external, everything else is considered a part of the machine.
async fn is_built_in(path: &Path) -> bool {
    match fs::canonicalize(path).await {
        Ok(real_path) => !real_path.components().any(|c| {
            let component = c.as_os_str().to_string_lossy();
            component.starts_with("usb") || component == "uhid"
        }),
        Err(_) => true,
    }
}

async fn read_number_from_file(path: impl AsRef<Path>) -> Result<u32> {
    let contents = fs::read_to_string(path.as_ref()).await?;
    contents.trim().parse().map_err(|_| {
        ServiceError::Malformed(format!(
            "{} doesn't contain a number",
            path.as_ref().display()
        ))
    })
}
