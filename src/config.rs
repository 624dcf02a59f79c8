//! Configuration file handling
//!
//! The configuration is a TOML file. Every key is optional, a missing file
//! at the default location means the defaults are used.

use crate::external::backlight::{
    idle_dimming::IdleDimmingOptions, interface::validate_timeout, logind::WriteMode,
    mock::ManualPrecedence,
};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::{
    env,
    path::{Path, PathBuf},
    time::Duration,
};

/// Which service does the actual backlight control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ArgEnum)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// LED class devices in sysfs, written through logind
    Logind,
    /// UPower's KbdBacklight D-Bus interface
    Upower,
    /// In-memory keyboards, for trying things out
    Mock,
}

impl Default for Backend {
    fn default() -> Self {
        Backend::Logind
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogindConfig {
    pub leds_path: PathBuf,
    pub session_path: String,
    pub write_mode: WriteMode,
    pub poll_interval_ms: u64,
}

impl Default for LogindConfig {
    fn default() -> Self {
        LogindConfig {
            leds_path: PathBuf::from("/sys/class/leds"),
            session_path: "/org/freedesktop/login1/session/auto".to_owned(),
            write_mode: WriteMode::default(),
            poll_interval_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IdleDimConfig {
    pub enabled: bool,
    /// Seconds of inactivity before dimming, 0 to only dim keyboards which
    /// get a timeout at runtime
    pub timeout: f64,
    /// Percentage of the current brightness the keyboard is dimmed to
    pub dim_percentage: u8,
    pub poll_interval_ms: u64,
    /// X11 display, $DISPLAY when not set
    pub display: Option<String>,
}

impl Default for IdleDimConfig {
    fn default() -> Self {
        IdleDimConfig {
            enabled: true,
            timeout: 0.0,
            dim_percentage: 0,
            poll_interval_ms: 1000,
            display: None,
        }
    }
}

impl IdleDimConfig {
    pub fn options(&self) -> IdleDimmingOptions {
        IdleDimmingOptions {
            default_timeout: self.timeout,
            dim_fraction: self.dim_percentage as f64 / 100f64,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MockKeyboardConfig {
    pub id: u64,
    #[serde(default)]
    pub built_in: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MockConfig {
    pub keyboards: Vec<MockKeyboardConfig>,
    pub manual_precedence: ManualPrecedence,
}

impl Default for MockConfig {
    fn default() -> Self {
        MockConfig {
            keyboards: vec![MockKeyboardConfig {
                id: 1,
                built_in: true,
            }],
            manual_precedence: ManualPrecedence::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DBusConfig {
    pub name: String,
    pub path: String,
}

impl Default for DBusConfig {
    fn default() -> Self {
        DBusConfig {
            name: "org.keylight.Backlight".to_owned(),
            path: "/org/keylight/Backlight".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub backend: Backend,
    pub logind: LogindConfig,
    pub idle_dim: IdleDimConfig,
    pub mock: MockConfig,
    pub dbus: DBusConfig,
}

impl Config {
    /// Load the configuration from `path`, or from the default location when
    /// no path is given.
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let path = match path {
            Some(path) => path.to_owned(),
            None => match default_path() {
                Some(path) if path.exists() => path,
                _ => {
                    log::debug!("No configuration file found, using defaults");
                    return Ok(Config::default());
                }
            },
        };
        log::debug!("Loading configuration from {}", path.display());
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Couldn't read configuration file {}", path.display()))?;
        Self::parse(&contents)
            .with_context(|| format!("Invalid configuration file {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Config> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.idle_dim.dim_percentage > 100 {
            bail!("idle_dim.dim_percentage must be between 0 and 100");
        }
        if validate_timeout(self.idle_dim.timeout).is_err() {
            bail!("idle_dim.timeout must be a non-negative number of seconds");
        }
        if self.idle_dim.poll_interval_ms == 0 || self.logind.poll_interval_ms == 0 {
            bail!("Poll intervals must be longer than 0 ms");
        }
        Ok(())
    }
}

/// $XDG_CONFIG_HOME/keylight/config.toml, falling back to ~/.config
pub fn default_path() -> Option<PathBuf> {
    let config_home = env::var_os("XDG_CONFIG_HOME")
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .or_else(|| env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))?;
    Some(config_home.join("keylight").join("config.toml"))
}
