use super::{
    backlight::{
        idle_dimming::IdleDimmingService,
        logind::{LogindBacklightService, WriteMode},
        mock::MockBacklightService,
        upower::UPowerBacklightService,
        BacklightService,
    },
    dbus,
    idle::x11::X11IdleTimeSource,
};
use crate::{
    config::{Backend, Config, MockConfig},
    handle::Handle,
};
use anyhow::{Context, Result};
use std::{sync::Arc, time::Duration};

/// The backlight service selected by the configuration, ready to be put
/// behind a facade
pub struct ProvidedService {
    pub service: Arc<dyn BacklightService>,
    /// Controls the idle dimming, if it's running
    pub dimming: Option<Handle>,
}

impl ProvidedService {
    /// Stop the background tasks of the service. Dimmed keyboards are
    /// restored.
    pub async fn shutdown(self) {
        if let Some(dimming) = self.dimming {
            dimming.await_shutdown().await;
        }
    }
}

/// Builds backlight services and D-Bus connections out of the configuration
pub struct DependencyProvider {
    dbus_factory: dbus::ConnectionFactory,
}

impl DependencyProvider {
    pub fn new() -> DependencyProvider {
        DependencyProvider {
            dbus_factory: dbus::ConnectionFactory::new(),
        }
    }

    pub async fn get_dbus_system_connection(&mut self) -> Result<zbus::Connection> {
        Ok(self.dbus_factory.get_system().await?)
    }

    pub async fn get_dbus_session_connection(&mut self) -> Result<zbus::Connection> {
        Ok(self.dbus_factory.get_session().await?)
    }

    /// Create the configured backend, wrapped in idle dimming when that's
    /// enabled and the user's activity can be observed.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn make_service(&mut self, config: &Config) -> Result<ProvidedService> {
        let backend: Arc<dyn BacklightService> = match config.backend {
            Backend::Mock => Arc::new(make_mock(&config.mock)),
            Backend::Logind => Arc::new(self.make_logind(config).await?),
            Backend::Upower => {
                let connection = self.get_dbus_system_connection().await?;
                Arc::new(
                    UPowerBacklightService::new(connection)
                        .await
                        .context("Couldn't connect to UPower")?,
                )
            }
        };
        log::info!("Using the {:?} backlight backend", config.backend);

        if !config.idle_dim.enabled {
            return Ok(ProvidedService {
                service: backend,
                dimming: None,
            });
        }
        match X11IdleTimeSource::new(config.idle_dim.display.as_deref()) {
            Ok(idle_source) => {
                let (service, handle) =
                    IdleDimmingService::spawn(backend, idle_source, config.idle_dim.options());
                Ok(ProvidedService {
                    service: Arc::new(service),
                    dimming: Some(handle),
                })
            }
            Err(e) => {
                log::warn!("Idle dimming disabled, can't watch user activity: {:#}", e);
                Ok(ProvidedService {
                    service: backend,
                    dimming: None,
                })
            }
        }
    }

    async fn make_logind(&mut self, config: &Config) -> Result<LogindBacklightService> {
        let settings = &config.logind;
        let poll_interval = Duration::from_millis(settings.poll_interval_ms);
        let service = match settings.write_mode {
            WriteMode::Logind => {
                let connection = self.get_dbus_system_connection().await?;
                LogindBacklightService::new(
                    settings.leds_path.clone(),
                    connection,
                    &settings.session_path,
                    poll_interval,
                )
                .await
            }
            WriteMode::Direct => {
                let leds_path = settings.leds_path.clone();
                LogindBacklightService::with_direct_writes(leds_path, poll_interval).await
            }
        };
        service.with_context(|| {
            format!(
                "Couldn't open keyboard backlights in {}",
                settings.leds_path.display()
            )
        })
    }
}

impl Default for DependencyProvider {
    fn default() -> Self {
        Self::new()
    }
}

pub fn make_mock(config: &MockConfig) -> MockBacklightService {
    let service = config
        .keyboards
        .iter()
        .fold(MockBacklightService::new(), |service, keyboard| {
            service.with_keyboard(keyboard.id, keyboard.built_in)
        });
    service.set_manual_precedence(config.manual_precedence);
    service
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        config::MockKeyboardConfig,
        external::backlight::{mock::ManualPrecedence, KeyboardId},
    };

    fn mock_config() -> Config {
        let mut config = Config::default();
        config.backend = Backend::Mock;
        config.idle_dim.enabled = false;
        config.mock = MockConfig {
            keyboards: vec![
                MockKeyboardConfig {
                    id: 3,
                    built_in: false,
                },
                MockKeyboardConfig {
                    id: 1,
                    built_in: true,
                },
            ],
            manual_precedence: ManualPrecedence::DisableAuto,
        };
        config
    }

    #[tokio::test]
    async fn test_mock() {
        let mut provider = DependencyProvider::new();
        let provided = provider.make_service(&mock_config()).await.unwrap();
        assert!(provided.dimming.is_none());
        let service = provided.service.clone();
        assert_eq!(
            service.keyboards().await.unwrap(),
            vec![KeyboardId(1), KeyboardId(3)]
        );
        assert!(service.is_built_in(KeyboardId(1)).await.unwrap());
        assert!(!service.is_built_in(KeyboardId(3)).await.unwrap());
        provided.shutdown().await;
    }

    #[tokio::test]
    async fn test_mock_manual_precedence() {
        let service = make_mock(&mock_config().mock);
        service
            .set_auto_brightness(KeyboardId(1), true)
            .await
            .unwrap();
        service.set_brightness(KeyboardId(1), 0.5).await.unwrap();
        assert!(!service.auto_brightness(KeyboardId(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_leds_directory() {
        let mut config = Config::default();
        config.logind.write_mode = WriteMode::Direct;
        config.logind.leds_path = "/nonexistent/leds".into();
        config.idle_dim.enabled = false;
        let mut provider = DependencyProvider::new();
        assert!(provider.make_service(&config).await.is_err());
    }
}
