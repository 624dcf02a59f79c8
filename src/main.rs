#![warn(missing_docs)]

//! Keyboard backlight control for Linux

mod cli;

use anyhow::{bail, Result};
use clap::Parser;
use cli::{Cli, Command};
use flexi_logger::Logger;
use keylight::{
    config::Config,
    control::dbus_server::BacklightServer,
    external::{
        backlight::{BacklightChange, BacklightService, KeyboardId},
        dependency_provider::DependencyProvider,
    },
    facade::BacklightFacade,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let _logger = Logger::try_with_env_or_str(level)?.start()?;
    log_panics::init();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }
    // Short-lived commands shouldn't dim anything behind the user's back
    if !matches!(cli.command, Command::Daemon) {
        config.idle_dim.enabled = false;
    }

    let mut provider = DependencyProvider::new();
    let provided = provider.make_service(&config).await?;
    let facade = BacklightFacade::from_shared(provided.service.clone());
    let result = run_command(cli.command, &config, &facade).await;
    drop(facade);
    provided.shutdown().await;
    result
}

async fn run_command(
    command: Command,
    config: &Config,
    facade: &BacklightFacade<dyn BacklightService>,
) -> Result<()> {
    match command {
        Command::List => {
            for keyboard in facade.enumerate_keyboards().await {
                let kind = if facade.is_built_in(keyboard).await {
                    "built-in"
                } else {
                    "external"
                };
                println!("{}\t{}", keyboard, kind);
            }
        }
        Command::Get { keyboard } => {
            let keyboard = known_keyboard(facade, keyboard).await?;
            println!("{}", facade.brightness(keyboard).await);
        }
        Command::Set { keyboard, level } => {
            let keyboard = known_keyboard(facade, keyboard).await?;
            if !facade.set_brightness(keyboard, level).await {
                bail!("Keyboard {} refused brightness {}", keyboard, level);
            }
        }
        Command::Auto { keyboard, switch } => {
            let keyboard = known_keyboard(facade, keyboard).await?;
            match switch {
                Some(switch) => {
                    if !facade.set_auto_brightness(keyboard, switch.into()).await {
                        bail!("Keyboard {} refused to switch auto-brightness", keyboard);
                    }
                }
                None => println!("{}", on_off(facade.is_auto_brightness_enabled(keyboard).await)),
            }
        }
        Command::IdleTimeout { keyboard, seconds } => {
            let keyboard = known_keyboard(facade, keyboard).await?;
            match seconds {
                Some(seconds) => {
                    if !facade.set_idle_dim_timeout(keyboard, seconds).await {
                        bail!("Keyboard {} refused idle timeout {}", keyboard, seconds);
                    }
                }
                None => println!("{}", facade.idle_dim_timeout(keyboard).await),
            }
        }
        Command::Info { keyboard } => {
            let keyboard = known_keyboard(facade, keyboard).await?;
            let state = facade.state(keyboard).await;
            println!("keyboard:          {}", keyboard);
            println!("built-in:          {}", facade.is_built_in(keyboard).await);
            println!("brightness:        {}", facade.brightness(keyboard).await);
            println!(
                "auto-brightness:   {}",
                on_off(facade.is_auto_brightness_enabled(keyboard).await)
            );
            println!(
                "ambient sensor:    {}",
                facade.is_ambient_feature_available(keyboard).await
            );
            println!("idle dim timeout:  {}", facade.idle_dim_timeout(keyboard).await);
            println!("dimmed:            {}", state.dimmed);
            println!("saturated:         {}", state.saturated);
            println!("suppressed:        {}", state.suppressed);
        }
        Command::Watch {
            keyboard,
            properties,
        } => {
            let keyboard = known_keyboard(facade, keyboard).await?;
            let subscription = facade.register_change_notification(
                properties,
                keyboard,
                |change: &BacklightChange| {
                    println!("{}\t{}", change.keyboard, change.property);
                },
            );
            tokio::signal::ctrl_c().await?;
            subscription.cancel();
        }
        Command::Daemon => run_daemon(config, facade).await?,
    }
    Ok(())
}

async fn run_daemon(
    config: &Config,
    facade: &BacklightFacade<dyn BacklightService>,
) -> Result<()> {
    let server = BacklightServer::new(
        Some(&config.dbus.name),
        Some(&config.dbus.path),
        facade.service().clone(),
    );
    let handle = server.spawn().await?;
    log::info!("Serving keyboard backlights as {}", config.dbus.name);
    tokio::signal::ctrl_c().await?;
    log::info!("Shutting down");
    handle.await_shutdown().await;
    Ok(())
}

async fn known_keyboard(
    facade: &BacklightFacade<dyn BacklightService>,
    keyboard: u64,
) -> Result<KeyboardId> {
    let keyboard = KeyboardId(keyboard);
    if !facade.enumerate_keyboards().await.contains(&keyboard) {
        bail!("No backlit keyboard with id {}", keyboard);
    }
    Ok(keyboard)
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}
