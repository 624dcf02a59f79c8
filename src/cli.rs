use clap::{ArgEnum, Parser, Subcommand};
use keylight::{config::Backend, external::backlight::BacklightProperty};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(name = "keylight", version, about = "Keyboard backlight control")]
pub struct Cli {
    /// Configuration file, $XDG_CONFIG_HOME/keylight/config.toml by default
    #[clap(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Overrides the backend chosen in the configuration
    #[clap(short, long, arg_enum)]
    pub backend: Option<Backend>,

    /// More detailed logging, can be repeated. RUST_LOG takes precedence.
    #[clap(short, long, parse(from_occurrences))]
    pub verbose: usize,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the backlit keyboards
    List,

    /// Print the brightness of a keyboard
    Get { keyboard: u64 },

    /// Set the brightness of a keyboard, between 0.0 and 1.0
    Set { keyboard: u64, level: f64 },

    /// Print or switch automatic brightness
    Auto {
        keyboard: u64,
        #[clap(arg_enum)]
        switch: Option<Switch>,
    },

    /// Print or set the idle dim timeout in seconds, 0 disables dimming
    IdleTimeout { keyboard: u64, seconds: Option<f64> },

    /// Print everything known about a keyboard
    Info { keyboard: u64 },

    /// Print changes of a keyboard until interrupted
    Watch {
        keyboard: u64,
        /// Properties to watch, all of them when none are given
        #[clap(short, long = "property", value_name = "PROPERTY")]
        properties: Vec<BacklightProperty>,
    },

    /// Serve the backlight on the session bus until interrupted
    Daemon,
}

#[derive(ArgEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Switch {
    On,
    Off,
}

impl From<Switch> for bool {
    fn from(switch: Switch) -> bool {
        switch == Switch::On
    }
}
