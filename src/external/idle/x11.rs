use super::IdleTimeSource;
use anyhow::{anyhow, Context, Result};
use std::time::Duration;
use x11rb::{
    connection::{Connection, RequestConnection},
    protocol::{
        screensaver::{self, ConnectionExt as _},
        xproto::Window,
    },
    rust_connection::RustConnection,
};

/// An [IdleTimeSource] asking the X server's MIT-SCREEN-SAVER extension how
/// long ago the last input event happened.
#[derive(Debug)]
pub struct X11IdleTimeSource {
    connection: RustConnection,
    root: Window,
}

impl X11IdleTimeSource {
    pub fn new(display_name: Option<&str>) -> Result<X11IdleTimeSource> {
        let (connection, screen_num) =
            RustConnection::connect(display_name).context("Couldn't connect to the X server")?;
        if connection
            .extension_information(screensaver::X11_EXTENSION_NAME)?
            .is_none()
        {
            return Err(anyhow!("screensaver X11 extension unsupported"));
        }
        let root = connection.setup().roots[screen_num].root;
        Ok(X11IdleTimeSource { connection, root })
    }
}

impl IdleTimeSource for X11IdleTimeSource {
    fn idle_time(&self) -> Result<Duration> {
        let info = self
            .connection
            .screensaver_query_info(self.root)?
            .reply()
            .context("Couldn't query screensaver info")?;
        Ok(Duration::from_millis(info.ms_since_user_input.into()))
    }
}
