//! Control surfaces exposing the backlight to other processes

pub mod dbus_server;

#[cfg(test)]
mod test;
