//! Provides abstractions over the APIs of various system components

pub mod backlight;
pub mod dbus;
pub mod dependency_provider;
pub mod idle;
