//! Keyboard backlight control for Linux
//!
//! [facade::BacklightFacade] is the entry point. It sits in front of a
//! [external::backlight::BacklightService], which talks to the system
//! (sysfs LEDs through logind, UPower) or keeps mock keyboards in memory.

pub mod config;
pub mod control;
pub mod external;
pub mod facade;
pub mod handle;
