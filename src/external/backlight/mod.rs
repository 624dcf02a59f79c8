/// Control of keyboard backlights
pub mod idle_dimming;
pub mod interface;
pub mod logind;
pub mod mock;
pub mod upower;

pub use interface::*;

/// Capacity of the change broadcast channels of the services
pub(crate) const CHANGE_CHANNEL_CAPACITY: usize = 16;

#[cfg(test)]
mod test;
