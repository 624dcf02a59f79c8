//! Detection of user idleness
pub mod interface;
pub mod mock;
pub mod x11;

pub use interface::*;

#[cfg(test)]
mod test;
