//! Application layer: wiring and the ports adapters implement.

pub mod bootstrap;
pub mod error;
pub mod transport;
