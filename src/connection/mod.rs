//! Backend discovery
//!
//! Probes an ordered list of candidate base addresses and caches the first
//! one that answers its health check.

mod probe;
mod resolver;

pub use probe::{HttpProbe, Probe};
pub use resolver::{ConnectionResolver, ConnectionState};

#[cfg(test)]
pub use probe::MockProbe;
