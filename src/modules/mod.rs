//! Modules composed from the transports, the process manager and the bus.

pub mod dns;
pub mod relay;

pub use dns::{DnsCache, DnsResolver, ResolverSettings};
pub use relay::{RelayClient, RelayClientSettings, RelayServer, RelayTarget};
