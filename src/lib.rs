//! Library definitions.
//!
//! Exports the broker engine, its collaborators, and the HTTP service.

pub mod config;
pub mod core;
pub mod features;
pub mod web;

#[cfg(any(test, feature = "testing"))]
pub mod test_utils;
pub use config::{BrokerError, Config, Result, SignalingMode};
pub use core::proxy::{NatType, Proxy};
pub use core::rendezvous::{Broker, ClientRequest, PoolSummary, ProxyPoll};
pub use core::rescale::{Migration, RescaleReport};
pub use core::signaling::{HttpProxyChannel, MailboxChannel, ProxyChannel};
pub use features::bridges::{BridgeList, BridgeLookup};
pub use features::metrics::BrokerMetrics;
pub use web::routes::BrokerService;
pub use web::server::{run_listener, serve};
