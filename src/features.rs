//! Optional collaborators around the core: relay lookup and counters.

pub mod bridges;
pub mod metrics;
