//! Core broker components.
//!
//! Contains the proxy pools, matching, directory and session bookkeeping,
//! plus the rendezvous and rescale coordinators built on top of them.

pub mod directory;
pub mod matching;
pub mod pool;
pub mod proxy;
pub mod registry;
pub mod rendezvous;
pub mod rescale;
pub mod signaling;
