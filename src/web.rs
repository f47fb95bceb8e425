//! HTTP surface.
//!
//! Wire messages, request routing and the connection listener.

pub mod messages;
pub mod routes;
pub mod server;
