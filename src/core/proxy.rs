//! Proxy records and NAT classification.
//!
//! A `Proxy` is created for every poll and shared (via `Arc`) between the
//! pools and the directory. Its load counter lives in the pool that holds it.

use crate::core::signaling::Mailbox;
use std::fmt;
use std::net::IpAddr;

/// NAT classification declared by a proxy or a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NatType {
    /// Can accept inbound connections.
    Unrestricted,
    /// Cannot accept inbound connections without help.
    Restricted,
    /// Not yet determined.
    #[default]
    Unknown,
}

impl NatType {
    /// Parses a NAT tag. Anything unrecognised is `Unknown`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "unrestricted" => Self::Unrestricted,
            "restricted" => Self::Restricted,
            _ => Self::Unknown,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unrestricted => "unrestricted",
            Self::Restricted => "restricted",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for NatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An available relay, as announced by its most recent poll.
#[derive(Debug)]
pub struct Proxy {
    /// Session id chosen by the proxy for this poll.
    pub session_id: String,
    /// Declared implementation tag ("standalone", "webext", ...).
    pub proxy_type: String,
    /// Declared NAT classification.
    pub nat: NatType,
    /// Host the poll came from. One live record per host.
    pub addr: IpAddr,
    /// Client count the proxy reported when it polled.
    pub declared_clients: u32,
    mailbox: Mailbox,
}

impl Proxy {
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        proxy_type: impl Into<String>,
        nat: NatType,
        addr: IpAddr,
        declared_clients: u32,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            proxy_type: proxy_type.into(),
            nat,
            addr,
            declared_clients,
            mailbox: Mailbox::new(),
        }
    }

    /// Offer/answer slots used by the poll-and-answer signaling path.
    #[must_use]
    pub const fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }
}
