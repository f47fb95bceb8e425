//! Broker counters.
//!
//! In-process tallies of polls, matches, denials and rescales, rendered as
//! plain text on `/debug`.

use crate::core::proxy::NatType;
use papaya::HashMap;
use serde::Serialize;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct BrokerMetrics {
    proxy_polls: HashMap<String, AtomicU64>,
    polls_with_relay_pattern: AtomicU64,
    polls_without_relay_pattern: AtomicU64,
    client_matched: AtomicU64,
    client_denied_restricted: AtomicU64,
    client_denied_unrestricted: AtomicU64,
    client_timeouts: AtomicU64,
    client_failures: AtomicU64,
    rescales_completed: AtomicU64,
    rescales_partial: AtomicU64,
    transfers_sent: AtomicU64,
    transfers_failed: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub proxy_polls: Vec<(String, u64)>,
    pub polls_with_relay_pattern: u64,
    pub polls_without_relay_pattern: u64,
    pub client_matched: u64,
    pub client_denied_restricted: u64,
    pub client_denied_unrestricted: u64,
    pub client_timeouts: u64,
    pub client_failures: u64,
    pub rescales_completed: u64,
    pub rescales_partial: u64,
    pub transfers_sent: u64,
    pub transfers_failed: u64,
}

impl BrokerMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_proxy_poll(&self, proxy_type: &str, nat: NatType, relay_pattern_supported: bool) {
        let key = format!("{proxy_type}/{nat}");
        self.proxy_polls
            .pin()
            .get_or_insert_with(key, || AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);

        if relay_pattern_supported {
            self.polls_with_relay_pattern.fetch_add(1, Ordering::Relaxed);
        } else {
            self.polls_without_relay_pattern
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_client_matched(&self) {
        self.client_matched.fetch_add(1, Ordering::Relaxed);
    }

    /// Denials are bucketed as unrestricted vs everything else.
    pub fn record_client_denied(&self, nat: NatType) {
        if nat == NatType::Unrestricted {
            self.client_denied_unrestricted
                .fetch_add(1, Ordering::Relaxed);
        } else {
            self.client_denied_restricted.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_client_timeout(&self) {
        self.client_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_client_failure(&self) {
        self.client_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rescale(&self, complete: bool) {
        if complete {
            self.rescales_completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.rescales_partial.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_transfer(&self, delivered: bool) {
        if delivered {
            self.transfers_sent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.transfers_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut proxy_polls: Vec<(String, u64)> = self
            .proxy_polls
            .pin()
            .iter()
            .map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed)))
            .collect();
        proxy_polls.sort();

        MetricsSnapshot {
            proxy_polls,
            polls_with_relay_pattern: self.polls_with_relay_pattern.load(Ordering::Relaxed),
            polls_without_relay_pattern: self.polls_without_relay_pattern.load(Ordering::Relaxed),
            client_matched: self.client_matched.load(Ordering::Relaxed),
            client_denied_restricted: self.client_denied_restricted.load(Ordering::Relaxed),
            client_denied_unrestricted: self.client_denied_unrestricted.load(Ordering::Relaxed),
            client_timeouts: self.client_timeouts.load(Ordering::Relaxed),
            client_failures: self.client_failures.load(Ordering::Relaxed),
            rescales_completed: self.rescales_completed.load(Ordering::Relaxed),
            rescales_partial: self.rescales_partial.load(Ordering::Relaxed),
            transfers_sent: self.transfers_sent.load(Ordering::Relaxed),
            transfers_failed: self.transfers_failed.load(Ordering::Relaxed),
        }
    }
}

impl MetricsSnapshot {
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::from("proxy polls:\n");
        for (key, count) in &self.proxy_polls {
            let _ = writeln!(out, "\t{key}: {count}");
        }
        let _ = writeln!(
            out,
            "polls with relay pattern: {}\npolls without relay pattern: {}",
            self.polls_with_relay_pattern, self.polls_without_relay_pattern
        );
        let _ = writeln!(
            out,
            "client matches: {}\nclient denied (restricted): {}\nclient denied (unrestricted): {}",
            self.client_matched, self.client_denied_restricted, self.client_denied_unrestricted
        );
        let _ = writeln!(
            out,
            "client timeouts: {}\nclient failures: {}",
            self.client_timeouts, self.client_failures
        );
        let _ = write!(
            out,
            "rescales completed: {}\nrescales partial: {}\ntransfers sent: {}\ntransfers failed: {}",
            self.rescales_completed, self.rescales_partial, self.transfers_sent, self.transfers_failed
        );
        out
    }
}
