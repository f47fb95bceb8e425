//! Rendezvous coordination.
//!
//! Handles the three participant roles: proxies announcing themselves,
//! clients asking for a match, and proxies answering (or reporting session
//! changes). Pools and directory share one lock so the pop/increment/reinsert
//! sequence is atomic. The registry has its own lock, always taken after the
//! pool lock when both are needed. No lock is held across a network call.

use crate::config::{BrokerError, Config, Result};
use crate::core::directory::ProxyDirectory;
use crate::core::matching::ProxyPools;
use crate::core::proxy::{NatType, Proxy};
use crate::core::registry::{SessionAction, SessionRegistry};
use crate::core::signaling::{ClientOffer, ProxyChannel};
use crate::features::bridges::BridgeLookup;
use crate::features::metrics::BrokerMetrics;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// State guarded by the pool lock.
#[derive(Debug, Default)]
pub struct BrokerState {
    pub pools: ProxyPools,
    pub directory: ProxyDirectory,
}

/// A decoded proxy poll.
#[derive(Debug, Clone)]
pub struct ProxyPoll {
    pub session_id: String,
    pub proxy_type: String,
    pub nat: NatType,
    pub addr: IpAddr,
    pub clients: u32,
    pub relay_pattern_supported: bool,
}

/// A decoded client offer.
#[derive(Debug, Clone)]
pub struct ClientRequest {
    pub client_id: String,
    pub nat: NatType,
    pub fingerprint: String,
    pub offer: String,
}

/// Available proxies by type and by NAT class.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolSummary {
    pub available: usize,
    pub by_type: BTreeMap<String, usize>,
    pub restricted: usize,
    pub unrestricted: usize,
    pub unknown: usize,
    pub pooled: usize,
    pub sessions: usize,
}

impl PoolSummary {
    #[must_use]
    pub fn render(&self) -> String {
        let mut s = format!("current snowflakes available: {}\n", self.available);
        for (proxy_type, count) in &self.by_type {
            let _ = writeln!(s, "\t{proxy_type} proxies: {count}");
        }
        let _ = write!(
            s,
            "\nNAT Types available:\n\trestricted: {}\n\tunrestricted: {}\n\tunknown: {}",
            self.restricted, self.unrestricted, self.unknown
        );
        let _ = write!(
            s,
            "\n\npooled proxies: {}\nlive client sessions: {}",
            self.pooled, self.sessions
        );
        s
    }
}

/// Rejects offers/answers without any ICE candidate line.
///
/// # Errors
///
/// Returns `BadRequest` when no `a=candidate` field is present.
pub fn validate_sdp(sdp: &str) -> Result<()> {
    if sdp.contains("a=candidate") {
        Ok(())
    } else {
        Err(BrokerError::BadRequest("SDP contains no candidate".to_string()))
    }
}

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The broker's matching and session-bookkeeping engine.
pub struct Broker {
    pub(crate) config: Arc<Config>,
    pub(crate) state: Mutex<BrokerState>,
    pub(crate) registry: Mutex<SessionRegistry>,
    pub(crate) channel: Arc<dyn ProxyChannel>,
    pub(crate) bridges: Arc<dyn BridgeLookup>,
    pub(crate) metrics: Arc<BrokerMetrics>,
}

impl Broker {
    #[must_use]
    pub fn new(
        config: Arc<Config>,
        channel: Arc<dyn ProxyChannel>,
        bridges: Arc<dyn BridgeLookup>,
        metrics: Arc<BrokerMetrics>,
    ) -> Self {
        Self {
            config,
            state: Mutex::new(BrokerState::default()),
            registry: Mutex::new(SessionRegistry::new()),
            channel,
            bridges,
            metrics,
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn metrics(&self) -> &BrokerMetrics {
        &self.metrics
    }

    /// Relay URL handed to polling proxies.
    #[must_use]
    pub fn relay_url(&self) -> String {
        self.bridges.default_bridge().websocket_address
    }

    /// Registers a polling proxy, replacing any earlier record for its host.
    pub fn register_proxy(&self, poll: ProxyPoll) -> Arc<Proxy> {
        self.metrics
            .record_proxy_poll(&poll.proxy_type, poll.nat, poll.relay_pattern_supported);

        let proxy = Arc::new(Proxy::new(
            poll.session_id,
            poll.proxy_type,
            poll.nat,
            poll.addr,
            poll.clients,
        ));

        let mut state = lock(&self.state);
        let superseded = state.directory.insert(Arc::clone(&proxy));
        state.pools.insert(Arc::clone(&proxy), poll.clients);
        drop(state);

        if let Some(old) = superseded {
            debug!(old_session = %old.session_id, addr = %proxy.addr, "Proxy poll superseded earlier record");
        }
        info!(
            session_id = %proxy.session_id,
            nat = %proxy.nat,
            proxy_type = %proxy.proxy_type,
            "Proxy registered"
        );
        proxy
    }

    /// Waits for an offer parked for `proxy`, bounded by the proxy timeout.
    ///
    /// The poll is single-use: when it returns, the mailbox is closed and
    /// the record leaves the pools. Without an offer it leaves the
    /// directory too; with one it stays there until the answer comes back.
    pub async fn await_offer(&self, proxy: &Arc<Proxy>) -> Option<ClientOffer> {
        let polled = proxy.mailbox().next_offer(self.config.proxy_timeout).await;
        let leftover = proxy.mailbox().close();
        let offer = polled.or(leftover);

        let mut state = lock(&self.state);
        if Self::is_current(&state, proxy) {
            state.pools.remove(proxy.addr);
            if offer.is_none() {
                state.directory.remove_addr(proxy.addr);
            }
        }
        drop(state);

        if offer.is_none() {
            debug!(session_id = %proxy.session_id, "Proxy poll ended without an offer");
        }
        offer
    }

    fn is_current(state: &BrokerState, proxy: &Arc<Proxy>) -> bool {
        state
            .directory
            .by_addr(proxy.addr)
            .is_some_and(|current| Arc::ptr_eq(&current, proxy))
    }

    /// Gives back the load unit a failed handshake borrowed, unless the
    /// record has since been retired or replaced. A record whose mailbox
    /// poll already ended is forgotten instead.
    fn release_borrowed(&self, proxy: &Arc<Proxy>) {
        let mut state = lock(&self.state);
        if !Self::is_current(&state, proxy) {
            return;
        }
        if proxy.mailbox().is_closed() {
            state.directory.remove_addr(proxy.addr);
        } else {
            state.pools.release(proxy.addr);
        }
    }

    /// Borrows the best proxy for a client's NAT class.
    pub fn match_proxy(&self, nat: NatType) -> Option<Arc<Proxy>> {
        lock(&self.state).pools.match_proxy(nat)
    }

    /// Matches a client with a proxy and relays the offer/answer exchange.
    ///
    /// # Errors
    ///
    /// `BadRequest` for a malformed offer or fingerprint, `UnknownBridge` for
    /// an unlisted relay, `NoCapacity` when no eligible proxy exists,
    /// `Timeout` when the proxy does not answer in time, and `Signaling` when
    /// the proxy side fails.
    pub async fn match_client(&self, request: ClientRequest) -> Result<String> {
        validate_sdp(&request.offer)?;
        let bridge = self.bridges.resolve(&request.fingerprint)?;

        let Some(proxy) = self.match_proxy(request.nat) else {
            self.metrics.record_client_denied(request.nat);
            info!(nat = %request.nat, "Client denied: no proxies available");
            return Err(BrokerError::NoCapacity);
        };
        debug!(client_id = %request.client_id, addr = %proxy.addr, "Client matched");

        let offer = ClientOffer {
            nat_type: request.nat.to_string(),
            sdp: request.offer,
            fingerprint: bridge.fingerprint.to_string(),
            cid: request.client_id.clone(),
        };

        let delivered =
            tokio::time::timeout(self.config.client_timeout, self.channel.deliver_offer(&proxy, offer))
                .await;

        let answer = match delivered {
            Ok(Ok(answer)) => answer,
            Ok(Err(e)) => {
                self.release_borrowed(&proxy);
                self.metrics.record_client_failure();
                warn!(session_id = %proxy.session_id, error = %e, "Offer forwarding failed");
                return Err(e);
            }
            Err(_) => {
                self.release_borrowed(&proxy);
                self.metrics.record_client_timeout();
                warn!(session_id = %proxy.session_id, "Timed out waiting for proxy answer");
                return Err(BrokerError::Timeout);
            }
        };

        {
            // Sessions are keyed by host, so a newer poll from the same
            // address still carries this one; a retired host does not.
            let mut state = lock(&self.state);
            if state.directory.by_addr(proxy.addr).is_none() {
                drop(state);
                self.metrics.record_client_failure();
                warn!(session_id = %proxy.session_id, "Proxy retired during handshake");
                return Err(BrokerError::Signaling(
                    "proxy retired during handshake".to_string(),
                ));
            }
            state.directory.consume(&proxy);
            let mut registry = lock(&self.registry);
            registry.bind(&request.client_id, request.nat, proxy.addr);
        }
        self.metrics.record_client_matched();
        info!(session_id = %proxy.session_id, nat = %request.nat, "Client session established");

        Ok(answer)
    }

    /// Delivers an answer posted by a proxy. False when the session is
    /// unknown, already consumed, or nobody is waiting for it; a known
    /// session with no pending offer is reported the same as a gone one.
    pub fn submit_answer(&self, session_id: &str, answer: String) -> bool {
        let proxy = lock(&self.state).directory.by_session(session_id);
        let Some(proxy) = proxy else {
            warn!(session_id = %session_id, "Answer for unknown or consumed session");
            return false;
        };
        let delivered = proxy.mailbox().deliver_answer(answer);
        if !delivered {
            debug!(session_id = %session_id, "No match waiting for this answer");
        }
        delivered
    }

    /// Applies a proxy's add/remove notice. A removal also gives back the
    /// load unit the session was holding on that proxy.
    pub fn notify_session_change(&self, client_id: &str, action: SessionAction, addr: IpAddr) -> bool {
        let mut state = lock(&self.state);
        let applied = lock(&self.registry).apply_notice(client_id, action, addr);
        if applied && action == SessionAction::Remove {
            state.pools.release(addr);
        }
        drop(state);

        if applied {
            debug!(client_id = %client_id, action = ?action, addr = %addr, "Session change applied");
        } else {
            debug!(client_id = %client_id, action = ?action, addr = %addr, "Session change ignored");
        }
        applied
    }

    /// Current load of the proxy at `addr`, if pooled.
    #[must_use]
    pub fn proxy_load(&self, addr: IpAddr) -> Option<u32> {
        lock(&self.state).pools.load_of(addr)
    }

    /// Proxy bound to `client_id`, if the session is live.
    #[must_use]
    pub fn session_proxy(&self, client_id: &str) -> Option<IpAddr> {
        lock(&self.registry).get(client_id).map(|s| s.proxy)
    }

    /// Proxy registered under `session_id` and not yet consumed.
    #[must_use]
    pub fn pending_proxy(&self, session_id: &str) -> Option<Arc<Proxy>> {
        lock(&self.state).directory.by_session(session_id)
    }

    /// Every pooled proxy with its NAT class and current load.
    #[must_use]
    pub fn pool_loads(&self) -> Vec<(IpAddr, NatType, u32)> {
        let state = lock(&self.state);
        let mut loads: Vec<_> = state
            .pools
            .unrestricted
            .iter()
            .chain(state.pools.restricted.iter())
            .map(|(proxy, load)| (proxy.addr, proxy.nat, load))
            .collect();
        loads.sort_by_key(|&(addr, _, _)| addr);
        loads
    }

    #[must_use]
    pub fn summary(&self) -> PoolSummary {
        let state = lock(&self.state);
        let mut summary = PoolSummary {
            available: state.directory.pending_len(),
            pooled: state.pools.len(),
            ..PoolSummary::default()
        };
        for proxy in state.directory.pending() {
            *summary.by_type.entry(proxy.proxy_type.clone()).or_default() += 1;
            match proxy.nat {
                NatType::Restricted => summary.restricted += 1,
                NatType::Unrestricted => summary.unrestricted += 1,
                NatType::Unknown => summary.unknown += 1,
            }
        }
        drop(state);
        summary.sessions = lock(&self.registry).len();
        summary
    }
}
