//! NAT-aware matching.
//!
//! Restricted proxies are scarce, so they are handed to unrestricted clients
//! first. Restricted and unknown clients can only use unrestricted proxies.

use crate::core::pool::ProxyPool;
use crate::core::proxy::{NatType, Proxy};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::debug;

/// The unrestricted and restricted pools.
#[derive(Debug, Default)]
pub struct ProxyPools {
    pub unrestricted: ProxyPool,
    pub restricted: ProxyPool,
}

impl ProxyPools {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pool a proxy with the given declared NAT joins. Proxies that have not
    /// proven themselves unrestricted are treated as restricted.
    pub fn pool_for(&mut self, proxy_nat: NatType) -> &mut ProxyPool {
        match proxy_nat {
            NatType::Unrestricted => &mut self.unrestricted,
            NatType::Restricted | NatType::Unknown => &mut self.restricted,
        }
    }

    /// Inserts `proxy` into its pool, evicting any pooled proxy at the same
    /// address from either pool.
    pub fn insert(&mut self, proxy: Arc<Proxy>, load: u32) -> Option<Arc<Proxy>> {
        let replaced = self.remove(proxy.addr).map(|(old, _)| old);
        self.pool_for(proxy.nat).insert(proxy, load);
        replaced
    }

    /// Borrows the best proxy for a client of the given NAT class.
    pub fn match_proxy(&mut self, client_nat: NatType) -> Option<Arc<Proxy>> {
        debug!(nat = %client_nat, "Matching proxy");
        match client_nat {
            NatType::Unrestricted => self
                .restricted
                .borrow_least_loaded()
                .or_else(|| self.unrestricted.borrow_least_loaded()),
            NatType::Restricted | NatType::Unknown => self.unrestricted.borrow_least_loaded(),
        }
    }

    pub fn remove(&mut self, addr: IpAddr) -> Option<(Arc<Proxy>, u32)> {
        self.unrestricted
            .remove(addr)
            .or_else(|| self.restricted.remove(addr))
    }

    /// Gives back one unit of load on whichever pool holds `addr`.
    pub fn release(&mut self, addr: IpAddr) -> bool {
        self.unrestricted.release(addr) || self.restricted.release(addr)
    }

    #[must_use]
    pub fn load_of(&self, addr: IpAddr) -> Option<u32> {
        self.unrestricted
            .load_of(addr)
            .or_else(|| self.restricted.load_of(addr))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.unrestricted.len() + self.restricted.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.unrestricted.is_empty() && self.restricted.is_empty()
    }
}
