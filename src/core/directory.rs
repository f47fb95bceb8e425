//! Proxy lookup by session id and by address.
//!
//! The session index answers "is this poll still waiting for an answer?"
//! and is cleared once the proxy has been handed a client. The address index
//! tracks the live record per host until the host is retired or polls again.

use crate::core::proxy::Proxy;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct ProxyDirectory {
    by_session: HashMap<String, Arc<Proxy>>,
    by_addr: HashMap<IpAddr, Arc<Proxy>>,
}

impl ProxyDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes `proxy` under its session id and address. Returns the record
    /// it superseded at that address, whose session entry is dropped too.
    pub fn insert(&mut self, proxy: Arc<Proxy>) -> Option<Arc<Proxy>> {
        let previous = self.by_addr.insert(proxy.addr, Arc::clone(&proxy));
        if let Some(old) = &previous {
            self.drop_session_of(old);
        }
        self.by_session.insert(proxy.session_id.clone(), proxy);
        previous
    }

    #[must_use]
    pub fn by_session(&self, session_id: &str) -> Option<Arc<Proxy>> {
        self.by_session.get(session_id).cloned()
    }

    #[must_use]
    pub fn by_addr(&self, addr: IpAddr) -> Option<Arc<Proxy>> {
        self.by_addr.get(&addr).cloned()
    }

    /// Marks `proxy`'s session as consumed. A later answer for it is
    /// reported as gone.
    pub fn consume(&mut self, proxy: &Arc<Proxy>) -> bool {
        self.drop_session_of(proxy)
    }

    /// Forgets the host entirely.
    pub fn remove_addr(&mut self, addr: IpAddr) -> Option<Arc<Proxy>> {
        let proxy = self.by_addr.remove(&addr)?;
        self.drop_session_of(&proxy);
        Some(proxy)
    }

    /// Number of proxies still waiting to be handed a client.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.by_session.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_addr.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_addr.is_empty()
    }

    /// Proxies still waiting to be handed a client.
    pub fn pending(&self) -> impl Iterator<Item = &Arc<Proxy>> {
        self.by_session.values()
    }

    // Only removes the session entry if it still points at this record; a
    // newer poll may have reused the id.
    fn drop_session_of(&mut self, proxy: &Arc<Proxy>) -> bool {
        match self.by_session.get(&proxy.session_id) {
            Some(current) if Arc::ptr_eq(current, proxy) => {
                self.by_session.remove(&proxy.session_id);
                true
            }
            _ => false,
        }
    }
}
