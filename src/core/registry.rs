//! Live client sessions and the proxy -> clients reverse index.
//!
//! Invariant: a client id appears in `by_proxy[p]` exactly when its session
//! is currently bound to `p`.

use crate::core::proxy::NatType;
use std::collections::HashMap;
use std::net::IpAddr;

/// A matched client and the proxy currently carrying it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSession {
    pub client_id: String,
    pub nat: NatType,
    pub proxy: IpAddr,
}

/// Session add/remove notice from a proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    Add,
    Remove,
}

impl SessionAction {
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "add" => Some(Self::Add),
            "remove" | "delete" => Some(Self::Remove),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<String, ClientSession>,
    by_proxy: HashMap<IpAddr, Vec<String>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records (or re-records) a client as bound to `proxy`.
    pub fn bind(&mut self, client_id: &str, nat: NatType, proxy: IpAddr) {
        if let Some(existing) = self.sessions.get(client_id) {
            let old = existing.proxy;
            self.unlink(client_id, old);
        }
        self.sessions.insert(
            client_id.to_string(),
            ClientSession {
                client_id: client_id.to_string(),
                nat,
                proxy,
            },
        );
        self.link(client_id, proxy);
    }

    /// Moves an existing session to `new_proxy`. False if the client is unknown.
    pub fn rebind(&mut self, client_id: &str, new_proxy: IpAddr) -> bool {
        let Some(session) = self.sessions.get_mut(client_id) else {
            return false;
        };
        let old = std::mem::replace(&mut session.proxy, new_proxy);
        self.unlink(client_id, old);
        self.link(client_id, new_proxy);
        true
    }

    /// Applies a proxy's add/remove notice. Returns false when the notice
    /// referred to a client this broker never matched, or was stale.
    pub fn apply_notice(&mut self, client_id: &str, action: SessionAction, proxy: IpAddr) -> bool {
        match action {
            SessionAction::Add => self.rebind(client_id, proxy),
            SessionAction::Remove => {
                let bound_here = self
                    .sessions
                    .get(client_id)
                    .is_some_and(|s| s.proxy == proxy);
                if bound_here {
                    self.sessions.remove(client_id);
                    self.unlink(client_id, proxy);
                }
                bound_here
            }
        }
    }

    #[must_use]
    pub fn get(&self, client_id: &str) -> Option<&ClientSession> {
        self.sessions.get(client_id)
    }

    /// Sessions bound to `proxy`, in the order they were bound.
    #[must_use]
    pub fn clients_of(&self, proxy: IpAddr) -> Vec<ClientSession> {
        self.by_proxy
            .get(&proxy)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.sessions.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drops the reverse-index entry for `proxy`, returning the ids it held.
    pub fn drop_proxy(&mut self, proxy: IpAddr) -> Vec<String> {
        self.by_proxy.remove(&proxy).unwrap_or_default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn link(&mut self, client_id: &str, proxy: IpAddr) {
        let ids = self.by_proxy.entry(proxy).or_default();
        if !ids.iter().any(|id| id == client_id) {
            ids.push(client_id.to_string());
        }
    }

    fn unlink(&mut self, client_id: &str, proxy: IpAddr) {
        if let Some(ids) = self.by_proxy.get_mut(&proxy) {
            ids.retain(|id| id != client_id);
            if ids.is_empty() {
                self.by_proxy.remove(&proxy);
            }
        }
    }
}
