//! Side channel between the broker and matched proxies.
//!
//! `ProxyChannel` is the single seam for getting an offer to a proxy and an
//! answer back, and for telling a proxy to move a client elsewhere.
//! `HttpProxyChannel` pushes directly to the proxy's own endpoint.
//! `MailboxChannel` parks the offer for the proxy's next poll and waits for
//! the proxy to post its answer to `/answer`.

use crate::config::{BrokerError, Result};
use crate::core::proxy::Proxy;
use crate::core::rendezvous::lock;
use crate::web::messages::ClientPollResponse;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Offer handed to a matched proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClientOffer {
    pub nat_type: String,
    pub sdp: String,
    pub fingerprint: String,
    pub cid: String,
}

/// Instruction telling a proxy to move one of its clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TransferRequest {
    pub cid: String,
    pub new_ip: String,
    pub transfer_now: bool,
}

#[async_trait]
pub trait ProxyChannel: Send + Sync {
    /// Delivers `offer` to `proxy` and waits for its answer.
    async fn deliver_offer(&self, proxy: &Proxy, offer: ClientOffer) -> Result<String>;

    /// Tells the proxy at `proxy` to hand a client over.
    async fn send_transfer(&self, proxy: IpAddr, request: &TransferRequest) -> Result<()>;
}

#[derive(Debug, Default)]
struct AnswerSlot {
    waiting: Option<oneshot::Sender<String>>,
    closed: bool,
}

/// Per-proxy offer and answer slots for the poll-and-answer path.
///
/// A mailbox serves one poll. Once closed it refuses new offers, and the
/// answer slot lock orders `post_offer` against `close` so an offer is
/// either handed back by `close` or rejected.
#[derive(Debug)]
pub struct Mailbox {
    offer_tx: mpsc::Sender<ClientOffer>,
    offer_rx: tokio::sync::Mutex<mpsc::Receiver<ClientOffer>>,
    answer: Mutex<AnswerSlot>,
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Mailbox {
    #[must_use]
    pub fn new() -> Self {
        let (offer_tx, offer_rx) = mpsc::channel(1);
        Self {
            offer_tx,
            offer_rx: tokio::sync::Mutex::new(offer_rx),
            answer: Mutex::new(AnswerSlot::default()),
        }
    }

    /// Parks an offer for the proxy and returns where its answer will land.
    ///
    /// # Errors
    ///
    /// Returns `Signaling` if the proxy is no longer polling or another
    /// offer is still waiting on it.
    pub fn post_offer(&self, offer: ClientOffer) -> Result<oneshot::Receiver<String>> {
        let mut slot = lock(&self.answer);
        if slot.closed {
            return Err(BrokerError::Signaling(
                "proxy is no longer polling".to_string(),
            ));
        }
        if slot.waiting.as_ref().is_some_and(|pending| !pending.is_closed()) {
            return Err(BrokerError::Signaling(
                "proxy already has an offer in flight".to_string(),
            ));
        }
        self.offer_tx
            .try_send(offer)
            .map_err(|_| BrokerError::Signaling("proxy mailbox is full".to_string()))?;
        let (tx, rx) = oneshot::channel();
        slot.waiting = Some(tx);
        Ok(rx)
    }

    /// Waits up to `wait` for an offer to arrive.
    pub async fn next_offer(&self, wait: Duration) -> Option<ClientOffer> {
        let mut rx = self.offer_rx.lock().await;
        tokio::time::timeout(wait, rx.recv()).await.ok().flatten()
    }

    /// Stops accepting offers. Returns an offer that was posted but not yet
    /// picked up by a poll.
    pub fn close(&self) -> Option<ClientOffer> {
        let mut slot = lock(&self.answer);
        slot.closed = true;
        let leftover = self
            .offer_rx
            .try_lock()
            .ok()
            .and_then(|mut rx| rx.try_recv().ok());
        drop(slot);
        leftover
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        lock(&self.answer).closed
    }

    /// Hands the proxy's answer to whoever is waiting for it.
    pub fn deliver_answer(&self, answer: String) -> bool {
        let Some(tx) = lock(&self.answer).waiting.take() else {
            return false;
        };
        tx.send(answer).is_ok()
    }

    #[must_use]
    pub fn awaiting_answer(&self) -> bool {
        lock(&self.answer)
            .waiting
            .as_ref()
            .is_some_and(|pending| !pending.is_closed())
    }
}

/// Pushes offers and transfers to the proxy's own HTTP endpoint.
#[derive(Clone)]
pub struct HttpProxyChannel {
    client: Client,
    port: u16,
}

impl HttpProxyChannel {
    #[must_use]
    pub fn new(port: u16, request_timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(request_timeout)
                .no_proxy()
                .build()
                .unwrap_or_default(),
            port,
        }
    }

    fn endpoint(&self, addr: IpAddr, path: &str) -> String {
        format!("http://{}/{path}", SocketAddr::new(addr, self.port))
    }
}

#[async_trait]
impl ProxyChannel for HttpProxyChannel {
    async fn deliver_offer(&self, proxy: &Proxy, offer: ClientOffer) -> Result<String> {
        let url = self.endpoint(proxy.addr, "add");
        debug!(url = %url, session_id = %proxy.session_id, "Sending offer to proxy");

        let resp = self
            .client
            .post(&url)
            .json(&offer)
            .send()
            .await
            .map_err(|e| BrokerError::Signaling(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(BrokerError::Signaling(format!(
                "proxy rejected offer with status {status}"
            )));
        }

        let reply: ClientPollResponse = resp
            .json()
            .await
            .map_err(|e| BrokerError::Signaling(format!("undecodable proxy reply: {e}")))?;

        if !reply.error.is_empty() {
            return Err(BrokerError::Signaling(reply.error));
        }
        if reply.answer.is_empty() {
            return Err(BrokerError::Signaling("proxy sent an empty answer".to_string()));
        }
        Ok(reply.answer)
    }

    async fn send_transfer(&self, proxy: IpAddr, request: &TransferRequest) -> Result<()> {
        let url = self.endpoint(proxy, "transfer");
        let resp = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| BrokerError::Signaling(e.to_string()))?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(BrokerError::Signaling(format!(
                "transfer rejected with status {}",
                resp.status()
            )))
        }
    }
}

/// Poll-and-answer delivery. Transfers still go over HTTP.
#[derive(Clone)]
pub struct MailboxChannel {
    transfers: HttpProxyChannel,
}

impl MailboxChannel {
    #[must_use]
    pub const fn new(transfers: HttpProxyChannel) -> Self {
        Self { transfers }
    }
}

#[async_trait]
impl ProxyChannel for MailboxChannel {
    async fn deliver_offer(&self, proxy: &Proxy, offer: ClientOffer) -> Result<String> {
        let answer = proxy.mailbox().post_offer(offer)?;
        answer
            .await
            .map_err(|_| BrokerError::Signaling("proxy dropped the offer".to_string()))
    }

    async fn send_transfer(&self, proxy: IpAddr, request: &TransferRequest) -> Result<()> {
        self.transfers.send_transfer(proxy, request).await
    }
}
