//! Test utilities and shared configuration.
//!
//! This module provides common helpers for unit and integration tests,
//! reducing duplication across the codebase.

#[cfg(any(test, feature = "testing"))]
use crate::config::{BrokerError, Config, Result, SignalingMode};
#[cfg(any(test, feature = "testing"))]
use crate::core::proxy::Proxy;
#[cfg(any(test, feature = "testing"))]
use crate::core::rendezvous::Broker;
#[cfg(any(test, feature = "testing"))]
use crate::core::signaling::{
    ClientOffer, HttpProxyChannel, MailboxChannel, ProxyChannel, TransferRequest,
};
#[cfg(any(test, feature = "testing"))]
use crate::features::bridges::BridgeList;
#[cfg(any(test, feature = "testing"))]
use crate::features::metrics::BrokerMetrics;
#[cfg(any(test, feature = "testing"))]
use async_trait::async_trait;
#[cfg(any(test, feature = "testing"))]
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
#[cfg(any(test, feature = "testing"))]
use std::sync::{Arc, Mutex};
#[cfg(any(test, feature = "testing"))]
use std::time::Duration;
#[cfg(any(test, feature = "testing"))]
use tokio::sync::Notify;

/// Creates a standard configuration for testing purposes.
///
/// This configuration has:
/// - An ephemeral loopback listen address
/// - Push signaling
/// - Short timeouts
/// - No rescale token
#[cfg(any(test, feature = "testing"))]
#[must_use]
pub fn create_test_config() -> Arc<Config> {
    Arc::new(Config {
        listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
        concurrency_limit: 64,
        max_body_size: 100_000,
        client_timeout: Duration::from_secs(2),
        proxy_timeout: Duration::from_secs(2),
        transfer_timeout: Duration::from_secs(1),
        proxy_http_port: 51821,
        signaling_mode: SignalingMode::Push,
        bridge_list_path: None,
        rescale_token: None,
        debug_verbose: false,
        log_format: "pretty".to_string(),
    })
}

/// A minimal offer SDP carrying one host candidate.
#[cfg(any(test, feature = "testing"))]
#[must_use]
pub fn sample_offer() -> String {
    "v=0\r\no=- 0 0 IN IP4 0.0.0.0\r\ns=-\r\nt=0 0\r\n\
     a=candidate:1 1 udp 2122260223 10.0.0.9 50000 typ host\r\n"
        .to_string()
}

#[cfg(any(test, feature = "testing"))]
#[derive(Debug, Clone)]
enum OfferBehavior {
    Answer(String),
    Fail,
    Hang,
    Gated(Option<String>),
}

/// In-memory `ProxyChannel` that answers, fails or hangs on demand and
/// records everything sent through it.
#[cfg(any(test, feature = "testing"))]
#[derive(Debug)]
pub struct ScriptedChannel {
    behavior: OfferBehavior,
    gate: Notify,
    fail_transfers: Mutex<bool>,
    transfer_delay: Mutex<Option<Duration>>,
    offers: Mutex<Vec<(IpAddr, ClientOffer)>>,
    transfers: Mutex<Vec<(IpAddr, TransferRequest)>>,
}

#[cfg(any(test, feature = "testing"))]
impl ScriptedChannel {
    fn with_behavior(behavior: OfferBehavior) -> Self {
        Self {
            behavior,
            gate: Notify::new(),
            fail_transfers: Mutex::new(false),
            transfer_delay: Mutex::new(None),
            offers: Mutex::new(Vec::new()),
            transfers: Mutex::new(Vec::new()),
        }
    }

    /// Every offer is answered with `answer`.
    #[must_use]
    pub fn answering(answer: &str) -> Self {
        Self::with_behavior(OfferBehavior::Answer(answer.to_string()))
    }

    /// Every offer fails with a signaling error.
    #[must_use]
    pub fn failing() -> Self {
        Self::with_behavior(OfferBehavior::Fail)
    }

    /// Offers are never answered.
    #[must_use]
    pub fn hanging() -> Self {
        Self::with_behavior(OfferBehavior::Hang)
    }

    /// Offers are held until `open_gate`, then answered with `answer`.
    #[must_use]
    pub fn gated(answer: &str) -> Self {
        Self::with_behavior(OfferBehavior::Gated(Some(answer.to_string())))
    }

    /// Offers are held until `open_gate`, then fail.
    #[must_use]
    pub fn gated_failing() -> Self {
        Self::with_behavior(OfferBehavior::Gated(None))
    }

    /// Lets one held offer through.
    pub fn open_gate(&self) {
        self.gate.notify_one();
    }

    /// Makes every subsequent transfer fail.
    ///
    /// # Panics
    ///
    /// Panics if the lock is poisoned.
    pub fn fail_transfers(&self) {
        *self.fail_transfers.lock().unwrap() = true;
    }

    /// Makes every subsequent transfer sleep before succeeding.
    ///
    /// # Panics
    ///
    /// Panics if the lock is poisoned.
    pub fn delay_transfers(&self, delay: Duration) {
        *self.transfer_delay.lock().unwrap() = Some(delay);
    }

    /// # Panics
    ///
    /// Panics if the lock is poisoned.
    #[must_use]
    pub fn offers(&self) -> Vec<(IpAddr, ClientOffer)> {
        self.offers.lock().unwrap().clone()
    }

    /// Transfers that were delivered.
    ///
    /// # Panics
    ///
    /// Panics if the lock is poisoned.
    #[must_use]
    pub fn transfers(&self) -> Vec<(IpAddr, TransferRequest)> {
        self.transfers.lock().unwrap().clone()
    }
}

#[cfg(any(test, feature = "testing"))]
#[async_trait]
impl ProxyChannel for ScriptedChannel {
    async fn deliver_offer(&self, proxy: &Proxy, offer: ClientOffer) -> Result<String> {
        self.offers.lock().unwrap().push((proxy.addr, offer));
        match &self.behavior {
            OfferBehavior::Answer(answer) => Ok(answer.clone()),
            OfferBehavior::Fail => Err(BrokerError::Signaling("scripted failure".to_string())),
            OfferBehavior::Hang => std::future::pending().await,
            OfferBehavior::Gated(answer) => {
                self.gate.notified().await;
                answer
                    .clone()
                    .ok_or_else(|| BrokerError::Signaling("scripted failure".to_string()))
            }
        }
    }

    async fn send_transfer(&self, proxy: IpAddr, request: &TransferRequest) -> Result<()> {
        let delay = *self.transfer_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if *self.fail_transfers.lock().unwrap() {
            return Err(BrokerError::Signaling("scripted transfer failure".to_string()));
        }
        self.transfers.lock().unwrap().push((proxy, request.clone()));
        Ok(())
    }
}

/// Builds a broker on the test config and the built-in bridge list.
#[cfg(any(test, feature = "testing"))]
#[must_use]
pub fn create_test_broker(channel: ScriptedChannel) -> (Broker, Arc<ScriptedChannel>) {
    let channel = Arc::new(channel);
    let broker = Broker::new(
        create_test_config(),
        channel.clone(),
        Arc::new(BridgeList::builtin()),
        Arc::new(BrokerMetrics::new()),
    );
    (broker, channel)
}

/// Builds a poll-and-answer broker with a short poll window.
#[cfg(any(test, feature = "testing"))]
#[must_use]
pub fn create_mailbox_broker() -> Broker {
    let mut config = (*create_test_config()).clone();
    config.signaling_mode = SignalingMode::Mailbox;
    config.proxy_timeout = Duration::from_millis(200);
    let push = HttpProxyChannel::new(config.proxy_http_port, config.transfer_timeout);
    Broker::new(
        Arc::new(config),
        Arc::new(MailboxChannel::new(push)),
        Arc::new(BridgeList::builtin()),
        Arc::new(BrokerMetrics::new()),
    )
}
