//! Request and response bodies for the broker endpoints.
//!
//! JSON shapes follow the snowflake broker protocol. Client polls carry a
//! version line ahead of the JSON document.

use crate::config::{BrokerError, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};

pub const CLIENT_POLL_VERSION: &str = "1.0";
pub const PROXY_POLL_VERSION: &str = "1.3";
pub const ANSWER_VERSION: &str = "1.0";

pub const STR_NO_PROXIES: &str = "no snowflake proxies currently available";
pub const STR_TIMED_OUT: &str = "timed out waiting for answer!";

pub const STATUS_CLIENT_MATCH: &str = "client match";
pub const STATUS_NO_MATCH: &str = "no match";
pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_CLIENT_GONE: &str = "client gone";

fn decode<'a, T: Deserialize<'a>>(body: &'a [u8], what: &str) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| BrokerError::BadRequest(format!("{what}: {e}")))
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| BrokerError::Internal(e.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyPollRequest {
    #[serde(rename = "Sid")]
    pub sid: String,
    #[serde(rename = "Version", default)]
    pub version: String,
    #[serde(rename = "Type", default)]
    pub proxy_type: String,
    #[serde(rename = "NAT", default)]
    pub nat: String,
    #[serde(rename = "Clients", default)]
    pub clients: u32,
    #[serde(rename = "AcceptedRelayPattern", default)]
    pub accepted_relay_pattern: Option<String>,
}

impl ProxyPollRequest {
    /// # Errors
    ///
    /// Returns `BadRequest` for undecodable JSON or a missing session id.
    pub fn decode(body: &[u8]) -> Result<Self> {
        let req: Self = decode(body, "proxy poll")?;
        if req.sid.is_empty() {
            return Err(BrokerError::BadRequest("proxy poll without session id".into()));
        }
        Ok(req)
    }

    #[must_use]
    pub fn proxy_type(&self) -> &str {
        if self.proxy_type.is_empty() {
            "unknown"
        } else {
            &self.proxy_type
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyPollResponse {
    #[serde(rename = "Status")]
    pub status: String,
    #[serde(rename = "Offer", default)]
    pub offer: String,
    #[serde(rename = "NAT", default)]
    pub nat: String,
    #[serde(rename = "RelayURL", default)]
    pub relay_url: String,
}

impl ProxyPollResponse {
    #[must_use]
    pub fn no_match(relay_url: &str) -> Self {
        Self {
            status: STATUS_NO_MATCH.to_string(),
            offer: String::new(),
            nat: String::new(),
            relay_url: relay_url.to_string(),
        }
    }

    #[must_use]
    pub fn matched(offer: String, nat: &str, relay_url: &str) -> Self {
        Self {
            status: STATUS_CLIENT_MATCH.to_string(),
            offer,
            nat: nat.to_string(),
            relay_url: relay_url.to_string(),
        }
    }

    /// # Errors
    ///
    /// Returns `Internal` if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>> {
        encode(self)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientPollRequest {
    #[serde(default)]
    pub offer: String,
    #[serde(default)]
    pub nat: String,
    #[serde(default)]
    pub fingerprint: String,
    #[serde(default)]
    pub cid: String,
}

impl ClientPollRequest {
    /// Decodes `"<version>\n<json>"`.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` for a missing or unsupported version line, or bad JSON.
    pub fn decode(body: &[u8]) -> Result<Self> {
        let split = body
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| BrokerError::BadRequest("client poll without version line".into()))?;
        let version = std::str::from_utf8(&body[..split])
            .map_err(|_| BrokerError::BadRequest("client poll version is not utf-8".into()))?;
        if version.trim() != CLIENT_POLL_VERSION {
            return Err(BrokerError::BadRequest(format!(
                "unsupported client poll version {}",
                version.trim()
            )));
        }
        decode(&body[split + 1..], "client poll")
    }

    /// # Errors
    ///
    /// Returns `Internal` if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = format!("{CLIENT_POLL_VERSION}\n").into_bytes();
        out.extend(encode(self)?);
        Ok(out)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientPollResponse {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub answer: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl ClientPollResponse {
    #[must_use]
    pub fn answer(answer: String) -> Self {
        Self {
            answer,
            error: String::new(),
        }
    }

    #[must_use]
    pub fn error(error: impl Into<String>) -> Self {
        Self {
            answer: String::new(),
            error: error.into(),
        }
    }

    /// # Errors
    ///
    /// Returns `Internal` if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>> {
        encode(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerRequest {
    #[serde(rename = "Version", default)]
    pub version: String,
    #[serde(rename = "Sid")]
    pub sid: String,
    #[serde(rename = "Answer")]
    pub answer: String,
}

impl AnswerRequest {
    /// # Errors
    ///
    /// Returns `BadRequest` for bad JSON or an empty answer.
    pub fn decode(body: &[u8]) -> Result<Self> {
        let req: Self = decode(body, "answer")?;
        if req.answer.is_empty() {
            return Err(BrokerError::BadRequest("empty answer".into()));
        }
        Ok(req)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerResponse {
    #[serde(rename = "Status")]
    pub status: String,
}

impl AnswerResponse {
    #[must_use]
    pub fn new(success: bool) -> Self {
        Self {
            status: if success { STATUS_SUCCESS } else { STATUS_CLIENT_GONE }.to_string(),
        }
    }

    #[must_use]
    pub fn success(&self) -> bool {
        self.status == STATUS_SUCCESS
    }

    /// # Errors
    ///
    /// Returns `Internal` if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>> {
        encode(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientChange {
    #[serde(rename = "Cid")]
    pub cid: String,
    #[serde(rename = "Action")]
    pub action: String,
}

impl ClientChange {
    /// # Errors
    ///
    /// Returns `BadRequest` for bad JSON.
    pub fn decode(body: &[u8]) -> Result<Self> {
        decode(body, "client change")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RescaleRequest {
    #[serde(rename = "oldIPs", default)]
    pub old_ips: Vec<String>,
    #[serde(rename = "newIPs", default)]
    pub new_ips: Vec<String>,
}

impl RescaleRequest {
    /// # Errors
    ///
    /// Returns `BadRequest` for bad JSON or an unparseable address.
    pub fn decode(body: &[u8]) -> Result<(Vec<IpAddr>, Vec<IpAddr>)> {
        let req: Self = decode(body, "rescale")?;
        Ok((parse_addrs(&req.old_ips)?, parse_addrs(&req.new_ips)?))
    }
}

/// Accepts bare IPs or `ip:port`; only the host matters. IPv4-mapped IPv6
/// addresses come back in IPv4 form.
///
/// # Errors
///
/// Returns `BadRequest` if the text is neither.
pub fn parse_addr(raw: &str) -> Result<IpAddr> {
    let raw = raw.trim();
    raw.parse::<IpAddr>()
        .or_else(|_| raw.parse::<SocketAddr>().map(|s| s.ip()))
        .map(|ip| ip.to_canonical())
        .map_err(|_| BrokerError::BadRequest(format!("invalid address: {raw}")))
}

fn parse_addrs(raw: &[String]) -> Result<Vec<IpAddr>> {
    raw.iter().map(|s| parse_addr(s)).collect()
}
