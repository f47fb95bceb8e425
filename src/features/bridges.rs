//! Relay (bridge) fingerprint lookup.
//!
//! Clients name the relay they want by fingerprint. The broker only hands out
//! matches for relays it knows about.

use crate::config::{BrokerError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::io::BufRead;
use std::path::Path;
use std::str::FromStr;

pub const DEFAULT_BRIDGE_FINGERPRINT: &str = "2B280B23E1107BB62ABFC40DDCC8824814F80A72";
pub const DEFAULT_BRIDGE_URL: &str = "wss://snowflake.torproject.net/";

/// 20-byte relay identity fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BridgeFingerprint([u8; 20]);

impl FromStr for BridgeFingerprint {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| BrokerError::BadRequest(format!("fingerprint is not hex: {e}")))?;
        let bytes: [u8; 20] = bytes.try_into().map_err(|v: Vec<u8>| {
            BrokerError::BadRequest(format!("fingerprint must be 20 bytes, got {}", v.len()))
        })?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for BridgeFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeInfo {
    pub display_name: String,
    pub websocket_address: String,
    pub fingerprint: BridgeFingerprint,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BridgeRecord {
    #[serde(default)]
    display_name: String,
    web_socket_address: String,
    fingerprint: String,
}

/// Resolves client-supplied fingerprints to known relays.
pub trait BridgeLookup: Send + Sync {
    /// # Errors
    ///
    /// Returns `UnknownBridge` if no relay has this fingerprint.
    fn lookup(&self, fingerprint: &BridgeFingerprint) -> Result<BridgeInfo>;

    fn default_bridge(&self) -> BridgeInfo;

    /// Parses and looks up a raw fingerprint; empty means the default relay.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` for a malformed fingerprint and `UnknownBridge`
    /// for one that is well formed but not listed.
    fn resolve(&self, raw: &str) -> Result<BridgeInfo> {
        if raw.trim().is_empty() {
            return Ok(self.default_bridge());
        }
        let fingerprint: BridgeFingerprint = raw.parse()?;
        self.lookup(&fingerprint)
    }
}

#[derive(Debug, Clone)]
pub struct BridgeList {
    bridges: HashMap<BridgeFingerprint, BridgeInfo>,
    default: BridgeInfo,
}

impl BridgeList {
    /// A list holding only the built-in default relay.
    ///
    /// # Panics
    ///
    /// Never in practice: the built-in fingerprint is a valid constant.
    #[must_use]
    pub fn builtin() -> Self {
        let default = BridgeInfo {
            display_name: "default".to_string(),
            websocket_address: DEFAULT_BRIDGE_URL.to_string(),
            fingerprint: DEFAULT_BRIDGE_FINGERPRINT
                .parse()
                .expect("built-in fingerprint is valid"),
        };
        Self::with_default(default)
    }

    fn with_default(default: BridgeInfo) -> Self {
        let mut bridges = HashMap::new();
        bridges.insert(default.fingerprint, default.clone());
        Self { bridges, default }
    }

    /// Reads JSON-lines records. The first record is the default relay.
    ///
    /// # Errors
    ///
    /// Returns `Config` on unreadable input, a malformed record, or an empty list.
    pub fn from_reader(reader: impl BufRead) -> Result<Self> {
        let mut list: Option<Self> = None;
        for (lineno, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| BrokerError::Config(e.to_string()))?;
            if line.trim().is_empty() {
                continue;
            }
            let record: BridgeRecord = serde_json::from_str(&line).map_err(|e| {
                BrokerError::Config(format!("bridge list line {}: {e}", lineno + 1))
            })?;
            let fingerprint = record.fingerprint.parse().map_err(|e: BrokerError| {
                BrokerError::Config(format!("bridge list line {}: {e}", lineno + 1))
            })?;
            let info = BridgeInfo {
                display_name: record.display_name,
                websocket_address: record.web_socket_address,
                fingerprint,
            };
            match list.as_mut() {
                Some(l) => {
                    l.bridges.insert(fingerprint, info);
                }
                None => list = Some(Self::with_default(info)),
            }
        }
        list.ok_or_else(|| BrokerError::Config("bridge list is empty".to_string()))
    }

    /// # Errors
    ///
    /// Returns `Config` if the file cannot be opened or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .map_err(|e| BrokerError::Config(format!("{}: {e}", path.display())))?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bridges.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bridges.is_empty()
    }
}

impl BridgeLookup for BridgeList {
    fn lookup(&self, fingerprint: &BridgeFingerprint) -> Result<BridgeInfo> {
        self.bridges
            .get(fingerprint)
            .cloned()
            .ok_or_else(|| BrokerError::UnknownBridge(fingerprint.to_string()))
    }

    fn default_bridge(&self) -> BridgeInfo {
        self.default.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OTHER: &str = "8838024498816A039FCBBAB14E6F40A0843051FA";

    #[test]
    fn test_fingerprint_parsing() {
        let fp: BridgeFingerprint = DEFAULT_BRIDGE_FINGERPRINT.to_lowercase().parse().unwrap();
        assert_eq!(fp.to_string(), DEFAULT_BRIDGE_FINGERPRINT);
        assert!("zz".parse::<BridgeFingerprint>().is_err());
        assert!("abcd".parse::<BridgeFingerprint>().is_err());
    }

    #[test]
    fn test_builtin_resolves_default() {
        let list = BridgeList::builtin();
        assert_eq!(list.resolve("").unwrap().websocket_address, DEFAULT_BRIDGE_URL);
        assert!(list.resolve(DEFAULT_BRIDGE_FINGERPRINT).is_ok());
    }

    #[test]
    fn test_unknown_fingerprint() {
        let list = BridgeList::builtin();
        assert!(matches!(
            list.resolve(OTHER),
            Err(BrokerError::UnknownBridge(_))
        ));
        assert!(matches!(
            list.resolve("not-hex"),
            Err(BrokerError::BadRequest(_))
        ));
    }

    #[test]
    fn test_from_reader() {
        let data = format!(
            "{{\"displayName\":\"a\",\"webSocketAddress\":\"wss://a.example/\",\"fingerprint\":\"{OTHER}\"}}\n\n\
             {{\"displayName\":\"b\",\"webSocketAddress\":\"wss://b.example/\",\"fingerprint\":\"{DEFAULT_BRIDGE_FINGERPRINT}\"}}\n"
        );
        let list = BridgeList::from_reader(data.as_bytes()).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list.default_bridge().websocket_address, "wss://a.example/");
        assert_eq!(
            list.resolve(DEFAULT_BRIDGE_FINGERPRINT).unwrap().display_name,
            "b"
        );
    }

    #[test]
    fn test_from_reader_rejects_garbage() {
        assert!(BridgeList::from_reader("not json\n".as_bytes()).is_err());
        assert!(BridgeList::from_reader("".as_bytes()).is_err());
    }
}
