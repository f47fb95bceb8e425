//! Configuration settings.
//!
//! Defines the main `Config` struct and environment variable loading logic.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// How a matched offer reaches its proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingMode {
    /// Broker POSTs the offer straight to the proxy's own endpoint.
    Push,
    /// Offer is parked for the proxy's next poll; answer comes back via `/answer`.
    Mailbox,
}

impl SignalingMode {
    fn from_str(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "MAILBOX" | "LEGACY" => Self::Mailbox,
            _ => Self::Push,
        }
    }
}

fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn get_env_bool(key: &str) -> bool {
    env::var(key)
        .map(|v| v.to_lowercase() == "true" || v == "1")
        .unwrap_or(false)
}

fn get_env_u64_or(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn get_env_u16_or(key: &str, default: u16) -> u16 {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn get_env_usize_or(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Broker configuration loaded from environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the broker HTTP listener binds to.
    pub listen_addr: SocketAddr,
    /// Maximum number of connections served at once.
    pub concurrency_limit: usize,
    /// Request bodies larger than this are rejected.
    pub max_body_size: usize,
    /// How long a client offer waits for its proxy's answer.
    pub client_timeout: Duration,
    /// How long a mailbox-mode proxy poll waits for an offer.
    pub proxy_timeout: Duration,
    /// Bound on each migration instruction sent during a rescale.
    pub transfer_timeout: Duration,
    /// Port every proxy serves its `/add` and `/transfer` endpoints on.
    pub proxy_http_port: u16,
    /// Offer delivery mechanism.
    pub signaling_mode: SignalingMode,
    /// JSON-lines bridge list. Built-in default bridge when absent.
    pub bridge_list_path: Option<PathBuf>,
    /// Bearer token guarding `/rescale`.
    pub rescale_token: Option<String>,
    /// Include the proxy address breakdown on `/debug`.
    pub debug_verbose: bool,
    /// Logging format: "json" or "pretty".
    pub log_format: String,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// # Panics
    ///
    /// Panics if `LISTEN_ADDR` is set but is not a valid socket address.
    #[must_use]
    pub fn from_env() -> Arc<Self> {
        let listen_addr = get_env_or("LISTEN_ADDR", "0.0.0.0:8080")
            .parse()
            .expect("LISTEN_ADDR must be a valid socket address");
        let bridge_list_path = env::var("BRIDGE_LIST_PATH")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);
        let rescale_token = env::var("RESCALE_TOKEN").ok().filter(|s| !s.is_empty());

        Arc::new(Self {
            listen_addr,
            concurrency_limit: get_env_usize_or("CONCURRENCY_LIMIT", 1024),
            max_body_size: get_env_usize_or("MAX_BODY_SIZE", 100_000),
            client_timeout: Duration::from_secs(get_env_u64_or("CLIENT_TIMEOUT_SECS", 10)),
            proxy_timeout: Duration::from_secs(get_env_u64_or("PROXY_TIMEOUT_SECS", 10)),
            transfer_timeout: Duration::from_secs(get_env_u64_or("TRANSFER_TIMEOUT_SECS", 5)),
            proxy_http_port: get_env_u16_or("PROXY_HTTP_PORT", 51821),
            signaling_mode: SignalingMode::from_str(&get_env_or("SIGNALING_MODE", "push")),
            bridge_list_path,
            rescale_token,
            debug_verbose: get_env_bool("DEBUG_VERBOSE"),
            log_format: get_env_or("LOG_FORMAT", "json"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_signaling_mode_parsing() {
        assert_eq!(SignalingMode::from_str("push"), SignalingMode::Push);
        assert_eq!(SignalingMode::from_str("MAILBOX"), SignalingMode::Mailbox);
        assert_eq!(SignalingMode::from_str("legacy"), SignalingMode::Mailbox);
        assert_eq!(SignalingMode::from_str("other"), SignalingMode::Push);
    }

    #[test]
    fn test_helpers_defaults() {
        let _guard = ENV_LOCK
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        unsafe {
            env::remove_var("TEST_MISSING_VAR");
        }
        assert_eq!(get_env_or("TEST_MISSING_VAR", "default"), "default");
        assert_eq!(get_env_u64_or("TEST_MISSING_VAR", 100), 100);
        assert_eq!(get_env_u16_or("TEST_MISSING_VAR", 50), 50);
        assert_eq!(get_env_usize_or("TEST_MISSING_VAR", 1), 1);
        assert!(!get_env_bool("TEST_MISSING_VAR"));
    }

    #[test]
    fn test_helpers_parsing() {
        let _guard = ENV_LOCK
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        unsafe {
            env::set_var("TEST_P1", "123");
            assert_eq!(get_env_u16_or("TEST_P1", 0), 123);

            env::set_var("TEST_P2", "not-a-number");
            assert_eq!(get_env_u64_or("TEST_P2", 7), 7);

            env::set_var("TEST_P3", "true");
            assert!(get_env_bool("TEST_P3"));

            env::set_var("TEST_P3", "1");
            assert!(get_env_bool("TEST_P3"));
        }
    }

    #[test]
    fn test_config_from_env_defaults() {
        let _guard = ENV_LOCK
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        unsafe {
            env::set_var("LISTEN_ADDR", "127.0.0.1:9090");
            env::remove_var("SIGNALING_MODE");
            env::remove_var("CLIENT_TIMEOUT_SECS");
            env::remove_var("PROXY_HTTP_PORT");
            env::remove_var("RESCALE_TOKEN");
        }

        let config = Config::from_env();
        assert_eq!(config.listen_addr.port(), 9090);
        assert_eq!(config.signaling_mode, SignalingMode::Push);
        assert_eq!(config.client_timeout, Duration::from_secs(10));
        assert_eq!(config.proxy_http_port, 51821);
        assert!(config.rescale_token.is_none());
    }

    #[test]
    fn test_config_mailbox_and_token() {
        let _guard = ENV_LOCK
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        unsafe {
            env::set_var("LISTEN_ADDR", "127.0.0.1:9091");
            env::set_var("SIGNALING_MODE", "mailbox");
            env::set_var("RESCALE_TOKEN", "hunter2");
            env::set_var("TRANSFER_TIMEOUT_SECS", "2");
        }

        let config = Config::from_env();

        unsafe {
            env::remove_var("SIGNALING_MODE");
            env::remove_var("RESCALE_TOKEN");
            env::remove_var("TRANSFER_TIMEOUT_SECS");
        }

        assert_eq!(config.signaling_mode, SignalingMode::Mailbox);
        assert_eq!(config.rescale_token.as_deref(), Some("hunter2"));
        assert_eq!(config.transfer_timeout, Duration::from_secs(2));
    }
}
