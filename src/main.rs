//! `flakebroker` - Rendezvous broker for snowflake-style volunteer proxies.
//!
//! Copyright (C) 2026 Maverick
//! SPDX-License-Identifier: AGPL-3.0-only
//!
//! Initializes the runtime, loads configuration, sets up logging, and
//! launches the broker HTTP listener.

use flakebroker::{
    BridgeList, Broker, BrokerMetrics, BrokerService, Config, HttpProxyChannel, MailboxChannel,
    ProxyChannel, SignalingMode, run_listener,
};

use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let (non_blocking, _guard) = tracing_appender::non_blocking(std::io::stdout());
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(non_blocking);

    if log_format.eq_ignore_ascii_case("pretty") {
        subscriber.init();
    } else {
        subscriber.json().init();
    }

    let config = Config::from_env();

    let bridges = match &config.bridge_list_path {
        Some(path) => match BridgeList::load(path) {
            Ok(list) => list,
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to load bridge list");
                std::process::exit(1);
            }
        },
        None => {
            warn!("BRIDGE_LIST_PATH not set, serving the built-in default bridge only");
            BridgeList::builtin()
        }
    };

    let push = HttpProxyChannel::new(config.proxy_http_port, config.client_timeout);
    let channel: Arc<dyn ProxyChannel> = match config.signaling_mode {
        SignalingMode::Push => Arc::new(push),
        SignalingMode::Mailbox => Arc::new(MailboxChannel::new(push)),
    };

    info!(
        listen_addr = %config.listen_addr,
        signaling_mode = ?config.signaling_mode,
        bridges = bridges.len(),
        proxy_http_port = config.proxy_http_port,
        rescale_auth = config.rescale_token.is_some(),
        log_format = %config.log_format,
        "Broker initialized"
    );

    let broker = Arc::new(Broker::new(
        config.clone(),
        channel,
        Arc::new(bridges),
        Arc::new(BrokerMetrics::new()),
    ));
    let service = Arc::new(BrokerService::new(broker));

    if let Err(e) = run_listener(config.clone(), service).await {
        error!(listen_addr = %config.listen_addr, error = %e, "FATAL: broker listener failed");
        std::process::exit(1);
    }
}
