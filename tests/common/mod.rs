use bytes::Bytes;
use flakebroker::config::{Config, SignalingMode};
use flakebroker::core::signaling::{ClientOffer, TransferRequest};
use flakebroker::web::messages::ClientPollRequest;
use flakebroker::{
    BridgeList, Broker, BrokerMetrics, BrokerService, HttpProxyChannel, MailboxChannel,
    ProxyChannel, serve,
};
use http_body_util::{BodyExt, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

pub const SAMPLE_SDP: &str =
    "v=0\r\ns=-\r\nt=0 0\r\na=candidate:1 1 udp 2122260223 127.0.0.1 50000 typ host\r\n";

/// Stand-in for a proxy's own signaling endpoint.
#[derive(Clone, Default)]
pub struct MockProxy {
    pub port: u16,
    pub offers: Arc<Mutex<Vec<ClientOffer>>>,
    pub transfers: Arc<Mutex<Vec<TransferRequest>>>,
}

async fn mock_proxy_route(
    req: Request<hyper::body::Incoming>,
    state: MockProxy,
    answer: &'static str,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let path = req.uri().path().to_string();
    let body = req.into_body().collect().await.unwrap().to_bytes();

    let (status, reply) = match path.as_str() {
        "/add" => {
            let offer: ClientOffer = serde_json::from_slice(&body).unwrap();
            state.offers.lock().unwrap().push(offer);
            (
                StatusCode::OK,
                serde_json::json!({ "answer": answer }).to_string(),
            )
        }
        "/transfer" => {
            let transfer: TransferRequest = serde_json::from_slice(&body).unwrap();
            state.transfers.lock().unwrap().push(transfer);
            (StatusCode::OK, String::new())
        }
        _ => (StatusCode::NOT_FOUND, String::new()),
    };

    Ok(Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(reply)))
        .unwrap())
}

pub async fn spawn_mock_proxy(answer: &'static str) -> MockProxy {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let state = MockProxy {
        port: listener.local_addr().unwrap().port(),
        ..MockProxy::default()
    };

    let shared = state.clone();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                continue;
            };
            let shared = shared.clone();
            tokio::spawn(async move {
                let svc = service_fn(move |req| mock_proxy_route(req, shared.clone(), answer));
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), svc)
                    .await;
            });
        }
    });

    state
}

pub fn create_test_config(proxy_port: u16) -> Config {
    Config {
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        concurrency_limit: 64,
        max_body_size: 100_000,
        client_timeout: Duration::from_secs(3),
        proxy_timeout: Duration::from_secs(3),
        transfer_timeout: Duration::from_secs(1),
        proxy_http_port: proxy_port,
        signaling_mode: SignalingMode::Push,
        bridge_list_path: None,
        rescale_token: None,
        debug_verbose: false,
        log_format: "pretty".to_string(),
    }
}

/// Starts a broker on an ephemeral port and returns its address.
pub async fn spawn_broker(config: Config) -> SocketAddr {
    let config = Arc::new(config);
    let push = HttpProxyChannel::new(config.proxy_http_port, config.client_timeout);
    let channel: Arc<dyn ProxyChannel> = match config.signaling_mode {
        SignalingMode::Push => Arc::new(push),
        SignalingMode::Mailbox => Arc::new(MailboxChannel::new(push)),
    };
    let broker = Arc::new(Broker::new(
        config.clone(),
        channel,
        Arc::new(BridgeList::builtin()),
        Arc::new(BrokerMetrics::new()),
    ));

    let listener = TcpListener::bind(config.listen_addr).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let service = Arc::new(BrokerService::new(broker));
    tokio::spawn(serve(listener, config.concurrency_limit, service));
    addr
}

pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

pub fn client_poll_body(cid: &str, nat: &str) -> Vec<u8> {
    ClientPollRequest {
        offer: SAMPLE_SDP.to_string(),
        nat: nat.to_string(),
        fingerprint: String::new(),
        cid: cid.to_string(),
    }
    .encode()
    .unwrap()
}

pub async fn proxy_poll(client: &reqwest::Client, broker: SocketAddr, sid: &str, nat: &str) -> reqwest::Response {
    client
        .post(format!("http://{broker}/proxy"))
        .body(
            serde_json::json!({
                "Sid": sid,
                "Version": "1.3",
                "Type": "standalone",
                "NAT": nat,
                "Clients": 0,
                "AcceptedRelayPattern": "snowflake.torproject.net$"
            })
            .to_string(),
        )
        .send()
        .await
        .unwrap()
}
