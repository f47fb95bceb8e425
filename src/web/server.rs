//! HTTP listener.
//!
//! Accepts TCP connections, bounds how many are served at once, and runs
//! each one on its own task with hyper's HTTP/1 connection driver.

use crate::config::Config;
use crate::web::routes::BrokerService;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

/// Binds `config.listen_addr` and serves until the process exits.
///
/// # Errors
///
/// Returns the bind error if the listen address is unavailable.
pub async fn run_listener(
    config: Arc<Config>,
    service: Arc<BrokerService>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(config.listen_addr).await?;
    info!(listen_addr = %listener.local_addr()?, "Broker listener started");
    serve(listener, config.concurrency_limit, service).await;
    Ok(())
}

/// Serves connections from an already-bound listener.
pub async fn serve(listener: TcpListener, concurrency_limit: usize, service: Arc<BrokerService>) {
    let connection_limit = Arc::new(Semaphore::new(concurrency_limit));

    loop {
        let Ok(permit) = connection_limit.clone().acquire_owned().await else {
            break;
        };

        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                configure_tcp_stream(&stream);
                let service = service.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    handle_connection(stream, peer_addr, service).await;
                });
            }
            Err(e) => {
                error!(error = %e, "Accept error");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

fn configure_tcp_stream(stream: &TcpStream) {
    let sock = socket2::SockRef::from(stream);

    let _ = stream.set_nodelay(true);

    let mut ka = socket2::TcpKeepalive::new()
        .with_time(Duration::from_secs(60))
        .with_interval(Duration::from_secs(10));

    #[cfg(not(target_os = "openbsd"))]
    {
        ka = ka.with_retries(3);
    }

    let _ = sock.set_tcp_keepalive(&ka);
}

async fn handle_connection(stream: TcpStream, peer_addr: SocketAddr, service: Arc<BrokerService>) {
    let io = TokioIo::new(stream);
    let peer = peer_addr.ip();
    let svc = service_fn(move |req| {
        let service = service.clone();
        async move { Ok::<_, Infallible>(service.handle(req, peer).await) }
    });

    if let Err(e) = http1::Builder::new().serve_connection(io, svc).await {
        debug!(peer_addr = %peer_addr, error = %e, "Connection error");
    }
}
