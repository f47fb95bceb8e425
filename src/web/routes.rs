//! Request routing.
//!
//! Maps each broker endpoint to the rendezvous and rescale operations and
//! turns their outcomes into HTTP responses. Every response carries the
//! CORS headers browser-based proxies need.

use crate::config::{BrokerError, Result, SignalingMode};
use crate::core::proxy::NatType;
use crate::core::registry::SessionAction;
use crate::core::rendezvous::{Broker, ClientRequest, ProxyPoll, validate_sdp};
use crate::web::messages::{
    AnswerRequest, AnswerResponse, ClientChange, ClientPollRequest, ClientPollResponse,
    ProxyPollRequest, ProxyPollResponse, RescaleRequest,
};
use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Body;
use hyper::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_ORIGIN, AUTHORIZATION, CONTENT_TYPE,
    HeaderMap, HeaderValue,
};
use hyper::{Method, Request, Response, StatusCode};
use std::fmt::Write;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

pub const NAT_TYPE_HEADER: &str = "Snowflake-NAT-Type";

const ROBOTS_TXT: &str = "User-agent: *\nDisallow: /\n";
const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
const APPLICATION_JSON: &str = "application/json";

type BoxError = Box<dyn std::error::Error + Send + Sync>;

fn respond(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(body.into()));
    *resp.status_mut() = status;
    let headers = resp.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Origin, X-Session-ID"),
    );
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    resp
}

fn json(body: Vec<u8>) -> Response<Full<Bytes>> {
    respond(StatusCode::OK, APPLICATION_JSON, body)
}

fn error_response(err: &BrokerError) -> Response<Full<Bytes>> {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    respond(status, TEXT_PLAIN, err.to_string())
}

/// The broker's HTTP request handler.
pub struct BrokerService {
    broker: Arc<Broker>,
    legacy_clients: AtomicU64,
}

impl BrokerService {
    #[must_use]
    pub fn new(broker: Arc<Broker>) -> Self {
        Self {
            broker,
            legacy_clients: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    /// Handles one request from `peer`. IPv4-mapped IPv6 peers are folded
    /// to their IPv4 form so a host has one identity on a dual-stack socket.
    pub async fn handle<B>(&self, req: Request<B>, peer: IpAddr) -> Response<Full<Bytes>>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<BoxError>,
    {
        let peer = peer.to_canonical();
        let (parts, body) = req.into_parts();
        debug!(method = %parts.method, path = %parts.uri.path(), peer = %peer, "Request received");

        if parts.method == Method::OPTIONS {
            return respond(StatusCode::OK, TEXT_PLAIN, Bytes::new());
        }

        let path = parts.uri.path();
        match path {
            "/robots.txt" => return respond(StatusCode::OK, TEXT_PLAIN, ROBOTS_TXT),
            "/debug" => return respond(StatusCode::OK, TEXT_PLAIN, self.debug_page()),
            "/proxy" | "/client" | "/answer" | "/change-client" | "/rescale" => {}
            _ => return respond(StatusCode::NOT_FOUND, TEXT_PLAIN, "404 page not found\n"),
        }
        if parts.method != Method::POST {
            return respond(StatusCode::METHOD_NOT_ALLOWED, TEXT_PLAIN, Bytes::new());
        }

        let body = match self.read_body(body).await {
            Ok(body) => body,
            Err(e) => {
                debug!(path = %path, error = %e, "Rejected request body");
                return error_response(&e);
            }
        };

        let result = match path {
            "/proxy" => self.proxy_poll(&body, peer).await,
            "/client" => Ok(self.client_offer(&body, &parts.headers, peer).await),
            "/answer" => self.proxy_answer(&body),
            "/change-client" => self.session_change(&body, peer),
            _ => self.rescale(&body, &parts.headers).await,
        };

        result.unwrap_or_else(|e| {
            if e.status_code() >= 500 {
                warn!(path = %path, error = %e, "Request failed");
            } else {
                debug!(path = %path, error = %e, "Request rejected");
            }
            error_response(&e)
        })
    }

    async fn read_body<B>(&self, body: B) -> Result<Bytes>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<BoxError>,
    {
        Limited::new(body, self.broker.config().max_body_size)
            .collect()
            .await
            .map(http_body_util::Collected::to_bytes)
            .map_err(|e| BrokerError::BadRequest(format!("unreadable body: {e}")))
    }

    async fn proxy_poll(&self, body: &[u8], peer: IpAddr) -> Result<Response<Full<Bytes>>> {
        let poll = ProxyPollRequest::decode(body)?;
        let proxy = self.broker.register_proxy(ProxyPoll {
            session_id: poll.sid.clone(),
            proxy_type: poll.proxy_type().to_string(),
            nat: NatType::parse(&poll.nat),
            addr: peer,
            clients: poll.clients,
            relay_pattern_supported: poll.accepted_relay_pattern.is_some(),
        });
        let relay_url = self.broker.relay_url();

        let resp = match self.broker.config().signaling_mode {
            SignalingMode::Push => ProxyPollResponse::no_match(&relay_url),
            SignalingMode::Mailbox => match self.broker.await_offer(&proxy).await {
                Some(offer) => ProxyPollResponse::matched(offer.sdp, &offer.nat_type, &relay_url),
                None => ProxyPollResponse::no_match(&relay_url),
            },
        };
        Ok(json(resp.encode()?))
    }

    /// Client offers come in two dialects. Legacy clients send the bare SDP
    /// and read the bare answer; everything else uses the versioned JSON
    /// poll and gets a 200 with either an answer or an error string unless
    /// the request itself is malformed.
    async fn client_offer(
        &self,
        body: &[u8],
        headers: &HeaderMap,
        peer: IpAddr,
    ) -> Response<Full<Bytes>> {
        if body.first() == Some(&b'{') {
            return self.legacy_client_offer(body, headers, peer).await;
        }

        let poll = match ClientPollRequest::decode(body) {
            Ok(poll) => poll,
            Err(e) => return error_response(&e),
        };
        let request = ClientRequest {
            client_id: poll.cid,
            nat: NatType::parse(&poll.nat),
            fingerprint: poll.fingerprint,
            offer: poll.offer,
        };

        let resp = match self.broker.match_client(request).await {
            Ok(answer) => ClientPollResponse::answer(answer),
            Err(e @ BrokerError::BadRequest(_)) => return error_response(&e),
            Err(e) => ClientPollResponse::error(e.to_string()),
        };
        resp.encode().map_or_else(|e| error_response(&e), json)
    }

    async fn legacy_client_offer(
        &self,
        body: &[u8],
        headers: &HeaderMap,
        peer: IpAddr,
    ) -> Response<Full<Bytes>> {
        let offer = String::from_utf8_lossy(body).into_owned();
        if let Err(e) = validate_sdp(&offer) {
            return error_response(&e);
        }
        let nat = headers
            .get(NAT_TYPE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map_or(NatType::Unknown, NatType::parse);
        let seq = self.legacy_clients.fetch_add(1, Ordering::Relaxed);

        let request = ClientRequest {
            client_id: format!("legacy-{peer}-{seq}"),
            nat,
            fingerprint: String::new(),
            offer,
        };
        match self.broker.match_client(request).await {
            Ok(answer) => respond(StatusCode::OK, APPLICATION_JSON, answer),
            Err(e) => error_response(&e),
        }
    }

    fn proxy_answer(&self, body: &[u8]) -> Result<Response<Full<Bytes>>> {
        let req = AnswerRequest::decode(body)?;
        validate_sdp(&req.answer)?;
        let delivered = self.broker.submit_answer(&req.sid, req.answer);
        Ok(json(AnswerResponse::new(delivered).encode()?))
    }

    fn session_change(&self, body: &[u8], peer: IpAddr) -> Result<Response<Full<Bytes>>> {
        let change = ClientChange::decode(body)?;
        let action = SessionAction::parse(&change.action)
            .ok_or_else(|| BrokerError::BadRequest(format!("unknown action {:?}", change.action)))?;
        self.broker.notify_session_change(&change.cid, action, peer);
        Ok(respond(StatusCode::OK, TEXT_PLAIN, Bytes::new()))
    }

    async fn rescale(&self, body: &[u8], headers: &HeaderMap) -> Result<Response<Full<Bytes>>> {
        if let Some(token) = &self.broker.config().rescale_token {
            let expected = format!("Bearer {token}");
            let authorized = headers
                .get(AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v == expected);
            if !authorized {
                warn!("Rescale rejected: bad or missing token");
                return Ok(respond(StatusCode::UNAUTHORIZED, TEXT_PLAIN, "unauthorized"));
            }
        }

        let (retiring, incoming) = RescaleRequest::decode(body)?;
        let report = self.broker.rescale(&retiring, &incoming).await?;
        info!(
            retired = report.retired,
            migrated = report.migrations.len(),
            "Rescale request served"
        );
        Ok(respond(StatusCode::OK, TEXT_PLAIN, "success"))
    }

    fn debug_page(&self) -> String {
        let mut page = self.broker.summary().render();
        page.push_str("\n\n");
        page.push_str(&self.broker.metrics().snapshot().render());
        if self.broker.config().debug_verbose {
            page.push_str("\n\npooled proxies by address:");
            for (addr, nat, load) in self.broker.pool_loads() {
                let _ = write!(page, "\n\t{addr} {nat} load={load}");
            }
        }
        page.push('\n');
        page
    }
}
