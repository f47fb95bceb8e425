use crate::common::{
    SAMPLE_SDP, client_poll_body, create_test_config, http_client, proxy_poll, spawn_broker,
    spawn_mock_proxy,
};
use flakebroker::web::messages::{AnswerResponse, ClientPollResponse, ProxyPollResponse};

#[tokio::test]
async fn test_push_match_end_to_end() {
    let proxy = spawn_mock_proxy(SAMPLE_SDP).await;
    let broker = spawn_broker(create_test_config(proxy.port)).await;
    let client = http_client();

    let resp = proxy_poll(&client, broker, "sid-1", "unrestricted").await;
    assert_eq!(resp.status(), 200);
    let poll: ProxyPollResponse = resp.json().await.unwrap();
    assert_eq!(poll.status, "no match");
    assert_eq!(poll.relay_url, "wss://snowflake.torproject.net/");

    let resp = client
        .post(format!("http://{broker}/client"))
        .body(client_poll_body("client-1", "restricted"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let reply: ClientPollResponse = resp.json().await.unwrap();
    assert_eq!(reply.answer, SAMPLE_SDP);
    assert!(reply.error.is_empty());

    let offers = proxy.offers.lock().unwrap().clone();
    assert_eq!(offers.len(), 1);
    assert_eq!(offers[0].cid, "client-1");
    assert_eq!(offers[0].nat_type, "restricted");
    assert_eq!(offers[0].fingerprint, "2B280B23E1107BB62ABFC40DDCC8824814F80A72");
}

#[tokio::test]
async fn test_client_without_proxies() {
    let broker = spawn_broker(create_test_config(0)).await;

    let resp = http_client()
        .post(format!("http://{broker}/client"))
        .body(client_poll_body("client-1", "unrestricted"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let reply: ClientPollResponse = resp.json().await.unwrap();
    assert_eq!(reply.error, "no snowflake proxies currently available");
}

#[tokio::test]
async fn test_legacy_client_without_proxies() {
    let broker = spawn_broker(create_test_config(0)).await;
    let offer = serde_json::json!({ "type": "offer", "sdp": SAMPLE_SDP }).to_string();

    let resp = http_client()
        .post(format!("http://{broker}/client"))
        .header("Snowflake-NAT-Type", "unrestricted")
        .body(offer)
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 503);
}

#[tokio::test]
async fn test_restricted_client_cannot_use_restricted_proxy() {
    let proxy = spawn_mock_proxy(SAMPLE_SDP).await;
    let broker = spawn_broker(create_test_config(proxy.port)).await;
    let client = http_client();
    proxy_poll(&client, broker, "sid-1", "restricted").await;

    let reply: ClientPollResponse = client
        .post(format!("http://{broker}/client"))
        .body(client_poll_body("client-1", "restricted"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(reply.error, "no snowflake proxies currently available");
    assert!(proxy.offers.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_unreachable_proxy_reports_error() {
    let unused = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_port = unused.local_addr().unwrap().port();
    drop(unused);

    let broker = spawn_broker(create_test_config(dead_port)).await;
    let client = http_client();
    proxy_poll(&client, broker, "sid-1", "unrestricted").await;

    let resp = client
        .post(format!("http://{broker}/client"))
        .body(client_poll_body("client-1", "unrestricted"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let reply: ClientPollResponse = resp.json().await.unwrap();
    assert!(reply.answer.is_empty());
    assert!(!reply.error.is_empty());
}

#[tokio::test]
async fn test_answer_for_consumed_session() {
    let proxy = spawn_mock_proxy(SAMPLE_SDP).await;
    let broker = spawn_broker(create_test_config(proxy.port)).await;
    let client = http_client();
    proxy_poll(&client, broker, "sid-1", "unrestricted").await;
    client
        .post(format!("http://{broker}/client"))
        .body(client_poll_body("client-1", "unrestricted"))
        .send()
        .await
        .unwrap();

    let resp = client
        .post(format!("http://{broker}/answer"))
        .body(
            serde_json::json!({ "Version": "1.0", "Sid": "sid-1", "Answer": SAMPLE_SDP })
                .to_string(),
        )
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let reply: AnswerResponse = resp.json().await.unwrap();
    assert!(!reply.success());
}

#[tokio::test]
async fn test_change_client_notice() {
    let broker = spawn_broker(create_test_config(0)).await;
    let client = http_client();

    for action in ["add", "remove", "delete"] {
        let resp = client
            .post(format!("http://{broker}/change-client"))
            .body(serde_json::json!({ "Cid": "client-1", "Action": action }).to_string())
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }

    let resp = client
        .post(format!("http://{broker}/change-client"))
        .body(r#"{"Cid":"client-1","Action":"pause"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}
