use crate::common::{
    SAMPLE_SDP, client_poll_body, create_test_config, http_client, proxy_poll, spawn_broker,
};
use flakebroker::config::SignalingMode;
use flakebroker::web::messages::{
    AnswerResponse, ClientPollResponse, ProxyPollResponse, STR_NO_PROXIES,
};
use std::time::Duration;

#[tokio::test]
async fn test_mailbox_poll_and_answer() {
    let mut config = create_test_config(0);
    config.signaling_mode = SignalingMode::Mailbox;
    let broker = spawn_broker(config).await;
    let client = http_client();

    let poller = {
        let client = client.clone();
        tokio::spawn(async move { proxy_poll(&client, broker, "sid-mb", "unrestricted").await })
    };
    tokio::time::sleep(Duration::from_millis(300)).await;

    let offerer = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .post(format!("http://{broker}/client"))
                .body(client_poll_body("client-mb", "restricted"))
                .send()
                .await
                .unwrap()
        })
    };

    let poll: ProxyPollResponse = poller.await.unwrap().json().await.unwrap();
    assert_eq!(poll.status, "client match");
    assert_eq!(poll.offer, SAMPLE_SDP);
    assert_eq!(poll.nat, "restricted");

    let answer = "v=0\r\na=candidate:2 1 udp 1 127.0.0.2 40000 typ host\r\n";
    let reply: AnswerResponse = client
        .post(format!("http://{broker}/answer"))
        .body(
            serde_json::json!({ "Version": "1.0", "Sid": "sid-mb", "Answer": answer })
                .to_string(),
        )
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(reply.success());

    let matched: ClientPollResponse = offerer.await.unwrap().json().await.unwrap();
    assert_eq!(matched.answer, answer);
}

#[tokio::test]
async fn test_mailbox_poll_times_out_without_clients() {
    let mut config = create_test_config(0);
    config.signaling_mode = SignalingMode::Mailbox;
    config.proxy_timeout = Duration::from_millis(200);
    let broker = spawn_broker(config).await;

    let poll: ProxyPollResponse = proxy_poll(&http_client(), broker, "sid-idle", "restricted")
        .await
        .json()
        .await
        .unwrap();

    assert_eq!(poll.status, "no match");
}

#[tokio::test]
async fn test_expired_mailbox_poll_is_not_matched() {
    let mut config = create_test_config(0);
    config.signaling_mode = SignalingMode::Mailbox;
    config.proxy_timeout = Duration::from_millis(200);
    let broker = spawn_broker(config).await;
    let client = http_client();

    let poll: ProxyPollResponse = proxy_poll(&client, broker, "sid-gone", "unrestricted")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(poll.status, "no match");

    let reply: ClientPollResponse = client
        .post(format!("http://{broker}/client"))
        .body(client_poll_body("client-late", "unrestricted"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(reply.error, STR_NO_PROXIES);
}
