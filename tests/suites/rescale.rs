use crate::common::{
    SAMPLE_SDP, client_poll_body, create_test_config, http_client, proxy_poll, spawn_broker,
    spawn_mock_proxy,
};

#[tokio::test]
async fn test_rescale_noop() {
    let broker = spawn_broker(create_test_config(0)).await;

    let resp = http_client()
        .post(format!("http://{broker}/rescale"))
        .body(r#"{"oldIPs":[],"newIPs":[]}"#)
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_rescale_requires_token() {
    let mut config = create_test_config(0);
    config.rescale_token = Some("s3cret".to_string());
    let broker = spawn_broker(config).await;
    let client = http_client();

    let resp = client
        .post(format!("http://{broker}/rescale"))
        .body(r#"{"oldIPs":[],"newIPs":[]}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client
        .post(format!("http://{broker}/rescale"))
        .bearer_auth("s3cret")
        .body(r#"{"oldIPs":[],"newIPs":[]}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_rescale_without_replacement_fails() {
    let proxy = spawn_mock_proxy(SAMPLE_SDP).await;
    let broker = spawn_broker(create_test_config(proxy.port)).await;
    let client = http_client();
    proxy_poll(&client, broker, "sid-1", "unrestricted").await;
    client
        .post(format!("http://{broker}/client"))
        .body(client_poll_body("client-1", "restricted"))
        .send()
        .await
        .unwrap();

    let resp = client
        .post(format!("http://{broker}/rescale"))
        .body(r#"{"oldIPs":["127.0.0.1"],"newIPs":["127.0.0.2"]}"#)
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 500);
    assert!(proxy.transfers.lock().unwrap().is_empty());

    let text = client
        .get(format!("http://{broker}/debug"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(text.contains("rescales partial: 1"));
    assert!(text.contains("pooled proxies: 0"));
}
