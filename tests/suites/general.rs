use crate::common::{create_test_config, http_client, proxy_poll, spawn_broker};

#[tokio::test]
async fn test_robots_and_unknown_path() {
    let broker = spawn_broker(create_test_config(0)).await;
    let client = http_client();

    let resp = client
        .get(format!("http://{broker}/robots.txt"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "User-agent: *\nDisallow: /\n");

    let resp = client
        .get(format!("http://{broker}/admin"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_cors_preflight() {
    let broker = spawn_broker(create_test_config(0)).await;
    let resp = http_client()
        .request(reqwest::Method::OPTIONS, format!("http://{broker}/client"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["access-control-allow-origin"], "*");
}

#[tokio::test]
async fn test_request_body_size_limit() {
    let mut config = create_test_config(0);
    config.max_body_size = 100;
    let broker = spawn_broker(config).await;

    let resp = http_client()
        .post(format!("http://{broker}/proxy"))
        .body(vec![b' '; 200])
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_debug_counts_polls() {
    let broker = spawn_broker(create_test_config(0)).await;
    let client = http_client();
    proxy_poll(&client, broker, "sid-debug", "unrestricted").await;

    let text = client
        .get(format!("http://{broker}/debug"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    assert!(text.contains("current snowflakes available: 1"));
    assert!(text.contains("unrestricted: 1"));
    assert!(text.contains("standalone/unrestricted: 1"));
}
