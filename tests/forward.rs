//! Plain HTTP forwarding through the proxy.

use std::sync::Arc;

use tokio::io::AsyncWriteExt;

use hide_proxy::config::ProxyConfig;
use hide_proxy::security::BasicCredentials;
use hide_proxy::{AllowAll, StaticPolicy};

mod common;

use common::{
    read_http_message, read_to_close, start_mock_backend, start_proxy, start_proxy_with, start_silent_backend,
    unused_addr, CountingDialer,
};

const BACKEND_RESPONSE: &str = "HTTP/1.1 201 Created\r\n\
    Content-Type: text/plain\r\n\
    X-Backend: mock\r\n\
    Content-Length: 11\r\n\
    Connection: close\r\n\
    \r\n\
    hello world";

fn proxied_client(proxy: std::net::SocketAddr) -> reqwest::Client {
    reqwest::Client::builder()
        .proxy(reqwest::Proxy::http(format!("http://{}", proxy)).unwrap())
        .build()
        .unwrap()
}

#[tokio::test]
async fn response_passes_through_unchanged() {
    let (backend, _recorded) = start_mock_backend(BACKEND_RESPONSE).await;
    let proxy = start_proxy(Arc::new(AllowAll), CountingDialer::new()).await;

    let response = proxied_client(proxy.addr)
        .get(format!("http://{}/greeting", backend))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::CREATED);
    assert_eq!(response.headers()["x-backend"], "mock");
    assert_eq!(response.headers()["content-type"], "text/plain");
    assert_eq!(response.headers()["content-length"], "11");
    assert_eq!(response.text().await.unwrap(), "hello world");
}

#[tokio::test]
async fn upstream_sees_origin_form_without_proxy_credentials() {
    let (backend, recorded) = start_mock_backend(BACKEND_RESPONSE).await;
    let policy = StaticPolicy::new().with_credentials(BasicCredentials::new("alice", "secret"), "hide");
    let proxy = start_proxy(Arc::new(policy), CountingDialer::new()).await;

    let client = reqwest::Client::builder()
        .proxy(
            reqwest::Proxy::http(format!("http://{}", proxy.addr))
                .unwrap()
                .basic_auth("alice", "secret"),
        )
        .build()
        .unwrap();

    let response = client
        .get(format!("http://{}/search?q=rust&page=2", backend))
        .header("x-client", "kept")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::CREATED);

    let requests = recorded.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    let lower = request.to_ascii_lowercase();

    assert!(request.starts_with("GET /search?q=rust&page=2 HTTP/1.1\r\n"), "{}", request);
    assert!(lower.contains(&format!("host: {}\r\n", backend)));
    assert!(lower.contains("x-client: kept\r\n"));
    assert!(!lower.contains("proxy-authorization"));
    assert!(!lower.contains("proxy-connection"));
}

#[tokio::test]
async fn request_body_is_forwarded() {
    let (backend, recorded) = start_mock_backend(BACKEND_RESPONSE).await;
    let proxy = start_proxy(Arc::new(AllowAll), CountingDialer::new()).await;

    let response = proxied_client(proxy.addr)
        .post(format!("http://{}/submit", backend))
        .body("name=hide&kind=proxy")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::CREATED);

    let requests = recorded.lock().unwrap().clone();
    assert!(requests[0].starts_with("POST /submit HTTP/1.1\r\n"));
    assert!(requests[0].ends_with("\r\n\r\nname=hide&kind=proxy"));
}

#[tokio::test]
async fn unreachable_destination_gets_503_with_error_text() {
    let dead = unused_addr().await;
    let dialer = CountingDialer::new();
    let proxy = start_proxy(Arc::new(AllowAll), dialer.clone()).await;

    let response = proxied_client(proxy.addr)
        .get(format!("http://{}/", dead))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
    let body = response.text().await.unwrap();
    assert!(body.contains(&dead.to_string()), "{}", body);
    assert_eq!(dialer.dials(), 1);
}

#[tokio::test]
async fn each_request_dials_fresh() {
    let (backend, recorded) = start_mock_backend(BACKEND_RESPONSE).await;
    let dialer = CountingDialer::new();
    let proxy = start_proxy(Arc::new(AllowAll), dialer.clone()).await;
    let client = proxied_client(proxy.addr);

    for _ in 0..3 {
        let response = client
            .get(format!("http://{}/", backend))
            .send()
            .await
            .unwrap();
        assert_eq!(response.text().await.unwrap(), "hello world");
    }

    assert_eq!(dialer.dials(), 3);
    assert_eq!(recorded.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn https_absolute_target_is_rejected() {
    let dialer = CountingDialer::new();
    let proxy = start_proxy(Arc::new(AllowAll), dialer.clone()).await;

    let mut client = proxy.connect().await;
    client
        .write_all(b"GET https://example.com/ HTTP/1.1\r\nHost: example.com\r\n\r\n")
        .await
        .unwrap();

    let response = read_http_message(&mut client).await;
    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{}", response);
    assert_eq!(dialer.dials(), 0);
}

#[tokio::test]
async fn response_bytes_match_destination() {
    const RAW: &str = "HTTP/1.1 200 OK\r\nX-Backend: mock\r\nContent-Length: 2\r\n\r\nhi";
    let (backend, _recorded) = start_mock_backend(RAW).await;
    let proxy = start_proxy(Arc::new(AllowAll), CountingDialer::new()).await;

    let mut client = proxy.connect().await;
    client
        .write_all(format!("GET http://{}/raw HTTP/1.1\r\nHost: {}\r\n\r\n", backend, backend).as_bytes())
        .await
        .unwrap();
    let received = read_to_close(&mut client).await;

    // The proxy's own `Connection: close` is the only line it may add.
    let without_connection: String = received
        .split_inclusive("\r\n")
        .filter(|line| !line.eq_ignore_ascii_case("connection: close\r\n"))
        .collect();
    assert_eq!(without_connection, RAW);
    assert!(!received.to_ascii_lowercase().contains("date:"), "{}", received);
}

#[tokio::test]
async fn silent_destination_times_out_with_503() {
    let backend = start_silent_backend().await;
    let mut config = ProxyConfig::default();
    config.timeouts.request_secs = 1;
    let proxy = start_proxy_with(config, Arc::new(AllowAll), CountingDialer::new()).await;

    let mut client = proxy.connect().await;
    client
        .write_all(format!("GET http://{}/slow HTTP/1.1\r\nHost: {}\r\n\r\n", backend, backend).as_bytes())
        .await
        .unwrap();
    let response = read_to_close(&mut client).await;

    assert!(response.starts_with("HTTP/1.1 503 Service Unavailable\r\n"), "{}", response);
}
