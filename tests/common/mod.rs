//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use hide_proxy::config::{ListenerConfig, ProxyConfig};
use hide_proxy::net::{Dialer, Listener, TcpDialer};
use hide_proxy::{AccessPolicy, ProxyError, ProxyServer, Shutdown};

/// A running proxy bound to an ephemeral loopback port.
///
/// Dropping it closes the shutdown channel, which stops the accept loop.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub handle: tokio::task::JoinHandle<Result<(), ProxyError>>,
}

impl TestProxy {
    pub async fn connect(&self) -> TcpStream {
        TcpStream::connect(self.addr).await.unwrap()
    }
}

/// Start a proxy with `policy`, dialing through `dialer`.
pub async fn start_proxy(policy: Arc<dyn AccessPolicy>, dialer: Arc<dyn Dialer>) -> TestProxy {
    start_proxy_with(ProxyConfig::default(), policy, dialer).await
}

/// Start a proxy from `config`, overriding only the bind address.
pub async fn start_proxy_with(
    mut config: ProxyConfig,
    policy: Arc<dyn AccessPolicy>,
    dialer: Arc<dyn Dialer>,
) -> TestProxy {
    config.listener = ListenerConfig {
        bind_address: "127.0.0.1:0".to_string(),
        ..config.listener
    };
    let listener = Listener::bind(&config.listener).await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let server = ProxyServer::new(config, policy).with_dialer(dialer);
    let handle = tokio::spawn(server.run(listener, shutdown.subscribe()));

    TestProxy {
        addr,
        shutdown,
        handle,
    }
}

/// Dialer that counts every attempt before delegating to TCP.
#[derive(Default)]
pub struct CountingDialer {
    inner: TcpDialer,
    dials: AtomicUsize,
}

impl CountingDialer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Dialer for CountingDialer {
    async fn dial(&self, authority: &str) -> Result<TcpStream, ProxyError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        self.inner.dial(authority).await
    }
}

/// Dialer whose connect never completes within its own timeout.
pub struct StallingDialer {
    timeout: Duration,
    dials: AtomicUsize,
}

impl StallingDialer {
    pub fn new(timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            timeout,
            dials: AtomicUsize::new(0),
        })
    }

    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Dialer for StallingDialer {
    async fn dial(&self, authority: &str) -> Result<TcpStream, ProxyError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let _ = tokio::time::timeout(self.timeout, std::future::pending::<()>()).await;
        Err(ProxyError::DialTimeout {
            addr: authority.to_string(),
            timeout: self.timeout,
        })
    }
}

/// Start a TCP server that echoes every byte back.
pub async fn start_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, _)) => {
                    tokio::spawn(async move {
                        let (mut reader, mut writer) = socket.into_split();
                        let _ = tokio::io::copy(&mut reader, &mut writer).await;
                        let _ = writer.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// Requests received by a mock backend, head and body as text.
pub type Recorded = Arc<Mutex<Vec<String>>>;

/// Start an HTTP backend that records each request and answers with `response` verbatim.
pub async fn start_mock_backend(response: &'static str) -> (SocketAddr, Recorded) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let recorded: Recorded = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&recorded);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let log = Arc::clone(&log);
                    tokio::spawn(async move {
                        let request = read_http_message(&mut socket).await;
                        log.lock().unwrap().push(request);
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    (addr, recorded)
}

/// Start a backend that accepts and reads requests but never answers.
pub async fn start_silent_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut sink = [0u8; 1024];
                while let Ok(n) = socket.read(&mut sink).await {
                    if n == 0 {
                        break;
                    }
                }
            });
        }
    });

    addr
}

/// Address on loopback with nothing listening.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Read a head plus a `Content-Length` body, if any.
pub async fn read_http_message<R: AsyncRead + Unpin>(stream: &mut R) -> String {
    let mut buf = Vec::new();
    let head_end = loop {
        if let Some(pos) = find_head_end(&buf) {
            break pos;
        }
        let mut chunk = [0u8; 1024];
        let n = stream.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            return String::from_utf8_lossy(&buf).into_owned();
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_ascii_lowercase();
    let content_length = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < head_end + content_length {
        let mut chunk = [0u8; 1024];
        let n = stream.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    String::from_utf8_lossy(&buf).into_owned()
}

/// Read everything until the peer closes, bounded so a hung proxy fails the test.
pub async fn read_to_close(stream: &mut TcpStream) -> String {
    let mut out = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut out))
        .await
        .expect("peer did not close")
        .unwrap();
    String::from_utf8_lossy(&out).into_owned()
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|pos| pos + 4)
}
