//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use relay_proxy::config::ProxyConfig;
use relay_proxy::net::listener::Listener;
use relay_proxy::net::tls::ServerTlsConfig;
use relay_proxy::{ProxyServer, Shutdown};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// A proxy running on an ephemeral local port.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<Result<(), std::io::Error>>,
}

impl TestProxy {
    /// Trigger shutdown and wait for the server to drain.
    pub async fn stop(self) {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("server did not stop in time")
            .unwrap()
            .unwrap();
    }
}

/// Config bound to an ephemeral local port with short timeouts.
pub fn test_config() -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.timeouts.connect_secs = 2;
    config.timeouts.shutdown_grace_secs = 2;
    config
}

/// Start a proxy with `config`, optionally serving TLS.
pub async fn start_proxy(config: ProxyConfig, tls: Option<ServerTlsConfig>) -> TestProxy {
    let listener = Listener::bind(&config.listener).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let server = ProxyServer::new(config, tls, &shutdown);
    let handle = tokio::spawn(server.run(listener));
    TestProxy {
        addr,
        shutdown,
        handle,
    }
}

/// Read one HTTP message head, up to and including the blank line.
pub async fn read_head<R: AsyncRead + Unpin>(reader: &mut R) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        let n = reader.read(&mut byte).await.unwrap();
        assert!(n > 0, "connection closed inside message head");
        head.push(byte[0]);
    }
    String::from_utf8(head).unwrap()
}

/// Start a TCP server that echoes every byte back until the client closes.
pub async fn start_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = socket.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
                let _ = writer.shutdown().await;
            });
        }
    });

    addr
}

/// Start a simple mock backend that returns a fixed response.
pub async fn start_mock_backend(response: &'static str) -> SocketAddr {
    start_raw_backend(move |_head| {
        format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            response.len(),
            response
        )
    })
    .await
}

/// Start a backend that answers with the request head it received as body,
/// plus a few hop-by-hop response headers the proxy must drop.
pub async fn start_header_echo_backend() -> SocketAddr {
    start_raw_backend(|head| {
        format!(
            "HTTP/1.1 200 OK\r\n\
             Content-Length: {}\r\n\
             Keep-Alive: timeout=5\r\n\
             Proxy-Authenticate: Basic realm=\"upstream\"\r\n\
             X-Backend: echo\r\n\
             Connection: close\r\n\r\n{}",
            head.len(),
            head
        )
    })
    .await
}

/// Start a backend speaking raw HTTP/1.1: `respond` maps the request head
/// to the full response.
pub async fn start_raw_backend<F>(respond: F) -> SocketAddr
where
    F: Fn(String) -> String + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let respond = std::sync::Arc::new(respond);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let respond = respond.clone();
            tokio::spawn(async move {
                let head = read_head(&mut socket).await;
                let _ = socket.write_all(respond(head).as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

/// Start a backend that streams an event-stream response: the first event
/// goes out at once, the second and the end of body only after `release`
/// fires.
pub async fn start_streaming_backend(release: oneshot::Receiver<()>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };
        read_head(&mut socket).await;
        socket
            .write_all(
                b"HTTP/1.1 200 OK\r\n\
                  Content-Type: text/event-stream\r\n\
                  Transfer-Encoding: chunked\r\n\r\n\
                  d\r\ndata: first\n\n\r\n",
            )
            .await
            .unwrap();
        socket.flush().await.unwrap();

        let _ = release.await;
        let _ = socket.write_all(b"e\r\ndata: second\n\n\r\n0\r\n\r\n").await;
        let _ = socket.shutdown().await;
    });

    addr
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}
