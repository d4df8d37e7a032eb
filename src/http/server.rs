//! Forward proxy server.
//!
//! # Responsibilities
//! - Accept client connections (optionally TLS) and serve HTTP/1.1 on them
//! - CONNECT: dial the target, hijack the client connection, relay bytes
//! - Absolute-form requests: forward upstream with hop-by-hop headers
//!   stripped and stream the response back chunk by chunk
//! - Graceful shutdown: stop accepting, cancel tunnels, drain connections

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, Method, StatusCode, Version};
use axum::response::{IntoResponse, Response};
use axum::Router;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use tower_http::trace::TraceLayer;

use crate::config::ProxyConfig;
use crate::http::body::{body_reader, channel_body, copy_body};
use crate::http::headers::{copy_headers, strip_hop_by_hop_headers};
use crate::http::hijack::Hijacker;
use crate::lifecycle::Shutdown;
use crate::net::connection::{ConnectionGuard, ConnectionTracker};
use crate::net::deadline::DeadlineStream;
use crate::net::listener::{ConnectionPermit, Listener, ListenerError};
use crate::net::relay::relay;
use crate::net::stream::ClientStream;
use crate::net::tls::ServerTlsConfig;
use crate::observability::metrics;

/// Flushed response chunks allowed to queue ahead of a slow client.
const RESPONSE_QUEUE_DEPTH: usize = 4;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub client: Client<HttpConnector, Body>,
    pub connect_timeout: Duration,
    pub shutdown: CancellationToken,
}

/// Everything that must stay alive as long as a client connection does,
/// including a tunnel that outlives its HTTP exchange.
struct ClientSlot {
    guard: ConnectionGuard,
    peer: SocketAddr,
    _permit: ConnectionPermit,
}

/// Forward proxy server.
pub struct ProxyServer {
    router: Router,
    state: AppState,
    config: ProxyConfig,
    tls: Option<ServerTlsConfig>,
    connections: ConnectionTracker,
}

impl ProxyServer {
    /// Create a server; `tls` turns the listener into an HTTPS proxy.
    pub fn new(config: ProxyConfig, tls: Option<ServerTlsConfig>, shutdown: &Shutdown) -> Self {
        let connect_timeout = Duration::from_secs(config.timeouts.connect_secs);

        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));
        connector.set_nodelay(true);
        // One upstream connection per request: no pooling.
        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(0)
            .build(connector);

        let state = AppState {
            client,
            connect_timeout,
            shutdown: shutdown.token(),
        };
        let router = Self::build_router(state.clone());

        Self {
            router,
            state,
            config,
            tls,
            connections: ConnectionTracker::new(),
        }
    }

    /// Build the Axum router for non-CONNECT requests.
    fn build_router(state: AppState) -> Router {
        Router::new()
            .fallback(forward_handler)
            .with_state(state)
            .layer(TraceLayer::new_for_http())
    }

    /// Live client connections and tunnels.
    pub fn connections(&self) -> ConnectionTracker {
        self.connections.clone()
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Run the server until shutdown is triggered, then drain connections.
    pub async fn run(self, listener: Listener) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            tls = self.tls.is_some(),
            "Proxy server starting"
        );

        let acceptor = self.tls.as_ref().map(ServerTlsConfig::acceptor);
        let idle = Duration::from_secs(self.config.timeouts.idle_secs);
        let shutdown = self.state.shutdown.clone();

        loop {
            let accepted = tokio::select! {
                res = listener.accept() => res,
                _ = shutdown.cancelled() => break,
            };

            let (stream, peer, permit) = match accepted {
                Ok(accepted) => accepted,
                Err(ListenerError::Closed) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Accept failed");
                    // Back off on persistent errors such as fd exhaustion.
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    continue;
                }
            };

            let slot = Arc::new(ClientSlot {
                guard: self.connections.track(),
                peer,
                _permit: permit,
            });
            tokio::spawn(serve_client(
                stream,
                slot,
                acceptor.clone(),
                idle,
                self.router.clone(),
                self.state.clone(),
            ));
        }

        drop(listener);
        let grace = Duration::from_secs(self.config.timeouts.shutdown_grace_secs);
        tracing::info!(
            active = self.connections.active_count(),
            grace_secs = grace.as_secs(),
            "Draining connections"
        );
        if tokio::time::timeout(grace, self.connections.wait_idle())
            .await
            .is_err()
        {
            tracing::warn!(
                active = self.connections.active_count(),
                "Shutdown grace period elapsed with connections still open"
            );
        }

        tracing::info!("Proxy server stopped");
        Ok(())
    }
}

/// Handshake (if TLS) and serve HTTP/1.1 on one client connection.
async fn serve_client(
    stream: TcpStream,
    slot: Arc<ClientSlot>,
    acceptor: Option<TlsAcceptor>,
    idle: Duration,
    router: Router,
    state: AppState,
) {
    let connection_id = slot.guard.id();
    let stream = DeadlineStream::with_deadline(stream, idle);

    let stream = match acceptor {
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(tls) => ClientStream::Tls(Box::new(tls)),
            Err(e) => {
                tracing::debug!(
                    connection_id = %connection_id,
                    peer_addr = %slot.peer,
                    error = %e,
                    "TLS handshake failed"
                );
                return;
            }
        },
        None => ClientStream::Plain(stream),
    };

    tracing::debug!(
        connection_id = %connection_id,
        peer_addr = %slot.peer,
        tls = stream.is_tls(),
        client_certificates = stream.peer_certificate_count(),
        "Serving client"
    );

    let shutdown = state.shutdown.clone();
    let service_slot = Arc::clone(&slot);
    let service = hyper::service::service_fn(move |req: Request<Incoming>| {
        let router = router.clone();
        let state = state.clone();
        let slot = Arc::clone(&service_slot);
        async move {
            let req = req.map(Body::new);
            if req.method() == Method::CONNECT {
                Ok::<_, Infallible>(connect_tunnel(state, slot, req).await)
            } else {
                router.oneshot(req).await
            }
        }
    });

    let conn = http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .with_upgrades();
    tokio::pin!(conn);

    let mut draining = false;
    loop {
        tokio::select! {
            res = conn.as_mut() => {
                if let Err(e) = res {
                    tracing::debug!(connection_id = %connection_id, error = %e, "Connection ended with error");
                }
                break;
            }
            _ = shutdown.cancelled(), if !draining => {
                draining = true;
                conn.as_mut().graceful_shutdown();
            }
        }
    }
}

/// Answer a CONNECT request and relay the hijacked connection to the target.
async fn connect_tunnel(state: AppState, slot: Arc<ClientSlot>, mut req: Request) -> Response {
    let started = Instant::now();
    let connection_id = slot.guard.id();

    let Some(target) = req.uri().authority().map(|a| a.to_string()) else {
        metrics::record_request("CONNECT", 400, started);
        return (StatusCode::BAD_REQUEST, "CONNECT target must be host:port").into_response();
    };

    let hijacker = match Hijacker::from_request(&mut req) {
        Ok(hijacker) => hijacker,
        Err(e) => {
            tracing::warn!(connection_id = %connection_id, error = %e, "Cannot tunnel");
            metrics::record_request("CONNECT", 500, started);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Tunneling not supported").into_response();
        }
    };

    let upstream = match tokio::time::timeout(state.connect_timeout, TcpStream::connect(&target)).await {
        Ok(Ok(upstream)) => upstream,
        Ok(Err(e)) => {
            tracing::warn!(connection_id = %connection_id, target = %target, error = %e, "Tunnel target unreachable");
            metrics::record_request("CONNECT", 502, started);
            return (StatusCode::BAD_GATEWAY, "Tunnel target unreachable").into_response();
        }
        Err(_) => {
            tracing::warn!(connection_id = %connection_id, target = %target, "Tunnel target connect timed out");
            metrics::record_request("CONNECT", 504, started);
            return (StatusCode::GATEWAY_TIMEOUT, "Tunnel target connect timed out").into_response();
        }
    };
    let _ = upstream.set_nodelay(true);

    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        let client = match hijacker.hijack::<ClientStream>().await {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!(connection_id = %connection_id, error = %e, "Hijack failed");
                return;
            }
        };

        tracing::debug!(connection_id = %connection_id, target = %target, "Tunnel established");
        metrics::record_tunnel_opened();
        let report = relay(client, upstream, shutdown.cancelled_owned()).await;
        metrics::record_tunnel_closed();

        tracing::debug!(
            connection_id = %connection_id,
            target = %target,
            outcome = ?report.outcome,
            sent = report.left_to_right,
            received = report.right_to_left,
            "Tunnel closed"
        );
        drop(slot);
    });

    metrics::record_request("CONNECT", 200, started);
    StatusCode::OK.into_response()
}

/// Forward an absolute-form request upstream and stream the response back.
async fn forward_handler(State(state): State<AppState>, req: Request) -> Response {
    let started = Instant::now();
    let method = req.method().clone();

    if req.uri().authority().is_none() {
        metrics::record_request(method.as_str(), 400, started);
        return (StatusCode::BAD_REQUEST, "Proxy requests need an absolute-form URI").into_response();
    }

    let (parts, body) = req.into_parts();
    let mut headers = HeaderMap::with_capacity(parts.headers.len());
    copy_headers(&mut headers, &parts.headers);
    strip_hop_by_hop_headers(&mut headers);

    tracing::debug!(method = %method, uri = %parts.uri, "Forwarding request");

    let mut upstream_req = Request::new(body);
    *upstream_req.method_mut() = method.clone();
    *upstream_req.uri_mut() = parts.uri;
    *upstream_req.version_mut() = Version::HTTP_11;
    *upstream_req.headers_mut() = headers;

    let response = match state.client.request(upstream_req).await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(method = %method, error = %e, "Upstream request failed");
            metrics::record_request(method.as_str(), 502, started);
            return (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response();
        }
    };

    let (mut parts, body) = response.into_parts();
    let mut headers = HeaderMap::with_capacity(parts.headers.len());
    copy_headers(&mut headers, &parts.headers);
    strip_hop_by_hop_headers(&mut headers);
    parts.headers = headers;

    let (mut sink, chunks) = channel_body(RESPONSE_QUEUE_DEPTH);
    tokio::spawn(async move {
        let mut reader = body_reader(body);
        let copied = copy_body(&mut sink, &mut reader).await;
        tracing::trace!(bytes = copied, "Response body streamed");
    });

    metrics::record_request(method.as_str(), parts.status.as_u16(), started);
    Response::from_parts(parts, Body::from_stream(chunks))
}
