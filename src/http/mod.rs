//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Client connection (plain or TLS)
//!     → server.rs (hyper HTTP/1.1 with upgrades, axum router)
//!
//! CONNECT host:port:
//!     → hijack.rs (take the raw connection once 200 is sent)
//!     → net::relay (bytes both ways)
//!
//! GET http://host/path (absolute-form):
//!     → headers.rs (copy, strip hop-by-hop)
//!     → upstream request
//!     → headers.rs (strip response hop-by-hop)
//!     → body.rs (stream response, flush per chunk)
//! ```

pub mod body;
pub mod headers;
pub mod hijack;
pub mod server;

pub use body::{copy_body, BodySink, ChannelSink};
pub use headers::{copy_headers, strip_hop_by_hop_headers, HOP_BY_HOP_HEADERS};
pub use hijack::{HijackError, Hijacked, Hijacker};
pub use server::ProxyServer;
