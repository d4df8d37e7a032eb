//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → deadline.rs (idle deadline until the connection is hijacked)
//!     → tls.rs (optional TLS handshake, optional client certificates)
//!     → stream.rs (plain/TLS client stream handed to the HTTP layer)
//!
//! CONNECT tunnel:
//!     hijacked client stream + dialed target
//!     → relay.rs (bidirectional copy until EOF or shutdown)
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - Relays report how they ended, never transport errors

pub mod connection;
pub mod deadline;
pub mod listener;
pub mod relay;
pub mod stream;
pub mod tls;

pub use connection::{CloseHandle, ConnectionId, ConnectionTracker};
pub use deadline::{Deadline, DeadlineStream};
pub use relay::{relay, RelayOutcome, RelayReport};
pub use stream::ClientStream;
pub use tls::{build_server_tls_config, ClientAuth, ServerTlsConfig, TlsError};
