//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → wait_for_signal resolves
//!
//! Shutdown (shutdown.rs):
//!     trigger → accept loop stops → tunnels cancelled
//!             → HTTP connections finish in-flight exchanges → drain
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accept, cancel, drain, exit
//! - Shutdown has timeout: the drain gives up after the grace period

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::wait_for_signal;
