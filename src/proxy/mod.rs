//! Connect Handler (C4, spec.md §4.4) and its supporting plumbing.
//!
//! # Module Structure
//!
//! - `server` - `ProxyServer`, the accept loop, CONNECT tunneling, and request parsing
//! - `context` - `AppState`, the collaborator bundle built once at startup
//! - `client` - Outbound Client (C11): connection pool to upstream origins
//! - `tls` - per-leaf `TlsAcceptor` construction for the dynamic MITM handshake
//! - `network` - SO_REUSEPORT listener construction

pub mod client;
pub mod context;
mod network;
mod server;
mod tls;

pub use context::AppState;
pub use server::ProxyServer;
