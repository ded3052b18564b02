//! SOCKS5 (RFC 1928) proxy server, no-authentication subset.
//!
//! Accepts TCP clients, negotiates the SOCKS5 handshake, connects to the
//! requested upstream and relays bytes in both directions until either side
//! closes.

pub mod proto;
pub mod server;
pub mod util;

pub use proto::*;
pub use server::*;
pub use util::*;

// Re-export commonly used types
pub use server::listener::{Server, ServerConfig};
pub use util::error::{Result, SocksError};
