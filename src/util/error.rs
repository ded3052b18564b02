use thiserror::Error;

/// SOCKS proxy errors
#[derive(Error, Debug)]
pub enum SocksError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported SOCKS version: {0:#04x}")]
    BadVersion(u8),

    #[error("No authentication methods offered")]
    NoMethods,

    #[error("Unsupported command: {0:#04x}")]
    UnsupportedCommand(u8),

    #[error("Unsupported address type: {0:#04x}")]
    BadAddressType(u8),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Resolve error: {0}")]
    Resolve(String),

    #[error("Connection closed by peer")]
    ClosedByPeer,

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, SocksError>;
