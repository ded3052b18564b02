//! SOCKS5 reply construction and REP code mapping.

use crate::proto::{ATYP_IPV4, ATYP_IPV6, SOCKS_VERSION};
use crate::util::SocksError;
use bytes::{BufMut, BytesMut};
use std::io;
use std::net::SocketAddr;

/// SOCKS5 reply codes (RFC 1928 §6)
pub const REPLY_SUCCEEDED: u8 = 0x00;
pub const REPLY_GENERAL_FAILURE: u8 = 0x01;
pub const REPLY_NETWORK_UNREACHABLE: u8 = 0x03;
pub const REPLY_HOST_UNREACHABLE: u8 = 0x04;
pub const REPLY_CONNECTION_REFUSED: u8 = 0x05;
pub const REPLY_COMMAND_NOT_SUPPORTED: u8 = 0x07;
pub const REPLY_ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;

/// Canonical 10-byte error reply: `VER REP RSV ATYP=IPv4 0.0.0.0:0`.
pub fn error_reply(rep: u8) -> [u8; 10] {
    [SOCKS_VERSION, rep, 0x00, ATYP_IPV4, 0, 0, 0, 0, 0, 0]
}

/// CONNECT success reply carrying the proxy's own bound address.
///
/// 10 bytes for an IPv4 listener, 22 for IPv6. `BND.PORT` is written in
/// network byte order.
pub fn success_reply(bound: SocketAddr) -> BytesMut {
    let mut buf = BytesMut::with_capacity(22);
    buf.put_u8(SOCKS_VERSION);
    buf.put_u8(REPLY_SUCCEEDED);
    buf.put_u8(0x00);
    match bound {
        SocketAddr::V4(v4) => {
            buf.put_u8(ATYP_IPV4);
            buf.put_slice(&v4.ip().octets());
        }
        SocketAddr::V6(v6) => {
            buf.put_u8(ATYP_IPV6);
            buf.put_slice(&v6.ip().octets());
        }
    }
    buf.put_u16(bound.port());
    buf
}

/// Map a handshake or connect failure to the REP code sent to the client.
pub fn reply_code(err: &SocksError) -> u8 {
    match err {
        SocksError::UnsupportedCommand(_) => REPLY_COMMAND_NOT_SUPPORTED,
        SocksError::BadAddressType(_) => REPLY_ADDRESS_TYPE_NOT_SUPPORTED,
        SocksError::Io(err) => reply_code_for_io(err),
        _ => REPLY_GENERAL_FAILURE,
    }
}

/// Map an upstream connect error to the REP code.
pub fn reply_code_for_io(err: &io::Error) -> u8 {
    match err.kind() {
        io::ErrorKind::NetworkUnreachable => REPLY_NETWORK_UNREACHABLE,
        io::ErrorKind::HostUnreachable => REPLY_HOST_UNREACHABLE,
        io::ErrorKind::ConnectionRefused => REPLY_CONNECTION_REFUSED,
        _ => REPLY_GENERAL_FAILURE,
    }
}
