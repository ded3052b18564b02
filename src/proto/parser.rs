//! Incremental SOCKS5 handshake parser.
//!
//! Pure byte-at-a-time state machine with no I/O. The session feeds it
//! whatever each socket read produced; the parser picks up exactly where the
//! previous fragment stopped, so greetings and requests may be split across
//! arbitrary recv boundaries. No byte is ever consumed twice.

use crate::proto::{ATYP_DOMAIN, ATYP_IPV4, ATYP_IPV6, CMD_CONNECT, SOCKS_VERSION};
use crate::util::{Result, SocksError};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Method flag bits recorded from the client greeting. Only NONE is ever
/// acted on; the others are tracked for logging.
pub const METHOD_NONE: u8 = 0x01;
pub const METHOD_GSSAPI: u8 = 0x02;
pub const METHOD_PASSWORD: u8 = 0x04;

/// Parser sub-states. Each `Want*` state names the byte(s) expected next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    WantVersion,
    WantNMethods,
    WantMethods,
    WantReqHead,
    WantAtyp,
    WantDstAddr,
    WantDstPort,
    Finish,
}

/// Destination requested by a CONNECT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestAddr {
    Ip(IpAddr),
    Domain(String),
}

impl fmt::Display for DestAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DestAddr::Ip(ip) => write!(f, "{}", ip),
            DestAddr::Domain(name) => f.write_str(name),
        }
    }
}

/// Parser context embedded in a session.
///
/// Holds everything decoded so far plus the resume point. The destination
/// buffer is fixed at the SOCKS5 maximum (255-byte domain), so parsing
/// allocates nothing.
pub struct Socks5Ctx {
    state: ParseState,
    methods: u8,
    methods_left: u8,
    head_seen: u8,
    cmd: u8,
    atyp: u8,
    addr_len: usize,
    addr_filled: usize,
    dst_addr: [u8; 255],
    port_bytes: [u8; 2],
    port_filled: usize,
}

impl Default for Socks5Ctx {
    fn default() -> Self {
        Self::new()
    }
}

impl Socks5Ctx {
    pub fn new() -> Self {
        Self {
            state: ParseState::WantVersion,
            methods: 0,
            methods_left: 0,
            head_seen: 0,
            cmd: 0,
            atyp: 0,
            addr_len: 0,
            addr_filled: 0,
            dst_addr: [0u8; 255],
            port_bytes: [0u8; 2],
            port_filled: 0,
        }
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    /// True once the current message (greeting or request) is complete.
    pub fn finished(&self) -> bool {
        self.state == ParseState::Finish
    }

    /// True if the client advertised the NO AUTHENTICATION method.
    pub fn offers_no_auth(&self) -> bool {
        self.methods & METHOD_NONE != 0
    }

    pub fn cmd(&self) -> u8 {
        self.cmd
    }

    /// Rearm a finished method identification for request parsing.
    pub fn begin_request(&mut self) {
        self.state = ParseState::WantReqHead;
    }

    /// Consume greeting bytes: `VER | NMETHODS | METHODS[NMETHODS]`.
    ///
    /// Returns how many input bytes were consumed. Consumption stops once the
    /// greeting is complete; the caller decides what to do with any surplus.
    pub fn parse_method_identification(&mut self, input: &[u8]) -> Result<usize> {
        let mut consumed = 0;
        while consumed < input.len() && self.state != ParseState::Finish {
            let byte = input[consumed];
            consumed += 1;
            match self.state {
                ParseState::WantVersion => {
                    if byte != SOCKS_VERSION {
                        return Err(SocksError::BadVersion(byte));
                    }
                    self.state = ParseState::WantNMethods;
                }
                ParseState::WantNMethods => {
                    if byte == 0 {
                        return Err(SocksError::NoMethods);
                    }
                    self.methods_left = byte;
                    self.state = ParseState::WantMethods;
                }
                ParseState::WantMethods => {
                    self.methods |= match byte {
                        0x00 => METHOD_NONE,
                        0x01 => METHOD_GSSAPI,
                        0x02 => METHOD_PASSWORD,
                        _ => 0,
                    };
                    self.methods_left -= 1;
                    if self.methods_left == 0 {
                        self.state = ParseState::Finish;
                    }
                }
                other => {
                    return Err(SocksError::Protocol(format!(
                        "method identification fed in state {:?}",
                        other
                    )));
                }
            }
        }
        Ok(consumed)
    }

    /// Consume request bytes: `VER | CMD | RSV | ATYP | DST.ADDR | DST.PORT`.
    ///
    /// Same contract as [`parse_method_identification`]: incremental, returns
    /// the consumed count, stops at completion.
    ///
    /// [`parse_method_identification`]: Socks5Ctx::parse_method_identification
    pub fn parse_request(&mut self, input: &[u8]) -> Result<usize> {
        let mut consumed = 0;
        while consumed < input.len() && self.state != ParseState::Finish {
            let byte = input[consumed];
            consumed += 1;
            match self.state {
                ParseState::WantReqHead => {
                    match self.head_seen {
                        0 => {
                            if byte != SOCKS_VERSION {
                                return Err(SocksError::BadVersion(byte));
                            }
                        }
                        1 => {
                            if byte != CMD_CONNECT {
                                return Err(SocksError::UnsupportedCommand(byte));
                            }
                            self.cmd = byte;
                        }
                        // RSV is ignored
                        _ => {}
                    }
                    self.head_seen += 1;
                    if self.head_seen == 3 {
                        self.state = ParseState::WantAtyp;
                    }
                }
                ParseState::WantAtyp => {
                    self.addr_len = match byte {
                        ATYP_IPV4 => 4,
                        ATYP_IPV6 => 16,
                        // The first DST.ADDR byte carries the length.
                        ATYP_DOMAIN => 0,
                        other => return Err(SocksError::BadAddressType(other)),
                    };
                    self.atyp = byte;
                    self.state = ParseState::WantDstAddr;
                }
                ParseState::WantDstAddr => {
                    if self.atyp == ATYP_DOMAIN && self.addr_len == 0 {
                        if byte == 0 {
                            return Err(SocksError::Protocol(
                                "empty domain name in request".to_string(),
                            ));
                        }
                        self.addr_len = byte as usize;
                        continue;
                    }
                    self.dst_addr[self.addr_filled] = byte;
                    self.addr_filled += 1;
                    if self.addr_filled == self.addr_len {
                        self.state = ParseState::WantDstPort;
                    }
                }
                ParseState::WantDstPort => {
                    self.port_bytes[self.port_filled] = byte;
                    self.port_filled += 1;
                    if self.port_filled == 2 {
                        self.state = ParseState::Finish;
                    }
                }
                other => {
                    return Err(SocksError::Protocol(format!(
                        "request fed in state {:?}",
                        other
                    )));
                }
            }
        }
        Ok(consumed)
    }

    /// Destination port in host order. Only meaningful once `finished()`.
    pub fn dst_port(&self) -> u16 {
        u16::from_be_bytes(self.port_bytes)
    }

    /// Decode the parsed destination address. Only meaningful once
    /// `finished()`.
    pub fn dest_addr(&self) -> Result<DestAddr> {
        match self.atyp {
            ATYP_IPV4 => {
                let mut octets = [0u8; 4];
                octets.copy_from_slice(&self.dst_addr[..4]);
                Ok(DestAddr::Ip(IpAddr::V4(Ipv4Addr::from(octets))))
            }
            ATYP_IPV6 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&self.dst_addr[..16]);
                Ok(DestAddr::Ip(IpAddr::V6(Ipv6Addr::from(octets))))
            }
            ATYP_DOMAIN => {
                let name = std::str::from_utf8(&self.dst_addr[..self.addr_filled])
                    .map_err(|err| {
                        SocksError::Protocol(format!("invalid domain name: {}", err))
                    })?;
                Ok(DestAddr::Domain(name.to_string()))
            }
            other => Err(SocksError::BadAddressType(other)),
        }
    }
}
