//! Common test utilities and helpers

use boltsocks::server::{Server, ServerConfig};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Start a proxy bound to an ephemeral localhost port, returning its address
/// and the accept-loop join handle.
pub async fn spawn_proxy() -> anyhow::Result<(SocketAddr, JoinHandle<()>)> {
    let config = ServerConfig {
        port: 0,
        ..Default::default()
    };
    let server = Server::bind(config).await?;
    let addr = server.local_addr();

    let handle = tokio::spawn(async move {
        if let Err(e) = server.serve().await {
            eprintln!("[Test Proxy] Server error: {e}");
        }
    });

    Ok((addr, handle))
}

/// Spawn a simple TCP echo server for tests, returning its address and join handle.
#[allow(dead_code)]
pub async fn spawn_tcp_echo_server() -> anyhow::Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut stream, _peer)) => {
                    tokio::spawn(async move {
                        let mut buf = [0u8; 1024];
                        loop {
                            match stream.read(&mut buf).await {
                                Ok(0) => break,
                                Ok(n) => {
                                    if stream.write_all(&buf[..n]).await.is_err() {
                                        break;
                                    }
                                }
                                Err(_) => break,
                            }
                        }
                    });
                }
                Err(e) => {
                    eprintln!("[Test Echo] Accept error: {e}");
                    break;
                }
            }
        }
    });

    Ok((addr, handle))
}

/// Run the no-authentication SOCKS5 greeting on an open proxy connection.
#[allow(dead_code)]
pub async fn greet_no_auth(stream: &mut TcpStream) -> anyhow::Result<()> {
    stream.write_all(&[0x05, 0x01, 0x00]).await?;
    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).await?;
    anyhow::ensure!(reply == [0x05, 0x00], "unexpected method reply: {reply:02x?}");
    Ok(())
}

/// Build a CONNECT request for an IPv4 target.
#[allow(dead_code)]
pub fn connect_request_v4(addr: SocketAddr) -> Vec<u8> {
    let SocketAddr::V4(v4) = addr else {
        panic!("expected an IPv4 address")
    };
    let mut request = vec![0x05, 0x01, 0x00, 0x01];
    request.extend_from_slice(&v4.ip().octets());
    request.extend_from_slice(&addr.port().to_be_bytes());
    request
}

/// Build a CONNECT request for a domain target.
#[allow(dead_code)]
pub fn connect_request_domain(host: &str, port: u16) -> Vec<u8> {
    let mut request = vec![0x05, 0x01, 0x00, 0x03, host.len() as u8];
    request.extend_from_slice(host.as_bytes());
    request.extend_from_slice(&port.to_be_bytes());
    request
}
