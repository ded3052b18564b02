//! End-to-end relay behavior through the proxy.

mod common;

use anyhow::Result;
use common::{
    connect_request_domain, connect_request_v4, greet_no_auth, spawn_proxy, spawn_tcp_echo_server,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{Duration, sleep, timeout};

#[tokio::test]
async fn connect_ipv4_relays_both_directions() -> Result<()> {
    let (echo, _echo_task) = spawn_tcp_echo_server().await?;
    let (proxy, _server) = spawn_proxy().await?;

    let mut stream = TcpStream::connect(proxy).await?;
    greet_no_auth(&mut stream).await?;

    stream.write_all(&connect_request_v4(echo)).await?;

    let mut reply = [0u8; 10];
    timeout(Duration::from_secs(5), stream.read_exact(&mut reply)).await??;
    assert_eq!(reply[0], 0x05);
    assert_eq!(reply[1], 0x00, "connect reply error code {}", reply[1]);
    assert_eq!(reply[3], 0x01, "expected an IPv4 bound address");
    assert_eq!(&reply[4..8], &[127, 0, 0, 1]);
    let bnd_port = u16::from_be_bytes([reply[8], reply[9]]);
    assert_eq!(bnd_port, proxy.port(), "BND.PORT must be the listen port");

    // Multiple exchanges over the same session.
    for payload in [&b"hello through the proxy"[..], &b"second message"[..]] {
        stream.write_all(payload).await?;
        let mut got = vec![0u8; payload.len()];
        timeout(Duration::from_secs(5), stream.read_exact(&mut got)).await??;
        assert_eq!(got, payload);
    }
    Ok(())
}

#[tokio::test]
async fn connect_domain_relays() -> Result<()> {
    let (echo, _echo_task) = spawn_tcp_echo_server().await?;
    let (proxy, _server) = spawn_proxy().await?;

    let mut stream = TcpStream::connect(proxy).await?;
    greet_no_auth(&mut stream).await?;

    stream
        .write_all(&connect_request_domain("localhost", echo.port()))
        .await?;

    let mut reply = [0u8; 10];
    timeout(Duration::from_secs(10), stream.read_exact(&mut reply)).await??;
    assert_eq!(reply[1], 0x00, "connect reply error code {}", reply[1]);

    stream.write_all(b"ping over a domain connect").await?;
    let mut got = [0u8; 26];
    timeout(Duration::from_secs(5), stream.read_exact(&mut got)).await??;
    assert_eq!(&got[..], b"ping over a domain connect");
    Ok(())
}

#[tokio::test]
async fn fragmented_request_parses_like_whole() -> Result<()> {
    let (echo, _echo_task) = spawn_tcp_echo_server().await?;
    let (proxy, _server) = spawn_proxy().await?;

    let mut stream = TcpStream::connect(proxy).await?;
    greet_no_auth(&mut stream).await?;

    for byte in connect_request_v4(echo) {
        stream.write_all(&[byte]).await?;
        stream.flush().await?;
        sleep(Duration::from_millis(10)).await;
    }

    let mut reply = [0u8; 10];
    timeout(Duration::from_secs(5), stream.read_exact(&mut reply)).await??;
    assert_eq!(reply[1], 0x00, "connect reply error code {}", reply[1]);

    stream.write_all(b"fragmented handshake, whole relay").await?;
    let mut got = [0u8; 33];
    timeout(Duration::from_secs(5), stream.read_exact(&mut got)).await??;
    assert_eq!(&got[..], b"fragmented handshake, whole relay");
    Ok(())
}

#[tokio::test]
async fn upstream_initiated_bytes_reach_client() -> Result<()> {
    // Upstream that talks first, like an SMTP banner.
    let banner_listener = TcpListener::bind("127.0.0.1:0").await?;
    let banner_addr = banner_listener.local_addr()?;
    let _banner_task = tokio::spawn(async move {
        while let Ok((mut socket, _)) = banner_listener.accept().await {
            let _ = socket.write_all(b"220 ready\r\n").await;
            let _ = socket.shutdown().await;
        }
    });

    let (proxy, _server) = spawn_proxy().await?;
    let mut stream = TcpStream::connect(proxy).await?;
    greet_no_auth(&mut stream).await?;

    stream.write_all(&connect_request_v4(banner_addr)).await?;

    let mut reply = [0u8; 10];
    timeout(Duration::from_secs(5), stream.read_exact(&mut reply)).await??;
    assert_eq!(reply[1], 0x00, "connect reply error code {}", reply[1]);

    // The banner arrives without the client sending a single payload byte.
    let mut banner = [0u8; 11];
    timeout(Duration::from_secs(5), stream.read_exact(&mut banner)).await??;
    assert_eq!(&banner[..], b"220 ready\r\n");
    Ok(())
}

#[tokio::test]
async fn large_transfer_is_relayed_verbatim() -> Result<()> {
    let (echo, _echo_task) = spawn_tcp_echo_server().await?;
    let (proxy, _server) = spawn_proxy().await?;

    let mut stream = TcpStream::connect(proxy).await?;
    greet_no_auth(&mut stream).await?;

    stream.write_all(&connect_request_v4(echo)).await?;
    let mut reply = [0u8; 10];
    timeout(Duration::from_secs(5), stream.read_exact(&mut reply)).await??;
    assert_eq!(reply[1], 0x00, "connect reply error code {}", reply[1]);

    // Well past the 2048-byte relay buffers, so the session has to cycle
    // read/write many times in both directions.
    let payload: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();
    let expected = payload.clone();

    let (mut read_half, mut write_half) = stream.split();
    let writer = async move {
        write_half.write_all(&payload).await?;
        write_half.flush().await?;
        Ok::<_, std::io::Error>(())
    };
    let reader = async move {
        let mut got = vec![0u8; expected.len()];
        read_half.read_exact(&mut got).await?;
        Ok::<_, std::io::Error>(got)
    };

    let (write_result, got) =
        timeout(Duration::from_secs(30), async { tokio::join!(writer, reader) }).await?;
    write_result?;
    assert_eq!(got?, (0..64 * 1024).map(|i| (i % 251) as u8).collect::<Vec<u8>>());
    Ok(())
}
