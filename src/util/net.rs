//! Network-related utilities (TCP tuning)

use std::time::Duration;
use tokio::net::TcpStream;

/// Enable TCP_NODELAY and keep-alive on an endpoint.
///
/// Applied to both sides of a session; the keep-alive idle period comes from
/// server configuration and is the sole liveness mechanism for idle relays.
pub fn configure_tcp_stream(stream: &TcpStream, keepalive_idle: Duration) -> std::io::Result<()> {
    stream.set_nodelay(true)?;

    #[cfg(any(unix, windows))]
    {
        use socket2::{SockRef, TcpKeepalive};

        let keepalive = TcpKeepalive::new()
            .with_time(keepalive_idle)
            .with_interval(Duration::from_secs(30));

        SockRef::from(stream).set_tcp_keepalive(&keepalive)?;
    }

    Ok(())
}
