//! Listener: bind-host resolution, socket setup and the accept loop.

use crate::server::session::Session;
use crate::util::{Result, SocksError, configure_tcp_stream};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, lookup_host};
use tracing::{Instrument, info_span};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host name or address to bind.
    pub host: String,
    /// Listen port.
    pub port: u16,
    /// Listen backlog.
    pub backlog: i32,
    /// TCP keep-alive idle period applied to both session endpoints.
    pub keepalive_idle: Duration,
    /// Per-direction relay buffer size in bytes.
    pub buffer_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8789,
            backlog: 256,
            keepalive_idle: Duration::from_secs(60),
            buffer_size: 2048,
        }
    }
}

/// Read-only state shared with every session after startup.
pub struct ServerContext {
    pub config: ServerConfig,
    /// Address the listener actually bound. Echoed back to clients in the
    /// CONNECT success reply as `BND.ADDR`/`BND.PORT`.
    pub bound: SocketAddr,
}

/// SOCKS5 proxy server.
pub struct Server {
    listener: TcpListener,
    context: Arc<ServerContext>,
}

impl Server {
    /// Resolve the bind host and bind+listen on the first address that
    /// accepts it. Resolution failure or exhausting every candidate is a
    /// fatal startup error.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let candidates: Vec<SocketAddr> = lookup_host((config.host.as_str(), config.port))
            .await
            .map_err(|err| {
                SocksError::Config(format!(
                    "cannot resolve bind host {}: {}",
                    config.host, err
                ))
            })?
            .collect();

        let mut last_err = None;
        for addr in candidates {
            match bind_and_listen(addr, config.backlog) {
                Ok(listener) => {
                    let bound = listener.local_addr()?;
                    tracing::info!("[Server] Listening on {}", bound);
                    return Ok(Self {
                        listener,
                        context: Arc::new(ServerContext { config, bound }),
                    });
                }
                Err(err) => {
                    tracing::warn!("[Server] Failed to bind {}: {}", addr, err);
                    last_err = Some(err);
                }
            }
        }

        Err(match last_err {
            Some(err) => SocksError::Io(err),
            None => SocksError::Config(format!(
                "bind host {} resolved to no addresses",
                config.host
            )),
        })
    }

    /// Address the listener bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.context.bound
    }

    /// Accept connections forever, one session per client.
    pub async fn serve(&self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    tracing::trace!("[Server] New connection from {}", peer);

                    if let Err(err) =
                        configure_tcp_stream(&stream, self.context.config.keepalive_idle)
                    {
                        tracing::warn!("[Server] Dropping {}: TCP setup failed: {}", peer, err);
                        continue;
                    }

                    let session = Session::new(stream, peer, Arc::clone(&self.context));
                    let span = info_span!("socks.session", peer_addr = %peer);
                    tokio::spawn(
                        async move {
                            match session.run().await {
                                Ok(()) => {}
                                Err(SocksError::ClosedByPeer) => {
                                    tracing::trace!("[Session] {} closed by peer", peer);
                                }
                                Err(err) => {
                                    tracing::error!("[Session] {}: {}", peer, err);
                                }
                            }
                        }
                        .instrument(span),
                    );
                }
                Err(err) => {
                    tracing::error!("[Server] Accept error: {}", err);
                }
            }
        }
    }
}

fn bind_and_listen(addr: SocketAddr, backlog: i32) -> std::io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;
    TcpListener::from_std(socket.into())
}
