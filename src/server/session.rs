//! Per-connection session: handshake, upstream connect and streaming relay.

use crate::proto::{
    AUTH_NO_AUTHENTICATION, AUTH_NOT_ACCEPTABLE, DestAddr, SOCKS_VERSION, Socks5Ctx, error_reply,
    reply_code, success_reply,
};
use crate::server::listener::ServerContext;
use crate::util::{Result, SocksError, configure_tcp_stream, resolve_host_all};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{Duration, timeout};

/// Timeout for a single upstream connect attempt.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    /// Expecting the method identification greeting.
    MethodId,
    /// Expecting the CONNECT request.
    Request,
    /// Relaying bytes between client and upstream.
    Streaming,
    /// A terminal reply is in flight; the session closes once it is written.
    StreamingEnd,
}

/// One accepted client connection and, once CONNECT succeeds, its upstream
/// peer.
///
/// The session owns its two relay buffers exclusively per direction: a
/// buffer is filled by one endpoint's read and drained by the opposite
/// endpoint's write before the next read is issued, so no queueing or
/// fragmentation logic is needed and a slow receiver backpressures the
/// sender naturally.
pub struct Session {
    client: TcpStream,
    peer: SocketAddr,
    context: Arc<ServerContext>,
    state: SessionState,
    parser: Socks5Ctx,
}

impl Session {
    pub fn new(client: TcpStream, peer: SocketAddr, context: Arc<ServerContext>) -> Self {
        Self {
            client,
            peer,
            context,
            state: SessionState::MethodId,
            parser: Socks5Ctx::new(),
        }
    }

    /// Drive the session to completion. Every exit path, clean or not, ends
    /// with both endpoints shut down before the session is dropped.
    pub async fn run(mut self) -> Result<()> {
        tracing::trace!("[Session] {} opened", self.peer);

        let mut client_buf = vec![0u8; self.context.config.buffer_size];

        if !self.negotiate_method(&mut client_buf).await? {
            return Ok(());
        }

        let (dest, port) = match self.read_request(&mut client_buf).await {
            Ok(parsed) => parsed,
            Err(SocksError::ClosedByPeer) => return Err(SocksError::ClosedByPeer),
            Err(err @ (SocksError::UnsupportedCommand(_) | SocksError::BadAddressType(_))) => {
                tracing::info!("[Session] {}: request rejected: {}", self.peer, err);
                self.reject(reply_code(&err)).await;
                return Ok(());
            }
            Err(err) => {
                // Structural failures still get a mapped reply when one can
                // be delivered, but they count as session errors.
                self.reject(reply_code(&err)).await;
                return Err(err);
            }
        };

        let upstream = match self.connect_upstream(&dest, port).await {
            Ok(stream) => stream,
            Err(err) => {
                tracing::info!(
                    "[Session] {}: connect to {}:{} failed: {}",
                    self.peer,
                    dest,
                    port,
                    err
                );
                self.reject(reply_code(&err)).await;
                return Ok(());
            }
        };

        self.transition(SessionState::Streaming);
        let reply = success_reply(self.context.bound);
        self.client.write_all(&reply).await?;

        self.relay(upstream, client_buf).await
    }

    fn transition(&mut self, next: SessionState) {
        tracing::trace!(
            "[Session] {} state {:?} -> {:?}",
            self.peer,
            self.state,
            next
        );
        self.state = next;
    }

    /// METHOD_ID phase: parse the greeting and answer with the selected
    /// method, or 0xFF when NO AUTHENTICATION was not offered. Returns
    /// `false` when the greeting was answered with 0xFF and the session is
    /// over.
    async fn negotiate_method(&mut self, buf: &mut [u8]) -> Result<bool> {
        while !self.parser.finished() {
            let n = self.client.read(buf).await?;
            if n == 0 {
                return Err(SocksError::ClosedByPeer);
            }
            let consumed = self.parser.parse_method_identification(&buf[..n])?;
            if consumed < n {
                tracing::trace!(
                    "[Session] {}: {} bytes past the greeting discarded",
                    self.peer,
                    n - consumed
                );
            }
        }

        if !self.parser.offers_no_auth() {
            tracing::info!(
                "[Session] {}: no acceptable authentication method",
                self.peer
            );
            self.transition(SessionState::StreamingEnd);
            self.client
                .write_all(&[SOCKS_VERSION, AUTH_NOT_ACCEPTABLE])
                .await?;
            let _ = self.client.shutdown().await;
            return Ok(false);
        }

        self.client
            .write_all(&[SOCKS_VERSION, AUTH_NO_AUTHENTICATION])
            .await?;
        self.transition(SessionState::Request);
        self.parser.begin_request();
        Ok(true)
    }

    /// REQUEST phase: parse the CONNECT request and decode its destination.
    async fn read_request(&mut self, buf: &mut [u8]) -> Result<(DestAddr, u16)> {
        while !self.parser.finished() {
            let n = self.client.read(buf).await?;
            if n == 0 {
                return Err(SocksError::ClosedByPeer);
            }
            let consumed = self.parser.parse_request(&buf[..n])?;
            if consumed < n {
                tracing::trace!(
                    "[Session] {}: {} bytes past the request discarded",
                    self.peer,
                    n - consumed
                );
            }
        }

        let dest = self.parser.dest_addr()?;
        Ok((dest, self.parser.dst_port()))
    }

    /// Resolve the destination when needed and connect, walking the address
    /// list in order. The first successful connect wins; the last failure is
    /// what the client hears about.
    async fn connect_upstream(&mut self, dest: &DestAddr, port: u16) -> Result<TcpStream> {
        let addresses: Vec<SocketAddr> = match dest {
            DestAddr::Ip(ip) => vec![SocketAddr::new(*ip, port)],
            DestAddr::Domain(name) => resolve_host_all(name, port).await?,
        };

        let target = format!("{}:{}", dest, port);
        let mut last_err: Option<io::Error> = None;
        for addr in &addresses {
            match timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => {
                    configure_tcp_stream(&stream, self.context.config.keepalive_idle)?;
                    tracing::info!(
                        "[Session] {} -> {} connected via {}",
                        self.peer,
                        target,
                        addr
                    );
                    return Ok(stream);
                }
                Ok(Err(err)) => {
                    tracing::warn!("[Session] {}: connect {} failed: {}", self.peer, addr, err);
                    last_err = Some(err);
                }
                Err(_) => {
                    tracing::warn!(
                        "[Session] {}: connect {} timed out after {}s",
                        self.peer,
                        addr,
                        CONNECT_TIMEOUT.as_secs()
                    );
                    last_err = Some(io::Error::new(io::ErrorKind::TimedOut, "connect timeout"));
                }
            }
        }

        Err(match last_err {
            Some(err) => SocksError::Io(err),
            None => SocksError::Resolve(format!("no address for {}", target)),
        })
    }

    /// Send the mapped error reply, then close. Failing to deliver the reply
    /// is not an error in itself; the peer may already be gone.
    async fn reject(&mut self, rep: u8) {
        self.transition(SessionState::StreamingEnd);
        let reply = error_reply(rep);
        if let Err(err) = self.client.write_all(&reply).await {
            tracing::trace!(
                "[Session] {}: error reply not delivered: {}",
                self.peer,
                err
            );
        }
        let _ = self.client.shutdown().await;
    }

    /// STREAMING phase: full-duplex relay with a half-duplex interlock per
    /// direction. Either direction finishing, cleanly or not, ends the whole
    /// session.
    async fn relay(self, mut upstream: TcpStream, mut client_buf: Vec<u8>) -> Result<()> {
        let Session {
            mut client,
            peer,
            context,
            ..
        } = self;
        let mut upstream_buf = vec![0u8; context.config.buffer_size];

        let (direction, result) = {
            let (mut client_read, mut client_write) = client.split();
            let (mut upstream_read, mut upstream_write) = upstream.split();

            let client_to_upstream =
                copy_direction(&mut client_read, &mut upstream_write, &mut client_buf);
            let upstream_to_client =
                copy_direction(&mut upstream_read, &mut client_write, &mut upstream_buf);

            tokio::select! {
                r = client_to_upstream => ("client->upstream", r),
                r = upstream_to_client => ("upstream->client", r),
            }
        };

        match &result {
            Ok(bytes) => tracing::debug!(
                "[Session] {}: {} finished after {} bytes",
                peer,
                direction,
                bytes
            ),
            Err(err) => tracing::debug!("[Session] {}: {} failed: {}", peer, direction, err),
        }

        // Both relay futures are gone at this point; nothing else can touch
        // the endpoints or the buffers while they are torn down.
        let _ = client.shutdown().await;
        let _ = upstream.shutdown().await;
        tracing::trace!("[Session] {} closed", peer);

        result.map(|_| ()).map_err(SocksError::Io)
    }
}

/// Move bytes one way until EOF or error, one read/write cycle at a time.
/// The buffer belongs to the read until the read returns, then to the write
/// until `write_all` returns; only then is the next read issued.
async fn copy_direction<R, W>(reader: &mut R, writer: &mut W, buf: &mut [u8]) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut total = 0u64;
    loop {
        let n = reader.read(buf).await?;
        if n == 0 {
            return Ok(total);
        }
        writer.write_all(&buf[..n]).await?;
        total += n as u64;
    }
}
