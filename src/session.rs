//! ==============================================================================
//! session.rs - one device connection
//! ==============================================================================
//!
//! lifecycle:
//!
//! ```text
//!     CONNECTED ──► RECEIVING ⇄ PROCESSING ──► CLOSING ──► CLOSED
//!
//!     the session leaves RECEIVING for exactly one reason (SessionEnd):
//!     peer closed, disconnect token, idle timeout, connection lost, or an
//!     unexpected fault. teardown always runs once: the stream is shut
//!     down and the ActiveGuard releases the registry slot when dropped.
//! ```
//!
//! per message:
//!     read one chunk -> classify -> parse -> persist -> ack.
//!     parse and persistence failures are reported to the peer and the
//!     session keeps going.
//!
//! relationships:
//!     - spawned by: listener.rs (one task per accepted connection)
//!     - uses: protocol.rs, store.rs, registry.rs
//!
//! ==============================================================================

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info, warn};

use crate::domain::Reading;
use crate::protocol::{self, Ack, Inbound, Measurement};
use crate::registry::ConnectionRegistry;
use crate::store::SharedStore;

/// state shared by every session the listener spawns
pub struct SessionContext {
    /// None when persistence is unavailable
    pub store: Option<SharedStore>,
    pub registry: Arc<ConnectionRegistry>,
    pub idle_timeout: Option<Duration>,
    pub show_sensor_data: bool,
}

/// why a session stopped receiving
#[derive(Debug)]
pub enum SessionEnd {
    PeerClosed,
    Disconnect,
    IdleTimeout,
    ConnectionLost(io::Error),
    Fault(io::Error),
}

impl SessionEnd {
    fn from_io(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => SessionEnd::ConnectionLost(e),
            _ => SessionEnd::Fault(e),
        }
    }
}

/// holds one registry slot for the lifetime of a session
struct ActiveGuard {
    registry: Arc<ConnectionRegistry>,
    peer: SocketAddr,
}

impl ActiveGuard {
    fn acquire(registry: Arc<ConnectionRegistry>, peer: SocketAddr) -> Self {
        let active = registry.increment();
        info!(%peer, active, "new connection");
        Self { registry, peer }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let active = self.registry.decrement();
        info!(peer = %self.peer, active, "disconnected");
    }
}

pub struct ConnectionSession<S> {
    stream: S,
    peer: SocketAddr,
    ctx: Arc<SessionContext>,
    _guard: ActiveGuard,
}

impl<S> ConnectionSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// registers the connection; it counts as active from here on
    pub fn new(stream: S, peer: SocketAddr, ctx: Arc<SessionContext>) -> Self {
        let _guard = ActiveGuard::acquire(ctx.registry.clone(), peer);
        Self { stream, peer, ctx, _guard }
    }

    /// receive until the session ends, then tear down
    pub async fn run(mut self) -> SessionEnd {
        let end = self.receive_loop().await;

        match &end {
            SessionEnd::PeerClosed => info!(peer = %self.peer, "connection closed by client"),
            SessionEnd::Disconnect => info!(peer = %self.peer, "client requested disconnect"),
            SessionEnd::IdleTimeout => warn!(peer = %self.peer, "idle timeout, closing session"),
            SessionEnd::ConnectionLost(e) => {
                warn!(peer = %self.peer, error = %e, "connection reset by peer")
            }
            SessionEnd::Fault(e) => {
                error!(peer = %self.peer, error = %e, "unexpected error with client")
            }
        }

        if let Err(e) = self.stream.shutdown().await {
            debug!(peer = %self.peer, error = %e, "shutdown after session end failed");
        }
        end
    }

    async fn receive_loop(&mut self) -> SessionEnd {
        let mut buf = [0u8; protocol::RECV_CHUNK];

        loop {
            let n = match self.receive(&mut buf).await {
                Ok(Some(n)) => n,
                Ok(None) => return SessionEnd::IdleTimeout,
                Err(e) => return SessionEnd::from_io(e),
            };
            if n == 0 {
                return SessionEnd::PeerClosed;
            }

            let text = String::from_utf8_lossy(&buf[..n]);
            let payload = match protocol::classify(&text) {
                Inbound::Empty => {
                    debug!(peer = %self.peer, "received empty message, ignoring");
                    continue;
                }
                Inbound::Disconnect => return SessionEnd::Disconnect,
                Inbound::Payload(payload) => payload,
            };

            info!(peer = %self.peer, msg = payload, "received");
            let ack = self.process(payload).await;

            if let Err(e) = self.stream.write_all(ack.to_string().as_bytes()).await {
                return SessionEnd::from_io(e);
            }
        }
    }

    /// Ok(None) when the idle timeout elapsed before any bytes arrived
    async fn receive(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        match self.ctx.idle_timeout {
            Some(limit) => match tokio::time::timeout(limit, self.stream.read(buf)).await {
                Ok(read) => read.map(Some),
                Err(_) => Ok(None),
            },
            None => self.stream.read(buf).await.map(Some),
        }
    }

    async fn process(&self, payload: &str) -> Ack {
        let Measurement { temperature, humidity } = match protocol::parse_payload(payload) {
            Ok(m) => m,
            Err(reason) => {
                warn!(peer = %self.peer, msg = payload, %reason, "data parsing error");
                return Ack::InvalidFormat(reason);
            }
        };

        let Some(store) = self.ctx.store.clone() else {
            debug!(peer = %self.peer, "store not connected, reading not persisted");
            return Ack::NotPersisted;
        };

        let reading = Reading::received_now(
            temperature,
            humidity,
            self.peer.ip().to_string(),
            self.peer.port(),
        );

        // offload blocking io to dedicated thread
        match tokio::task::spawn_blocking(move || store.insert(reading)).await {
            Ok(Ok(())) => {
                if self.ctx.show_sensor_data {
                    info!(peer = %self.peer, "saved: Temp={}°C, Hum={}%", temperature, humidity);
                } else {
                    debug!(peer = %self.peer, "saved: Temp={}°C, Hum={}%", temperature, humidity);
                }
                Ack::Saved
            }
            Ok(Err(e)) => {
                error!(peer = %self.peer, msg = payload, error = %e, "store insert failed");
                Ack::SaveFailed
            }
            Err(e) => {
                error!(peer = %self.peer, msg = payload, error = %e, "store insert task failed");
                Ack::SaveFailed
            }
        }
    }
}
