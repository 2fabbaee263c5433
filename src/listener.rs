//! ==============================================================================
//! listener.rs - device-facing tcp accept loop
//! ==============================================================================
//!
//! purpose:
//!     binds the ingestion port and hands every accepted connection to its
//!     own ConnectionSession task. the accept loop never waits on session
//!     work.
//!
//! limits:
//!     max_sessions (optional) caps concurrent sessions. connections past
//!     the cap are closed right after accept and never counted as active.
//!     idle_timeout (optional) is passed through to each session.
//!
//! failure:
//!     bind and accept errors are returned to the caller, which treats them
//!     as fatal. session errors never reach this loop.
//!
//! ==============================================================================

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::config::ListenerConfig;
use crate::registry::ConnectionRegistry;
use crate::session::{ConnectionSession, SessionContext};
use crate::store::SharedStore;

const BACKLOG: u32 = 1024;

pub struct IngestionListener {
    listener: TcpListener,
    ctx: Arc<SessionContext>,
    slots: Option<Arc<Semaphore>>,
}

impl IngestionListener {
    /// bind with address reuse so a restarted process can rebind promptly
    pub async fn bind(
        config: &ListenerConfig,
        store: Option<SharedStore>,
        show_sensor_data: bool,
    ) -> Result<Self> {
        let addr = SocketAddr::new(resolve_host(&config.host)?, config.port);

        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4(),
            SocketAddr::V6(_) => TcpSocket::new_v6(),
        }
        .context("failed to create listener socket")?;
        socket.set_reuseaddr(true).context("failed to set SO_REUSEADDR")?;
        socket
            .bind(addr)
            .with_context(|| format!("failed to bind ingestion listener on {}", addr))?;
        let listener = socket.listen(BACKLOG).context("failed to listen")?;

        let ctx = Arc::new(SessionContext {
            store,
            registry: ConnectionRegistry::new(),
            idle_timeout: config.idle_timeout_seconds.map(Duration::from_secs),
            show_sensor_data,
        });

        Ok(Self {
            listener,
            ctx,
            slots: config.max_sessions.map(|n| Arc::new(Semaphore::new(n))),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// address devices should dial
    ///
    /// a wildcard bind reports the outward-facing ip instead of 0.0.0.0.
    pub fn device_endpoint(&self) -> Result<SocketAddr> {
        let addr = self.local_addr()?;
        if addr.ip().is_unspecified() {
            return Ok(SocketAddr::new(local_ip(), addr.port()));
        }
        Ok(addr)
    }

    /// shared handle for observability (health endpoint, tests)
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.ctx.registry.clone()
    }

    pub fn active_connections(&self) -> usize {
        self.ctx.registry.current()
    }

    /// accept forever; only returns on an accept failure
    pub async fn run(self) -> Result<()> {
        info!(addr = %self.local_addr()?, "listening for devices");

        loop {
            let (stream, peer) = self.listener.accept().await.context("accept failed")?;

            let permit = match &self.slots {
                Some(slots) => match slots.clone().try_acquire_owned() {
                    Ok(permit) => Some(permit),
                    Err(_) => {
                        warn!(
                            %peer,
                            active = self.active_connections(),
                            "session limit reached, rejecting connection"
                        );
                        drop(stream);
                        continue;
                    }
                },
                None => None,
            };

            let session = ConnectionSession::new(stream, peer, self.ctx.clone());
            tokio::spawn(async move {
                session.run().await;
                drop(permit);
            });
        }
    }
}

/// "auto" picks the outward-facing interface, anything else must be an ip
pub fn resolve_host(host: &str) -> Result<IpAddr> {
    if host.eq_ignore_ascii_case("auto") {
        return Ok(local_ip());
    }
    host.parse()
        .with_context(|| format!("invalid listener host '{}'", host))
}

/// ip of the interface that routes to the outside world
///
/// connecting a udp socket only selects a route, nothing is sent.
pub fn local_ip() -> IpAddr {
    let route = || -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect(("8.8.8.8", 80))?;
        Ok(socket.local_addr()?.ip())
    };

    match route() {
        Ok(ip) => ip,
        Err(e) => {
            let fallback = IpAddr::V4(Ipv4Addr::LOCALHOST);
            warn!(error = %e, %fallback, "could not determine local ip");
            fallback
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn loopback(max_sessions: Option<usize>) -> ListenerConfig {
        ListenerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            max_sessions,
            idle_timeout_seconds: None,
        }
    }

    async fn wait_for_active(registry: &ConnectionRegistry, expected: usize) {
        for _ in 0..200 {
            if registry.current() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("active count stuck at {}, expected {}", registry.current(), expected);
    }

    #[test]
    fn test_resolve_host() {
        assert_eq!(resolve_host("127.0.0.1").unwrap(), IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert!(resolve_host("not-an-ip").is_err());
        // always yields something bindable-looking, even offline
        let _ = resolve_host("AUTO").unwrap();
    }

    #[tokio::test]
    async fn test_device_endpoint() {
        let listener = IngestionListener::bind(&loopback(None), None, false).await.unwrap();
        let bound = listener.local_addr().unwrap();
        assert_eq!(listener.device_endpoint().unwrap(), bound);

        let mut wildcard = loopback(None);
        wildcard.host = "0.0.0.0".to_string();
        let listener = IngestionListener::bind(&wildcard, None, false).await.unwrap();
        let endpoint = listener.device_endpoint().unwrap();
        assert!(!endpoint.ip().is_unspecified());
        assert_eq!(endpoint.port(), listener.local_addr().unwrap().port());
    }

    #[tokio::test]
    async fn test_rejects_beyond_limit() {
        let listener = IngestionListener::bind(&loopback(Some(1)), None, false).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let registry = listener.registry();
        tokio::spawn(listener.run());

        let mut first = TcpStream::connect(addr).await.unwrap();
        wait_for_active(&registry, 1).await;

        // second peer is closed straight away
        let mut second = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 64];
        let n = second.read(&mut buf).await.unwrap_or(0);
        assert_eq!(n, 0);
        assert_eq!(registry.current(), 1);

        first.write_all(b"1!2").await.unwrap();
        let n = first.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"Msg received (DB not connected)");

        drop(first);
        wait_for_active(&registry, 0).await;

        // slot is free again
        let _third = TcpStream::connect(addr).await.unwrap();
        wait_for_active(&registry, 1).await;
    }

    #[tokio::test]
    async fn test_concurrent_sessions_return_counter_to_zero() {
        let listener = IngestionListener::bind(&loopback(None), None, false).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let registry = listener.registry();
        tokio::spawn(listener.run());

        let mut clients = Vec::new();
        for _ in 0..32 {
            clients.push(TcpStream::connect(addr).await.unwrap());
        }
        wait_for_active(&registry, 32).await;

        let closers: Vec<_> = clients
            .into_iter()
            .enumerate()
            .map(|(i, mut stream)| {
                tokio::spawn(async move {
                    if i % 2 == 0 {
                        stream.write_all(b"!DISCONNECT").await.unwrap();
                    }
                    drop(stream);
                })
            })
            .collect();
        for closer in closers {
            closer.await.unwrap();
        }

        wait_for_active(&registry, 0).await;
    }
}
