use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{forward, IngestCounters};
use crate::bus::Publish;
use crate::codec::{decode_datagram, Transport};
use crate::config::bind_addr;

/// Largest datagram read in one call (Ethernet MTU minus IP/UDP headers).
const MAX_DATAGRAM: usize = 1472;

/// Listener for raw float datagrams.
pub struct UdpListener {
    socket: UdpSocket,
    counters: IngestCounters,
}

impl UdpListener {
    /// Bind `addr`; ":port" binds all interfaces.
    pub async fn bind(addr: &str, counters: IngestCounters) -> Result<Self> {
        let addr = bind_addr(addr);
        let socket = UdpSocket::bind(&addr)
            .await
            .with_context(|| format!("binding udp socket {addr}"))?;

        Ok(Self { socket, counters })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr().context("getting udp local address")
    }

    /// Receive and forward datagrams until cancelled. The socket is closed
    /// when this returns.
    pub async fn run(self, ctx: CancellationToken, bus: &impl Publish) -> Result<()> {
        let mut buf = [0u8; MAX_DATAGRAM];
        info!(addr = ?self.socket.local_addr().ok(), "udp listener started");

        loop {
            tokio::select! {
                biased;
                _ = ctx.cancelled() => {
                    debug!("udp listener stopped");
                    return Ok(());
                }
                received = self.socket.recv_from(&mut buf) => {
                    let (n, peer) = received.context("reading udp datagram")?;
                    debug!(%peer, bytes = n, "udp datagram");
                    forward(Transport::Udp, decode_datagram(&buf[..n]), bus, &self.counters);
                }
            }
        }
    }
}
