//! Answers LAN discovery probes on the discovery port.

use std::net::{IpAddr, SocketAddr};

use anyhow::{Context, Result};
use flashforge::discovery::{is_discovery_request, DiscoveryReply};
use tokio::{net::UdpSocket, task::JoinHandle};

use crate::{net, state::SharedState};

/// A running discovery responder.
#[derive(Debug)]
pub struct DiscoveryResponder {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl DiscoveryResponder {
    /// Bind the discovery port and start answering.
    pub async fn start(bind: SocketAddr, state: SharedState) -> Result<Self> {
        let socket = UdpSocket::bind(bind)
            .await
            .with_context(|| format!("binding discovery port {bind}"))?;
        let local_addr = socket.local_addr()?;
        tracing::info!(addr = %local_addr, "discovery responder listening");

        let task = tokio::spawn(respond(socket, state));
        Ok(DiscoveryResponder { local_addr, task })
    }

    /// The bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Close the socket.
    pub fn stop(self) {
        self.task.abort();
        tracing::info!(addr = %self.local_addr, "discovery responder stopped");
    }
}

/// Whether this instance should answer `peer`. On a multi-homed host several
/// emulators can share the port, each answering only on its own interface.
pub fn answers_for(configured: IpAddr, peer: IpAddr) -> bool {
    if configured.is_unspecified() {
        return true;
    }
    answers_via(configured, net::local_address_for(peer))
}

/// Decide from the local address the OS routes the reply through. When the
/// route cannot be resolved the probe is answered anyway.
fn answers_via(configured: IpAddr, route: Option<IpAddr>) -> bool {
    match route {
        Some(local) => local == configured,
        None => true,
    }
}

async fn respond(socket: UdpSocket, state: SharedState) {
    let mut buf = [0u8; 1536];

    loop {
        let (n, peer) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(err) => {
                // ICMP port-unreachable from an earlier reply surfaces here on some platforms.
                tracing::debug!(error = %err, "discovery receive failed");
                continue;
            }
        };

        if !is_discovery_request(&buf[..n]) {
            tracing::trace!(peer = %peer, len = n, "ignoring non-discovery datagram");
            continue;
        }

        let reply = {
            let state = state.lock().await;
            if !state.discovery_enabled {
                continue;
            }
            if !answers_for(state.identity.ip_address, peer.ip()) {
                tracing::debug!(peer = %peer, "probe arrived on another interface, ignoring");
                continue;
            }
            DiscoveryReply {
                name: state.identity.name.clone(),
                serial_number: state.identity.serial_number.clone(),
            }
        };

        match socket.send_to(&reply.encode(), peer).await {
            Ok(_) => tracing::info!(peer = %peer, "answered discovery probe"),
            Err(err) => tracing::warn!(peer = %peer, error = %err, "discovery reply failed"),
        }
    }
}
