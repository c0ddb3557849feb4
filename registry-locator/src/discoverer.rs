use std::net::{Ipv4Addr, SocketAddr};

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use shared::protocol::{Beacon, DISCOVERY_PORT, MULTICAST_GROUP};
use shared::types::BackendRecord;

/// Passive beacon listener. Owns one receiving socket and one listen task;
/// every valid beacon becomes a [`BackendRecord`] on the channel handed to
/// [`Discoverer::start`].
pub struct Discoverer {
    listen: SocketAddr,
    group: Option<Ipv4Addr>,
    running: Option<Running>,
}

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    local: SocketAddr,
}

impl Default for Discoverer {
    fn default() -> Self {
        Self::new()
    }
}

impl Discoverer {
    /// Listen on the well-known discovery port and join the shared
    /// multicast group.
    pub fn new() -> Self {
        Self::with_listen(
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, DISCOVERY_PORT)),
            Some(MULTICAST_GROUP),
        )
    }

    /// Listen on an explicit address, joining `group` if given. Used by
    /// tests and broadcast-only networks.
    pub fn with_listen(listen: SocketAddr, group: Option<Ipv4Addr>) -> Self {
        Self {
            listen,
            group,
            running: None,
        }
    }

    /// Bind the socket and begin delivering records on `tx`. Returns the
    /// bound local address. Calling while already listening is a no-op
    /// and returns the existing address; `tx` is dropped in that case.
    ///
    /// Bind failure propagates - the component is non-functional until the
    /// operator fixes it. A multicast join failure only logs a warning:
    /// the listener may still see broadcast traffic.
    pub async fn start(&mut self, tx: mpsc::Sender<BackendRecord>) -> Result<SocketAddr> {
        if let Some(running) = self.running.take() {
            if !running.cancel.is_cancelled() {
                tracing::debug!("discoverer already running");
                let local = running.local;
                self.running = Some(running);
                return Ok(local);
            }
            // The listen task died on a socket error; reap it and rebind.
            let _ = running.task.await;
        }

        let socket = UdpSocket::bind(self.listen)
            .await
            .with_context(|| format!("Failed to bind discovery socket on {}", self.listen))?;

        let local = socket
            .local_addr()
            .context("Failed to read discovery socket address")?;

        if let Some(group) = self.group {
            if let Err(e) = socket.join_multicast_v4(group, Ipv4Addr::UNSPECIFIED) {
                tracing::warn!(
                    "failed to join multicast group {}: {} (broadcast-only mode)",
                    group,
                    e
                );
            }
        }

        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            listen_loop(socket, tx, task_cancel.clone()).await;
            // Mark this instance stopped so the next start() rebinds.
            task_cancel.cancel();
        });

        tracing::info!("listening for backend beacons on {}", local);
        self.running = Some(Running {
            cancel,
            task,
            local,
        });
        Ok(local)
    }

    /// Leave the group, close the socket, and join the listen task. No
    /// record is delivered after this returns. Calling while stopped is a
    /// no-op.
    pub async fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            running.cancel.cancel();
            let _ = running.task.await;
            tracing::info!("discovery listener stopped");
        }
    }
}

async fn listen_loop(
    socket: UdpSocket,
    tx: mpsc::Sender<BackendRecord>,
    cancel: CancellationToken,
) {
    // Beacons are well under 100 bytes; anything larger is foreign traffic
    // and fails validation after truncation.
    let mut buf = [0u8; 512];

    loop {
        tokio::select! {
            inbound = socket.recv_from(&mut buf) => {
                match inbound {
                    Ok((len, source)) => match Beacon::decode(&buf[..len]) {
                        Ok(beacon) => {
                            let record = BackendRecord::observed(&beacon, source);
                            // A full, undrained channel parks send(); stop()
                            // must still be able to cancel us mid-delivery.
                            tokio::select! {
                                sent = tx.send(record) => {
                                    if sent.is_err() {
                                        // Host dropped its receiver; nothing left to do.
                                        break;
                                    }
                                }
                                _ = cancel.cancelled() => break,
                            }
                        }
                        // Shared-network noise, expected and frequent.
                        Err(e) => tracing::debug!("ignoring datagram from {}: {}", source, e),
                    },
                    Err(e) => {
                        tracing::warn!("discovery socket error: {}", e);
                        break;
                    }
                }
            }
            _ = cancel.cancelled() => break,
        }
    }
}
