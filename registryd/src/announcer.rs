use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use shared::protocol::{Beacon, MULTICAST_TTL};

/// Periodic beacon sender. One instance owns one socket and one timer task.
///
/// The desktop shell has no configuration pointing at this daemon; the
/// beacon is how it finds us. The payload carries only the API port - the
/// receiver takes our address from the datagram itself.
pub struct Announcer {
    target: SocketAddr,
    interval: Duration,
    api_port: u16,
    running: Option<Running>,
}

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Announcer {
    pub fn new(target: SocketAddr, interval: Duration, api_port: u16) -> Self {
        Self {
            target,
            interval,
            api_port,
            running: None,
        }
    }

    /// Bind the send socket and begin announcing on a fixed interval.
    ///
    /// Calling while already running is a no-op. Bind and socket-option
    /// failures are startup configuration problems and propagate to the
    /// caller, as does an IPv6 target (the wire protocol is IPv4-only);
    /// everything after that is contained in the send task.
    pub async fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            tracing::debug!("announcer already running");
            return Ok(());
        }

        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
            .await
            .context("Failed to bind announcement socket")?;

        // Options go on after bind; an unbound socket rejects them on
        // most platforms.
        match self.target.ip() {
            IpAddr::V4(ip) if ip.is_multicast() => {
                // Loopback delivery lets a shell on the same host find us.
                socket
                    .set_multicast_loop_v4(true)
                    .context("Failed to enable multicast loopback")?;
                socket
                    .set_multicast_ttl_v4(MULTICAST_TTL)
                    .context("Failed to set multicast TTL")?;
            }
            IpAddr::V4(_) => {
                socket
                    .set_broadcast(true)
                    .context("Failed to enable broadcast")?;
            }
            IpAddr::V6(_) => {
                // No IPv6 deployment exists, and tokio's socket has no v6
                // hop-limit setter; refuse rather than send misconfigured
                // beacons silently.
                anyhow::bail!("IPv6 beacon targets are not supported");
            }
        }

        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let target = self.target;
        let interval = self.interval;
        let api_port = self.api_port;

        let task = tokio::spawn(async move {
            announce_loop(socket, target, interval, api_port, task_cancel).await;
        });

        tracing::info!(
            "announcing API port {} to {} every {:?}",
            api_port,
            target,
            interval
        );
        self.running = Some(Running { cancel, task });
        Ok(())
    }

    /// Cancel the timer and release the socket. No beacon goes out after
    /// this returns. Calling while stopped is a no-op.
    pub async fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            running.cancel.cancel();
            let _ = running.task.await;
            tracing::info!("announcer stopped");
        }
    }
}

async fn announce_loop(
    socket: UdpSocket,
    target: SocketAddr,
    interval: Duration,
    api_port: u16,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let beacon = Beacon::new(api_port);
                match beacon.encode() {
                    Ok(payload) => {
                        // A failed send is not fatal; the next tick is the retry.
                        if let Err(e) = socket.send_to(&payload, target).await {
                            tracing::warn!("beacon send to {} failed: {}", target, e);
                        }
                    }
                    Err(e) => tracing::warn!("beacon serialization failed: {}", e),
                }
            }
            _ = cancel.cancelled() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::protocol::SERVICE_NAME;
    use tokio::time::timeout;

    const TICK: Duration = Duration::from_millis(50);

    async fn receiver() -> (UdpSocket, SocketAddr) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        (socket, addr)
    }

    async fn recv_one(socket: &UdpSocket, wait: Duration) -> Option<Vec<u8>> {
        let mut buf = [0u8; 512];
        match timeout(wait, socket.recv_from(&mut buf)).await {
            Ok(Ok((len, _))) => Some(buf[..len].to_vec()),
            _ => None,
        }
    }

    #[tokio::test]
    async fn advertises_configured_port() {
        let (socket, addr) = receiver().await;
        let mut announcer = Announcer::new(addr, TICK, 3000);
        announcer.start().await.unwrap();

        let raw = recv_one(&socket, Duration::from_secs(1)).await.unwrap();
        let beacon = Beacon::decode(&raw).unwrap();
        assert_eq!(beacon.service, SERVICE_NAME);
        assert_eq!(beacon.port, 3000);

        announcer.stop().await;
    }

    #[tokio::test]
    async fn payload_is_exactly_three_fields() {
        let (socket, addr) = receiver().await;
        let mut announcer = Announcer::new(addr, TICK, 8080);
        announcer.start().await.unwrap();

        let raw = recv_one(&socket, Duration::from_secs(1)).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.len(), 3);
        assert!(object.contains_key("service"));
        assert!(object.contains_key("port"));
        assert!(object.contains_key("timestamp"));

        announcer.stop().await;
    }

    #[tokio::test]
    async fn double_start_keeps_a_single_timer() {
        let (socket, addr) = receiver().await;
        let mut announcer = Announcer::new(addr, TICK, 3000);
        announcer.start().await.unwrap();
        announcer.start().await.unwrap();

        // A second timer would roughly double the beacon count in the
        // observation window.
        let mut count = 0;
        let window = tokio::time::Instant::now() + TICK * 6;
        let mut buf = [0u8; 512];
        while let Ok(Ok(_)) = tokio::time::timeout_at(window, socket.recv_from(&mut buf)).await {
            count += 1;
        }

        assert!(count >= 2, "expected beacons to flow, saw {}", count);
        assert!(count <= 8, "expected one timer's worth, saw {}", count);

        announcer.stop().await;
    }

    #[tokio::test]
    async fn stop_halts_beacons() {
        let (socket, addr) = receiver().await;
        let mut announcer = Announcer::new(addr, TICK, 3000);
        announcer.start().await.unwrap();

        assert!(recv_one(&socket, Duration::from_secs(1)).await.is_some());
        announcer.stop().await;

        // Drain anything sent before stop() returned, then require silence
        // for two full intervals.
        while recv_one(&socket, TICK).await.is_some() {}
        assert!(recv_one(&socket, TICK * 2).await.is_none());
    }

    #[tokio::test]
    async fn rejects_ipv6_target() {
        let target: SocketAddr = "[::1]:41537".parse().unwrap();
        let mut announcer = Announcer::new(target, TICK, 3000);

        assert!(announcer.start().await.is_err());

        // The failed start left no task behind.
        announcer.stop().await;
    }

    #[tokio::test]
    async fn discoverer_finds_live_announcer_within_one_interval() {
        use registry_locator::discoverer::Discoverer;
        use tokio::sync::mpsc;

        let mut discoverer = Discoverer::with_listen("127.0.0.1:0".parse().unwrap(), None);
        let (tx, mut rx) = mpsc::channel(16);
        let addr = discoverer.start(tx).await.unwrap();

        let interval = Duration::from_millis(500);
        let mut announcer = Announcer::new(addr, interval, 3000);
        announcer.start().await.unwrap();

        // One interval plus a little slack.
        let record = timeout(interval + Duration::from_millis(200), rx.recv())
            .await
            .expect("no beacon within one interval")
            .unwrap();
        assert_eq!(record.port, 3000);
        assert_eq!(record.ip, IpAddr::from([127, 0, 0, 1]));
        assert_eq!(record.url, "http://127.0.0.1:3000");

        announcer.stop().await;
        discoverer.stop().await;
    }

    #[tokio::test]
    async fn stop_without_start_is_a_no_op() {
        let (_socket, addr) = receiver().await;
        let mut announcer = Announcer::new(addr, TICK, 3000);
        announcer.stop().await;
        announcer.stop().await;

        // Still usable afterwards.
        announcer.start().await.unwrap();
        announcer.stop().await;
    }
}
