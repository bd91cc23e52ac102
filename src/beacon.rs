//! Multicast beacon discovery.
//!
//! A running simulator announces itself on a well-known multicast group
//! roughly once per second. The monitor task keeps joining the group,
//! publishes the most recent announcement on a watch channel, and clears it
//! after a silence longer than the beacon timeout.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, XplinkError};
use crate::types::{BeaconRole, Endpoint};

pub const BEACON_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 1, 1);
pub const BEACON_PORT: u16 = 49707;

/// Silence longer than this clears the published endpoint.
pub const BEACON_TIMEOUT: Duration = Duration::from_secs(3);
/// Backoff before rebuilding the socket after a bind or receive error.
const SOCKET_RETRY: Duration = Duration::from_secs(10);
/// Missed-beacon warnings are emitted once per this many misses.
const WARN_EVERY: u32 = 10;

const MAGIC: &[u8] = b"BECN\0";
/// Magic plus the fixed-layout announcement fields.
const HEADER_LEN: usize = MAGIC.len() + 16;
const MAX_PACKET: usize = 1472;

/// Announcing application. Only the simulator itself serves the API.
const HOST_SIMULATOR: i32 = 1;

/// Decode one announcement packet into an [`Endpoint`].
///
/// Packets from other tools sharing the group, from incompatible beacon
/// protocol versions, or from non-simulator hosts are rejected.
pub fn decode_beacon(packet: &[u8], sender: IpAddr) -> Result<Endpoint> {
    if packet.len() < HEADER_LEN || !packet.starts_with(MAGIC) {
        return Err(XplinkError::beacon("packet without announcement magic"));
    }
    let body = &packet[MAGIC.len()..];
    let major = body[0];
    let minor = body[1];
    let host_id = i32::from_le_bytes(body[2..6].try_into().unwrap());
    let version = i32::from_le_bytes(body[6..10].try_into().unwrap());
    let role = u32::from_le_bytes(body[10..14].try_into().unwrap());
    let port = u16::from_le_bytes(body[14..16].try_into().unwrap());

    if major != 1 || minor > 2 {
        return Err(XplinkError::VersionUnsupported {
            details: format!("announcement protocol {major}.{minor}"),
        });
    }
    if host_id != HOST_SIMULATOR {
        return Err(XplinkError::beacon(format!("announcement from host type {host_id}")));
    }

    let hostname = packet[HEADER_LEN..]
        .split(|b| *b == 0)
        .next()
        .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
        .unwrap_or_default();

    Ok(Endpoint {
        address: sender,
        port,
        hostname,
        version,
        role: BeaconRole::from(role),
    })
}

/// Listens for announcements and publishes the current endpoint.
pub struct BeaconMonitor;

impl BeaconMonitor {
    /// Spawn the listener task. The receiver holds `None` until a simulator
    /// is heard, and reverts to `None` when it goes silent.
    pub fn spawn(cancel: CancellationToken) -> watch::Receiver<Option<Endpoint>> {
        let (tx, rx) = watch::channel(None);
        tokio::spawn(async move {
            listen_loop(tx, cancel).await;
        });
        rx
    }
}

async fn listen_loop(tx: watch::Sender<Option<Endpoint>>, cancel: CancellationToken) {
    loop {
        if cancel.is_cancelled() {
            return;
        }
        let socket = match join_group().await {
            Ok(s) => s,
            Err(err) => {
                warn!("cannot join announcement group: {err}, retrying in {SOCKET_RETRY:?}");
                tx.send_if_modified(clear_endpoint);
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(SOCKET_RETRY) => continue,
                }
            }
        };
        debug!("listening for announcements on {BEACON_GROUP}:{BEACON_PORT}");

        let mut buf = [0u8; MAX_PACKET];
        let mut misses: u32 = 0;
        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => return,
                r = timeout(BEACON_TIMEOUT, socket.recv_from(&mut buf)) => r,
            };
            match received {
                Ok(Ok((len, from))) => {
                    misses = 0;
                    match decode_beacon(&buf[..len], from.ip()) {
                        Ok(endpoint) => {
                            tx.send_if_modified(|current| {
                                if current.as_ref() == Some(&endpoint) {
                                    false
                                } else {
                                    info!(
                                        "simulator {} build {} at {}:{}",
                                        endpoint.hostname,
                                        endpoint.version,
                                        endpoint.address,
                                        endpoint.port
                                    );
                                    *current = Some(endpoint);
                                    true
                                }
                            });
                        }
                        Err(err) => {
                            // Traffic from other tools on the group is ignored,
                            // but a simulator announcing an incompatible version
                            // invalidates whatever endpoint we had learned.
                            if buf[..len].starts_with(MAGIC)
                                && tx.send_if_modified(clear_endpoint)
                            {
                                warn!("simulator announcement no longer usable: {err}");
                            } else {
                                debug!("announcement rejected: {err}");
                            }
                        }
                    }
                }
                Ok(Err(err)) => {
                    warn!("announcement socket error: {err}, rebuilding");
                    tx.send_if_modified(clear_endpoint);
                    break;
                }
                Err(_) => {
                    misses += 1;
                    if tx.send_if_modified(clear_endpoint) {
                        warn!("simulator went silent, no announcement in {BEACON_TIMEOUT:?}");
                    } else if misses % WARN_EVERY == 0 {
                        warn!("still no simulator announcement after {misses} intervals");
                    }
                }
            }
        }
    }
}

fn clear_endpoint(current: &mut Option<Endpoint>) -> bool {
    if current.is_some() {
        *current = None;
        true
    } else {
        false
    }
}

async fn join_group() -> Result<UdpSocket> {
    let socket = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, BEACON_PORT))).await?;
    socket.join_multicast_v4(BEACON_GROUP, Ipv4Addr::UNSPECIFIED)?;
    Ok(socket)
}
