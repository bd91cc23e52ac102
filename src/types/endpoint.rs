//! Simulator network endpoint learned from the discovery beacon.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

use serde::{Deserialize, Serialize};

/// Role the announcing instance plays in a networked simulator setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BeaconRole {
    Master,
    ExternVisual,
    Ios,
    Unknown(u32),
}

impl From<u32> for BeaconRole {
    fn from(raw: u32) -> Self {
        match raw {
            1 => BeaconRole::Master,
            2 => BeaconRole::ExternVisual,
            3 => BeaconRole::Ios,
            other => BeaconRole::Unknown(other),
        }
    }
}

/// Where a running simulator instance can be reached, as announced by its
/// UDP beacon. Becomes stale when no beacon packet refreshes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Sender address of the beacon packet.
    pub address: IpAddr,
    /// UDP port announced in the beacon (legacy dataref protocol port).
    pub port: u16,
    /// Hostname of the machine running the simulator.
    pub hostname: String,
    /// Simulator version number, e.g. `121400` for 12.1.4.
    pub version: i32,
    pub role: BeaconRole,
}

impl Endpoint {
    /// Whether the simulator runs on this machine.
    ///
    /// Loopback is trivially local; otherwise we ask the OS which local
    /// address it would route from when talking to the beacon sender, and
    /// call it local if that source address *is* the sender.
    pub fn is_local(&self) -> bool {
        if self.address.is_loopback() {
            return true;
        }
        local_source_for(self.address).map(|src| src == self.address).unwrap_or(false)
    }

    /// Host/port pair for the Web API. A local simulator is addressed via
    /// loopback on the local API port; a remote one through its LAN address
    /// on the remote API port.
    pub fn api_addr(&self, local_port: u16, remote_port: u16) -> (IpAddr, u16) {
        if self.is_local() {
            (IpAddr::V4(Ipv4Addr::LOCALHOST), local_port)
        } else {
            (self.address, remote_port)
        }
    }
}

fn local_source_for(target: IpAddr) -> Option<IpAddr> {
    // Connecting a UDP socket sends nothing; it only selects a route.
    let bind_addr: SocketAddr = match target {
        IpAddr::V4(_) => "0.0.0.0:0".parse().ok()?,
        IpAddr::V6(_) => "[::]:0".parse().ok()?,
    };
    let sock = UdpSocket::bind(bind_addr).ok()?;
    sock.connect((target, 9)).ok()?;
    sock.local_addr().ok().map(|a| a.ip())
}
