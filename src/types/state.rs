//! Connection lifecycle state.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How far the link to the simulator has progressed.
///
/// States advance strictly in declaration order while a connection is being
/// built up; any state can regress when a precondition is lost. The ordering
/// derives are load-bearing: components gate operations with comparisons
/// like `state >= ConnectionState::WebSocketConnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No beacon seen; the simulator is not visible on the network.
    NoSimulator,
    /// A beacon packet announced an endpoint.
    BeaconDetected,
    /// The REST probe answered.
    ApiReachable,
    /// Dataref/command metadata downloaded and non-empty.
    HasMetadata,
    /// WebSocket handshake completed.
    WebSocketConnected,
    /// At least one frame arrived on this WebSocket session.
    ReceivingData,
    /// The aircraft-path dataref resolved to a non-empty value.
    AircraftLoaded,
}

impl ConnectionState {
    /// Whether the subscription channel is usable.
    pub fn is_connected(&self) -> bool {
        *self >= ConnectionState::WebSocketConnected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::NoSimulator => "no simulator",
            ConnectionState::BeaconDetected => "beacon detected",
            ConnectionState::ApiReachable => "api reachable",
            ConnectionState::HasMetadata => "metadata loaded",
            ConnectionState::WebSocketConnected => "websocket connected",
            ConnectionState::ReceivingData => "receiving data",
            ConnectionState::AircraftLoaded => "aircraft loaded",
        };
        f.write_str(s)
    }
}
