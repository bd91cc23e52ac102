//! Supervised connection library for the X-Plane flight simulator.
//!
//! Xplink discovers a running simulator over its multicast beacon, talks to
//! its HTTP API for metadata and one-shot reads, and keeps a websocket
//! session alive for subscriptions, pushed values, and commands. The whole
//! lifecycle is supervised: the connection survives simulator restarts,
//! aircraft changes, and network drops, replaying every standing
//! subscription once the simulator is back.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use xplink::{Xplink, XplinkConfig};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let connection = Xplink::start(XplinkConfig::default());
//!     connection.add_interest("sim/cockpit2/gauges/indicators/altitude_ft_pilot")?;
//!
//!     let mut updates = connection.updates();
//!     while let Some(update) = updates.next().await {
//!         println!("{update:?}");
//!     }
//!     Ok(())
//! }
//! ```

// Core types and error handling
mod config;
mod error;
pub mod types;

// Connection architecture
pub mod beacon;
pub mod connection;
pub mod dispatch;
pub mod metadata;
pub mod protocol;
pub mod rest;
pub mod stream;
pub mod subscriptions;

// Core exports
pub use config::{MAX_SIM_VERSION, MIN_SIM_VERSION, XplinkConfig};
pub use connection::{Transport, TransportSession, WebSocketTransport, XplaneConnection};
pub use dispatch::SimUpdate;
pub use error::{Result, XplinkError};
pub use types::{ConnectionState, DatarefPath, Endpoint, Instruction, Value, ValueKind};

use std::sync::Arc;

/// Entry point: starts a supervised connection.
pub struct Xplink;

impl Xplink {
    /// Start discovery and supervision against a live simulator.
    ///
    /// Returns immediately; watch [`XplaneConnection::state_updates`] or
    /// call [`XplaneConnection::wait_for_state`] to learn when the
    /// connection is usable.
    pub fn start(config: XplinkConfig) -> XplaneConnection {
        XplaneConnection::start(config, Arc::new(WebSocketTransport))
    }

    /// Start with a custom transport in place of the websocket layer.
    pub fn start_with(config: XplinkConfig, transport: Arc<dyn Transport>) -> XplaneConnection {
        XplaneConnection::start(config, transport)
    }
}
