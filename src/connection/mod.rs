//! Connection lifecycle: shared state, the monitor task, and the facade.

mod link;
mod monitor;
mod transport;

pub use link::XplaneConnection;
pub use transport::{Transport, TransportSession, WebSocketTransport};

pub(crate) use monitor::ConnectionMonitor;

use std::sync::{Mutex, MutexGuard};

use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, warn};

use crate::config::XplinkConfig;
use crate::dispatch::{Dispatcher, SimUpdate};
use crate::metadata::MetadataCache;
use crate::protocol::{RequestId, RequestTracker, WsCall, WsRequest};
use crate::rest::RestClient;
use crate::subscriptions::SubscriptionManager;
use crate::types::{ConnectionState, Endpoint};

/// Capacity of the update fan-out channel. Slow consumers past this lag
/// lose the oldest updates, never block the monitor.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// State shared between the facade and the monitor task.
///
/// Every mutex here guards short, synchronous critical sections; none is
/// held across an await point.
pub(crate) struct Shared {
    pub config: XplinkConfig,
    pub metadata: Mutex<MetadataCache>,
    pub subscriptions: Mutex<SubscriptionManager>,
    pub requests: Mutex<RequestTracker>,
    pub dispatcher: Mutex<Dispatcher>,
    /// Sender into the live websocket session, present only while connected.
    pub outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    /// REST client for the current endpoint, present from ApiReachable on.
    pub rest: Mutex<Option<RestClient>>,
    /// Endpoint currently in use.
    pub endpoint: Mutex<Option<Endpoint>>,
    pub state_tx: watch::Sender<ConnectionState>,
    pub events_tx: broadcast::Sender<SimUpdate>,
}

impl Shared {
    pub fn new(config: XplinkConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::NoSimulator);
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            metadata: Mutex::new(MetadataCache::new()),
            subscriptions: Mutex::new(SubscriptionManager::new()),
            requests: Mutex::new(RequestTracker::new()),
            dispatcher: Mutex::new(Dispatcher::new()),
            outbound: Mutex::new(None),
            rest: Mutex::new(None),
            endpoint: Mutex::new(None),
            state_tx,
            events_tx,
        }
    }

    /// Serialize and send one call over the live session. Returns the
    /// correlation id, or `None` (with a warning) when disconnected — the
    /// interest bookkeeping has already happened and reconciliation will
    /// replay it after the next connect.
    pub fn send_call(&self, call: WsCall) -> Option<RequestId> {
        let outbound = lock(&self.outbound);
        let Some(sender) = outbound.as_ref() else {
            warn!("not connected, call deferred until reconnect");
            return None;
        };
        let req_id = lock(&self.requests).assign();
        let request = WsRequest { req_id, call };
        let text = match serde_json::to_string(&request) {
            Ok(t) => t,
            Err(err) => {
                warn!("request {req_id} not serializable: {err}");
                return None;
            }
        };
        if sender.send(text).is_err() {
            warn!("session closed mid-send, request {req_id} dropped");
            return None;
        }
        Some(req_id)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                debug!("connection state {current} -> {state}");
                *current = state;
                true
            }
        });
    }
}

/// Poison-tolerant lock: a panicked writer leaves data we can still read.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
