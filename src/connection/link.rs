//! The connection facade handed to library users.

use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::sync::watch;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::transport::Transport;
use super::{ConnectionMonitor, Shared, lock};
use crate::beacon::BeaconMonitor;
use crate::config::XplinkConfig;
use crate::dispatch::{AIRCRAFT_PATH, SIM_UPTIME_SEC, SimUpdate, ZULU_TIME_SEC};
use crate::error::{Result, XplinkError};
use crate::protocol::{CommandParams, CommandSpec, DatarefParams, DatarefSpec, RequestId, WsCall};
use crate::rest::RestClient;
use crate::stream::RateLimitExt;
use crate::types::{BeaconRole, ConnectionState, DatarefPath, Endpoint, Instruction, Value};

/// Always-on observations the connection itself depends on: the simulator
/// clock as a liveness tick, the aircraft path for change detection, and
/// flight time to pace metadata reloads.
const PERMANENT_INTERESTS: &[&str] = &[ZULU_TIME_SEC, AIRCRAFT_PATH, SIM_UPTIME_SEC];

/// Handle to a supervised simulator connection.
///
/// Dropping the handle (or calling [`disconnect`](Self::disconnect)) stops
/// the background tasks.
pub struct XplaneConnection {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    /// Keeps a configured fixed endpoint alive in place of the beacon.
    _static_endpoint: Option<watch::Sender<Option<Endpoint>>>,
}

impl XplaneConnection {
    /// Start discovery and supervision with the given transport.
    pub(crate) fn start(config: XplinkConfig, transport: Arc<dyn Transport>) -> Self {
        let cancel = CancellationToken::new();
        let shared = Arc::new(Shared::new(config));

        {
            let cache = lock(&shared.metadata);
            let mut subscriptions = lock(&shared.subscriptions);
            for name in PERMANENT_INTERESTS {
                if let Ok(path) = DatarefPath::parse(name) {
                    subscriptions.add_dataref_interest(&path, &cache);
                }
            }
        }

        let (beacon, static_endpoint) = match shared.config.host_override {
            Some(addr) => {
                info!("fixed simulator endpoint {addr}, beacon discovery disabled");
                let endpoint = Endpoint {
                    address: addr.ip(),
                    port: addr.port(),
                    hostname: "configured".to_string(),
                    version: shared.config.min_version,
                    role: BeaconRole::Master,
                };
                let (tx, rx) = watch::channel(Some(endpoint));
                (rx, Some(tx))
            }
            None => (BeaconMonitor::spawn(cancel.child_token()), None),
        };

        ConnectionMonitor::spawn(Arc::clone(&shared), transport, beacon, cancel.child_token());
        Self { shared, cancel, _static_endpoint: static_endpoint }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Watch channel mirroring every state transition.
    pub fn state_updates(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Endpoint of the simulator currently (or last) in use.
    pub fn endpoint(&self) -> Option<Endpoint> {
        lock(&self.shared.endpoint).clone()
    }

    /// Stream of observed simulator changes. Consumers that fall more than
    /// the channel capacity behind lose the oldest updates.
    pub fn updates(&self) -> impl Stream<Item = SimUpdate> + Send + Unpin + 'static {
        BroadcastStream::new(self.shared.events_tx.subscribe()).filter_map(|item| {
            futures::future::ready(match item {
                Ok(update) => Some(update),
                Err(lagged) => {
                    warn!("update consumer lagging: {lagged}");
                    None
                }
            })
        })
    }

    /// Like [`updates`](Self::updates), capped to one item per `period`
    /// with latest-wins semantics.
    pub fn updates_rate_limited(&self, period: Duration) -> impl Stream<Item = SimUpdate> + Send {
        self.updates().rate_limit(period)
    }

    /// Register interest in a dataref (whole value, or one slot via a
    /// `path[index]` suffix). Interest is reference counted and survives
    /// reconnects and metadata reloads.
    pub fn add_interest(&self, name: &str) -> Result<()> {
        let path = DatarefPath::parse(name)?;
        let call = {
            let cache = lock(&self.shared.metadata);
            lock(&self.shared.subscriptions).add_dataref_interest(&path, &cache)
        };
        if let Some(call) = call {
            self.shared.send_call(call);
        }
        Ok(())
    }

    /// Drop one reference to a dataref.
    pub fn remove_interest(&self, name: &str) -> Result<()> {
        let path = DatarefPath::parse(name)?;
        let call = {
            let cache = lock(&self.shared.metadata);
            lock(&self.shared.subscriptions).remove_dataref_interest(&path, &cache)
        };
        if let Some(call) = call {
            self.shared.send_call(call);
        }
        Ok(())
    }

    /// Register interest in a command's activity.
    pub fn add_command_interest(&self, name: &str) {
        let call = {
            let cache = lock(&self.shared.metadata);
            lock(&self.shared.subscriptions).add_command_interest(name, &cache)
        };
        if let Some(call) = call {
            self.shared.send_call(call);
        }
    }

    pub fn remove_command_interest(&self, name: &str) {
        let call = {
            let cache = lock(&self.shared.metadata);
            lock(&self.shared.subscriptions).remove_command_interest(name, &cache)
        };
        if let Some(call) = call {
            self.shared.send_call(call);
        }
    }

    /// Decimal places used when deduplicating pushes of `name`.
    pub fn set_rounding(&self, name: &str, decimals: i32) {
        lock(&self.shared.dispatcher).set_rounding(name, decimals);
    }

    /// Last pushed value of a subscribed dataref, if any has arrived.
    pub fn cached_value(&self, name: &str) -> Option<Value> {
        lock(&self.shared.dispatcher).value(name).cloned()
    }

    /// Current value of a dataref: the subscription cache when hot,
    /// otherwise a one-shot REST read. Array datarefs are only served by the
    /// simulator through subscriptions, so a cold array read is an error.
    pub async fn dataref_value(&self, name: &str) -> Result<Value> {
        if let Some(value) = self.cached_value(name) {
            return Ok(value);
        }
        let path = DatarefPath::parse(name)?;
        let rest = self.rest_client()?;
        let (ident, kind) = {
            let cache = lock(&self.shared.metadata);
            let desc = cache
                .dataref(&path.base)
                .ok_or_else(|| XplinkError::DatarefNotFound { name: path.base.clone() })?;
            (desc.ident, desc.value_kind)
        };
        if kind.is_array() {
            return Err(XplinkError::protocol(
                "read dataref",
                format!("{}: arrays are only readable through a subscription", path.base),
            ));
        }
        let raw = rest.dataref_value(ident).await?;
        Value::decode(&raw, kind)
    }

    /// Write a dataref. Returns the websocket correlation id, or `None`
    /// when the write went over REST.
    pub async fn write_dataref(&self, name: &str, value: Value) -> Result<Option<RequestId>> {
        let path = DatarefPath::parse(name)?;
        let (ident, kind, writable) = {
            let cache = lock(&self.shared.metadata);
            let desc = cache
                .dataref(&path.base)
                .ok_or_else(|| XplinkError::DatarefNotFound { name: path.base.clone() })?;
            (desc.ident, desc.value_kind, desc.writable)
        };
        if !writable {
            return Err(XplinkError::NotWritable { name: path.base });
        }
        let wire = value.to_wire(kind);

        if self.use_rest_for_writes() {
            let rest = self.rest_client()?;
            rest.write_dataref(ident, &path.base, wire, path.index).await?;
            return Ok(None);
        }
        let mut spec = DatarefSpec::indexed(ident, path.index.into_iter().collect());
        spec.value = Some(wire);
        match self.shared.send_call(WsCall::SetDatarefs(DatarefParams::one(spec))) {
            Some(id) => Ok(Some(id)),
            None => Err(XplinkError::NotConnected),
        }
    }

    /// Execute one instruction (or a whole macro of them).
    pub async fn execute(&self, instruction: &Instruction) -> Result<()> {
        if instruction.is_no_operation() {
            debug!("no-operation instruction skipped");
            return Ok(());
        }
        match instruction {
            Instruction::Command { path, duration } => {
                let ident = self.command_ident(path)?;
                if self.use_rest_for_writes() {
                    self.rest_client()?.activate_command(ident, *duration).await
                } else {
                    self.send_command(CommandSpec::activate(ident, *duration))
                }
            }
            Instruction::CommandBegin { path } => {
                let ident = self.command_ident(path)?;
                self.send_command(CommandSpec::begin(ident))
            }
            Instruction::CommandEnd { path } => {
                let ident = self.command_ident(path)?;
                self.send_command(CommandSpec::end(ident))
            }
            Instruction::SetDataref { path, value } => {
                self.write_dataref(path, value.clone()).await.map(|_| ())
            }
            Instruction::Macro { instructions } => {
                for inner in instructions {
                    Box::pin(self.execute(inner)).await?;
                }
                Ok(())
            }
        }
    }

    /// Block until the connection reaches (at least) `target`.
    pub async fn wait_for_state(
        &self,
        target: ConnectionState,
        deadline: Duration,
    ) -> Result<()> {
        let mut states = self.state_updates();
        tokio::time::timeout(deadline, async move {
            loop {
                if *states.borrow_and_update() >= target {
                    return Ok(());
                }
                if states.changed().await.is_err() {
                    return Err(XplinkError::NotConnected);
                }
            }
        })
        .await
        .map_err(|_| XplinkError::Timeout { duration: deadline })?
    }

    /// Stop the background tasks. Safe to call more than once.
    pub fn disconnect(&self) {
        if !self.cancel.is_cancelled() {
            info!("disconnecting");
            self.cancel.cancel();
        }
        self.shared.set_state(ConnectionState::NoSimulator);
    }

    fn command_ident(&self, name: &str) -> Result<i64> {
        lock(&self.shared.metadata)
            .command(name)
            .map(|desc| desc.ident)
            .ok_or_else(|| {
                warn!("command {name} not in metadata, nothing sent");
                XplinkError::CommandNotFound { name: name.to_string() }
            })
    }

    fn send_command(&self, spec: CommandSpec) -> Result<()> {
        match self.shared.send_call(WsCall::SetCommands(CommandParams::one(spec))) {
            Some(_) => Ok(()),
            None => Err(XplinkError::NotConnected),
        }
    }

    fn rest_client(&self) -> Result<RestClient> {
        lock(&self.shared.rest).clone().ok_or(XplinkError::NotConnected)
    }

    /// Remote simulators get their writes over REST when configured so;
    /// everything else goes through the websocket.
    fn use_rest_for_writes(&self) -> bool {
        if !self.shared.config.prefer_rest_for_remote {
            return false;
        }
        match lock(&self.shared.endpoint).as_ref() {
            Some(endpoint) => !endpoint.is_local(),
            None => false,
        }
    }
}

impl Drop for XplaneConnection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
