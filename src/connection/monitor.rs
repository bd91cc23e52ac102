//! Connection monitor task.
//!
//! One task owns the whole lifecycle: wait for a beacon, probe the REST API,
//! download metadata, open the websocket, replay subscriptions, then pump
//! inbound frames. Any failure tears the session down and restarts the pass
//! from the beacon check, so the connection state always reflects which
//! precondition currently holds.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::transport::Transport;
use super::{Shared, lock};
use crate::dispatch::SIM_UPTIME_SEC;
use crate::error::{Result, XplinkError};
use crate::metadata::write_snapshot;
use crate::rest::{ApiVersion, RestClient};
use crate::types::{ConnectionState, Endpoint, Value};

/// Silence on an open websocket longer than this counts as a miss.
const RECEIVE_TIMEOUT: Duration = Duration::from_secs(5);
/// Consecutive misses before the session is declared dead.
const MAX_MISSED_RECEIVES: u32 = 5;
/// Pause between full connection passes after a failure.
const RECONNECT_DELAY: Duration = Duration::from_secs(10);
/// Pause between websocket handshake attempts within one pass.
const HANDSHAKE_RETRY: Duration = Duration::from_secs(1);
const HANDSHAKE_ATTEMPTS: u32 = 5;

pub(crate) struct ConnectionMonitor;

impl ConnectionMonitor {
    pub fn spawn(
        shared: Arc<Shared>,
        transport: Arc<dyn Transport>,
        beacon: watch::Receiver<Option<Endpoint>>,
        cancel: CancellationToken,
    ) {
        tokio::spawn(async move {
            run(shared, transport, beacon, cancel).await;
        });
    }
}

async fn run(
    shared: Arc<Shared>,
    transport: Arc<dyn Transport>,
    mut beacon: watch::Receiver<Option<Endpoint>>,
    cancel: CancellationToken,
) {
    loop {
        let outcome = session(&shared, transport.as_ref(), &mut beacon, &cancel).await;
        *lock(&shared.outbound) = None;
        lock(&shared.rest).take();
        if cancel.is_cancelled() {
            return;
        }
        // Only the websocket is known dead at this point. While the beacon
        // still announces the simulator, regress no further than the step
        // the next pass has to re-verify.
        if beacon.borrow().is_some() {
            shared.set_state(ConnectionState::BeaconDetected);
        } else {
            shared.set_state(ConnectionState::NoSimulator);
        }
        if let Err(err) = outcome {
            warn!("connection pass failed: {err}");
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = sleep(RECONNECT_DELAY) => {}
            }
        }
    }
}

/// One full pass from discovery to a dead session. `Ok(())` means the
/// session ended in a way that warrants an immediate new pass (clean close,
/// cancellation); `Err` means a precondition failed and a backoff applies.
async fn session(
    shared: &Arc<Shared>,
    transport: &dyn Transport,
    beacon: &mut watch::Receiver<Option<Endpoint>>,
    cancel: &CancellationToken,
) -> Result<()> {
    let Some(endpoint) = wait_for_endpoint(shared, beacon, cancel).await else {
        return Ok(());
    };
    shared.set_state(ConnectionState::BeaconDetected);
    *lock(&shared.endpoint) = Some(endpoint.clone());

    let config = &shared.config;
    if endpoint.version < config.min_version {
        warn!(
            "simulator build {} is older than supported ({}), continuing anyway",
            endpoint.version, config.min_version
        );
    } else if endpoint.version > config.max_version {
        warn!(
            "simulator build {} is newer than tested ({}), continuing anyway",
            endpoint.version, config.max_version
        );
    }

    let (host, port) = endpoint.api_addr(config.local_port, config.remote_port);
    let mut rest =
        RestClient::new(host, port, &config.api_path, ApiVersion::for_sim_version(endpoint.version));
    rest.probe().await?;
    shared.set_state(ConnectionState::ApiReachable);

    let caps = rest.capabilities().await?;
    if rest.version() == ApiVersion::V2 && !caps.supports(ApiVersion::V2) {
        warn!("simulator does not advertise api v2, downgrading to v1");
        rest = RestClient::new(host, port, &config.api_path, ApiVersion::V1);
    }
    *lock(&shared.rest) = Some(rest.clone());

    reload_metadata(shared, &rest, None).await?;
    shared.set_state(ConnectionState::HasMetadata);

    let mut session = open_with_retries(transport, &rest.ws_url(), cancel).await?;
    shared.set_state(ConnectionState::WebSocketConnected);
    *lock(&shared.outbound) = Some(session.outbound.clone());
    resubscribe(shared);

    let mut misses: u32 = 0;
    let mut receiving = false;
    let mut aircraft: Option<String> = None;
    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            r = timeout(RECEIVE_TIMEOUT, session.inbound.recv()) => r,
        };
        match received {
            Ok(Some(frame)) => {
                misses = 0;
                if !receiving {
                    receiving = true;
                    shared.set_state(ConnectionState::ReceivingData);
                }
                let summary = {
                    let cache = lock(&shared.metadata);
                    let subscriptions = lock(&shared.subscriptions);
                    let mut requests = lock(&shared.requests);
                    lock(&shared.dispatcher).handle_frame(
                        &frame,
                        &cache,
                        &subscriptions,
                        &mut requests,
                        &shared.events_tx,
                    )
                };
                if let Some(path) = summary.aircraft_path {
                    if aircraft.as_deref() != Some(path.as_str()) {
                        let swapped = aircraft.is_some();
                        aircraft = Some(path.clone());
                        if path.is_empty() {
                            debug!("no aircraft loaded");
                            shared.set_state(ConnectionState::ReceivingData);
                        } else {
                            info!("aircraft {path}");
                            shared.set_state(ConnectionState::AircraftLoaded);
                            if swapped {
                                reload_after_aircraft_change(shared, &rest).await?;
                            }
                        }
                    }
                }
            }
            Ok(None) => {
                warn!("websocket session ended");
                return Ok(());
            }
            Err(_) => {
                misses += 1;
                warn!("no data in {RECEIVE_TIMEOUT:?} ({misses}/{MAX_MISSED_RECEIVES})");
                if misses >= MAX_MISSED_RECEIVES {
                    return Err(XplinkError::Timeout {
                        duration: RECEIVE_TIMEOUT * MAX_MISSED_RECEIVES,
                    });
                }
            }
        }
    }
}

/// Block until the beacon publishes an endpoint. `None` means cancelled (or
/// the beacon source is gone for good).
async fn wait_for_endpoint(
    shared: &Shared,
    beacon: &mut watch::Receiver<Option<Endpoint>>,
    cancel: &CancellationToken,
) -> Option<Endpoint> {
    loop {
        if let Some(endpoint) = beacon.borrow_and_update().clone() {
            return Some(endpoint);
        }
        shared.set_state(ConnectionState::NoSimulator);
        tokio::select! {
            _ = cancel.cancelled() => return None,
            changed = beacon.changed() => {
                if changed.is_err() {
                    return None;
                }
            }
        }
    }
}

async fn open_with_retries(
    transport: &dyn Transport,
    url: &str,
    cancel: &CancellationToken,
) -> Result<super::TransportSession> {
    let mut last = XplinkError::transport("websocket unreachable");
    for attempt in 1..=HANDSHAKE_ATTEMPTS {
        match transport.open(url).await {
            Ok(session) => return Ok(session),
            Err(err) => {
                warn!("websocket handshake {attempt}/{HANDSHAKE_ATTEMPTS} failed: {err}");
                last = err;
            }
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(HANDSHAKE_RETRY) => {}
        }
    }
    Err(last)
}

/// Download both metadata lists and swap them in as a new generation.
async fn reload_metadata(shared: &Shared, rest: &RestClient, uptime: Option<f64>) -> Result<()> {
    let datarefs = rest.fetch_datarefs().await?;
    let commands = rest.fetch_commands().await?;
    if datarefs.is_empty() && commands.is_empty() {
        return Err(XplinkError::protocol("metadata reload", "simulator returned empty lists"));
    }
    if let Some(dir) = &shared.config.snapshot_dir {
        if let Err(err) = write_snapshot(dir, "datarefs.json", &datarefs) {
            warn!("dataref snapshot not written: {err}");
        }
        if let Err(err) = write_snapshot(dir, "commands.json", &commands) {
            warn!("command snapshot not written: {err}");
        }
    }
    lock(&shared.metadata).ingest(datarefs, commands, uptime);
    Ok(())
}

/// After an aircraft swap the identifier space may have changed. Reload
/// (paced by simulator uptime, since swaps can push the path twice) and
/// replay every standing subscription against the new generation.
async fn reload_after_aircraft_change(shared: &Shared, rest: &RestClient) -> Result<()> {
    let uptime = match lock(&shared.dispatcher).value(SIM_UPTIME_SEC) {
        Some(Value::Number(n)) => Some(*n),
        _ => None,
    };
    // A genuine swap invalidates the identifier space, so the reload is
    // forced past the uptime pacing; repeated pushes of the same path are
    // already filtered by the caller.
    if !lock(&shared.metadata).should_reload(uptime, true) {
        return Ok(());
    }
    reload_metadata(shared, rest, uptime).await?;
    resubscribe(shared);
    Ok(())
}

/// Rebuild identifier state from the current metadata generation and replay
/// the subscribe calls for everything still wanted.
fn resubscribe(shared: &Shared) {
    let calls = {
        let cache = lock(&shared.metadata);
        lock(&shared.subscriptions).reconcile_all(&cache)
    };
    if calls.is_empty() {
        return;
    }
    let count = calls.len();
    for call in calls {
        shared.send_call(call);
    }
    info!("replayed {count} subscriptions");
}
