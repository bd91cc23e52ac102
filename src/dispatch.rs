//! Inbound frame dispatch: decode pushes, dedupe, and fan updates out.

use std::collections::HashMap;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::metadata::MetadataCache;
use crate::protocol::{RequestTracker, WsMessage};
use crate::subscriptions::{ActiveDataref, SubscriptionManager};
use crate::types::{element_name, Value, ValueKind};

/// Simulator clock, cascaded on every push even when the rounded value is
/// unchanged, so observers get a steady tick.
pub const ZULU_TIME_SEC: &str = "sim/time/zulu_time_sec";

/// Relative path of the loaded aircraft. A change means the simulator has
/// swapped aircraft and all metadata may be stale.
pub const AIRCRAFT_PATH: &str = "sim/aircraft/view/acf_relative_path";

/// Simulator uptime, used to pace metadata reloads.
pub const SIM_UPTIME_SEC: &str = "sim/time/total_flight_time_sec";

/// A change of observed simulator state.
#[derive(Debug, Clone, PartialEq)]
pub enum SimUpdate {
    DatarefChanged { name: String, value: Value },
    CommandActive { name: String, active: bool },
}

/// What one inbound frame produced.
#[derive(Debug, Default)]
pub struct DispatchSummary {
    pub updates: usize,
    /// Set when the aircraft path dataref arrived in this frame.
    pub aircraft_path: Option<String>,
}

/// Decodes inbound frames into [`SimUpdate`]s. A malformed or unexpected
/// frame is logged and skipped; dispatch itself never fails.
#[derive(Debug, Default)]
pub struct Dispatcher {
    values: HashMap<String, Value>,
    rounding: HashMap<String, i32>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decimal places used when deduplicating scalar pushes of `name`.
    pub fn set_rounding(&mut self, name: &str, decimals: i32) {
        self.rounding.insert(name.to_string(), decimals);
    }

    /// Last value seen for `name`, post rounding.
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Process one raw text frame from the websocket.
    pub fn handle_frame(
        &mut self,
        raw: &str,
        cache: &MetadataCache,
        subscriptions: &SubscriptionManager,
        requests: &mut RequestTracker,
        events: &broadcast::Sender<SimUpdate>,
    ) -> DispatchSummary {
        let message: WsMessage = match serde_json::from_str(raw) {
            Ok(m) => m,
            Err(err) => {
                warn!("undecodable frame skipped: {err}");
                return DispatchSummary::default();
            }
        };

        let mut summary = DispatchSummary::default();
        match message {
            WsMessage::Result { req_id, success, error_code, error_message } => {
                if !requests.complete(req_id, success) {
                    debug!("result for unknown request {req_id} ignored");
                } else if !success {
                    warn!(
                        "request {req_id} rejected: {} {}",
                        error_code.as_deref().unwrap_or("?"),
                        error_message.as_deref().unwrap_or("")
                    );
                }
            }
            WsMessage::DatarefUpdate { data } => {
                let stale = subscriptions.generation() != cache.generation();
                for (key, value) in data {
                    let Ok(ident) = key.parse::<i64>() else {
                        warn!("non-numeric dataref key {key:?} skipped");
                        continue;
                    };
                    if stale {
                        debug!("push for {} predates metadata reload, skipped", cache.describe(ident));
                        continue;
                    }
                    let Some(active) = subscriptions.active_dataref(ident) else {
                        debug!("push for unsubscribed {} skipped", cache.describe(ident));
                        continue;
                    };
                    self.dispatch_value(active, value, events, &mut summary);
                }
            }
            WsMessage::CommandActive { data } => {
                for (key, active) in data {
                    let Ok(ident) = key.parse::<i64>() else {
                        warn!("non-numeric command key {key:?} skipped");
                        continue;
                    };
                    let Some(name) = subscriptions.active_command(ident) else {
                        debug!("activity for unsubscribed {} skipped", cache.describe(ident));
                        continue;
                    };
                    // command activity is always cascaded, no dedup
                    summary.updates += 1;
                    let _ = events.send(SimUpdate::CommandActive {
                        name: name.to_string(),
                        active,
                    });
                }
            }
            WsMessage::Unknown => {
                debug!("frame of unknown type ignored");
            }
        }
        summary
    }

    fn dispatch_value(
        &mut self,
        active: &ActiveDataref,
        raw: serde_json::Value,
        events: &broadcast::Sender<SimUpdate>,
        summary: &mut DispatchSummary,
    ) {
        let value = match Value::decode(&raw, active.kind) {
            Ok(v) => v,
            Err(err) => {
                warn!("push for {} undecodable: {err}", active.base);
                return;
            }
        };

        match (&value, active.kind) {
            (Value::Array(elements), ValueKind::FloatArray | ValueKind::IntArray)
                if !active.indices.is_empty() =>
            {
                // Indexed subscription: map positions back to the requested
                // slots. The simulator may briefly push under an older index
                // set right after a re-subscribe, so older snapshots are
                // consulted before giving up.
                let indices = if elements.len() == active.indices.len() {
                    Some(&active.indices)
                } else {
                    active
                        .index_history
                        .iter()
                        .rev()
                        .find(|snapshot| snapshot.len() == elements.len())
                };
                let Some(indices) = indices else {
                    if active.whole_array {
                        self.emit(active.base.clone(), value.clone(), events, summary);
                        return;
                    }
                    warn!(
                        "{}: push of {} values does not match any requested index set",
                        active.base,
                        elements.len()
                    );
                    return;
                };
                for (slot, element) in indices.iter().zip(elements) {
                    self.emit(
                        element_name(&active.base, *slot),
                        Value::Number(*element),
                        events,
                        summary,
                    );
                }
                if active.whole_array {
                    self.emit(active.base.clone(), value.clone(), events, summary);
                }
            }
            _ => {
                if active.base == AIRCRAFT_PATH {
                    if let Value::Text(path) = &value {
                        summary.aircraft_path = Some(path.clone());
                    }
                }
                self.emit(active.base.clone(), value.clone(), events, summary);
            }
        }
    }

    fn emit(
        &mut self,
        name: String,
        value: Value,
        events: &broadcast::Sender<SimUpdate>,
        summary: &mut DispatchSummary,
    ) {
        // Rounding is an opt-in, per-name policy; values without one are
        // compared raw.
        let value = match (value, self.rounding.get(&name)) {
            (Value::Number(n), Some(decimals)) => {
                Value::Number(crate::types::round_display(n, *decimals))
            }
            (other, _) => other,
        };

        let unchanged = self.values.get(&name) == Some(&value);
        self.values.insert(name.clone(), value.clone());
        if unchanged && name != ZULU_TIME_SEC {
            return;
        }
        summary.updates += 1;
        let _ = events.send(SimUpdate::DatarefChanged { name, value });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{DatarefRecord, MetadataCache};
    use crate::types::DatarefPath;

    fn setup(
        names: &[(&str, ValueKind)],
        subscribe: &[&str],
    ) -> (MetadataCache, SubscriptionManager) {
        let mut cache = MetadataCache::new();
        cache.ingest(
            names
                .iter()
                .enumerate()
                .map(|(i, (name, kind))| DatarefRecord {
                    id: 100 + i as i64,
                    name: name.to_string(),
                    value_type: *kind,
                    is_writable: true,
                })
                .collect(),
            vec![],
            None,
        );
        let mut subs = SubscriptionManager::new();
        for name in subscribe {
            subs.add_dataref_interest(&DatarefPath::parse(name).unwrap(), &cache);
        }
        (cache, subs)
    }

    fn drain(rx: &mut broadcast::Receiver<SimUpdate>) -> Vec<SimUpdate> {
        let mut out = Vec::new();
        while let Ok(update) = rx.try_recv() {
            out.push(update);
        }
        out
    }

    #[test]
    fn configured_rounding_deduplicates_close_values() {
        let (cache, subs) = setup(&[("sim/alt", ValueKind::Float)], &["sim/alt"]);
        let mut dispatcher = Dispatcher::new();
        dispatcher.set_rounding("sim/alt", 4);
        let mut requests = RequestTracker::new();
        let (tx, mut rx) = broadcast::channel(16);

        let frame = r#"{"type":"dataref_update_values","data":{"100":12.34567}}"#;
        dispatcher.handle_frame(frame, &cache, &subs, &mut requests, &tx);
        let frame2 = r#"{"type":"dataref_update_values","data":{"100":12.34569}}"#;
        let summary = dispatcher.handle_frame(frame2, &cache, &subs, &mut requests, &tx);

        // both round to 12.3457, second push suppressed
        assert_eq!(summary.updates, 0);
        let updates = drain(&mut rx);
        assert_eq!(
            updates,
            vec![SimUpdate::DatarefChanged {
                name: "sim/alt".to_string(),
                value: Value::Number(12.3457),
            }]
        );
    }

    #[test]
    fn unrounded_values_cascade_every_change() {
        let (cache, subs) = setup(&[("sim/alt", ValueKind::Float)], &["sim/alt"]);
        let mut dispatcher = Dispatcher::new();
        let mut requests = RequestTracker::new();
        let (tx, mut rx) = broadcast::channel(16);

        // no rounding configured: sub-1e-4 differences are real changes
        let frame = r#"{"type":"dataref_update_values","data":{"100":12.34567}}"#;
        dispatcher.handle_frame(frame, &cache, &subs, &mut requests, &tx);
        let frame2 = r#"{"type":"dataref_update_values","data":{"100":12.34569}}"#;
        let summary = dispatcher.handle_frame(frame2, &cache, &subs, &mut requests, &tx);

        assert_eq!(summary.updates, 1);
        assert_eq!(drain(&mut rx).len(), 2);
        assert_eq!(dispatcher.value("sim/alt"), Some(&Value::Number(12.34569)));

        // an identical repeat is still suppressed
        let summary = dispatcher.handle_frame(frame2, &cache, &subs, &mut requests, &tx);
        assert_eq!(summary.updates, 0);
    }

    #[test]
    fn zulu_time_always_cascades() {
        let (cache, subs) = setup(&[(ZULU_TIME_SEC, ValueKind::Float)], &[ZULU_TIME_SEC]);
        let mut dispatcher = Dispatcher::new();
        let mut requests = RequestTracker::new();
        let (tx, mut rx) = broadcast::channel(16);

        let frame = r#"{"type":"dataref_update_values","data":{"100":43200.0}}"#;
        dispatcher.handle_frame(frame, &cache, &subs, &mut requests, &tx);
        let summary = dispatcher.handle_frame(frame, &cache, &subs, &mut requests, &tx);

        assert_eq!(summary.updates, 1);
        assert_eq!(drain(&mut rx).len(), 2);
    }

    #[test]
    fn indexed_array_push_maps_to_element_names() {
        let (cache, subs) = setup(
            &[("sim/fuel", ValueKind::FloatArray)],
            &["sim/fuel[3]", "sim/fuel[1]"],
        );
        let mut dispatcher = Dispatcher::new();
        let mut requests = RequestTracker::new();
        let (tx, mut rx) = broadcast::channel(16);

        let frame = r#"{"type":"dataref_update_values","data":{"100":[7.5,2.5]}}"#;
        dispatcher.handle_frame(frame, &cache, &subs, &mut requests, &tx);

        let updates = drain(&mut rx);
        assert_eq!(
            updates,
            vec![
                SimUpdate::DatarefChanged {
                    name: "sim/fuel[3]".to_string(),
                    value: Value::Number(7.5),
                },
                SimUpdate::DatarefChanged {
                    name: "sim/fuel[1]".to_string(),
                    value: Value::Number(2.5),
                },
            ]
        );
    }

    #[test]
    fn shorter_push_matches_older_index_snapshot() {
        let (cache, subs) = setup(
            &[("sim/fuel", ValueKind::FloatArray)],
            &["sim/fuel[3]", "sim/fuel[1]"],
        );
        let mut dispatcher = Dispatcher::new();
        let mut requests = RequestTracker::new();
        let (tx, mut rx) = broadcast::channel(16);

        // one value: matches the snapshot taken when only [3] was wanted
        let frame = r#"{"type":"dataref_update_values","data":{"100":[9.0]}}"#;
        dispatcher.handle_frame(frame, &cache, &subs, &mut requests, &tx);

        assert_eq!(
            drain(&mut rx),
            vec![SimUpdate::DatarefChanged {
                name: "sim/fuel[3]".to_string(),
                value: Value::Number(9.0),
            }]
        );
    }

    #[test]
    fn mismatched_push_is_dropped() {
        let (cache, subs) = setup(&[("sim/fuel", ValueKind::FloatArray)], &["sim/fuel[3]"]);
        let mut dispatcher = Dispatcher::new();
        let mut requests = RequestTracker::new();
        let (tx, mut rx) = broadcast::channel(16);

        let frame = r#"{"type":"dataref_update_values","data":{"100":[1.0,2.0,3.0]}}"#;
        let summary = dispatcher.handle_frame(frame, &cache, &subs, &mut requests, &tx);
        assert_eq!(summary.updates, 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn stale_generation_drops_all_pushes() {
        let (mut cache, subs) = setup(&[("sim/alt", ValueKind::Float)], &["sim/alt"]);
        // reload changes identifiers; subscriptions not yet reconciled
        cache.ingest(
            vec![DatarefRecord {
                id: 100,
                name: "sim/other".to_string(),
                value_type: ValueKind::Float,
                is_writable: false,
            }],
            vec![],
            None,
        );
        let mut dispatcher = Dispatcher::new();
        let mut requests = RequestTracker::new();
        let (tx, mut rx) = broadcast::channel(16);

        let frame = r#"{"type":"dataref_update_values","data":{"100":1.0}}"#;
        let summary = dispatcher.handle_frame(frame, &cache, &subs, &mut requests, &tx);
        assert_eq!(summary.updates, 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn aircraft_path_surfaces_in_summary() {
        let (cache, subs) = setup(&[(AIRCRAFT_PATH, ValueKind::Data)], &[AIRCRAFT_PATH]);
        let mut dispatcher = Dispatcher::new();
        let mut requests = RequestTracker::new();
        let (tx, _rx) = broadcast::channel(16);

        // "Aircraft/Laminar/a330.acf" base64-encoded
        let frame = r#"{"type":"dataref_update_values","data":{"100":"QWlyY3JhZnQvTGFtaW5hci9hMzMwLmFjZg=="}}"#;
        let summary = dispatcher.handle_frame(frame, &cache, &subs, &mut requests, &tx);
        assert_eq!(summary.aircraft_path.as_deref(), Some("Aircraft/Laminar/a330.acf"));
    }

    #[test]
    fn result_frames_settle_requests() {
        let (cache, subs) = setup(&[], &[]);
        let mut dispatcher = Dispatcher::new();
        let mut requests = RequestTracker::new();
        let (tx, _rx) = broadcast::channel(16);
        let id = requests.assign();

        let frame = format!(r#"{{"type":"result","req_id":{id},"success":true}}"#);
        dispatcher.handle_frame(&frame, &cache, &subs, &mut requests, &tx);
        assert_eq!(requests.outcome(id), Some(crate::protocol::RequestOutcome::Succeeded));

        // unknown ids are ignored without effect
        let frame = r#"{"type":"result","req_id":99999,"success":false}"#;
        dispatcher.handle_frame(frame, &cache, &subs, &mut requests, &tx);
    }

    #[test]
    fn malformed_frames_never_panic() {
        let (cache, subs) = setup(&[], &[]);
        let mut dispatcher = Dispatcher::new();
        let mut requests = RequestTracker::new();
        let (tx, _rx) = broadcast::channel(16);

        for raw in ["", "not json", "{}", r#"{"type":"result"}"#, "[1,2,3]"] {
            let summary = dispatcher.handle_frame(raw, &cache, &subs, &mut requests, &tx);
            assert_eq!(summary.updates, 0);
        }
    }
}
