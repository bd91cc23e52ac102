//! Reference-counted subscription bookkeeping.
//!
//! Interest is tracked by name so it survives disconnects and metadata
//! reloads; identifier-keyed state is derived from the cache and tagged with
//! the cache generation it came from. After any reload,
//! [`SubscriptionManager::reconcile_all`] rebuilds the derived state and
//! produces the calls needed to re-subscribe everything still wanted.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::metadata::{Ident, MetadataCache};
use crate::protocol::{CommandParams, CommandSpec, DatarefParams, DatarefSpec, WsCall};
use crate::types::{DatarefPath, ValueKind};

/// Identifier-keyed subscription state for one dataref, valid for one cache
/// generation.
#[derive(Debug, Clone)]
pub struct ActiveDataref {
    pub base: String,
    pub kind: ValueKind,
    /// At least one subscriber wants the whole array (or it is a scalar).
    pub whole_array: bool,
    /// Requested array slots, in first-subscription order.
    pub indices: Vec<usize>,
    /// Snapshots of `indices` as they were at each (re-)subscription, newest
    /// last. Array pushes whose length matches an older snapshot are mapped
    /// through it.
    pub index_history: Vec<Vec<usize>>,
}

/// Tracks what the client wants to observe, by name and by identifier.
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    dataref_counts: HashMap<String, usize>,
    dataref_order: Vec<String>,
    command_counts: HashMap<String, usize>,
    command_order: Vec<String>,
    active: HashMap<Ident, ActiveDataref>,
    active_commands: HashMap<Ident, String>,
    generation: u64,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache generation the identifier-keyed state was derived from.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn active_dataref(&self, ident: Ident) -> Option<&ActiveDataref> {
        self.active.get(&ident)
    }

    pub fn active_command(&self, ident: Ident) -> Option<&str> {
        self.active_commands.get(&ident).map(String::as_str)
    }

    pub fn dataref_interest_count(&self, name: &str) -> usize {
        self.dataref_counts.get(name).copied().unwrap_or(0)
    }

    /// Register interest in a dataref (whole value or one array slot) and
    /// return the subscribe call to send, if the connection needs one now.
    ///
    /// The reference count is always recorded, even while disconnected or
    /// when the name is missing from the cache; reconciliation re-issues it
    /// later.
    pub fn add_dataref_interest(
        &mut self,
        path: &DatarefPath,
        cache: &MetadataCache,
    ) -> Option<WsCall> {
        let name = path.to_string();
        let count = self.dataref_counts.entry(name.clone()).or_insert(0);
        *count += 1;
        if *count == 1 {
            self.dataref_order.push(name.clone());
        } else {
            debug!("{name}: {count} subscribers");
            return None;
        }

        let Some(desc) = cache.dataref(&path.base) else {
            warn!("dataref {} not in metadata, deferring subscription", path.base);
            return None;
        };
        self.generation = cache.generation();

        let entry = self.active.entry(desc.ident).or_insert_with(|| ActiveDataref {
            base: path.base.clone(),
            kind: desc.value_kind,
            whole_array: false,
            indices: Vec::new(),
            index_history: Vec::new(),
        });
        match path.index {
            None => {
                entry.whole_array = true;
                Some(WsCall::SubscribeDatarefs(DatarefParams::one(DatarefSpec::whole(
                    desc.ident,
                ))))
            }
            Some(index) => {
                if !entry.indices.contains(&index) {
                    entry.indices.push(index);
                }
                entry.index_history.push(entry.indices.clone());
                Some(WsCall::SubscribeDatarefs(DatarefParams::one(DatarefSpec::indexed(
                    desc.ident,
                    entry.indices.clone(),
                ))))
            }
        }
    }

    /// Drop one reference to a dataref. Removing below zero is a warned
    /// no-op. When the last reference to a name goes away the returned call
    /// releases exactly what was freed: the whole dataref if nothing else on
    /// the same base remains, otherwise just the freed slot.
    pub fn remove_dataref_interest(
        &mut self,
        path: &DatarefPath,
        cache: &MetadataCache,
    ) -> Option<WsCall> {
        let name = path.to_string();
        match self.dataref_counts.get_mut(&name) {
            None | Some(0) => {
                warn!("{name}: remove without matching add, ignored");
                None
            }
            Some(count) => {
                *count -= 1;
                if *count > 0 {
                    debug!("{name}: {count} subscribers remain");
                    return None;
                }
                self.dataref_counts.remove(&name);
                self.dataref_order.retain(|n| n != &name);

                let desc = cache.dataref(&path.base)?;
                let still_wanted = self
                    .dataref_order
                    .iter()
                    .any(|n| n == &path.base || n.starts_with(&format!("{}[", path.base)));
                if !still_wanted {
                    self.active.remove(&desc.ident);
                    return Some(WsCall::UnsubscribeDatarefs(DatarefParams::one(
                        DatarefSpec::whole(desc.ident),
                    )));
                }

                // Other names on the same base remain; narrow the active set
                // instead of dropping it.
                let entry = self.active.get_mut(&desc.ident)?;
                match path.index {
                    Some(index) => {
                        if !entry.indices.contains(&index) {
                            return None;
                        }
                        entry.indices.retain(|i| *i != index);
                        entry.index_history.push(entry.indices.clone());
                        Some(WsCall::UnsubscribeDatarefs(DatarefParams::one(
                            DatarefSpec::indexed(desc.ident, vec![index]),
                        )))
                    }
                    None => {
                        // whole-array interest gone, slot interests remain:
                        // a narrower subscribe supersedes the whole-array one
                        entry.whole_array = false;
                        entry.index_history.push(entry.indices.clone());
                        Some(WsCall::SubscribeDatarefs(DatarefParams::one(
                            DatarefSpec::indexed(desc.ident, entry.indices.clone()),
                        )))
                    }
                }
            }
        }
    }

    /// Register interest in a command's activity.
    pub fn add_command_interest(
        &mut self,
        name: &str,
        cache: &MetadataCache,
    ) -> Option<WsCall> {
        let count = self.command_counts.entry(name.to_string()).or_insert(0);
        *count += 1;
        if *count > 1 {
            return None;
        }
        self.command_order.push(name.to_string());

        let Some(desc) = cache.command(name) else {
            warn!("command {name} not in metadata, deferring subscription");
            return None;
        };
        self.generation = cache.generation();
        self.active_commands.insert(desc.ident, name.to_string());
        Some(WsCall::SubscribeCommands(CommandParams::one(CommandSpec::subscribe(desc.ident))))
    }

    pub fn remove_command_interest(
        &mut self,
        name: &str,
        cache: &MetadataCache,
    ) -> Option<WsCall> {
        match self.command_counts.get_mut(name) {
            None | Some(0) => {
                warn!("command {name}: remove without matching add, ignored");
                None
            }
            Some(count) => {
                *count -= 1;
                if *count > 0 {
                    return None;
                }
                self.command_counts.remove(name);
                self.command_order.retain(|n| n != name);
                let desc = cache.command(name)?;
                self.active_commands.remove(&desc.ident);
                Some(WsCall::UnsubscribeCommands(CommandParams::one(CommandSpec::subscribe(
                    desc.ident,
                ))))
            }
        }
    }

    /// Rebuild all identifier-keyed state from the cache and return the
    /// subscribe calls for every name still wanted, batched: one call for
    /// all datarefs (specs in first-subscription order) and one for all
    /// commands. Names missing from the new metadata are skipped with a
    /// warning but keep their reference counts.
    pub fn reconcile_all(&mut self, cache: &MetadataCache) -> Vec<WsCall> {
        self.active.clear();
        self.active_commands.clear();
        self.generation = cache.generation();

        let mut ident_order = Vec::new();
        for name in &self.dataref_order {
            let Ok(path) = DatarefPath::parse(name) else { continue };
            let Some(desc) = cache.dataref(&path.base) else {
                warn!("dataref {} gone after metadata reload", path.base);
                continue;
            };
            if !ident_order.contains(&desc.ident) {
                ident_order.push(desc.ident);
            }
            let entry = self.active.entry(desc.ident).or_insert_with(|| ActiveDataref {
                base: path.base.clone(),
                kind: desc.value_kind,
                whole_array: false,
                indices: Vec::new(),
                index_history: Vec::new(),
            });
            match path.index {
                None => entry.whole_array = true,
                Some(index) => {
                    if !entry.indices.contains(&index) {
                        entry.indices.push(index);
                    }
                }
            }
        }
        let mut specs = Vec::with_capacity(ident_order.len());
        for ident in ident_order {
            let Some(entry) = self.active.get_mut(&ident) else { continue };
            if entry.indices.is_empty() || entry.whole_array {
                specs.push(DatarefSpec::whole(ident));
            } else {
                entry.index_history = vec![entry.indices.clone()];
                specs.push(DatarefSpec::indexed(ident, entry.indices.clone()));
            }
        }

        let mut command_specs = Vec::new();
        for name in &self.command_order {
            let Some(desc) = cache.command(name) else {
                warn!("command {name} gone after metadata reload");
                continue;
            };
            self.active_commands.insert(desc.ident, name.clone());
            command_specs.push(CommandSpec::subscribe(desc.ident));
        }

        let mut calls = Vec::new();
        if !specs.is_empty() {
            calls.push(WsCall::SubscribeDatarefs(DatarefParams { datarefs: specs }));
        }
        if !command_specs.is_empty() {
            calls.push(WsCall::SubscribeCommands(CommandParams { commands: command_specs }));
        }
        calls
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{CommandRecord, DatarefRecord};
    use proptest::prelude::*;

    fn cache_with(names: &[(&str, ValueKind)]) -> MetadataCache {
        let mut cache = MetadataCache::new();
        let datarefs = names
            .iter()
            .enumerate()
            .map(|(i, (name, kind))| DatarefRecord {
                id: 100 + i as Ident,
                name: name.to_string(),
                value_type: *kind,
                is_writable: true,
            })
            .collect();
        cache.ingest(datarefs, vec![], None);
        cache
    }

    #[test]
    fn first_interest_subscribes_later_ones_count() {
        let cache = cache_with(&[("sim/alt", ValueKind::Float)]);
        let mut subs = SubscriptionManager::new();
        let path = DatarefPath::parse("sim/alt").unwrap();

        assert!(subs.add_dataref_interest(&path, &cache).is_some());
        assert!(subs.add_dataref_interest(&path, &cache).is_none());
        assert_eq!(subs.dataref_interest_count("sim/alt"), 2);
    }

    #[test]
    fn last_removal_unsubscribes() {
        let cache = cache_with(&[("sim/alt", ValueKind::Float)]);
        let mut subs = SubscriptionManager::new();
        let path = DatarefPath::parse("sim/alt").unwrap();
        subs.add_dataref_interest(&path, &cache);
        subs.add_dataref_interest(&path, &cache);

        assert!(subs.remove_dataref_interest(&path, &cache).is_none());
        let call = subs.remove_dataref_interest(&path, &cache);
        assert!(matches!(call, Some(WsCall::UnsubscribeDatarefs(_))));
        assert_eq!(subs.dataref_interest_count("sim/alt"), 0);
    }

    #[test]
    fn unmatched_removal_is_ignored() {
        let cache = cache_with(&[("sim/alt", ValueKind::Float)]);
        let mut subs = SubscriptionManager::new();
        let path = DatarefPath::parse("sim/alt").unwrap();
        assert!(subs.remove_dataref_interest(&path, &cache).is_none());
        // state is untouched, a later add still subscribes
        assert!(subs.add_dataref_interest(&path, &cache).is_some());
    }

    #[test]
    fn indexed_interest_accumulates_slots_in_order() {
        let cache = cache_with(&[("sim/fuel", ValueKind::FloatArray)]);
        let mut subs = SubscriptionManager::new();
        subs.add_dataref_interest(&DatarefPath::parse("sim/fuel[3]").unwrap(), &cache);
        let call = subs
            .add_dataref_interest(&DatarefPath::parse("sim/fuel[1]").unwrap(), &cache)
            .unwrap();
        match call {
            WsCall::SubscribeDatarefs(params) => {
                assert_eq!(
                    params.datarefs[0].index,
                    Some(crate::protocol::IndexSpec::Many(vec![3, 1]))
                );
            }
            other => panic!("unexpected call: {other:?}"),
        }
        let active = subs.active_dataref(100).unwrap();
        assert_eq!(active.indices, vec![3, 1]);
        assert_eq!(active.index_history, vec![vec![3], vec![3, 1]]);
    }

    #[test]
    fn removing_one_slot_unsubscribes_only_that_index() {
        let cache = cache_with(&[("sim/fuel", ValueKind::FloatArray)]);
        let mut subs = SubscriptionManager::new();
        subs.add_dataref_interest(&DatarefPath::parse("sim/fuel[3]").unwrap(), &cache);
        subs.add_dataref_interest(&DatarefPath::parse("sim/fuel[5]").unwrap(), &cache);

        let call = subs
            .remove_dataref_interest(&DatarefPath::parse("sim/fuel[5]").unwrap(), &cache)
            .unwrap();
        match call {
            WsCall::UnsubscribeDatarefs(params) => {
                assert_eq!(params.datarefs[0].id, 100);
                assert_eq!(
                    params.datarefs[0].index,
                    Some(crate::protocol::IndexSpec::One(5))
                );
            }
            other => panic!("unexpected call: {other:?}"),
        }
        let active = subs.active_dataref(100).unwrap();
        assert_eq!(active.indices, vec![3]);
        assert_eq!(*active.index_history.last().unwrap(), vec![3]);

        // dropping the last slot releases the whole dataref
        let call = subs
            .remove_dataref_interest(&DatarefPath::parse("sim/fuel[3]").unwrap(), &cache)
            .unwrap();
        assert!(matches!(call, WsCall::UnsubscribeDatarefs(_)));
        assert!(subs.active_dataref(100).is_none());
    }

    #[test]
    fn removing_whole_array_keeps_slot_interests() {
        let cache = cache_with(&[("sim/fuel", ValueKind::FloatArray)]);
        let mut subs = SubscriptionManager::new();
        subs.add_dataref_interest(&DatarefPath::parse("sim/fuel").unwrap(), &cache);
        subs.add_dataref_interest(&DatarefPath::parse("sim/fuel[2]").unwrap(), &cache);

        let call = subs
            .remove_dataref_interest(&DatarefPath::parse("sim/fuel").unwrap(), &cache)
            .unwrap();
        match call {
            WsCall::SubscribeDatarefs(params) => {
                assert_eq!(
                    params.datarefs[0].index,
                    Some(crate::protocol::IndexSpec::One(2))
                );
            }
            other => panic!("unexpected call: {other:?}"),
        }
        let active = subs.active_dataref(100).unwrap();
        assert!(!active.whole_array);
        assert_eq!(active.indices, vec![2]);
    }

    #[test]
    fn unknown_name_defers_until_reconcile() {
        let empty = MetadataCache::new();
        let mut subs = SubscriptionManager::new();
        let path = DatarefPath::parse("sim/alt").unwrap();
        assert!(subs.add_dataref_interest(&path, &empty).is_none());
        assert_eq!(subs.dataref_interest_count("sim/alt"), 1);

        let cache = cache_with(&[("sim/alt", ValueKind::Float)]);
        let calls = subs.reconcile_all(&cache);
        assert_eq!(calls.len(), 1);
        assert_eq!(subs.generation(), cache.generation());
    }

    #[test]
    fn reconcile_rebuilds_after_identifier_change() {
        let cache = cache_with(&[("sim/alt", ValueKind::Float)]);
        let mut subs = SubscriptionManager::new();
        subs.add_dataref_interest(&DatarefPath::parse("sim/alt").unwrap(), &cache);
        assert!(subs.active_dataref(100).is_some());

        // new session hands out different identifiers
        let mut fresh = MetadataCache::new();
        fresh.ingest(
            vec![DatarefRecord {
                id: 555,
                name: "sim/alt".to_string(),
                value_type: ValueKind::Float,
                is_writable: true,
            }],
            vec![],
            None,
        );
        let calls = subs.reconcile_all(&fresh);
        assert_eq!(calls.len(), 1);
        assert!(subs.active_dataref(100).is_none());
        assert!(subs.active_dataref(555).is_some());
    }

    #[test]
    fn command_interest_lifecycle() {
        let mut cache = MetadataCache::new();
        cache.ingest(
            vec![],
            vec![CommandRecord {
                id: 7,
                name: "sim/apu/start".to_string(),
                description: String::new(),
            }],
            None,
        );
        let mut subs = SubscriptionManager::new();
        assert!(matches!(
            subs.add_command_interest("sim/apu/start", &cache),
            Some(WsCall::SubscribeCommands(_))
        ));
        assert_eq!(subs.active_command(7), Some("sim/apu/start"));
        assert!(matches!(
            subs.remove_command_interest("sim/apu/start", &cache),
            Some(WsCall::UnsubscribeCommands(_))
        ));
        assert!(subs.active_command(7).is_none());
    }

    proptest! {
        // interleaved adds and removes never drive a count negative, and a
        // balanced sequence always ends unsubscribed
        #[test]
        fn counts_never_go_negative(ops in proptest::collection::vec(any::<bool>(), 1..64)) {
            let cache = cache_with(&[("sim/alt", ValueKind::Float)]);
            let mut subs = SubscriptionManager::new();
            let path = DatarefPath::parse("sim/alt").unwrap();
            let mut expected: usize = 0;
            for add in ops {
                if add {
                    subs.add_dataref_interest(&path, &cache);
                    expected += 1;
                } else {
                    subs.remove_dataref_interest(&path, &cache);
                    expected = expected.saturating_sub(1);
                }
                prop_assert_eq!(subs.dataref_interest_count("sim/alt"), expected);
            }
        }
    }
}
