//! Metadata cache: name/identifier resolution for datarefs and commands.
//!
//! The simulator assigns every dataref and command a numeric identifier that
//! is only stable within one API session and one loaded aircraft. The cache
//! downloads the full enumerable lists over REST and offers lookup in both
//! directions. Each successful reload bumps a generation counter: identifier
//! lookups from an older generation must be treated as unresolvable, never
//! matched against a same-valued identifier from a newer one.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::types::ValueKind;

/// Session-scoped numeric handle for a dataref or command.
pub type Ident = i64;

/// Minimum simulator uptime between non-forced reloads, seconds.
const MIN_RELOAD_INTERVAL: f64 = 10.0;

/// One record of the REST dataref list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatarefRecord {
    pub id: Ident,
    pub name: String,
    pub value_type: ValueKind,
    pub is_writable: bool,
}

/// One record of the REST command list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub id: Ident,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Descriptor of a simulator variable, valid for one cache generation.
#[derive(Debug, Clone, PartialEq)]
pub struct DatarefDescriptor {
    pub ident: Ident,
    pub name: String,
    pub value_kind: ValueKind,
    pub writable: bool,
}

/// Descriptor of a simulator command, valid for one cache generation.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandDescriptor {
    pub ident: Ident,
    pub name: String,
    pub description: String,
}

/// Name/identifier lookup tables for the current API session.
#[derive(Debug, Default)]
pub struct MetadataCache {
    datarefs_by_name: HashMap<String, Arc<DatarefDescriptor>>,
    datarefs_by_id: HashMap<Ident, Arc<DatarefDescriptor>>,
    commands_by_name: HashMap<String, Arc<CommandDescriptor>>,
    commands_by_id: HashMap<Ident, Arc<CommandDescriptor>>,
    generation: u64,
    last_reload_uptime: Option<f64>,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Monotonic counter, bumped on every [`ingest`](Self::ingest).
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn has_data(&self) -> bool {
        !self.datarefs_by_name.is_empty()
    }

    pub fn dataref_count(&self) -> usize {
        self.datarefs_by_name.len()
    }

    pub fn command_count(&self) -> usize {
        self.commands_by_name.len()
    }

    /// Whether a reload should run now, measured against simulator uptime
    /// (not wall-clock, since the simulator can pause). With no uptime
    /// reading available the reload proceeds, matching the connect path.
    pub fn should_reload(&self, uptime: Option<f64>, force: bool) -> bool {
        if force || self.last_reload_uptime.is_none() {
            return true;
        }
        match (uptime, self.last_reload_uptime) {
            (Some(now), Some(then)) => {
                let elapsed = now - then;
                if elapsed < MIN_RELOAD_INTERVAL {
                    info!("metadata not reloaded, last reload {elapsed:.1}s of sim time ago");
                    false
                } else {
                    true
                }
            }
            _ => {
                warn!("no simulator uptime available, reloading metadata anyway");
                true
            }
        }
    }

    /// Replace the lookup tables with freshly downloaded records and start a
    /// new generation. All identifier-keyed state held elsewhere is invalid
    /// from this point and must be rebuilt by name.
    pub fn ingest(
        &mut self,
        datarefs: Vec<DatarefRecord>,
        commands: Vec<CommandRecord>,
        uptime: Option<f64>,
    ) {
        self.datarefs_by_name.clear();
        self.datarefs_by_id.clear();
        self.commands_by_name.clear();
        self.commands_by_id.clear();

        for rec in datarefs {
            let desc = Arc::new(DatarefDescriptor {
                ident: rec.id,
                name: rec.name,
                value_kind: rec.value_type,
                writable: rec.is_writable,
            });
            self.datarefs_by_name.insert(desc.name.clone(), Arc::clone(&desc));
            self.datarefs_by_id.insert(desc.ident, desc);
        }
        for rec in commands {
            let desc = Arc::new(CommandDescriptor {
                ident: rec.id,
                name: rec.name,
                description: rec.description,
            });
            self.commands_by_name.insert(desc.name.clone(), Arc::clone(&desc));
            self.commands_by_id.insert(desc.ident, desc);
        }

        self.generation += 1;
        self.last_reload_uptime = uptime;
        info!(
            "metadata cached: {} datarefs, {} commands (generation {})",
            self.datarefs_by_name.len(),
            self.commands_by_name.len(),
            self.generation
        );
    }

    pub fn dataref(&self, name: &str) -> Option<&Arc<DatarefDescriptor>> {
        self.datarefs_by_name.get(name)
    }

    pub fn dataref_by_id(&self, ident: Ident) -> Option<&Arc<DatarefDescriptor>> {
        self.datarefs_by_id.get(&ident)
    }

    pub fn command(&self, name: &str) -> Option<&Arc<CommandDescriptor>> {
        self.commands_by_name.get(name)
    }

    pub fn command_by_id(&self, ident: Ident) -> Option<&Arc<CommandDescriptor>> {
        self.commands_by_id.get(&ident)
    }

    /// Log-friendly rendering of an identifier with its name, if known.
    pub fn describe(&self, ident: Ident) -> String {
        if let Some(d) = self.datarefs_by_id.get(&ident) {
            format!("{ident}({})", d.name)
        } else if let Some(c) = self.commands_by_id.get(&ident) {
            format!("{ident}({})", c.name)
        } else {
            format!("{ident}(unknown)")
        }
    }
}

/// Dump raw record lists as JSON for offline inspection. Never read back.
pub fn write_snapshot<T: Serialize>(dir: &Path, file_name: &str, records: &[T]) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(file_name);
    let json = serde_json::to_string_pretty(records)?;
    std::fs::write(&path, json)?;
    debug!("metadata snapshot written to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn door_record() -> DatarefRecord {
        DatarefRecord {
            id: 42,
            name: "sim/cockpit/door".to_string(),
            value_type: ValueKind::Int,
            is_writable: true,
        }
    }

    #[test]
    fn lookup_both_directions() {
        let mut cache = MetadataCache::new();
        cache.ingest(vec![door_record()], vec![], Some(100.0));

        let by_name = cache.dataref("sim/cockpit/door").expect("by name");
        assert_eq!(by_name.ident, 42);
        assert!(by_name.writable);
        assert_eq!(by_name.value_kind, ValueKind::Int);

        let by_id = cache.dataref_by_id(42).expect("by id");
        assert_eq!(by_id.name, "sim/cockpit/door");
        assert_eq!(by_name, by_id);
    }

    #[test]
    fn reload_bumps_generation_and_replaces_tables() {
        let mut cache = MetadataCache::new();
        cache.ingest(vec![door_record()], vec![], Some(100.0));
        let first = cache.generation();

        // same name, new identifier after an aircraft reload
        let mut rec = door_record();
        rec.id = 77;
        cache.ingest(vec![rec], vec![], Some(200.0));

        assert!(cache.generation() > first);
        assert!(cache.dataref_by_id(42).is_none());
        assert_eq!(cache.dataref("sim/cockpit/door").unwrap().ident, 77);
    }

    #[test]
    fn reload_throttled_by_sim_uptime() {
        let mut cache = MetadataCache::new();
        assert!(cache.should_reload(None, false), "empty cache always reloads");
        cache.ingest(vec![door_record()], vec![], Some(100.0));

        assert!(!cache.should_reload(Some(104.0), false));
        assert!(cache.should_reload(Some(104.0), true), "force wins");
        assert!(cache.should_reload(Some(111.0), false));
    }

    #[test]
    fn command_lookup() {
        let mut cache = MetadataCache::new();
        cache.ingest(
            vec![],
            vec![CommandRecord {
                id: 9,
                name: "sim/apu/start".to_string(),
                description: "Start the APU".to_string(),
            }],
            None,
        );
        assert_eq!(cache.command("sim/apu/start").unwrap().ident, 9);
        assert_eq!(cache.command_by_id(9).unwrap().description, "Start the APU");
        assert!(cache.command("sim/apu/stop").is_none());
    }

    #[test]
    fn describe_falls_back_for_unknown_ids() {
        let cache = MetadataCache::new();
        assert_eq!(cache.describe(999), "999(unknown)");
    }
}
