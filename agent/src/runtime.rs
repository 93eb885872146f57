//! Coverage source collaborator
//!
//! The probe-injection runtime lives outside this crate; the transport only
//! needs a way to pull finalized snapshots and reset counters. The
//! in-memory runtime below backs the demo binary and the tests.

use std::collections::HashMap;
use std::sync::RwLock;

use covstream_shared::types::DEFAULT_CORRELATION_ID;
use covstream_shared::utils::time::epoch_millis;
use covstream_shared::{ExecutionRecord, SessionInfo};
use tracing::debug;

/// Supplies finalized execution data to the transport.
pub trait CoverageSource: Send + Sync + 'static {
    /// Current session metadata with a fresh dump timestamp. Also used as
    /// the heartbeat payload.
    fn session(&self) -> SessionInfo;

    /// Session metadata plus every record with hits recorded under the
    /// given correlation id.
    fn collect(&self, correlation_id: &str) -> (SessionInfo, Vec<ExecutionRecord>);

    /// Clear the probe state recorded under the given correlation id.
    fn reset(&self, correlation_id: &str);
}

fn normalize(correlation_id: &str) -> &str {
    if correlation_id.trim().is_empty() {
        DEFAULT_CORRELATION_ID
    } else {
        correlation_id
    }
}

/// In-memory probe store keyed by correlation id, standing in for an
/// instrumentation runtime.
pub struct InMemoryRuntime {
    session_id: String,
    start_timestamp: i64,
    /// class id -> (name, probe count)
    catalog: RwLock<HashMap<i64, (String, usize)>>,
    /// correlation id -> class id -> probe flags
    hits: RwLock<HashMap<String, HashMap<i64, Vec<bool>>>>,
}

impl InMemoryRuntime {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            start_timestamp: epoch_millis(),
            catalog: RwLock::new(HashMap::new()),
            hits: RwLock::new(HashMap::new()),
        }
    }

    /// Register an instrumented class. Probe counts are fixed per class.
    pub fn register_class(&self, class_id: i64, class_name: &str, probe_count: usize) {
        self.catalog
            .write()
            .expect("catalog lock poisoned")
            .insert(class_id, (class_name.to_string(), probe_count));
    }

    /// Record a probe hit under a correlation id. Hits for unregistered
    /// classes are dropped.
    pub fn record_probe(&self, correlation_id: &str, class_id: i64, probe: usize) {
        let probe_count = match self
            .catalog
            .read()
            .expect("catalog lock poisoned")
            .get(&class_id)
        {
            Some((_, count)) => *count,
            None => {
                debug!("dropping probe hit for unregistered class {class_id:#x}");
                return;
            }
        };
        let mut hits = self.hits.write().expect("hits lock poisoned");
        let probes = hits
            .entry(normalize(correlation_id).to_string())
            .or_default()
            .entry(class_id)
            .or_insert_with(|| vec![false; probe_count]);
        if let Some(p) = probes.get_mut(probe) {
            *p = true;
        }
    }
}

impl CoverageSource for InMemoryRuntime {
    fn session(&self) -> SessionInfo {
        SessionInfo::new(self.session_id.clone(), self.start_timestamp, epoch_millis())
    }

    fn collect(&self, correlation_id: &str) -> (SessionInfo, Vec<ExecutionRecord>) {
        let correlation_id = normalize(correlation_id);
        let catalog = self.catalog.read().expect("catalog lock poisoned");
        let hits = self.hits.read().expect("hits lock poisoned");
        let mut records = Vec::new();
        if let Some(classes) = hits.get(correlation_id) {
            for (class_id, probes) in classes {
                if let Some((class_name, _)) = catalog.get(class_id) {
                    records.push(ExecutionRecord {
                        class_id: *class_id,
                        class_name: class_name.clone(),
                        correlation_id: correlation_id.to_string(),
                        probes: probes.clone(),
                    });
                }
            }
        }
        // Stable order keeps dumps comparable across cycles
        records.sort_by_key(|r| r.class_id);
        (self.session(), records)
    }

    fn reset(&self, correlation_id: &str) {
        self.hits
            .write()
            .expect("hits lock poisoned")
            .remove(normalize(correlation_id));
    }
}
