//! Per-class execution data

use serde::{Deserialize, Serialize};

/// Correlation id recorded when the instrumented thread carried none.
pub const DEFAULT_CORRELATION_ID: &str = "default_trace_id";

/// Coverage snapshot of one instrumented class.
///
/// `probes` has a fixed length per class, one entry per instrumented probe
/// site. Records without any fired probe are never transmitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Stable hash of the class identity
    pub class_id: i64,

    /// Fully qualified class name
    pub class_name: String,

    /// Per-request/per-thread identifier partitioning coverage data
    pub correlation_id: String,

    /// One flag per probe site, true once the probe has fired
    pub probes: Vec<bool>,
}

impl ExecutionRecord {
    /// Create an empty record (no probes fired) under the default
    /// correlation id.
    pub fn new(class_id: i64, class_name: impl Into<String>, probe_count: usize) -> Self {
        Self::with_correlation(class_id, class_name, DEFAULT_CORRELATION_ID, probe_count)
    }

    /// Create an empty record tagged with an explicit correlation id. An
    /// empty id falls back to the default sentinel.
    pub fn with_correlation(
        class_id: i64,
        class_name: impl Into<String>,
        correlation_id: &str,
        probe_count: usize,
    ) -> Self {
        let correlation_id = if correlation_id.trim().is_empty() {
            DEFAULT_CORRELATION_ID.to_string()
        } else {
            correlation_id.to_string()
        };
        Self {
            class_id,
            class_name: class_name.into(),
            correlation_id,
            probes: vec![false; probe_count],
        }
    }

    /// True when at least one probe fired.
    pub fn has_hits(&self) -> bool {
        self.probes.iter().any(|p| *p)
    }

    /// Mark a probe as executed. Out-of-range indexes are ignored, the probe
    /// array length is fixed by the instrumented class shape.
    pub fn set_probe(&mut self, index: usize) {
        if let Some(p) = self.probes.get_mut(index) {
            *p = true;
        }
    }
}
