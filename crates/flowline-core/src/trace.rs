//! Execution trace kept for the lifetime of one flow invocation.
//!
//! Every step and nested flow appends a [`StepRecord`]. Step names may repeat
//! inside a flow body, so each record gets a trace key that is unique within
//! the invocation: the first use of `call-llm` is keyed `call-llm`, the second
//! `call-llm-2` and so on. A trace recorded by one invocation can seed the
//! replay map of a later one, in which case completed steps return their
//! recorded output instead of running again.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// What produced a trace record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    /// A step run through the step runner
    Step,
    /// A flow invocation, top-level or nested
    Flow,
}

/// Progress of a trace record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    /// Started, not yet finished
    Running,
    /// Finished with a value
    Succeeded,
    /// Finished with an error
    Failed,
}

/// One entry of the execution trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Unique key within the invocation
    pub key: String,
    /// Name the step or flow was invoked with
    pub name: String,
    /// Step or flow
    pub kind: RecordKind,
    /// Current status
    pub status: RecordStatus,
    /// Output recorded on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Error message recorded on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether the output came from a replayed trace
    #[serde(default)]
    pub replayed: bool,
    /// When the record was opened
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration, set once finished
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Default)]
struct TraceState {
    records: Vec<StepRecord>,
    name_counts: HashMap<String, usize>,
}

/// Shared, append-only trace of one invocation.
///
/// Clones share the same underlying records, which is how nested flows
/// contribute to their parent's trace.
#[derive(Debug, Clone, Default)]
pub struct Trace {
    state: Arc<Mutex<TraceState>>,
    replay: Arc<HashMap<String, Value>>,
}

impl Trace {
    /// Empty trace
    pub fn new() -> Self {
        Self::default()
    }

    /// Trace seeded with the successful outputs of earlier records
    pub fn with_replay(records: &[StepRecord]) -> Self {
        let replay = records
            .iter()
            .filter(|r| r.kind == RecordKind::Step && r.status == RecordStatus::Succeeded)
            .filter_map(|r| r.output.clone().map(|output| (r.key.clone(), output)))
            .collect();

        Self {
            state: Arc::default(),
            replay: Arc::new(replay),
        }
    }

    /// Open a record for `name` and return its unique key
    pub(crate) fn open(&self, name: &str, kind: RecordKind) -> String {
        let mut state = self.state.lock();
        let count = state.name_counts.entry(name.to_string()).or_insert(0);
        *count += 1;
        let key = if *count == 1 {
            name.to_string()
        } else {
            format!("{}-{}", name, count)
        };

        state.records.push(StepRecord {
            key: key.clone(),
            name: name.to_string(),
            kind,
            status: RecordStatus::Running,
            output: None,
            error: None,
            replayed: false,
            started_at: Utc::now(),
            duration_ms: None,
        });
        key
    }

    /// Recorded output for a key, if the trace was seeded for replay
    pub(crate) fn replayed_output(&self, key: &str) -> Option<Value> {
        self.replay.get(key).cloned()
    }

    pub(crate) fn succeed(&self, key: &str, output: Option<Value>, replayed: bool) {
        self.finish(key, |record| {
            record.status = RecordStatus::Succeeded;
            record.output = output;
            record.replayed = replayed;
        });
    }

    pub(crate) fn fail(&self, key: &str, error: String) {
        self.finish(key, |record| {
            record.status = RecordStatus::Failed;
            record.error = Some(error);
        });
    }

    fn finish(&self, key: &str, update: impl FnOnce(&mut StepRecord)) {
        let mut state = self.state.lock();
        if let Some(record) = state.records.iter_mut().rev().find(|r| r.key == key) {
            let elapsed = Utc::now() - record.started_at;
            record.duration_ms = Some(elapsed.num_milliseconds().max(0) as u64);
            update(record);
        }
    }

    /// Snapshot of all records in the order they were opened
    pub fn records(&self) -> Vec<StepRecord> {
        self.state.lock().records.clone()
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    /// Whether nothing was recorded yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
