//! Merging of per-worker outcomes into one record per unit

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Why a worker produced no payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FailureKind {
    WorkerFailure,
    TimeoutFailure,
    OutputParseError,
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::WorkerFailure => "WorkerFailure",
            FailureKind::TimeoutFailure => "TimeoutFailure",
            FailureKind::OutputParseError => "OutputParseError",
            FailureKind::Cancelled => "Cancelled",
        };
        f.write_str(name)
    }
}

/// Terminal failure of one dispatch task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl WorkerFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Value recorded for a worker in a merged result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkerOutput {
    /// Failure marker, serialized as `{"error": {"kind", "message"}}`
    Failed { error: WorkerFailure },
    /// The worker's JSON object
    Payload(Map<String, Value>),
}

impl WorkerOutput {
    pub fn is_failure(&self) -> bool {
        matches!(self, WorkerOutput::Failed { .. })
    }

    pub fn failure(&self) -> Option<&WorkerFailure> {
        match self {
            WorkerOutput::Failed { error } => Some(error),
            WorkerOutput::Payload(_) => None,
        }
    }
}

impl From<WorkerFailure> for WorkerOutput {
    fn from(error: WorkerFailure) -> Self {
        WorkerOutput::Failed { error }
    }
}

/// Resolved outcome of one dispatch task
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerOutcome {
    pub worker: String,
    pub output: WorkerOutput,
}

impl WorkerOutcome {
    pub fn payload(worker: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            worker: worker.into(),
            output: WorkerOutput::Payload(payload),
        }
    }

    pub fn failed(worker: impl Into<String>, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            worker: worker.into(),
            output: WorkerFailure::new(kind, message).into(),
        }
    }
}

/// All worker outputs for one unit, keyed by worker name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedResult {
    pub unit_identity: String,
    pub worker_outputs: BTreeMap<String, WorkerOutput>,
}

impl MergedResult {
    pub fn empty(unit_identity: impl Into<String>) -> Self {
        Self {
            unit_identity: unit_identity.into(),
            worker_outputs: BTreeMap::new(),
        }
    }

    pub fn failures(&self) -> usize {
        self.worker_outputs.values().filter(|o| o.is_failure()).count()
    }
}

/// Merge outcomes into a record keyed by worker name.
///
/// The result does not depend on the order of `outcomes`. Should a worker
/// name appear twice, a payload beats a failure and otherwise the entry with
/// the smaller serialized form is kept.
pub fn merge(unit_identity: &str, outcomes: impl IntoIterator<Item = WorkerOutcome>) -> MergedResult {
    let mut merged = MergedResult::empty(unit_identity);
    for outcome in outcomes {
        let keep_existing = merged
            .worker_outputs
            .get(&outcome.worker)
            .is_some_and(|existing| !replaces(&outcome.output, existing));
        if !keep_existing {
            merged.worker_outputs.insert(outcome.worker, outcome.output);
        }
    }
    merged
}

fn replaces(candidate: &WorkerOutput, existing: &WorkerOutput) -> bool {
    match (candidate.is_failure(), existing.is_failure()) {
        (false, true) => true,
        (true, false) => false,
        _ => canonical(candidate) < canonical(existing),
    }
}

fn canonical(output: &WorkerOutput) -> String {
    serde_json::to_string(output).unwrap_or_default()
}

/// Validate raw worker output: it must be a single JSON object.
pub fn parse_payload(raw: &[u8]) -> Result<Map<String, Value>, WorkerFailure> {
    let text = std::str::from_utf8(raw)
        .map_err(|e| WorkerFailure::new(FailureKind::OutputParseError, format!("output is not UTF-8: {}", e)))?;
    if text.trim().is_empty() {
        return Err(WorkerFailure::new(
            FailureKind::OutputParseError,
            "worker produced no output",
        ));
    }
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(WorkerFailure::new(
            FailureKind::OutputParseError,
            format!("expected a JSON object, got {}", json_type(&other)),
        )),
        Err(e) => Err(WorkerFailure::new(
            FailureKind::OutputParseError,
            format!("invalid JSON: {}", e),
        )),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
