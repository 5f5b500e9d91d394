//! Pipeline wire format: queue names, envelopes, and control messages.
//!
//! Every body on the broker is JSON. Task and result bodies are envelopes
//! wrapping an `EventChunk`; count, timing and shutdown bodies are bare JSON
//! scalars. Envelope fields are `identifier`, `val` (variant, simulated tasks
//! only), `data` and `task` (task id, optional).

use serde::{Deserialize, Serialize};

use crate::records::{EventChunk, RecordError};

// ── Queues ────────────────────────────────────────────────────────────────────

/// Well-known queue names. All are declared durable.
pub mod queues {
    /// Observed-class task envelopes.
    pub const TASK: &str = "task_queue";
    /// Simulated-class task envelopes.
    pub const MC_TASK: &str = "mc_task_queue";
    /// Observed-class result envelopes.
    pub const RESULT: &str = "result_queue";
    /// Simulated-class result envelopes.
    pub const MC_RESULT: &str = "mc_result_queue";
    /// Observed-class count announcement.
    pub const CHUNKS: &str = "chunks_queue";
    /// Simulated-class count announcement.
    pub const MC_CHUNKS: &str = "mc_chunks_queue";
    /// Run-start timestamp.
    pub const TIME: &str = "time_queue";
    /// Worker teardown signal.
    pub const SHUTDOWN: &str = "shutdown_queue";

    pub const ALL: [&str; 8] = [TASK, MC_TASK, RESULT, MC_RESULT, CHUNKS, MC_CHUNKS, TIME, SHUTDOWN];

    /// Suffix appended to a queue name to form its dead-letter queue.
    pub const DEAD_LETTER_SUFFIX: &str = ".dlq";

    /// Dead-letter queue for `queue`. Rejected messages land here unchanged.
    pub fn dead_letter(queue: &str) -> String {
        format!("{queue}{DEAD_LETTER_SUFFIX}")
    }

    pub fn is_dead_letter(queue: &str) -> bool {
        queue.ends_with(DEAD_LETTER_SUFFIX)
    }
}

/// Identifier carried by every observed-class envelope.
pub const OBSERVED_IDENTIFIER: &str = "data";

/// Body of a shutdown message.
pub const SHUTDOWN_SENTINEL: &str = "shutdown";

// ── Data class ────────────────────────────────────────────────────────────────

/// Observed data vs simulated (weighted) data. Each class has its own task,
/// result and count queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataClass {
    Observed,
    Simulated,
}

impl DataClass {
    pub const ALL: [DataClass; 2] = [DataClass::Observed, DataClass::Simulated];

    pub fn task_queue(self) -> &'static str {
        match self {
            DataClass::Observed => queues::TASK,
            DataClass::Simulated => queues::MC_TASK,
        }
    }

    pub fn result_queue(self) -> &'static str {
        match self {
            DataClass::Observed => queues::RESULT,
            DataClass::Simulated => queues::MC_RESULT,
        }
    }

    pub fn count_queue(self) -> &'static str {
        match self {
            DataClass::Observed => queues::CHUNKS,
            DataClass::Simulated => queues::MC_CHUNKS,
        }
    }

    pub fn from_task_queue(queue: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.task_queue() == queue)
    }

    pub fn from_result_queue(queue: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.result_queue() == queue)
    }

    pub fn from_count_queue(queue: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.count_queue() == queue)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DataClass::Observed => "observed",
            DataClass::Simulated => "simulated",
        }
    }
}

impl std::fmt::Display for DataClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Envelopes ─────────────────────────────────────────────────────────────────

/// A unit of work: one chunk of one dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    /// Sample identifier (group name, or "data" for observed).
    pub identifier: String,
    /// Simulated variant within the group. Absent for observed data.
    #[serde(rename = "val", default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    /// Task id, echoed in the result for duplicate detection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    pub data: EventChunk,
}

impl TaskEnvelope {
    pub fn observed(data: EventChunk) -> Self {
        Self {
            identifier: OBSERVED_IDENTIFIER.to_string(),
            variant: None,
            task: None,
            data,
        }
    }

    pub fn simulated(group: impl Into<String>, variant: impl Into<String>, data: EventChunk) -> Self {
        Self {
            identifier: group.into(),
            variant: Some(variant.into()),
            task: None,
            data,
        }
    }

    pub fn with_task(mut self, task: impl Into<String>) -> Self {
        self.task = Some(task.into());
        self
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        serde_json::to_vec(self).map_err(|e| WireError::Encode(e.to_string()))
    }

    /// Decode a task body for `class`.
    ///
    /// The observed queue also accepts a bare chunk with no envelope, which is
    /// tagged with [`OBSERVED_IDENTIFIER`].
    pub fn decode(class: DataClass, body: &[u8]) -> Result<Self, WireError> {
        let envelope = match serde_json::from_slice::<TaskEnvelope>(body) {
            Ok(env) => env,
            Err(e) if class == DataClass::Observed => {
                let data: EventChunk = serde_json::from_slice(body)
                    .map_err(|_| WireError::invalid("task envelope", e))?;
                TaskEnvelope::observed(data)
            }
            Err(e) => return Err(WireError::invalid("task envelope", e)),
        };
        if class == DataClass::Simulated && envelope.variant.is_none() {
            return Err(WireError::MissingVariant(envelope.identifier));
        }
        envelope.data.validate()?;
        Ok(envelope)
    }
}

/// A transformed chunk on its way to the collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    /// Sample identifier (group, never the variant).
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    pub data: EventChunk,
}

impl ResultEnvelope {
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        serde_json::to_vec(self).map_err(|e| WireError::Encode(e.to_string()))
    }

    /// Decode a result body. The observed result queue also accepts a bare
    /// chunk, as the task queue does.
    pub fn decode(class: DataClass, body: &[u8]) -> Result<Self, WireError> {
        let envelope = match serde_json::from_slice::<ResultEnvelope>(body) {
            Ok(env) => env,
            Err(e) if class == DataClass::Observed => {
                let data: EventChunk = serde_json::from_slice(body)
                    .map_err(|_| WireError::invalid("result envelope", e))?;
                ResultEnvelope {
                    identifier: OBSERVED_IDENTIFIER.to_string(),
                    task: None,
                    data,
                }
            }
            Err(e) => return Err(WireError::invalid("result envelope", e)),
        };
        envelope.data.validate()?;
        Ok(envelope)
    }
}

// ── Control messages ──────────────────────────────────────────────────────────

pub fn encode_count(count: u64) -> Vec<u8> {
    count.to_string().into_bytes()
}

pub fn decode_count(body: &[u8]) -> Result<u64, WireError> {
    serde_json::from_slice(body).map_err(|e| WireError::invalid("count announcement", e))
}

/// Run-start timestamp as fractional unix seconds.
pub fn encode_run_start(unix_secs: f64) -> Result<Vec<u8>, WireError> {
    serde_json::to_vec(&unix_secs).map_err(|e| WireError::Encode(e.to_string()))
}

pub fn decode_run_start(body: &[u8]) -> Result<f64, WireError> {
    serde_json::from_slice(body).map_err(|e| WireError::invalid("run-start timestamp", e))
}

pub fn encode_shutdown() -> Vec<u8> {
    format!("\"{SHUTDOWN_SENTINEL}\"").into_bytes()
}

/// Any body on the shutdown queue stops a worker; this reports whether it was
/// the well-formed sentinel.
pub fn is_shutdown(body: &[u8]) -> bool {
    match serde_json::from_slice::<String>(body) {
        Ok(s) => s == SHUTDOWN_SENTINEL,
        Err(_) => body == SHUTDOWN_SENTINEL.as_bytes(),
    }
}

/// Deterministic id for the `index`-th chunk of a dataset in one run.
///
///   task = hex(BLAKE3(run_id || class || identifier || variant || index_le))
pub fn task_id(
    run_id: &str,
    class: DataClass,
    identifier: &str,
    variant: Option<&str>,
    index: u64,
) -> String {
    let mut h = blake3::Hasher::new();
    h.update(run_id.as_bytes());
    h.update(&[0]);
    h.update(class.as_str().as_bytes());
    h.update(&[0]);
    h.update(identifier.as_bytes());
    h.update(&[0]);
    h.update(variant.unwrap_or("").as_bytes());
    h.update(&[0]);
    h.update(&index.to_le_bytes());
    h.finalize().to_hex().to_string()
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting a message body.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WireError {
    #[error("invalid {what}: {reason}")]
    Invalid { what: &'static str, reason: String },

    #[error("simulated task for {0:?} has no variant")]
    MissingVariant(String),

    #[error("malformed records: {0}")]
    Records(#[from] RecordError),

    #[error("failed to encode: {0}")]
    Encode(String),
}

impl WireError {
    fn invalid(what: &'static str, err: serde_json::Error) -> Self {
        WireError::Invalid {
            what,
            reason: err.to_string(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
