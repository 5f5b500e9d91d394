//! Completion counting and the aggregation table.
//!
//! [`AggregationState`] is a plain value owned by the collector's event
//! loop. Each handler updates counts and evaluates the completion predicate
//! for the affected class before returning:
//!
//!   complete(X) ⇔ received[X] ≥ expected[X] ∧ expected[X] ≠ 0
//!
//! Results may arrive before their count announcement; the predicate simply
//! stays false until the announcement lands. Each class fires at most once.
//!
//! Phases: Idle → Accumulating (first message) → Finalizing (simulated
//! class complete) → Shutdown (after export). Nothing leaves Shutdown.
//!
//! Every chunk under one identifier has the same columns as the first one
//! accepted for it, so finalization always concatenates.

use std::collections::{BTreeMap, HashSet};

use hzz_core::records::{EventChunk, RecordError};
use hzz_core::wire::{DataClass, ResultEnvelope};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Accumulating,
    Finalizing,
    Shutdown,
}

// ── Counter ───────────────────────────────────────────────────────────────────

/// Expected/received pair for one class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompletionCounter {
    expected: u64,
    received: u64,
    fired: bool,
}

impl CompletionCounter {
    /// Record a count announcement. A repeated announcement replaces the
    /// previous value.
    pub fn announce(&mut self, expected: u64) {
        self.expected = expected;
    }

    pub fn record(&mut self) {
        self.received += 1;
    }

    /// Zero means "not announced yet" as much as "nothing to do", so it never
    /// completes.
    pub fn is_complete(&self) -> bool {
        self.expected != 0 && self.received >= self.expected
    }

    /// True exactly once: the first time the predicate holds.
    pub fn fire(&mut self) -> bool {
        if !self.fired && self.is_complete() {
            self.fired = true;
            return true;
        }
        false
    }

    pub fn expected(&self) -> Option<u64> {
        (self.expected != 0).then_some(self.expected)
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }
}

// ── Table ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
struct TableEntry {
    class: DataClass,
    chunks: Vec<EventChunk>,
}

/// Identifier → result chunks in arrival order. Append-only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregationTable {
    entries: BTreeMap<String, TableEntry>,
}

impl AggregationTable {
    pub fn append(&mut self, class: DataClass, identifier: String, chunk: EventChunk) {
        self.entries
            .entry(identifier)
            .or_insert_with(|| TableEntry {
                class,
                chunks: Vec::new(),
            })
            .chunks
            .push(chunk);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `chunk` can join `identifier`'s chunks.
    pub fn check(&self, identifier: &str, chunk: &EventChunk) -> Result<(), RecordError> {
        let Some(first) = self.entries.get(identifier).and_then(|e| {
            e.chunks.iter().find(|c| c.num_columns() > 0)
        }) else {
            return Ok(());
        };
        first.check_compatible(chunk)
    }

    pub fn chunk_count(&self, identifier: &str) -> usize {
        self.entries.get(identifier).map_or(0, |e| e.chunks.len())
    }

    /// Concatenate each identifier's chunks into one dataset.
    pub fn finalize(self) -> Result<FinalizedTable, RecordError> {
        let mut entries = BTreeMap::new();
        for (identifier, entry) in self.entries {
            let chunks = entry.chunks.len();
            let records = EventChunk::concat(entry.chunks)?;
            entries.insert(
                identifier,
                FinalizedEntry {
                    class: entry.class,
                    chunks,
                    records,
                },
            );
        }
        Ok(FinalizedTable { entries })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FinalizedEntry {
    pub class: DataClass,
    /// Result chunks concatenated into `records`.
    pub chunks: usize,
    pub records: EventChunk,
}

/// One concatenated dataset per identifier. Read-only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FinalizedTable {
    entries: BTreeMap<String, FinalizedEntry>,
}

impl FinalizedTable {
    pub fn get(&self, identifier: &str) -> Option<&FinalizedEntry> {
        self.entries.get(identifier)
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FinalizedEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn of_class(&self, class: DataClass) -> impl Iterator<Item = (&str, &FinalizedEntry)> {
        self.iter().filter(move |(_, e)| e.class == class)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ── State machine ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum ResultOutcome {
    /// Appended and counted. `completed` is set if this result completed its
    /// class.
    Accepted { completed: Option<DataClass> },
    /// Task id seen before; not counted again.
    Duplicate,
    /// Arrived after finalization began; dropped.
    Late,
    /// Columns differ from the identifier's earlier results; not counted.
    Incompatible(RecordError),
}

#[derive(Debug, Clone)]
pub struct AggregationState {
    phase: Phase,
    observed: CompletionCounter,
    simulated: CompletionCounter,
    table: Option<AggregationTable>,
    seen_tasks: HashSet<String>,
}

impl Default for AggregationState {
    fn default() -> Self {
        Self::new()
    }
}

impl AggregationState {
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            observed: CompletionCounter::default(),
            simulated: CompletionCounter::default(),
            table: Some(AggregationTable::default()),
            seen_tasks: HashSet::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn counter(&self, class: DataClass) -> &CompletionCounter {
        match class {
            DataClass::Observed => &self.observed,
            DataClass::Simulated => &self.simulated,
        }
    }

    fn counter_mut(&mut self, class: DataClass) -> &mut CompletionCounter {
        match class {
            DataClass::Observed => &mut self.observed,
            DataClass::Simulated => &mut self.simulated,
        }
    }

    /// The live table, until finalization takes it.
    pub fn table(&self) -> Option<&AggregationTable> {
        self.table.as_ref()
    }

    fn touch(&mut self) {
        if self.phase == Phase::Idle {
            self.phase = Phase::Accumulating;
        }
    }

    /// Evaluate `class`'s predicate; returns it if it fired just now.
    fn evaluate(&mut self, class: DataClass) -> Option<DataClass> {
        match (class, self.phase) {
            (DataClass::Simulated, Phase::Accumulating) => {
                if self.simulated.fire() {
                    self.phase = Phase::Finalizing;
                    return Some(class);
                }
                None
            }
            (DataClass::Observed, Phase::Accumulating | Phase::Finalizing) => {
                self.observed.fire().then_some(class)
            }
            _ => None,
        }
    }

    /// A count announcement for `class`.
    pub fn on_count(&mut self, class: DataClass, count: u64) -> Option<DataClass> {
        self.touch();
        if let Some(previous) = self.counter(class).expected() {
            if previous != count {
                tracing::warn!(class = %class, previous, count, "count re-announced");
            }
        }
        self.counter_mut(class).announce(count);
        self.evaluate(class)
    }

    /// A result envelope from `class`'s result queue.
    pub fn on_result(&mut self, class: DataClass, result: ResultEnvelope) -> ResultOutcome {
        self.touch();
        if self.phase != Phase::Accumulating {
            return ResultOutcome::Late;
        }
        if let Some(task) = &result.task {
            if self.seen_tasks.contains(task) {
                return ResultOutcome::Duplicate;
            }
        }
        if let Some(table) = self.table.as_ref() {
            if let Err(e) = table.check(&result.identifier, &result.data) {
                return ResultOutcome::Incompatible(e);
            }
        }
        if let Some(task) = result.task {
            self.seen_tasks.insert(task);
        }
        if let Some(table) = self.table.as_mut() {
            table.append(class, result.identifier, result.data);
        }
        self.counter_mut(class).record();
        ResultOutcome::Accepted {
            completed: self.evaluate(class),
        }
    }

    /// Any other message (run-start timestamp).
    pub fn on_control(&mut self) {
        self.touch();
    }

    /// Take and concatenate the table. Only valid once, in `Finalizing`.
    pub fn finalize(&mut self) -> Result<FinalizedTable, AggregationError> {
        if self.phase != Phase::Finalizing {
            return Err(AggregationError::NotReady(self.phase));
        }
        let table = self.table.take().ok_or(AggregationError::AlreadyFinalized)?;
        Ok(table.finalize()?)
    }

    /// Export and shutdown broadcast are done.
    pub fn mark_shutdown(&mut self) {
        if self.phase == Phase::Finalizing {
            self.phase = Phase::Shutdown;
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AggregationError {
    #[error("cannot finalize in phase {0:?}")]
    NotReady(Phase),

    #[error("aggregation table already finalized")]
    AlreadyFinalized,

    #[error("failed to concatenate results: {0}")]
    Records(#[from] RecordError),
}
