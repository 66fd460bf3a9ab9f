use crate::context::IngestContext;
use crate::decode::{self, Decoded, RawRecord};
use crate::ingest::deadline::{DeadlineFlag, DeadlineGuard};
use crate::ingest::event::BatchResponse;
use crate::issues::extract::Extractor;
use crate::logging::ndjson;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    Pending,
    Done,
    Failed,
    Unattempted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordOutcome {
    pub index: usize,
    pub record_id: String,
    pub state: RecordState,
    pub detail: Option<String>,
}

/// Per-batch bookkeeping of record states, addressed by input position.
#[derive(Debug, Clone)]
pub struct PendingSet {
    ids: Vec<String>,
    states: Vec<RecordState>,
}

impl PendingSet {
    pub fn new(records: &[RawRecord]) -> Self {
        Self {
            ids: records.iter().map(|r| r.record_id.clone()).collect(),
            states: vec![RecordState::Pending; records.len()],
        }
    }

    pub fn mark(&mut self, index: usize, state: RecordState) {
        if let Some(slot) = self.states.get_mut(index)
            && *slot == RecordState::Pending
        {
            *slot = state;
        }
    }

    pub fn state(&self, index: usize) -> Option<RecordState> {
        self.states.get(index).copied()
    }

    /// Moves every record still pending to `Unattempted`.
    pub fn abandon_rest(&mut self) -> usize {
        let mut n = 0;
        for state in self.states.iter_mut() {
            if *state == RecordState::Pending {
                *state = RecordState::Unattempted;
                n += 1;
            }
        }
        n
    }

    pub fn count(&self, state: RecordState) -> usize {
        self.states.iter().filter(|s| **s == state).count()
    }

    /// Ids of records that were never attempted, in input order.
    pub fn unattempted(&self) -> impl Iterator<Item = &str> {
        self.ids
            .iter()
            .zip(&self.states)
            .filter(|(_, s)| **s == RecordState::Unattempted)
            .map(|(id, _)| id.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct BatchReport {
    pub response: BatchResponse,
    pub outcomes: Vec<RecordOutcome>,
    pub deadline_hit: bool,
}

impl BatchReport {
    pub fn count(&self, state: RecordState) -> usize {
        self.outcomes.iter().filter(|o| o.state == state).count()
    }
}

pub struct BatchCoordinator<E> {
    extractor: E,
    outcome_log: Option<PathBuf>,
}

impl<E: Extractor> BatchCoordinator<E> {
    pub fn new(extractor: E) -> Self {
        Self {
            extractor,
            outcome_log: None,
        }
    }

    /// Mirror every record outcome as one NDJSON line to `path`.
    pub fn with_outcome_log(mut self, path: Option<PathBuf>) -> Self {
        self.outcome_log = path;
        self
    }

    pub fn extractor(&self) -> &E {
        &self.extractor
    }

    /// Arms a deadline of `budget`, processes the batch, and disarms.
    pub fn run(&self, ctx: &IngestContext, records: &[RawRecord], budget: Duration) -> BatchReport {
        let guard = DeadlineGuard::arm(budget);
        let report = self.process(ctx, records, &guard.flag());
        guard.disarm();
        report
    }

    /// Processes records strictly in order until done or until `deadline`
    /// trips. Decode and extract failures are logged and never retried; only
    /// records that were not attempted before the deadline are reported back.
    pub fn process(
        &self,
        ctx: &IngestContext,
        records: &[RawRecord],
        deadline: &DeadlineFlag,
    ) -> BatchReport {
        let span = info_span!(
            "batch",
            actor = %ctx.actor,
            workspace = %ctx.workspace,
            records = records.len()
        );
        let _enter = span.enter();

        let mut pending = PendingSet::new(records);
        let mut outcomes = Vec::with_capacity(records.len());
        let mut deadline_hit = false;

        for (index, record) in records.iter().enumerate() {
            if deadline.expired() {
                deadline_hit = true;
                break;
            }
            let (state, detail) = self.process_record(ctx, record);
            pending.mark(index, state);
            self.record(
                &mut outcomes,
                RecordOutcome {
                    index,
                    record_id: record.record_id.clone(),
                    state,
                    detail,
                },
            );
        }

        let abandoned = pending.abandon_rest();
        if abandoned > 0 {
            warn!(abandoned, "deadline reached before batch finished");
        }
        for (index, record) in records.iter().enumerate() {
            if pending.state(index) == Some(RecordState::Unattempted) {
                self.record(
                    &mut outcomes,
                    RecordOutcome {
                        index,
                        record_id: record.record_id.clone(),
                        state: RecordState::Unattempted,
                        detail: None,
                    },
                );
            }
        }

        let response = BatchResponse::from_ids(pending.unattempted());
        info!(
            done = pending.count(RecordState::Done),
            failed = pending.count(RecordState::Failed),
            unattempted = abandoned,
            "batch processed"
        );
        BatchReport {
            response,
            outcomes,
            deadline_hit,
        }
    }

    fn process_record(
        &self,
        ctx: &IngestContext,
        record: &RawRecord,
    ) -> (RecordState, Option<String>) {
        let message = match decode::decode(record) {
            Ok(Decoded::Data(message)) => message,
            Ok(Decoded::Skip { message_type }) => {
                debug!(record_id = %record.record_id, %message_type, "skipping non-data record");
                return (RecordState::Done, Some(format!("skipped {message_type}")));
            }
            Err(err) => {
                error!(record_id = %record.record_id, error = %err, "failed to decode record");
                return (RecordState::Failed, Some(err.to_string()));
            }
        };

        match self.extractor.extract(ctx, &message) {
            Ok(summary) => {
                debug!(
                    record_id = %record.record_id,
                    events = summary.events,
                    matched = summary.matched,
                    groups = summary.groups.len(),
                    "record extracted"
                );
                (RecordState::Done, None)
            }
            Err(err) => {
                error!(record_id = %record.record_id, error = %err, "failed to extract issues");
                (RecordState::Failed, Some(err.to_string()))
            }
        }
    }

    fn record(&self, outcomes: &mut Vec<RecordOutcome>, outcome: RecordOutcome) {
        if let Some(path) = self.outcome_log.as_deref()
            && let Err(err) = ndjson::mirror_outcome(path, &outcome)
        {
            warn!(path = %path.display(), error = %err, "failed to mirror record outcome");
        }
        outcomes.push(outcome);
    }
}
