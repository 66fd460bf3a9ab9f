use crate::context::IngestContext;
use crate::decode::DecodedMessage;
use crate::issues::fingerprint::{self, FingerprintError};
use crate::issues::signature;
use crate::issues::store::{IssueStore, StoreError};
use crate::issues::{Occurrence, Pointer};
use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("store write failed after {attempts} attempt(s): {source}")]
    Store {
        attempts: u32,
        #[source]
        source: StoreError,
    },

    #[error("cannot fingerprint log event {index}: {source}")]
    Fingerprint {
        index: usize,
        #[source]
        source: FingerprintError,
    },

    #[error("malformed log event {index}: {reason}")]
    MalformedEvent { index: usize, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    pub events: usize,
    pub matched: usize,
    pub groups: Vec<String>,
}

/// Bounded local retry for store writes that failed for transient reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    fn run<T>(
        &self,
        what: &str,
        mut op: impl FnMut() -> Result<T, StoreError>,
    ) -> Result<T, ExtractError> {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Ok(v) => return Ok(v),
                Err(err) if err.is_transient() && attempt < attempts => {
                    warn!(error = %err, attempt, op = what, "transient store failure, retrying");
                    thread::sleep(self.backoff * attempt);
                    attempt += 1;
                }
                Err(source) => {
                    return Err(ExtractError::Store {
                        attempts: attempt,
                        source,
                    });
                }
            }
        }
    }
}

pub trait Extractor {
    fn extract(
        &self,
        ctx: &IngestContext,
        message: &DecodedMessage,
    ) -> Result<ExtractSummary, ExtractError>;
}

pub struct IssueExtractor<S> {
    store: S,
    retry: RetryPolicy,
}

impl<S: IssueStore> IssueExtractor<S> {
    pub fn new(store: S, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S: IssueStore> Extractor for IssueExtractor<S> {
    /// Upserts one issue per error-bearing event, then adds the per-hour
    /// counts for the whole message. Events without an error signature are
    /// ignored.
    fn extract(
        &self,
        ctx: &IngestContext,
        message: &DecodedMessage,
    ) -> Result<ExtractSummary, ExtractError> {
        let now = Utc::now();
        let mut buckets: BTreeMap<(String, DateTime<Utc>), i64> = BTreeMap::new();
        let mut matched = 0;

        for (index, event) in message.log_events.iter().enumerate() {
            let Some(sig) = signature::detect(&event.message) else {
                continue;
            };
            let group = fingerprint::group_key(&sig.error, sig.top_frame.as_deref(), &event.log_group)
                .map_err(|source| ExtractError::Fingerprint { index, source })?;
            let hour = event
                .timestamp
                .duration_trunc(TimeDelta::hours(1))
                .map_err(|e| ExtractError::MalformedEvent {
                    index,
                    reason: e.to_string(),
                })?;

            let occurrence = Occurrence {
                error: sig.error,
                message: sig.message,
                stack: sig.stack,
                pointer: Pointer {
                    log_group: event.log_group.clone(),
                    log_stream: event.log_stream.clone(),
                    timestamp: event.timestamp,
                },
            };
            let issue = self.retry.run("upsert_issue", || {
                self.store
                    .upsert_issue(&ctx.workspace, &group, &occurrence, now)
            })?;
            debug!(
                actor = %ctx.actor,
                workspace = %ctx.workspace,
                group = %group,
                issue_id = %issue.id,
                error = %issue.error,
                "issue upserted"
            );

            *buckets.entry((group, hour)).or_default() += 1;
            matched += 1;
        }

        for ((group, hour), delta) in &buckets {
            self.retry.run("increment_count", || {
                self.store
                    .increment_count(&ctx.workspace, group, *hour, *delta)
            })?;
        }

        let mut groups: Vec<String> = buckets.into_keys().map(|(group, _)| group).collect();
        groups.dedup();
        Ok(ExtractSummary {
            events: message.log_events.len(),
            matched,
            groups,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::LogEvent;
    use crate::issues::Issue;
    use crate::issues::store::SqliteIssueStore;
    use chrono::TimeZone;
    use std::cell::Cell;

    fn message(events: &[(i64, &str)]) -> DecodedMessage {
        DecodedMessage {
            message_type: "DATA_MESSAGE".to_string(),
            owner: None,
            log_group: "/aws/lambda/api".to_string(),
            log_stream: "s1".to_string(),
            subscription_filters: vec![],
            log_events: events
                .iter()
                .map(|(secs, msg)| LogEvent {
                    id: None,
                    log_group: "/aws/lambda/api".to_string(),
                    log_stream: "s1".to_string(),
                    timestamp: Utc.timestamp_opt(*secs, 0).unwrap(),
                    message: msg.to_string(),
                })
                .collect(),
        }
    }

    const BOOM: &str = "2024-01-01T00:00:00.000Z\treq\tERROR\tTypeError: boom\n    at run (/var/task/index.js:3:7)";

    #[test]
    fn groups_repeated_errors_and_counts_per_hour() {
        let extractor =
            IssueExtractor::new(SqliteIssueStore::open_in_memory().unwrap(), RetryPolicy::none());
        let ctx = IngestContext::system("ws");
        let msg = message(&[
            (1_704_067_200, BOOM),
            (1_704_067_260, "2024-01-01T00:01:00.000Z\treq\tINFO\tall good"),
            (1_704_067_320, BOOM),
            (1_704_070_800, BOOM),
        ]);

        let summary = extractor.extract(&ctx, &msg).unwrap();
        assert_eq!(summary.events, 4);
        assert_eq!(summary.matched, 3);
        assert_eq!(summary.groups.len(), 1);

        let store = extractor.store();
        let issues = store.list_issues("ws").unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].time_seen, Utc.timestamp_opt(1_704_070_800, 0).unwrap());

        let counts = store.counts_for("ws", &summary.groups[0]).unwrap();
        assert_eq!(counts.iter().map(|c| c.count).collect::<Vec<_>>(), vec![2, 1]);
    }

    #[test]
    fn message_without_errors_touches_nothing() {
        let extractor =
            IssueExtractor::new(SqliteIssueStore::open_in_memory().unwrap(), RetryPolicy::none());
        let ctx = IngestContext::system("ws");
        let summary = extractor
            .extract(&ctx, &message(&[(1_704_067_200, "START RequestId: abc")]))
            .unwrap();
        assert_eq!(summary.matched, 0);
        assert!(extractor.store().list_issues("ws").unwrap().is_empty());
    }

    struct FlakyStore {
        inner: SqliteIssueStore,
        busy_left: Cell<u32>,
    }

    impl FlakyStore {
        fn busy(&self) -> Option<StoreError> {
            if self.busy_left.get() == 0 {
                return None;
            }
            self.busy_left.set(self.busy_left.get() - 1);
            Some(StoreError::Sqlite(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
                None,
            )))
        }
    }

    impl IssueStore for FlakyStore {
        fn upsert_issue(
            &self,
            workspace: &str,
            group: &str,
            occurrence: &Occurrence,
            now: DateTime<Utc>,
        ) -> Result<Issue, StoreError> {
            if let Some(err) = self.busy() {
                return Err(err);
            }
            self.inner.upsert_issue(workspace, group, occurrence, now)
        }

        fn increment_count(
            &self,
            workspace: &str,
            group: &str,
            hour: DateTime<Utc>,
            delta: i64,
        ) -> Result<(), StoreError> {
            self.inner.increment_count(workspace, group, hour, delta)
        }
    }

    #[test]
    fn transient_failures_are_retried_within_budget() {
        let store = FlakyStore {
            inner: SqliteIssueStore::open_in_memory().unwrap(),
            busy_left: Cell::new(2),
        };
        let extractor = IssueExtractor::new(
            store,
            RetryPolicy {
                attempts: 3,
                backoff: Duration::ZERO,
            },
        );
        let ctx = IngestContext::system("ws");
        extractor
            .extract(&ctx, &message(&[(1_704_067_200, BOOM)]))
            .unwrap();
        assert_eq!(extractor.store().inner.list_issues("ws").unwrap().len(), 1);
    }

    #[test]
    fn exhausted_retries_surface_store_error() {
        let store = FlakyStore {
            inner: SqliteIssueStore::open_in_memory().unwrap(),
            busy_left: Cell::new(5),
        };
        let extractor = IssueExtractor::new(
            store,
            RetryPolicy {
                attempts: 2,
                backoff: Duration::ZERO,
            },
        );
        let ctx = IngestContext::system("ws");
        let err = extractor
            .extract(&ctx, &message(&[(1_704_067_200, BOOM)]))
            .unwrap_err();
        assert!(matches!(err, ExtractError::Store { attempts: 2, .. }));
    }
}
