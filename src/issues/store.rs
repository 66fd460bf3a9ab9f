use crate::issues::{Issue, IssueCount, Occurrence, Pointer};
use anyhow::Context;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const ISSUE_COLUMNS: &str = "id, workspace, grp, error, message, stack_json, pointer_json, \
     time_seen, time_created, time_updated, time_ignored, time_resolved";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("corrupt row for group {group}: {reason}")]
    Corrupt { group: String, reason: String },
}

impl StoreError {
    /// Whether retrying the same write could succeed without any change to the
    /// input.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

/// Durable home of issues and their hourly counts.
///
/// Both operations are independent, idempotent in effect, and self-contained:
/// callers never hold a transaction across them.
pub trait IssueStore {
    fn upsert_issue(
        &self,
        workspace: &str,
        group: &str,
        occurrence: &Occurrence,
        now: DateTime<Utc>,
    ) -> Result<Issue, StoreError>;

    fn increment_count(
        &self,
        workspace: &str,
        group: &str,
        hour: DateTime<Utc>,
        delta: i64,
    ) -> Result<(), StoreError>;
}

impl<T: IssueStore + ?Sized> IssueStore for &T {
    fn upsert_issue(
        &self,
        workspace: &str,
        group: &str,
        occurrence: &Occurrence,
        now: DateTime<Utc>,
    ) -> Result<Issue, StoreError> {
        (**self).upsert_issue(workspace, group, occurrence, now)
    }

    fn increment_count(
        &self,
        workspace: &str,
        group: &str,
        hour: DateTime<Utc>,
        delta: i64,
    ) -> Result<(), StoreError> {
        (**self).increment_count(workspace, group, hour, delta)
    }
}

pub fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS issues (
            id TEXT NOT NULL UNIQUE,
            workspace TEXT NOT NULL,
            grp TEXT NOT NULL,
            error TEXT NOT NULL,
            message TEXT NOT NULL,
            stack_json TEXT NOT NULL,
            pointer_json TEXT NOT NULL,
            time_seen INTEGER NOT NULL,
            time_created INTEGER NOT NULL,
            time_updated INTEGER NOT NULL,
            time_ignored INTEGER,
            time_resolved INTEGER,
            PRIMARY KEY(workspace, grp)
        );

        CREATE INDEX IF NOT EXISTS idx_issues_workspace_seen ON issues(workspace, time_seen);

        CREATE TABLE IF NOT EXISTS issue_counts (
            workspace TEXT NOT NULL,
            grp TEXT NOT NULL,
            hour INTEGER NOT NULL,
            count INTEGER NOT NULL,
            PRIMARY KEY(workspace, grp, hour)
        );
        ",
    )?;

    Ok(())
}

pub struct SqliteIssueStore {
    conn: Connection,
}

impl SqliteIssueStore {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create db parent dir {}", parent.display()))?;
        }
        let conn =
            Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        migrate(&conn).with_context(|| format!("migrate {}", path.display()))?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        migrate(&conn)?;
        Ok(Self { conn })
    }

    pub fn get_issue(&self, workspace: &str, group: &str) -> Result<Option<Issue>, StoreError> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE workspace = ?1 AND grp = ?2"),
                params![workspace, group],
                IssueRow::from_row,
            )
            .optional()?;
        row.map(IssueRow::into_issue).transpose()
    }

    /// Issues of a workspace, most recently seen first.
    pub fn list_issues(&self, workspace: &str) -> Result<Vec<Issue>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ISSUE_COLUMNS} FROM issues WHERE workspace = ?1 ORDER BY time_seen DESC, grp ASC"
        ))?;
        let rows = stmt
            .query_map(params![workspace], IssueRow::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(IssueRow::into_issue).collect()
    }

    pub fn counts_for(&self, workspace: &str, group: &str) -> Result<Vec<IssueCount>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT hour, count FROM issue_counts
             WHERE workspace = ?1 AND grp = ?2 ORDER BY hour ASC",
        )?;
        let rows = stmt
            .query_map(params![workspace, group], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(hour, count)| {
                Ok(IssueCount {
                    workspace: workspace.to_string(),
                    group: group.to_string(),
                    hour: from_millis(hour, group)?,
                    count,
                })
            })
            .collect()
    }
}

impl IssueStore for SqliteIssueStore {
    fn upsert_issue(
        &self,
        workspace: &str,
        group: &str,
        occurrence: &Occurrence,
        now: DateTime<Utc>,
    ) -> Result<Issue, StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        let existing = tx
            .query_row(
                &format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE workspace = ?1 AND grp = ?2"),
                params![workspace, group],
                IssueRow::from_row,
            )
            .optional()?
            .map(IssueRow::into_issue)
            .transpose()?;

        let issue = match existing {
            Some(mut issue) => {
                issue.merge(occurrence, now);
                issue
            }
            None => Issue::create(workspace, group, occurrence),
        };
        write_issue(&tx, &issue)?;
        tx.commit()?;
        Ok(issue)
    }

    fn increment_count(
        &self,
        workspace: &str,
        group: &str,
        hour: DateTime<Utc>,
        delta: i64,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO issue_counts (workspace, grp, hour, count) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(workspace, grp, hour) DO UPDATE SET count = count + excluded.count",
            params![workspace, group, hour.timestamp_millis(), delta],
        )?;
        Ok(())
    }
}

fn write_issue(conn: &Connection, issue: &Issue) -> Result<(), StoreError> {
    let stack_json = serde_json::to_string(&issue.stack).map_err(|e| StoreError::Corrupt {
        group: issue.group.clone(),
        reason: e.to_string(),
    })?;
    let pointer_json =
        serde_json::to_string(&issue.pointer).map_err(|e| StoreError::Corrupt {
            group: issue.group.clone(),
            reason: e.to_string(),
        })?;
    conn.execute(
        "INSERT INTO issues (id, workspace, grp, error, message, stack_json, pointer_json,
                             time_seen, time_created, time_updated, time_ignored, time_resolved)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
         ON CONFLICT(workspace, grp) DO UPDATE SET
            message = excluded.message,
            stack_json = excluded.stack_json,
            pointer_json = excluded.pointer_json,
            time_seen = excluded.time_seen,
            time_updated = excluded.time_updated",
        params![
            issue.id.to_string(),
            issue.workspace,
            issue.group,
            issue.error,
            issue.message,
            stack_json,
            pointer_json,
            issue.time_seen.timestamp_millis(),
            issue.time_created.timestamp_millis(),
            issue.time_updated.timestamp_millis(),
            issue.time_ignored.map(|t| t.timestamp_millis()),
            issue.time_resolved.map(|t| t.timestamp_millis()),
        ],
    )?;
    Ok(())
}

struct IssueRow {
    id: String,
    workspace: String,
    group: String,
    error: String,
    message: String,
    stack_json: String,
    pointer_json: String,
    time_seen: i64,
    time_created: i64,
    time_updated: i64,
    time_ignored: Option<i64>,
    time_resolved: Option<i64>,
}

impl IssueRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            workspace: row.get(1)?,
            group: row.get(2)?,
            error: row.get(3)?,
            message: row.get(4)?,
            stack_json: row.get(5)?,
            pointer_json: row.get(6)?,
            time_seen: row.get(7)?,
            time_created: row.get(8)?,
            time_updated: row.get(9)?,
            time_ignored: row.get(10)?,
            time_resolved: row.get(11)?,
        })
    }

    fn into_issue(self) -> Result<Issue, StoreError> {
        let corrupt = |reason: String| StoreError::Corrupt {
            group: self.group.clone(),
            reason,
        };
        let id = Uuid::parse_str(&self.id).map_err(|e| corrupt(e.to_string()))?;
        let stack: Vec<String> =
            serde_json::from_str(&self.stack_json).map_err(|e| corrupt(e.to_string()))?;
        let pointer: Pointer =
            serde_json::from_str(&self.pointer_json).map_err(|e| corrupt(e.to_string()))?;
        Ok(Issue {
            id,
            stack,
            pointer,
            time_seen: from_millis(self.time_seen, &self.group)?,
            time_created: from_millis(self.time_created, &self.group)?,
            time_updated: from_millis(self.time_updated, &self.group)?,
            time_ignored: self
                .time_ignored
                .map(|t| from_millis(t, &self.group))
                .transpose()?,
            time_resolved: self
                .time_resolved
                .map(|t| from_millis(t, &self.group))
                .transpose()?,
            workspace: self.workspace,
            group: self.group,
            error: self.error,
            message: self.message,
        })
    }
}

fn from_millis(millis: i64, group: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| StoreError::Corrupt {
        group: group.to_string(),
        reason: format!("timestamp {millis} out of range"),
    })
}
