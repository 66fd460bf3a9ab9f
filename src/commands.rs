use crate::config::{self, Config, Overrides};
use crate::context::IngestContext;
use crate::ingest::{BatchCoordinator, BatchResponse, RecordState, StreamEvent};
use crate::issues::extract::IssueExtractor;
use crate::issues::store::SqliteIssueStore;
use crate::logging;
use anyhow::{Context, Result, bail};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct CommonArgs {
    pub config: Option<PathBuf>,
    pub workspace: Option<String>,
    pub state_db: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct IngestCommand {
    pub event_file: PathBuf,
    pub common: CommonArgs,
    pub deadline_secs: Option<u64>,
    pub log: Option<PathBuf>,
}

fn resolve_config(
    common: &CommonArgs,
    deadline_secs: Option<u64>,
    log: Option<PathBuf>,
) -> Result<Config> {
    let cfg = config::load_config(common.config.as_deref())?;
    config::apply_overrides(
        cfg,
        Overrides {
            workspace: common.workspace.clone(),
            state_db: common.state_db.clone(),
            deadline_secs,
            log,
        },
    )
}

fn read_event(path: &Path) -> Result<Vec<u8>> {
    if path == Path::new("-") {
        let mut buf = Vec::new();
        io::stdin()
            .read_to_end(&mut buf)
            .context("read stream event from stdin")?;
        return Ok(buf);
    }
    std::fs::read(path).with_context(|| format!("read stream event {}", path.display()))
}

/// Runs one batch from a stream event file and returns the partial-failure
/// response that would be handed back to the transport.
pub fn ingest_batch(cmd: &IngestCommand, cfg: &Config) -> Result<BatchResponse> {
    let records = StreamEvent::from_slice(&read_event(&cmd.event_file)?)?.into_records()?;
    let store = SqliteIssueStore::open(&cfg.store.path)?;
    let coordinator = BatchCoordinator::new(IssueExtractor::new(store, cfg.retry_policy()))
        .with_outcome_log(cfg.log.ndjson.clone());
    let ctx = IngestContext::system(cfg.workspace.clone());

    let report = coordinator.run(&ctx, &records, cfg.deadline());
    if report.deadline_hit {
        tracing::warn!(
            unattempted = report.count(RecordState::Unattempted),
            "batch returned for redelivery"
        );
    }
    Ok(report.response)
}

pub fn execute_ingest(cmd: IngestCommand) -> Result<()> {
    let cfg = resolve_config(&cmd.common, cmd.deadline_secs, cmd.log.clone())?;
    logging::init_tracing(&cfg.log.level, cfg.log.json)?;
    let response = ingest_batch(&cmd, &cfg)?;
    println!("{}", serde_json::to_string(&response)?);
    Ok(())
}

pub fn list_issues(common: CommonArgs) -> Result<()> {
    let cfg = resolve_config(&common, None, None)?;
    logging::init_tracing(&cfg.log.level, cfg.log.json)?;
    let store = SqliteIssueStore::open(&cfg.store.path)?;
    let issues = store.list_issues(&cfg.workspace)?;
    if issues.is_empty() {
        println!("No issues for workspace {}", cfg.workspace);
        return Ok(());
    }
    for issue in issues {
        let source = issue
            .pointer
            .log_group
            .rsplit('/')
            .next()
            .unwrap_or(&issue.pointer.log_group)
            .to_string();
        println!(
            "{}  {}  {}: {}  [{}]",
            issue.time_seen.to_rfc3339(),
            issue.group,
            issue.error,
            issue.message,
            source
        );
    }
    Ok(())
}

pub fn inspect_issue(group: &str, common: CommonArgs) -> Result<()> {
    let cfg = resolve_config(&common, None, None)?;
    logging::init_tracing(&cfg.log.level, cfg.log.json)?;
    let store = SqliteIssueStore::open(&cfg.store.path)?;
    let Some(issue) = store.get_issue(&cfg.workspace, group)? else {
        bail!("no issue with group '{group}' in workspace {}", cfg.workspace);
    };

    println!("id: {}", issue.id);
    println!("group: {}", issue.group);
    println!("error: {}", issue.error);
    println!("message: {}", issue.message);
    println!("log_group: {}", issue.pointer.log_group);
    println!("log_stream: {}", issue.pointer.log_stream);
    println!("pointer_ts: {}", issue.pointer.timestamp.to_rfc3339());
    println!("time_created: {}", issue.time_created.to_rfc3339());
    println!("time_updated: {}", issue.time_updated.to_rfc3339());
    println!("time_seen: {}", issue.time_seen.to_rfc3339());
    if let Some(ts) = issue.time_ignored {
        println!("time_ignored: {}", ts.to_rfc3339());
    }
    if let Some(ts) = issue.time_resolved {
        println!("time_resolved: {}", ts.to_rfc3339());
    }
    if !issue.stack.is_empty() {
        println!("stack:");
        for frame in &issue.stack {
            println!("  {frame}");
        }
    }
    let counts = store.counts_for(&cfg.workspace, group)?;
    if !counts.is_empty() {
        println!("hourly_counts:");
        for c in counts {
            println!("  - {} {}", c.hour.to_rfc3339(), c.count);
        }
    }
    Ok(())
}
