use crate::ingest::RecordOutcome;
use anyhow::Result;
use chrono::Utc;
use serde_json::json;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

pub fn mirror_outcome(path: &Path, outcome: &RecordOutcome) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let mut f = OpenOptions::new().create(true).append(true).open(path)?;
    let line = json!({
        "ts": Utc::now().to_rfc3339(),
        "index": outcome.index,
        "record_id": outcome.record_id,
        "state": outcome.state,
        "detail": outcome.detail
    });
    writeln!(f, "{}", line)?;
    Ok(())
}
