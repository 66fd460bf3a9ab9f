mod common;

use common::{LOG_GROUP, T0_MILLIS, data_doc, encode, error_line};
use faultline::commands::{self, CommonArgs, IngestCommand};
use faultline::config::load_config;
use faultline::issues::store::SqliteIssueStore;
use serde_json::json;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

fn write_event(dir: &Path, records: serde_json::Value) -> PathBuf {
    let path = dir.join("event.json");
    std::fs::write(&path, json!({ "Records": records }).to_string()).unwrap();
    path
}

fn write_config(dir: &Path, db: &Path, ndjson: &Path) -> PathBuf {
    let path = dir.join("config.toml");
    std::fs::write(
        &path,
        format!(
            r#"
version = 1
workspace = "acme"

[ingest]
deadline_secs = 30

[store]
path = "{}"

[log]
ndjson = "{}"
"#,
            db.display(),
            ndjson.display()
        ),
    )
    .unwrap();
    path
}

#[test]
fn ingest_batch_persists_issues_from_event_file() {
    let tmp = tempdir().unwrap();
    let db = tmp.path().join("state").join("issues.db");
    let ndjson = tmp.path().join("outcomes.ndjson");
    let cfg_path = write_config(tmp.path(), &db, &ndjson);
    let line = error_line("TypeError", "charge (/var/task/payments.mjs:88:11)");
    let event = write_event(
        tmp.path(),
        json!([
            {
                "eventID": "shardId-000:1",
                "kinesis": {
                    "data": encode(&data_doc(LOG_GROUP, &[(T0_MILLIS, line)])),
                    "partitionKey": "pk",
                    "sequenceNumber": "1"
                }
            },
            {
                "eventID": "shardId-000:2",
                "kinesis": { "data": "not base64 at all!" }
            }
        ]),
    );

    let cfg = load_config(Some(&cfg_path)).unwrap();
    let cmd = IngestCommand {
        event_file: event,
        common: CommonArgs {
            config: Some(cfg_path),
            ..CommonArgs::default()
        },
        deadline_secs: None,
        log: None,
    };

    let response = commands::ingest_batch(&cmd, &cfg).unwrap();
    assert!(response.batch_item_failures.is_empty());

    let store = SqliteIssueStore::open(&db).unwrap();
    let issues = store.list_issues("acme").unwrap();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].error, "TypeError");
    assert!(store.list_issues("default").unwrap().is_empty());

    let outcomes = std::fs::read_to_string(&ndjson).unwrap();
    assert_eq!(outcomes.lines().count(), 2);
}

#[test]
fn duplicate_record_ids_are_rejected() {
    let tmp = tempdir().unwrap();
    let db = tmp.path().join("issues.db");
    let ndjson = tmp.path().join("outcomes.ndjson");
    let cfg_path = write_config(tmp.path(), &db, &ndjson);
    let event = write_event(
        tmp.path(),
        json!([
            { "eventID": "dup", "kinesis": { "data": "" } },
            { "eventID": "dup", "kinesis": { "data": "" } }
        ]),
    );
    let cfg = load_config(Some(&cfg_path)).unwrap();
    let cmd = IngestCommand {
        event_file: event,
        common: CommonArgs::default(),
        deadline_secs: None,
        log: None,
    };

    let err = commands::ingest_batch(&cmd, &cfg).unwrap_err();
    assert!(format!("{err:#}").contains("dup"));
}
