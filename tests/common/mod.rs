#![allow(dead_code)]

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use faultline::decode::RawRecord;
use flate2::Compression;
use flate2::write::GzEncoder;
use serde_json::{Value, json};
use std::io::Write;

pub const LOG_GROUP: &str = "/aws/lambda/checkout-api";

/// 2024-01-01T00:00:00Z
pub const T0_MILLIS: i64 = 1_704_067_200_000;

pub fn error_line(error: &str, frame: &str) -> String {
    format!(
        "2024-01-01T00:00:00.000Z\t6f1c\tERROR\t{error}: request failed\n    at {frame}\n    at Runtime.handler (file:///var/task/index.mjs:40:3)"
    )
}

pub fn encode(doc: &Value) -> String {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(doc.to_string().as_bytes()).unwrap();
    STANDARD.encode(enc.finish().unwrap())
}

pub fn data_doc(log_group: &str, events: &[(i64, String)]) -> Value {
    json!({
        "messageType": "DATA_MESSAGE",
        "owner": "123456789012",
        "logGroup": log_group,
        "logStream": "2024/01/01/[$LATEST]0a1b2c",
        "subscriptionFilters": ["faultline"],
        "logEvents": events
            .iter()
            .enumerate()
            .map(|(i, (ts, msg))| json!({"id": format!("ev-{i}"), "timestamp": ts, "message": msg}))
            .collect::<Vec<_>>()
    })
}

pub fn data_record(id: &str, log_group: &str, events: &[(i64, String)]) -> RawRecord {
    RawRecord::new(id, encode(&data_doc(log_group, events)))
}

pub fn control_record(id: &str) -> RawRecord {
    let doc = json!({
        "messageType": "CONTROL_MESSAGE",
        "owner": "CloudwatchLogs",
        "logGroup": "",
        "logStream": "",
        "subscriptionFilters": [],
        "logEvents": [{
            "id": "",
            "timestamp": T0_MILLIS,
            "message": "CWL CONTROL MESSAGE: Checking health of destination Kinesis stream."
        }]
    });
    RawRecord::new(id, encode(&doc))
}

pub fn corrupt_record(id: &str) -> RawRecord {
    RawRecord::new(id, vec![0xde, 0xad, 0xbe, 0xef, 0x00, 0xff])
}
