use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use flate2::read::{GzDecoder, ZlibDecoder};
use serde::Deserialize;
use std::io::Read;
use thiserror::Error;

pub const DATA_MESSAGE: &str = "DATA_MESSAGE";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// One item of an inbound batch, as handed over by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub record_id: String,
    pub payload: Vec<u8>,
}

impl RawRecord {
    pub fn new(record_id: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            record_id: record_id.into(),
            payload: payload.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    pub id: Option<String>,
    pub log_group: String,
    pub log_stream: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMessage {
    pub message_type: String,
    pub owner: Option<String>,
    pub log_group: String,
    pub log_stream: String,
    pub subscription_filters: Vec<String>,
    pub log_events: Vec<LogEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Data(DecodedMessage),
    Skip { message_type: String },
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("failed to inflate payload: {0}")]
    Inflate(#[source] std::io::Error),

    #[error("payload is not valid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed data message: {0}")]
    Shape(String),

    #[error("log event {index} has out-of-range timestamp {millis}")]
    Timestamp { index: usize, millis: i64 },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    message_type: String,
    owner: Option<String>,
    log_group: Option<String>,
    log_stream: Option<String>,
    #[serde(default)]
    subscription_filters: Vec<String>,
    log_events: Option<Vec<WireLogEvent>>,
}

#[derive(Debug, Deserialize)]
struct WireLogEvent {
    id: Option<String>,
    timestamp: i64,
    message: String,
}

/// Decodes one raw record into a data message, or signals that it should be
/// skipped because it is not a data frame.
pub fn decode(raw: &RawRecord) -> Result<Decoded, DecodeError> {
    let compressed = unwrap_payload(&raw.payload)?;
    let inflated = inflate(&compressed)?;
    let wire: WireMessage = serde_json::from_slice(&inflated)?;

    if wire.message_type != DATA_MESSAGE {
        return Ok(Decoded::Skip {
            message_type: wire.message_type,
        });
    }
    validate(wire).map(Decoded::Data)
}

fn unwrap_payload(payload: &[u8]) -> Result<Vec<u8>, DecodeError> {
    if payload.starts_with(&GZIP_MAGIC) {
        return Ok(payload.to_vec());
    }
    Ok(STANDARD.decode(payload.trim_ascii())?)
}

fn inflate(bytes: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut out = Vec::new();
    if bytes.starts_with(&GZIP_MAGIC) {
        GzDecoder::new(bytes)
            .read_to_end(&mut out)
            .map_err(DecodeError::Inflate)?;
    } else {
        ZlibDecoder::new(bytes)
            .read_to_end(&mut out)
            .map_err(DecodeError::Inflate)?;
    }
    Ok(out)
}

fn validate(wire: WireMessage) -> Result<DecodedMessage, DecodeError> {
    let log_group = required(wire.log_group, "logGroup")?;
    let log_stream = required(wire.log_stream, "logStream")?;
    let events = wire
        .log_events
        .ok_or_else(|| DecodeError::Shape("missing `logEvents`".to_string()))?;

    let log_events = events
        .into_iter()
        .enumerate()
        .map(|(index, ev)| {
            let timestamp = DateTime::from_timestamp_millis(ev.timestamp).ok_or(
                DecodeError::Timestamp {
                    index,
                    millis: ev.timestamp,
                },
            )?;
            Ok(LogEvent {
                id: ev.id,
                log_group: log_group.clone(),
                log_stream: log_stream.clone(),
                timestamp,
                message: ev.message,
            })
        })
        .collect::<Result<Vec<_>, DecodeError>>()?;

    Ok(DecodedMessage {
        message_type: wire.message_type,
        owner: wire.owner,
        log_group,
        log_stream,
        subscription_filters: wire.subscription_filters,
        log_events,
    })
}

fn required(value: Option<String>, field: &str) -> Result<String, DecodeError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| DecodeError::Shape(format!("missing `{field}`")))
}
