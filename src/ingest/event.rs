use crate::decode::RawRecord;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Inbound batch as delivered by the stream transport.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamEvent {
    #[serde(rename = "Records")]
    pub records: Vec<StreamRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamRecord {
    #[serde(rename = "eventID")]
    pub event_id: String,
    pub kinesis: StreamPayload,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamPayload {
    pub data: String,
    pub partition_key: Option<String>,
    pub sequence_number: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    pub batch_item_failures: Vec<BatchItemFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemFailure {
    pub item_identifier: String,
}

impl BatchResponse {
    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            batch_item_failures: ids
                .into_iter()
                .map(|id| BatchItemFailure {
                    item_identifier: id.into(),
                })
                .collect(),
        }
    }

    pub fn failed_ids(&self) -> Vec<&str> {
        self.batch_item_failures
            .iter()
            .map(|f| f.item_identifier.as_str())
            .collect()
    }
}

impl StreamEvent {
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).context("parse stream event")
    }

    /// Converts the batch into raw records, keeping delivery order. Record ids
    /// must be unique within the batch.
    pub fn into_records(self) -> Result<Vec<RawRecord>> {
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(self.records.len());
        for record in self.records {
            if !seen.insert(record.event_id.clone()) {
                bail!("duplicate record id '{}' in batch", record.event_id);
            }
            out.push(RawRecord::new(record.event_id, record.kinesis.data));
        }
        Ok(out)
    }
}
