//! Stream sampling
//!
//! Reads the newest records of one shard. Every call here is live: shard
//! iterators are cursors, so replaying a cached response would be wrong.

use crate::cloud::CloudClient;
use anyhow::{Context, Result};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Default number of records requested per read
pub const DEFAULT_MAX_RECORDS: u32 = 10;

/// One record as returned by `get-records`, with `Data` decoded to text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StreamRecord {
    #[serde(default)]
    pub sequence_number: String,
    #[serde(default)]
    pub partition_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approximate_arrival_timestamp: Option<Value>,
    #[serde(default)]
    pub data: String,
    /// Fields not modelled above, passed through untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Result of a sample: `{"events": [...]}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamSample {
    pub events: Vec<StreamRecord>,
}

/// Read up to `max_records` of the latest records of `shard_id` in `stream_name`.
///
/// A `LATEST` iterator usually sees nothing on the first read, so an empty
/// read is followed by exactly one more with the returned next iterator.
pub async fn sample_stream(
    client: &CloudClient,
    stream_name: &str,
    shard_id: &str,
    max_records: u32,
) -> Result<StreamSample> {
    let response = client
        .call_live(
            "kinesis",
            "get-shard-iterator",
            json!({
                "stream-name": stream_name,
                "shard-id": shard_id,
                "shard-iterator-type": "LATEST",
            }),
        )
        .await
        .with_context(|| format!("Failed to open shard {} of '{}'", shard_id, stream_name))?;

    let iterator = response
        .get("ShardIterator")
        .and_then(|v| v.as_str())
        .context("Unexpected get-shard-iterator response: missing 'ShardIterator'")?;

    let mut page = read_records(client, iterator, max_records).await?;
    if page.records.is_empty() {
        if let Some(next) = page.next_iterator.take() {
            tracing::debug!("No records yet on {}/{}, reading once more", stream_name, shard_id);
            page = read_records(client, &next, max_records).await?;
        }
    }

    let events = page
        .records
        .into_iter()
        .filter_map(|raw| match serde_json::from_value::<StreamRecord>(raw) {
            Ok(mut record) => {
                record.data = decode_data(&record.data);
                Some(record)
            }
            Err(e) => {
                tracing::warn!("Skipping malformed record: {}", e);
                None
            }
        })
        .collect();

    Ok(StreamSample { events })
}

struct RecordPage {
    records: Vec<Value>,
    next_iterator: Option<String>,
}

async fn read_records(client: &CloudClient, iterator: &str, max_records: u32) -> Result<RecordPage> {
    let response = client
        .call_live(
            "kinesis",
            "get-records",
            json!({ "shard-iterator": iterator, "limit": max_records }),
        )
        .await
        .context("Failed to read records")?;

    Ok(RecordPage {
        records: response
            .get("Records")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default(),
        next_iterator: response
            .get("NextShardIterator")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
    })
}

/// Decode a base64 payload to printable ASCII. Payloads that are not valid
/// base64 are kept as given, filtered the same way.
pub fn decode_data(data: &str) -> String {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .unwrap_or_else(|_| data.as_bytes().to_vec());
    printable_ascii(&bytes)
}

fn printable_ascii(bytes: &[u8]) -> String {
    bytes
        .iter()
        .copied()
        .filter(|b| b.is_ascii_graphic() || matches!(*b, b' ' | b'\n' | b'\r' | b'\t'))
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{CallCache, CallSettings, ControlPlane};
    use async_trait::async_trait;
    use base64::Engine as _;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_decode_data_strips_non_ascii() {
        // "héllo\n" plus a control byte
        let encoded = base64::engine::general_purpose::STANDARD.encode("h\u{e9}llo\n\u{1}");
        assert_eq!(decode_data(&encoded), "hllo\n");
        assert_eq!(decode_data("not base64!"), "not base64!");
    }

    /// Shard with one record that only shows up on the second read
    struct LateShard {
        reads: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ControlPlane for LateShard {
        async fn invoke(&self, _service: &str, operation: &str, params: &Value) -> Result<Value> {
            match operation {
                "get-shard-iterator" => Ok(json!({"ShardIterator": "it-0"})),
                "get-records" => {
                    let iterator = params["shard-iterator"].as_str().unwrap_or_default().to_string();
                    self.reads.lock().push(iterator.clone());
                    if iterator == "it-0" {
                        Ok(json!({"Records": [], "NextShardIterator": "it-1"}))
                    } else {
                        Ok(json!({
                            "Records": [{
                                "SequenceNumber": "1",
                                "PartitionKey": "k",
                                "ApproximateArrivalTimestamp": 1700000000.0,
                                "Data": "eyJhIjogMX0=",
                                "EncryptionType": "NONE"
                            }],
                            "NextShardIterator": "it-2"
                        }))
                    }
                }
                other => Err(anyhow::anyhow!("unexpected operation {}", other)),
            }
        }
    }

    #[test]
    fn test_empty_first_read_advances_once() {
        let plane = Arc::new(LateShard {
            reads: Mutex::new(Vec::new()),
        });
        let client = CloudClient::new(plane.clone(), Arc::new(CallCache::new()), CallSettings::default());

        let sample =
            tokio_test::block_on(sample_stream(&client, "events", "shardId-000000000000", 10)).unwrap();

        assert_eq!(*plane.reads.lock(), vec!["it-0", "it-1"]);
        assert_eq!(sample.events.len(), 1);
        assert_eq!(sample.events[0].data, "{\"a\": 1}");

        let serialized = serde_json::to_value(&sample).unwrap();
        assert_eq!(serialized["events"][0]["PartitionKey"], "k");
        assert_eq!(serialized["events"][0]["EncryptionType"], "NONE");
    }
}
