//! Storage Network Protocol
//!
//! HTTP endpoints and JSON DTOs exchanged between nodes. Every request names the map
//! it addresses; values travel as their JSON string encoding.

use serde::{Deserialize, Serialize};

/// Public endpoint for client writes.
pub const ENDPOINT_PUT: &str = "/put";
/// Public endpoint for client reads, `/get/{map}/{key}`.
pub const ENDPOINT_GET: &str = "/get";
/// Public endpoint for client removals.
pub const ENDPOINT_REMOVE: &str = "/remove";
/// Write for a key owned elsewhere, sent to its primary.
pub const ENDPOINT_FORWARD_PUT: &str = "/forward_put";
/// Removal for a key owned elsewhere, sent to its primary.
pub const ENDPOINT_FORWARD_REMOVE: &str = "/forward_remove";
/// Primary to backup copy of a write.
pub const ENDPOINT_REPLICATE: &str = "/replicate";
/// Primary to backup copy of a removal.
pub const ENDPOINT_REPLICATE_REMOVE: &str = "/replicate_remove";
/// Owner-side read, `/internal/get/{map}/{key}`. The primary reads through on a miss.
pub const ENDPOINT_GET_INTERNAL: &str = "/internal/get";
/// Bulk dump of one partition, `/internal/partition/{map}/{partition}`.
pub const ENDPOINT_PARTITION_DUMP: &str = "/internal/partition";

#[derive(Debug, Serialize, Deserialize)]
pub struct PutRequest {
    pub map: String,
    /// Client supplied operation id, used for deduplication of retries.
    pub op_id: String,
    pub key: String,
    pub value_json: String,
}

/// A write addressed to the primary of `partition`, or from the primary to a backup.
#[derive(Debug, Serialize, Deserialize)]
pub struct ForwardPutRequest {
    pub map: String,
    pub partition: u32,
    pub op_id: String,
    pub key: String,
    pub value_json: String,
}

pub type ReplicateRequest = ForwardPutRequest;

#[derive(Debug, Serialize, Deserialize)]
pub struct RemoveRequest {
    pub map: String,
    pub op_id: String,
    pub key: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ForwardRemoveRequest {
    pub map: String,
    pub partition: u32,
    pub op_id: String,
    pub key: String,
}

pub type ReplicateRemoveRequest = ForwardRemoveRequest;

/// Value of a key. `None` when the key does not exist.
///
/// Also returned by removals, carrying the removed value.
#[derive(Debug, Serialize, Deserialize)]
pub struct GetResponse {
    pub value_json: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PutResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PutResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl ToString) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct KeyValueJson {
    pub key: String,
    pub value_json: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PartitionDumpResponse {
    pub map: String,
    pub partition: u32,
    pub entries: Vec<KeyValueJson>,
}
