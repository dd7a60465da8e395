//! Resource model
//!
//! A [`Resource`] is one discovered entity. Its identity is the `id` (an ARN);
//! its kind-specific data lives in a [`ResourceDetail`] behind a lock so a stub
//! created for a forward reference can be upgraded in place.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Kind tag of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    #[serde(rename = "s3")]
    ObjectStore,
    #[serde(rename = "dynamodb")]
    KeyValueTable,
    #[serde(rename = "es")]
    SearchDomain,
    #[serde(rename = "kinesis")]
    Stream,
    #[serde(rename = "firehose")]
    DeliveryPipeline,
    #[serde(rename = "lambda")]
    ComputeFunction,
    #[serde(rename = "dynamodb_stream")]
    StreamBinding,
}

impl ResourceType {
    /// Node type string used in the emitted graph
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::ObjectStore => "s3",
            ResourceType::KeyValueTable => "dynamodb",
            ResourceType::SearchDomain => "es",
            ResourceType::Stream => "kinesis",
            ResourceType::DeliveryPipeline => "firehose",
            ResourceType::ComputeFunction => "lambda",
            ResourceType::StreamBinding => "dynamodb_stream",
        }
    }

    /// Guess the kind from an ARN's service segment
    pub fn from_arn(arn: &str) -> Option<Self> {
        let mut parts = arn.splitn(6, ':');
        if parts.next() != Some("arn") {
            return None;
        }
        let _partition = parts.next()?;
        match parts.next()? {
            "s3" => Some(ResourceType::ObjectStore),
            "dynamodb" if arn.contains("/stream/") => Some(ResourceType::StreamBinding),
            "dynamodb" => Some(ResourceType::KeyValueTable),
            "es" => Some(ResourceType::SearchDomain),
            "kinesis" => Some(ResourceType::Stream),
            "firehose" => Some(ResourceType::DeliveryPipeline),
            "lambda" => Some(ResourceType::ComputeFunction),
            _ => None,
        }
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stream shard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shard {
    pub id: String,
    pub start_key: String,
    pub end_key: String,
}

impl Shard {
    /// Display name: the shard id without its `shardId-` prefix and leading zeros
    pub fn short_name(&self) -> String {
        let trimmed = self
            .id
            .strip_prefix("shardId-")
            .unwrap_or(&self.id)
            .trim_start_matches('0');
        if trimmed.is_empty() {
            "0".to_string()
        } else {
            trimmed.to_string()
        }
    }
}

/// Kind-specific data
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceDetail {
    ObjectStore {
        /// Ids of notification targets
        notifications: Vec<String>,
    },
    KeyValueTable {
        item_count: u64,
        size_bytes: u64,
        created_at: Option<DateTime<Utc>>,
        stream_id: Option<String>,
    },
    SearchDomain {
        endpoint: Option<String>,
    },
    Stream {
        shards: Vec<Shard>,
    },
    DeliveryPipeline {
        destinations: Vec<String>,
    },
    ComputeFunction {
        /// Ids of event sources (streams, tables, or stream bindings)
        event_sources: Vec<String>,
        /// Ids of resources referenced from the function's code
        targets: Vec<String>,
    },
    StreamBinding {
        /// Id of the table that owns the change stream
        owner: String,
    },
}

impl ResourceDetail {
    /// Minimal detail for a placeholder of `kind`
    pub fn empty(kind: ResourceType) -> Self {
        match kind {
            ResourceType::ObjectStore => ResourceDetail::ObjectStore {
                notifications: Vec::new(),
            },
            ResourceType::KeyValueTable => ResourceDetail::KeyValueTable {
                item_count: 0,
                size_bytes: 0,
                created_at: None,
                stream_id: None,
            },
            ResourceType::SearchDomain => ResourceDetail::SearchDomain { endpoint: None },
            ResourceType::Stream => ResourceDetail::Stream { shards: Vec::new() },
            ResourceType::DeliveryPipeline => ResourceDetail::DeliveryPipeline {
                destinations: Vec::new(),
            },
            ResourceType::ComputeFunction => ResourceDetail::ComputeFunction {
                event_sources: Vec::new(),
                targets: Vec::new(),
            },
            ResourceType::StreamBinding => ResourceDetail::StreamBinding {
                owner: String::new(),
            },
        }
    }

    pub fn kind(&self) -> ResourceType {
        match self {
            ResourceDetail::ObjectStore { .. } => ResourceType::ObjectStore,
            ResourceDetail::KeyValueTable { .. } => ResourceType::KeyValueTable,
            ResourceDetail::SearchDomain { .. } => ResourceType::SearchDomain,
            ResourceDetail::Stream { .. } => ResourceType::Stream,
            ResourceDetail::DeliveryPipeline { .. } => ResourceType::DeliveryPipeline,
            ResourceDetail::ComputeFunction { .. } => ResourceType::ComputeFunction,
            ResourceDetail::StreamBinding { .. } => ResourceType::StreamBinding,
        }
    }
}

#[derive(Debug)]
struct ResourceState {
    detail: ResourceDetail,
    stub: bool,
}

/// A discovered resource, shared by reference through the registry
#[derive(Debug)]
pub struct Resource {
    id: String,
    state: RwLock<ResourceState>,
}

impl Resource {
    pub(crate) fn new(id: &str, detail: ResourceDetail) -> Self {
        Self {
            id: id.to_string(),
            state: RwLock::new(ResourceState {
                detail,
                stub: false,
            }),
        }
    }

    pub(crate) fn stub(id: &str, kind: ResourceType) -> Self {
        Self {
            id: id.to_string(),
            state: RwLock::new(ResourceState {
                detail: ResourceDetail::empty(kind),
                stub: true,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Last path segment of the id
    pub fn name(&self) -> &str {
        short_name(&self.id)
    }

    pub fn kind(&self) -> ResourceType {
        self.state.read().detail.kind()
    }

    pub fn is_stub(&self) -> bool {
        self.state.read().stub
    }

    /// Snapshot of the current detail
    pub fn detail(&self) -> ResourceDetail {
        self.state.read().detail.clone()
    }

    /// Id of the node edges should attach to.
    ///
    /// A stream binding stands in for the table owning the stream; everything
    /// else is its own node.
    pub fn resolves_to(&self) -> String {
        match &self.state.read().detail {
            ResourceDetail::StreamBinding { owner } if !owner.is_empty() => owner.clone(),
            _ => self.id.clone(),
        }
    }

    /// Endpoint of a search domain, if known
    pub fn endpoint(&self) -> Option<String> {
        match &self.state.read().detail {
            ResourceDetail::SearchDomain { endpoint } => endpoint.clone(),
            _ => None,
        }
    }

    /// Replace the detail and mark the resource as fully populated
    pub(crate) fn upgrade(&self, detail: ResourceDetail) {
        let mut state = self.state.write();
        state.detail = detail;
        state.stub = false;
    }
}

/// Last path segment of an ARN-like id
/// e.g., "arn:aws:dynamodb:us-east-1:000000000000:table/orders" -> "orders"
pub fn short_name(id: &str) -> &str {
    match id.rfind('/') {
        Some(idx) => &id[idx + 1..],
        None => id.rsplit(':').next().unwrap_or(id),
    }
}
