//! Resource discovery layer
//!
//! Fetchers list and describe each resource kind through the control plane and
//! register what they find in a per-build [`Registry`]. Listing and describe
//! operations are data-driven: they are loaded from JSON at compile time.
//!
//! # Architecture
//!
//! - [`model`] - Resource kinds, details and the shared [`Resource`] type
//! - [`registry`] - Identity map guaranteeing one instance per resource id
//! - [`definitions`] - Loads list/describe definitions from embedded JSON
//! - [`fetcher`] - Generic list → filter → describe → register engine
//! - [`kinds`] - Search domains, tables, buckets, streams, delivery pipelines
//! - [`functions`] - Functions with event sources and code references
//! - [`code`] - Downloads and extracts function code archives
//! - [`scanner`] - Infers referenced resources from source text
//! - [`stream`] - Samples the latest records of a stream shard
//!
//! # Example
//!
//! ```ignore
//! use infragraph::resource::{list_tables, FetchContext, NameFilter, Registry};
//!
//! async fn tables(client: &CloudClient) -> anyhow::Result<usize> {
//!     let registry = Registry::new();
//!     let ctx = FetchContext::new(client, &registry);
//!     Ok(list_tables(&NameFilter::default(), &ctx).await?.len())
//! }
//! ```

pub mod code;
pub mod definitions;
pub mod fetcher;
pub mod functions;
pub mod kinds;
pub mod model;
pub mod registry;
pub mod scanner;
pub mod stream;

pub use code::{CodeMap, CodeStore};
pub use fetcher::{FetchContext, NameFilter, DEFAULT_CONCURRENCY};
pub use functions::{list_functions, FunctionSources};
pub use kinds::{
    list_buckets, list_delivery_pipelines, list_search_domains, list_streams, list_tables,
    FetchOptions,
};
pub use model::{Resource, ResourceDetail, ResourceType, Shard};
pub use registry::Registry;
pub use scanner::{Candidate, PatternRule, ReferenceRule, SourceScanner};
pub use stream::{sample_stream, StreamRecord, StreamSample};
