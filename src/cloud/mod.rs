//! Control plane interaction module
//!
//! Everything that talks to the outside world lives here: the
//! [`client::ControlPlane`] seam, the memoizing [`client::CloudClient`] the
//! fetchers call through, the `aws` CLI implementation and the HTTP helper
//! used for code downloads.
//!
//! # Module Structure
//!
//! - [`cache`] - TTL memo table keyed by call descriptor
//! - [`client`] - Control plane trait and cached, retrying client
//! - [`cli`] - `aws` subprocess control plane
//! - [`http`] - HTTP downloads
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use infragraph::cloud::{AwsCli, CallCache, CallSettings, CloudClient, Endpoints};
//!
//! async fn example() -> anyhow::Result<()> {
//!     let plane = Arc::new(AwsCli::new("aws", None, Endpoints::default()));
//!     let client = CloudClient::new(plane, Arc::new(CallCache::new()), CallSettings::default());
//!     let tables = client.call("dynamodb", "list-tables", serde_json::json!({})).await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod cli;
pub mod client;
pub mod http;

pub use cache::{CallCache, CallDescriptor};
pub use cli::{AwsCli, Endpoints};
pub use client::{format_cloud_error, CallSettings, CloudClient, ControlPlane};
pub use http::HttpClient;
