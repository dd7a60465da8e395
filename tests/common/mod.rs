//! Shared fixtures for integration tests
#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use infragraph::cloud::{CallCache, CallDescriptor, CallSettings, CloudClient, ControlPlane, HttpClient};
use infragraph::resource::{CodeStore, SourceScanner};
use infragraph::Discovery;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const ACCOUNT: &str = "000000000000";

pub fn bucket_arn(name: &str) -> String {
    format!("arn:aws:s3:::{}", name)
}

pub fn function_arn(name: &str) -> String {
    format!("arn:aws:lambda:us-east-1:{}:function:{}", ACCOUNT, name)
}

pub fn table_arn(name: &str) -> String {
    format!("arn:aws:dynamodb:us-east-1:{}:table/{}", ACCOUNT, name)
}

pub fn stream_arn(name: &str) -> String {
    format!("arn:aws:kinesis:us-east-1:{}:stream/{}", ACCOUNT, name)
}

pub fn pipeline_arn(name: &str) -> String {
    format!("arn:aws:firehose:us-east-1:{}:deliverystream/{}", ACCOUNT, name)
}

/// In-memory control plane answering from canned responses and recording calls
#[derive(Default)]
pub struct FakeControlPlane {
    /// Responses for one exact parameter set
    exact: Mutex<HashMap<CallDescriptor, Value>>,
    /// Responses for any parameters
    any: Mutex<HashMap<(String, String), Value>>,
    calls: Mutex<Vec<CallDescriptor>>,
    local: AtomicBool,
}

impl FakeControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every account listing with nothing
    pub fn with_empty_account() -> Self {
        let plane = Self::new();
        plane.on("es", "list-domain-names", json!({"DomainNames": []}));
        plane.on("dynamodb", "list-tables", json!({"TableNames": []}));
        plane.on("s3api", "list-buckets", json!({"Buckets": []}));
        plane.on("kinesis", "list-streams", json!({"StreamNames": []}));
        plane.on("firehose", "list-delivery-streams", json!({"DeliveryStreamNames": []}));
        plane.on("lambda", "list-functions", json!({"Functions": []}));
        plane.on("lambda", "list-event-source-mappings", json!({"EventSourceMappings": []}));
        plane
    }

    pub fn on(&self, service: &str, operation: &str, response: Value) {
        self.any
            .lock()
            .insert((service.to_string(), operation.to_string()), response);
    }

    pub fn on_params(&self, service: &str, operation: &str, params: Value, response: Value) {
        self.exact
            .lock()
            .insert(CallDescriptor::new(service, operation, &params), response);
    }

    /// Pretend to be a local emulator
    pub fn set_local(&self, local: bool) {
        self.local.store(local, Ordering::Relaxed);
    }

    pub fn calls(&self) -> Vec<CallDescriptor> {
        self.calls.lock().clone()
    }

    pub fn count(&self, service: &str, operation: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.service == service && c.operation == operation)
            .count()
    }

    /// Register a function whose code lives at `location`
    pub fn add_function(&self, name: &str, location: &str) {
        self.on_params(
            "lambda",
            "get-function",
            json!({"function-name": name}),
            json!({
                "Configuration": {"FunctionName": name, "FunctionArn": function_arn(name)},
                "Code": {"RepositoryType": "S3", "Location": location}
            }),
        );
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn invoke(&self, service: &str, operation: &str, params: &Value) -> Result<Value> {
        let key = CallDescriptor::new(service, operation, params);
        self.calls.lock().push(key.clone());

        if let Some(response) = self.exact.lock().get(&key) {
            return Ok(response.clone());
        }
        if let Some(response) = self
            .any
            .lock()
            .get(&(service.to_string(), operation.to_string()))
        {
            return Ok(response.clone());
        }
        Err(anyhow::anyhow!(
            "An error occurred (ResourceNotFoundException) when calling {} {}",
            service,
            operation
        ))
    }

    fn is_local(&self) -> bool {
        self.local.load(Ordering::Relaxed)
    }
}

pub fn client(plane: Arc<FakeControlPlane>) -> CloudClient {
    CloudClient::new(plane, Arc::new(CallCache::new()), CallSettings::default())
}

pub fn discovery(plane: Arc<FakeControlPlane>, scratch: &Path) -> Discovery {
    let code = CodeStore::new(scratch.to_path_buf(), HttpClient::new().unwrap());
    Discovery::new(client(plane), code, SourceScanner::with_default_rules().unwrap())
}

/// Build an uncompressed zip archive in memory
pub fn zip_archive(files: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored);
    for (name, content) in files {
        writer.start_file(*name, options).unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}
