//! AWS CLI control plane
//!
//! Runs each operation as an `aws` subprocess and parses its JSON output.

use super::client::ControlPlane;
use super::http::sanitize_for_log;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::process::Command;

/// Endpoint overrides, typically pointing at a local emulator
#[derive(Debug, Clone, Default)]
pub struct Endpoints {
    /// Applies to every service without a specific override
    pub default: Option<String>,
    /// Per-service overrides keyed by CLI service name (`s3api`, `lambda`, ...)
    pub services: HashMap<String, String>,
}

impl Endpoints {
    pub fn resolve(&self, service: &str) -> Option<&str> {
        self.services
            .get(service)
            .or(self.default.as_ref())
            .map(|s| s.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.default.is_none() && self.services.is_empty()
    }
}

/// Control plane backed by the `aws` command line tool
#[derive(Debug, Clone)]
pub struct AwsCli {
    program: String,
    region: Option<String>,
    endpoints: Endpoints,
}

impl AwsCli {
    pub fn new(program: &str, region: Option<String>, endpoints: Endpoints) -> Self {
        Self {
            program: program.to_string(),
            region,
            endpoints,
        }
    }

    /// Build the argument list for one call
    pub fn build_args(&self, service: &str, operation: &str, params: &Value) -> Vec<String> {
        let mut args = vec!["--output".to_string(), "json".to_string()];

        if let Some(region) = &self.region {
            args.push("--region".to_string());
            args.push(region.clone());
        }

        if let Some(endpoint) = self.endpoints.resolve(service) {
            args.push("--endpoint-url".to_string());
            args.push(endpoint.to_string());
        }

        args.push(service.to_string());
        args.push(operation.to_string());

        if let Value::Object(map) = params {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            for (key, value) in entries {
                match value {
                    Value::Null => {}
                    Value::Bool(true) => args.push(format!("--{}", key)),
                    Value::Bool(false) => args.push(format!("--no-{}", key)),
                    Value::String(s) => {
                        args.push(format!("--{}", key));
                        args.push(s.clone());
                    }
                    Value::Number(n) => {
                        args.push(format!("--{}", key));
                        args.push(n.to_string());
                    }
                    Value::Array(items) => {
                        args.push(format!("--{}", key));
                        for item in items {
                            match item {
                                Value::String(s) => args.push(s.clone()),
                                other => args.push(other.to_string()),
                            }
                        }
                    }
                    Value::Object(_) => {
                        args.push(format!("--{}", key));
                        args.push(value.to_string());
                    }
                }
            }
        }

        args
    }
}

#[async_trait]
impl ControlPlane for AwsCli {
    async fn invoke(&self, service: &str, operation: &str, params: &Value) -> Result<Value> {
        let args = self.build_args(service, operation, params);
        tracing::debug!("Executing: {} {}", self.program, args.join(" "));

        let output = Command::new(&self.program)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to launch {}", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::warn!(
                "{} {} failed: {} - {}",
                service,
                operation,
                output.status,
                sanitize_for_log(&stderr)
            );
            return Err(anyhow::anyhow!(
                "{} {} failed ({}): {}",
                service,
                operation,
                output.status,
                stderr.trim()
            ));
        }

        // Some operations print nothing when there is nothing to report
        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&stdout)
            .with_context(|| format!("Failed to parse {} {} output", service, operation))
    }

    fn is_local(&self) -> bool {
        !self.endpoints.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_build_args_with_endpoint_override() {
        let mut endpoints = Endpoints::default();
        endpoints
            .services
            .insert("kinesis".to_string(), "http://localhost:4568".to_string());
        let cli = AwsCli::new("aws", Some("us-east-1".to_string()), endpoints);

        let args = cli.build_args(
            "kinesis",
            "get-records",
            &json!({"shard-iterator": "AAA", "limit": 10}),
        );

        assert_eq!(
            args,
            vec![
                "--output",
                "json",
                "--region",
                "us-east-1",
                "--endpoint-url",
                "http://localhost:4568",
                "kinesis",
                "get-records",
                "--limit",
                "10",
                "--shard-iterator",
                "AAA",
            ]
        );
        assert!(cli.is_local());
    }

    #[test]
    fn test_default_endpoint_applies_to_other_services() {
        let endpoints = Endpoints {
            default: Some("http://localhost:4566".to_string()),
            services: HashMap::new(),
        };
        assert_eq!(endpoints.resolve("lambda"), Some("http://localhost:4566"));
        assert_eq!(Endpoints::default().resolve("lambda"), None);
    }

    #[tokio::test]
    async fn test_missing_program_is_reported() {
        let cli = AwsCli::new("infragraph-no-such-binary", None, Endpoints::default());
        let err = cli
            .invoke("s3api", "list-buckets", &json!({}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to launch"));
    }
}
