//! Cloud Client
//!
//! Main client used by the fetchers. Wraps a [`ControlPlane`] with the shared
//! [`CallCache`] and a bounded retry policy.

use super::cache::{CallCache, CallDescriptor};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Default time a control-plane response stays fresh
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5);

/// Default number of extra attempts after a failed cached call
pub const DEFAULT_CALL_RETRIES: u32 = 1;

/// Anything able to run a named operation against a named service.
///
/// Implementations decide the transport (CLI subprocess, SDK, HTTP). Parameter
/// objects use the CLI's kebab-case names, e.g. `{"table-name": "orders"}`.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn invoke(&self, service: &str, operation: &str, params: &Value) -> Result<Value>;

    /// Whether calls go to a local emulator rather than the real cloud
    fn is_local(&self) -> bool {
        false
    }
}

/// Call policy applied by [`CloudClient`]
#[derive(Debug, Clone, Copy)]
pub struct CallSettings {
    pub cache_ttl: Duration,
    pub retries: u32,
}

impl Default for CallSettings {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_CACHE_TTL,
            retries: DEFAULT_CALL_RETRIES,
        }
    }
}

/// Main cloud client
#[derive(Clone)]
pub struct CloudClient {
    plane: Arc<dyn ControlPlane>,
    cache: Arc<CallCache>,
    settings: CallSettings,
}

impl CloudClient {
    /// Create a client over `plane` sharing `cache` with other clients
    pub fn new(plane: Arc<dyn ControlPlane>, cache: Arc<CallCache>, settings: CallSettings) -> Self {
        Self {
            plane,
            cache,
            settings,
        }
    }

    pub fn settings(&self) -> CallSettings {
        self.settings
    }

    pub fn is_local(&self) -> bool {
        self.plane.is_local()
    }

    /// Make a call with the default cache TTL
    pub async fn call(&self, service: &str, operation: &str, params: Value) -> Result<Value> {
        self.call_with_ttl(service, operation, params, self.settings.cache_ttl)
            .await
    }

    /// Make a call that is served from cache when a response younger than `ttl` exists.
    ///
    /// Failed attempts are retried with the cache read bypassed. A zero `ttl`
    /// makes a single live call: those calls move remote cursors, so they are
    /// neither cached nor retried.
    pub async fn call_with_ttl(
        &self,
        service: &str,
        operation: &str,
        params: Value,
        ttl: Duration,
    ) -> Result<Value> {
        let key = CallDescriptor::new(service, operation, &params);

        if ttl.is_zero() {
            return self.plane.invoke(service, operation, &params).await;
        }

        let mut result = self
            .cache
            .invoke(&key, ttl, || self.plane.invoke(service, operation, &params))
            .await;

        let mut attempt = 0;
        while let Err(e) = &result {
            if attempt >= self.settings.retries {
                break;
            }
            attempt += 1;
            tracing::debug!("Retrying {} (attempt {}): {}", key, attempt, e);
            result = self
                .cache
                .refresh(&key, || self.plane.invoke(service, operation, &params))
                .await;
        }

        result
    }

    /// Make a live call that bypasses the cache entirely
    pub async fn call_live(&self, service: &str, operation: &str, params: Value) -> Result<Value> {
        self.call_with_ttl(service, operation, params, Duration::ZERO)
            .await
    }

    /// Re-run a call ignoring any cached response, keeping the fresh result
    pub async fn call_fresh(&self, service: &str, operation: &str, params: Value) -> Result<Value> {
        let key = CallDescriptor::new(service, operation, &params);
        self.cache
            .refresh(&key, || self.plane.invoke(service, operation, &params))
            .await
    }
}

/// Longest error message shown before truncation
const MAX_ERROR_CHARS: usize = 120;

/// Format a control-plane error for display
pub fn format_cloud_error(error: &anyhow::Error) -> String {
    let error_str = format!("{:#}", error);

    if error_str.contains("AccessDenied") || error_str.contains("UnauthorizedOperation") {
        return "Permission denied. Check the IAM permissions of the active credentials.".to_string();
    }
    if error_str.contains("ExpiredToken") || error_str.contains("InvalidClientTokenId") {
        return "Credentials are invalid or expired. Refresh them and try again.".to_string();
    }
    if error_str.contains("Throttling") || error_str.contains("TooManyRequests") {
        return "Rate limit exceeded. Please try again later.".to_string();
    }
    if error_str.contains("Could not connect to the endpoint URL") {
        return "Control plane endpoint unreachable. Check --endpoint-url and your network."
            .to_string();
    }
    if error_str.contains("Failed to launch") {
        return "The aws CLI could not be started. Is it installed and on PATH?".to_string();
    }

    let mut printable = error_str
        .chars()
        .map(|c| if c.is_whitespace() { ' ' } else { c })
        .filter(|c| c.is_ascii_graphic() || *c == ' ');
    let sanitized = printable.by_ref().take(MAX_ERROR_CHARS).collect::<String>();

    if printable.next().is_some() {
        format!("{}...", sanitized)
    } else {
        sanitized
    }
}
