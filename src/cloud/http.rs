//! HTTP utilities for downloading function code archives

use anyhow::{Context, Result};
use reqwest::Client;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Sanitize a response or process output for logging
/// Truncates long text and drops control characters
pub fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let cut = (0..=MAX_LOG_BODY_LENGTH)
            .rev()
            .find(|i| body.is_char_boundary(*i))
            .unwrap_or(0);
        format!("{}... [truncated, {} bytes total]", &body[..cut], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// HTTP client wrapper for artifact downloads
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("infragraph/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    /// Download the body at `url`
    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        // Pre-signed URLs carry credentials in the query string
        tracing::debug!("GET {}", url.split('?').next().unwrap_or(url));

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .context("Failed to read response body")?;

        if !status.is_success() {
            tracing::error!(
                "Download error: {} - {}",
                status,
                sanitize_for_log(&String::from_utf8_lossy(&body))
            );
            return Err(anyhow::anyhow!("Download failed: {}", status));
        }

        Ok(body.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_truncates_and_strips() {
        let long = "x".repeat(500);
        let sanitized = sanitize_for_log(&long);
        assert!(sanitized.starts_with(&"x".repeat(200)));
        assert!(sanitized.contains("[truncated, 500 bytes total]"));

        assert_eq!(sanitize_for_log("a\nb\tc d"), "abc d");
    }
}
