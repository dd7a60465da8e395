//! Per-kind fetchers for search domains, tables, buckets, streams and
//! delivery pipelines. Functions live in [`super::functions`].

use super::definitions::{definition_for, ResourceDef};
use super::fetcher::{fetch_all, str_at, u64_at, value_at, FetchContext, Listed, NameFilter};
use super::model::{Resource, ResourceDetail, ResourceType, Shard};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::future;
use serde_json::{json, Value};
use std::sync::Arc;

/// Options for fetchers that can capture relationships
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchOptions {
    /// Also fetch relationship details (notifications, event sources, code)
    pub details: bool,
}

pub(crate) fn definition(kind: ResourceType) -> Result<&'static ResourceDef> {
    definition_for(kind).with_context(|| format!("No fetch definition for {}", kind))
}

fn missing_id(def: &ResourceDef, listed: &Listed) -> anyhow::Error {
    anyhow::anyhow!(
        "{} '{}' has no {}",
        def.display_name,
        listed.name,
        def.id_field.as_deref().unwrap_or("id")
    )
}

// =============================================================================
// Search domains
// =============================================================================

pub async fn list_search_domains(
    filter: &NameFilter,
    ctx: &FetchContext<'_>,
) -> Result<Vec<Arc<Resource>>> {
    let def = definition(ResourceType::SearchDomain)?;
    fetch_all(def, filter, ctx, |listed| {
        future::ready(build_search_domain(def, &listed).map(Some))
    })
    .await
}

fn build_search_domain(def: &ResourceDef, listed: &Listed) -> Result<(String, ResourceDetail)> {
    let id = listed.id(def).ok_or_else(|| missing_id(def, listed))?;
    let endpoint = str_at(&listed.detail, "Endpoint")
        .or_else(|| str_at(&listed.detail, "Endpoints.vpc"))
        .map(|s| s.to_string());
    Ok((id, ResourceDetail::SearchDomain { endpoint }))
}

// =============================================================================
// Tables
// =============================================================================

pub async fn list_tables(filter: &NameFilter, ctx: &FetchContext<'_>) -> Result<Vec<Arc<Resource>>> {
    let def = definition(ResourceType::KeyValueTable)?;
    fetch_all(def, filter, ctx, |listed| {
        future::ready(build_table(def, &listed, ctx).map(Some))
    })
    .await
}

fn build_table(
    def: &ResourceDef,
    listed: &Listed,
    ctx: &FetchContext<'_>,
) -> Result<(String, ResourceDetail)> {
    let id = listed.id(def).ok_or_else(|| missing_id(def, listed))?;
    let detail = &listed.detail;

    // Register the change stream so function event sources resolve back to the table
    let stream_id = str_at(detail, "LatestStreamArn").map(|arn| {
        ctx.registry
            .resolve_arn(arn, ResourceType::StreamBinding)
            .id()
            .to_string()
    });

    Ok((
        id,
        ResourceDetail::KeyValueTable {
            item_count: u64_at(detail, "ItemCount"),
            size_bytes: u64_at(detail, "TableSizeBytes"),
            created_at: value_at(detail, "CreationDateTime").and_then(parse_timestamp),
            stream_id,
        },
    ))
}

/// Parse a timestamp given either as epoch seconds or as RFC 3339 text
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            let secs = n.as_f64()?;
            let whole = secs.trunc() as i64;
            let nanos = ((secs - secs.trunc()) * 1e9).round() as u32;
            DateTime::from_timestamp(whole, nanos)
        }
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        _ => None,
    }
}

// =============================================================================
// Buckets
// =============================================================================

pub async fn list_buckets(
    filter: &NameFilter,
    options: FetchOptions,
    ctx: &FetchContext<'_>,
) -> Result<Vec<Arc<Resource>>> {
    let def = definition(ResourceType::ObjectStore)?;
    fetch_all(def, filter, ctx, |listed| async move {
        let id = format!("arn:aws:s3:::{}", listed.name);
        let notifications = if options.details {
            bucket_notifications(&listed.name, ctx).await
        } else {
            Vec::new()
        };
        Ok(Some((id, ResourceDetail::ObjectStore { notifications })))
    })
    .await
}

/// Notification targets of a bucket. Failures only cost the edges.
async fn bucket_notifications(bucket: &str, ctx: &FetchContext<'_>) -> Vec<String> {
    let response = match ctx
        .client
        .call(
            "s3api",
            "get-bucket-notification-configuration",
            json!({ "bucket": bucket }),
        )
        .await
    {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!("Unable to get notifications for bucket '{}': {:#}", bucket, e);
            return Vec::new();
        }
    };

    notification_targets(&response)
        .into_iter()
        .map(|arn| {
            ctx.registry
                .resolve_arn(&arn, ResourceType::ComputeFunction)
                .id()
                .to_string()
        })
        .collect()
}

/// Function ARNs named by a notification configuration, current or legacy shape
pub fn notification_targets(response: &Value) -> Vec<String> {
    let mut targets: Vec<String> = Vec::new();

    if let Some(configs) = response
        .get("LambdaFunctionConfigurations")
        .and_then(|v| v.as_array())
    {
        for config in configs {
            if let Some(arn) = str_at(config, "LambdaFunctionArn") {
                targets.push(arn.to_string());
            }
        }
    }

    if let Some(arn) = str_at(response, "CloudFunctionConfiguration.CloudFunction") {
        targets.push(arn.to_string());
    }

    dedup_preserving_order(targets)
}

// =============================================================================
// Streams
// =============================================================================

pub async fn list_streams(filter: &NameFilter, ctx: &FetchContext<'_>) -> Result<Vec<Arc<Resource>>> {
    let def = definition(ResourceType::Stream)?;
    fetch_all(def, filter, ctx, |listed| {
        future::ready(build_stream(def, &listed).map(Some))
    })
    .await
}

fn build_stream(def: &ResourceDef, listed: &Listed) -> Result<(String, ResourceDetail)> {
    let id = listed.id(def).ok_or_else(|| missing_id(def, listed))?;
    Ok((
        id,
        ResourceDetail::Stream {
            shards: parse_shards(&listed.detail),
        },
    ))
}

/// Shards of a `describe-stream` description
pub fn parse_shards(description: &Value) -> Vec<Shard> {
    description
        .get("Shards")
        .and_then(|v| v.as_array())
        .map(|shards| {
            shards
                .iter()
                .filter_map(|s| {
                    Some(Shard {
                        id: str_at(s, "ShardId")?.to_string(),
                        start_key: str_at(s, "HashKeyRange.StartingHashKey")
                            .unwrap_or_default()
                            .to_string(),
                        end_key: str_at(s, "HashKeyRange.EndingHashKey")
                            .unwrap_or_default()
                            .to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

// =============================================================================
// Delivery pipelines
// =============================================================================

pub async fn list_delivery_pipelines(
    filter: &NameFilter,
    ctx: &FetchContext<'_>,
) -> Result<Vec<Arc<Resource>>> {
    let def = definition(ResourceType::DeliveryPipeline)?;
    fetch_all(def, filter, ctx, |listed| {
        future::ready(build_delivery_pipeline(def, &listed, ctx).map(Some))
    })
    .await
}

fn build_delivery_pipeline(
    def: &ResourceDef,
    listed: &Listed,
    ctx: &FetchContext<'_>,
) -> Result<(String, ResourceDetail)> {
    let id = listed.id(def).ok_or_else(|| missing_id(def, listed))?;
    let destinations = destination_arns(&listed.detail)
        .into_iter()
        .map(|(arn, fallback)| ctx.registry.resolve_arn(&arn, fallback).id().to_string())
        .collect();
    Ok((id, ResourceDetail::DeliveryPipeline { destinations }))
}

/// Destination ARNs of a delivery stream description with their expected kind
pub fn destination_arns(description: &Value) -> Vec<(String, ResourceType)> {
    const DESTINATION_FIELDS: &[(&str, ResourceType)] = &[
        ("S3DestinationDescription.BucketARN", ResourceType::ObjectStore),
        ("ExtendedS3DestinationDescription.BucketARN", ResourceType::ObjectStore),
        ("ElasticsearchDestinationDescription.DomainARN", ResourceType::SearchDomain),
        ("AmazonopensearchserviceDestinationDescription.DomainARN", ResourceType::SearchDomain),
    ];

    let mut found: Vec<(String, ResourceType)> = Vec::new();
    for destination in description
        .get("Destinations")
        .and_then(|v| v.as_array())
        .into_iter()
        .flatten()
    {
        for (path, kind) in DESTINATION_FIELDS {
            if let Some(arn) = str_at(destination, path) {
                if !found.iter().any(|(a, _)| a == arn) {
                    found.push((arn.to_string(), *kind));
                }
            }
        }
    }
    found
}

fn dedup_preserving_order(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_shards() {
        let description = json!({
            "StreamARN": "arn:aws:kinesis:us-east-1:1:stream/events",
            "Shards": [
                {"ShardId": "shardId-000000000000", "HashKeyRange": {"StartingHashKey": "0", "EndingHashKey": "170"}},
                {"ShardId": "shardId-000000000001", "HashKeyRange": {"StartingHashKey": "171", "EndingHashKey": "340"}},
                {"HashKeyRange": {}}
            ]
        });
        let shards = parse_shards(&description);
        assert_eq!(shards.len(), 2);
        assert_eq!(shards[1].start_key, "171");
        assert_eq!(shards[1].end_key, "340");
    }

    #[test]
    fn test_notification_targets_both_shapes() {
        let current = json!({
            "LambdaFunctionConfigurations": [
                {"LambdaFunctionArn": "arn:aws:lambda:us-east-1:1:function:a", "Events": ["s3:ObjectCreated:*"]},
                {"LambdaFunctionArn": "arn:aws:lambda:us-east-1:1:function:a"}
            ]
        });
        assert_eq!(
            notification_targets(&current),
            vec!["arn:aws:lambda:us-east-1:1:function:a"]
        );

        let legacy = json!({"CloudFunctionConfiguration": {"CloudFunction": "arn:aws:lambda:us-east-1:1:function:b"}});
        assert_eq!(
            notification_targets(&legacy),
            vec!["arn:aws:lambda:us-east-1:1:function:b"]
        );
        assert!(notification_targets(&Value::Null).is_empty());
    }

    #[test]
    fn test_destination_arns_are_deduplicated() {
        let description = json!({
            "Destinations": [{
                "S3DestinationDescription": {"BucketARN": "arn:aws:s3:::archive"},
                "ExtendedS3DestinationDescription": {"BucketARN": "arn:aws:s3:::archive"},
                "ElasticsearchDestinationDescription": {"DomainARN": "arn:aws:es:us-east-1:1:domain/logs"}
            }]
        });
        assert_eq!(
            destination_arns(&description),
            vec![
                ("arn:aws:s3:::archive".to_string(), ResourceType::ObjectStore),
                ("arn:aws:es:us-east-1:1:domain/logs".to_string(), ResourceType::SearchDomain),
            ]
        );
    }

    #[test]
    fn test_parse_timestamp() {
        let epoch = parse_timestamp(&json!(1700000000.5)).unwrap();
        assert_eq!(epoch.timestamp(), 1700000000);
        assert_eq!(epoch.timestamp_subsec_millis(), 500);

        let text = parse_timestamp(&json!("2024-03-01T12:00:00+00:00")).unwrap();
        assert_eq!(text.timestamp(), 1709294400);
        assert!(parse_timestamp(&json!("yesterday")).is_none());
    }
}
