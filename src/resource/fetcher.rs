//! Resource Fetcher
//!
//! The list → filter → describe → register engine shared by every kind.
//! Kind-specific code only turns a described item into a [`ResourceDetail`].

use super::definitions::ResourceDef;
use super::model::{Resource, ResourceDetail};
use super::registry::Registry;
use crate::cloud::CloudClient;
use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use regex::Regex;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;

/// Default number of concurrent detail fetches per fetcher
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Everything a fetcher needs, passed explicitly
#[derive(Clone, Copy)]
pub struct FetchContext<'a> {
    pub client: &'a CloudClient,
    pub registry: &'a Registry,
    pub concurrency: usize,
}

impl<'a> FetchContext<'a> {
    pub fn new(client: &'a CloudClient, registry: &'a Registry) -> Self {
        Self {
            client,
            registry,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }
}

/// Regex filter applied to resource names.
///
/// The pattern may match anywhere in the name; anchor it for exact matches.
#[derive(Debug, Clone)]
pub struct NameFilter {
    pattern: Regex,
}

impl NameFilter {
    pub fn new(pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .with_context(|| format!("Invalid name filter: {}", pattern))?;
        Ok(Self { pattern })
    }

    pub fn matches(&self, name: &str) -> bool {
        self.pattern.is_match(name)
    }

    pub fn as_str(&self) -> &str {
        self.pattern.as_str()
    }
}

impl Default for NameFilter {
    fn default() -> Self {
        Self {
            pattern: Regex::new(".*").unwrap_or_else(|e| panic!("match-all regex: {}", e)),
        }
    }
}

/// One listed item handed to a kind-specific builder
#[derive(Debug, Clone)]
pub struct Listed {
    pub name: String,
    /// Raw item from the listing
    pub item: Value,
    /// Describe payload, or the listed item when the kind has no describe step
    pub detail: Value,
}

impl Listed {
    /// Resource id according to the definition's `id_field`
    pub fn id(&self, def: &ResourceDef) -> Option<String> {
        let field = def.id_field.as_deref()?;
        self.detail
            .get(field)
            .or_else(|| self.item.get(field))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }
}

/// List the names of every resource of a kind
pub async fn list_names(def: &ResourceDef, client: &CloudClient) -> Result<Vec<(String, Value)>> {
    let response = client
        .call(&def.service, &def.list_operation, json!({}))
        .await
        .with_context(|| format!("Failed to list {}", def.display_name))?;

    let items = value_at(&response, &def.list_path)
        .and_then(|v| v.as_array())
        .with_context(|| {
            format!(
                "Unexpected {} response: missing '{}'",
                def.list_operation, def.list_path
            )
        })?;

    let mut names = Vec::with_capacity(items.len());
    for item in items {
        let name = match &def.name_field {
            Some(field) => item.get(field).and_then(|v| v.as_str()),
            None => item.as_str(),
        };
        match name {
            Some(name) => names.push((name.to_string(), item.clone())),
            None => tracing::warn!("Skipping unnamed {} entry: {}", def.display_name, item),
        }
    }

    Ok(names)
}

/// Run the describe step for one item, if the kind has one
async fn describe(def: &ResourceDef, name: &str, item: &Value, client: &CloudClient) -> Result<Value> {
    let (Some(operation), Some(param)) = (&def.describe_operation, &def.describe_param) else {
        return Ok(item.clone());
    };

    let mut params = serde_json::Map::new();
    params.insert(param.clone(), Value::String(name.to_string()));

    let response = client
        .call(&def.service, operation, Value::Object(params))
        .await
        .with_context(|| format!("Failed to describe {} '{}'", def.display_name, name))?;

    match &def.describe_path {
        Some(path) => value_at(&response, path)
            .cloned()
            .with_context(|| format!("Unexpected {} response: missing '{}'", operation, path)),
        None => Ok(response),
    }
}

/// Fetch every resource of `def`'s kind whose name passes `filter`.
///
/// Detail work runs concurrently, bounded by `ctx.concurrency`, so the result
/// order is unspecified. `build` returns `Ok(None)` to skip an item; an error
/// for one item is logged and does not fail the fetch. Only a failed listing
/// is returned as an error.
pub async fn fetch_all<F, Fut>(
    def: &ResourceDef,
    filter: &NameFilter,
    ctx: &FetchContext<'_>,
    build: F,
) -> Result<Vec<Arc<Resource>>>
where
    F: Fn(Listed) -> Fut,
    Fut: Future<Output = Result<Option<(String, ResourceDetail)>>>,
{
    let names = list_names(def, ctx.client).await?;
    let retained: Vec<_> = names
        .into_iter()
        .filter(|(name, _)| filter.matches(name))
        .collect();

    tracing::debug!(
        "Fetching {} {} matching '{}'",
        retained.len(),
        def.display_name,
        filter.as_str()
    );

    let build = &build;
    let results: Vec<(String, Result<Option<Arc<Resource>>>)> = stream::iter(retained)
        .map(|(name, item)| async move {
            let result: Result<Option<Arc<Resource>>> = async {
                let detail = describe(def, &name, &item, ctx.client).await?;
                let listed = Listed {
                    name: name.clone(),
                    item,
                    detail,
                };
                let built = build(listed).await?;
                Ok::<_, anyhow::Error>(built.map(|(id, detail)| ctx.registry.register(&id, detail)))
            }
            .await;
            (name, result)
        })
        .buffer_unordered(ctx.concurrency.max(1))
        .collect()
        .await;

    let mut resources = Vec::with_capacity(results.len());
    for (name, result) in results {
        match result {
            Ok(Some(resource)) => resources.push(resource),
            Ok(None) => tracing::debug!("Skipped {} '{}'", def.display_name, name),
            Err(e) => tracing::warn!(
                "Unable to get details for {} '{}': {:#}",
                def.display_name,
                name,
                e
            ),
        }
    }

    Ok(resources)
}

/// Navigate a JSON value with a dot-notation path
/// Numeric segments index into arrays.
pub fn value_at<'v>(item: &'v Value, path: &str) -> Option<&'v Value> {
    if path.is_empty() {
        return Some(item);
    }

    let mut current = item;
    for part in path.split('.') {
        current = match part.parse::<usize>() {
            Ok(idx) => current.get(idx)?,
            Err(_) => current.get(part)?,
        };
    }
    Some(current)
}

/// String at `path`, if present
pub fn str_at<'v>(item: &'v Value, path: &str) -> Option<&'v str> {
    value_at(item, path).and_then(|v| v.as_str())
}

/// Unsigned number at `path`, coercing numeric strings and defaulting to 0
pub fn u64_at(item: &Value, path: &str) -> u64 {
    match value_at(item, path) {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().map(|f| f.max(0.0) as u64))
            .unwrap_or(0),
        Some(Value::String(s)) => s.parse().unwrap_or(0),
        _ => 0,
    }
}
