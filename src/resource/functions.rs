//! Function fetcher
//!
//! Functions carry the two relationship sources that need extra work: event
//! source mappings (what triggers them) and references inferred from their
//! code (what they write to).

use super::code::CodeStore;
use super::fetcher::{fetch_all, str_at, FetchContext, NameFilter};
use super::kinds::{definition, FetchOptions};
use super::model::{Resource, ResourceDetail, ResourceType};
use super::scanner::SourceScanner;
use anyhow::{anyhow, Result};
use serde_json::{json, Value};
use std::sync::Arc;

/// Code retrieval and scanning used when function details are requested
#[derive(Clone, Copy)]
pub struct FunctionSources<'a> {
    pub code: &'a CodeStore,
    pub scanner: &'a SourceScanner,
}

/// Fetch functions, resolving their event sources and code references when
/// `options.details` is set.
///
/// Relationship failures only cost the affected edges: the function itself is
/// still registered.
pub async fn list_functions(
    filter: &NameFilter,
    options: FetchOptions,
    sources: FunctionSources<'_>,
    ctx: &FetchContext<'_>,
) -> Result<Vec<Arc<Resource>>> {
    let def = definition(ResourceType::ComputeFunction)?;
    fetch_all(def, filter, ctx, |listed| async move {
        let Some(id) = listed.id(def) else {
            return Err(anyhow!("Function '{}' has no FunctionArn", listed.name));
        };

        if !options.details {
            return Ok(Some((id, ResourceDetail::empty(ResourceType::ComputeFunction))));
        }

        let (event_sources, targets) = futures::join!(
            event_sources(&listed.name, ctx),
            code_references(&listed.name, sources, ctx),
        );

        Ok(Some((
            id,
            ResourceDetail::ComputeFunction {
                event_sources,
                targets,
            },
        )))
    })
    .await
}

/// Ids of the resources whose events trigger `function_name`
async fn event_sources(function_name: &str, ctx: &FetchContext<'_>) -> Vec<String> {
    let response = match ctx
        .client
        .call(
            "lambda",
            "list-event-source-mappings",
            json!({ "function-name": function_name }),
        )
        .await
    {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(
                "Unable to get event sources for function '{}': {:#}",
                function_name,
                e
            );
            return Vec::new();
        }
    };

    let mut ids: Vec<String> = Vec::new();
    for arn in event_source_arns(&response) {
        let id = ctx
            .registry
            .resolve_arn(arn, ResourceType::Stream)
            .id()
            .to_string();
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    ids
}

/// Source ARNs of a `list-event-source-mappings` response
pub fn event_source_arns(response: &Value) -> Vec<&str> {
    response
        .get("EventSourceMappings")
        .and_then(|v| v.as_array())
        .into_iter()
        .flatten()
        .filter_map(|mapping| str_at(mapping, "EventSourceArn"))
        .collect()
}

/// Ids of the resources the function's code refers to
async fn code_references(
    function_name: &str,
    sources: FunctionSources<'_>,
    ctx: &FetchContext<'_>,
) -> Vec<String> {
    let code_map = match sources.code.fetch_code(function_name, ctx.client).await {
        Ok(code_map) => code_map,
        Err(e) => {
            tracing::warn!("Unable to get code for function '{}': {:#}", function_name, e);
            return Vec::new();
        }
    };

    tracing::debug!(
        "Scanning {} source files of function '{}'",
        code_map.len(),
        function_name
    );

    sources
        .scanner
        .extract_references(&code_map, ctx.registry)
        .iter()
        .map(|r| r.id().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_source_arns() {
        let response = json!({
            "EventSourceMappings": [
                {"UUID": "1", "EventSourceArn": "arn:aws:kinesis:us-east-1:1:stream/events"},
                {"UUID": "2"},
                {"UUID": "3", "EventSourceArn": "arn:aws:dynamodb:us-east-1:1:table/t/stream/x"}
            ]
        });
        assert_eq!(
            event_source_arns(&response),
            vec![
                "arn:aws:kinesis:us-east-1:1:stream/events",
                "arn:aws:dynamodb:us-east-1:1:table/t/stream/x"
            ]
        );
        assert!(event_source_arns(&json!({})).is_empty());
    }
}
