//! Graph Assembler
//!
//! Runs the per-kind fetchers in dependency order against a fresh registry and
//! turns what they found into a `{nodes, edges}` graph. Nodes get short
//! presentation ids; edges refer to those ids and are `null` on whichever end
//! did not make it into the graph.

use crate::cloud::CloudClient;
use crate::resource::{
    list_buckets, list_delivery_pipelines, list_functions, list_search_domains, list_streams,
    list_tables, sample_stream, CodeStore, FetchContext, FetchOptions, FunctionSources, NameFilter,
    Registry, Resource, ResourceDetail, SourceScanner, StreamSample, DEFAULT_CONCURRENCY,
};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Node type of a stream shard
pub const SHARD_NODE_TYPE: &str = "kinesis_shard";

/// One graph node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Presentation id, unique within one graph
    pub id: String,
    /// Resource id (or shard id)
    pub arn: String,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    /// Presentation id of the enclosing node (shards only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(
        rename = "streamName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub stream_name: Option<String>,
}

/// Directed edge between presentation ids; `None` marks an unresolved end
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: Option<String>,
    pub target: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Graph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl Graph {
    pub fn find_node(&self, arn: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.arn == arn)
    }

    /// Edges with their ends mapped back to resource ids
    pub fn edges_by_arn(&self) -> Vec<(Option<&str>, Option<&str>)> {
        let arns: HashMap<&str, &str> = self
            .nodes
            .iter()
            .map(|n| (n.id.as_str(), n.arn.as_str()))
            .collect();
        let lookup = |end: &Option<String>| end.as_deref().and_then(|id| arns.get(id).copied());
        self.edges
            .iter()
            .map(|e| (lookup(&e.source), lookup(&e.target)))
            .collect()
    }

    /// Drop edges with an unresolved end
    pub fn without_dangling_edges(mut self) -> Self {
        self.edges
            .retain(|e| e.source.is_some() && e.target.is_some());
        self
    }
}

/// Resources returned by the fetchers of one build, per kind
#[derive(Debug, Default)]
pub struct Inventory {
    pub search_domains: Vec<Arc<Resource>>,
    pub buckets: Vec<Arc<Resource>>,
    pub tables: Vec<Arc<Resource>>,
    pub streams: Vec<Arc<Resource>>,
    pub pipelines: Vec<Arc<Resource>>,
    pub functions: Vec<Arc<Resource>>,
}

/// Entry point tying the client, code store and scanner together
pub struct Discovery {
    client: CloudClient,
    code: CodeStore,
    scanner: SourceScanner,
    concurrency: usize,
}

impl Discovery {
    pub fn new(client: CloudClient, code: CodeStore, scanner: SourceScanner) -> Self {
        Self {
            client,
            code,
            scanner,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn client(&self) -> &CloudClient {
        &self.client
    }

    /// Discover every resource whose name matches `filter` and assemble the graph.
    ///
    /// A kind whose listing fails is left out with a warning; only a build in
    /// which every listing fails is an error.
    pub async fn build_graph(&self, filter: &NameFilter) -> Result<Graph> {
        let registry = Registry::new();
        let ctx = FetchContext::new(&self.client, &registry).with_concurrency(self.concurrency);
        let details = FetchOptions { details: true };
        let sources = FunctionSources {
            code: &self.code,
            scanner: &self.scanner,
        };

        // Targets of later phases must already be registered
        let (search_domains, tables, buckets) = tokio::join!(
            list_search_domains(filter, &ctx),
            list_tables(filter, &ctx),
            list_buckets(filter, details, &ctx),
        );
        let (streams, pipelines) = tokio::join!(
            list_streams(filter, &ctx),
            list_delivery_pipelines(filter, &ctx),
        );
        let functions = list_functions(filter, details, sources, &ctx).await;

        let mut failures = Vec::new();
        let mut take = |label: &str, result: Result<Vec<Arc<Resource>>>| match result {
            Ok(resources) => resources,
            Err(e) => {
                tracing::warn!("Unable to list {}: {:#}", label, e);
                failures.push(e);
                Vec::new()
            }
        };

        let inventory = Inventory {
            search_domains: take("search domains", search_domains),
            buckets: take("buckets", buckets),
            tables: take("tables", tables),
            streams: take("streams", streams),
            pipelines: take("delivery streams", pipelines),
            functions: take("functions", functions),
        };

        if failures.len() == 6 {
            if let Some(last) = failures.pop() {
                return Err(last.context("Unable to list any resources"));
            }
        }

        let graph = assemble(&inventory, &registry);
        tracing::info!(
            "Built graph with {} nodes and {} edges ({} resources registered)",
            graph.nodes.len(),
            graph.edges.len(),
            registry.len()
        );
        Ok(graph)
    }

    pub async fn sample_stream(
        &self,
        stream_name: &str,
        shard_id: &str,
        max_records: u32,
    ) -> Result<StreamSample> {
        sample_stream(&self.client, stream_name, shard_id, max_records).await
    }
}

/// Allocates short presentation ids, never handing out the same one twice
#[derive(Debug, Default)]
struct PresentationIds {
    used: HashSet<String>,
}

impl PresentationIds {
    fn next(&mut self) -> String {
        loop {
            let candidate = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
        }
    }
}

/// Turn fetched resources into nodes and edges.
///
/// Nodes are emitted kind by kind (search domains, buckets, tables, streams
/// with their shards, delivery pipelines, functions), sorted by id within a
/// kind. Edges follow: pipeline destinations, function event sources and
/// code targets, then bucket notifications.
pub fn assemble(inventory: &Inventory, registry: &Registry) -> Graph {
    let mut graph = Graph::default();
    let mut ids = PresentationIds::default();
    let mut node_ids: HashMap<String, String> = HashMap::new();

    let groups: [&[Arc<Resource>]; 6] = [
        &inventory.search_domains,
        &inventory.buckets,
        &inventory.tables,
        &inventory.streams,
        &inventory.pipelines,
        &inventory.functions,
    ];

    let mut emitted: Vec<Vec<Arc<Resource>>> = Vec::with_capacity(groups.len());
    for group in groups {
        let mut sorted: Vec<Arc<Resource>> = group.to_vec();
        sorted.sort_by(|a, b| a.id().cmp(b.id()));

        let mut kept = Vec::with_capacity(sorted.len());
        for resource in sorted {
            if node_ids.contains_key(resource.id()) {
                continue;
            }
            let uid = ids.next();
            node_ids.insert(resource.id().to_string(), uid.clone());
            graph.nodes.push(GraphNode {
                id: uid.clone(),
                arn: resource.id().to_string(),
                name: resource.name().to_string(),
                node_type: resource.kind().as_str().to_string(),
                parent: None,
                stream_name: None,
            });

            if let ResourceDetail::Stream { shards } = resource.detail() {
                for shard in shards {
                    graph.nodes.push(GraphNode {
                        id: ids.next(),
                        arn: shard.id.clone(),
                        name: shard.short_name(),
                        node_type: SHARD_NODE_TYPE.to_string(),
                        parent: Some(uid.clone()),
                        stream_name: Some(resource.name().to_string()),
                    });
                }
            }
            kept.push(resource);
        }
        emitted.push(kept);
    }

    // Edges attach to whatever a referenced id stands for (a change stream
    // stands for its table)
    let node_for = |id: &str| -> Option<String> {
        let target = registry
            .get(id)
            .map(|r| r.resolves_to())
            .unwrap_or_else(|| id.to_string());
        node_ids.get(&target).cloned()
    };

    let mut notification_edges = Vec::new();
    for resource in emitted.iter().flatten() {
        let uid = node_ids.get(resource.id()).cloned();
        match resource.detail() {
            ResourceDetail::DeliveryPipeline { destinations } => {
                for destination in destinations {
                    graph.edges.push(GraphEdge {
                        source: uid.clone(),
                        target: node_for(&destination),
                    });
                }
            }
            ResourceDetail::ComputeFunction {
                event_sources,
                targets,
            } => {
                for source in event_sources {
                    graph.edges.push(GraphEdge {
                        source: node_for(&source),
                        target: uid.clone(),
                    });
                }
                for target in targets {
                    graph.edges.push(GraphEdge {
                        source: uid.clone(),
                        target: node_for(&target),
                    });
                }
            }
            ResourceDetail::ObjectStore { notifications } => {
                for target in notifications {
                    notification_edges.push(GraphEdge {
                        source: uid.clone(),
                        target: node_for(&target),
                    });
                }
            }
            _ => {}
        }
    }
    graph.edges.extend(notification_edges);

    graph
}
