//! Resource Registry - identity map for one graph build
//!
//! Every resource discovered during a build is held here under its id. Each id
//! maps to exactly one shared [`Resource`]: registering an id that already has a
//! stub upgrades that stub in place, so anything holding the stub keeps seeing
//! the same instance.

use super::model::{short_name, Resource, ResourceDetail, ResourceType};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Per-build pool of resources keyed by id
#[derive(Debug, Default)]
pub struct Registry {
    resources: Mutex<HashMap<String, Arc<Resource>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fully described resource.
    ///
    /// An existing entry (stub or not) is upgraded in place and returned, so
    /// repeated registration is idempotent and never changes identity.
    pub fn register(&self, id: &str, detail: ResourceDetail) -> Arc<Resource> {
        let mut resources = self.resources.lock();
        if let Some(existing) = resources.get(id) {
            if existing.is_stub() {
                tracing::debug!("Upgrading stub {} to {}", id, detail.kind());
            }
            existing.upgrade(detail);
            return existing.clone();
        }

        let resource = Arc::new(Resource::new(id, detail));
        resources.insert(id.to_string(), resource.clone());
        resource
    }

    /// Return the resource for `id`, registering a placeholder of `fallback`
    /// kind when nothing is known about it yet. Never modifies an existing entry.
    pub fn get_or_create_stub(&self, id: &str, fallback: ResourceType) -> Arc<Resource> {
        self.resources
            .lock()
            .entry(id.to_string())
            .or_insert_with(|| {
                tracing::debug!("Creating {} stub for {}", fallback, id);
                Arc::new(Resource::stub(id, fallback))
            })
            .clone()
    }

    /// Resolve a referenced ARN, guessing its kind from the ARN itself.
    ///
    /// A table change-stream ARN becomes a stream binding owned by its table,
    /// which is itself stubbed so later fetches upgrade it.
    pub fn resolve_arn(&self, arn: &str, fallback: ResourceType) -> Arc<Resource> {
        let kind = ResourceType::from_arn(arn).unwrap_or(fallback);
        if kind != ResourceType::StreamBinding {
            return self.get_or_create_stub(arn, kind);
        }

        let owner = arn
            .split("/stream/")
            .next()
            .unwrap_or(arn)
            .to_string();
        self.get_or_create_stub(&owner, ResourceType::KeyValueTable);

        let mut resources = self.resources.lock();
        if let Some(existing) = resources.get(arn) {
            if existing.is_stub() {
                existing.upgrade(ResourceDetail::StreamBinding { owner });
            }
            return existing.clone();
        }
        let binding = Arc::new(Resource::new(arn, ResourceDetail::StreamBinding { owner }));
        resources.insert(arn.to_string(), binding.clone());
        binding
    }

    pub fn get(&self, id: &str) -> Option<Arc<Resource>> {
        self.resources.lock().get(id).cloned()
    }

    /// Find a resource of `kind` by its short name or, for search domains, its endpoint
    pub fn find_by_name(&self, kind: ResourceType, name: &str) -> Option<Arc<Resource>> {
        let resources = self.resources.lock();
        let mut matches: Vec<&Arc<Resource>> = resources
            .values()
            .filter(|r| r.kind() == kind)
            .filter(|r| {
                short_name(r.id()) == name || r.endpoint().is_some_and(|e| e == name)
            })
            .collect();
        // Prefer populated entries, then the lowest id for a stable answer
        matches.sort_by(|a, b| a.is_stub().cmp(&b.is_stub()).then(a.id().cmp(b.id())));
        matches.first().map(|r| (*r).clone())
    }

    pub fn len(&self) -> usize {
        self.resources.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "arn:aws:dynamodb:us-east-1:000000000000:table/orders";

    fn table_detail(count: u64) -> ResourceDetail {
        ResourceDetail::KeyValueTable {
            item_count: count,
            size_bytes: 10,
            created_at: None,
            stream_id: None,
        }
    }

    #[test]
    fn test_same_id_returns_same_instance() {
        let registry = Registry::new();
        let a = registry.get_or_create_stub(TABLE, ResourceType::KeyValueTable);
        let b = registry.get_or_create_stub(TABLE, ResourceType::ObjectStore);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.kind(), ResourceType::KeyValueTable);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_upgrades_stub_in_place() {
        let registry = Registry::new();
        let stub = registry.get_or_create_stub(TABLE, ResourceType::KeyValueTable);
        assert!(stub.is_stub());

        let full = registry.register(TABLE, table_detail(42));
        assert!(Arc::ptr_eq(&stub, &full));
        assert!(!stub.is_stub());
        assert_eq!(stub.detail(), table_detail(42));
    }

    #[test]
    fn test_stub_request_never_downgrades() {
        let registry = Registry::new();
        registry.register(TABLE, table_detail(7));
        let again = registry.get_or_create_stub(TABLE, ResourceType::KeyValueTable);
        assert!(!again.is_stub());
        assert_eq!(again.detail(), table_detail(7));
    }

    #[test]
    fn test_register_is_idempotent() {
        let registry = Registry::new();
        let a = registry.register(TABLE, table_detail(1));
        let b = registry.register(TABLE, table_detail(1));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_resolve_stream_arn_creates_binding() {
        let registry = Registry::new();
        let stream_arn = format!("{}/stream/2024-01-01T00:00:00.000", TABLE);
        let binding = registry.resolve_arn(&stream_arn, ResourceType::Stream);

        assert_eq!(binding.kind(), ResourceType::StreamBinding);
        assert_eq!(binding.resolves_to(), TABLE);
        assert!(registry.get(TABLE).is_some_and(|t| t.is_stub()));

        let again = registry.resolve_arn(&stream_arn, ResourceType::Stream);
        assert!(Arc::ptr_eq(&binding, &again));
    }

    #[test]
    fn test_find_by_name_prefers_populated_entries() {
        let registry = Registry::new();
        registry.get_or_create_stub("orders", ResourceType::KeyValueTable);
        registry.register(TABLE, table_detail(3));

        let found = registry
            .find_by_name(ResourceType::KeyValueTable, "orders")
            .unwrap();
        assert_eq!(found.id(), TABLE);
        assert!(registry.find_by_name(ResourceType::ObjectStore, "orders").is_none());
    }

    #[test]
    fn test_find_search_domain_by_endpoint() {
        let registry = Registry::new();
        registry.register(
            "arn:aws:es:us-east-1:000000000000:domain/logs",
            ResourceDetail::SearchDomain {
                endpoint: Some("search-logs-abc.us-east-1.es.amazonaws.com".to_string()),
            },
        );
        let found = registry.find_by_name(
            ResourceType::SearchDomain,
            "search-logs-abc.us-east-1.es.amazonaws.com",
        );
        assert_eq!(found.unwrap().name(), "logs");
    }

    #[test]
    fn test_concurrent_stub_creation_yields_one_instance() {
        let registry = Arc::new(Registry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.get_or_create_stub(TABLE, ResourceType::KeyValueTable))
            })
            .collect();
        let resources: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(resources.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(registry.len(), 1);
    }
}
