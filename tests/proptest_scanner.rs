//! Property-based tests using proptest
//!
//! These tests check the name filter, the source scanner and a few parsing
//! helpers against randomized inputs.

use infragraph::resource::fetcher::{str_at, NameFilter};
use infragraph::resource::scanner::{classify_token, Candidate};
use infragraph::resource::{CodeMap, Registry, ResourceType, Shard, SourceScanner};
use proptest::prelude::*;
use serde_json::json;

/// Resource-like names as found in the wild
fn arb_name() -> impl Strategy<Value = String> {
    "[a-zA-Z][a-zA-Z0-9_-]{0,40}"
}

fn code_map(source: &str) -> CodeMap {
    let mut map = CodeMap::new();
    map.insert("/handler.py".to_string(), source.to_string());
    map
}

proptest! {
    /// A literal name used as a filter matches every name containing it
    #[test]
    fn literal_filter_matches_superstrings(
        needle in arb_name(),
        prefix in "[a-z0-9-]{0,10}",
        suffix in "[a-z0-9-]{0,10}"
    ) {
        let filter = NameFilter::new(&regex::escape(&needle)).unwrap();
        let name = format!("{}{}{}", prefix, needle, suffix);
        prop_assert!(filter.matches(&name));
    }

    /// The default filter keeps everything
    #[test]
    fn default_filter_matches_all(name in ".*") {
        prop_assert!(NameFilter::default().matches(&name));
    }

    /// Scanning arbitrary text never panics and never yields empty identifiers
    #[test]
    fn scanner_never_panics(source in ".{0,400}") {
        let scanner = SourceScanner::with_default_rules().unwrap();
        let identifiers = scanner.extract_identifiers(&code_map(&source));
        prop_assert!(identifiers.iter().all(|(_, id)| !id.is_empty()));
    }

    /// A positional put call with a literal is always found
    #[test]
    fn positional_put_is_found(name in arb_name(), quote in prop_oneof!["'", "\""]) {
        let source = format!("firehose.put_record_batch(client, {q}{n}{q}, records)\n", q = quote, n = name);
        let scanner = SourceScanner::with_default_rules().unwrap();
        prop_assert_eq!(
            scanner.extract_identifiers(&code_map(&source)),
            vec![(ResourceType::DeliveryPipeline, name)]
        );
    }

    /// Repeating a reference does not add resources
    #[test]
    fn repeated_references_collapse(name in arb_name(), times in 1usize..6) {
        let source = format!("dynamodb.Table('{}')\n", name).repeat(times);
        let scanner = SourceScanner::with_default_rules().unwrap();
        let registry = Registry::new();
        let refs = scanner.extract_references(&code_map(&source), &registry);
        prop_assert_eq!(refs.len(), 1);
        prop_assert_eq!(registry.len(), 1);
    }

    /// Quoted tokens classify as their inner text
    #[test]
    fn quoted_tokens_are_literals(name in arb_name()) {
        prop_assert_eq!(
            classify_token(&format!("\"{}\"", name)),
            Some(Candidate::Literal(name.clone()))
        );
    }

    /// Shard names are the shard number without padding
    #[test]
    fn shard_short_name_is_the_number(n in 0u32..1_000_000) {
        let shard = Shard {
            id: format!("shardId-{:012}", n),
            start_key: String::new(),
            end_key: String::new(),
        };
        prop_assert_eq!(shard.short_name(), n.to_string());
    }
}

/// Tests for JSON path extraction
mod json_path_tests {
    use super::*;

    proptest! {
        /// A value nested under generated keys is found again by its dot path
        #[test]
        fn nested_value_is_reachable(a in "[A-Za-z]{1,10}", b in "[A-Za-z]{1,10}", value in arb_name()) {
            let mut inner = serde_json::Map::new();
            inner.insert(b.clone(), json!(value.clone()));
            let mut outer = serde_json::Map::new();
            outer.insert(a.clone(), serde_json::Value::Object(inner));
            let doc = serde_json::Value::Object(outer);
            let path = format!("{}.{}", a, b);
            prop_assert_eq!(str_at(&doc, &path), Some(value.as_str()));
        }

        /// Missing paths never resolve
        #[test]
        fn missing_path_is_none(a in "[A-Za-z]{1,10}") {
            let doc = json!({ "present": 1 });
            let path = format!("{}.missing", a);
            prop_assert!(str_at(&doc, &path).is_none());
        }
    }
}
