//! Source Reference Scanner
//!
//! Infers which resources a function talks to by pattern-matching its source
//! code. Each [`ReferenceRule`] recognizes one call idiom and yields candidate
//! identifiers; the scanner resolves them against the [`Registry`].
//!
//! This is heuristic text matching, not parsing. It can miss references built
//! at runtime and can pick up identifiers that merely look like calls. It
//! never fails: text that matches nothing is skipped.

use super::code::CodeMap;
use super::model::{Resource, ResourceType};
use super::registry::Registry;
use anyhow::{Context, Result};
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;

/// Identifier token pulled out of source text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Candidate {
    /// A string literal, already unquoted
    Literal(String),
    /// A variable or attribute name whose value must be looked up
    Symbol(String),
}

/// One recognizable cross-resource call idiom
pub trait ReferenceRule: Send + Sync {
    fn name(&self) -> &str;

    /// Kind of resource the extracted identifiers refer to
    fn target_kind(&self) -> ResourceType;

    /// Candidates found in one file (empty when the idiom does not occur)
    fn try_extract(&self, path: &str, source: &str) -> Vec<Candidate>;
}

/// Rule driven by a regex whose first capture group is the identifier
pub struct PatternRule {
    name: String,
    kind: ResourceType,
    pattern: Regex,
    /// The capture is the inside of a string literal
    literal: bool,
}

impl PatternRule {
    pub fn new(name: &str, kind: ResourceType, pattern: &str) -> Result<Self> {
        Ok(Self {
            name: name.to_string(),
            kind,
            pattern: Regex::new(pattern).with_context(|| format!("Invalid rule '{}'", name))?,
            literal: false,
        })
    }

    /// Treat every capture as literal text rather than a source token
    pub fn literal(mut self) -> Self {
        self.literal = true;
        self
    }
}

impl ReferenceRule for PatternRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn target_kind(&self) -> ResourceType {
        self.kind
    }

    fn try_extract(&self, _path: &str, source: &str) -> Vec<Candidate> {
        self.pattern
            .captures_iter(source)
            .filter_map(|caps| caps.get(1))
            .filter_map(|m| {
                if self.literal {
                    Some(Candidate::Literal(m.as_str().to_string()))
                } else {
                    classify_token(m.as_str())
                }
            })
            .collect()
    }
}

/// Rules for the idioms the scanner knows out of the box
pub fn default_rules() -> Result<Vec<Box<dyn ReferenceRule>>> {
    // Argument token: up to the next comma, whitespace or closing bracket
    const ARG: &str = r#"([^,\s)}\]]+)"#;

    let rules: Vec<Box<dyn ReferenceRule>> = vec![
        Box::new(
            PatternRule::new(
                "search-endpoint",
                ResourceType::SearchDomain,
                r#"['"`]((?:https?://)?[A-Za-z0-9.-]+\.(?:es\.amazonaws\.com|on\.aws))/?['"`]"#,
            )?
            .literal(),
        ),
        Box::new(PatternRule::new(
            "pipeline-put",
            ResourceType::DeliveryPipeline,
            &format!(r#"\.put_record(?:_batch)?\s*\([^,()]+,\s*{}\s*,"#, ARG),
        )?),
        Box::new(PatternRule::new(
            "pipeline-keyword",
            ResourceType::DeliveryPipeline,
            &format!(r#"\bDeliveryStreamName['"]?\s*[=:]\s*{}"#, ARG),
        )?),
        Box::new(PatternRule::new(
            "table-document",
            ResourceType::KeyValueTable,
            &format!(
                r#"\.(?:insert|get|put|update|delete)_document\s*\([^,()]+,\s*{}\s*,"#,
                ARG
            ),
        )?),
        Box::new(PatternRule::new(
            "table-resource",
            ResourceType::KeyValueTable,
            &format!(r#"\.Table\(\s*{}\s*\)"#, ARG),
        )?),
        Box::new(PatternRule::new(
            "table-keyword",
            ResourceType::KeyValueTable,
            &format!(r#"\bTableName['"]?\s*[=:]\s*{}"#, ARG),
        )?),
        Box::new(PatternRule::new(
            "bucket-upload",
            ResourceType::ObjectStore,
            &format!(r#"\.upload_file\s*\([^,()]+,\s*{}\s*,"#, ARG),
        )?),
        Box::new(PatternRule::new(
            "bucket-keyword",
            ResourceType::ObjectStore,
            &format!(r#"\bBucket['"]?\s*[=:]\s*{}"#, ARG),
        )?),
    ];

    Ok(rules)
}

/// Turn a raw argument token into a candidate, or drop it if it is neither a
/// plain string literal nor a plain name (f-strings, concatenations, calls...)
pub fn classify_token(token: &str) -> Option<Candidate> {
    let token = token.trim();
    let mut chars = token.chars();
    let first = chars.next()?;
    let last = token.chars().last()?;

    if token.len() >= 2 && matches!(first, '\'' | '"' | '`') && first == last {
        let inner = &token[1..token.len() - 1];
        if inner.contains(['\'', '"', '`']) || inner.contains("${") {
            return None;
        }
        return Some(Candidate::Literal(inner.to_string()));
    }

    let is_symbol = (first.is_ascii_alphabetic() || first == '_' || first == '$')
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '.'));
    if is_symbol && !matches!(token, "None" | "null" | "undefined" | "True" | "False") {
        return Some(Candidate::Symbol(token.to_string()));
    }

    None
}

/// Find the string a symbol is assigned anywhere in the code map.
/// Attribute access (`self.table`, `config.TABLE`) is looked up by its last segment.
pub fn resolve_symbol(symbol: &str, code_map: &CodeMap) -> Option<String> {
    let name = symbol.rsplit('.').next().unwrap_or(symbol);
    if name.is_empty() {
        return None;
    }

    let pattern = format!(
        r#"(?m)(?:^|[^\w$]){}['"]?[ \t]*[:=][ \t]*['"`]([^'"`\n]+)['"`]"#,
        regex::escape(name)
    );
    let assignment = Regex::new(&pattern).ok()?;

    code_map
        .values()
        .find_map(|source| assignment.captures(source))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Scanner over a pluggable rule set
pub struct SourceScanner {
    rules: Vec<Box<dyn ReferenceRule>>,
}

impl SourceScanner {
    pub fn new(rules: Vec<Box<dyn ReferenceRule>>) -> Self {
        Self { rules }
    }

    pub fn with_default_rules() -> Result<Self> {
        Ok(Self::new(default_rules()?))
    }

    pub fn add_rule(&mut self, rule: Box<dyn ReferenceRule>) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[Box<dyn ReferenceRule>] {
        &self.rules
    }

    /// Resolved identifiers referenced by the code, without touching a registry.
    ///
    /// Each `(kind, identifier)` pair appears once, in first-seen order.
    pub fn extract_identifiers(&self, code_map: &CodeMap) -> Vec<(ResourceType, String)> {
        let mut seen = HashSet::new();
        let mut identifiers = Vec::new();

        for (path, source) in code_map {
            for rule in &self.rules {
                for candidate in rule.try_extract(path, source) {
                    let raw = match candidate {
                        Candidate::Literal(value) => value,
                        Candidate::Symbol(symbol) => match resolve_symbol(&symbol, code_map) {
                            Some(value) => value,
                            None => {
                                tracing::debug!(
                                    "{}: unable to resolve '{}' for rule {}",
                                    path,
                                    symbol,
                                    rule.name()
                                );
                                continue;
                            }
                        },
                    };

                    let kind = rule.target_kind();
                    let identifier = normalize(kind, &raw);
                    if identifier.is_empty() {
                        continue;
                    }
                    if seen.insert((kind, identifier.clone())) {
                        identifiers.push((kind, identifier));
                    }
                }
            }
        }

        identifiers
    }

    /// Resources referenced by the code, registered (or reused) in `registry`
    pub fn extract_references(&self, code_map: &CodeMap, registry: &Registry) -> Vec<Arc<Resource>> {
        let mut references: Vec<Arc<Resource>> = Vec::new();
        for (kind, identifier) in self.extract_identifiers(code_map) {
            let resource = resolve_identifier(&identifier, kind, registry);
            if !references.iter().any(|r| Arc::ptr_eq(r, &resource)) {
                references.push(resource);
            }
        }
        references
    }
}

fn normalize(kind: ResourceType, raw: &str) -> String {
    let value = raw.trim();
    match kind {
        ResourceType::SearchDomain => value
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/')
            .to_string(),
        _ => value.to_string(),
    }
}

/// Map an identifier to a registry entry: ARNs directly, names by lookup,
/// and anything unknown as a stub of the rule's kind.
///
/// Bare-name stubs are keyed by the name alone. When that key already holds
/// another kind (a table and a bucket both called `orders`), the stub is
/// registered as `<kind>:<name>` instead, which keeps its short name.
fn resolve_identifier(identifier: &str, kind: ResourceType, registry: &Registry) -> Arc<Resource> {
    if identifier.starts_with("arn:") {
        return registry.resolve_arn(identifier, kind);
    }
    if let Some(found) = registry.find_by_name(kind, identifier) {
        return found;
    }
    let stub = registry.get_or_create_stub(identifier, kind);
    if stub.kind() == kind {
        return stub;
    }
    registry.get_or_create_stub(&format!("{}:{}", kind, identifier), kind)
}
