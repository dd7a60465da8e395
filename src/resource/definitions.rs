//! Resource Definitions - load fetch definitions from JSON
//!
//! Describes, per resource kind, which control-plane operation lists it,
//! where the names sit in the listing, and how one item is described. The
//! definitions are embedded at compile time.

use super::model::ResourceType;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Embedded resource JSON files (compiled into the binary)
const RESOURCE_FILES: &[&str] = &[include_str!("../resources/services.json")];

/// Fetch definition for one resource kind
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceDef {
    pub display_name: String,
    pub kind: ResourceType,
    pub service: String,
    pub list_operation: String,
    /// Dot path to the array of listed items
    pub list_path: String,
    /// Field holding the name when listed items are objects rather than strings
    #[serde(default)]
    pub name_field: Option<String>,
    /// Operation describing one item, called with `describe_param = name`
    #[serde(default)]
    pub describe_operation: Option<String>,
    #[serde(default)]
    pub describe_param: Option<String>,
    /// Dot path into the describe response
    #[serde(default)]
    pub describe_path: Option<String>,
    /// Field holding the resource id, in the describe output or else the listed item
    #[serde(default)]
    pub id_field: Option<String>,
}

/// Root structure of resources/*.json
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceConfig {
    #[serde(default)]
    pub resources: HashMap<String, ResourceDef>,
}

/// Definitions loaded from JSON
static DEFINITIONS: OnceLock<ResourceConfig> = OnceLock::new();

/// Get the definitions (loads from embedded JSON on first access)
pub fn get_definitions() -> &'static ResourceConfig {
    DEFINITIONS.get_or_init(|| {
        let mut final_config = ResourceConfig {
            resources: HashMap::new(),
        };

        for content in RESOURCE_FILES {
            let partial: ResourceConfig = serde_json::from_str(content)
                .unwrap_or_else(|e| panic!("Failed to parse embedded resource JSON: {}", e));
            final_config.resources.extend(partial.resources);
        }

        final_config
    })
}

/// Get a resource definition by key
pub fn get_definition(key: &str) -> Option<&'static ResourceDef> {
    get_definitions().resources.get(key)
}

/// Get the definition used to fetch resources of `kind`
pub fn definition_for(kind: ResourceType) -> Option<&'static ResourceDef> {
    get_definitions().resources.values().find(|def| def.kind == kind)
}
