//! An in-memory [GraphQuery] over a static set of pages.
//!
//! Snapshots can be built in code or loaded from JSON/TOML, which keeps resolution testable
//! without a host and lets the CLI print trees from an exported graph:
//!
//! ```toml
//! [pages."Projects"]
//! block_properties = { quick-filters = '"1 [[Active]], [[Archive]]"' }
//!
//! [pages."Projects/Launch"]
//! properties = { fixed = 0, icon = "🚀" }
//!
//! [pages."Weekly review"]
//! tags = ["Projects"]
//! ```
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{collections::BTreeMap, path::Path};
use uuid::Uuid;

use crate::{
    config::{get_content, DEFAULT_HIERARCHY_PROPERTY},
    properties::{DefinitionBlock, PageRecord, NAMESPACE_SEP},
    query::{GraphQuery, QUICK_FILTERS_PROPERTY},
    FavTreeError,
};

/// One page of a [GraphSnapshot].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageSpec {
    /// Derived from the page name when absent.
    pub uuid: Option<Uuid>,
    pub tags: Vec<String>,
    pub properties: BTreeMap<String, Value>,
    /// Properties of the page's pre-block, stored raw the way the host keeps them.
    pub block_properties: BTreeMap<String, String>,
}

impl PageSpec {
    pub fn tags(mut self, tags: &[&str]) -> PageSpec {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn property<V: Into<Value>>(mut self, key: &str, value: V) -> PageSpec {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    /// Set the raw `quick-filters` value of the pre-block.
    pub fn quick_filters(mut self, raw: &str) -> PageSpec {
        self.block_properties
            .insert(QUICK_FILTERS_PROPERTY.to_string(), raw.to_string());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphSnapshot {
    /// Pages keyed by original name.
    pub pages: BTreeMap<String, PageSpec>,
}

fn page_uuid(name: &str, spec: &PageSpec) -> Uuid {
    spec.uuid
        .unwrap_or_else(|| Uuid::new_v5(&Uuid::NAMESPACE_OID, name.to_lowercase().as_bytes()))
}

fn pre_block_uuid(page_uuid: &Uuid) -> Uuid {
    Uuid::new_v5(page_uuid, b"pre-block")
}

fn matches_name(value: &Value, name: &str) -> bool {
    match value {
        Value::String(s) => s.to_lowercase() == name,
        Value::Array(items) => items
            .iter()
            .any(|v| v.as_str().is_some_and(|s| s.to_lowercase() == name)),
        _ => false,
    }
}

impl GraphSnapshot {
    pub fn from_json_str(content: &str) -> Result<GraphSnapshot, FavTreeError> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn from_toml_str(content: &str) -> Result<GraphSnapshot, FavTreeError> {
        Ok(toml::from_str(content)?)
    }

    /// Load a snapshot file; `.toml` files are read as TOML, anything else as JSON.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<GraphSnapshot, FavTreeError> {
        let content = get_content(path.as_ref())?;
        match path.as_ref().extension().and_then(|e| e.to_str()) {
            Some("toml") => GraphSnapshot::from_toml_str(&content),
            _ => GraphSnapshot::from_json_str(&content),
        }
    }

    pub fn add_page(&mut self, name: &str) -> Uuid {
        self.add_page_with(name, PageSpec::default())
    }

    pub fn add_tagged_page(&mut self, name: &str, tags: &[&str]) -> Uuid {
        self.add_page_with(name, PageSpec::default().tags(tags))
    }

    pub fn add_page_with(&mut self, name: &str, spec: PageSpec) -> Uuid {
        let uuid = page_uuid(name, &spec);
        self.pages.insert(name.to_string(), spec);
        uuid
    }

    fn record(name: &str, spec: &PageSpec) -> PageRecord {
        let mut record = PageRecord::new(page_uuid(name, spec), name);
        record.properties = spec.properties.clone();
        record
    }

    fn find(&self, page: &str) -> Option<(&String, &PageSpec)> {
        self.pages
            .iter()
            .find(|(name, _)| name.to_lowercase() == page)
    }

    fn definition_block(name: &str, spec: &PageSpec) -> Option<DefinitionBlock> {
        if spec.block_properties.is_empty() {
            return None;
        }
        let page_uuid = page_uuid(name, spec);
        Some(DefinitionBlock {
            block_uuid: pre_block_uuid(&page_uuid),
            page_uuid,
        })
    }
}

impl GraphQuery for GraphSnapshot {
    async fn find_namespace_children(&self, page: &str) -> Result<Vec<PageRecord>, FavTreeError> {
        Ok(self
            .pages
            .iter()
            .filter(|(name, _)| {
                let lower = name.to_lowercase();
                lower
                    .rfind(NAMESPACE_SEP)
                    .is_some_and(|idx| lower[..idx] == *page)
            })
            .map(|(name, spec)| GraphSnapshot::record(name, spec))
            .collect())
    }

    async fn find_tagged_children(
        &self,
        page: &str,
        hierarchy_property: &str,
    ) -> Result<Vec<PageRecord>, FavTreeError> {
        Ok(self
            .pages
            .iter()
            .filter(|(_, spec)| {
                if hierarchy_property == DEFAULT_HIERARCHY_PROPERTY {
                    spec.tags.iter().any(|t| t.to_lowercase() == page)
                } else {
                    spec.properties
                        .get(hierarchy_property)
                        .is_some_and(|v| matches_name(v, page))
                }
            })
            .map(|(name, spec)| GraphSnapshot::record(name, spec))
            .collect())
    }

    async fn get_definition_block_for(
        &self,
        page: &str,
    ) -> Result<Option<DefinitionBlock>, FavTreeError> {
        Ok(self
            .find(page)
            .and_then(|(name, spec)| GraphSnapshot::definition_block(name, spec)))
    }

    async fn get_block_property(
        &self,
        block: &DefinitionBlock,
        name: &str,
    ) -> Result<Option<String>, FavTreeError> {
        Ok(self
            .pages
            .iter()
            .find(|(page, spec)| page_uuid(page, spec) == block.page_uuid)
            .and_then(|(_, spec)| spec.block_properties.get(name).cloned()))
    }
}
