//! Node and record types shared by the resolver, the expansion store and the tree.
//!
//! A [Node] is one displayable entry of a favorite's tree. Its [NodeKind] says whether it points
//! at a real page of the host graph ([NodeKind::PageRef]) or is a virtual quick-filter grouping
//! declared on a page ([NodeKind::FilterGroup]). Everything that behaves differently per kind
//! (icon choice, click routing, property write-back, where children come from) matches on the
//! kind exhaustively.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter},
    sync::Arc,
};
use uuid::Uuid;

use crate::config::Settings;

/// Page property declaring an explicit sibling order.
pub const FIXED_PROPERTY: &str = "fixed";
/// Page property holding a custom icon.
pub const ICON_PROPERTY: &str = "icon";
/// Namespace separator in qualified page names.
pub const NAMESPACE_SEP: char = '/';

/// A page as returned by the host graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRecord {
    pub uuid: Uuid,
    /// Lower-cased unique name.
    pub name: String,
    pub original_name: String,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

impl PageRecord {
    pub fn new(uuid: Uuid, original_name: &str) -> PageRecord {
        PageRecord {
            uuid,
            name: original_name.to_lowercase(),
            original_name: original_name.to_string(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property<V: Into<Value>>(mut self, key: &str, value: V) -> PageRecord {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    /// The `fixed` property as an integer. Numeric strings are accepted, anything else is
    /// treated as no fixed order.
    pub fn fixed_order(&self) -> Option<i64> {
        let value = self.properties.get(FIXED_PROPERTY)?;
        let parsed = match value {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        };
        if parsed.is_none() {
            tracing::debug!(
                "Ignoring non-numeric '{}' property on page '{}': {}",
                FIXED_PROPERTY,
                self.original_name,
                value
            );
        }
        parsed
    }

    pub fn icon(&self) -> Option<&str> {
        self.properties
            .get(ICON_PROPERTY)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Last segment of the qualified name: `a/b/c` -> `c`.
    pub fn trimmed_name(&self) -> &str {
        match self.original_name.rfind(NAMESPACE_SEP) {
            Some(idx) => &self.original_name[idx + NAMESPACE_SEP.len_utf8()..],
            None => &self.original_name,
        }
    }
}

/// The pre-block of a page, which carries the page's own properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefinitionBlock {
    pub block_uuid: Uuid,
    pub page_uuid: Uuid,
}

/// The record that declared a set of quick filters, so edits can be routed back to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSource {
    /// Lower-cased name of the declaring page.
    pub owner: String,
    pub block_uuid: Uuid,
    pub page_uuid: Uuid,
}

/// A materialized quick-filter group.
#[derive(Debug, Clone, PartialEq)]
pub struct QuickFilter {
    pub source: Arc<FilterSource>,
    /// Tag path from the top-level group down to this one.
    pub filters: Vec<String>,
    /// Pre-computed children; resolving them never queries the graph.
    pub subgroups: Arc<[Node]>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    PageRef(PageRecord),
    FilterGroup(QuickFilter),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub identifier: Uuid,
    pub display_label: String,
    pub fixed_order: Option<i64>,
    pub kind: NodeKind,
}

/// What a renderer should draw in front of the label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeIcon {
    /// The configured quick-filter icon.
    Filter(String),
    /// The page's own `icon` property.
    Custom(String),
    /// The host's default page icon.
    Page,
}

impl Node {
    /// A namespace child is labelled with the last segment of its qualified name.
    pub fn namespace_child(record: PageRecord) -> Node {
        Node {
            identifier: record.uuid,
            display_label: record.trimmed_name().to_string(),
            fixed_order: record.fixed_order(),
            kind: NodeKind::PageRef(record),
        }
    }

    /// A tag child keeps its full name, since it may live in any namespace.
    pub fn tagged(record: PageRecord) -> Node {
        Node {
            identifier: record.uuid,
            display_label: record.original_name.clone(),
            fixed_order: record.fixed_order(),
            kind: NodeKind::PageRef(record),
        }
    }

    pub fn quick_filter(
        display_label: &str,
        fixed_order: Option<i64>,
        source: Arc<FilterSource>,
        filters: Vec<String>,
        subgroups: Arc<[Node]>,
    ) -> Node {
        let identifier = Uuid::new_v5(&source.block_uuid, filters.join("\u{1f}").as_bytes());
        Node {
            identifier,
            display_label: display_label.to_string(),
            fixed_order,
            kind: NodeKind::FilterGroup(QuickFilter {
                source,
                filters,
                subgroups,
            }),
        }
    }

    /// Key of this node inside its parent's expansion map. Pages use their unique lower-cased
    /// name, filter groups their label (unique among the subgroups of one parent).
    pub fn local_key(&self) -> &str {
        match &self.kind {
            NodeKind::PageRef(record) => &record.name,
            NodeKind::FilterGroup(_) => &self.display_label,
        }
    }

    pub fn icon(&self, settings: &Settings) -> NodeIcon {
        match &self.kind {
            NodeKind::FilterGroup(_) => NodeIcon::Filter(settings.filter_icon.clone()),
            NodeKind::PageRef(record) => match record.icon() {
                Some(icon) => NodeIcon::Custom(icon.to_string()),
                None => NodeIcon::Page,
            },
        }
    }

    /// Label as shown to the user. Filter tags written as `owner/tag` drop the owner prefix.
    pub fn visible_label(&self) -> &str {
        match &self.kind {
            NodeKind::PageRef(_) => &self.display_label,
            NodeKind::FilterGroup(filter) => {
                strip_owner(&self.display_label, &filter.source.owner)
                    .unwrap_or(&self.display_label)
            }
        }
    }
}

/// The part of `label` after a leading `owner/`, comparing case-insensitively. `owner` is
/// lower-cased. Works on chars since lower-casing can change byte lengths.
fn strip_owner<'a>(label: &'a str, owner: &str) -> Option<&'a str> {
    let mut expected = owner.chars();
    for (idx, ch) in label.char_indices() {
        if expected.as_str().is_empty() {
            return (ch == NAMESPACE_SEP).then(|| &label[idx + ch.len_utf8()..]);
        }
        for lowered in ch.to_lowercase() {
            if expected.next() != Some(lowered) {
                return None;
            }
        }
    }
    None
}

impl Display for Node {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self.fixed_order {
            Some(order) => write!(f, "{} ({})", self.display_label, order),
            None => write!(f, "{}", self.display_label),
        }
    }
}

/// Address of a node inside one favorite's tree: the local keys from the favorite down to the
/// node. The empty path addresses the favorite itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodePath(Vec<String>);

impl NodePath {
    pub fn root() -> NodePath {
        NodePath(Vec::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn child(&self, key: &str) -> NodePath {
        let mut segments = self.0.clone();
        segments.push(key.to_string());
        NodePath(segments)
    }

    pub fn parent(&self) -> Option<NodePath> {
        if self.0.is_empty() {
            None
        } else {
            Some(NodePath(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    pub fn last(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// True when `self` is `ancestor` or lies below it.
    pub fn starts_with(&self, ancestor: &NodePath) -> bool {
        self.0.starts_with(&ancestor.0)
    }
}

impl<S: Into<String>> FromIterator<S> for NodePath {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        NodePath(iter.into_iter().map(Into::into).collect())
    }
}

impl Display for NodePath {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "/{}", self.0.join("/"))
    }
}
