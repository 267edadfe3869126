//! Quick-filter notation.
//!
//! A quick-filter definition is a page property holding a compact list of groups:
//!
//! ```text
//! 2 [[Work]], [[Work]] [[Draft]], [[Personal]]
//! ```
//!
//! Each group is an optional leading integer (the fixed order of its top-level entry) followed by
//! one or more `[[tag]]` references. The tags of a group form a path: the first tag is the
//! top-level entry, each following tag nests below the previous one. Whitespace between tokens
//! is allowed, any other character ends the group. Groups starting with the same tag merge into
//! one tree; the first group to mention a tag decides its fixed order.
//!
//! Parsing never fails: text that contains no group produces no filters.
use once_cell::sync::Lazy;
use regex::Regex;
use std::{fmt::Write, sync::Arc};

use crate::properties::{FilterSource, Node};

static GROUP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\d+\s+)?(?:\[\[[^\]]+\]\]\s*)+").expect("group pattern is valid")
});
static TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\[([^\]]+)\]\]\s*|(\d+)").expect("token pattern is valid"));

/// A node of the parsed filter tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterGroup {
    /// Path from the top-level tag down to this group.
    pub tags: Vec<String>,
    /// Only top-level groups carry a fixed order.
    pub fixed_order: Option<u64>,
    /// Nested groups in the order they were first mentioned.
    pub subgroups: Vec<FilterGroup>,
}

impl FilterGroup {
    fn new(tags: Vec<String>, fixed_order: Option<u64>) -> FilterGroup {
        FilterGroup {
            tags,
            fixed_order,
            subgroups: Vec::new(),
        }
    }

    /// The tag this group is keyed by among its siblings.
    pub fn name(&self) -> &str {
        self.tags.last().map(String::as_str).unwrap_or_default()
    }

    pub fn subgroup(&self, name: &str) -> Option<&FilterGroup> {
        self.subgroups.iter().find(|g| g.name() == name)
    }

    /// Insert the remainder of a tag path below this group.
    fn merge_path(&mut self, rest: &[String]) {
        let Some((head, tail)) = rest.split_first() else {
            return;
        };
        let idx = match self.subgroups.iter().position(|g| g.name() == head) {
            Some(idx) => idx,
            None => {
                let mut tags = self.tags.clone();
                tags.push(head.clone());
                self.subgroups.push(FilterGroup::new(tags, None));
                self.subgroups.len() - 1
            }
        };
        self.subgroups[idx].merge_path(tail);
    }

    /// All root-to-leaf tag paths of this tree.
    fn leaf_paths(&self, out: &mut Vec<Vec<String>>) {
        if self.subgroups.is_empty() {
            out.push(self.tags.clone());
        }
        for sub in self.subgroups.iter() {
            sub.leaf_paths(out);
        }
    }

    /// Turn this group into a tree node owned by `source`. Subgroups become the node's
    /// pre-computed children.
    pub fn to_node(&self, source: &Arc<FilterSource>) -> Node {
        let children: Vec<Node> = self.subgroups.iter().map(|g| g.to_node(source)).collect();
        Node::quick_filter(
            self.name(),
            self.fixed_order.map(|o| o as i64),
            source.clone(),
            self.tags.clone(),
            Arc::from(children),
        )
    }
}

/// Split one matched group into its fixed order and tag path.
fn split_group(group: &str) -> (Option<u64>, Vec<String>) {
    let mut fixed = None;
    let mut tags = Vec::new();
    for (idx, caps) in TOKEN_RE.captures_iter(group).enumerate() {
        if let Some(tag) = caps.get(1) {
            tags.push(tag.as_str().to_string());
        } else if let (0, Some(num)) = (idx, caps.get(2)) {
            // Overlong numerals are treated as no order rather than rejecting the group.
            fixed = num.as_str().parse::<u64>().ok();
        }
    }
    (fixed, tags)
}

/// Parse quick-filter text into top-level groups, in order of first mention.
pub fn parse(text: &str) -> Vec<FilterGroup> {
    let mut roots: Vec<FilterGroup> = Vec::new();
    for group in GROUP_RE.find_iter(text) {
        let (fixed, tags) = split_group(group.as_str());
        let Some((head, rest)) = tags.split_first() else {
            continue;
        };
        let idx = match roots.iter().position(|r| r.name() == head) {
            Some(idx) => idx,
            None => {
                roots.push(FilterGroup::new(vec![head.clone()], fixed));
                roots.len() - 1
            }
        };
        roots[idx].merge_path(rest);
    }
    tracing::trace!("Parsed {} quick filter group(s) from {:?}", roots.len(), text);
    roots
}

/// Write groups back into quick-filter notation. Parsing the result yields the same tree.
pub fn serialize(groups: &[FilterGroup]) -> String {
    let mut out = String::new();
    for group in groups.iter() {
        let mut paths = Vec::new();
        group.leaf_paths(&mut paths);
        for (idx, path) in paths.iter().enumerate() {
            if !out.is_empty() {
                out.push_str(", ");
            }
            if let (0, Some(order)) = (idx, group.fixed_order) {
                let _ = write!(out, "{order} ");
            }
            let refs: Vec<String> = path.iter().map(|t| format!("[[{t}]]")).collect();
            out.push_str(&refs.join(" "));
        }
    }
    out
}

/// Parse and materialize quick filters declared by `source`.
pub fn materialize(text: &str, source: &Arc<FilterSource>) -> Vec<Node> {
    parse(text).iter().map(|g| g.to_node(source)).collect()
}
