//! Child resolution for favorites trees.
//!
//! [ChildResolver::resolve_children] merges three sources into the ordered child list of a
//! page: its namespace children, the pages tagged with it, and the quick filters declared on
//! it. Entries with a fixed order come first (ascending), the rest follow sorted by label with
//! the configured [Collator], and the list is cut at the configured limit.
use std::{future::Future, sync::Arc};

use crate::{
    collation::Collator,
    config::Settings,
    filters,
    properties::{DefinitionBlock, FilterSource, Node, PageRecord, NAMESPACE_SEP},
    FavTreeError,
};

/// Block property holding the quick-filter definition of a page.
pub const QUICK_FILTERS_PROPERTY: &str = "quick-filters";

/// Read access to the host graph.
///
/// Page references are lower-cased page names. Implementations report failures as
/// [FavTreeError::Query].
pub trait GraphQuery: Send + Sync {
    /// Pages whose namespace parent is `page`.
    fn find_namespace_children(
        &self,
        page: &str,
    ) -> impl Future<Output = Result<Vec<PageRecord>, FavTreeError>> + Send;

    /// Pages associated with `page` through `hierarchy_property`. `tags` means the page tag
    /// relation; any other name is a page property whose value equals `page` or lists it.
    fn find_tagged_children(
        &self,
        page: &str,
        hierarchy_property: &str,
    ) -> impl Future<Output = Result<Vec<PageRecord>, FavTreeError>> + Send;

    /// The pre-block of `page`, if it has one.
    fn get_definition_block_for(
        &self,
        page: &str,
    ) -> impl Future<Output = Result<Option<DefinitionBlock>, FavTreeError>> + Send;

    /// Raw stored value of a block property.
    fn get_block_property(
        &self,
        block: &DefinitionBlock,
        name: &str,
    ) -> impl Future<Output = Result<Option<String>, FavTreeError>> + Send;
}

/// Resolution options threaded into every call.
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    pub hierarchy_property: String,
    pub limit: usize,
    pub collator: Collator,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        ResolveOptions::from_settings(&Settings::default(), None)
    }
}

impl ResolveOptions {
    pub fn from_settings(settings: &Settings, host_language: Option<&str>) -> ResolveOptions {
        ResolveOptions {
            hierarchy_property: settings.hierarchy_property.clone(),
            limit: settings.tagged_page_limit,
            collator: settings.collator(host_language),
        }
    }
}

pub struct ChildResolver<Q> {
    graph: Q,
    options: ResolveOptions,
}

impl<Q: GraphQuery> ChildResolver<Q> {
    pub fn new(graph: Q, options: ResolveOptions) -> ChildResolver<Q> {
        ChildResolver { graph, options }
    }

    pub fn options(&self) -> &ResolveOptions {
        &self.options
    }

    pub fn graph(&self) -> &Q {
        &self.graph
    }

    /// Ordered, limited child list of `page`.
    #[tracing::instrument(skip(self))]
    pub async fn resolve_children(&self, page: &str) -> Result<Vec<Node>, FavTreeError> {
        let page = page.to_lowercase();

        let namespace_children: Vec<Node> = self
            .graph
            .find_namespace_children(&page)
            .await?
            .into_iter()
            .map(Node::namespace_child)
            .collect();

        let namespace_prefix = format!("{page}{NAMESPACE_SEP}");
        let tagged_children: Vec<Node> = self
            .graph
            .find_tagged_children(&page, &self.options.hierarchy_property)
            .await?
            .into_iter()
            .filter(|record| !record.name.starts_with(&namespace_prefix))
            .map(Node::tagged)
            .collect();

        let quick_filters = self.quick_filters(&page).await?;

        if namespace_children.is_empty() && tagged_children.is_empty() && quick_filters.is_empty()
        {
            return Ok(Vec::new());
        }

        let mut all = namespace_children;
        all.extend(tagged_children);
        all.extend(quick_filters);
        Ok(order_children(all, &self.options))
    }

    /// Quick filters declared on the pre-block of `page`. Undecodable definitions are logged
    /// and treated as absent.
    async fn quick_filters(&self, page: &str) -> Result<Vec<Node>, FavTreeError> {
        let Some(block) = self.graph.get_definition_block_for(page).await? else {
            return Ok(Vec::new());
        };
        let Some(raw) = self
            .graph
            .get_block_property(&block, QUICK_FILTERS_PROPERTY)
            .await?
        else {
            return Ok(Vec::new());
        };
        let text = match serde_json::from_str::<serde_json::Value>(&raw) {
            Ok(serde_json::Value::String(text)) => text,
            Ok(serde_json::Value::Null) => return Ok(Vec::new()),
            Ok(other) => {
                tracing::warn!(
                    "Ignoring {} on '{}': expected a string, found {}",
                    QUICK_FILTERS_PROPERTY,
                    page,
                    other
                );
                return Ok(Vec::new());
            }
            Err(err) => {
                tracing::warn!(
                    "Ignoring undecodable {} on '{}': {}",
                    QUICK_FILTERS_PROPERTY,
                    page,
                    err
                );
                return Ok(Vec::new());
            }
        };
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let source = Arc::new(FilterSource {
            owner: page.to_string(),
            block_uuid: block.block_uuid,
            page_uuid: block.page_uuid,
        });
        Ok(filters::materialize(&text, &source))
    }
}

/// Fixed entries ascending by order, then the rest by collated label, cut at the limit. Both
/// sorts are stable.
pub fn order_children(nodes: Vec<Node>, options: &ResolveOptions) -> Vec<Node> {
    let (mut fixed, mut dynamic): (Vec<Node>, Vec<Node>) =
        nodes.into_iter().partition(|n| n.fixed_order.is_some());
    fixed.sort_by_key(|n| n.fixed_order);
    dynamic.sort_by_cached_key(|n| options.collator.sort_key(&n.display_label));
    fixed.extend(dynamic);
    fixed.truncate(options.limit);
    fixed
}
