//! What happens when a tree node is clicked.
//!
//! Page references open their page. Filter groups first write their tag path into the
//! `filters::` property of the block that declared them, so the host filters that page's
//! references, and only then navigate. When the user is already on the target page, the host
//! has to be made to re-render it: navigate to the declaring block, then back to the page, and
//! retry with backoff until the host reports the page as current.
use std::{future::Future, time::Duration};
use uuid::Uuid;

use crate::{
    properties::{Node, NodeKind},
    FavTreeError,
};

/// Block property the host reads its reference filters from.
pub const FILTERS_PROPERTY: &str = "filters";

/// Block access of the host editor.
pub trait BlockEditor: Send + Sync {
    fn get_block_content(
        &self,
        block: &Uuid,
    ) -> impl Future<Output = Result<Option<String>, FavTreeError>> + Send;

    fn update_block(
        &self,
        block: &Uuid,
        content: String,
    ) -> impl Future<Output = Result<(), FavTreeError>> + Send;
}

/// Host navigation. Page names are lower-cased.
pub trait Navigator: Send + Sync {
    /// The page shown in the main view, if any.
    fn current_page(&self) -> impl Future<Output = Result<Option<String>, FavTreeError>> + Send;

    fn navigate_to_page(&self, page: &str) -> impl Future<Output = Result<(), FavTreeError>> + Send;

    fn navigate_to_block(&self, block: &Uuid)
        -> impl Future<Output = Result<(), FavTreeError>> + Send;

    fn open_in_sidebar(&self, target: &Uuid) -> impl Future<Output = Result<(), FavTreeError>> + Send;
}

/// Modifier keys held during the click.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    /// Open in the sidebar instead of the main view.
    pub sidebar: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    /// Delay before the first attempt; doubles after each miss.
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            attempts: 4,
            initial_backoff: Duration::from_millis(50),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
    Opened(String),
    OpenedInSidebar(Uuid),
    /// The current page was re-rendered to pick up new filters.
    Refreshed(String),
    /// A page reference to the page already shown.
    Unchanged,
}

/// Replace any `filters::` line of `content` with one enabling exactly `filters`
/// (lower-cased), appended at the end.
pub fn apply_filters_property(content: &str, filters: &[String]) -> String {
    let marker = format!("{FILTERS_PROPERTY}:: ");
    let kept: Vec<&str> = content
        .lines()
        .filter(|line| !line.starts_with(&marker))
        .collect();
    let entries: Vec<String> = filters
        .iter()
        .map(|f| format!("\"{}\" true", f.to_lowercase()))
        .collect();
    format!(
        "{}\n{marker}{{{}}}",
        kept.join("\n").trim_end_matches('\n'),
        entries.join(", ")
    )
}

async fn write_filters<E: BlockEditor>(
    editor: &E,
    block: &Uuid,
    filters: &[String],
) -> Result<(), FavTreeError> {
    let content = editor
        .get_block_content(block)
        .await?
        .ok_or_else(|| FavTreeError::NotFound(format!("filter block {block}")))?;
    editor
        .update_block(block, apply_filters_property(&content, filters))
        .await
}

async fn is_current<N: Navigator>(navigator: &N, page: &str) -> Result<bool, FavTreeError> {
    Ok(navigator
        .current_page()
        .await?
        .is_some_and(|current| current.to_lowercase() == page))
}

async fn refresh<N: Navigator>(
    navigator: &N,
    block: &Uuid,
    page: &str,
    policy: RetryPolicy,
) -> Result<Activation, FavTreeError> {
    navigator.navigate_to_block(block).await?;
    let mut backoff = policy.initial_backoff;
    for attempt in 1..=policy.attempts {
        tokio::time::sleep(backoff).await;
        navigator.navigate_to_page(page).await?;
        if is_current(navigator, page).await? {
            return Ok(Activation::Refreshed(page.to_string()));
        }
        tracing::debug!("'{}' not current after attempt {}", page, attempt);
        backoff *= 2;
    }
    Err(FavTreeError::Navigation(format!(
        "'{page}' did not become current after {} attempts",
        policy.attempts
    )))
}

/// Route a click on `node`.
#[tracing::instrument(skip(editor, navigator, node), fields(node = %node))]
pub async fn activate<E: BlockEditor, N: Navigator>(
    editor: &E,
    navigator: &N,
    node: &Node,
    modifiers: Modifiers,
    policy: RetryPolicy,
) -> Result<Activation, FavTreeError> {
    let (page, sidebar_target, filter_block) = match &node.kind {
        NodeKind::PageRef(record) => (record.name.clone(), record.uuid, None),
        NodeKind::FilterGroup(filter) => {
            write_filters(editor, &filter.source.block_uuid, &filter.filters).await?;
            (
                filter.source.owner.clone(),
                filter.source.page_uuid,
                Some(filter.source.block_uuid),
            )
        }
    };

    if !is_current(navigator, &page).await? {
        return if modifiers.sidebar {
            navigator.open_in_sidebar(&sidebar_target).await?;
            Ok(Activation::OpenedInSidebar(sidebar_target))
        } else {
            navigator.navigate_to_page(&page).await?;
            Ok(Activation::Opened(page))
        };
    }

    match filter_block {
        None => Ok(Activation::Unchanged),
        Some(_) if modifiers.sidebar => {
            navigator.open_in_sidebar(&sidebar_target).await?;
            Ok(Activation::OpenedInSidebar(sidebar_target))
        }
        Some(block) => refresh(navigator, &block, &page, policy).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        filters,
        properties::{FilterSource, PageRecord},
    };
    use parking_lot::Mutex;
    use std::{collections::BTreeMap, sync::Arc};
    use test_log::test;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Update(Uuid),
        Page(String),
        Block(Uuid),
        Sidebar(Uuid),
    }

    /// Host double. Navigating to a page only takes effect after `lag` further page
    /// navigations.
    #[derive(Default)]
    struct Host {
        blocks: Mutex<BTreeMap<Uuid, String>>,
        current: Mutex<Option<String>>,
        lag: Mutex<u32>,
        calls: Mutex<Vec<Call>>,
    }

    impl BlockEditor for Host {
        async fn get_block_content(&self, block: &Uuid) -> Result<Option<String>, FavTreeError> {
            Ok(self.blocks.lock().get(block).cloned())
        }

        async fn update_block(&self, block: &Uuid, content: String) -> Result<(), FavTreeError> {
            self.calls.lock().push(Call::Update(*block));
            self.blocks.lock().insert(*block, content);
            Ok(())
        }
    }

    impl Navigator for Host {
        async fn current_page(&self) -> Result<Option<String>, FavTreeError> {
            Ok(self.current.lock().clone())
        }

        async fn navigate_to_page(&self, page: &str) -> Result<(), FavTreeError> {
            self.calls.lock().push(Call::Page(page.to_string()));
            let mut lag = self.lag.lock();
            if *lag == 0 {
                *self.current.lock() = Some(page.to_string());
            } else {
                *lag -= 1;
            }
            Ok(())
        }

        async fn navigate_to_block(&self, block: &Uuid) -> Result<(), FavTreeError> {
            self.calls.lock().push(Call::Block(*block));
            *self.current.lock() = None;
            Ok(())
        }

        async fn open_in_sidebar(&self, target: &Uuid) -> Result<(), FavTreeError> {
            self.calls.lock().push(Call::Sidebar(*target));
            Ok(())
        }
    }

    fn filter_node(host: &Host) -> (Node, Arc<FilterSource>) {
        let source = Arc::new(FilterSource {
            owner: "tasks".to_string(),
            block_uuid: Uuid::new_v4(),
            page_uuid: Uuid::new_v4(),
        });
        host.blocks
            .lock()
            .insert(source.block_uuid, "quick-filters:: \"[[Work]] [[Draft]]\"".to_string());
        let nodes = filters::materialize("[[Work]] [[Draft]]", &source);
        let NodeKind::FilterGroup(work) = &nodes[0].kind else {
            panic!("expected a filter group");
        };
        (work.subgroups[0].clone(), source)
    }

    #[test]
    fn test_apply_filters_property_replaces_existing_line() {
        let filters = vec!["Work".to_string(), "Draft".to_string()];
        assert_eq!(
            apply_filters_property("title\nfilters:: {\"old\" true}\nmore", &filters),
            "title\nmore\nfilters:: {\"work\" true, \"draft\" true}"
        );
        assert_eq!(
            apply_filters_property("title\n", &filters[..1]),
            "title\nfilters:: {\"work\" true}"
        );
    }

    #[test(tokio::test)]
    async fn test_page_reference_opens_page_or_sidebar() {
        let host = Host::default();
        let record = PageRecord::new(Uuid::new_v4(), "Inbox");
        let node = Node::tagged(record.clone());

        let opened = activate(&host, &host, &node, Modifiers::default(), RetryPolicy::default())
            .await
            .unwrap();
        assert_eq!(opened, Activation::Opened("inbox".to_string()));

        let again = activate(&host, &host, &node, Modifiers::default(), RetryPolicy::default())
            .await
            .unwrap();
        assert_eq!(again, Activation::Unchanged);

        *host.current.lock() = None;
        let side = activate(&host, &host, &node, Modifiers { sidebar: true }, RetryPolicy::default())
            .await
            .unwrap();
        assert_eq!(side, Activation::OpenedInSidebar(record.uuid));
    }

    #[test(tokio::test)]
    async fn test_filter_group_writes_back_before_navigating() {
        let host = Host::default();
        let (draft, source) = filter_node(&host);
        let outcome = activate(&host, &host, &draft, Modifiers::default(), RetryPolicy::default())
            .await
            .unwrap();
        assert_eq!(outcome, Activation::Opened("tasks".to_string()));
        assert_eq!(
            *host.calls.lock(),
            vec![Call::Update(source.block_uuid), Call::Page("tasks".to_string())]
        );
        assert_eq!(
            host.blocks.lock()[&source.block_uuid],
            "quick-filters:: \"[[Work]] [[Draft]]\"\nfilters:: {\"work\" true, \"draft\" true}"
        );
    }

    #[test(tokio::test(start_paused = true))]
    async fn test_same_page_filter_refresh_retries() {
        let host = Host::default();
        let (draft, source) = filter_node(&host);
        *host.current.lock() = Some("tasks".to_string());
        *host.lag.lock() = 2;

        let outcome = activate(&host, &host, &draft, Modifiers::default(), RetryPolicy::default())
            .await
            .unwrap();
        assert_eq!(outcome, Activation::Refreshed("tasks".to_string()));
        let calls = host.calls.lock().clone();
        assert_eq!(calls[1], Call::Block(source.block_uuid));
        assert_eq!(calls.len(), 5);

        *host.current.lock() = Some("tasks".to_string());
        *host.lag.lock() = 10;
        let err = activate(&host, &host, &draft, Modifiers::default(), RetryPolicy::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FavTreeError::Navigation(_)));
    }
}
