//! Shared test utilities for integration tests.
//!
//! Import from integration test files as:
//! ```ignore
//! mod common;
//! ```

use std::sync::Arc;

use favtree_core::{
    query::{ChildResolver, ResolveOptions},
    snapshot::{GraphSnapshot, PageSpec},
    storage::{ExpansionStateStore, MemoryStorage, Persistence},
    tree::TreeSynchronizer,
};

/// Initialize tracing for tests, respecting RUST_LOG env var.
///
/// Safe to call multiple times; subsequent calls are no-ops.
#[allow(dead_code)]
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// A small knowledge base:
///
/// ```text
/// Projects
/// ├── Launch          (namespace, fixed 0)
/// ├── Archive         (namespace)
/// │   └── 2023        (namespace)
/// ├── Weekly review   (tagged)
/// └── quick filters:  1 [[Active]] [[Blocked]], [[Someday]]
/// Journal
/// ```
#[allow(dead_code)]
pub fn knowledge_base() -> GraphSnapshot {
    let mut graph = GraphSnapshot::default();
    graph.add_page_with(
        "Projects",
        PageSpec::default().quick_filters("\"1 [[Active]] [[Blocked]], [[Someday]]\""),
    );
    graph.add_page_with("Projects/Launch", PageSpec::default().property("fixed", 0));
    graph.add_page("Projects/Archive");
    graph.add_page("Projects/Archive/2023");
    graph.add_tagged_page("Weekly review", &["Projects"]);
    graph.add_page("Journal");
    graph
}

#[allow(dead_code)]
pub async fn tree_for<P: Persistence + 'static>(
    graph: GraphSnapshot,
    storage: P,
    favorite: &str,
) -> TreeSynchronizer<GraphSnapshot, P> {
    let resolver = Arc::new(ChildResolver::new(graph, ResolveOptions::default()));
    let store = Arc::new(ExpansionStateStore::new(storage, "g1"));
    let items = resolver
        .resolve_children(favorite)
        .await
        .expect("snapshot queries do not fail");
    TreeSynchronizer::new(resolver, store, favorite, Arc::from(items))
}

#[allow(dead_code)]
pub fn memory() -> MemoryStorage {
    MemoryStorage::default()
}
