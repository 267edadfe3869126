//! Shared test utilities for unit tests

use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{Notify, Semaphore};

use crate::{
    properties::{DefinitionBlock, Node, PageRecord},
    query::GraphQuery,
    snapshot::GraphSnapshot,
    storage::Persistence,
    FavTreeError,
};

/// Initialize logging for tests
#[allow(dead_code)]
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

pub fn labels(nodes: &[Node]) -> Vec<&str> {
    nodes.iter().map(|n| n.display_label.as_str()).collect()
}

/// A [GraphSnapshot] whose namespace lookup for one page blocks until released.
#[derive(Clone)]
pub struct GatedGraph {
    inner: Arc<GraphSnapshot>,
    page: String,
    gate: Arc<Semaphore>,
    blocked: Arc<Notify>,
}

impl GatedGraph {
    pub fn new(inner: GraphSnapshot, page: &str) -> GatedGraph {
        GatedGraph {
            inner: Arc::new(inner),
            page: page.to_string(),
            gate: Arc::new(Semaphore::new(0)),
            blocked: Arc::new(Notify::new()),
        }
    }

    /// Let one blocked (or future) lookup through.
    pub fn release(&self) {
        self.gate.add_permits(1);
    }

    pub async fn wait_until_blocked(&self) {
        self.blocked.notified().await;
    }
}

impl GraphQuery for GatedGraph {
    async fn find_namespace_children(&self, page: &str) -> Result<Vec<PageRecord>, FavTreeError> {
        if page == self.page {
            self.blocked.notify_one();
            self.gate
                .acquire()
                .await
                .map_err(|err| FavTreeError::Query(err.to_string()))?
                .forget();
        }
        self.inner.find_namespace_children(page).await
    }

    async fn find_tagged_children(
        &self,
        page: &str,
        hierarchy_property: &str,
    ) -> Result<Vec<PageRecord>, FavTreeError> {
        self.inner.find_tagged_children(page, hierarchy_property).await
    }

    async fn get_definition_block_for(
        &self,
        page: &str,
    ) -> Result<Option<DefinitionBlock>, FavTreeError> {
        self.inner.get_definition_block_for(page).await
    }

    async fn get_block_property(
        &self,
        block: &DefinitionBlock,
        name: &str,
    ) -> Result<Option<String>, FavTreeError> {
        self.inner.get_block_property(block, name).await
    }
}

/// A [GraphSnapshot] that tests can edit while trees hold on to it.
#[derive(Clone, Default)]
pub struct SharedGraph(Arc<RwLock<GraphSnapshot>>);

impl SharedGraph {
    pub fn new(inner: GraphSnapshot) -> SharedGraph {
        SharedGraph(Arc::new(RwLock::new(inner)))
    }

    pub fn edit(&self, f: impl FnOnce(&mut GraphSnapshot)) {
        f(&mut self.0.write());
    }

    fn current(&self) -> GraphSnapshot {
        self.0.read().clone()
    }
}

impl GraphQuery for SharedGraph {
    async fn find_namespace_children(&self, page: &str) -> Result<Vec<PageRecord>, FavTreeError> {
        self.current().find_namespace_children(page).await
    }

    async fn find_tagged_children(
        &self,
        page: &str,
        hierarchy_property: &str,
    ) -> Result<Vec<PageRecord>, FavTreeError> {
        self.current()
            .find_tagged_children(page, hierarchy_property)
            .await
    }

    async fn get_definition_block_for(
        &self,
        page: &str,
    ) -> Result<Option<DefinitionBlock>, FavTreeError> {
        self.current().get_definition_block_for(page).await
    }

    async fn get_block_property(
        &self,
        block: &DefinitionBlock,
        name: &str,
    ) -> Result<Option<String>, FavTreeError> {
        self.current().get_block_property(block, name).await
    }
}

/// A [GraphSnapshot] whose lookups fail for one page.
#[derive(Clone)]
pub struct FailingGraph {
    inner: GraphSnapshot,
    page: String,
}

impl FailingGraph {
    pub fn new(inner: GraphSnapshot, page: &str) -> FailingGraph {
        FailingGraph {
            inner,
            page: page.to_string(),
        }
    }

    fn check(&self, page: &str) -> Result<(), FavTreeError> {
        if page == self.page {
            Err(FavTreeError::Query(format!("lookup of '{page}' timed out")))
        } else {
            Ok(())
        }
    }
}

impl GraphQuery for FailingGraph {
    async fn find_namespace_children(&self, page: &str) -> Result<Vec<PageRecord>, FavTreeError> {
        self.check(page)?;
        self.inner.find_namespace_children(page).await
    }

    async fn find_tagged_children(
        &self,
        page: &str,
        hierarchy_property: &str,
    ) -> Result<Vec<PageRecord>, FavTreeError> {
        self.check(page)?;
        self.inner.find_tagged_children(page, hierarchy_property).await
    }

    async fn get_definition_block_for(
        &self,
        page: &str,
    ) -> Result<Option<DefinitionBlock>, FavTreeError> {
        self.check(page)?;
        self.inner.get_definition_block_for(page).await
    }

    async fn get_block_property(
        &self,
        block: &DefinitionBlock,
        name: &str,
    ) -> Result<Option<String>, FavTreeError> {
        self.inner.get_block_property(block, name).await
    }
}

/// Storage that rejects every operation.
#[derive(Clone, Default)]
pub struct BrokenStorage;

impl Persistence for BrokenStorage {
    async fn has(&self, _key: &str) -> Result<bool, FavTreeError> {
        Err(FavTreeError::Persistence("storage offline".to_string()))
    }

    async fn get(&self, _key: &str) -> Result<Option<String>, FavTreeError> {
        Err(FavTreeError::Persistence("storage offline".to_string()))
    }

    async fn set(&self, _key: &str, _value: String) -> Result<(), FavTreeError> {
        Err(FavTreeError::Persistence("storage offline".to_string()))
    }

    async fn remove(&self, _key: &str) -> Result<(), FavTreeError> {
        Err(FavTreeError::Persistence("storage offline".to_string()))
    }

    async fn list_keys(&self) -> Result<Vec<String>, FavTreeError> {
        Err(FavTreeError::Persistence("storage offline".to_string()))
    }
}
