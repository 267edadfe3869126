//! The favorites list as a whole: one [TreeSynchronizer] per favorite, kept in step with the
//! host's favorites and the graph.
use futures::future::join_all;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::{collections::BTreeMap, sync::Arc};

use crate::{
    config::Settings,
    properties::Node,
    query::{ChildResolver, GraphQuery},
    storage::{ExpansionKey, ExpansionStateStore, Persistence, ReadKeySet},
    tree::TreeSynchronizer,
    FavTreeError,
};

const SLOT_PREFIX: &str = "favtree-";

/// Stable mount identifier for the tree of `favorite`.
pub fn slot_id(favorite: &str) -> String {
    let digest = Sha256::digest(favorite.to_lowercase().as_bytes());
    format!("{SLOT_PREFIX}{}", hex::encode(&digest[..8]))
}

pub struct FavoritesForest<Q, P> {
    resolver: Arc<ChildResolver<Q>>,
    store: Arc<ExpansionStateStore<P>>,
    settings: Settings,
    trees: Mutex<BTreeMap<String, Arc<TreeSynchronizer<Q, P>>>>,
}

impl<Q, P> FavoritesForest<Q, P>
where
    Q: GraphQuery + 'static,
    P: Persistence + 'static,
{
    pub fn new(
        resolver: Arc<ChildResolver<Q>>,
        store: Arc<ExpansionStateStore<P>>,
        settings: Settings,
    ) -> FavoritesForest<Q, P> {
        FavoritesForest {
            resolver,
            store,
            settings,
            trees: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<ExpansionStateStore<P>> {
        &self.store
    }

    pub fn tree(&self, favorite: &str) -> Option<Arc<TreeSynchronizer<Q, P>>> {
        self.trees.lock().get(favorite).cloned()
    }

    pub fn favorites(&self) -> Vec<String> {
        self.trees.lock().keys().cloned().collect()
    }

    async fn root_items(&self, favorite: &str) -> Vec<Node> {
        self.resolver
            .resolve_children(favorite)
            .await
            .unwrap_or_else(|err| {
                tracing::warn!("Showing favorite '{}' without children: {}", favorite, err);
                Vec::new()
            })
    }

    async fn process_one(
        &self,
        favorite: &str,
        read_keys: Option<&ReadKeySet>,
    ) -> Arc<TreeSynchronizer<Q, P>> {
        let items = self.root_items(favorite).await;
        let existing = self.tree(favorite);
        match existing {
            Some(tree) => {
                tree.set_read_keys(read_keys.cloned());
                tree.refresh(Arc::from(items)).await;
                tree
            }
            None => {
                let tree = Arc::new(TreeSynchronizer::new(
                    self.resolver.clone(),
                    self.store.clone(),
                    favorite,
                    Arc::from(items),
                ));
                tree.set_read_keys(read_keys.cloned());
                tree.restore().await;
                self.trees
                    .lock()
                    .insert(favorite.to_string(), tree.clone());
                tree
            }
        }
    }

    /// One resolution pass over `favorites`, in the host's order. Trees of favorites that are
    /// gone are dropped; the others are re-resolved at every loaded level, keeping their
    /// expansion state. Every expansion key read during the pass is recorded into `read_keys`.
    #[tracing::instrument(skip(self, read_keys))]
    pub async fn process(
        &self,
        favorites: &[String],
        read_keys: Option<&ReadKeySet>,
    ) -> Vec<Arc<TreeSynchronizer<Q, P>>> {
        let trees = join_all(
            favorites
                .iter()
                .map(|favorite| self.process_one(favorite, read_keys)),
        )
        .await;
        let mut current = self.trees.lock();
        current.retain(|name, _| favorites.contains(name));
        tracing::debug!("Processed {} favorite(s)", current.len());
        trees
    }

    /// First pass after start: process with a fresh [ReadKeySet], then wait the configured
    /// settle delay and delete every expansion key of the current graph the pass did not read.
    /// Returns the removed keys.
    #[tracing::instrument(skip(self))]
    pub async fn startup(&self, favorites: &[String]) -> Result<Vec<ExpansionKey>, FavTreeError> {
        let read_keys = ReadKeySet::default();
        let trees = self.process(favorites, Some(&read_keys)).await;
        let removed = self
            .store
            .collect_garbage(&read_keys, self.settings.gc_settle())
            .await?;
        for tree in trees {
            tree.set_read_keys(None);
        }
        if !removed.is_empty() {
            tracing::info!("Removed {} unused expansion state entries", removed.len());
        }
        Ok(removed)
    }

    /// Wait for the queued writes of every tree.
    pub async fn flush(&self) {
        let trees: Vec<_> = self.trees.lock().values().cloned().collect();
        join_all(trees.iter().map(|tree| tree.flush())).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        query::ResolveOptions,
        snapshot::GraphSnapshot,
        properties::NodePath,
        storage::{MemoryStorage, SwitchableGraph},
        tests::helpers::{labels, SharedGraph},
        tree::NodeState,
    };
    use std::time::Duration;
    use test_log::test;

    fn make_forest(
        graph: GraphSnapshot,
        storage: MemoryStorage,
        host: SwitchableGraph,
    ) -> FavoritesForest<GraphSnapshot, MemoryStorage> {
        FavoritesForest::new(
            Arc::new(ChildResolver::new(graph, ResolveOptions::default())),
            Arc::new(ExpansionStateStore::new(storage, host)),
            Settings::default(),
        )
    }

    fn graph() -> GraphSnapshot {
        let mut graph = GraphSnapshot::default();
        graph.add_page("PageA");
        graph.add_page("PageA/one");
        graph.add_page("PageB");
        graph.add_tagged_page("Note", &["PageB"]);
        graph
    }

    #[test]
    fn test_slot_id_is_stable_and_case_insensitive() {
        assert_eq!(slot_id("PageA"), slot_id("pagea"));
        assert_ne!(slot_id("PageA"), slot_id("PageB"));
        assert!(slot_id("PageA").starts_with(SLOT_PREFIX));
        assert_eq!(slot_id("PageA").len(), SLOT_PREFIX.len() + 16);
    }

    #[test(tokio::test)]
    async fn test_process_restores_and_drops_removed_favorites() {
        let storage = MemoryStorage::default();
        let forest = make_forest(graph(), storage.clone(), SwitchableGraph::new("g1"));
        storage.set("expansion-_PageA-g1", "true".to_string()).await.unwrap();

        let favorites = vec!["PageA".to_string(), "PageB".to_string()];
        let trees = forest.process(&favorites, None).await;
        assert_eq!(trees.len(), 2);
        assert!(trees[0].is_root_expanded());
        assert!(!trees[1].is_root_expanded());
        assert_eq!(labels(&trees[0].items()), vec!["one"]);
        assert_eq!(labels(&trees[1].items()), vec!["Note"]);

        // Unchanged favorites keep their list.
        let before = trees[0].items();
        forest.process(&favorites[..1], None).await;
        assert!(Arc::ptr_eq(&before, &forest.tree("PageA").unwrap().items()));
        assert_eq!(forest.favorites(), vec!["PageA"]);
    }

    #[test(tokio::test)]
    async fn test_repeated_passes_pick_up_changes_below_the_top_level() {
        let mut initial = GraphSnapshot::default();
        initial.add_page("PageA");
        initial.add_page("PageA/one");
        initial.add_page("PageA/one/x");
        let graph = SharedGraph::new(initial);
        let forest = FavoritesForest::new(
            Arc::new(ChildResolver::new(graph.clone(), ResolveOptions::default())),
            Arc::new(ExpansionStateStore::new(MemoryStorage::default(), "g1")),
            Settings::default(),
        );
        let favorites = vec!["PageA".to_string()];
        let tree = forest.process(&favorites, None).await.remove(0);
        tree.toggle_root(false);
        tree.ensure_children_loaded(&NodePath::root()).await;
        let one = NodePath::root().child("pagea/one");
        assert!(tree.toggle_node(&one, false).unwrap());
        tree.ensure_children_loaded(&one).await;
        assert_eq!(labels(&tree.children(&one).unwrap()), vec!["x"]);

        // Same top-level list, new grandchild.
        graph.edit(|g| {
            g.add_page("PageA/one/y");
        });
        forest.process(&favorites, None).await;
        assert_eq!(labels(&tree.children(&one).unwrap()), vec!["x", "y"]);
        assert_eq!(tree.node_state(&one), Some(NodeState::ExpandedReady));

        // New top-level item.
        graph.edit(|g| {
            g.add_page("PageA/two");
        });
        forest.process(&favorites, None).await;
        assert_eq!(labels(&tree.items()), vec!["one", "two"]);
        assert!(tree.is_root_expanded());
        assert_eq!(tree.node_state(&one), Some(NodeState::ExpandedReady));
        assert_eq!(labels(&tree.children(&one).unwrap()), vec!["x", "y"]);
    }

    #[test(tokio::test(start_paused = true))]
    async fn test_startup_collects_unread_keys_after_settle() {
        let storage = MemoryStorage::default();
        let host = SwitchableGraph::new("g1");
        for key in [
            "expansion-_PageA-g1",
            "expansion-PageA-g1",
            "expansion-_Gone-g1",
            "expansion-Gone-g1",
            "expansion-_Gone-g2",
            "unrelated",
        ] {
            storage.set(key, "true".to_string()).await.unwrap();
        }
        let forest = make_forest(graph(), storage.clone(), host);

        let start = tokio::time::Instant::now();
        let removed = forest.startup(&["PageA".to_string()]).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(3000));
        let removed: Vec<&str> = removed.iter().map(|k| k.as_str()).collect();
        assert_eq!(removed, vec!["expansion-Gone-g1", "expansion-_Gone-g1"]);
        assert!(storage.peek("expansion-_PageA-g1").is_some());
        assert!(storage.peek("expansion-PageA-g1").is_some());
        assert!(storage.peek("expansion-_Gone-g2").is_some());
        assert!(storage.peek("unrelated").is_some());
    }

    #[test(tokio::test)]
    async fn test_switching_graphs_scopes_state() {
        let storage = MemoryStorage::default();
        let host = SwitchableGraph::new("g1");
        let forest = make_forest(graph(), storage.clone(), host.clone());
        let favorites = vec!["PageA".to_string()];
        let trees = forest.process(&favorites, None).await;
        trees[0].toggle_root(false);
        forest.flush().await;
        assert_eq!(storage.peek("expansion-_PageA-g1").as_deref(), Some("true"));

        host.switch_to("g2");
        let other = make_forest(graph(), storage.clone(), host.clone());
        let trees = other.process(&favorites, None).await;
        assert!(!trees[0].is_root_expanded());
        trees[0].toggle_root(false);
        other.flush().await;
        assert_eq!(storage.peek("expansion-_PageA-g2").as_deref(), Some("true"));
    }
}
