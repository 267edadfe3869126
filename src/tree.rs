//! Lazy, stateful favorites tree.
//!
//! A [TreeSynchronizer] owns the tree below one favorite. Each expandable node is a branch
//! addressed by its [NodePath]; the favorite itself is the root branch. A branch knows its own
//! items (the node's children), whether it is expanded, and whether the children of those items
//! have been loaded:
//!
//! ```text
//!   Collapsed --expand--> ExpandedPending --resolved--> ExpandedReady
//!       ^                        |                            |
//!       +------collapse----------+-------------collapse-------+
//! ```
//!
//! Loading a branch reads its [ExpansionMap] and resolves the children of each of its items, so
//! renderers know which items are expandable. Items that are themselves expanded are loaded in
//! turn, which restores exactly the tree the user left. Collapsing a ready branch keeps its
//! children; re-expanding reuses them. Replacing a branch's items (a new resolution pass) discards
//! everything below it.
//!
//! There are no cancellation tokens. Every load carries a generation number, and a result whose
//! generation no longer matches the branch (collapsed while pending, items replaced) is dropped.
//!
//! Persistence is fire-and-forget: toggles enqueue whole-map writes to a background writer task,
//! which applies them in order and logs failures. [TreeSynchronizer::flush] waits for the queue.
use futures::future::{join_all, BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::{collections::BTreeMap, sync::Arc};
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::{
    event::TreeEvent,
    properties::{Node, NodeKind, NodePath},
    query::{ChildResolver, GraphQuery},
    storage::{child_scope, ExpansionKey, ExpansionMap, ExpansionStateStore, Persistence, ReadKeySet},
    FavTreeError,
};

/// Depth below which expanded branches are loaded automatically. Guards expand-all against
/// tag cycles; explicit loads of deeper paths still work.
pub const MAX_AUTO_DEPTH: usize = 10;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Collapsed,
    /// Expanded, children requested but not yet resolved.
    ExpandedPending,
    ExpandedReady,
}

/// Result of [TreeSynchronizer::ensure_children_loaded].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded,
    AlreadyLoaded,
    /// Another load of this branch is in flight.
    InFlight,
    /// The branch is collapsed; nothing is loaded while collapsed.
    Collapsed,
    /// The result arrived after the branch was collapsed or replaced and was dropped.
    Stale,
    /// No expandable node at this path.
    Unknown,
}

/// One visible row of the rendered tree.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeRow {
    pub path: NodePath,
    /// 0 for the favorite's direct children.
    pub depth: usize,
    pub node: Node,
    pub has_children: bool,
    pub expanded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Load {
    Idle,
    Pending(u64),
    Ready,
}

#[derive(Debug, Clone)]
struct Branch {
    /// Storage scope of this branch's expansion map.
    scope: String,
    items: Arc<[Node]>,
    expanded: bool,
    /// Value handed down by a cascading toggle, applied to children when they load.
    cascade: Option<bool>,
    load: Load,
    /// Flags of `items`, keyed by local key.
    expansion: Arc<ExpansionMap>,
}

impl Branch {
    fn new(scope: String, items: Arc<[Node]>, expanded: bool, cascade: Option<bool>) -> Branch {
        Branch {
            scope,
            items,
            expanded,
            cascade,
            load: Load::Idle,
            expansion: Arc::new(ExpansionMap::default()),
        }
    }

    fn set_expanded(&mut self, value: bool) {
        self.expanded = value;
        if !value && matches!(self.load, Load::Pending(_)) {
            self.load = Load::Idle;
        }
    }
}

/// Side effects collected under the state lock and performed after releasing it.
#[derive(Default)]
struct Effects {
    maps: Vec<(String, Arc<ExpansionMap>)>,
    events: Vec<TreeEvent>,
}

struct TreeState {
    branches: BTreeMap<NodePath, Branch>,
    next_generation: u64,
}

impl TreeState {
    fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    fn remove_descendants(&mut self, path: &NodePath) {
        let doomed: Vec<NodePath> = self
            .branches
            .range(path.clone()..)
            .take_while(|(p, _)| p.starts_with(path))
            .filter(|(p, _)| *p != path)
            .map(|(p, _)| p.clone())
            .collect();
        for p in doomed {
            self.branches.remove(&p);
        }
    }

    fn child_paths(&self, path: &NodePath) -> Vec<NodePath> {
        let Some(branch) = self.branches.get(path) else {
            return Vec::new();
        };
        branch
            .items
            .iter()
            .map(|item| path.child(item.local_key()))
            .filter(|p| self.branches.contains_key(p))
            .collect()
    }

    /// Hand `value` down from the branch at `path` to every loaded branch below it. `Some`
    /// sets each descendant's flag and rewrites the affected maps, `None` clears the
    /// annotations only.
    fn apply_cascade(&mut self, path: &NodePath, value: Option<bool>, fx: &mut Effects) {
        let Some(branch) = self.branches.get_mut(path) else {
            return;
        };
        branch.cascade = value;
        if branch.load != Load::Ready {
            return;
        }
        if let Some(v) = value {
            let next = branch
                .expansion
                .with_all(branch.items.iter().map(Node::local_key), v);
            branch.expansion = Arc::new(next);
            fx.maps.push((branch.scope.clone(), branch.expansion.clone()));
        }
        for child_path in self.child_paths(path) {
            if let (Some(v), Some(child)) = (value, self.branches.get_mut(&child_path)) {
                if child.expanded != v {
                    fx.events.push(TreeEvent::NodeToggled(child_path.clone(), v));
                }
                child.set_expanded(v);
            }
            self.apply_cascade(&child_path, value, fx);
        }
    }

    fn collect_rows(&self, path: &NodePath, rows: &mut Vec<TreeRow>) {
        let Some(branch) = self.branches.get(path) else {
            return;
        };
        if !branch.expanded {
            return;
        }
        for item in branch.items.iter() {
            let child_path = path.child(item.local_key());
            let child = self.branches.get(&child_path);
            rows.push(TreeRow {
                depth: path.depth(),
                node: item.clone(),
                has_children: child.is_some(),
                expanded: child.is_some_and(|c| c.expanded),
                path: child_path.clone(),
            });
            if child.is_some() {
                self.collect_rows(&child_path, rows);
            }
        }
    }
}

enum WriteOp {
    RootFlag(ExpansionKey, bool),
    Map(ExpansionKey, Arc<ExpansionMap>),
    Flush(oneshot::Sender<()>),
}

async fn run_writer<P: Persistence>(
    store: Arc<ExpansionStateStore<P>>,
    mut queue: mpsc::UnboundedReceiver<WriteOp>,
) {
    while let Some(op) = queue.recv().await {
        let result = match op {
            WriteOp::RootFlag(key, value) => store.write_root_flag(&key, value).await,
            WriteOp::Map(key, map) => store.write_map(&key, &map).await,
            WriteOp::Flush(done) => {
                let _ = done.send(());
                Ok(())
            }
        };
        if let Err(err) = result {
            tracing::warn!("Dropping expansion state write: {}", err);
        }
    }
}

pub struct TreeSynchronizer<Q, P> {
    resolver: Arc<ChildResolver<Q>>,
    store: Arc<ExpansionStateStore<P>>,
    scope: String,
    read_keys: Mutex<Option<ReadKeySet>>,
    state: Mutex<TreeState>,
    events: broadcast::Sender<TreeEvent>,
    writes: mpsc::UnboundedSender<WriteOp>,
}

impl<Q, P> TreeSynchronizer<Q, P>
where
    Q: GraphQuery + 'static,
    P: Persistence + 'static,
{
    /// Tree of the favorite `scope` with its already resolved top-level `items`. Starts
    /// collapsed; call [TreeSynchronizer::restore] to apply the persisted state.
    ///
    /// # Panics
    ///
    /// Spawns the background writer, so it must be called from within a tokio runtime.
    pub fn new(
        resolver: Arc<ChildResolver<Q>>,
        store: Arc<ExpansionStateStore<P>>,
        scope: &str,
        items: Arc<[Node]>,
    ) -> TreeSynchronizer<Q, P> {
        let (writes, queue) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(store.clone(), queue));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let mut branches = BTreeMap::new();
        branches.insert(
            NodePath::root(),
            Branch::new(scope.to_string(), items, false, None),
        );
        TreeSynchronizer {
            resolver,
            store,
            scope: scope.to_string(),
            read_keys: Mutex::new(None),
            state: Mutex::new(TreeState {
                branches,
                next_generation: 0,
            }),
            events,
            writes,
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Record every expansion key read from now on into `read_keys`.
    pub fn set_read_keys(&self, read_keys: Option<ReadKeySet>) {
        *self.read_keys.lock() = read_keys;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TreeEvent> {
        self.events.subscribe()
    }

    pub fn items(&self) -> Arc<[Node]> {
        self.state
            .lock()
            .branches
            .get(&NodePath::root())
            .map(|b| b.items.clone())
            .unwrap_or_else(|| Arc::from(Vec::new()))
    }

    pub fn is_root_expanded(&self) -> bool {
        self.node_state(&NodePath::root())
            .is_some_and(|s| s != NodeState::Collapsed)
    }

    /// State of the expandable node at `path`, `None` if there is none.
    pub fn node_state(&self, path: &NodePath) -> Option<NodeState> {
        let state = self.state.lock();
        let branch = state.branches.get(path)?;
        Some(match (branch.expanded, &branch.load) {
            (false, _) => NodeState::Collapsed,
            (true, Load::Ready) => NodeState::ExpandedReady,
            (true, _) => NodeState::ExpandedPending,
        })
    }

    /// Children of the node at `path`, once loaded.
    pub fn children(&self, path: &NodePath) -> Option<Arc<[Node]>> {
        let state = self.state.lock();
        let parent = path.parent()?;
        (state.branches.get(&parent)?.load == Load::Ready)
            .then(|| state.branches.get(path).map(|b| b.items.clone()))
            .flatten()
    }

    /// Visible rows, depth first.
    pub fn snapshot(&self) -> Vec<TreeRow> {
        let mut rows = Vec::new();
        self.state.lock().collect_rows(&NodePath::root(), &mut rows);
        rows
    }

    fn emit(&self, events: Vec<TreeEvent>) {
        for event in events {
            tracing::trace!("{} {}", event, event.path());
            // No receivers is fine.
            let _ = self.events.send(event);
        }
    }

    fn enqueue(&self, op: WriteOp) {
        if self.writes.send(op).is_err() {
            tracing::warn!("Expansion state writer for '{}' has stopped", self.scope);
        }
    }

    fn perform(&self, fx: Effects) {
        for (scope, map) in fx.maps {
            self.enqueue(WriteOp::Map(self.store.branch_key(&scope), map));
        }
        self.emit(fx.events);
    }

    /// Wait until every write queued so far has been applied.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        self.enqueue(WriteOp::Flush(done));
        let _ = wait.await;
    }

    /// Apply the persisted root flag and load whatever it shows.
    #[tracing::instrument(skip(self), fields(scope = %self.scope))]
    pub async fn restore(&self) -> LoadOutcome {
        let read_keys = self.read_keys.lock().clone();
        let expanded = self
            .store
            .read_root_flag(&self.store.root_key(&self.scope), read_keys.as_ref())
            .await;
        {
            let mut state = self.state.lock();
            if let Some(root) = state.branches.get_mut(&NodePath::root()) {
                root.set_expanded(expanded);
            }
        }
        self.emit(vec![TreeEvent::RootToggled(expanded)]);
        self.ensure_children_loaded(&NodePath::root()).await
    }

    /// Flip the favorite's own flag and persist it. With `cascade` the new value is also handed
    /// to every loaded node below. Children are not resolved here.
    pub fn toggle_root(&self, cascade: bool) -> bool {
        let root = NodePath::root();
        let mut fx = Effects::default();
        let expanded = {
            let mut state = self.state.lock();
            let Some(branch) = state.branches.get_mut(&root) else {
                return false;
            };
            let expanded = !branch.expanded;
            branch.set_expanded(expanded);
            state.apply_cascade(&root, cascade.then_some(expanded), &mut fx);
            expanded
        };
        self.enqueue(WriteOp::RootFlag(self.store.root_key(&self.scope), expanded));
        fx.events.insert(0, TreeEvent::RootToggled(expanded));
        self.perform(fx);
        expanded
    }

    /// Flip the flag of the node at `path`. With `cascade` every loaded descendant takes the
    /// same value; without it only this node changes and any cascade it handed down is
    /// cleared.
    pub fn toggle_node(&self, path: &NodePath, cascade: bool) -> Result<bool, FavTreeError> {
        let Some(parent_path) = path.parent() else {
            return Ok(self.toggle_root(cascade));
        };
        let key = path.last().unwrap_or_default().to_string();
        let mut fx = Effects::default();
        let expanded = {
            let mut state = self.state.lock();
            let Some(branch) = state.branches.get_mut(path) else {
                return Err(FavTreeError::NotFound(format!(
                    "no expandable node at {path} in '{}'",
                    self.scope
                )));
            };
            let expanded = !branch.expanded;
            branch.set_expanded(expanded);
            if let Some(parent) = state.branches.get_mut(&parent_path) {
                parent.expansion = Arc::new(parent.expansion.with(&key, expanded));
                fx.maps.push((parent.scope.clone(), parent.expansion.clone()));
            }
            fx.events.push(TreeEvent::NodeToggled(path.clone(), expanded));
            state.apply_cascade(path, cascade.then_some(expanded), &mut fx);
            expanded
        };
        self.perform(fx);
        Ok(expanded)
    }

    /// Children of one item: pre-computed for filter groups, resolved for pages. Resolution
    /// failures render as no children.
    async fn children_of(&self, item: &Node) -> Arc<[Node]> {
        match &item.kind {
            NodeKind::FilterGroup(filter) => filter.subgroups.clone(),
            NodeKind::PageRef(record) => match self.resolver.resolve_children(&record.name).await {
                Ok(children) => Arc::from(children),
                Err(err) => {
                    tracing::warn!(
                        "Showing '{}' without children, resolution failed: {}",
                        record.original_name,
                        err
                    );
                    Arc::from(Vec::new())
                }
            },
        }
    }

    /// Load the branch at `path` if it is expanded and not loaded or loading, then the expanded
    /// branches below it. Sibling loads run concurrently.
    pub fn ensure_children_loaded<'a>(&'a self, path: &'a NodePath) -> BoxFuture<'a, LoadOutcome> {
        async move {
            let started = {
                let mut state = self.state.lock();
                let generation = state.next_generation();
                let Some(branch) = state.branches.get_mut(path) else {
                    return LoadOutcome::Unknown;
                };
                if !branch.expanded {
                    return LoadOutcome::Collapsed;
                }
                match branch.load {
                    Load::Pending(_) => return LoadOutcome::InFlight,
                    Load::Ready => None,
                    Load::Idle => {
                        branch.load = Load::Pending(generation);
                        Some((generation, branch.items.clone(), branch.scope.clone()))
                    }
                }
            };

            let outcome = match started {
                None => LoadOutcome::AlreadyLoaded,
                Some((generation, items, scope)) => {
                    match self.finish_load(path, generation, items, scope).await {
                        Some(outcome) => outcome,
                        None => return LoadOutcome::Stale,
                    }
                }
            };

            if path.depth() < MAX_AUTO_DEPTH {
                let expanded: Vec<NodePath> = {
                    let state = self.state.lock();
                    state
                        .child_paths(path)
                        .into_iter()
                        .filter(|p| state.branches.get(p).is_some_and(|b| b.expanded))
                        .collect()
                };
                join_all(expanded.iter().map(|p| self.ensure_children_loaded(p))).await;
            } else {
                tracing::warn!(
                    "Not loading below {} in '{}': depth limit reached",
                    path,
                    self.scope
                );
            }
            outcome
        }
        .boxed()
    }

    async fn finish_load(
        &self,
        path: &NodePath,
        generation: u64,
        items: Arc<[Node]>,
        scope: String,
    ) -> Option<LoadOutcome> {
        let read_keys = self.read_keys.lock().clone();
        let stored = self
            .store
            .read_map(&self.store.branch_key(&scope), read_keys.as_ref())
            .await;
        let resolved: Vec<Arc<[Node]>> =
            join_all(items.iter().map(|item| self.children_of(item))).await;

        let mut fx = Effects::default();
        {
            let mut state = self.state.lock();
            let branch = state.branches.get_mut(path)?;
            if branch.load != Load::Pending(generation) {
                tracing::debug!("Dropping stale children of {} in '{}'", path, self.scope);
                return None;
            }
            let cascade = branch.cascade;
            branch.load = Load::Ready;
            // Children kept from an earlier load win over the stored map.
            let previous: Vec<(String, bool)> = state
                .child_paths(path)
                .into_iter()
                .filter_map(|p| {
                    let expanded = state.branches.get(&p)?.expanded;
                    Some((p.last()?.to_string(), expanded))
                })
                .collect();
            let expansion = match cascade {
                Some(v) => {
                    let next = stored.with_all(items.iter().map(Node::local_key), v);
                    fx.maps.push((scope.clone(), Arc::new(next.clone())));
                    next
                }
                None => previous
                    .iter()
                    .fold(stored, |map, (key, expanded)| map.with(key, *expanded)),
            };
            if let Some(branch) = state.branches.get_mut(path) {
                branch.expansion = Arc::new(expansion.clone());
            }

            state.remove_descendants(path);
            for (item, children) in items.iter().zip(resolved) {
                if children.is_empty() {
                    continue;
                }
                let child_path = path.child(item.local_key());
                if state.branches.contains_key(&child_path) {
                    tracing::debug!("Duplicate key {} in '{}'", child_path, self.scope);
                    continue;
                }
                let child = Branch::new(
                    child_scope(&scope, &item.display_label),
                    children,
                    expansion.get(item.local_key()),
                    cascade,
                );
                state.branches.insert(child_path, child);
            }
        }
        fx.events.push(TreeEvent::ChildrenReady(path.clone()));
        self.perform(fx);
        Some(LoadOutcome::Loaded)
    }

    /// Replace the favorite's top-level items after a new resolution pass. An identical list
    /// (same allocation) keeps everything; a different one discards all loaded children and
    /// reloads if the favorite is expanded.
    pub async fn replace_items(&self, items: Arc<[Node]>) -> LoadOutcome {
        let root = NodePath::root();
        {
            let mut state = self.state.lock();
            let Some(branch) = state.branches.get_mut(&root) else {
                return LoadOutcome::Unknown;
            };
            if Arc::ptr_eq(&branch.items, &items) {
                return LoadOutcome::AlreadyLoaded;
            }
            branch.items = items;
            branch.load = Load::Idle;
            branch.expansion = Arc::new(ExpansionMap::default());
            state.remove_descendants(&root);
        }
        self.emit(vec![TreeEvent::ItemsReplaced]);
        self.ensure_children_loaded(&root).await
    }

    /// Re-resolve the whole tree after the graph may have changed. New top-level `items` go
    /// through [TreeSynchronizer::replace_items]; an equal list keeps its allocation and every
    /// loaded branch is reloaded in place. Expansion flags are kept either way.
    #[tracing::instrument(skip(self, items), fields(scope = %self.scope))]
    pub async fn refresh(&self, items: Arc<[Node]>) -> LoadOutcome {
        // Reloads read the stored maps.
        self.flush().await;
        if *self.items() != *items {
            return self.replace_items(items).await;
        }
        {
            let mut state = self.state.lock();
            for branch in state.branches.values_mut() {
                branch.load = Load::Idle;
            }
        }
        self.ensure_children_loaded(&NodePath::root()).await
    }
}
