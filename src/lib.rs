//! # favtree-core
//!
//! Hierarchical favorites for a note-taking host: every favorited page becomes the root of a
//! lazily expanded tree whose expand/collapse state survives restarts.
//!
//! ## Overview
//!
//! The children of a page come from three places in the host graph: its namespace children
//! (`Projects/Launch` below `Projects`), the pages associated with it through a hierarchy
//! property (`tags` by default), and quick filters, virtual groups declared on the page in a
//! compact notation such as `2 [[Work]], [[Work]] [[Draft]], [[Personal]]`. The resolved list
//! puts explicitly ordered entries first and sorts the rest with a locale-aware collator.
//!
//! Expansion state is stored per favorite and per graph in a string-valued key/value store. A
//! favorite's own flag lives under `expansion-_<favorite>-<graph>`, the flags of a node's
//! children under `expansion-<scope>-<graph>`. A startup pass records every key it reads and
//! garbage-collects the rest.
//!
//! ## Architecture
//!
//! - **[`filters`]**: quick-filter notation (parse, serialize, materialize into nodes)
//! - **[`query`]**: the [`query::GraphQuery`] seam and [`query::ChildResolver`]
//! - **[`storage`]**: the [`storage::Persistence`] seam, key layout and
//!   [`storage::ExpansionStateStore`]
//! - **[`tree`]**: [`tree::TreeSynchronizer`], the per-favorite tree state machine
//! - **[`favorites`]**: [`favorites::FavoritesForest`], one tree per favorite plus startup GC
//! - **[`activation`]**: click routing and quick-filter write-back
//! - **[`snapshot`]**: an in-memory graph loaded from JSON or TOML
//! - **[`config`]**, **[`collation`]**, **[`properties`]**, **[`event`]**: supporting types
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use favtree_core::{
//!     config::Settings,
//!     favorites::FavoritesForest,
//!     query::{ChildResolver, ResolveOptions},
//!     snapshot::GraphSnapshot,
//!     storage::{DirStorage, ExpansionStateStore},
//! };
//!
//! # async fn run() -> Result<(), favtree_core::FavTreeError> {
//! let settings = Settings::default();
//! let graph = GraphSnapshot::load("graph.toml")?;
//! let resolver = ChildResolver::new(graph, ResolveOptions::from_settings(&settings, None));
//! let store = ExpansionStateStore::new(DirStorage::new("state".into())?, "my-graph");
//! let forest = FavoritesForest::new(Arc::new(resolver), Arc::new(store), settings);
//! forest.startup(&["Projects".to_string()]).await?;
//! # Ok(())
//! # }
//! ```

pub mod activation;
pub mod collation;
pub mod config;
pub mod error;
pub mod event;
pub mod favorites;
pub mod filters;
pub mod properties;
pub mod query;
pub mod snapshot;
pub mod storage;
#[cfg(test)]
mod tests;
pub mod tree;

pub use error::*;
