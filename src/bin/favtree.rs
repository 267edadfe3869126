//! favtree CLI tool
//!
//! Inspect favorites trees outside the host.
//!
//! ## Commands
//!
//! - `parse <text>`: Parse quick-filter notation and print the group tree
//! - `tree <snapshot> <favorite>`: Print a favorite's tree from a graph snapshot
//! - `gc <snapshot> <state>`: Remove expansion state no favorite uses anymore

use clap::{Parser, Subcommand};
use favtree_core::{
    config::{Settings, SettingsProvider, TomlSettingsProvider},
    favorites::{slot_id, FavoritesForest},
    filters::{self, FilterGroup},
    properties::NodeIcon,
    query::{ChildResolver, ResolveOptions},
    snapshot::GraphSnapshot,
    storage::{DirStorage, ExpansionStateStore, MemoryStorage, Persistence},
    FavTreeError,
};
use std::{path::PathBuf, sync::Arc};

#[derive(Parser)]
#[command(name = "favtree")]
#[command(author, version, about = "Inspect hierarchical favorites trees", long_about = None)]
struct Cli {
    /// Settings file (TOML); defaults apply when absent
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Sorting locale used when the settings leave it empty
    #[arg(long, global = true)]
    language: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse quick-filter text and print the resulting groups
    Parse {
        text: String,
    },

    /// Print the tree of a favorite
    Tree {
        /// Graph snapshot (JSON, or TOML with a .toml extension)
        snapshot: PathBuf,

        /// Favorite page name
        favorite: String,

        /// Directory holding persisted expansion state
        #[arg(short, long)]
        state: Option<PathBuf>,

        /// Graph identity the state is scoped to
        #[arg(short, long, default_value = "default")]
        graph: String,

        /// Expand every node, like a cascading toggle on the favorite
        #[arg(short, long)]
        expand_all: bool,
    },

    /// Garbage-collect expansion state
    Gc {
        /// Graph snapshot (JSON, or TOML with a .toml extension)
        snapshot: PathBuf,

        /// Directory holding persisted expansion state
        state: PathBuf,

        /// Favorites still in use
        #[arg(short, long, value_delimiter = ',')]
        favorites: Vec<String>,

        /// Graph identity the state is scoped to
        #[arg(short, long, default_value = "default")]
        graph: String,
    },
}

fn print_groups(groups: &[FilterGroup], depth: usize) {
    for group in groups {
        match group.fixed_order {
            Some(order) => println!("{}{} ({})", "  ".repeat(depth), group.name(), order),
            None => println!("{}{}", "  ".repeat(depth), group.name()),
        }
        print_groups(&group.subgroups, depth + 1);
    }
}

async fn print_tree<P: Persistence + 'static>(
    graph: GraphSnapshot,
    storage: P,
    graph_id: String,
    favorite: &str,
    settings: Settings,
    language: Option<&str>,
    expand_all: bool,
) -> Result<(), FavTreeError> {
    let resolver = ChildResolver::new(graph, ResolveOptions::from_settings(&settings, language));
    let store = ExpansionStateStore::new(storage, graph_id);
    let forest = FavoritesForest::new(Arc::new(resolver), Arc::new(store), settings);
    let trees = forest.process(&[favorite.to_string()], None).await;
    let tree = trees
        .first()
        .ok_or_else(|| FavTreeError::NotFound(favorite.to_string()))?;
    if expand_all {
        if tree.is_root_expanded() {
            tree.toggle_root(false);
        }
        tree.toggle_root(true);
        tree.ensure_children_loaded(&Default::default()).await;
    }

    let marker = if tree.is_root_expanded() { "▾" } else { "▸" };
    println!("{marker} {favorite}  [{}]", slot_id(favorite));
    for row in tree.snapshot() {
        let arrow = match (row.has_children, row.expanded) {
            (false, _) => " ",
            (true, true) => "▾",
            (true, false) => "▸",
        };
        let icon = match row.node.icon(forest.settings()) {
            NodeIcon::Filter(icon) | NodeIcon::Custom(icon) => format!("{icon} "),
            NodeIcon::Page => String::new(),
        };
        println!(
            "{}{arrow} {icon}{}",
            "  ".repeat(row.depth + 1),
            row.node.visible_label()
        );
    }
    forest.flush().await;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let settings = match &cli.config {
        Some(path) => TomlSettingsProvider::new(path.clone()).get_settings()?,
        None => Settings::default(),
    };
    let language = cli.language.as_deref();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    match cli.command {
        Commands::Parse { text } => {
            let groups = filters::parse(&text);
            if groups.is_empty() {
                println!("No quick filters found");
            } else {
                print_groups(&groups, 0);
                println!("\nNormalized: {}", filters::serialize(&groups));
            }
        }

        Commands::Tree {
            snapshot,
            favorite,
            state,
            graph,
            expand_all,
        } => {
            let snapshot = GraphSnapshot::load(&snapshot)?;
            runtime.block_on(async {
                match state {
                    Some(dir) => {
                        print_tree(
                            snapshot,
                            DirStorage::new(dir)?,
                            graph,
                            &favorite,
                            settings,
                            language,
                            expand_all,
                        )
                        .await
                    }
                    None => {
                        print_tree(
                            snapshot,
                            MemoryStorage::default(),
                            graph,
                            &favorite,
                            settings,
                            language,
                            expand_all,
                        )
                        .await
                    }
                }
            })?;
        }

        Commands::Gc {
            snapshot,
            state,
            favorites,
            graph,
        } => {
            let snapshot = GraphSnapshot::load(&snapshot)?;
            let removed = runtime.block_on(async {
                let resolver =
                    ChildResolver::new(snapshot, ResolveOptions::from_settings(&settings, language));
                let store = ExpansionStateStore::new(DirStorage::new(state)?, graph);
                let forest = FavoritesForest::new(Arc::new(resolver), Arc::new(store), settings);
                forest.startup(&favorites).await
            })?;
            println!("Removed {} key(s)", removed.len());
            for key in removed {
                println!("  {key}");
            }
        }
    }

    Ok(())
}
