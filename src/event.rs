use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::properties::NodePath;

/// Notifications emitted by a [crate::tree::TreeSynchronizer] so renderers know what to redraw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TreeEvent {
    /// The favorite's own expansion flag changed.
    RootToggled(bool),
    /// A node's expansion flag changed. Cascading toggles emit one event per affected node.
    NodeToggled(NodePath, bool),
    /// Children of the node at this path were resolved and can be rendered.
    ChildrenReady(NodePath),
    /// A new resolution pass replaced the favorite's top-level items.
    ItemsReplaced,
}

impl TreeEvent {
    /// Path of the node this event concerns; the favorite itself is the root path.
    pub fn path(&self) -> NodePath {
        match self {
            TreeEvent::RootToggled(_) | TreeEvent::ItemsReplaced => NodePath::root(),
            TreeEvent::NodeToggled(path, _) | TreeEvent::ChildrenReady(path) => path.clone(),
        }
    }
}

impl Display for TreeEvent {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            TreeEvent::RootToggled(_) => write!(f, "RootToggled"),
            TreeEvent::NodeToggled(_, _) => write!(f, "NodeToggled"),
            TreeEvent::ChildrenReady(_) => write!(f, "ChildrenReady"),
            TreeEvent::ItemsReplaced => write!(f, "ItemsReplaced"),
        }
    }
}
