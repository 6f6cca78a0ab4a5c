//! Node directory entries and routing selectors.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use fleetwire_core::node::NodeId;

/// Directory entry for one fleet member, updated by the adapter as
/// membership and health change. The fabric reads these for routing
/// decisions ("least-loaded node in group") and never writes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub node: NodeId,
    pub online: bool,
    #[serde(default)]
    pub player_count: u32,
    #[serde(default)]
    pub session_count: u32,
    #[serde(default)]
    pub groups: Vec<String>,
    /// Round-trip latency to the node, if the adapter measures it.
    #[serde(default)]
    pub rtt_ms: Option<u64>,
}

impl ServerInfo {
    /// Fresh online entry with no load.
    pub fn online(node: NodeId) -> Self {
        Self {
            node,
            online: true,
            player_count: 0,
            session_count: 0,
            groups: Vec::new(),
            rtt_ms: None,
        }
    }

    pub fn in_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }
}

/// Closed set of node-targeting rules.
///
/// A fixed enum instead of an open-ended callable: `ByName` and `ByGroup`
/// cover the routing intents that get serialized or logged, `ByPredicate`
/// remains for in-process policies that need the full entry.
#[derive(Clone)]
pub enum NodeSelector {
    ByName(NodeId),
    ByGroup(String),
    ByPredicate(Arc<dyn Fn(&ServerInfo) -> bool + Send + Sync>),
}

impl NodeSelector {
    pub fn matches(&self, info: &ServerInfo) -> bool {
        match self {
            NodeSelector::ByName(node) => info.node == *node,
            NodeSelector::ByGroup(group) => info.in_group(group),
            NodeSelector::ByPredicate(pred) => pred(info),
        }
    }

    /// All online nodes matching the selector.
    pub fn select(&self, servers: &[ServerInfo]) -> Vec<NodeId> {
        servers
            .iter()
            .filter(|s| s.online && self.matches(s))
            .map(|s| s.node.clone())
            .collect()
    }

    /// Online matching node with the fewest players.
    pub fn least_loaded(&self, servers: &[ServerInfo]) -> Option<NodeId> {
        servers
            .iter()
            .filter(|s| s.online && self.matches(s))
            .min_by_key(|s| s.player_count)
            .map(|s| s.node.clone())
    }
}

impl fmt::Debug for NodeSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeSelector::ByName(node) => f.debug_tuple("ByName").field(node).finish(),
            NodeSelector::ByGroup(group) => f.debug_tuple("ByGroup").field(group).finish(),
            NodeSelector::ByPredicate(_) => f.write_str("ByPredicate(..)"),
        }
    }
}
