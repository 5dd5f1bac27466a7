//! Error kinds recorded against nodes and the per-graph error map.
//!
//! Errors are raised during creation, mutation, schema load or prepare,
//! never during steady-state processing. They land in the [`ErrorMap`]
//! keyed by node id; the render path never sees them and a node in
//! error state behaves as a passthrough.

use parking_lot::Mutex;
use thiserror::Error;

/// Obsolete persisted-graph constructs detected by the migration pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeprecationKind {
    /// A connection still carried the legacy `op_type` field.
    OpTypeNonSet,
    /// A connection carried a non-identity value converter.
    ConverterNotIdentity,
}

impl DeprecationKind {
    pub fn message(&self) -> &'static str {
        match self {
            DeprecationKind::OpTypeNonSet => {
                "legacy connection op type; set the combine mode on the target parameter"
            }
            DeprecationKind::ConverterNotIdentity => {
                "legacy value converter; use a connection range instead"
            }
        }
    }
}

/// Everything that can go wrong with a node without tearing the graph
/// down.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NodeError {
    #[error("channel amount mismatch: {actual} (expected {expected})")]
    ChannelMismatch { expected: usize, actual: usize },
    #[error("block size mismatch: {actual} (expected {expected})")]
    BlockSizeMismatch { expected: usize, actual: usize },
    #[error("sample rate mismatch: {actual} (expected {expected})")]
    SampleRateMismatch { expected: f64, actual: f64 },
    #[error("initialisation error: {0}")]
    InitialisationError(String),
    #[error("number of child nodes ({children}) exceeds channels ({channels})")]
    TooManyChildNodes { channels: usize, children: usize },
    #[error("number of parameters ({actual}) exceeds limit ({limit})")]
    TooManyParameters { limit: usize, actual: usize },
    #[error("can't find a suitable parent node")]
    NoMatchingParent,
    #[error("modulation buffer already has a writer")]
    RingBufferMultipleWriters,
    #[error("deprecated node state: {}", .0.message())]
    DeprecatedNode(DeprecationKind),
    #[error("can't use this node in a polyphonic graph")]
    IllegalPolyphony,
    #[error("bypass gates can't target a container that re-prepares its children")]
    IllegalBypassConnection,
    #[error("unscaled modulation range mismatch; copy the target range to the source")]
    UnscaledModRangeMismatch,
}

impl NodeError {
    /// Sticky errors survive a generic clear and must be removed by
    /// their own kind.
    fn is_sticky(&self) -> bool {
        matches!(
            self,
            NodeError::DeprecatedNode(_) | NodeError::IllegalBypassConnection
        )
    }

    fn same_kind(&self, other: &NodeError) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

#[derive(Debug, Clone)]
struct ErrorEntry {
    node_id: String,
    error: NodeError,
}

/// Map from node id to its most recent error.
///
/// One entry per node; recording a new error replaces the old one.
#[derive(Debug, Default)]
pub struct ErrorMap {
    entries: Mutex<Vec<ErrorEntry>>,
}

impl ErrorMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, node_id: &str, error: NodeError) {
        tracing::warn!(node = node_id, %error, "node error recorded");
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.iter_mut().find(|e| e.node_id == node_id) {
            entry.error = error;
        } else {
            entries.push(ErrorEntry {
                node_id: node_id.to_owned(),
                error,
            });
        }
    }

    /// Clears errors for `node_id` (or all nodes when `None`). Without
    /// a kind filter, sticky entries are kept; pass the kind explicitly
    /// to remove those.
    pub fn remove(&self, node_id: Option<&str>, kind: Option<&NodeError>) {
        let mut entries = self.entries.lock();
        entries.retain(|entry| {
            if let Some(id) = node_id {
                if entry.node_id != id {
                    return true;
                }
            }
            match kind {
                Some(k) => !entry.error.same_kind(k),
                None => entry.error.is_sticky(),
            }
        });
    }

    pub fn rename_node(&self, old_id: &str, new_id: &str) {
        let mut entries = self.entries.lock();
        for entry in entries.iter_mut() {
            if entry.node_id == old_id {
                entry.node_id = new_id.to_owned();
            }
        }
    }

    pub fn get(&self, node_id: &str) -> Option<NodeError> {
        self.entries
            .lock()
            .iter()
            .find(|e| e.node_id == node_id)
            .map(|e| e.error.clone())
    }

    pub fn is_ok(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn snapshot(&self) -> Vec<(String, NodeError)> {
        self.entries
            .lock()
            .iter()
            .map(|e| (e.node_id.clone(), e.error.clone()))
            .collect()
    }
}

/// Result payload of [`crate::NodeGraph::validate`].
#[derive(Debug, Clone, Error)]
#[error("{} node(s) in error state", failures.len())]
pub struct ValidationReport {
    pub failures: Vec<(String, NodeError)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_entry_per_node() {
        let map = ErrorMap::new();
        map.add(
            "osc1",
            NodeError::ChannelMismatch {
                expected: 2,
                actual: 1,
            },
        );
        map.add("osc1", NodeError::NoMatchingParent);
        assert_eq!(map.snapshot().len(), 1);
        assert_eq!(map.get("osc1"), Some(NodeError::NoMatchingParent));
    }

    #[test]
    fn generic_clear_keeps_sticky_entries() {
        let map = ErrorMap::new();
        map.add("a", NodeError::NoMatchingParent);
        map.add("b", NodeError::IllegalBypassConnection);
        map.add("c", NodeError::DeprecatedNode(DeprecationKind::OpTypeNonSet));

        map.remove(None, None);
        let left = map.snapshot();
        assert_eq!(left.len(), 2);
        assert!(map.get("a").is_none());

        map.remove(Some("b"), Some(&NodeError::IllegalBypassConnection));
        assert!(map.get("b").is_none());
        assert!(map.get("c").is_some());
    }

    #[test]
    fn rename_follows_the_node() {
        let map = ErrorMap::new();
        map.add("old", NodeError::IllegalPolyphony);
        map.rename_node("old", "new");
        assert!(map.get("old").is_none());
        assert_eq!(map.get("new"), Some(NodeError::IllegalPolyphony));
    }
}
