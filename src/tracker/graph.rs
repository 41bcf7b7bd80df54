use std::collections::{HashMap, HashSet};

use crate::types::ShardDescriptor;

/// Tracker-side state of a shard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Waiting for its parents
    Pending,
    /// A poller owns the shard
    Running,
    Exhausted,
    Failed,
    /// Not tracked under `LATEST` because it was closed when discovered
    Ignored,
}

impl NodeState {
    fn is_terminal(&self) -> bool {
        matches!(
            self,
            NodeState::Exhausted | NodeState::Failed | NodeState::Ignored
        )
    }
}

#[derive(Debug, Clone)]
pub struct ShardNode {
    pub descriptor: ShardDescriptor,
    pub state: NodeState,
}

/// Outcome of merging one listing into the graph
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ListingDelta {
    /// Newly tracked shards, sorted
    pub discovered: Vec<String>,
    /// Shards closed at discovery that will never be read, sorted
    pub ignored: Vec<String>,
    /// Terminal shards dropped because the stream no longer lists them, sorted
    pub pruned: Vec<String>,
}

/// Arena of every known shard keyed by shard id.
///
/// Parent links are plain ids, so shards can appear and disappear between
/// listings without dangling references.
#[derive(Debug)]
pub struct ShardGraph {
    nodes: HashMap<String, ShardNode>,
    follow_lineage: bool,
}

impl ShardGraph {
    /// `follow_lineage` is true for iterator types that replay history; then
    /// children wait for their parents and closed shards are still read.
    pub fn new(follow_lineage: bool) -> Self {
        Self {
            nodes: HashMap::new(),
            follow_lineage,
        }
    }

    pub fn merge_listing(&mut self, listing: Vec<ShardDescriptor>) -> ListingDelta {
        let mut delta = ListingDelta::default();
        let listed: HashSet<String> = listing.iter().map(|s| s.shard_id.clone()).collect();

        for descriptor in listing {
            match self.nodes.get_mut(&descriptor.shard_id) {
                Some(node) => node.descriptor = descriptor,
                None => {
                    let state = if !self.follow_lineage && descriptor.closed {
                        delta.ignored.push(descriptor.shard_id.clone());
                        NodeState::Ignored
                    } else {
                        delta.discovered.push(descriptor.shard_id.clone());
                        NodeState::Pending
                    };
                    self.nodes
                        .insert(descriptor.shard_id.clone(), ShardNode { descriptor, state });
                }
            }
        }

        self.nodes.retain(|id, node| {
            let keep = listed.contains(id) || !node.state.is_terminal();
            if !keep {
                delta.pruned.push(id.clone());
            }
            keep
        });

        delta.discovered.sort();
        delta.ignored.sort();
        delta.pruned.sort();
        delta
    }

    /// Pending shards allowed to start now, sorted by id
    pub fn ready(&self) -> Vec<String> {
        let mut ready: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.state == NodeState::Pending)
            .filter(|(_, node)| !self.follow_lineage || self.parents_drained(&node.descriptor))
            .map(|(id, _)| id.clone())
            .collect();
        ready.sort();
        ready
    }

    /// A parent missing from the graph has been trimmed away, so there is
    /// nothing left to wait for.
    fn parents_drained(&self, descriptor: &ShardDescriptor) -> bool {
        descriptor.parent_ids.iter().all(|parent| {
            self.nodes
                .get(parent)
                .map_or(true, |node| node.state == NodeState::Exhausted)
        })
    }

    /// Pending shards held back by a failed ancestor, sorted
    pub fn blocked_by_failure(&self) -> Vec<String> {
        let mut blocked: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.state == NodeState::Pending)
            .filter(|(_, node)| {
                node.descriptor.parent_ids.iter().any(|parent| {
                    self.nodes
                        .get(parent)
                        .is_some_and(|p| p.state == NodeState::Failed)
                })
            })
            .map(|(id, _)| id.clone())
            .collect();
        blocked.sort();
        blocked
    }

    pub fn set_state(&mut self, shard_id: &str, state: NodeState) {
        if let Some(node) = self.nodes.get_mut(shard_id) {
            node.state = state;
        }
    }

    pub fn state(&self, shard_id: &str) -> Option<NodeState> {
        self.nodes.get(shard_id).map(|node| node.state)
    }

    pub fn node(&self, shard_id: &str) -> Option<&ShardNode> {
        self.nodes.get(shard_id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn split_topology() -> Vec<ShardDescriptor> {
        vec![
            ShardDescriptor::open("parent").closed(),
            ShardDescriptor::open("child-a").with_parent("parent"),
            ShardDescriptor::open("child-b").with_parent("parent"),
        ]
    }

    #[test]
    fn test_lineage_children_wait_for_parent() {
        let mut graph = ShardGraph::new(true);
        let delta = graph.merge_listing(split_topology());
        assert_eq!(delta.discovered, vec!["child-a", "child-b", "parent"]);
        assert!(delta.ignored.is_empty());

        assert_eq!(graph.ready(), vec!["parent"]);
        graph.set_state("parent", NodeState::Running);
        assert!(graph.ready().is_empty());

        graph.set_state("parent", NodeState::Exhausted);
        assert_eq!(graph.ready(), vec!["child-a", "child-b"]);
    }

    #[test]
    fn test_merge_needs_both_parents() {
        let mut graph = ShardGraph::new(true);
        graph.merge_listing(vec![
            ShardDescriptor::open("left").closed(),
            ShardDescriptor::open("right").closed(),
            ShardDescriptor::open("merged")
                .with_parent("left")
                .with_parent("right"),
        ]);
        graph.set_state("left", NodeState::Exhausted);
        graph.set_state("right", NodeState::Running);
        assert!(!graph.ready().contains(&"merged".to_string()));

        graph.set_state("right", NodeState::Exhausted);
        assert_eq!(graph.ready(), vec!["merged"]);
    }

    #[test]
    fn test_missing_parent_does_not_block() {
        let mut graph = ShardGraph::new(true);
        graph.merge_listing(vec![ShardDescriptor::open("orphan").with_parent("trimmed")]);
        assert_eq!(graph.ready(), vec!["orphan"]);
    }

    #[test]
    fn test_failed_parent_blocks_children() {
        let mut graph = ShardGraph::new(true);
        graph.merge_listing(split_topology());
        graph.set_state("parent", NodeState::Failed);
        assert!(graph.ready().is_empty());
        assert_eq!(graph.blocked_by_failure(), vec!["child-a", "child-b"]);
    }

    #[test]
    fn test_latest_ignores_closed_shards_and_lineage() {
        let mut graph = ShardGraph::new(false);
        let delta = graph.merge_listing(split_topology());
        assert_eq!(delta.discovered, vec!["child-a", "child-b"]);
        assert_eq!(delta.ignored, vec!["parent"]);
        assert_eq!(graph.state("parent"), Some(NodeState::Ignored));
        assert_eq!(graph.ready(), vec!["child-a", "child-b"]);
    }

    #[test]
    fn test_latest_child_of_running_parent_starts_immediately() {
        let mut graph = ShardGraph::new(false);
        graph.merge_listing(vec![ShardDescriptor::open("parent")]);
        graph.set_state("parent", NodeState::Running);

        let delta = graph.merge_listing(vec![
            ShardDescriptor::open("parent").closed(),
            ShardDescriptor::open("child").with_parent("parent"),
        ]);
        assert_eq!(delta.discovered, vec!["child"]);
        assert_eq!(graph.ready(), vec!["child"]);
        assert!(graph.node("parent").unwrap().descriptor.closed);
        assert_eq!(graph.state("parent"), Some(NodeState::Running));
    }

    #[test]
    fn test_terminal_shards_are_pruned_when_unlisted() {
        let mut graph = ShardGraph::new(true);
        graph.merge_listing(split_topology());
        graph.set_state("parent", NodeState::Exhausted);
        graph.set_state("child-a", NodeState::Running);

        let delta = graph.merge_listing(vec![ShardDescriptor::open("child-b").with_parent("parent")]);
        assert_eq!(delta.pruned, vec!["parent"]);
        assert!(delta.discovered.is_empty());
        // running shards stay even when the listing skips them
        assert_eq!(graph.state("child-a"), Some(NodeState::Running));
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.ready(), vec!["child-b"]);
    }
}
