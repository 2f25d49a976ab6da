// src/dag/graph.rs

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::GraphError;

/// Handle used to address a node. Payloads live in a side table keyed by it.
pub type NodeKey = String;

/// The three backing maps, always guarded together.
#[derive(Debug)]
struct GraphMaps<NI, EI> {
    /// Node payloads; also the authoritative set of nodes.
    nodes: BTreeMap<NodeKey, NI>,
    /// from -> (to -> edge payload)
    edges: BTreeMap<NodeKey, BTreeMap<NodeKey, EI>>,
    /// to -> (from -> edge payload)
    reverse_edges: BTreeMap<NodeKey, BTreeMap<NodeKey, EI>>,
}

impl<NI, EI> Default for GraphMaps<NI, EI> {
    fn default() -> Self {
        Self {
            nodes: BTreeMap::new(),
            edges: BTreeMap::new(),
            reverse_edges: BTreeMap::new(),
        }
    }
}

impl<NI, EI> GraphMaps<NI, EI> {
    fn indegree(&self, node: &str) -> usize {
        self.reverse_edges.get(node).map_or(0, |m| m.len())
    }

    fn outdegree(&self, node: &str) -> usize {
        self.edges.get(node).map_or(0, |m| m.len())
    }

    /// Breadth-first walk from `to` looking for `from`.
    ///
    /// Bounded by the node count so a malformed adjacency map can never make
    /// this loop forever.
    fn reaches(&self, to: &str, from: &str) -> bool {
        let limit = self.nodes.len();
        let mut queue: VecDeque<&str> = VecDeque::from([to]);
        let mut visited: HashSet<&str> = HashSet::new();
        let mut steps = 0usize;

        while let Some(current) = queue.pop_front() {
            if current == from {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            steps += 1;
            if steps > limit {
                break;
            }
            if let Some(next) = self.edges.get(current) {
                queue.extend(next.keys().map(|k| k.as_str()));
            }
        }

        false
    }

    /// Kahn's algorithm. Returns the sorted prefix and whether every node
    /// was consumed.
    fn kahn(&self) -> (Vec<NodeKey>, bool) {
        let mut indegree: HashMap<&str, usize> = self
            .nodes
            .keys()
            .map(|k| (k.as_str(), self.indegree(k)))
            .collect();

        let mut queue: VecDeque<&str> = self
            .nodes
            .keys()
            .map(|k| k.as_str())
            .filter(|k| indegree.get(k).copied() == Some(0))
            .collect();

        let mut sorted = Vec::with_capacity(self.nodes.len());

        while let Some(node) = queue.pop_front() {
            sorted.push(node.to_string());

            if let Some(next) = self.edges.get(node) {
                for succ in next.keys() {
                    if let Some(deg) = indegree.get_mut(succ.as_str()) {
                        *deg -= 1;
                        if *deg == 0 {
                            queue.push_back(succ.as_str());
                        }
                    }
                }
            }
        }

        let complete = sorted.len() == self.nodes.len();
        (sorted, complete)
    }
}

/// Directed acyclic graph over string handles with payload side tables.
///
/// Every operation takes the single read-write lock, so the graph can be
/// shared across threads by reference. The graph is acyclic at all times:
/// an edge that would close a cycle is rejected before any mutation.
#[derive(Debug)]
pub struct DependencyGraph<NI, EI = ()> {
    inner: RwLock<GraphMaps<NI, EI>>,
}

impl<NI, EI> Default for DependencyGraph<NI, EI> {
    fn default() -> Self {
        Self {
            inner: RwLock::new(GraphMaps::default()),
        }
    }
}

impl<NI, EI> DependencyGraph<NI, EI> {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, GraphMaps<NI, EI>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, GraphMaps<NI, EI>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a node, overwriting the payload if it already exists.
    pub fn add_node(&self, node: impl Into<NodeKey>, info: NI) {
        let node = node.into();
        self.write().nodes.insert(node, info);
    }

    /// Insert the edge `from -> to`.
    ///
    /// Returns `false` without touching the graph when:
    /// - `from == to`
    /// - an endpoint is missing and `create_missing` is false
    /// - the edge would create a cycle
    ///
    /// Missing endpoints are created with `NI::default()` when
    /// `create_missing` is true.
    pub fn add_edge(&self, from: &str, to: &str, info: EI, create_missing: bool) -> bool
    where
        NI: Default,
        EI: Clone,
    {
        if from == to {
            warn!(from, to, "rejecting self edge");
            return false;
        }

        let mut maps = self.write();

        let has_from = maps.nodes.contains_key(from);
        let has_to = maps.nodes.contains_key(to);
        if (!has_from || !has_to) && !create_missing {
            warn!(from, to, has_from, has_to, "rejecting edge with missing endpoint");
            return false;
        }

        if has_from && has_to && maps.reaches(to, from) {
            warn!(from, to, "rejecting edge: would create a cycle");
            return false;
        }

        if !has_from {
            maps.nodes.insert(from.to_string(), NI::default());
        }
        if !has_to {
            maps.nodes.insert(to.to_string(), NI::default());
        }

        maps.edges
            .entry(from.to_string())
            .or_default()
            .insert(to.to_string(), info.clone());
        maps.reverse_edges
            .entry(to.to_string())
            .or_default()
            .insert(from.to_string(), info);

        debug!(from, to, "edge added");
        true
    }

    /// Remove the edge `from -> to`. Returns whether it existed.
    pub fn remove_edge(&self, from: &str, to: &str) -> bool {
        let mut guard = self.write();
        let maps = &mut *guard;

        let removed = maps
            .edges
            .get_mut(from)
            .is_some_and(|m| m.remove(to).is_some());
        if !removed {
            return false;
        }

        if maps.edges.get(from).is_some_and(|m| m.is_empty()) {
            maps.edges.remove(from);
        }
        if let Some(m) = maps.reverse_edges.get_mut(to) {
            m.remove(from);
        }
        if maps.reverse_edges.get(to).is_some_and(|m| m.is_empty()) {
            maps.reverse_edges.remove(to);
        }

        true
    }

    pub fn contains_node(&self, node: &str) -> bool {
        self.read().nodes.contains_key(node)
    }

    pub fn contains_edge(&self, from: &str, to: &str) -> bool {
        self.read()
            .edges
            .get(from)
            .is_some_and(|m| m.contains_key(to))
    }

    pub fn node_count(&self) -> usize {
        self.read().nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.read().edges.values().map(|m| m.len()).sum()
    }

    /// All node handles in key order.
    pub fn nodes(&self) -> Vec<NodeKey> {
        self.read().nodes.keys().cloned().collect()
    }

    /// Sources: nodes with no incoming edge.
    pub fn begin_nodes(&self) -> Vec<NodeKey> {
        let maps = self.read();
        maps.nodes
            .keys()
            .filter(|k| maps.indegree(k) == 0)
            .cloned()
            .collect()
    }

    /// Sinks: nodes with no outgoing edge.
    pub fn end_nodes(&self) -> Vec<NodeKey> {
        let maps = self.read();
        maps.nodes
            .keys()
            .filter(|k| maps.outdegree(k) == 0)
            .cloned()
            .collect()
    }

    /// Direct predecessors of `node`.
    pub fn previous_nodes(&self, node: &str) -> Vec<NodeKey> {
        self.read()
            .reverse_edges
            .get(node)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Direct successors of `node`.
    pub fn subsequent_nodes(&self, node: &str) -> Vec<NodeKey> {
        self.read()
            .edges
            .get(node)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn indegree(&self, node: &str) -> usize {
        self.read().indegree(node)
    }

    pub fn outdegree(&self, node: &str) -> usize {
        self.read().outdegree(node)
    }

    /// Kahn's algorithm over the current graph.
    pub fn topological_sort(&self) -> Result<Vec<NodeKey>, GraphError> {
        let (sorted, complete) = self.read().kahn();
        if complete {
            Ok(sorted)
        } else {
            Err(GraphError::CycleDetected)
        }
    }

    /// Same computation as [`Self::topological_sort`] without the error.
    pub fn has_cycle(&self) -> bool {
        !self.read().kahn().1
    }

    /// Every node reachable from `node` through outgoing edges, excluding
    /// `node` itself.
    pub fn descendants(&self, node: &str) -> Vec<NodeKey> {
        let maps = self.read();
        let mut out = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = maps
            .edges
            .get(node)
            .map(|m| m.keys().map(|k| k.as_str()).collect())
            .unwrap_or_default();

        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            out.push(current.to_string());
            if let Some(next) = maps.edges.get(current) {
                stack.extend(next.keys().map(|k| k.as_str()));
            }
        }

        out.sort();
        out
    }
}

impl<NI: Clone, EI> DependencyGraph<NI, EI> {
    /// Clone of the payload stored for `node`.
    pub fn node(&self, node: &str) -> Option<NI> {
        self.read().nodes.get(node).cloned()
    }
}

impl<NI: Clone, EI: Clone> DependencyGraph<NI, EI> {
    /// Plain node/edge listing that can be serialized and rebuilt.
    pub fn snapshot(&self) -> GraphSnapshot<NI, EI> {
        let maps = self.read();
        let nodes = maps
            .nodes
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let edges = maps
            .edges
            .iter()
            .flat_map(|(from, tos)| {
                tos.iter().map(move |(to, info)| GraphEdge {
                    from: from.clone(),
                    to: to.clone(),
                    info: info.clone(),
                })
            })
            .collect();

        GraphSnapshot { nodes, edges }
    }
}

impl<NI: Default, EI: Clone> DependencyGraph<NI, EI> {
    /// Rebuild a graph from a snapshot. Every edge goes through
    /// [`Self::add_edge`], so a cyclic snapshot is refused.
    pub fn from_snapshot(snapshot: GraphSnapshot<NI, EI>) -> Result<Self, GraphError> {
        let graph = Self::new();
        for (key, info) in snapshot.nodes {
            graph.add_node(key, info);
        }
        for edge in snapshot.edges {
            if !graph.contains_node(&edge.from) {
                return Err(GraphError::UnknownNode(edge.from));
            }
            if !graph.contains_node(&edge.to) {
                return Err(GraphError::UnknownNode(edge.to));
            }
            if !graph.add_edge(&edge.from, &edge.to, edge.info, false) {
                return Err(GraphError::CycleDetected);
            }
        }
        Ok(graph)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge<EI> {
    pub from: NodeKey,
    pub to: NodeKey,
    pub info: EI,
}

/// Serializable listing of a graph's nodes and edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot<NI, EI> {
    pub nodes: Vec<(NodeKey, NI)>,
    pub edges: Vec<GraphEdge<EI>>,
}
