//! Static structural analysis over a blueprint
//!
//! Builds a petgraph adjacency view (nodes by stable id plus a synthetic
//! END vertex) and answers the reachability and cycle questions the
//! simulator and the repair planner ask.

use std::collections::HashMap;

use petgraph::algo::{has_path_connecting, kosaraju_scc};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;

use super::{Blueprint, EdgeTarget, NodeId};

/// Adjacency index over a blueprint's nodes and the END sentinel.
pub struct GraphIndex {
    graph: DiGraph<NodeId, ()>,
    by_id: HashMap<NodeId, NodeIndex>,
    end: NodeIndex,
}

impl GraphIndex {
    pub fn build(blueprint: &Blueprint) -> Self {
        let mut graph = DiGraph::new();
        let mut by_id = HashMap::new();
        for node in &blueprint.nodes {
            let ix = graph.add_node(node.id.clone());
            by_id.insert(node.id.clone(), ix);
        }
        let end = graph.add_node("END".to_string());

        let mut connect = |source: &NodeId, target: &EdgeTarget| {
            let Some(&from) = by_id.get(source) else { return };
            let to = match target {
                EdgeTarget::Node(id) => match by_id.get(id) {
                    Some(&ix) => ix,
                    None => return,
                },
                EdgeTarget::End => end,
            };
            graph.add_edge(from, to, ());
        };

        for edge in &blueprint.edges {
            connect(&edge.source, &edge.target);
        }
        for guarded in &blueprint.guarded_edges {
            for target in guarded.branches.values() {
                connect(&guarded.source, target);
            }
        }

        Self { graph, by_id, end }
    }

    /// Node ids not reachable from the entry point, in blueprint order.
    pub fn unreachable_from(&self, blueprint: &Blueprint) -> Vec<NodeId> {
        let Some(&entry) = self.by_id.get(&blueprint.entry_point) else {
            return blueprint.nodes.iter().map(|n| n.id.clone()).collect();
        };
        let mut reached = vec![false; self.graph.node_count()];
        let mut dfs = Dfs::new(&self.graph, entry);
        while let Some(ix) = dfs.next(&self.graph) {
            reached[ix.index()] = true;
        }
        blueprint
            .nodes
            .iter()
            .filter(|n| self.by_id.get(&n.id).is_some_and(|ix| !reached[ix.index()]))
            .map(|n| n.id.clone())
            .collect()
    }

    /// Whether END is reachable from the given target.
    pub fn reaches_end(&self, target: &EdgeTarget) -> bool {
        match target {
            EdgeTarget::End => true,
            EdgeTarget::Node(id) => self
                .by_id
                .get(id)
                .is_some_and(|&from| has_path_connecting(&self.graph, from, self.end, None)),
        }
    }

    /// Members of the strongly connected component containing `node`, in
    /// blueprint order. A node outside any cycle yields just itself.
    pub fn cycle_members(&self, blueprint: &Blueprint, node: &str) -> Vec<NodeId> {
        let Some(&ix) = self.by_id.get(node) else {
            return vec![node.to_string()];
        };
        for component in kosaraju_scc(&self.graph) {
            if component.contains(&ix) {
                let mut members: Vec<NodeId> = blueprint
                    .nodes
                    .iter()
                    .filter(|n| {
                        self.by_id.get(&n.id).is_some_and(|nix| component.contains(nix))
                    })
                    .map(|n| n.id.clone())
                    .collect();
                if members.is_empty() {
                    members.push(node.to_string());
                }
                return members;
            }
        }
        vec![node.to_string()]
    }

    /// Node ids that sit on some cycle (self-loops included), in blueprint
    /// order.
    pub fn cyclic_nodes(&self, blueprint: &Blueprint) -> Vec<NodeId> {
        let mut on_cycle = vec![false; self.graph.node_count()];
        for component in kosaraju_scc(&self.graph) {
            let cyclic = component.len() > 1
                || component
                    .first()
                    .is_some_and(|&ix| self.graph.find_edge(ix, ix).is_some());
            if cyclic {
                for ix in component {
                    on_cycle[ix.index()] = true;
                }
            }
        }
        blueprint
            .nodes
            .iter()
            .filter(|n| self.by_id.get(&n.id).is_some_and(|ix| on_cycle[ix.index()]))
            .map(|n| n.id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blueprint::{EdgeDef, GuardExpression, GuardedEdgeDef, NodeDef, NodeKind};
    use crate::pattern::PatternId;
    use crate::schema::StateSchema;
    use uuid::Uuid;

    fn two_node_cycle() -> Blueprint {
        Blueprint {
            id: Uuid::nil(),
            version: 1,
            pattern: PatternId::ReflectLoop,
            state_schema: StateSchema::new(),
            nodes: vec![
                NodeDef::new("a", NodeKind::Reasoning, ""),
                NodeDef::new("b", NodeKind::Reasoning, ""),
                NodeDef::new("island", NodeKind::Reasoning, ""),
            ],
            edges: vec![
                EdgeDef::new("a", EdgeTarget::node("b")),
                EdgeDef::new("b", EdgeTarget::node("a")),
            ],
            guarded_edges: vec![],
            entry_point: "a".into(),
        }
    }

    #[test]
    fn detects_unreachable_nodes() {
        let bp = two_node_cycle();
        let index = GraphIndex::build(&bp);
        assert_eq!(index.unreachable_from(&bp), vec!["island".to_string()]);
    }

    #[test]
    fn cycle_membership_is_the_scc() {
        let bp = two_node_cycle();
        let index = GraphIndex::build(&bp);
        assert_eq!(index.cycle_members(&bp, "a"), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(index.cycle_members(&bp, "island"), vec!["island".to_string()]);
        assert_eq!(index.cyclic_nodes(&bp), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn end_reachability_follows_guard_branches() {
        let mut bp = two_node_cycle();
        bp.edges.retain(|e| e.source != "b");
        bp.guarded_edges.push(GuardedEdgeDef::new(
            "b",
            GuardExpression::CounterBelow { field: "n".into(), limit: 3 },
            [
                ("continue".to_string(), EdgeTarget::node("a")),
                ("end".to_string(), EdgeTarget::End),
            ],
        ));
        let index = GraphIndex::build(&bp);
        assert!(index.reaches_end(&EdgeTarget::node("a")));
        assert!(index.reaches_end(&EdgeTarget::End));
        assert!(!index.reaches_end(&EdgeTarget::node("island")));
    }
}
