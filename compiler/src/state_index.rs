// state_index.rs — Lookup tables over one state
//
// Scope membership and connector bindings are needed repeatedly by
// validation, propagation and lowering. `StateIndex` builds them once per
// run instead of rescanning the edge map for every query.

use std::collections::HashMap;

use crate::graph::{Edge, State};
use crate::id::{EdgeId, NodeId};

#[derive(Debug, Clone, Default)]
pub struct StateIndex {
    children: HashMap<Option<NodeId>, Vec<NodeId>>,
    in_edges: HashMap<NodeId, Vec<EdgeId>>,
    out_edges: HashMap<NodeId, Vec<EdgeId>>,
    in_bindings: HashMap<(NodeId, String), Vec<EdgeId>>,
    out_bindings: HashMap<(NodeId, String), Vec<EdgeId>>,
}

impl StateIndex {
    pub fn build(state: &State) -> Self {
        let mut index = StateIndex::default();
        for node in state.nodes() {
            index.children.entry(node.scope).or_default().push(node.id);
        }
        for edge in state.edges() {
            index.in_edges.entry(edge.dst).or_default().push(edge.id);
            index.out_edges.entry(edge.src).or_default().push(edge.id);
            if let Some(conn) = &edge.dst_conn {
                index
                    .in_bindings
                    .entry((edge.dst, conn.clone()))
                    .or_default()
                    .push(edge.id);
            }
            if let Some(conn) = &edge.src_conn {
                index
                    .out_bindings
                    .entry((edge.src, conn.clone()))
                    .or_default()
                    .push(edge.id);
            }
        }
        index
    }

    /// Direct members of a scope (`None`: top level), in ID order.
    pub fn children(&self, scope: Option<NodeId>) -> &[NodeId] {
        self.children.get(&scope).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every node nested anywhere inside the scope opened by `entry`.
    pub fn members_recursive(&self, entry: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![entry];
        while let Some(scope) = stack.pop() {
            for &child in self.children(Some(scope)) {
                if child == entry || out.contains(&child) {
                    continue;
                }
                out.push(child);
                stack.push(child);
            }
        }
        out.sort();
        out
    }

    pub fn in_edges<'a>(&self, state: &'a State, node: NodeId) -> Vec<&'a Edge> {
        lookup(state, self.in_edges.get(&node))
    }

    pub fn out_edges<'a>(&self, state: &'a State, node: NodeId) -> Vec<&'a Edge> {
        lookup(state, self.out_edges.get(&node))
    }

    /// Edges bound to input connector `conn` of `node`.
    pub fn bound_in<'a>(&self, state: &'a State, node: NodeId, conn: &str) -> Vec<&'a Edge> {
        lookup(state, self.in_bindings.get(&(node, conn.to_string())))
    }

    /// Edges bound to output connector `conn` of `node`.
    pub fn bound_out<'a>(&self, state: &'a State, node: NodeId, conn: &str) -> Vec<&'a Edge> {
        lookup(state, self.out_bindings.get(&(node, conn.to_string())))
    }
}

fn lookup<'a>(state: &'a State, ids: Option<&Vec<EdgeId>>) -> Vec<&'a Edge> {
    ids.into_iter()
        .flatten()
        .filter_map(|&id| state.edge(id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtypes::ScheduleType;
    use crate::graph::Map;
    use crate::memlet::Memlet;
    use crate::subset::Subset;

    #[test]
    fn bindings_and_members() {
        let mut s = State::new("s");
        let a = s.add_access("A", None);
        let range = Subset::parse("0:N").unwrap().dims.remove(0);
        let (outer, outer_exit) = s.add_map(
            Map::new("o", vec![("i".into(), range.clone())], ScheduleType::GpuDevice),
            None,
        );
        let (inner, inner_exit) = s.add_map(
            Map::new("in", vec![("j".into(), range)], ScheduleType::GpuThreadBlock),
            Some(outer),
        );
        let t = s.add_tasklet("t", &["x"], &[], "", Some(inner));
        s.add_memlet_path(&[a, outer, inner, t], Memlet::parse("A", "j").unwrap(), None, Some("x"))
            .unwrap();

        let index = StateIndex::build(&s);
        assert_eq!(index.children(None), &[a, outer, outer_exit]);
        assert_eq!(index.members_recursive(outer), vec![inner, inner_exit, t]);
        assert_eq!(index.bound_in(&s, outer, "IN_A").len(), 1);
        assert_eq!(index.bound_out(&s, inner, "OUT_A")[0].dst, t);
        assert_eq!(index.in_edges(&s, t).len(), 1);
        assert!(index.bound_in(&s, t, "missing").is_empty());
    }
}
