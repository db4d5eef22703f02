// graph.rs — Dataflow graph of one SDFG state
//
// A `State` is an arena of nodes and edges keyed by stable numeric IDs. Each
// node records its enclosing map scope (the MapEntry ID, or none), which is
// the whole parent/child relation: a scope's members are the nodes whose
// `scope` points at its entry. A MapEntry and its MapExit share the scope of
// the map they sit in, and always reference each other.
//
// Preconditions: none; construction never requires a valid graph.
// Postconditions: `add_map` and `remove_node` keep brackets paired.
// Failure modes: edges between unknown nodes → `SdfgError::UnknownNode`.
// Side effects: none.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt;

use crate::dtypes::{ElementType, Language, ScheduleType};
use crate::error::{SdfgError, SdfgResult};
use crate::id::{EdgeId, IdAllocator, NodeId};
use crate::memlet::Memlet;
use crate::subset::Range;

// ── Public types ────────────────────────────────────────────────────────────

/// Named connectors of a node, optionally typed.
pub type Connectors = BTreeMap<String, Option<ElementType>>;

/// Backend or instrumentation metadata attached to a node or program.
pub type Extensions = BTreeMap<String, serde_json::Value>;

/// A parallel iteration space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Map {
    pub label: String,
    pub params: Vec<String>,
    /// One dimension per parameter.
    pub range: Vec<Range>,
    pub schedule: ScheduleType,
}

impl Map {
    pub fn new(label: impl Into<String>, dims: Vec<(String, Range)>, schedule: ScheduleType) -> Self {
        let (params, range) = dims.into_iter().unzip();
        Map {
            label: label.into(),
            params,
            range,
            schedule,
        }
    }

    /// Parameter names paired with their ranges.
    pub fn dims(&self) -> impl Iterator<Item = (&String, &Range)> {
        self.params.iter().zip(&self.range)
    }
}

/// The kind of a graph node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Reference to a data container.
    Access { data: String },
    /// Opening bracket of a map scope.
    MapEntry {
        map: Map,
        exit: NodeId,
        in_connectors: Connectors,
        out_connectors: Connectors,
    },
    /// Closing bracket of a map scope.
    MapExit {
        entry: NodeId,
        in_connectors: Connectors,
        out_connectors: Connectors,
    },
    /// Opaque computation.
    Tasklet {
        label: String,
        code: String,
        language: Language,
        in_connectors: Connectors,
        out_connectors: Connectors,
    },
}

impl NodeKind {
    pub fn in_connectors(&self) -> Option<&Connectors> {
        match self {
            NodeKind::Access { .. } => None,
            NodeKind::MapEntry { in_connectors, .. }
            | NodeKind::MapExit { in_connectors, .. }
            | NodeKind::Tasklet { in_connectors, .. } => Some(in_connectors),
        }
    }

    pub fn out_connectors(&self) -> Option<&Connectors> {
        match self {
            NodeKind::Access { .. } => None,
            NodeKind::MapEntry { out_connectors, .. }
            | NodeKind::MapExit { out_connectors, .. }
            | NodeKind::Tasklet { out_connectors, .. } => Some(out_connectors),
        }
    }

    fn connectors_mut(&mut self) -> Option<(&mut Connectors, &mut Connectors)> {
        match self {
            NodeKind::Access { .. } => None,
            NodeKind::MapEntry {
                in_connectors,
                out_connectors,
                ..
            }
            | NodeKind::MapExit {
                in_connectors,
                out_connectors,
                ..
            }
            | NodeKind::Tasklet {
                in_connectors,
                out_connectors,
                ..
            } => Some((in_connectors, out_connectors)),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            NodeKind::Access { .. } => "AccessNode",
            NodeKind::MapEntry { .. } => "MapEntry",
            NodeKind::MapExit { .. } => "MapExit",
            NodeKind::Tasklet { .. } => "Tasklet",
        }
    }
}

/// A node in a state's dataflow graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    /// Enclosing MapEntry, or `None` at the top level of the state.
    pub scope: Option<NodeId>,
    pub extensions: Extensions,
}

impl Node {
    pub fn is_entry(&self) -> bool {
        matches!(self.kind, NodeKind::MapEntry { .. })
    }

    pub fn is_exit(&self) -> bool {
        matches!(self.kind, NodeKind::MapExit { .. })
    }

    pub fn data(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Access { data } => Some(data),
            _ => None,
        }
    }
}

/// A directed dataflow edge. `memlet` is `None` for pure ordering edges.
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub id: EdgeId,
    pub src: NodeId,
    pub src_conn: Option<String>,
    pub dst: NodeId,
    pub dst_conn: Option<String>,
    pub memlet: Option<Memlet>,
}

/// One state: a dataflow graph plus its label.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct State {
    pub label: String,
    nodes: BTreeMap<NodeId, Node>,
    edges: BTreeMap<EdgeId, Edge>,
    ids: IdAllocator,
}

// ── Construction ────────────────────────────────────────────────────────────

impl State {
    pub fn new(label: impl Into<String>) -> Self {
        State {
            label: label.into(),
            ..State::default()
        }
    }

    /// Insert a node with a fresh ID. Bracket pairing is the caller's
    /// responsibility; prefer `add_map` for maps.
    pub fn add_node(&mut self, kind: NodeKind, scope: Option<NodeId>) -> NodeId {
        let id = self.ids.alloc_node();
        self.nodes.insert(
            id,
            Node {
                id,
                kind,
                scope,
                extensions: Extensions::new(),
            },
        );
        id
    }

    /// Insert a node under an ID read from a document. An ID already in
    /// use is a schema error.
    pub fn insert_node(&mut self, node: Node) -> SdfgResult<()> {
        if self.nodes.contains_key(&node.id) {
            return Err(SdfgError::Schema(format!(
                "duplicate node id {} in state `{}`",
                node.id.0, self.label
            )));
        }
        self.ids.reserve_node(node.id)?;
        self.nodes.insert(node.id, node);
        Ok(())
    }

    /// Insert an edge under an ID read from a document.
    pub fn insert_edge(&mut self, edge: Edge) -> SdfgResult<()> {
        if self.edges.contains_key(&edge.id) {
            return Err(SdfgError::Schema(format!(
                "duplicate edge id {} in state `{}`",
                edge.id.0, self.label
            )));
        }
        self.ids.reserve_edge(edge.id)?;
        self.edges.insert(edge.id, edge);
        Ok(())
    }

    /// Next-ID counters for nodes and edges, as persisted in documents.
    pub fn id_counters(&self) -> (u32, u32) {
        self.ids.counters()
    }

    pub fn advance_id_counters(&mut self, next_node: u32, next_edge: u32) {
        self.ids.advance(next_node, next_edge);
    }

    pub fn add_access(&mut self, data: impl Into<String>, scope: Option<NodeId>) -> NodeId {
        self.add_node(NodeKind::Access { data: data.into() }, scope)
    }

    pub fn add_tasklet(
        &mut self,
        label: impl Into<String>,
        inputs: &[&str],
        outputs: &[&str],
        code: impl Into<String>,
        scope: Option<NodeId>,
    ) -> NodeId {
        let conns = |names: &[&str]| -> Connectors {
            names.iter().map(|n| (n.to_string(), None)).collect()
        };
        self.add_node(
            NodeKind::Tasklet {
                label: label.into(),
                code: code.into(),
                language: Language::Python,
                in_connectors: conns(inputs),
                out_connectors: conns(outputs),
            },
            scope,
        )
    }

    /// Create a MapEntry/MapExit pair in `scope`. Returns `(entry, exit)`.
    pub fn add_map(&mut self, map: Map, scope: Option<NodeId>) -> (NodeId, NodeId) {
        let entry = self.ids.alloc_node();
        let exit = self.ids.alloc_node();
        self.nodes.insert(
            entry,
            Node {
                id: entry,
                kind: NodeKind::MapEntry {
                    map,
                    exit,
                    in_connectors: Connectors::new(),
                    out_connectors: Connectors::new(),
                },
                scope,
                extensions: Extensions::new(),
            },
        );
        self.nodes.insert(
            exit,
            Node {
                id: exit,
                kind: NodeKind::MapExit {
                    entry,
                    in_connectors: Connectors::new(),
                    out_connectors: Connectors::new(),
                },
                scope,
                extensions: Extensions::new(),
            },
        );
        (entry, exit)
    }

    pub fn add_edge(
        &mut self,
        src: NodeId,
        src_conn: Option<&str>,
        dst: NodeId,
        dst_conn: Option<&str>,
        memlet: Option<Memlet>,
    ) -> SdfgResult<EdgeId> {
        for n in [src, dst] {
            if !self.nodes.contains_key(&n) {
                return Err(SdfgError::UnknownNode(n));
            }
        }
        let id = self.ids.alloc_edge();
        self.edges.insert(
            id,
            Edge {
                id,
                src,
                src_conn: src_conn.map(str::to_string),
                dst,
                dst_conn: dst_conn.map(str::to_string),
                memlet,
            },
        );
        Ok(id)
    }

    /// Route a memlet along `path`, declaring `IN_x`/`OUT_x` connector pairs
    /// on every map bracket the path passes through. Every edge of the path
    /// receives a copy of `memlet`; run propagation afterwards to derive the
    /// outer memlets.
    pub fn add_memlet_path(
        &mut self,
        path: &[NodeId],
        memlet: Memlet,
        src_conn: Option<&str>,
        dst_conn: Option<&str>,
    ) -> SdfgResult<Vec<EdgeId>> {
        let mut edges = Vec::new();
        let mut carried: Option<String> = src_conn.map(str::to_string);
        for (i, pair) in path.windows(2).enumerate() {
            let (src, dst) = (pair[0], pair[1]);
            let last = i + 2 == path.len();
            let dst_is_bracket = self
                .node(dst)
                .is_some_and(|n| n.is_entry() || n.is_exit());
            let (into, next_out) = if last {
                (dst_conn.map(str::to_string), None)
            } else if dst_is_bracket {
                let base = self.free_connector_base(dst, &memlet.data);
                self.declare_connector(dst, &format!("IN_{base}"), true);
                self.declare_connector(dst, &format!("OUT_{base}"), false);
                (Some(format!("IN_{base}")), Some(format!("OUT_{base}")))
            } else {
                (None, None)
            };
            let id = self.add_edge(
                src,
                carried.as_deref(),
                dst,
                into.as_deref(),
                Some(memlet.clone()),
            )?;
            edges.push(id);
            carried = next_out;
        }
        Ok(edges)
    }

    /// Declare a connector on a node.
    pub fn declare_connector(&mut self, node: NodeId, name: &str, input: bool) {
        if let Some((ins, outs)) = self
            .nodes
            .get_mut(&node)
            .and_then(|n| n.kind.connectors_mut())
        {
            let target = if input { ins } else { outs };
            target.entry(name.to_string()).or_insert(None);
        }
    }

    fn free_connector_base(&self, node: NodeId, data: &str) -> String {
        let taken = |base: &str| {
            self.node(node).is_some_and(|n| {
                n.kind
                    .in_connectors()
                    .is_some_and(|c| c.contains_key(&format!("IN_{base}")))
            })
        };
        if !taken(data) {
            return data.to_string();
        }
        (1..)
            .map(|k| format!("{data}_{k}"))
            .find(|b| !taken(b))
            .unwrap_or_else(|| data.to_string())
    }

    // ── Removal ─────────────────────────────────────────────────────────────

    pub fn remove_edge(&mut self, id: EdgeId) -> Option<Edge> {
        self.edges.remove(&id)
    }

    /// Remove a node and its incident edges. Removing either bracket of a
    /// map removes both, and the map's members move to the enclosing scope.
    /// Returns the removed node IDs.
    pub fn remove_node(&mut self, id: NodeId) -> SdfgResult<Vec<NodeId>> {
        let node = self.nodes.get(&id).ok_or(SdfgError::UnknownNode(id))?;
        let mut removed = vec![id];
        let parent = node.scope;
        match node.kind {
            NodeKind::MapEntry { exit, .. } => removed.push(exit),
            NodeKind::MapExit { entry, .. } => removed.push(entry),
            _ => {}
        }
        let entry = removed.iter().copied().find(|n| self.is_entry(*n));
        for n in &removed {
            self.nodes.remove(n);
        }
        self.edges
            .retain(|_, e| !removed.contains(&e.src) && !removed.contains(&e.dst));
        if let Some(entry) = entry {
            for node in self.nodes.values_mut() {
                if node.scope == Some(entry) {
                    node.scope = parent;
                }
            }
        }
        Ok(removed)
    }
}

// ── Queries ─────────────────────────────────────────────────────────────────

impl State {
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.get(&id)
    }

    pub fn edge_mut(&mut self, id: EdgeId) -> Option<&mut Edge> {
        self.edges.get_mut(&id)
    }

    /// Nodes in ID order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Edges in ID order.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_entry(&self, id: NodeId) -> bool {
        self.node(id).is_some_and(Node::is_entry)
    }

    pub fn is_exit(&self, id: NodeId) -> bool {
        self.node(id).is_some_and(Node::is_exit)
    }

    /// Enclosing MapEntry of a node.
    pub fn scope_of(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|n| n.scope)
    }

    /// Direct members of the scope opened by `entry` (`None`: top level), in
    /// ID order. A nested map contributes both of its brackets.
    pub fn scope_children(&self, entry: Option<NodeId>) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|n| n.scope == entry)
            .map(|n| n.id)
            .collect()
    }

    pub fn exit_of(&self, entry: NodeId) -> Option<NodeId> {
        match self.node(entry)?.kind {
            NodeKind::MapEntry { exit, .. } => Some(exit),
            _ => None,
        }
    }

    pub fn entry_of(&self, exit: NodeId) -> Option<NodeId> {
        match self.node(exit)?.kind {
            NodeKind::MapExit { entry, .. } => Some(entry),
            _ => None,
        }
    }

    /// The map of a MapEntry, or of the entry matching a MapExit.
    pub fn map_of(&self, bracket: NodeId) -> Option<&Map> {
        match &self.node(bracket)?.kind {
            NodeKind::MapEntry { map, .. } => Some(map),
            NodeKind::MapExit { entry, .. } => match &self.node(*entry)?.kind {
                NodeKind::MapEntry { map, .. } => Some(map),
                _ => None,
            },
            _ => None,
        }
    }

    /// All MapEntry IDs, in ID order.
    pub fn map_entries(&self) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|n| n.is_entry())
            .map(|n| n.id)
            .collect()
    }

    /// Enclosing entries of a node, outermost first. Stops at a cycle.
    pub fn scope_path(&self, id: NodeId) -> Vec<NodeId> {
        let mut path = Vec::new();
        let mut seen = BTreeSet::new();
        let mut cur = self.scope_of(id);
        while let Some(entry) = cur {
            if !seen.insert(entry) {
                break;
            }
            path.push(entry);
            cur = self.scope_of(entry);
        }
        path.reverse();
        path
    }

    /// The scope an edge leaving `src` runs in: the map itself for a
    /// MapEntry, otherwise the node's enclosing scope.
    pub fn out_scope(&self, src: NodeId) -> Option<NodeId> {
        if self.is_entry(src) {
            Some(src)
        } else {
            self.scope_of(src)
        }
    }

    /// The scope an edge entering `dst` runs in: the map for a MapExit,
    /// otherwise the node's enclosing scope.
    pub fn in_scope(&self, dst: NodeId) -> Option<NodeId> {
        match self.entry_of(dst) {
            Some(entry) => Some(entry),
            None => self.scope_of(dst),
        }
    }

    /// The scope an edge's memlet is evaluated in.
    pub fn edge_scope(&self, edge: &Edge) -> Option<NodeId> {
        self.out_scope(edge.src)
    }

    pub fn in_edges(&self, id: NodeId) -> Vec<&Edge> {
        self.edges.values().filter(|e| e.dst == id).collect()
    }

    pub fn out_edges(&self, id: NodeId) -> Vec<&Edge> {
        self.edges.values().filter(|e| e.src == id).collect()
    }

    /// Access nodes in ID order.
    pub fn data_nodes(&self) -> Vec<&Node> {
        self.nodes.values().filter(|n| n.data().is_some()).collect()
    }

    /// Display label of a node.
    pub fn label_of(&self, id: NodeId) -> String {
        match self.node(id).map(|n| &n.kind) {
            Some(NodeKind::Access { data }) => data.clone(),
            Some(NodeKind::Tasklet { label, .. }) => label.clone(),
            Some(NodeKind::MapEntry { map, .. }) => map.label.clone(),
            Some(NodeKind::MapExit { .. }) => self
                .map_of(id)
                .map(|m| m.label.clone())
                .unwrap_or_default(),
            None => String::new(),
        }
    }

    /// Kahn topological order, ties broken by node ID. `None` if the graph
    /// has a cycle.
    pub fn topological_order(&self) -> Option<Vec<NodeId>> {
        let mut indegree: BTreeMap<NodeId, usize> =
            self.nodes.keys().map(|&id| (id, 0)).collect();
        let mut succ: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for e in self.edges.values() {
            if let Some(d) = indegree.get_mut(&e.dst) {
                *d += 1;
            }
            succ.entry(e.src).or_default().push(e.dst);
        }
        let mut ready: BTreeSet<NodeId> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(id) = ready.pop_first() {
            order.push(id);
            for next in succ.get(&id).into_iter().flatten() {
                if let Some(d) = indegree.get_mut(next) {
                    *d -= 1;
                    if *d == 0 {
                        ready.insert(*next);
                    }
                }
            }
        }
        (order.len() == self.nodes.len()).then_some(order)
    }

    /// Weakly connected components, each sorted by ID; components ordered
    /// by their smallest ID.
    pub fn components(&self) -> Vec<Vec<NodeId>> {
        let mut adj: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for e in self.edges.values() {
            adj.entry(e.src).or_default().push(e.dst);
            adj.entry(e.dst).or_default().push(e.src);
        }
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for &start in self.nodes.keys() {
            if !seen.insert(start) {
                continue;
            }
            let mut comp = vec![start];
            let mut queue = VecDeque::from([start]);
            while let Some(n) = queue.pop_front() {
                for &m in adj.get(&n).into_iter().flatten() {
                    if seen.insert(m) {
                        comp.push(m);
                        queue.push_back(m);
                    }
                }
            }
            comp.sort();
            out.push(comp);
        }
        out
    }
}

// ── Display ─────────────────────────────────────────────────────────────────

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "state {}:", self.label)?;
        for node in self.nodes.values() {
            write!(f, "  {} {} {:?}", node.id, node.kind.type_name(), self.label_of(node.id))?;
            if let Some(scope) = node.scope {
                write!(f, " in {scope}")?;
            }
            writeln!(f)?;
        }
        for e in self.edges.values() {
            write!(f, "  {}: {} -> {}", e.id, e.src, e.dst)?;
            if let Some(m) = &e.memlet {
                write!(f, " [{m}]")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbolic::Expr;

    fn map(label: &str, param: &str, range: &str, schedule: ScheduleType) -> Map {
        let r = crate::subset::Subset::parse(range).unwrap().dims.remove(0);
        Map::new(label, vec![(param.to_string(), r)], schedule)
    }

    /// A -> [map i] -> t -> [exit] -> B
    fn simple() -> (State, NodeId, NodeId, NodeId) {
        let mut s = State::new("s");
        let a = s.add_access("A", None);
        let b = s.add_access("B", None);
        let (me, mx) = s.add_map(map("m", "i", "0:N", ScheduleType::Sequential), None);
        let t = s.add_tasklet("t", &["a"], &["b"], "b = a", Some(me));
        s.add_memlet_path(&[a, me, t], Memlet::parse("A", "i").unwrap(), None, Some("a"))
            .unwrap();
        s.add_memlet_path(&[t, mx, b], Memlet::parse("B", "i").unwrap(), Some("b"), None)
            .unwrap();
        (s, me, mx, t)
    }

    #[test]
    fn map_pair_references_each_other() {
        let (s, me, mx, _) = simple();
        assert_eq!(s.exit_of(me), Some(mx));
        assert_eq!(s.entry_of(mx), Some(me));
        assert_eq!(s.map_of(mx).map(|m| m.label.as_str()), Some("m"));
    }

    #[test]
    fn memlet_path_declares_bracket_connectors() {
        let (s, me, mx, t) = simple();
        let ins = s.node(me).unwrap().kind.in_connectors().unwrap();
        assert!(ins.contains_key("IN_A"));
        let outs = s.node(mx).unwrap().kind.out_connectors().unwrap();
        assert!(outs.contains_key("OUT_B"));
        let into_t = s.in_edges(t);
        assert_eq!(into_t.len(), 1);
        assert_eq!(into_t[0].src_conn.as_deref(), Some("OUT_A"));
        assert_eq!(into_t[0].dst_conn.as_deref(), Some("a"));
    }

    #[test]
    fn repeated_data_gets_fresh_connector() {
        let (mut s, me, _, _) = simple();
        let a2 = s.add_access("A", None);
        let t2 = s.add_tasklet("t2", &["x"], &[], "", Some(me));
        s.add_memlet_path(&[a2, me, t2], Memlet::parse("A", "i").unwrap(), None, Some("x"))
            .unwrap();
        let ins = s.node(me).unwrap().kind.in_connectors().unwrap();
        assert!(ins.contains_key("IN_A_1"));
    }

    #[test]
    fn scope_queries() {
        let (s, me, mx, t) = simple();
        assert_eq!(s.scope_of(t), Some(me));
        assert_eq!(s.scope_of(me), None);
        assert_eq!(s.scope_children(Some(me)), vec![t]);
        assert_eq!(s.out_scope(me), Some(me));
        assert_eq!(s.in_scope(mx), Some(me));
        assert_eq!(s.scope_path(t), vec![me]);
    }

    #[test]
    fn removing_entry_removes_exit_and_reparents() {
        let (mut s, me, mx, t) = simple();
        let removed = s.remove_node(me).unwrap();
        assert_eq!(removed, vec![me, mx]);
        assert!(s.node(mx).is_none());
        assert_eq!(s.scope_of(t), None);
        assert!(s.edges().all(|e| e.src != me && e.dst != mx));
    }

    #[test]
    fn removing_exit_removes_entry() {
        let (mut s, me, mx, _) = simple();
        let removed = s.remove_node(mx).unwrap();
        assert!(removed.contains(&me));
        assert!(s.map_entries().is_empty());
    }

    #[test]
    fn nested_removal_reparents_to_enclosing_scope() {
        let mut s = State::new("s");
        let (outer, _) = s.add_map(map("o", "i", "0:N", ScheduleType::GpuDevice), None);
        let (inner, _) = s.add_map(map("in", "j", "0:32", ScheduleType::GpuThreadBlock), Some(outer));
        let t = s.add_tasklet("t", &[], &[], "", Some(inner));
        s.remove_node(inner).unwrap();
        assert_eq!(s.scope_of(t), Some(outer));
    }

    #[test]
    fn topological_order_and_cycles() {
        let (mut s, _, _, _) = simple();
        let order = s.topological_order().unwrap();
        assert_eq!(order.len(), s.node_count());
        let a = NodeId(0);
        let b = NodeId(1);
        assert!(order.iter().position(|&n| n == a) < order.iter().position(|&n| n == b));

        s.add_edge(b, None, a, None, None).unwrap();
        assert!(s.topological_order().is_none());
    }

    #[test]
    fn components_split_disconnected_parts() {
        let (mut s, _, _, _) = simple();
        let lone = s.add_access("C", None);
        let comps = s.components();
        assert_eq!(comps.len(), 2);
        assert_eq!(comps[1], vec![lone]);
    }

    #[test]
    fn edge_to_unknown_node_fails() {
        let mut s = State::new("s");
        let a = s.add_access("A", None);
        assert!(s.add_edge(a, None, NodeId(99), None, None).is_err());
    }

    #[test]
    fn map_dims_pair_params_with_ranges() {
        let m = map("m", "i", "0:N:32", ScheduleType::GpuDevice);
        let (p, r) = m.dims().next().unwrap();
        assert_eq!(p, "i");
        assert_eq!(r.step, Expr::Int(32));
    }

    #[test]
    fn inserting_a_taken_id_is_rejected() {
        let (mut s, _, _, _) = simple();
        let copy = s.node(NodeId(0)).unwrap().clone();
        let err = s.insert_node(copy).unwrap_err();
        assert!(matches!(err, SdfgError::Schema(ref m) if m.contains("duplicate node id 0")));
        assert_eq!(s.node_count(), 5);

        let edge = s.edges().next().unwrap().clone();
        assert!(matches!(s.insert_edge(edge), Err(SdfgError::Schema(_))));
    }
}
