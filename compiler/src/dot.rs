// dot.rs — Graphviz DOT output for programs
//
// Renders each state as a cluster and each map scope as a nested cluster
// holding its entry, exit and members. Dataflow edges carry their memlet as
// the label; interstate edges connect the state clusters and carry the
// condition and assignments.
//
// Preconditions: none; malformed scope nesting is drawn as far as it goes.
// Postconditions: returns a DOT string with one cluster per state.
// Failure modes: none (pure string formatting).
// Side effects: none.

use std::collections::BTreeSet;
use std::fmt::Write;

use crate::graph::{NodeKind, State};
use crate::id::{NodeId, StateId};
use crate::sdfg::Sdfg;

/// Emit the program as a Graphviz DOT string.
pub fn emit_dot(sdfg: &Sdfg) -> String {
    let mut buf = String::new();
    let _ = writeln!(buf, "digraph \"{}\" {{", escape(&sdfg.name));
    let _ = writeln!(buf, "    compound=true;");
    let _ = writeln!(buf, "    node [fontname=\"Helvetica\", fontsize=10];");
    let _ = writeln!(buf, "    edge [fontname=\"Helvetica\", fontsize=9];");

    for (sid, state) in sdfg.states() {
        let _ = writeln!(buf);
        let _ = writeln!(buf, "    subgraph cluster_s{} {{", sid.0);
        let start = if sdfg.start_state == Some(sid) { " (start)" } else { "" };
        let _ = writeln!(buf, "        label=\"{}{start}\";", escape(&state.label));
        let _ = writeln!(buf, "        style=rounded;");
        let _ = writeln!(buf, "        color=gray50;");
        let _ = writeln!(buf, "        {} [shape=point, style=invis];", anchor(sid));
        let mut placed = BTreeSet::new();
        write_scope(&mut buf, sid, state, None, "        ", &mut placed);

        for edge in state.edges() {
            let src = node_id(sid, edge.src);
            let dst = node_id(sid, edge.dst);
            match &edge.memlet {
                Some(m) => {
                    let _ = writeln!(
                        buf,
                        "        {src} -> {dst} [label=\"{}\"];",
                        escape(&m.to_string())
                    );
                }
                None => {
                    let _ = writeln!(buf, "        {src} -> {dst} [style=dotted];");
                }
            }
        }
        let _ = writeln!(buf, "    }}");
    }

    if !sdfg.edges.is_empty() {
        let _ = writeln!(buf);
        let _ = writeln!(buf, "    // Interstate edges");
    }
    for e in &sdfg.edges {
        let mut label = if e.is_unconditional() {
            String::new()
        } else {
            e.condition.clone()
        };
        for (k, v) in &e.assignments {
            if !label.is_empty() {
                label.push_str("\\n");
            }
            let _ = write!(label, "{k} = {v}");
        }
        let _ = writeln!(
            buf,
            "    {} -> {} [ltail=cluster_s{}, lhead=cluster_s{}, label=\"{}\", color=blue, penwidth=2];",
            anchor(e.src),
            anchor(e.dst),
            e.src.0,
            e.dst.0,
            escape_keep_newlines(&label)
        );
    }

    let _ = writeln!(buf, "}}");
    buf
}

// ── Helpers ─────────────────────────────────────────────────────────────────

fn anchor(sid: StateId) -> String {
    format!("s{}_anchor", sid.0)
}

fn node_id(sid: StateId, node: NodeId) -> String {
    format!("s{}_n{}", sid.0, node.0)
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

fn escape_keep_newlines(text: &str) -> String {
    text.replace('"', "\\\"")
}

/// Return DOT attributes string for a node.
fn node_attrs(state: &State, id: NodeId, kind: &NodeKind) -> String {
    let (shape, color) = match kind {
        NodeKind::Access { .. } => ("ellipse", "white"),
        NodeKind::MapEntry { .. } => ("trapezium", "lightblue"),
        NodeKind::MapExit { .. } => ("invtrapezium", "lightblue"),
        NodeKind::Tasklet { .. } => ("octagon", "lightyellow"),
    };
    let label = match kind {
        NodeKind::MapEntry { map, .. } => {
            let dims: Vec<String> = map.dims().map(|(p, r)| format!("{p}={r}")).collect();
            format!("{}[{}]", map.label, dims.join(", "))
        }
        _ => state.label_of(id),
    };
    format!(
        "shape={shape}, style=filled, fillcolor={color}, label=\"{}\"",
        escape(&label)
    )
}

/// Write the members of `scope`, nesting a cluster per map. `placed`
/// guards against cyclic scope references.
fn write_scope(
    buf: &mut String,
    sid: StateId,
    state: &State,
    scope: Option<NodeId>,
    indent: &str,
    placed: &mut BTreeSet<NodeId>,
) {
    for id in state.scope_children(scope) {
        let Some(node) = state.node(id) else {
            continue;
        };
        match &node.kind {
            NodeKind::MapExit { .. } => {}
            NodeKind::MapEntry { exit, .. } => {
                if !placed.insert(id) {
                    continue;
                }
                let inner = format!("{indent}    ");
                let _ = writeln!(buf, "{indent}subgraph cluster_s{}_m{} {{", sid.0, id.0);
                let _ = writeln!(buf, "{inner}style=dashed;");
                let _ = writeln!(buf, "{inner}color=gray70;");
                let _ = writeln!(buf, "{inner}label=\"\";");
                let _ = writeln!(
                    buf,
                    "{inner}{} [{}];",
                    node_id(sid, id),
                    node_attrs(state, id, &node.kind)
                );
                if let Some(x) = state.node(*exit) {
                    placed.insert(*exit);
                    let _ = writeln!(
                        buf,
                        "{inner}{} [{}];",
                        node_id(sid, *exit),
                        node_attrs(state, *exit, &x.kind)
                    );
                }
                write_scope(buf, sid, state, Some(id), &inner, placed);
                let _ = writeln!(buf, "{indent}}}");
            }
            _ => {
                if placed.insert(id) {
                    let _ = writeln!(
                        buf,
                        "{indent}{} [{}];",
                        node_id(sid, id),
                        node_attrs(state, id, &node.kind)
                    );
                }
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtypes::{ElementType, ScheduleType, StorageType};
    use crate::graph::Map;
    use crate::memlet::Memlet;
    use crate::sdfg::InterstateEdge;
    use crate::subset::Subset;
    use crate::symbolic::Expr;

    fn program() -> Sdfg {
        let mut p = Sdfg::new("demo");
        p.add_array("A", vec![Expr::sym("N")], ElementType::Float64, StorageType::CpuHeap)
            .unwrap();
        let s0 = p.add_state("first");
        let s1 = p.add_state("second");
        p.add_interstate_edge(
            InterstateEdge::new(s0, s1)
                .with_condition("N > 0")
                .with_assignment("k", "1"),
        )
        .unwrap();
        let st = p.state_mut(s0).unwrap();
        let a = st.add_access("A", None);
        let r = Subset::parse("0:N").unwrap().dims.remove(0);
        let (me, mx) = st.add_map(
            Map::new("outer", vec![("i".into(), r)], ScheduleType::CpuMulticore),
            None,
        );
        let t = st.add_tasklet("t", &[], &["o"], "o = i", Some(me));
        let b = st.add_access("A", None);
        st.add_edge(a, None, me, None, None).unwrap();
        st.add_memlet_path(&[t, mx, b], Memlet::parse("A", "i").unwrap(), Some("o"), None)
            .unwrap();
        p
    }

    #[test]
    fn valid_dot_structure() {
        let dot = emit_dot(&program());
        assert!(dot.starts_with("digraph \"demo\" {"));
        assert!(dot.trim_end().ends_with('}'));
        assert!(dot.contains("subgraph cluster_s0 {"));
        assert!(dot.contains("subgraph cluster_s1 {"));
        assert!(dot.contains("label=\"first (start)\";"));
    }

    #[test]
    fn maps_nest_as_clusters() {
        let dot = emit_dot(&program());
        assert!(dot.contains("subgraph cluster_s0_m1 {"));
        assert!(dot.contains("label=\"outer[i=0:N]\""));
        assert!(dot.contains("shape=octagon"));
        assert!(dot.contains("shape=invtrapezium"));
        // The tasklet is written inside the map cluster.
        let cluster = dot.find("cluster_s0_m1").unwrap();
        let tasklet = dot.find("s0_n3 [").unwrap();
        assert!(tasklet > cluster);
    }

    #[test]
    fn edges_carry_memlets_and_conditions() {
        let dot = emit_dot(&program());
        assert!(dot.contains("s0_n0 -> s0_n1 [style=dotted];"));
        assert!(dot.contains("label=\"A[i]\""));
        assert!(dot.contains("s0_anchor -> s1_anchor [ltail=cluster_s0, lhead=cluster_s1, label=\"N > 0\\nk = 1\""));
    }

    #[test]
    fn deterministic_output() {
        assert_eq!(emit_dot(&program()), emit_dot(&program()));
    }
}
