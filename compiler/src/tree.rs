// tree.rs — Textual schedule tree of a lowered program
//
// Renders the execution plan as an indented tree: one block per state in
// control-flow order, map scopes as `map` blocks, copies as assignments and
// tasklets with their memlets, followed by the state's outgoing transitions
// (`assign`, `goto`, and `stateif` blocks for conditional edges).
//
// Preconditions: the plan was lowered from `sdfg`.
// Postconditions: `ScheduleTree::as_string` is deterministic for a program.
// Side effects: none.

use std::fmt;

use crate::graph::State;
use crate::id::{NodeId, StateId};
use crate::lower::{ExecutionPlan, PlanItem};
use crate::sdfg::Sdfg;
use crate::subset::{Range, Subset};

#[derive(Debug, Clone, PartialEq)]
pub enum TreeNode {
    State {
        label: String,
        children: Vec<TreeNode>,
    },
    Map {
        params: Vec<String>,
        range: Vec<Range>,
        children: Vec<TreeNode>,
    },
    Copy {
        src: String,
        dst: String,
        src_subset: Subset,
        dst_subset: Subset,
    },
    Tasklet {
        label: String,
        inputs: Vec<String>,
        outputs: Vec<String>,
    },
    Assign {
        symbol: String,
        value: String,
    },
    Goto {
        target: String,
    },
    StateIf {
        condition: String,
        children: Vec<TreeNode>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleTree {
    pub name: String,
    pub roots: Vec<TreeNode>,
}

impl ScheduleTree {
    pub fn as_string(&self) -> String {
        self.to_string()
    }
}

pub fn build_schedule_tree(sdfg: &Sdfg, plan: &ExecutionPlan) -> ScheduleTree {
    let order: Vec<StateId> = plan.states.iter().map(|s| s.id).collect();
    let mut roots = Vec::new();
    for (pos, sp) in plan.states.iter().enumerate() {
        let Ok(state) = sdfg.state(sp.id) else {
            continue;
        };
        let mut children = items(state, &sp.body);
        children.extend(transitions(sdfg, sp.id, order.get(pos + 1).copied()));
        roots.push(TreeNode::State {
            label: sp.label.clone(),
            children,
        });
    }
    ScheduleTree {
        name: sdfg.name.clone(),
        roots,
    }
}

fn items(state: &State, body: &[PlanItem]) -> Vec<TreeNode> {
    body.iter()
        .map(|item| match item {
            PlanItem::Kernel(k) => TreeNode::Map {
                params: k.params.clone(),
                range: k.grid.clone(),
                children: items(state, &k.body),
            },
            PlanItem::ThreadBlock(nest) | PlanItem::ParallelFor(nest) | PlanItem::Loop(nest) => {
                TreeNode::Map {
                    params: nest.params.clone(),
                    range: nest.range.clone(),
                    children: items(state, &nest.body),
                }
            }
            PlanItem::Tasklet { node, label } => tasklet(state, *node, label),
            PlanItem::Copy(c) => TreeNode::Copy {
                src: c.src.clone(),
                dst: c.dst.clone(),
                src_subset: c.src_subset.clone(),
                dst_subset: c.dst_subset.clone(),
            },
        })
        .collect()
}

fn tasklet(state: &State, node: NodeId, label: &str) -> TreeNode {
    let inputs = state
        .in_edges(node)
        .into_iter()
        .filter_map(|e| e.memlet.as_ref())
        .map(|m| format!("{}[{}]", m.data, m.subset))
        .collect();
    let outputs = state
        .out_edges(node)
        .into_iter()
        .filter_map(|e| e.memlet.as_ref())
        .map(|m| match &m.wcr {
            Some(wcr) => format!("{}[{}] ({wcr})", m.data, m.subset),
            None => format!("{}[{}]", m.data, m.subset),
        })
        .collect();
    TreeNode::Tasklet {
        label: label.to_string(),
        inputs,
        outputs,
    }
}

/// Outgoing control flow of `sid`. An unconditional edge without
/// assignments to the state that follows in order falls through silently.
fn transitions(sdfg: &Sdfg, sid: StateId, next: Option<StateId>) -> Vec<TreeNode> {
    let label = |id: StateId| {
        sdfg.state(id)
            .map(|s| s.label.clone())
            .unwrap_or_else(|_| id.to_string())
    };
    let mut out = Vec::new();
    for (_, edge) in sdfg.out_transitions(sid) {
        let mut body: Vec<TreeNode> = edge
            .assignments
            .iter()
            .map(|(symbol, value)| TreeNode::Assign {
                symbol: symbol.clone(),
                value: value.clone(),
            })
            .collect();
        if !(edge.is_unconditional() && Some(edge.dst) == next) {
            body.push(TreeNode::Goto {
                target: label(edge.dst),
            });
        }
        if edge.is_unconditional() {
            out.extend(body);
        } else {
            out.push(TreeNode::StateIf {
                condition: edge.condition.clone(),
                children: body,
            });
        }
    }
    out
}

// ── Display ─────────────────────────────────────────────────────────────────

impl fmt::Display for ScheduleTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for root in &self.roots {
            write_node(f, root, 0)?;
        }
        Ok(())
    }
}

fn write_node(f: &mut fmt::Formatter<'_>, node: &TreeNode, depth: usize) -> fmt::Result {
    let pad = "  ".repeat(depth);
    match node {
        TreeNode::State { label, children } => {
            writeln!(f, "{pad}state {label}:")?;
            write_children(f, children, depth)
        }
        TreeNode::Map {
            params,
            range,
            children,
        } => {
            let ranges: Vec<String> = range.iter().map(Range::to_string).collect();
            writeln!(f, "{pad}map {} in [{}]:", params.join(", "), ranges.join(", "))?;
            write_children(f, children, depth)
        }
        TreeNode::Copy {
            src,
            dst,
            src_subset,
            dst_subset,
        } => {
            if dst_subset == src_subset {
                writeln!(f, "{pad}{dst} = copy {src}[{src_subset}]")
            } else {
                writeln!(f, "{pad}{dst}[{dst_subset}] = copy {src}[{src_subset}]")
            }
        }
        TreeNode::Tasklet {
            label,
            inputs,
            outputs,
        } => {
            if outputs.is_empty() {
                writeln!(f, "{pad}tasklet {label}({})", inputs.join(", "))
            } else {
                writeln!(
                    f,
                    "{pad}{} = tasklet {label}({})",
                    outputs.join(", "),
                    inputs.join(", ")
                )
            }
        }
        TreeNode::Assign { symbol, value } => writeln!(f, "{pad}assign {symbol} = {value}"),
        TreeNode::Goto { target } => writeln!(f, "{pad}goto {target}"),
        TreeNode::StateIf {
            condition,
            children,
        } => {
            writeln!(f, "{pad}stateif {condition}:")?;
            write_children(f, children, depth)
        }
    }
}

fn write_children(f: &mut fmt::Formatter<'_>, children: &[TreeNode], depth: usize) -> fmt::Result {
    for c in children {
        write_node(f, c, depth + 1)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtypes::{ElementType, ScheduleType, StorageType};
    use crate::graph::Map;
    use crate::lower::{lower, LowerOptions};
    use crate::memlet::{Memlet, Wcr};
    use crate::propagate::propagate_sdfg;
    use crate::schedule::check_schedules;
    use crate::sdfg::InterstateEdge;
    use crate::symbolic::Expr;

    fn tree_of(p: &Sdfg) -> String {
        let sched = check_schedules(p);
        let lowered = lower(p, &sched.schedule, &LowerOptions::default());
        build_schedule_tree(p, &lowered.plan).as_string()
    }

    fn range(text: &str) -> Range {
        Subset::parse(text).unwrap().dims.remove(0)
    }

    #[test]
    fn copies_maps_and_tasklets() {
        let mut p = Sdfg::new("p");
        p.add_symbol("N", ElementType::Int32);
        let n = vec![Expr::sym("N")];
        p.add_array("A", n.clone(), ElementType::Float32, StorageType::CpuHeap).unwrap();
        p.add_transient("gpu_A", n, ElementType::Float32, StorageType::GpuGlobal).unwrap();
        p.add_scalar("s", ElementType::Float32).unwrap();
        let sid = p.add_state("main");
        let st = p.state_mut(sid).unwrap();
        let a = st.add_access("A", None);
        let ga = st.add_access("gpu_A", None);
        let out = st.add_access("s", None);
        st.add_edge(a, None, ga, None, Some(Memlet::parse("A", "0:N").unwrap()))
            .unwrap();
        let (me, mx) = st.add_map(
            Map::new("m", vec![("i".into(), range("0:N:32"))], ScheduleType::GpuDevice),
            None,
        );
        let t = st.add_tasklet("sum", &["x"], &["y"], "y = x", Some(me));
        st.add_memlet_path(&[ga, me, t], Memlet::parse("gpu_A", "i").unwrap(), None, Some("x"))
            .unwrap();
        st.add_memlet_path(
            &[t, mx, out],
            Memlet::parse("s", "0").unwrap().with_wcr(Wcr::Sum),
            Some("y"),
            None,
        )
        .unwrap();
        propagate_sdfg(&mut p).unwrap();

        assert_eq!(
            tree_of(&p),
            "state main:\n\
             \x20 gpu_A = copy A[0:N]\n\
             \x20 map i in [0:N:32]:\n\
             \x20   s[0] (Sum) = tasklet sum(gpu_A[i])\n"
        );
    }

    #[test]
    fn transitions_render_as_goto_and_stateif() {
        let mut p = Sdfg::new("loop");
        let init = p.add_state("init");
        let body = p.add_state("body");
        let done = p.add_state("done");
        p.add_interstate_edge(InterstateEdge::new(init, body).with_assignment("k", "0"))
            .unwrap();
        p.add_interstate_edge(
            InterstateEdge::new(body, body)
                .with_condition("k < 3")
                .with_assignment("k", "k + 1"),
        )
        .unwrap();
        p.add_interstate_edge(InterstateEdge::new(body, done).with_condition("k >= 3"))
            .unwrap();

        assert_eq!(
            tree_of(&p),
            "state init:\n\
             \x20 assign k = 0\n\
             state body:\n\
             \x20 stateif k < 3:\n\
             \x20   assign k = k + 1\n\
             \x20   goto body\n\
             \x20 stateif k >= 3:\n\
             \x20   goto done\n\
             state done:\n"
        );
    }
}
