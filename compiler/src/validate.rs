// validate.rs — Structural, bounds, symbol and conflict checks
//
// Checks a program without modifying it and returns every problem found as
// a `Diagnostic`. Checks run per state in a fixed order: data references,
// scope structure, connector balance, subset bounds, symbol scoping, then
// write conflicts. Volume consistency runs once over the whole program.
//
// Preconditions: none; any `Sdfg` value may be validated.
// Postconditions: an empty result means the program is well formed. The
//                 same input always yields the same diagnostics, in order.
// Failure modes: none; every problem becomes a `Diagnostic`.
// Side effects: none (logs a summary at debug level).

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::data::Data;
use crate::diag::codes;
use crate::diag::{DiagCode, DiagKind, Diagnostic, Location};
use crate::dtypes::ScheduleType;
use crate::error::SymbolError;
use crate::graph::{Edge, NodeKind, State};
use crate::id::{NodeId, StateId};
use crate::memlet::Memlet;
use crate::propagate::{derived_volumes, trip_count};
use crate::schedule::resolve_state;
use crate::sdfg::Sdfg;
use crate::state_index::StateIndex;
use crate::subset::Subset;
use crate::symbolic::Expr;

// ── Options ─────────────────────────────────────────────────────────────────

/// Depth of the write-conflict analysis.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum WcrAnalysis {
    /// No conflict checks.
    Off,
    /// Report writes that provably collide.
    #[default]
    Provable,
    /// Also warn about writes that might overlap.
    Conservative,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationOptions {
    pub wcr_analysis: WcrAnalysis,
    /// Compare declared boundary volumes with derived ones.
    pub check_volumes: bool,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        ValidationOptions {
            wcr_analysis: WcrAnalysis::Provable,
            check_volumes: true,
        }
    }
}

/// Bindings used to compare two volume expressions numerically.
const VOLUME_SAMPLES: [i64; 3] = [1, 32, 100];

// ── Public entry points ─────────────────────────────────────────────────────

pub fn validate(sdfg: &Sdfg) -> Vec<Diagnostic> {
    validate_with(sdfg, &ValidationOptions::default())
}

pub fn validate_with(sdfg: &Sdfg, options: &ValidationOptions) -> Vec<Diagnostic> {
    let mut ctx = ValidateCtx {
        sdfg,
        globals: sdfg.global_symbols(),
        diagnostics: Vec::new(),
    };
    ctx.check_program();
    for (sid, state) in sdfg.states() {
        let index = StateIndex::build(state);
        ctx.check_data(sid, state);
        ctx.check_structure(sid, state);
        ctx.check_connectors(sid, state, &index);
        ctx.check_bounds(sid, state);
        ctx.check_symbols(sid, state);
        if options.wcr_analysis != WcrAnalysis::Off {
            ctx.check_conflicts(sid, state, &index, options.wcr_analysis);
        }
    }
    if options.check_volumes {
        ctx.check_volumes();
    }
    debug!(
        states = sdfg.state_count(),
        diagnostics = ctx.diagnostics.len(),
        "validated program"
    );
    ctx.diagnostics
}

// ── Internal context ────────────────────────────────────────────────────────

struct ValidateCtx<'a> {
    sdfg: &'a Sdfg,
    globals: BTreeSet<String>,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> ValidateCtx<'a> {
    fn error(
        &mut self,
        kind: DiagKind,
        code: DiagCode,
        location: Location,
        message: String,
    ) -> &mut Diagnostic {
        self.push(Diagnostic::error(kind, location, message).with_code(code))
    }

    fn warning(
        &mut self,
        kind: DiagKind,
        code: DiagCode,
        location: Location,
        message: String,
    ) -> &mut Diagnostic {
        self.push(Diagnostic::warning(kind, location, message).with_code(code))
    }

    fn push(&mut self, diag: Diagnostic) -> &mut Diagnostic {
        self.diagnostics.push(diag);
        let last = self.diagnostics.len() - 1;
        &mut self.diagnostics[last]
    }

    // ── Program level ───────────────────────────────────────────────────

    fn check_program(&mut self) {
        let sdfg = self.sdfg;
        match sdfg.start_state {
            Some(start) if sdfg.state(start).is_err() => {
                self.error(
                    DiagKind::Structural,
                    codes::E0111,
                    Location::Program,
                    format!("start state {start} does not exist"),
                );
            }
            None if sdfg.state_count() > 0 => {
                self.error(
                    DiagKind::Structural,
                    codes::E0111,
                    Location::Program,
                    "program has states but no start state".to_string(),
                );
            }
            _ => {}
        }

        for (i, edge) in sdfg.edges.iter().enumerate() {
            for s in [edge.src, edge.dst] {
                if sdfg.state(s).is_err() {
                    self.error(
                        DiagKind::Structural,
                        codes::E0111,
                        Location::InterstateEdge(i),
                        format!("transition {} -> {} references missing state {s}", edge.src, edge.dst),
                    );
                }
            }
            for (symbol, value) in &edge.assignments {
                // Assignment values may use operators outside the integer
                // expression language; only parsable ones are checked.
                let Ok(expr) = Expr::parse(value) else {
                    continue;
                };
                let unknown = self.undeclared(&expr.free_symbols(), &BTreeSet::new());
                if !unknown.is_empty() {
                    self.error(
                        DiagKind::Symbol,
                        codes::E0301,
                        Location::InterstateEdge(i),
                        format!("assignment `{symbol} = {value}` uses {}", undeclared_list(&unknown)),
                    );
                }
            }
        }

        for (name, desc) in sdfg.arrays.iter() {
            let unknown = self.undeclared(&desc.free_symbols(), &BTreeSet::new());
            if !unknown.is_empty() {
                self.error(
                    DiagKind::Symbol,
                    codes::E0301,
                    Location::Program,
                    format!("shape of `{name}` uses {}", undeclared_list(&unknown)),
                )
                .hint = Some("declare the symbol on the program".to_string());
            }
        }
    }

    // ── Check 1: data references ────────────────────────────────────────

    fn check_data(&mut self, sid: StateId, state: &State) {
        let sdfg = self.sdfg;
        let arrays = &sdfg.arrays;
        let mut missing = Vec::new();
        for node in state.data_nodes() {
            if let Some(data) = node.data() {
                if !arrays.contains(data) {
                    missing.push((Location::Node(sid, node.id), data.to_string()));
                }
            }
        }
        for edge in state.edges() {
            if let Some(m) = &edge.memlet {
                if !arrays.contains(&m.data) {
                    missing.push((Location::Edge(sid, edge.id), m.data.clone()));
                }
            }
        }
        for (location, data) in missing {
            self.error(
                DiagKind::Structural,
                codes::E0101,
                location,
                format!("`{data}` is not a declared data container"),
            );
        }
    }

    // ── Check 2: scope structure ────────────────────────────────────────

    fn check_structure(&mut self, sid: StateId, state: &State) {
        for node in state.nodes() {
            let here = Location::Node(sid, node.id);
            if let Some(scope) = node.scope {
                if !state.is_entry(scope) {
                    self.error(
                        DiagKind::Structural,
                        codes::E0103,
                        here,
                        format!("scope of {} is {scope}, which is not a MapEntry", node.id),
                    );
                }
            }
            match &node.kind {
                NodeKind::MapEntry { map, exit, .. } => {
                    if on_scope_cycle(state, node.id) {
                        self.error(
                            DiagKind::Structural,
                            codes::E0103,
                            here,
                            format!("map `{}` is nested inside itself", map.label),
                        );
                    }
                    if state.entry_of(*exit) != Some(node.id) {
                        self.error(
                            DiagKind::Structural,
                            codes::E0102,
                            here,
                            format!("map entry `{}` has no matching exit", map.label),
                        );
                    } else if state.scope_of(*exit) != node.scope {
                        self.error(
                            DiagKind::Structural,
                            codes::E0102,
                            here,
                            format!("entry and exit of map `{}` sit in different scopes", map.label),
                        )
                        .related
                        .push(crate::diag::RelatedLocation {
                            location: Location::Node(sid, *exit),
                            label: "exit here".to_string(),
                        });
                    }
                    if map.params.is_empty() || map.params.len() != map.range.len() {
                        self.error(
                            DiagKind::Structural,
                            codes::E0110,
                            here,
                            format!(
                                "map `{}` has {} parameter(s) but {} range dimension(s)",
                                map.label,
                                map.params.len(),
                                map.range.len()
                            ),
                        );
                    }
                }
                NodeKind::MapExit { entry, .. } => {
                    if state.exit_of(*entry) != Some(node.id) {
                        self.error(
                            DiagKind::Structural,
                            codes::E0102,
                            here,
                            format!("map exit {} has no matching entry", node.id),
                        );
                    }
                }
                _ => {}
            }
        }

        for edge in state.edges() {
            let here = Location::Edge(sid, edge.id);
            let missing: Vec<String> = [edge.src, edge.dst]
                .into_iter()
                .filter(|n| state.node(*n).is_none())
                .map(|n| n.to_string())
                .collect();
            if !missing.is_empty() {
                self.error(
                    DiagKind::Structural,
                    codes::E0109,
                    here,
                    format!("edge references missing node(s) {}", missing.join(", ")),
                );
                continue;
            }
            let (from, to) = (state.out_scope(edge.src), state.in_scope(edge.dst));
            if from != to {
                self.error(
                    DiagKind::Structural,
                    codes::E0104,
                    here,
                    format!(
                        "edge {} -> {} leaves {} but enters {}",
                        edge.src,
                        edge.dst,
                        scope_name(state, from),
                        scope_name(state, to)
                    ),
                )
                .hint = Some("route the edge through the map's entry or exit".to_string());
            }
        }

        if state.topological_order().is_none() {
            self.error(
                DiagKind::Structural,
                codes::E0112,
                Location::State(sid),
                format!("dataflow of state `{}` has a cycle", state.label),
            );
        }
    }

    // ── Check 3: connector balance ──────────────────────────────────────

    fn check_connectors(&mut self, sid: StateId, state: &State, index: &StateIndex) {
        for node in state.nodes() {
            let here = Location::Node(sid, node.id);
            let mut counts = Vec::new();
            if let Some(ins) = node.kind.in_connectors() {
                for conn in ins.keys() {
                    counts.push(("input", conn, index.bound_in(state, node.id, conn).len()));
                }
            }
            if let Some(outs) = node.kind.out_connectors() {
                for conn in outs.keys() {
                    counts.push(("output", conn, index.bound_out(state, node.id, conn).len()));
                }
            }
            for (side, conn, n) in counts {
                match n {
                    1 => {}
                    0 => {
                        self.error(
                            DiagKind::Structural,
                            codes::E0105,
                            here,
                            format!("{side} connector `{conn}` of {} is not connected", node.id),
                        );
                    }
                    _ => {
                        self.error(
                            DiagKind::Structural,
                            codes::E0106,
                            here,
                            format!("{side} connector `{conn}` of {} has {n} edges", node.id),
                        );
                    }
                }
            }

            if let NodeKind::MapEntry {
                in_connectors,
                out_connectors,
                ..
            }
            | NodeKind::MapExit {
                in_connectors,
                out_connectors,
                ..
            } = &node.kind
            {
                let unmatched_in = in_connectors.keys().filter_map(|c| {
                    let base = c.strip_prefix("IN_")?;
                    (!out_connectors.contains_key(&format!("OUT_{base}"))).then(|| c.clone())
                });
                let unmatched_out = out_connectors.keys().filter_map(|c| {
                    let base = c.strip_prefix("OUT_")?;
                    (!in_connectors.contains_key(&format!("IN_{base}"))).then(|| c.clone())
                });
                let unmatched: Vec<String> = unmatched_in.chain(unmatched_out).collect();
                for conn in unmatched {
                    self.error(
                        DiagKind::Structural,
                        codes::E0108,
                        here,
                        format!("connector `{conn}` of {} has no counterpart across the scope", node.id),
                    );
                }
            }
        }

        for edge in state.edges() {
            let ends = [
                (edge.src, edge.src_conn.as_deref(), false),
                (edge.dst, edge.dst_conn.as_deref(), true),
            ];
            for (node_id, conn, input) in ends {
                let (Some(conn), Some(node)) = (conn, state.node(node_id)) else {
                    continue;
                };
                let declared = if input {
                    node.kind.in_connectors()
                } else {
                    node.kind.out_connectors()
                };
                if !declared.is_some_and(|c| c.contains_key(conn)) {
                    self.error(
                        DiagKind::Structural,
                        codes::E0107,
                        Location::Edge(sid, edge.id),
                        format!(
                            "edge binds connector `{conn}`, which {} ({}) does not declare",
                            node_id,
                            node.kind.type_name()
                        ),
                    );
                }
            }
        }
    }

    // ── Check 4: bounds ─────────────────────────────────────────────────

    fn check_bounds(&mut self, sid: StateId, state: &State) {
        let sdfg = self.sdfg;
        let arrays = &sdfg.arrays;
        for edge in state.edges() {
            let Some(m) = &edge.memlet else {
                continue;
            };
            let here = Location::Edge(sid, edge.id);
            if let Some(desc) = arrays.get(&m.data) {
                self.check_subset(here, &m.data, &m.subset, desc, m.allow_oob);
            }
            if let Some(other) = &m.other_subset {
                if let Some((name, desc)) = other_end(sdfg, state, edge, m) {
                    self.check_subset(here, name, other, desc, m.allow_oob);
                }
            }
        }
    }

    fn check_subset(
        &mut self,
        location: Location,
        data: &str,
        subset: &Subset,
        desc: &Data,
        allow_oob: bool,
    ) {
        if subset.rank() != desc.rank() {
            self.error(
                DiagKind::Bounds,
                codes::E0202,
                location,
                format!(
                    "subset [{subset}] of `{data}` has rank {} but the container has rank {}",
                    subset.rank(),
                    desc.rank()
                ),
            );
            return;
        }
        if allow_oob {
            return;
        }
        for v in subset.bounds_violations(&desc.shape) {
            self.error(
                DiagKind::Bounds,
                codes::E0201,
                location,
                format!(
                    "`{data}[{subset}]` is out of bounds in dimension {}: {} exceeds extent {}",
                    v.dim, v.range, v.extent
                ),
            )
            .hint = Some("set allow_oob on the memlet if the access is intended".to_string());
        }
    }

    // ── Check 5: symbols ────────────────────────────────────────────────

    fn check_symbols(&mut self, sid: StateId, state: &State) {
        for entry in state.map_entries() {
            let Some(map) = state.map_of(entry) else {
                continue;
            };
            let here = Location::Node(sid, entry);
            let outer = enclosing_params(state, state.scope_of(entry));

            let mut seen = BTreeSet::new();
            for p in &map.params {
                let shadowed = if self.globals.contains(p) {
                    Some("a program symbol")
                } else if outer.contains(p) {
                    Some("a parameter of an enclosing map")
                } else if !seen.insert(p) {
                    Some("another parameter of the same map")
                } else {
                    None
                };
                if let Some(what) = shadowed {
                    self.error(
                        DiagKind::Symbol,
                        codes::E0303,
                        here,
                        format!("parameter `{p}` of map `{}` shadows {what}", map.label),
                    );
                }
            }

            let used: BTreeSet<String> = map.range.iter().flat_map(|r| r.free_symbols()).collect();
            let unknown = self.undeclared(&used, &outer);
            if !unknown.is_empty() {
                self.error(
                    DiagKind::Symbol,
                    codes::E0301,
                    here,
                    format!("range of map `{}` uses {}", map.label, undeclared_list(&unknown)),
                );
            }
            if let Err(SymbolError::DivisionByZero(text)) = trip_count(map) {
                self.error(
                    DiagKind::Symbol,
                    codes::E0302,
                    here,
                    format!("range of map `{}` divides by zero in `{text}`", map.label),
                )
                .hint = Some("map steps must be non-zero".to_string());
            }
        }

        for edge in state.edges() {
            let Some(m) = &edge.memlet else {
                continue;
            };
            let here = Location::Edge(sid, edge.id);
            let params = enclosing_params(state, state.edge_scope(edge));
            let unknown = self.undeclared(&m.free_symbols(), &params);
            if !unknown.is_empty() {
                self.error(
                    DiagKind::Symbol,
                    codes::E0301,
                    here,
                    format!("memlet `{m}` uses {}", undeclared_list(&unknown)),
                );
            }
            let zero_div = [m.subset.num_elements().err(), m.volume.simplify().err()]
                .into_iter()
                .flatten()
                .find_map(|e| match e {
                    SymbolError::DivisionByZero(text) => Some(text),
                    _ => None,
                });
            if let Some(text) = zero_div {
                self.error(
                    DiagKind::Symbol,
                    codes::E0302,
                    here,
                    format!("memlet `{m}` divides by zero in `{text}`"),
                );
            }
        }
    }

    /// Symbols of `used` that are neither program-wide nor in `params`.
    fn undeclared(&self, used: &BTreeSet<String>, params: &BTreeSet<String>) -> Vec<String> {
        used.iter()
            .filter(|s| !self.globals.contains(*s) && !params.contains(*s))
            .cloned()
            .collect()
    }

    // ── Check 6: volume consistency ─────────────────────────────────────

    fn check_volumes(&mut self) {
        // A failure here is a zero step or an undeclared container, both
        // reported by earlier checks.
        let Ok(derived) = derived_volumes(self.sdfg) else {
            return;
        };
        let sdfg = self.sdfg;
        for ((sid, eid), volume) in derived {
            let Some(m) = sdfg
                .state(sid)
                .ok()
                .and_then(|s| s.edge(eid))
                .and_then(|e| e.memlet.as_ref())
            else {
                continue;
            };
            if m.dynamic || !volumes_differ(&m.volume, &volume) {
                continue;
            }
            self.warning(
                DiagKind::Structural,
                codes::W0601,
                Location::Edge(sid, eid),
                format!(
                    "memlet `{m}` declares volume {} but the scope moves {volume}",
                    m.volume
                ),
            )
            .hint = Some("run memlet propagation to rederive boundary memlets".to_string());
        }
    }

    // ── Check 7: write conflicts ────────────────────────────────────────

    fn check_conflicts(
        &mut self,
        sid: StateId,
        state: &State,
        index: &StateIndex,
        depth: WcrAnalysis,
    ) {
        let schedules = resolve_state(state);

        // Writes leaving a parallel map that every iteration aims at the
        // same elements.
        for edge in state.edges() {
            let Some(m) = &edge.memlet else {
                continue;
            };
            if m.wcr.is_some() || state.is_exit(edge.src) {
                continue;
            }
            let Some(entry) = state.entry_of(edge.dst) else {
                continue;
            };
            let used = m.subset.free_symbols();
            let mut chain = state.scope_path(entry);
            chain.push(entry);
            for e in chain.iter().rev() {
                let (Some(map), Some(schedule)) = (state.map_of(*e), schedules.get(e)) else {
                    continue;
                };
                if *schedule == ScheduleType::Sequential
                    || map.params.iter().any(|p| used.contains(p))
                    || trip_count(map).is_ok_and(|t| t.is_int(1))
                {
                    continue;
                }
                self.error(
                    DiagKind::Conflict,
                    codes::E0501,
                    Location::Edge(sid, edge.id),
                    format!(
                        "every iteration of {schedule} map `{}` writes `{m}` without write-conflict resolution",
                        map.label
                    ),
                )
                .with_related_node(sid, *e, "parallel map")
                .hint = Some(
                    "add a reduction (e.g. Sum) to the memlet or index it by the map parameters"
                        .to_string(),
                );
                break;
            }
        }

        // Unordered tasklets writing the same container in the same scope.
        let mut writes: BTreeMap<(Option<NodeId>, &str), Vec<&Edge>> = BTreeMap::new();
        for edge in state.edges() {
            let Some(m) = &edge.memlet else {
                continue;
            };
            let from_tasklet = state
                .node(edge.src)
                .is_some_and(|n| matches!(n.kind, NodeKind::Tasklet { .. }));
            if m.wcr.is_none() && from_tasklet {
                writes
                    .entry((state.in_scope(edge.dst), m.data.as_str()))
                    .or_default()
                    .push(edge);
            }
        }
        for group in writes.values() {
            for (i, a) in group.iter().enumerate() {
                for b in &group[i + 1..] {
                    if a.src == b.src
                        || reaches(state, index, a.src, b.src)
                        || reaches(state, index, b.src, a.src)
                    {
                        continue;
                    }
                    let (Some(ma), Some(mb)) = (&a.memlet, &b.memlet) else {
                        continue;
                    };
                    if ma.subset == mb.subset {
                        self.error(
                            DiagKind::Conflict,
                            codes::E0501,
                            Location::Edge(sid, b.id),
                            format!(
                                "tasklets {} and {} both write `{mb}` without write-conflict resolution",
                                a.src, b.src
                            ),
                        )
                        .with_related_edge(sid, a, "first write");
                    } else if depth == WcrAnalysis::Conservative
                        && !ma.subset.is_provably_disjoint(&mb.subset)
                    {
                        self.warning(
                            DiagKind::Conflict,
                            codes::W0602,
                            Location::Edge(sid, b.id),
                            format!("write `{mb}` may overlap write `{ma}`"),
                        )
                        .with_related_edge(sid, a, "other write");
                    }
                }
            }
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────────

trait RelatedExt {
    fn with_related_node(&mut self, sid: StateId, node: NodeId, label: &str) -> &mut Self;
    fn with_related_edge(&mut self, sid: StateId, edge: &Edge, label: &str) -> &mut Self;
}

impl RelatedExt for Diagnostic {
    fn with_related_node(&mut self, sid: StateId, node: NodeId, label: &str) -> &mut Self {
        self.related.push(crate::diag::RelatedLocation {
            location: Location::Node(sid, node),
            label: label.to_string(),
        });
        self
    }

    fn with_related_edge(&mut self, sid: StateId, edge: &Edge, label: &str) -> &mut Self {
        self.related.push(crate::diag::RelatedLocation {
            location: Location::Edge(sid, edge.id),
            label: label.to_string(),
        });
        self
    }
}

/// True if `entry` reaches itself by following scope references.
fn on_scope_cycle(state: &State, entry: NodeId) -> bool {
    let mut seen = BTreeSet::new();
    let mut cur = state.scope_of(entry);
    while let Some(s) = cur {
        if s == entry {
            return true;
        }
        if !seen.insert(s) {
            return false;
        }
        cur = state.scope_of(s);
    }
    false
}

/// Parameters of the map opened by `scope` and of every map around it.
fn enclosing_params(state: &State, scope: Option<NodeId>) -> BTreeSet<String> {
    let Some(entry) = scope else {
        return BTreeSet::new();
    };
    let mut chain = state.scope_path(entry);
    chain.push(entry);
    chain
        .iter()
        .filter_map(|e| state.map_of(*e))
        .flat_map(|m| m.params.iter().cloned())
        .collect()
}

fn scope_name(state: &State, scope: Option<NodeId>) -> String {
    match scope {
        Some(e) => format!("map `{}` ({e})", state.label_of(e)),
        None => "the top level".to_string(),
    }
}

fn undeclared_list(names: &[String]) -> String {
    let quoted: Vec<String> = names.iter().map(|n| format!("`{n}`")).collect();
    let noun = if names.len() == 1 { "symbol" } else { "symbols" };
    format!("undeclared {noun} {}", quoted.join(", "))
}

/// The container on the far end of a copy edge, for `other_subset`.
fn other_end<'s>(
    sdfg: &'s Sdfg,
    state: &'s State,
    edge: &Edge,
    m: &Memlet,
) -> Option<(&'s str, &'s Data)> {
    let src = state.node(edge.src).and_then(|n| n.data());
    let dst = state.node(edge.dst).and_then(|n| n.data());
    let name = if src == Some(m.data.as_str()) { dst } else { src }?;
    sdfg.arrays.get(name).map(|d| (name, d))
}

fn reaches(state: &State, index: &StateIndex, from: NodeId, to: NodeId) -> bool {
    let mut seen = BTreeSet::from([from]);
    let mut queue = VecDeque::from([from]);
    while let Some(n) = queue.pop_front() {
        for e in index.out_edges(state, n) {
            if e.dst == to {
                return true;
            }
            if seen.insert(e.dst) {
                queue.push_back(e.dst);
            }
        }
    }
    false
}

/// True if the two volumes evaluate to different integers for some sample
/// binding of their free symbols.
fn volumes_differ(a: &Expr, b: &Expr) -> bool {
    let mut symbols = a.free_symbols();
    symbols.extend(b.free_symbols());
    VOLUME_SAMPLES.iter().any(|&v| {
        let bindings: HashMap<String, i64> = symbols.iter().map(|s| (s.clone(), v)).collect();
        matches!(
            (a.evaluate(&bindings), b.evaluate(&bindings)),
            (Ok(x), Ok(y)) if x != y
        )
    })
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtypes::{ElementType, StorageType};
    use crate::graph::Map;
    use crate::memlet::Wcr;
    use crate::propagate::propagate_sdfg;
    use crate::sdfg::InterstateEdge;

    struct Ids {
        sid: StateId,
        a: NodeId,
        b: NodeId,
        me: NodeId,
        mx: NodeId,
        t: NodeId,
    }

    fn range(text: &str) -> crate::subset::Range {
        Subset::parse(text).unwrap().dims.remove(0)
    }

    /// A[read] -> map i in 0:N -> tasklet -> B[write]
    fn build(read: Memlet, write: Memlet, schedule: ScheduleType, propagate: bool) -> (Sdfg, Ids) {
        let mut p = Sdfg::new("p");
        p.add_symbol("N", ElementType::Int32);
        for name in ["A", "B"] {
            p.add_array(name, vec![Expr::sym("N")], ElementType::Float64, StorageType::Default)
                .unwrap();
        }
        let sid = p.add_state("s");
        let st = p.state_mut(sid).unwrap();
        let a = st.add_access("A", None);
        let b = st.add_access("B", None);
        let (me, mx) = st.add_map(Map::new("m", vec![("i".into(), range("0:N"))], schedule), None);
        let t = st.add_tasklet("t", &["x"], &["y"], "y = x + 1", Some(me));
        st.add_memlet_path(&[a, me, t], read, None, Some("x")).unwrap();
        st.add_memlet_path(&[t, mx, b], write, Some("y"), None).unwrap();
        if propagate {
            propagate_sdfg(&mut p).unwrap();
        }
        (p, Ids { sid, a, b, me, mx, t })
    }

    fn good() -> (Sdfg, Ids) {
        build(
            Memlet::parse("A", "i").unwrap(),
            Memlet::parse("B", "i").unwrap(),
            ScheduleType::Default,
            true,
        )
    }

    fn codes_of(diags: &[Diagnostic]) -> Vec<&'static str> {
        diags.iter().filter_map(|d| d.code.map(|c| c.0)).collect()
    }

    fn has(diags: &[Diagnostic], code: DiagCode) -> bool {
        diags.iter().any(|d| d.code == Some(code))
    }

    #[test]
    fn well_formed_program_has_no_diagnostics() {
        let (p, _) = good();
        let diags = validate(&p);
        assert!(diags.is_empty(), "{:?}", codes_of(&diags));
    }

    #[test]
    fn validation_is_idempotent() {
        let (mut p, ids) = good();
        p.state_mut(ids.sid).unwrap().add_access("C", None);
        let first = codes_of(&validate(&p));
        let second = codes_of(&validate(&p));
        assert_eq!(first, second);
        assert_eq!(first, vec!["E0101"]);
    }

    #[test]
    fn unknown_memlet_data_is_reported_on_the_edge() {
        let (p, _) = build(
            Memlet::parse("Z", "i").unwrap(),
            Memlet::parse("B", "i").unwrap(),
            ScheduleType::Sequential,
            false,
        );
        let diags = validate(&p);
        assert!(diags
            .iter()
            .any(|d| d.code == Some(codes::E0101) && matches!(d.location, Location::Edge(..))));
    }

    #[test]
    fn edge_bypassing_map_entry_is_rejected() {
        let (mut p, ids) = good();
        let st = p.state_mut(ids.sid).unwrap();
        let a2 = st.add_access("A", None);
        st.add_edge(a2, None, ids.t, Some("x"), Some(Memlet::parse("A", "0").unwrap()))
            .unwrap();
        let diags = validate(&p);
        let d = diags
            .iter()
            .find(|d| d.code == Some(codes::E0104))
            .expect("scope crossing");
        assert_eq!(d.kind, DiagKind::Structural);
        assert!(d.message.contains("the top level"));
        assert!(has(&diags, codes::E0106));
    }

    #[test]
    fn scope_pointing_at_non_entry_is_rejected() {
        let (mut p, ids) = good();
        p.state_mut(ids.sid).unwrap().node_mut(ids.t).unwrap().scope = Some(ids.a);
        assert!(has(&validate(&p), codes::E0103));
    }

    #[test]
    fn cyclic_scope_nesting_is_rejected() {
        let (mut p, ids) = good();
        let st = p.state_mut(ids.sid).unwrap();
        let (inner, _) = st.add_map(
            Map::new("n", vec![("j".into(), range("0:4"))], ScheduleType::Sequential),
            Some(ids.me),
        );
        st.node_mut(ids.me).unwrap().scope = Some(inner);
        let diags = validate(&p);
        assert!(diags
            .iter()
            .any(|d| d.code == Some(codes::E0103) && d.message.contains("inside itself")));
    }

    #[test]
    fn unpaired_exit_is_rejected() {
        let (mut p, ids) = good();
        p.state_mut(ids.sid).unwrap().add_node(
            NodeKind::MapExit {
                entry: NodeId(99),
                in_connectors: Default::default(),
                out_connectors: Default::default(),
            },
            None,
        );
        assert!(has(&validate(&p), codes::E0102));
    }

    #[test]
    fn param_range_arity_mismatch() {
        let (mut p, ids) = good();
        let map = Map {
            label: "bad".into(),
            params: vec!["u".into(), "v".into()],
            range: vec![range("0:N")],
            schedule: ScheduleType::Sequential,
        };
        p.state_mut(ids.sid).unwrap().add_map(map, None);
        assert!(has(&validate(&p), codes::E0110));
    }

    #[test]
    fn missing_state_in_transition() {
        let (mut p, ids) = good();
        p.edges.push(InterstateEdge::new(ids.sid, StateId(7)));
        let diags = validate(&p);
        assert!(diags
            .iter()
            .any(|d| d.code == Some(codes::E0111) && d.location == Location::InterstateEdge(0)));
    }

    #[test]
    fn dataflow_cycle_is_rejected() {
        let (mut p, ids) = good();
        p.state_mut(ids.sid)
            .unwrap()
            .add_edge(ids.b, None, ids.a, None, None)
            .unwrap();
        let diags = validate(&p);
        assert!(diags
            .iter()
            .any(|d| d.code == Some(codes::E0112) && d.location == Location::State(ids.sid)));
    }

    #[test]
    fn unbound_connector() {
        let (mut p, ids) = good();
        p.state_mut(ids.sid)
            .unwrap()
            .add_tasklet("lonely", &["q"], &[], "", Some(ids.me));
        assert!(has(&validate(&p), codes::E0105));
    }

    #[test]
    fn undeclared_connector_binding() {
        let (mut p, ids) = good();
        p.state_mut(ids.sid)
            .unwrap()
            .add_edge(ids.a, None, ids.b, Some("q"), None)
            .unwrap();
        assert!(has(&validate(&p), codes::E0107));
    }

    #[test]
    fn unmirrored_bracket_connector() {
        let (mut p, ids) = good();
        p.state_mut(ids.sid)
            .unwrap()
            .declare_connector(ids.mx, "OUT_C", false);
        let diags = validate(&p);
        assert!(has(&diags, codes::E0108));
        assert!(has(&diags, codes::E0105));
    }

    #[test]
    fn provable_out_of_bounds_read() {
        let (p, _) = build(
            Memlet::parse("A", "N").unwrap(),
            Memlet::parse("B", "i").unwrap(),
            ScheduleType::Sequential,
            false,
        );
        let diags = validate(&p);
        let d = diags
            .iter()
            .find(|d| d.code == Some(codes::E0201))
            .expect("out of bounds");
        assert_eq!(d.kind, DiagKind::Bounds);
        assert!(d.hint.is_some());
    }

    #[test]
    fn allow_oob_suppresses_bounds_error() {
        let (p, _) = build(
            Memlet::parse("A", "N").unwrap().allow_oob(),
            Memlet::parse("B", "i").unwrap(),
            ScheduleType::Sequential,
            false,
        );
        assert!(!has(&validate(&p), codes::E0201));
    }

    #[test]
    fn shifted_index_is_not_provably_out_of_bounds() {
        let (p, _) = build(
            Memlet::parse("A", "i + 1").unwrap(),
            Memlet::parse("B", "i").unwrap(),
            ScheduleType::Sequential,
            true,
        );
        assert!(!has(&validate(&p), codes::E0201));
    }

    #[test]
    fn rank_mismatch() {
        let (p, _) = build(
            Memlet::parse("A", "i, 0").unwrap(),
            Memlet::parse("B", "i").unwrap(),
            ScheduleType::Sequential,
            false,
        );
        assert!(has(&validate(&p), codes::E0202));
    }

    #[test]
    fn undeclared_symbol_in_subset() {
        let (p, ids) = build(
            Memlet::parse("A", "i").unwrap(),
            Memlet::parse("B", "i + M").unwrap(),
            ScheduleType::Sequential,
            false,
        );
        let diags = validate(&p);
        let st = p.state(ids.sid).unwrap();
        let inner = st.in_edges(ids.mx)[0].id;
        let d = diags
            .iter()
            .find(|d| d.location == Location::Edge(ids.sid, inner))
            .expect("inner write diagnostic");
        assert_eq!(d.code, Some(codes::E0301));
        assert!(d.message.contains("`M`"));
    }

    #[test]
    fn map_param_outside_its_scope() {
        // Without propagation the outer edge still carries `A[i]`.
        let (p, ids) = build(
            Memlet::parse("A", "i").unwrap(),
            Memlet::parse("B", "i").unwrap(),
            ScheduleType::Sequential,
            false,
        );
        let st = p.state(ids.sid).unwrap();
        let outer = st.in_edges(ids.me)[0].id;
        assert!(validate(&p)
            .iter()
            .any(|d| d.code == Some(codes::E0301) && d.location == Location::Edge(ids.sid, outer)));
    }

    #[test]
    fn shadowing_param() {
        let (mut p, ids) = good();
        p.state_mut(ids.sid).unwrap().add_map(
            Map::new("inner", vec![("i".into(), range("0:4"))], ScheduleType::Sequential),
            Some(ids.me),
        );
        assert!(has(&validate(&p), codes::E0303));
    }

    #[test]
    fn zero_step_range() {
        let (mut p, ids) = good();
        p.state_mut(ids.sid).unwrap().add_map(
            Map::new("z", vec![("k".into(), range("0:N:0"))], ScheduleType::Sequential),
            None,
        );
        assert!(has(&validate(&p), codes::E0302));
    }

    #[test]
    fn stale_boundary_volume_warns() {
        let (p, _) = build(
            Memlet::parse("A", "i").unwrap(),
            Memlet::parse("B", "i").unwrap(),
            ScheduleType::Sequential,
            false,
        );
        let diags = validate(&p);
        assert!(diags
            .iter()
            .any(|d| d.code == Some(codes::W0601) && !d.is_error()));

        let quiet = ValidationOptions {
            check_volumes: false,
            ..ValidationOptions::default()
        };
        assert!(!has(&validate_with(&p, &quiet), codes::W0601));
    }

    #[test]
    fn parallel_write_without_wcr() {
        let (p, ids) = build(
            Memlet::parse("A", "i").unwrap(),
            Memlet::parse("B", "0").unwrap(),
            ScheduleType::Default,
            true,
        );
        let diags = validate(&p);
        let d = diags
            .iter()
            .find(|d| d.code == Some(codes::E0501))
            .expect("conflict");
        assert_eq!(d.related[0].location, Location::Node(ids.sid, ids.me));

        let off = ValidationOptions {
            wcr_analysis: WcrAnalysis::Off,
            ..ValidationOptions::default()
        };
        assert!(!has(&validate_with(&p, &off), codes::E0501));
    }

    #[test]
    fn reduction_or_sequential_write_is_fine() {
        let (p, _) = build(
            Memlet::parse("A", "i").unwrap(),
            Memlet::parse("B", "0").unwrap().with_wcr(Wcr::Sum),
            ScheduleType::CpuMulticore,
            true,
        );
        assert!(!has(&validate(&p), codes::E0501));

        let (p, _) = build(
            Memlet::parse("A", "i").unwrap(),
            Memlet::parse("B", "0").unwrap(),
            ScheduleType::Sequential,
            true,
        );
        assert!(!has(&validate(&p), codes::E0501));
    }

    fn second_writer(p: &mut Sdfg, ids: &Ids, subset: &str) {
        let st = p.state_mut(ids.sid).unwrap();
        let t2 = st.add_tasklet("t2", &[], &["z"], "z = 0", Some(ids.me));
        st.add_memlet_path(&[t2, ids.mx, ids.b], Memlet::parse("B", subset).unwrap(), Some("z"), None)
            .unwrap();
        propagate_sdfg(p).unwrap();
    }

    #[test]
    fn identical_unordered_writes_conflict() {
        let (mut p, ids) = good();
        second_writer(&mut p, &ids, "i");
        let diags = validate(&p);
        let d = diags
            .iter()
            .find(|d| d.code == Some(codes::E0501))
            .expect("duplicate write");
        assert!(d.message.contains(&ids.t.to_string()));
    }

    #[test]
    fn possible_overlap_only_in_conservative_mode() {
        let (mut p, ids) = good();
        second_writer(&mut p, &ids, "N - 1 - i");
        assert!(!has(&validate(&p), codes::W0602));
        let conservative = ValidationOptions {
            wcr_analysis: WcrAnalysis::Conservative,
            ..ValidationOptions::default()
        };
        assert!(has(&validate_with(&p, &conservative), codes::W0602));
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let opts: ValidationOptions =
            serde_json::from_str(r#"{ "wcr_analysis": "conservative" }"#).unwrap();
        assert_eq!(opts.wcr_analysis, WcrAnalysis::Conservative);
        assert!(opts.check_volumes);
    }
}
