// lower.rs — Schedule-aware lowering to an execution plan
//
// Walks each state's scope tree outside-in and turns it into a nested plan a
// backend can emit directly: device maps become kernel launches whose grid
// is the map's range, thread-block maps become per-unit work inside their
// kernel, sequential maps become loops and multicore maps parallel loops.
// Access-to-access edges become copies, with the transfer direction taken
// from the storage classes on either end. Transient containers receive an
// allocation site from their lifetime, hoisted outward until the enclosing
// schedule may allocate their storage class.
//
// Preconditions: the program validates; `ScheduledProgram` comes from
//                `schedule::check_schedules` on the same program.
// Postconditions: `LowerResult.plan` mentions every map exactly once and
//                 `LowerCert` obligations hold when no error is reported.
// Failure modes: device code touching host-only storage (and the converse)
//                or unallocatable transients produce E0402 diagnostics.
// Side effects: none.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::diag::codes;
use crate::diag::{DiagKind, Diagnostic, Location};
use crate::dtypes::{AllocationLifetime, MemorySide, ScheduleType, StorageType};
use crate::graph::{NodeKind, State};
use crate::id::{EdgeId, NodeId, StateId};
use crate::pass::StageCert;
use crate::schedule::{effective_schedule, ScheduledProgram, StateSchedules};
use crate::sdfg::Sdfg;
use crate::subset::{Range, Subset};
use crate::symbolic::Expr;

// ── Options ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LowerOptions {
    /// Report tasklets whose schedule cannot reach the storage they touch.
    pub check_storage: bool,
    /// Record weakly connected components of each state.
    pub record_components: bool,
}

impl Default for LowerOptions {
    fn default() -> Self {
        LowerOptions {
            check_storage: true,
            record_components: true,
        }
    }
}

// ── Output types ────────────────────────────────────────────────────────────

pub struct LowerResult {
    pub plan: ExecutionPlan,
    pub cert: LowerCert,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionPlan {
    pub name: String,
    pub allocations: Vec<Allocation>,
    pub states: Vec<StatePlan>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatePlan {
    pub id: StateId,
    pub label: String,
    /// Weakly connected components, which may run concurrently.
    pub components: Vec<Vec<NodeId>>,
    pub body: Vec<PlanItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlanItem {
    Kernel(Kernel),
    /// Work of one grid element, split among the threads of a block.
    ThreadBlock(LoopNest),
    ParallelFor(LoopNest),
    Loop(LoopNest),
    Tasklet { node: NodeId, label: String },
    Copy(DataCopy),
}

/// A device launch.
#[derive(Debug, Clone, PartialEq)]
pub struct Kernel {
    pub entry: NodeId,
    pub name: String,
    pub params: Vec<String>,
    pub grid: Vec<Range>,
    /// Containers read or written inside the launch, by name.
    pub arguments: Vec<String>,
    pub body: Vec<PlanItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopNest {
    pub entry: NodeId,
    pub label: String,
    pub params: Vec<String>,
    pub range: Vec<Range>,
    pub body: Vec<PlanItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CopyDirection {
    HostToHost,
    HostToDevice,
    DeviceToHost,
    DeviceToDevice,
}

impl CopyDirection {
    fn between(src: StorageType, dst: StorageType) -> Self {
        let side = |s: StorageType| s.side().unwrap_or(MemorySide::Host);
        match (side(src), side(dst)) {
            (MemorySide::Host, MemorySide::Host) => CopyDirection::HostToHost,
            (MemorySide::Host, MemorySide::Device) => CopyDirection::HostToDevice,
            (MemorySide::Device, MemorySide::Host) => CopyDirection::DeviceToHost,
            (MemorySide::Device, MemorySide::Device) => CopyDirection::DeviceToDevice,
        }
    }
}

impl fmt::Display for CopyDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CopyDirection::HostToHost => "host->host",
            CopyDirection::HostToDevice => "host->device",
            CopyDirection::DeviceToHost => "device->host",
            CopyDirection::DeviceToDevice => "device->device",
        };
        write!(f, "{s}")
    }
}

/// A copy between two containers, from an access-to-access edge.
#[derive(Debug, Clone, PartialEq)]
pub struct DataCopy {
    pub edge: EdgeId,
    pub src: String,
    pub dst: String,
    pub src_storage: StorageType,
    pub dst_storage: StorageType,
    pub src_subset: Subset,
    /// Same as `src_subset` unless the memlet names a different subset for
    /// the destination.
    pub dst_subset: Subset,
    pub volume: Expr,
    pub direction: CopyDirection,
}

impl DataCopy {
    /// True when the copy moves data between storage classes; such copies
    /// must be emitted by the backend.
    pub fn crosses_storage(&self) -> bool {
        self.src_storage != self.dst_storage
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AllocationSite {
    Program,
    State(StateId),
    Scope(StateId, NodeId),
}

impl fmt::Display for AllocationSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocationSite::Program => write!(f, "program"),
            AllocationSite::State(s) => write!(f, "state {s}"),
            AllocationSite::Scope(s, n) => write!(f, "scope {s}/{n}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    pub data: String,
    pub storage: StorageType,
    pub size: Expr,
    pub site: AllocationSite,
}

impl ExecutionPlan {
    pub fn state(&self, id: StateId) -> Option<&StatePlan> {
        self.states.iter().find(|s| s.id == id)
    }

    /// Copies that change storage class, in plan order.
    pub fn copy_obligations(&self) -> Vec<&DataCopy> {
        let mut out = Vec::new();
        for s in &self.states {
            walk(&s.body, &mut |item| {
                if let PlanItem::Copy(c) = item {
                    if c.crosses_storage() {
                        out.push(c);
                    }
                }
            });
        }
        out
    }

    /// Allocations placed at `site`.
    pub fn allocations_at(&self, site: AllocationSite) -> impl Iterator<Item = &Allocation> {
        self.allocations.iter().filter(move |a| a.site == site)
    }
}

/// Visit every item of a plan body, depth first.
pub fn walk<'p>(items: &'p [PlanItem], f: &mut impl FnMut(&'p PlanItem)) {
    for item in items {
        f(item);
        if let Some(body) = item.body() {
            walk(body, f);
        }
    }
}

impl PlanItem {
    pub fn body(&self) -> Option<&[PlanItem]> {
        match self {
            PlanItem::Kernel(k) => Some(&k.body),
            PlanItem::ThreadBlock(l) | PlanItem::ParallelFor(l) | PlanItem::Loop(l) => {
                Some(&l.body)
            }
            PlanItem::Tasklet { .. } | PlanItem::Copy(_) => None,
        }
    }

    pub fn entry(&self) -> Option<NodeId> {
        match self {
            PlanItem::Kernel(k) => Some(k.entry),
            PlanItem::ThreadBlock(l) | PlanItem::ParallelFor(l) | PlanItem::Loop(l) => {
                Some(l.entry)
            }
            PlanItem::Tasklet { .. } | PlanItem::Copy(_) => None,
        }
    }
}

// ── Verification ─────────────────────────────────────────────────────────────

/// Machine-checkable evidence for lowering postconditions.
#[derive(Debug, Clone)]
pub struct LowerCert {
    /// L1: every MapEntry appears in the plan exactly once.
    pub l1_maps_lowered_once: bool,
    /// L2: thread-block work only occurs inside a kernel.
    pub l2_blocks_inside_kernels: bool,
    /// L3: every allocated transient has exactly one allocation site.
    pub l3_single_allocation: bool,
}

impl StageCert for LowerCert {
    fn all_pass(&self) -> bool {
        self.l1_maps_lowered_once && self.l2_blocks_inside_kernels && self.l3_single_allocation
    }

    fn obligations(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("L1_maps_lowered_once", self.l1_maps_lowered_once),
            ("L2_blocks_inside_kernels", self.l2_blocks_inside_kernels),
            ("L3_single_allocation", self.l3_single_allocation),
        ]
    }
}

pub fn verify_lowering(plan: &ExecutionPlan, sdfg: &Sdfg) -> LowerCert {
    let l1 = plan.states.iter().all(|sp| {
        let mut seen: BTreeMap<NodeId, usize> = BTreeMap::new();
        walk(&sp.body, &mut |item| {
            if let Some(e) = item.entry() {
                *seen.entry(e).or_default() += 1;
            }
        });
        let entries = sdfg
            .state(sp.id)
            .map(State::map_entries)
            .unwrap_or_default();
        seen.values().all(|&n| n == 1) && entries.iter().all(|e| seen.contains_key(e))
    });

    let l2 = plan
        .states
        .iter()
        .all(|sp| blocks_inside_kernels(&sp.body, false));

    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for a in &plan.allocations {
        *counts.entry(a.data.as_str()).or_default() += 1;
    }
    let l3 = counts.values().all(|&n| n == 1);

    LowerCert {
        l1_maps_lowered_once: l1,
        l2_blocks_inside_kernels: l2,
        l3_single_allocation: l3,
    }
}

fn blocks_inside_kernels(items: &[PlanItem], in_kernel: bool) -> bool {
    items.iter().all(|item| match item {
        PlanItem::ThreadBlock(l) => in_kernel && blocks_inside_kernels(&l.body, true),
        PlanItem::Kernel(k) => blocks_inside_kernels(&k.body, true),
        other => other
            .body()
            .map_or(true, |b| blocks_inside_kernels(b, in_kernel)),
    })
}

// ── Public entry point ──────────────────────────────────────────────────────

pub fn lower(sdfg: &Sdfg, schedule: &ScheduledProgram, options: &LowerOptions) -> LowerResult {
    let mut engine = LowerEngine {
        sdfg,
        diagnostics: Vec::new(),
    };
    let empty = StateSchedules::new();
    let mut states = Vec::new();
    for sid in sdfg.states_in_order() {
        let Ok(state) = sdfg.state(sid) else {
            continue;
        };
        let resolved = schedule.states.get(&sid).unwrap_or(&empty);
        if options.check_storage {
            engine.check_storage(sid, state, resolved);
        }
        let body = engine.lower_scope(sid, state, resolved, None);
        let components = if options.record_components {
            state.components()
        } else {
            Vec::new()
        };
        states.push(StatePlan {
            id: sid,
            label: state.label.clone(),
            components,
            body,
        });
    }
    let allocations = engine.place_allocations(schedule);

    let plan = ExecutionPlan {
        name: sdfg.name.clone(),
        allocations,
        states,
    };
    let cert = verify_lowering(&plan, sdfg);
    debug!(
        states = plan.states.len(),
        allocations = plan.allocations.len(),
        copies = plan.copy_obligations().len(),
        "lowered program"
    );
    LowerResult {
        plan,
        cert,
        diagnostics: engine.diagnostics,
    }
}

// ── Lowering engine ─────────────────────────────────────────────────────────

struct LowerEngine<'a> {
    sdfg: &'a Sdfg,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> LowerEngine<'a> {
    /// Plan items for the direct members of `scope`, in dataflow order.
    fn lower_scope(
        &mut self,
        sid: StateId,
        state: &State,
        resolved: &StateSchedules,
        scope: Option<NodeId>,
    ) -> Vec<PlanItem> {
        let order = state
            .topological_order()
            .unwrap_or_else(|| state.nodes().map(|n| n.id).collect());
        let mut items = Vec::new();
        for id in order {
            let Some(node) = state.node(id) else {
                continue;
            };
            if node.scope != scope {
                continue;
            }
            match &node.kind {
                NodeKind::MapEntry { map, .. } => {
                    let body = self.lower_scope(sid, state, resolved, Some(id));
                    let nest = LoopNest {
                        entry: id,
                        label: map.label.clone(),
                        params: map.params.clone(),
                        range: map.range.clone(),
                        body,
                    };
                    let schedule = resolved
                        .get(&id)
                        .copied()
                        .unwrap_or(ScheduleType::Sequential);
                    items.push(match schedule {
                        ScheduleType::GpuDevice => PlanItem::Kernel(Kernel {
                            entry: id,
                            name: format!("{}_{}_{}", ident(&map.label), sid.0, id.0),
                            arguments: kernel_arguments(state, id),
                            params: nest.params,
                            grid: nest.range,
                            body: nest.body,
                        }),
                        ScheduleType::GpuThreadBlock => PlanItem::ThreadBlock(nest),
                        ScheduleType::CpuMulticore => PlanItem::ParallelFor(nest),
                        ScheduleType::Sequential | ScheduleType::Default => PlanItem::Loop(nest),
                    });
                }
                NodeKind::Tasklet { label, .. } => items.push(PlanItem::Tasklet {
                    node: id,
                    label: label.clone(),
                }),
                NodeKind::Access { data } => {
                    for edge in state.out_edges(id) {
                        let (Some(m), Some(dst)) = (
                            &edge.memlet,
                            state.node(edge.dst).and_then(|n| n.data()),
                        ) else {
                            continue;
                        };
                        let storage = |name: &str| {
                            self.sdfg
                                .arrays
                                .get(name)
                                .map(|d| d.storage)
                                .unwrap_or_default()
                        };
                        let (src_storage, dst_storage) = (storage(data), storage(dst));
                        let other = m.other_subset.clone().unwrap_or_else(|| m.subset.clone());
                        let (src_subset, dst_subset) = if m.data == *data {
                            (m.subset.clone(), other)
                        } else {
                            (other, m.subset.clone())
                        };
                        items.push(PlanItem::Copy(DataCopy {
                            edge: edge.id,
                            src: data.clone(),
                            dst: dst.to_string(),
                            src_storage,
                            dst_storage,
                            src_subset,
                            dst_subset,
                            volume: m.volume.clone(),
                            direction: CopyDirection::between(src_storage, dst_storage),
                        }));
                    }
                }
                NodeKind::MapExit { .. } => {}
            }
        }
        items
    }

    /// Tasklets may only touch storage their effective schedule can reach.
    fn check_storage(&mut self, sid: StateId, state: &State, resolved: &StateSchedules) {
        for edge in state.edges() {
            let Some(m) = &edge.memlet else {
                continue;
            };
            let tasklet = [edge.src, edge.dst].into_iter().find(|n| {
                state
                    .node(*n)
                    .is_some_and(|n| matches!(n.kind, NodeKind::Tasklet { .. }))
            });
            let (Some(tasklet), Some(desc)) = (tasklet, self.sdfg.arrays.get(&m.data)) else {
                continue;
            };
            let schedule =
                effective_schedule(state, tasklet, resolved).unwrap_or(ScheduleType::Sequential);
            if schedule.can_access(desc.storage) {
                continue;
            }
            let mut diag = Diagnostic::error(
                DiagKind::Storage,
                Location::Edge(sid, edge.id),
                format!(
                    "tasklet `{}` runs under {schedule} but `{}` lives in {} storage",
                    state.label_of(tasklet),
                    m.data,
                    desc.storage
                ),
            )
            .with_code(codes::E0402)
            .with_hint("copy the data to an accessible container first");
            if let Some(scope) = state.scope_of(tasklet) {
                diag = diag.with_related(Location::Node(sid, scope), "enclosing scope");
            }
            self.diagnostics.push(diag);
        }
    }

    fn place_allocations(&mut self, schedule: &ScheduledProgram) -> Vec<Allocation> {
        let sdfg = self.sdfg;
        let empty = StateSchedules::new();
        let mut out = Vec::new();
        for (name, desc) in sdfg.arrays.iter() {
            if !desc.transient || desc.lifetime == AllocationLifetime::External {
                continue;
            }
            let users: BTreeMap<StateId, Vec<NodeId>> = sdfg
                .states()
                .filter_map(|(sid, st)| {
                    let nodes: Vec<NodeId> = st
                        .data_nodes()
                        .into_iter()
                        .filter(|n| n.data() == Some(name.as_str()))
                        .map(|n| n.id)
                        .collect();
                    (!nodes.is_empty()).then_some((sid, nodes))
                })
                .collect();

            let single_state = match users.iter().next() {
                Some((sid, nodes)) if users.len() == 1 => Some((*sid, nodes)),
                _ => None,
            };
            let site = match (desc.lifetime, single_state) {
                (AllocationLifetime::Scope, Some((sid, nodes))) => {
                    let state = sdfg.state(sid).ok();
                    let resolved = schedule.states.get(&sid).unwrap_or(&empty);
                    match state {
                        Some(st) => hoist(st, resolved, common_scope(st, nodes), desc.storage)
                            .map_or(AllocationSite::State(sid), |e| AllocationSite::Scope(sid, e)),
                        None => AllocationSite::State(sid),
                    }
                }
                (AllocationLifetime::Scope | AllocationLifetime::State, Some((sid, _))) => {
                    AllocationSite::State(sid)
                }
                _ => AllocationSite::Program,
            };

            // Host code cannot allocate block-shared memory.
            if matches!(site, AllocationSite::Program | AllocationSite::State(_))
                && !ScheduleType::Sequential.can_allocate(desc.storage)
            {
                self.diagnostics.push(
                    Diagnostic::error(
                        DiagKind::Storage,
                        Location::Program,
                        format!(
                            "transient `{name}` in {} storage is not used inside a device scope",
                            desc.storage
                        ),
                    )
                    .with_code(codes::E0402),
                );
            }
            out.push(Allocation {
                data: name.clone(),
                storage: desc.storage,
                size: desc.total_size(),
                site,
            });
        }
        out
    }
}

/// Innermost scope containing every node of `nodes`.
fn common_scope(state: &State, nodes: &[NodeId]) -> Option<NodeId> {
    let chains: Vec<Vec<NodeId>> = nodes
        .iter()
        .map(|&n| state.scope_path(n))
        .collect();
    let first = chains.first()?;
    let mut common = None;
    for (depth, entry) in first.iter().enumerate() {
        if chains.iter().all(|c| c.get(depth) == Some(entry)) {
            common = Some(*entry);
        } else {
            break;
        }
    }
    common
}

/// Move an allocation outward until the enclosing schedule can allocate
/// `storage`. `None` means the top level of the state.
fn hoist(
    state: &State,
    resolved: &StateSchedules,
    mut scope: Option<NodeId>,
    storage: StorageType,
) -> Option<NodeId> {
    while let Some(entry) = scope {
        let schedule = effective_schedule(state, entry, resolved).unwrap_or(ScheduleType::Sequential);
        if schedule.can_allocate(storage) {
            return Some(entry);
        }
        scope = state.scope_of(entry);
    }
    None
}

/// Containers referenced by memlets on edges inside or at the boundary of
/// the map opened by `entry`.
fn kernel_arguments(state: &State, entry: NodeId) -> Vec<String> {
    let mut inside: BTreeSet<NodeId> = BTreeSet::from([entry]);
    let mut grew = true;
    while grew {
        grew = false;
        for n in state.nodes() {
            if n.scope.is_some_and(|s| inside.contains(&s)) && inside.insert(n.id) {
                grew = true;
            }
        }
    }
    if let Some(exit) = state.exit_of(entry) {
        inside.insert(exit);
    }
    state
        .edges()
        .filter(|e| inside.contains(&e.src) || inside.contains(&e.dst))
        .filter_map(|e| e.memlet.as_ref().map(|m| m.data.clone()))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// A C identifier derived from a label.
pub fn ident(label: &str) -> String {
    let mut out: String = label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

// ── Display ─────────────────────────────────────────────────────────────────

impl fmt::Display for ExecutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "plan {}", self.name)?;
        for a in &self.allocations {
            writeln!(f, "alloc {}: {}[{}] @ {}", a.data, a.storage, a.size, a.site)?;
        }
        for s in &self.states {
            writeln!(f, "state {} `{}`:", s.id, s.label)?;
            if s.components.len() > 1 {
                writeln!(f, "  ({} concurrent components)", s.components.len())?;
            }
            write_items(f, &s.body, 1)?;
        }
        Ok(())
    }
}

fn dims(params: &[String], range: &[Range]) -> String {
    params
        .iter()
        .zip(range)
        .map(|(p, r)| format!("{p} in {r}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn write_items(f: &mut fmt::Formatter<'_>, items: &[PlanItem], depth: usize) -> fmt::Result {
    let pad = "  ".repeat(depth);
    for item in items {
        match item {
            PlanItem::Kernel(k) => {
                writeln!(f, "{pad}kernel {} grid [{}]:", k.name, dims(&k.params, &k.grid))?;
            }
            PlanItem::ThreadBlock(l) => {
                writeln!(f, "{pad}threadblock [{}]:", dims(&l.params, &l.range))?;
            }
            PlanItem::ParallelFor(l) => {
                writeln!(f, "{pad}parallel for [{}]:", dims(&l.params, &l.range))?;
            }
            PlanItem::Loop(l) => writeln!(f, "{pad}for [{}]:", dims(&l.params, &l.range))?,
            PlanItem::Tasklet { label, .. } => writeln!(f, "{pad}tasklet {label}")?,
            PlanItem::Copy(c) => writeln!(
                f,
                "{pad}copy {} -> {} [{}] {}",
                c.src, c.dst, c.src_subset, c.direction
            )?,
        }
        if let Some(body) = item.body() {
            write_items(f, body, depth + 1)?;
        }
    }
    Ok(())
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Data;
    use crate::dtypes::ElementType;
    use crate::graph::Map;
    use crate::memlet::Memlet;
    use crate::schedule::check_schedules;

    fn range(text: &str) -> Range {
        Subset::parse(text).unwrap().dims.remove(0)
    }

    fn lower_default(p: &Sdfg) -> LowerResult {
        let sched = check_schedules(p);
        assert!(sched.diagnostics.is_empty(), "{:?}", sched.diagnostics);
        lower(p, &sched.schedule, &LowerOptions::default())
    }

    /// A -> gpu_A -> kernel(i) -> block(j) -> t -> gpu_B -> B
    fn device_program() -> (Sdfg, StateId) {
        let mut p = Sdfg::new("dev");
        p.add_symbol("N", ElementType::Int32);
        let n = vec![Expr::sym("N")];
        p.add_array("A", n.clone(), ElementType::Float64, StorageType::CpuHeap).unwrap();
        p.add_array("B", n.clone(), ElementType::Float64, StorageType::CpuHeap).unwrap();
        p.add_transient("gpu_A", n.clone(), ElementType::Float64, StorageType::GpuGlobal).unwrap();
        p.add_transient("gpu_B", n, ElementType::Float64, StorageType::GpuGlobal).unwrap();
        let sid = p.add_state("main");
        let st = p.state_mut(sid).unwrap();
        let a = st.add_access("A", None);
        let ga = st.add_access("gpu_A", None);
        let gb = st.add_access("gpu_B", None);
        let b = st.add_access("B", None);
        st.add_edge(a, None, ga, None, Some(Memlet::parse("A", "0:N").unwrap()))
            .unwrap();
        let (ke, kx) = st.add_map(
            Map::new("k", vec![("i".into(), range("0:N:32"))], ScheduleType::GpuDevice),
            None,
        );
        let (be, bx) = st.add_map(
            Map::new("b", vec![("j".into(), range("0:32"))], ScheduleType::GpuThreadBlock),
            Some(ke),
        );
        let t = st.add_tasklet("add", &["x"], &["y"], "y = x + 1", Some(be));
        st.add_memlet_path(&[ga, ke, be, t], Memlet::parse("gpu_A", "i + j").unwrap(), None, Some("x"))
            .unwrap();
        st.add_memlet_path(&[t, bx, kx, gb], Memlet::parse("gpu_B", "i + j").unwrap(), Some("y"), None)
            .unwrap();
        st.add_edge(gb, None, b, None, Some(Memlet::parse("gpu_B", "0:N").unwrap()))
            .unwrap();
        (p, sid)
    }

    #[test]
    fn device_map_becomes_kernel_with_block_inside() {
        let (p, sid) = device_program();
        let result = lower_default(&p);
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
        assert!(result.cert.all_pass(), "{:?}", result.cert.obligations());
        let body = &result.plan.state(sid).unwrap().body;
        let kernel = body
            .iter()
            .find_map(|i| match i {
                PlanItem::Kernel(k) => Some(k),
                _ => None,
            })
            .expect("kernel");
        assert_eq!(kernel.grid[0].to_string(), "0:N:32");
        assert_eq!(kernel.arguments, vec!["gpu_A", "gpu_B"]);
        assert!(matches!(&kernel.body[0], PlanItem::ThreadBlock(b) if b.params == ["j"]));
    }

    #[test]
    fn copies_record_direction_in_dataflow_order() {
        let (p, _) = device_program();
        let plan = lower_default(&p).plan;
        let copies = plan.copy_obligations();
        assert_eq!(copies.len(), 2);
        assert_eq!(copies[0].direction, CopyDirection::HostToDevice);
        assert_eq!(copies[1].direction, CopyDirection::DeviceToHost);
        assert_eq!(copies[1].dst, "B");
    }

    #[test]
    fn device_allocations_hoist_out_of_kernels() {
        let (mut p, sid) = device_program();
        // A scratch array only used inside the kernel.
        p.add_transient("scratch", vec![Expr::Int(32)], ElementType::Float64, StorageType::GpuGlobal)
            .unwrap();
        p.add_datadesc(
            "tile",
            Data::array(ElementType::Float64, vec![Expr::Int(32)])
                .with_storage(StorageType::GpuShared)
                .transient(),
        )
        .unwrap();
        let st = p.state_mut(sid).unwrap();
        let kernel = st.map_entries()[0];
        st.add_access("scratch", Some(kernel));
        st.add_access("tile", Some(kernel));

        let result = lower_default(&p);
        let site = |name: &str| {
            result
                .plan
                .allocations
                .iter()
                .find(|a| a.data == name)
                .map(|a| a.site)
        };
        assert_eq!(site("scratch"), Some(AllocationSite::State(sid)));
        assert_eq!(site("tile"), Some(AllocationSite::Scope(sid, kernel)));
        assert_eq!(site("gpu_A"), Some(AllocationSite::State(sid)));
        assert_eq!(site("A"), None);
    }

    #[test]
    fn shared_memory_on_host_is_reported() {
        let (mut p, sid) = device_program();
        p.add_transient("buf", vec![Expr::Int(8)], ElementType::Float32, StorageType::GpuShared)
            .unwrap();
        p.state_mut(sid).unwrap().add_access("buf", None);
        let result = lower_default(&p);
        assert!(result
            .diagnostics
            .iter()
            .any(|d| d.code == Some(codes::E0402) && d.location == Location::Program));
    }

    #[test]
    fn kernel_reading_host_memory_is_reported() {
        let mut p = Sdfg::new("bad");
        p.add_symbol("N", ElementType::Int32);
        p.add_array("A", vec![Expr::sym("N")], ElementType::Float64, StorageType::CpuHeap)
            .unwrap();
        let sid = p.add_state("s");
        let st = p.state_mut(sid).unwrap();
        let a = st.add_access("A", None);
        let (me, _) = st.add_map(
            Map::new("k", vec![("i".into(), range("0:N"))], ScheduleType::GpuDevice),
            None,
        );
        let t = st.add_tasklet("t", &["x"], &[], "", Some(me));
        st.add_memlet_path(&[a, me, t], Memlet::parse("A", "i").unwrap(), None, Some("x"))
            .unwrap();
        let result = lower_default(&p);
        let d = result
            .diagnostics
            .iter()
            .find(|d| d.code == Some(codes::E0402))
            .expect("storage diagnostic");
        assert_eq!(d.kind, DiagKind::Storage);
        assert_eq!(d.related[0].location, Location::Node(sid, me));
    }

    #[test]
    fn host_schedules_lower_to_loops() {
        let mut p = Sdfg::new("host");
        let sid = p.add_state("s");
        let st = p.state_mut(sid).unwrap();
        let (outer, _) = st.add_map(
            Map::new("o", vec![("i".into(), range("0:8"))], ScheduleType::Default),
            None,
        );
        let (inner, _) = st.add_map(
            Map::new("n", vec![("j".into(), range("0:4"))], ScheduleType::Default),
            Some(outer),
        );
        st.add_tasklet("t", &[], &[], "", Some(inner));
        let plan = lower_default(&p).plan;
        let body = &plan.state(sid).unwrap().body;
        let PlanItem::ParallelFor(o) = &body[0] else {
            panic!("expected parallel loop, got {:?}", body[0]);
        };
        let PlanItem::Loop(n) = &o.body[0] else {
            panic!("expected sequential loop");
        };
        assert!(matches!(n.body[0], PlanItem::Tasklet { .. }));
    }

    #[test]
    fn components_are_recorded() {
        let mut p = Sdfg::new("c");
        p.add_scalar("x", ElementType::Int32).unwrap();
        let sid = p.add_state("s");
        let st = p.state_mut(sid).unwrap();
        st.add_tasklet("a", &[], &[], "", None);
        st.add_tasklet("b", &[], &[], "", None);
        let plan = lower_default(&p).plan;
        assert_eq!(plan.state(sid).unwrap().components.len(), 2);

        let sched = check_schedules(&p);
        let opts = LowerOptions {
            record_components: false,
            ..LowerOptions::default()
        };
        let plan = lower(&p, &sched.schedule, &opts).plan;
        assert!(plan.state(sid).unwrap().components.is_empty());
    }

    #[test]
    fn plan_display() {
        let (p, _) = device_program();
        let text = lower_default(&p).plan.to_string();
        assert!(text.contains("kernel k_0_"));
        assert!(text.contains("threadblock [j in 0:32]:"));
        assert!(text.contains("copy A -> gpu_A [0:N] host->device"));
    }

    #[test]
    fn identifiers() {
        assert_eq!(ident("add one"), "add_one");
        assert_eq!(ident("3d"), "_3d");
    }
}
