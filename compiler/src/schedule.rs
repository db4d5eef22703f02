// schedule.rs — Schedule resolution and nesting check for map scopes
//
// Resolves every map's `Default` schedule from its context and checks each
// map against the schedule compatibility table. The context of a map is the
// resolved schedule of its nearest enclosing non-sequential map, or the top
// level of the state when there is none.
//
// Preconditions: scope nesting is a tree (validation has passed).
// Postconditions: returns `ScheduleResult` with one resolved schedule per
//                 MapEntry, and an E0401 diagnostic per incompatible nesting.
// Failure modes: incompatible nesting produces `Diagnostic` entries naming
//                both the inner scope and the context scope.
// Side effects: logs defaulted resolutions at debug level.

use std::collections::BTreeMap;

use tracing::debug;

use crate::diag::codes;
use crate::diag::{DiagCode, DiagKind, Diagnostic, Location};
use crate::dtypes::ScheduleType;
use crate::graph::State;
use crate::id::{NodeId, StateId};
use crate::pass::StageCert;
use crate::sdfg::Sdfg;

// ── Public types ────────────────────────────────────────────────────────────

/// Resolved schedules of one state's maps, keyed by MapEntry.
pub type StateSchedules = BTreeMap<NodeId, ScheduleType>;

/// Resolved schedules for a whole program.
#[derive(Debug, Clone, Default)]
pub struct ScheduledProgram {
    pub states: BTreeMap<StateId, StateSchedules>,
}

impl ScheduledProgram {
    pub fn schedule_of(&self, state: StateId, entry: NodeId) -> Option<ScheduleType> {
        self.states.get(&state)?.get(&entry).copied()
    }
}

#[derive(Debug)]
pub struct ScheduleResult {
    pub schedule: ScheduledProgram,
    pub diagnostics: Vec<Diagnostic>,
}

// ── Verification ─────────────────────────────────────────────────────────────

/// Machine-checkable evidence for schedule postconditions.
#[derive(Debug, Clone)]
pub struct ScheduleCert {
    /// S1: every MapEntry of every state has a resolved schedule.
    pub s1_all_maps_resolved: bool,
    /// S2: no resolved schedule is `Default`.
    pub s2_no_default_left: bool,
}

impl StageCert for ScheduleCert {
    fn all_pass(&self) -> bool {
        self.s1_all_maps_resolved && self.s2_no_default_left
    }

    fn obligations(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("S1_all_maps_resolved", self.s1_all_maps_resolved),
            ("S2_no_default_left", self.s2_no_default_left),
        ]
    }
}

pub fn verify_schedule(schedule: &ScheduledProgram, sdfg: &Sdfg) -> ScheduleCert {
    let s1 = sdfg.states().all(|(sid, state)| {
        state
            .map_entries()
            .iter()
            .all(|e| schedule.schedule_of(sid, *e).is_some())
    });
    let s2 = schedule
        .states
        .values()
        .flat_map(|m| m.values())
        .all(|s| *s != ScheduleType::Default);
    ScheduleCert {
        s1_all_maps_resolved: s1,
        s2_no_default_left: s2,
    }
}

// ── Public entry points ─────────────────────────────────────────────────────

/// Resolve and check the schedules of every state.
pub fn check_schedules(sdfg: &Sdfg) -> ScheduleResult {
    let mut ctx = ScheduleCtx::default();
    for (sid, state) in sdfg.states() {
        ctx.check_state(sid, state);
    }
    ScheduleResult {
        schedule: ScheduledProgram { states: ctx.states },
        diagnostics: ctx.diagnostics,
    }
}

/// Resolved schedule of each map in a state, outermost maps first.
pub fn resolve_state(state: &State) -> StateSchedules {
    let mut entries = state.map_entries();
    entries.sort_by_key(|&e| state.scope_path(e).len());
    let mut resolved = StateSchedules::new();
    for entry in entries {
        let Some(map) = state.map_of(entry) else {
            continue;
        };
        let context = context_of(state, entry, &resolved).map(|(_, s)| s);
        resolved.insert(entry, map.schedule.resolve(context));
    }
    resolved
}

/// The nearest enclosing map (excluding `node` itself) whose resolved
/// schedule is not sequential, with that schedule.
pub fn context_of(
    state: &State,
    node: NodeId,
    resolved: &StateSchedules,
) -> Option<(NodeId, ScheduleType)> {
    state
        .scope_path(node)
        .into_iter()
        .rev()
        .filter_map(|e| resolved.get(&e).map(|s| (e, *s)))
        .find(|(_, s)| *s != ScheduleType::Sequential)
}

/// Schedule under which code at `node` runs: the resolved schedule of the
/// nearest enclosing non-sequential map, counting `node` itself if it is a
/// MapEntry. `None` at host top level.
pub fn effective_schedule(
    state: &State,
    node: NodeId,
    resolved: &StateSchedules,
) -> Option<ScheduleType> {
    if let Some(s) = resolved.get(&node) {
        if *s != ScheduleType::Sequential {
            return Some(*s);
        }
    }
    context_of(state, node, resolved).map(|(_, s)| s)
}

// ── Internal context ────────────────────────────────────────────────────────

#[derive(Default)]
struct ScheduleCtx {
    states: BTreeMap<StateId, StateSchedules>,
    diagnostics: Vec<Diagnostic>,
}

impl ScheduleCtx {
    fn error(&mut self, code: DiagCode, location: Location, message: String) -> &mut Diagnostic {
        self.diagnostics.push(
            Diagnostic::error(DiagKind::ScheduleCompatibility, location, message).with_code(code),
        );
        let last = self.diagnostics.len() - 1;
        &mut self.diagnostics[last]
    }

    fn check_state(&mut self, sid: StateId, state: &State) {
        let resolved = resolve_state(state);
        for (&entry, &schedule) in &resolved {
            let Some(map) = state.map_of(entry) else {
                continue;
            };
            let context = context_of(state, entry, &resolved);
            if map.schedule == ScheduleType::Default {
                debug!(
                    state = %sid,
                    map = %map.label,
                    resolved = %schedule,
                    "resolved default schedule"
                );
            }
            if map.schedule.nests_in(context.map(|(_, s)| s)) {
                continue;
            }
            let where_ = match context {
                Some((ctx_entry, ctx_sched)) => format!(
                    "inside {ctx_sched} map `{}` ({ctx_entry})",
                    state.label_of(ctx_entry)
                ),
                None => "at the top level of the state".to_string(),
            };
            let diag = self.error(
                codes::E0401,
                Location::Node(sid, entry),
                format!(
                    "map `{}` with schedule {schedule} cannot run {where_}",
                    map.label
                ),
            );
            if let Some((ctx_entry, _)) = context {
                diag.related.push(crate::diag::RelatedLocation {
                    location: Location::Node(sid, ctx_entry),
                    label: "enclosing scope".to_string(),
                });
            }
            diag.hint = Some(nesting_hint(schedule).to_string());
        }
        self.states.insert(sid, resolved);
    }
}

fn nesting_hint(schedule: ScheduleType) -> &'static str {
    match schedule {
        ScheduleType::GpuThreadBlock => "thread-block maps must be nested inside a GPU_Device map",
        ScheduleType::GpuDevice => "GPU_Device maps may only appear in host code",
        ScheduleType::CpuMulticore => "CPU_Multicore maps cannot run inside device code",
        _ => "use a Sequential schedule for nested loops",
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Map;
    use crate::subset::Subset;

    fn map(label: &str, schedule: ScheduleType) -> Map {
        let r = Subset::parse("0:N").unwrap().dims.remove(0);
        Map::new(label, vec![(format!("{label}_i"), r)], schedule)
    }

    fn nested(outer: ScheduleType, inner: ScheduleType) -> (Sdfg, StateId, NodeId, NodeId) {
        let mut sdfg = Sdfg::new("p");
        let sid = sdfg.add_state("s");
        let st = sdfg.state_mut(sid).unwrap();
        let (o, _) = st.add_map(map("outer", outer), None);
        let (i, _) = st.add_map(map("inner", inner), Some(o));
        (sdfg, sid, o, i)
    }

    #[test]
    fn thread_block_inside_device_is_accepted() {
        let (sdfg, _, _, _) = nested(ScheduleType::GpuDevice, ScheduleType::GpuThreadBlock);
        let result = check_schedules(&sdfg);
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
        assert!(verify_schedule(&result.schedule, &sdfg).all_pass());
    }

    #[test]
    fn device_inside_thread_block_is_rejected_with_both_ids() {
        let (sdfg, sid, o, i) = nested(ScheduleType::GpuThreadBlock, ScheduleType::GpuDevice);
        let result = check_schedules(&sdfg);
        let inner_diag = result
            .diagnostics
            .iter()
            .find(|d| d.location == Location::Node(sid, i))
            .expect("inner map diagnostic");
        assert_eq!(inner_diag.code, Some(codes::E0401));
        assert_eq!(inner_diag.kind, DiagKind::ScheduleCompatibility);
        assert_eq!(inner_diag.related[0].location, Location::Node(sid, o));
        // The thread-block map itself is at top level, also an error.
        assert!(result
            .diagnostics
            .iter()
            .any(|d| d.location == Location::Node(sid, o)));
    }

    #[test]
    fn sequential_is_transparent_for_context() {
        let mut sdfg = Sdfg::new("p");
        let sid = sdfg.add_state("s");
        let st = sdfg.state_mut(sid).unwrap();
        let (dev, _) = st.add_map(map("dev", ScheduleType::GpuDevice), None);
        let (seq, _) = st.add_map(map("seq", ScheduleType::Sequential), Some(dev));
        let (tb, _) = st.add_map(map("tb", ScheduleType::GpuThreadBlock), Some(seq));
        let result = check_schedules(&sdfg);
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
        let st = sdfg.state(sid).unwrap();
        let resolved = &result.schedule.states[&sid];
        assert_eq!(context_of(st, tb, resolved), Some((dev, ScheduleType::GpuDevice)));
        assert_eq!(effective_schedule(st, seq, resolved), Some(ScheduleType::GpuDevice));
    }

    #[test]
    fn defaults_resolve_by_context() {
        let (sdfg, sid, o, i) = nested(ScheduleType::Default, ScheduleType::Default);
        let result = check_schedules(&sdfg);
        assert!(result.diagnostics.is_empty());
        assert_eq!(result.schedule.schedule_of(sid, o), Some(ScheduleType::CpuMulticore));
        assert_eq!(result.schedule.schedule_of(sid, i), Some(ScheduleType::Sequential));

        let (sdfg, sid, _, i) = nested(ScheduleType::GpuDevice, ScheduleType::Default);
        let result = check_schedules(&sdfg);
        assert_eq!(result.schedule.schedule_of(sid, i), Some(ScheduleType::GpuThreadBlock));
    }

    #[test]
    fn device_inside_multicore_is_rejected() {
        let (sdfg, _, _, _) = nested(ScheduleType::CpuMulticore, ScheduleType::GpuDevice);
        let result = check_schedules(&sdfg);
        assert_eq!(result.diagnostics.len(), 1);
        assert!(result.diagnostics[0].hint.is_some());
    }
}
