// propagate.rs — Memlet propagation across map scopes
//
// For every map, the memlet on the outside of a bracket connector (`IN_x`
// edge into a MapEntry, `OUT_x` edge out of a MapExit) is derived from the
// memlets on the inside: the union of the inner subsets is projected over
// the map's parameter ranges and clamped to the container's shape, and the
// volume is the summed inner volume times the map's trip count. Nested maps
// are processed innermost first so each outer map sees derived inner
// memlets.
//
// Preconditions: scope nesting is a tree (validation check 2).
// Postconditions: boundary memlets satisfy `volume = inner volume × trips`.
// Failure modes: a zero step or other symbolic failure → `SdfgError::Symbol`;
//                an empty inner side → `SdfgError::NoInnerMemlet`; a
//                non-monotonic access into a container of unknown shape →
//                `SdfgError::UnboundedProjection`.
// Side effects: `propagate_state`/`propagate_sdfg` rewrite edge memlets.

use std::collections::BTreeMap;

use tracing::debug;

use crate::data::DescriptorTable;
use crate::error::{SdfgError, SdfgResult, SymbolError};
use crate::graph::{Map, State};
use crate::id::{EdgeId, NodeId, StateId};
use crate::memlet::Memlet;
use crate::sdfg::Sdfg;
use crate::state_index::StateIndex;
use crate::subset::{Range, Subset};
use crate::symbolic::{Expr, SymbolMap};

/// Propagate every state of the program. Returns the number of memlets
/// rewritten.
pub fn propagate_sdfg(sdfg: &mut Sdfg) -> SdfgResult<usize> {
    let arrays = sdfg.arrays.clone();
    let mut total = 0;
    for (id, state) in sdfg.states_mut() {
        let n = propagate_state(state, &arrays)?;
        debug!(state = %id, updated = n, "propagated memlets");
        total += n;
    }
    Ok(total)
}

/// Propagate the maps of one state, innermost first.
pub fn propagate_state(state: &mut State, arrays: &DescriptorTable) -> SdfgResult<usize> {
    let index = StateIndex::build(state);
    let mut entries = state.map_entries();
    entries.sort_by_key(|&e| std::cmp::Reverse(state.scope_path(e).len()));

    let mut updated = 0;
    for entry in entries {
        let updates = boundary_updates(state, &index, entry, arrays)?;
        updated += updates.len();
        for (edge, memlet) in updates {
            if let Some(e) = state.edge_mut(edge) {
                e.memlet = Some(memlet);
            }
        }
    }
    Ok(updated)
}

/// Volumes of all boundary memlets as propagation would derive them,
/// without modifying the program.
pub fn derived_volumes(sdfg: &Sdfg) -> SdfgResult<BTreeMap<(StateId, EdgeId), Expr>> {
    let mut copy = sdfg.clone();
    let mut out = BTreeMap::new();
    let arrays = copy.arrays.clone();
    for (id, state) in copy.states_mut() {
        let index = StateIndex::build(state);
        let mut entries = state.map_entries();
        entries.sort_by_key(|&e| std::cmp::Reverse(state.scope_path(e).len()));
        for entry in entries {
            for (edge, memlet) in boundary_updates(state, &index, entry, &arrays)? {
                out.insert((id, edge), memlet.volume.clone());
                if let Some(e) = state.edge_mut(edge) {
                    e.memlet = Some(memlet);
                }
            }
        }
    }
    Ok(out)
}

/// Derived outer memlets for both brackets of the map opened by `entry`.
fn boundary_updates(
    state: &State,
    index: &StateIndex,
    entry: NodeId,
    arrays: &DescriptorTable,
) -> SdfgResult<Vec<(EdgeId, Memlet)>> {
    let Some(map) = state.map_of(entry) else {
        return Ok(Vec::new());
    };
    let mut updates = Vec::new();

    let mut sides = Vec::new();
    if let Some(ins) = state.node(entry).and_then(|n| n.kind.in_connectors()) {
        for conn in ins.keys() {
            let Some(base) = conn.strip_prefix("IN_") else {
                continue;
            };
            let outer = index.bound_in(state, entry, conn);
            let inner = index.bound_out(state, entry, &format!("OUT_{base}"));
            sides.push((outer, inner));
        }
    }
    if let Some(exit) = state.exit_of(entry) {
        if let Some(outs) = state.node(exit).and_then(|n| n.kind.out_connectors()) {
            for conn in outs.keys() {
                let Some(base) = conn.strip_prefix("OUT_") else {
                    continue;
                };
                let outer = index.bound_out(state, exit, conn);
                let inner = index.bound_in(state, exit, &format!("IN_{base}"));
                sides.push((outer, inner));
            }
        }
    }

    for (outer, inner) in sides {
        let inner: Vec<&Memlet> = inner.iter().filter_map(|e| e.memlet.as_ref()).collect();
        let [outer_edge] = outer.as_slice() else {
            continue;
        };
        if inner.is_empty()
            || outer_edge
                .memlet
                .as_ref()
                .is_some_and(|m| m.other_subset.is_some())
        {
            continue;
        }
        let shape = arrays.get(&inner[0].data).map(|d| d.shape.as_slice());
        updates.push((outer_edge.id, propagate_memlets(&inner, map, shape)?));
    }
    Ok(updates)
}

/// Derive the memlet seen outside `map` from the memlets inside it.
pub fn propagate_memlets(
    inner: &[&Memlet],
    map: &Map,
    shape: Option<&[Expr]>,
) -> SdfgResult<Memlet> {
    let first = inner.first().ok_or_else(|| SdfgError::NoInnerMemlet {
        map: map.label.clone(),
    })?;

    let mut union = project_subset(&first.subset, map, shape)?;
    let mut volume = first.volume.clone();
    for m in &inner[1..] {
        union = bounding_union(&union, &project_subset(&m.subset, map, shape)?)?;
        volume = Expr::add(volume, m.volume.clone());
    }
    if let Some(shape) = shape {
        union = union.clamp_to(shape);
    }

    let mut trips = Expr::one();
    for r in &map.range {
        trips = Expr::mul(trips, r.trip_count()?);
    }
    let volume = Expr::mul(volume, trips).simplify()?;

    Ok(Memlet {
        data: first.data.clone(),
        subset: union,
        other_subset: None,
        volume,
        wcr: first.wcr.clone(),
        wcr_source: first.wcr_source.clone(),
        allow_oob: inner.iter().any(|m| m.allow_oob),
        dynamic: inner.iter().any(|m| m.dynamic),
    })
}

/// Range of a subset as the map's parameters sweep their ranges.
pub fn project_subset(
    subset: &Subset,
    map: &Map,
    shape: Option<&[Expr]>,
) -> SdfgResult<Subset> {
    let mut dims = Vec::with_capacity(subset.rank());
    for (d, range) in subset.dims.iter().enumerate() {
        let mut r = range.clone();
        for (param, prange) in map.dims() {
            let uses = r.start.free_symbols().contains(param) || r.end.free_symbols().contains(param);
            if !uses {
                continue;
            }
            r = match project_dim(&r, param, prange)? {
                Some(projected) => projected,
                None => whole_dim(shape.and_then(|s| s.get(d))).ok_or_else(|| {
                    SdfgError::UnboundedProjection {
                        map: map.label.clone(),
                        dim: d,
                    }
                })?,
            };
        }
        dims.push(r);
    }
    Ok(Subset::new(dims))
}

/// Project one dimension over `param`. `None` if the bounds are not
/// provably monotonic in the parameter.
fn project_dim(r: &Range, param: &str, prange: &Range) -> Result<Option<Range>, SymbolError> {
    let at = |e: &Expr, v: &Expr| -> Result<Expr, SymbolError> {
        let mut map = SymbolMap::new();
        map.insert(param.to_string(), v.clone());
        e.substitute(&map)
    };
    let step_of = |e: &Expr| -> Result<Expr, SymbolError> {
        let next = Expr::add(Expr::sym(param), Expr::one());
        Expr::sub(at(e, &next)?, e.clone()).simplify()
    };
    let (ds, de) = (step_of(&r.start)?, step_of(&r.end)?);
    let increasing = ds.is_provably_nonnegative() && de.is_provably_nonnegative();
    let decreasing = Expr::Neg(Box::new(ds.clone())).is_provably_nonnegative()
        && Expr::Neg(Box::new(de)).is_provably_nonnegative();

    let (lo, hi) = (&prange.start, &prange.end);
    let (start, end) = if increasing {
        (at(&r.start, lo)?, at(&r.end, hi)?)
    } else if decreasing {
        (at(&r.start, hi)?, at(&r.end, lo)?)
    } else {
        return Ok(None);
    };

    // A single index swept by a constant stride stays strided.
    let step = match (r.is_index(), ds.as_int(), prange.step.as_int()) {
        (true, Some(k), Some(s)) if k > 0 => Expr::Int(k * s),
        _ => r.step.clone(),
    };
    Ok(Some(Range {
        start,
        end,
        step,
        tile: r.tile.clone(),
    }))
}

fn whole_dim(extent: Option<&Expr>) -> Option<Range> {
    extent.map(|n| Range::exclusive(Expr::zero(), n.clone(), Expr::one()))
}

fn bounding_union(a: &Subset, b: &Subset) -> Result<Subset, SymbolError> {
    if a.rank() != b.rank() {
        return Ok(a.clone());
    }
    let dims = a
        .dims
        .iter()
        .zip(&b.dims)
        .map(|(x, y)| {
            if x == y {
                return Ok(x.clone());
            }
            Ok(Range {
                start: Expr::Min(vec![x.start.clone(), y.start.clone()]).simplify()?,
                end: Expr::Max(vec![x.end.clone(), y.end.clone()]).simplify()?,
                step: Expr::one(),
                tile: Expr::one(),
            })
        })
        .collect::<Result<Vec<_>, SymbolError>>()?;
    Ok(Subset::new(dims))
}

/// Trip count of a whole map: the product over its dimensions.
pub fn trip_count(map: &Map) -> Result<Expr, SymbolError> {
    let mut trips = Expr::one();
    for r in &map.range {
        trips = Expr::mul(trips, r.trip_count()?);
    }
    trips.simplify()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtypes::{ElementType, ScheduleType, StorageType};

    fn range(text: &str) -> Range {
        Subset::parse(text).unwrap().dims.remove(0)
    }

    fn map(param: &str, r: &str) -> Map {
        Map::new("m", vec![(param.into(), range(r))], ScheduleType::Sequential)
    }

    fn e(text: &str) -> Expr {
        Expr::parse(text).unwrap().simplify().unwrap()
    }

    #[test]
    fn index_over_unit_range_becomes_block() {
        let inner = Memlet::parse("A", "i + j").unwrap();
        let out = propagate_memlets(&[&inner], &map("j", "0:32"), None).unwrap();
        assert_eq!(out.subset.to_string(), "i:i + 32");
        assert_eq!(out.volume, Expr::Int(32));
    }

    #[test]
    fn tiled_outer_map_gives_ceiling_volume() {
        let block = Memlet::parse("A", "i:i + 32").unwrap().with_volume(Expr::Int(32));
        let shape = [e("N")];
        let out = propagate_memlets(&[&block], &map("i", "0:N:32"), Some(&shape)).unwrap();
        assert_eq!(out.volume.to_string(), "32*ceil(N/32)");
        assert_eq!(out.subset.to_string(), "0:N");
    }

    #[test]
    fn strided_index_keeps_stride() {
        let inner = Memlet::parse("A", "2*i").unwrap();
        let out = propagate_memlets(&[&inner], &map("i", "0:N"), None).unwrap();
        assert_eq!(out.subset.dims[0].step, Expr::Int(2));
        assert_eq!(out.subset.dims[0].end, e("2*N - 2"));
        assert_eq!(out.volume, e("N"));
    }

    #[test]
    fn non_monotonic_index_covers_whole_dimension() {
        let inner = Memlet::parse("A", "Mod(i, 4)").unwrap();
        let shape = [e("M")];
        let out = propagate_memlets(&[&inner], &map("i", "0:N"), Some(&shape)).unwrap();
        assert_eq!(out.subset.to_string(), "0:M");
    }

    #[test]
    fn union_of_two_inner_memlets() {
        let a = Memlet::parse("A", "i").unwrap();
        let b = Memlet::parse("A", "i + 1").unwrap();
        let out = propagate_memlets(&[&a, &b], &map("i", "0:N"), None).unwrap();
        assert_eq!(out.subset.to_string(), "0:N + 1");
        assert_eq!(out.volume, e("2*N"));
    }

    #[test]
    fn zero_step_map_fails() {
        let mut m = map("i", "0:N");
        m.range[0].step = Expr::zero();
        let inner = Memlet::parse("A", "i").unwrap();
        assert!(matches!(
            propagate_memlets(&[&inner], &m, None),
            Err(SdfgError::Symbol(SymbolError::DivisionByZero(_)))
        ));
    }

    #[test]
    fn empty_inner_side_names_the_map() {
        let err = propagate_memlets(&[], &map("i", "0:N"), None).unwrap_err();
        assert!(matches!(err, SdfgError::NoInnerMemlet { ref map } if map == "m"));
    }

    #[test]
    fn non_monotonic_index_without_shape_is_an_error() {
        let inner = Memlet::parse("A", "Mod(i, 4)").unwrap();
        let err = propagate_memlets(&[&inner], &map("i", "0:N"), None).unwrap_err();
        assert!(matches!(err, SdfgError::UnboundedProjection { ref map, dim: 0 } if map == "m"));
        assert!(!err.to_string().contains("__"));
    }

    #[test]
    fn nested_state_propagates_innermost_first() {
        let mut sdfg = Sdfg::new("p");
        sdfg.add_symbol("N", ElementType::Int64);
        sdfg.add_array("A", vec![e("N")], ElementType::Float64, StorageType::GpuGlobal)
            .unwrap();
        let sid = sdfg.add_state("s");
        let st = sdfg.state_mut(sid).unwrap();
        let a = st.add_access("A", None);
        let (outer, _) = st.add_map(
            Map::new("o", vec![("i".into(), range("0:N:32"))], ScheduleType::GpuDevice),
            None,
        );
        let (inner, _) = st.add_map(
            Map::new("in", vec![("j".into(), range("0:32"))], ScheduleType::GpuThreadBlock),
            Some(outer),
        );
        let t = st.add_tasklet("t", &["a"], &[], "", Some(inner));
        let path = st
            .add_memlet_path(&[a, outer, inner, t], Memlet::parse("A", "i + j").unwrap(), None, Some("a"))
            .unwrap();

        let volumes = derived_volumes(&sdfg).unwrap();
        assert_eq!(volumes[&(sid, path[0])].to_string(), "32*ceil(N/32)");

        let updated = propagate_sdfg(&mut sdfg).unwrap();
        assert_eq!(updated, 2);
        let st = sdfg.state(sid).unwrap();
        let outer_m = st.edge(path[0]).unwrap().memlet.as_ref().unwrap();
        assert_eq!(outer_m.subset.to_string(), "0:N");
        let mid = st.edge(path[1]).unwrap().memlet.as_ref().unwrap();
        assert_eq!(mid.subset.to_string(), "i:i + 32");
        assert_eq!(trip_count(st.map_of(outer).unwrap()).unwrap().to_string(), "ceil(N/32)");
    }
}
