// sdfg.rs — Program container: states, control flow, symbols, descriptors
//
// An `Sdfg` owns its states, the interstate control edges between them, the
// symbol table and the descriptor table. Cross references between states are
// `StateId`s; nothing inside a state points outside the program.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use crate::data::{Data, DescriptorTable};
use crate::dtypes::{ElementType, StorageType};
use crate::error::{SdfgError, SdfgResult};
use crate::graph::{Extensions, State};
use crate::id::StateId;
use crate::symbolic::Expr;

/// A control-flow transition between two states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterstateEdge {
    pub src: StateId,
    pub dst: StateId,
    /// Condition text; `"1"` is unconditional.
    pub condition: String,
    /// Symbol assignments performed when the edge is taken.
    pub assignments: BTreeMap<String, String>,
}

impl InterstateEdge {
    pub fn new(src: StateId, dst: StateId) -> Self {
        InterstateEdge {
            src,
            dst,
            condition: "1".to_string(),
            assignments: BTreeMap::new(),
        }
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = condition.into();
        self
    }

    pub fn with_assignment(mut self, symbol: impl Into<String>, value: impl Into<String>) -> Self {
        self.assignments.insert(symbol.into(), value.into());
        self
    }

    pub fn is_unconditional(&self) -> bool {
        matches!(self.condition.trim(), "" | "1" | "True" | "true")
    }
}

/// A complete program.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sdfg {
    pub name: String,
    pub symbols: BTreeMap<String, ElementType>,
    pub arrays: DescriptorTable,
    states: BTreeMap<StateId, State>,
    pub edges: Vec<InterstateEdge>,
    pub start_state: Option<StateId>,
    pub extensions: Extensions,
    next_state: u32,
}

impl Sdfg {
    pub fn new(name: impl Into<String>) -> Self {
        Sdfg {
            name: name.into(),
            ..Sdfg::default()
        }
    }

    // ── Symbols and descriptors ─────────────────────────────────────────

    pub fn add_symbol(&mut self, name: impl Into<String>, dtype: ElementType) {
        self.symbols.insert(name.into(), dtype);
    }

    /// A non-transient array in default storage.
    pub fn add_array(
        &mut self,
        name: impl Into<String>,
        shape: Vec<Expr>,
        dtype: ElementType,
        storage: StorageType,
    ) -> SdfgResult<()> {
        self.arrays
            .insert(name, Data::array(dtype, shape).with_storage(storage))
    }

    pub fn add_scalar(&mut self, name: impl Into<String>, dtype: ElementType) -> SdfgResult<()> {
        self.arrays.insert(name, Data::scalar(dtype))
    }

    /// A compiler-managed temporary array.
    pub fn add_transient(
        &mut self,
        name: impl Into<String>,
        shape: Vec<Expr>,
        dtype: ElementType,
        storage: StorageType,
    ) -> SdfgResult<()> {
        self.arrays.insert(
            name,
            Data::array(dtype, shape).with_storage(storage).transient(),
        )
    }

    pub fn add_datadesc(&mut self, name: impl Into<String>, data: Data) -> SdfgResult<()> {
        self.arrays.insert(name, data)
    }

    /// Symbols assigned on any interstate edge.
    pub fn interstate_symbols(&self) -> BTreeSet<String> {
        self.edges
            .iter()
            .flat_map(|e| e.assignments.keys().cloned())
            .collect()
    }

    /// Program-wide symbols: declared ones plus interstate assignments.
    pub fn global_symbols(&self) -> BTreeSet<String> {
        let mut out: BTreeSet<String> = self.symbols.keys().cloned().collect();
        out.extend(self.interstate_symbols());
        out
    }

    // ── States ──────────────────────────────────────────────────────────

    /// Add a state. The first state added becomes the start state.
    pub fn add_state(&mut self, label: impl Into<String>) -> StateId {
        let id = StateId(self.next_state);
        self.next_state += 1;
        self.states.insert(id, State::new(label));
        if self.start_state.is_none() {
            self.start_state = Some(id);
        }
        id
    }

    /// Insert a state under an ID read from a document.
    pub fn insert_state(&mut self, id: StateId, state: State) -> SdfgResult<()> {
        if self.states.contains_key(&id) {
            return Err(SdfgError::Schema(format!("duplicate state id {}", id.0)));
        }
        let next = id
            .0
            .checked_add(1)
            .ok_or_else(|| SdfgError::Schema(format!("state id {} is out of range", id.0)))?;
        self.next_state = self.next_state.max(next);
        self.states.insert(id, state);
        Ok(())
    }

    /// The ID the next `add_state` call would return.
    pub fn next_state_id(&self) -> u32 {
        self.next_state
    }

    pub fn advance_state_counter(&mut self, next: u32) {
        self.next_state = self.next_state.max(next);
    }

    pub fn state(&self, id: StateId) -> SdfgResult<&State> {
        self.states.get(&id).ok_or(SdfgError::UnknownState(id))
    }

    pub fn state_mut(&mut self, id: StateId) -> SdfgResult<&mut State> {
        self.states.get_mut(&id).ok_or(SdfgError::UnknownState(id))
    }

    /// States in ID order.
    pub fn states(&self) -> impl Iterator<Item = (StateId, &State)> {
        self.states.iter().map(|(id, s)| (*id, s))
    }

    pub fn states_mut(&mut self) -> impl Iterator<Item = (StateId, &mut State)> {
        self.states.iter_mut().map(|(id, s)| (*id, s))
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    pub fn add_interstate_edge(&mut self, edge: InterstateEdge) -> SdfgResult<usize> {
        for s in [edge.src, edge.dst] {
            if !self.states.contains_key(&s) {
                return Err(SdfgError::UnknownState(s));
            }
        }
        self.edges.push(edge);
        Ok(self.edges.len() - 1)
    }

    pub fn out_transitions(&self, state: StateId) -> Vec<(usize, &InterstateEdge)> {
        self.edges
            .iter()
            .enumerate()
            .filter(|(_, e)| e.src == state)
            .collect()
    }

    /// Breadth-first order from the start state; unreachable states follow
    /// in ID order.
    pub fn states_in_order(&self) -> Vec<StateId> {
        let mut seen = BTreeSet::new();
        let mut order = Vec::with_capacity(self.states.len());
        let mut queue: VecDeque<StateId> = self.start_state.into_iter().collect();
        while let Some(s) = queue.pop_front() {
            if !self.states.contains_key(&s) || !seen.insert(s) {
                continue;
            }
            order.push(s);
            for (_, e) in self.out_transitions(s) {
                queue.push_back(e.dst);
            }
        }
        for &id in self.states.keys() {
            if seen.insert(id) {
                order.push(id);
            }
        }
        order
    }

    /// Total node count across all states.
    pub fn node_count(&self) -> usize {
        self.states.values().map(State::node_count).sum()
    }
}

impl fmt::Display for Sdfg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "sdfg {}", self.name)?;
        for (name, ty) in &self.symbols {
            writeln!(f, "symbol {name}: {ty}")?;
        }
        for (name, d) in self.arrays.iter() {
            let shape: Vec<String> = d.shape.iter().map(ToString::to_string).collect();
            writeln!(
                f,
                "{}{name}: {}[{}] @ {}",
                if d.transient { "transient " } else { "" },
                d.dtype,
                shape.join(", "),
                d.storage
            )?;
        }
        for id in self.states_in_order() {
            if let Some(s) = self.states.get(&id) {
                write!(f, "{s}")?;
            }
        }
        Ok(())
    }
}
