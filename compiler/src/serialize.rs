// serialize.rs — JSON document format for programs
//
// Persists a program as a versioned JSON document. States carry their nodes
// and edges inline; map scope membership is encoded with the
// `scope_entry`/`scope_exit` pair on every node. Expressions, ranges and
// subsets are written as text and parsed once on load through an
// `ExprCache`. The document carries a SHA-256 content hash over its
// canonical compact form with the hash field blanked.
//
// Preconditions: none; any `Sdfg` can be written.
// Postconditions: `from_json(&to_json(p)?)` is structurally equal to `p`,
//                 next-ID counters included.
// Failure modes: unsupported major version → `SdfgError::Compatibility`
//                (checked before any graph is built); malformed JSON →
//                `SdfgError::Document`; inconsistent structure, a
//                repeated id or an id of `u32::MAX` → `SdfgError::Schema`;
//                bad expression text → `SdfgError::Parse`.
// Side effects: a content-hash mismatch on load is logged as a warning.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::data::{Data, DataKind};
use crate::dtypes::{AllocationLifetime, ElementType, Language, ScheduleType, StorageType};
use crate::error::{SdfgError, SdfgResult};
use crate::graph::{Connectors, Edge, Extensions, Map, Node, NodeKind, State};
use crate::id::{EdgeId, NodeId, StateId};
use crate::memlet::Memlet;
use crate::sdfg::{InterstateEdge, Sdfg};
use crate::subset::Subset;
use crate::symbolic::{Expr, ExprCache};

/// Version written into new documents.
pub const SDFG_VERSION: &str = "1.0";
/// Documents with any other major version are rejected.
pub const SUPPORTED_MAJOR: u32 = 1;

// ── Document shapes ─────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct SdfgDoc {
    #[serde(rename = "type")]
    kind: String,
    attributes: ProgramAttrs,
    #[serde(default)]
    nodes: Vec<StateDoc>,
    #[serde(default)]
    edges: Vec<InterstateDoc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ProgramAttrs {
    name: String,
    sdfg_version: String,
    #[serde(default)]
    hash: String,
    #[serde(default)]
    symbols: BTreeMap<String, ElementType>,
    #[serde(default)]
    arrays: BTreeMap<String, DataDoc>,
    #[serde(default)]
    start_state: Option<u32>,
    #[serde(default)]
    next_state_id: Option<u32>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    extensions: Extensions,
}

#[derive(Debug, Serialize, Deserialize)]
struct DataDoc {
    #[serde(rename = "type")]
    kind: String,
    attributes: DataAttrs,
}

#[derive(Debug, Serialize, Deserialize)]
struct DataAttrs {
    dtype: ElementType,
    shape: Vec<String>,
    #[serde(default)]
    strides: Vec<String>,
    #[serde(default)]
    storage: StorageType,
    #[serde(default)]
    transient: bool,
    #[serde(default)]
    lifetime: AllocationLifetime,
}

#[derive(Debug, Serialize, Deserialize)]
struct StateDoc {
    #[serde(rename = "type")]
    kind: String,
    id: u32,
    label: String,
    #[serde(default)]
    next_node_id: Option<u32>,
    #[serde(default)]
    next_edge_id: Option<u32>,
    #[serde(default)]
    nodes: Vec<NodeDoc>,
    #[serde(default)]
    edges: Vec<EdgeDoc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct NodeDoc {
    #[serde(rename = "type")]
    kind: String,
    id: u32,
    #[serde(default)]
    label: String,
    #[serde(default)]
    scope_entry: Option<u32>,
    #[serde(default)]
    scope_exit: Option<u32>,
    #[serde(default)]
    attributes: NodeAttrs,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    extensions: Extensions,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct NodeAttrs {
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    range: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    schedule: Option<ScheduleType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    language: Option<Language>,
    #[serde(skip_serializing_if = "Option::is_none")]
    in_connectors: Option<Connectors>,
    #[serde(skip_serializing_if = "Option::is_none")]
    out_connectors: Option<Connectors>,
}

#[derive(Debug, Serialize, Deserialize)]
struct EdgeDoc {
    id: u32,
    src: u32,
    dst: u32,
    #[serde(default)]
    src_connector: Option<String>,
    #[serde(default)]
    dst_connector: Option<String>,
    #[serde(default)]
    data: Option<MemletDoc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MemletDoc {
    #[serde(rename = "type")]
    kind: String,
    attributes: MemletAttrs,
}

#[derive(Debug, Serialize, Deserialize)]
struct MemletAttrs {
    data: String,
    subset: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    other_subset: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    volume: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    wcr: Option<String>,
    #[serde(default)]
    allow_oob: bool,
    #[serde(default)]
    dynamic: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct InterstateDoc {
    src: u32,
    dst: u32,
    data: InterstateData,
}

#[derive(Debug, Serialize, Deserialize)]
struct InterstateData {
    #[serde(rename = "type")]
    kind: String,
    attributes: InterstateAttrs,
}

#[derive(Debug, Serialize, Deserialize)]
struct InterstateAttrs {
    #[serde(default = "unconditional")]
    condition: String,
    #[serde(default)]
    assignments: BTreeMap<String, String>,
}

fn unconditional() -> String {
    "1".to_string()
}

// ── Writing ─────────────────────────────────────────────────────────────────

/// The document as a JSON value, hash included.
pub fn to_value(sdfg: &Sdfg) -> SdfgResult<Value> {
    let mut value = serde_json::to_value(write_doc(sdfg))?;
    let hash = content_hash(&value);
    set_hash(&mut value, Value::String(hash));
    Ok(value)
}

pub fn to_json(sdfg: &Sdfg) -> SdfgResult<String> {
    Ok(serde_json::to_string_pretty(&to_value(sdfg)?)?)
}

pub fn save(sdfg: &Sdfg, path: &Path) -> SdfgResult<()> {
    std::fs::write(path, to_json(sdfg)?)?;
    Ok(())
}

/// SHA-256 (hex) of the compact serialization of `doc` with its hash field
/// blanked. Object keys serialize in sorted order, so the form is canonical.
pub fn content_hash(doc: &Value) -> String {
    let mut blank = doc.clone();
    set_hash(&mut blank, Value::String(String::new()));
    let canonical = blank.to_string();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn set_hash(doc: &mut Value, hash: Value) {
    if let Some(attrs) = doc.get_mut("attributes").and_then(Value::as_object_mut) {
        attrs.insert("hash".to_string(), hash);
    }
}

fn write_doc(sdfg: &Sdfg) -> SdfgDoc {
    let arrays = sdfg
        .arrays
        .iter()
        .map(|(name, d)| (name.clone(), write_data(d)))
        .collect();
    SdfgDoc {
        kind: "SDFG".to_string(),
        attributes: ProgramAttrs {
            name: sdfg.name.clone(),
            sdfg_version: SDFG_VERSION.to_string(),
            hash: String::new(),
            symbols: sdfg.symbols.clone(),
            arrays,
            start_state: sdfg.start_state.map(|s| s.0),
            next_state_id: Some(sdfg.next_state_id()),
            extensions: sdfg.extensions.clone(),
        },
        nodes: sdfg.states().map(|(sid, st)| write_state(sid, st)).collect(),
        edges: sdfg
            .edges
            .iter()
            .map(|e| InterstateDoc {
                src: e.src.0,
                dst: e.dst.0,
                data: InterstateData {
                    kind: "InterstateEdge".to_string(),
                    attributes: InterstateAttrs {
                        condition: e.condition.clone(),
                        assignments: e.assignments.clone(),
                    },
                },
            })
            .collect(),
    }
}

fn write_data(d: &Data) -> DataDoc {
    let text = |exprs: &[Expr]| exprs.iter().map(Expr::to_string).collect();
    DataDoc {
        kind: match d.kind {
            DataKind::Array => "Array",
            DataKind::Scalar => "Scalar",
        }
        .to_string(),
        attributes: DataAttrs {
            dtype: d.dtype,
            shape: text(&d.shape),
            strides: text(&d.strides),
            storage: d.storage,
            transient: d.transient,
            lifetime: d.lifetime,
        },
    }
}

fn write_state(sid: StateId, state: &State) -> StateDoc {
    let (next_node, next_edge) = state.id_counters();
    StateDoc {
        kind: "SDFGState".to_string(),
        id: sid.0,
        label: state.label.clone(),
        next_node_id: Some(next_node),
        next_edge_id: Some(next_edge),
        nodes: state.nodes().map(|n| write_node(state, n)).collect(),
        edges: state.edges().map(write_edge).collect(),
    }
}

fn write_node(state: &State, node: &Node) -> NodeDoc {
    let parent = node.scope;
    let parent_exit = parent.and_then(|p| state.exit_of(p));
    let (scope_entry, scope_exit, attributes) = match &node.kind {
        NodeKind::Access { data } => (
            parent,
            parent_exit,
            NodeAttrs {
                data: Some(data.clone()),
                ..NodeAttrs::default()
            },
        ),
        NodeKind::MapEntry {
            map,
            exit,
            in_connectors,
            out_connectors,
        } => (
            parent,
            Some(*exit),
            NodeAttrs {
                params: Some(map.params.clone()),
                range: Some(Subset::new(map.range.clone()).to_string()),
                schedule: Some(map.schedule),
                in_connectors: Some(in_connectors.clone()),
                out_connectors: Some(out_connectors.clone()),
                ..NodeAttrs::default()
            },
        ),
        NodeKind::MapExit {
            entry,
            in_connectors,
            out_connectors,
        } => (
            Some(*entry),
            parent_exit,
            NodeAttrs {
                in_connectors: Some(in_connectors.clone()),
                out_connectors: Some(out_connectors.clone()),
                ..NodeAttrs::default()
            },
        ),
        NodeKind::Tasklet {
            code,
            language,
            in_connectors,
            out_connectors,
            ..
        } => (
            parent,
            parent_exit,
            NodeAttrs {
                code: Some(code.clone()),
                language: Some(*language),
                in_connectors: Some(in_connectors.clone()),
                out_connectors: Some(out_connectors.clone()),
                ..NodeAttrs::default()
            },
        ),
    };
    NodeDoc {
        kind: node.kind.type_name().to_string(),
        id: node.id.0,
        label: state.label_of(node.id),
        scope_entry: scope_entry.map(|n| n.0),
        scope_exit: scope_exit.map(|n| n.0),
        attributes,
        extensions: node.extensions.clone(),
    }
}

fn write_edge(edge: &Edge) -> EdgeDoc {
    EdgeDoc {
        id: edge.id.0,
        src: edge.src.0,
        dst: edge.dst.0,
        src_connector: edge.src_conn.clone(),
        dst_connector: edge.dst_conn.clone(),
        data: edge.memlet.as_ref().map(|m| MemletDoc {
            kind: "Memlet".to_string(),
            attributes: MemletAttrs {
                data: m.data.clone(),
                subset: m.subset.to_string(),
                other_subset: m.other_subset.as_ref().map(Subset::to_string),
                volume: Some(m.volume.to_string()),
                wcr: m.wcr_lambda(),
                allow_oob: m.allow_oob,
                dynamic: m.dynamic,
            },
        }),
    }
}

// ── Reading ─────────────────────────────────────────────────────────────────

pub fn load(path: &Path) -> SdfgResult<Sdfg> {
    let text = std::fs::read_to_string(path)?;
    from_json(&text)
}

pub fn from_json(text: &str) -> SdfgResult<Sdfg> {
    let value: Value = serde_json::from_str(text)?;
    from_value(value)
}

pub fn from_value(value: Value) -> SdfgResult<Sdfg> {
    check_version(&value)?;
    let stored = value
        .get("attributes")
        .and_then(|a| a.get("hash"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if !stored.is_empty() {
        let actual = content_hash(&value);
        if actual != stored {
            warn!(stored = %stored, actual = %actual, "document content hash mismatch");
        }
    }
    let doc: SdfgDoc = serde_json::from_value(value)?;
    if doc.kind != "SDFG" {
        return Err(SdfgError::Schema(format!(
            "top-level type is `{}`, expected `SDFG`",
            doc.kind
        )));
    }
    let mut cache = ExprCache::new();
    let sdfg = read_doc(doc, &mut cache)?;
    debug!(
        states = sdfg.state_count(),
        nodes = sdfg.node_count(),
        parsed_exprs = cache.len(),
        cache_hits = cache.hits(),
        "loaded program"
    );
    Ok(sdfg)
}

/// Reject documents whose major version differs from [`SUPPORTED_MAJOR`].
fn check_version(value: &Value) -> SdfgResult<()> {
    let found = value
        .get("attributes")
        .and_then(|a| a.get("sdfg_version"))
        .and_then(Value::as_str);
    let Some(found) = found else {
        return Err(SdfgError::Compatibility {
            found: "<missing>".to_string(),
            supported: SUPPORTED_MAJOR,
        });
    };
    let major = found.split('.').next().and_then(|m| m.trim().parse::<u32>().ok());
    if major != Some(SUPPORTED_MAJOR) {
        return Err(SdfgError::Compatibility {
            found: found.to_string(),
            supported: SUPPORTED_MAJOR,
        });
    }
    Ok(())
}

fn read_doc(doc: SdfgDoc, cache: &mut ExprCache) -> SdfgResult<Sdfg> {
    let attrs = doc.attributes;
    let mut sdfg = Sdfg::new(attrs.name);
    sdfg.symbols = attrs.symbols;
    sdfg.extensions = attrs.extensions;
    for (name, d) in attrs.arrays {
        let data = read_data(&name, d, cache)?;
        sdfg.add_datadesc(name, data)?;
    }
    for st in doc.nodes {
        if st.kind != "SDFGState" {
            return Err(SdfgError::Schema(format!(
                "state {} has type `{}`, expected `SDFGState`",
                st.id, st.kind
            )));
        }
        let sid = StateId(st.id);
        let state = read_state(st, cache)?;
        sdfg.insert_state(sid, state)?;
    }
    if let Some(next) = attrs.next_state_id {
        sdfg.advance_state_counter(next);
    }
    sdfg.start_state = attrs.start_state.map(StateId);
    for e in doc.edges {
        let a = e.data.attributes;
        sdfg.edges.push(InterstateEdge {
            src: StateId(e.src),
            dst: StateId(e.dst),
            condition: a.condition,
            assignments: a.assignments,
        });
    }
    Ok(sdfg)
}

fn read_data(name: &str, d: DataDoc, cache: &mut ExprCache) -> SdfgResult<Data> {
    let a = d.attributes;
    let shape = a
        .shape
        .iter()
        .map(|t| cache.get(t))
        .collect::<SdfgResult<Vec<_>>>()?;
    let mut data = match d.kind.as_str() {
        "Array" => Data::array(a.dtype, shape),
        "Scalar" => Data::scalar(a.dtype),
        other => {
            return Err(SdfgError::Schema(format!(
                "descriptor `{name}` has unknown type `{other}`"
            )))
        }
    };
    if !a.strides.is_empty() {
        data.strides = a
            .strides
            .iter()
            .map(|t| cache.get(t))
            .collect::<SdfgResult<Vec<_>>>()?;
    }
    data.storage = a.storage;
    data.transient = a.transient;
    data.lifetime = a.lifetime;
    Ok(data)
}

fn read_state(doc: StateDoc, cache: &mut ExprCache) -> SdfgResult<State> {
    let mut state = State::new(doc.label);
    state.advance_id_counters(
        doc.next_node_id.unwrap_or_default(),
        doc.next_edge_id.unwrap_or_default(),
    );
    // A MapExit takes the scope of its entry, so entries are placed first.
    let parents: BTreeMap<u32, Option<u32>> = doc
        .nodes
        .iter()
        .filter(|n| n.kind == "MapEntry")
        .map(|n| (n.id, n.scope_entry))
        .collect();
    for n in doc.nodes {
        let node = read_node(n, &parents)?;
        state.insert_node(node)?;
    }
    for e in doc.edges {
        let memlet = match e.data {
            Some(m) => Some(read_memlet(m, cache)?),
            None => None,
        };
        state.insert_edge(Edge {
            id: EdgeId(e.id),
            src: NodeId(e.src),
            src_conn: e.src_connector,
            dst: NodeId(e.dst),
            dst_conn: e.dst_connector,
            memlet,
        })?;
    }
    Ok(state)
}

fn read_node(n: NodeDoc, parents: &BTreeMap<u32, Option<u32>>) -> SdfgResult<Node> {
    let missing = |what: &str| SdfgError::Schema(format!("{} {} lacks `{what}`", n.kind, n.id));
    let a = n.attributes;
    let (kind, scope) = match n.kind.as_str() {
        "AccessNode" => {
            let data = a.data.ok_or_else(|| missing("data"))?;
            (NodeKind::Access { data }, n.scope_entry)
        }
        "MapEntry" => {
            let exit = n.scope_exit.ok_or_else(|| missing("scope_exit"))?;
            let range = a.range.ok_or_else(|| missing("range"))?;
            let params = a.params.unwrap_or_default();
            let map = Map {
                label: n.label.clone(),
                params,
                range: Subset::parse(&range)?.dims,
                schedule: a.schedule.unwrap_or_default(),
            };
            (
                NodeKind::MapEntry {
                    map,
                    exit: NodeId(exit),
                    in_connectors: a.in_connectors.unwrap_or_default(),
                    out_connectors: a.out_connectors.unwrap_or_default(),
                },
                n.scope_entry,
            )
        }
        "MapExit" => {
            let entry = n.scope_entry.ok_or_else(|| missing("scope_entry"))?;
            let scope = parents.get(&entry).copied().ok_or_else(|| {
                SdfgError::Schema(format!("MapExit {} names missing MapEntry {entry}", n.id))
            })?;
            (
                NodeKind::MapExit {
                    entry: NodeId(entry),
                    in_connectors: a.in_connectors.unwrap_or_default(),
                    out_connectors: a.out_connectors.unwrap_or_default(),
                },
                scope,
            )
        }
        "Tasklet" => (
            NodeKind::Tasklet {
                label: n.label.clone(),
                code: a.code.unwrap_or_default(),
                language: a.language.unwrap_or_default(),
                in_connectors: a.in_connectors.unwrap_or_default(),
                out_connectors: a.out_connectors.unwrap_or_default(),
            },
            n.scope_entry,
        ),
        other => {
            return Err(SdfgError::Schema(format!(
                "node {} has unknown type `{other}`",
                n.id
            )))
        }
    };
    Ok(Node {
        id: NodeId(n.id),
        kind,
        scope: scope.map(NodeId),
        extensions: n.extensions,
    })
}

fn read_memlet(doc: MemletDoc, cache: &mut ExprCache) -> SdfgResult<Memlet> {
    if doc.kind != "Memlet" {
        return Err(SdfgError::Schema(format!(
            "edge data has type `{}`, expected `Memlet`",
            doc.kind
        )));
    }
    let a = doc.attributes;
    let mut memlet = Memlet::new(a.data, Subset::parse(&a.subset)?);
    if let Some(other) = a.other_subset {
        memlet.other_subset = Some(Subset::parse(&other)?);
    }
    if let Some(volume) = a.volume {
        memlet.volume = cache.get(&volume)?;
    }
    if let Some(text) = a.wcr.as_deref() {
        memlet = memlet.with_wcr_lambda(text);
    }
    memlet.allow_oob = a.allow_oob;
    memlet.dynamic = a.dynamic;
    Ok(memlet)
}

// ── Tests ───────────────────────────────────────────────────────────────────
