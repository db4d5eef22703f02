// codegen.rs — CUDA-flavoured C++ generation from an execution plan
//
// Emits one translation unit: a preamble of integer helpers, one
// `__global__` function per kernel in the plan, and a host function that
// allocates transients, performs copies, launches kernels and walks the
// state machine with labels and gotos. Map parameters are recovered from
// `blockIdx`/`threadIdx` inside kernels; tasklet connectors become locals
// loaded from and stored to their memlets; reductions become atomics in
// device code.
//
// Preconditions: the plan comes from `lower::lower` on the same program
//                without error diagnostics.
// Postconditions: returns `CodegenResult` with the generated source.
// Failure modes: reductions or schedules the backend cannot express
//                produce diagnostics; the code is still emitted.
// Side effects: none.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::diag::codes;
use crate::diag::{DiagKind, Diagnostic, Location};
use crate::dtypes::{ElementType, Language, StorageType};
use crate::graph::{NodeKind, State};
use crate::id::{NodeId, StateId};
use crate::lower::{
    ident, Allocation, AllocationSite, CopyDirection, DataCopy, ExecutionPlan, Kernel, LoopNest,
    PlanItem,
};
use crate::memlet::Wcr;
use crate::sdfg::Sdfg;
use crate::subset::{Range, Subset};
use crate::symbolic::Expr;

// ── Public types ────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct CodegenResult {
    pub generated: GeneratedCode,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug)]
pub struct GeneratedCode {
    pub cpp_source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodegenOptions {
    /// Threads per block for kernels without a thread-block map.
    pub block_size: u32,
    /// Annotate multicore maps with OpenMP pragmas.
    pub openmp: bool,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        CodegenOptions {
            block_size: 128,
            openmp: true,
        }
    }
}

// ── Public entry point ──────────────────────────────────────────────────────

pub fn emit(sdfg: &Sdfg, plan: &ExecutionPlan, options: &CodegenOptions) -> CodegenResult {
    let mut ctx = CodegenCtx {
        sdfg,
        plan,
        options,
        kernels: String::new(),
        diagnostics: Vec::new(),
    };
    let host = ctx.emit_host();
    let mut out = String::with_capacity(4096);
    out.push_str(PREAMBLE);
    out.push_str(&ctx.kernels);
    out.push_str(&host);
    CodegenResult {
        generated: GeneratedCode { cpp_source: out },
        diagnostics: ctx.diagnostics,
    }
}

const PREAMBLE: &str = "\
#include <algorithm>
#include <cstdint>
#include <cuda_runtime.h>

static inline __host__ __device__ long long int_floor(long long a, long long b) {
    return a / b - ((a % b != 0) && ((a < 0) != (b < 0)));
}
static inline __host__ __device__ long long int_ceil(long long a, long long b) {
    return a / b + ((a % b != 0) && ((a < 0) == (b < 0)));
}
static inline __host__ __device__ long long int_mod(long long a, long long b) {
    return ((a % b) + b) % b;
}
static inline __host__ __device__ long long int_min(long long a, long long b) {
    return a < b ? a : b;
}
static inline __host__ __device__ long long int_max(long long a, long long b) {
    return a > b ? a : b;
}

";

/// Grid and block dimension names, innermost map parameter first.
const DIMS: [&str; 3] = ["x", "y", "z"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ctx {
    Host,
    /// Inside an OpenMP parallel loop.
    HostParallel,
    Device,
}

// ── Internal context ────────────────────────────────────────────────────────

struct CodegenCtx<'a> {
    sdfg: &'a Sdfg,
    plan: &'a ExecutionPlan,
    options: &'a CodegenOptions,
    kernels: String,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> CodegenCtx<'a> {
    // ── Host function ───────────────────────────────────────────────────

    fn emit_host(&mut self) -> String {
        let sdfg = self.sdfg;
        let mut out = String::new();
        let _ = writeln!(
            out,
            "void __program_{}({}) {{",
            ident(&sdfg.name),
            self.host_parameters().join(", ")
        );
        for sym in sdfg.interstate_symbols() {
            if !sdfg.symbols.contains_key(&sym) {
                let _ = writeln!(out, "    long long {sym} = 0;");
            }
        }
        let plan = self.plan;
        let program_allocs: Vec<&Allocation> =
            plan.allocations_at(AllocationSite::Program).collect();
        for a in &program_allocs {
            self.emit_alloc(&mut out, "    ", a);
        }
        if let Some(start) = sdfg.start_state {
            let _ = writeln!(out, "    goto __state_{};", start.0);
        }

        for sp in &plan.states {
            let Ok(state) = sdfg.state(sp.id) else {
                continue;
            };
            let _ = writeln!(out, "__state_{}: // {}", sp.id.0, sp.label);
            out.push_str("    {\n");
            let state_allocs: Vec<&Allocation> =
                plan.allocations_at(AllocationSite::State(sp.id)).collect();
            for a in &state_allocs {
                self.emit_alloc(&mut out, "        ", a);
            }
            self.emit_items(&mut out, sp.id, state, &sp.body, 2, Ctx::Host);
            for a in state_allocs.iter().rev() {
                emit_free(&mut out, "        ", a);
            }
            out.push_str("    }\n");
            self.emit_transitions(&mut out, sp.id);
        }

        out.push_str("__exit:\n");
        for a in program_allocs.iter().rev() {
            emit_free(&mut out, "    ", a);
        }
        out.push_str("    return;\n}\n");
        out
    }

    fn host_parameters(&self) -> Vec<String> {
        let mut params: Vec<String> = self
            .sdfg
            .arrays
            .iter()
            .filter(|(_, d)| !d.transient)
            .map(|(name, d)| format!("{}* {name}", d.dtype.c_type()))
            .collect();
        params.extend(
            self.sdfg
                .symbols
                .iter()
                .map(|(name, ty)| format!("{} {name}", ty.c_type())),
        );
        params
    }

    fn emit_transitions(&self, out: &mut String, sid: StateId) {
        let mut unconditional = false;
        for (_, edge) in self.sdfg.out_transitions(sid) {
            let assigns: String = edge
                .assignments
                .iter()
                .map(|(k, v)| format!("{k} = {}; ", c_condition(v)))
                .collect();
            if edge.is_unconditional() {
                let _ = writeln!(out, "    {{ {assigns}goto __state_{}; }}", edge.dst.0);
                unconditional = true;
                break;
            }
            let _ = writeln!(
                out,
                "    if ({}) {{ {assigns}goto __state_{}; }}",
                c_condition(&edge.condition),
                edge.dst.0
            );
        }
        if !unconditional {
            out.push_str("    goto __exit;\n");
        }
    }

    // ── Plan items ──────────────────────────────────────────────────────

    fn emit_items(
        &mut self,
        out: &mut String,
        sid: StateId,
        state: &State,
        items: &[PlanItem],
        depth: usize,
        ctx: Ctx,
    ) {
        let pad = "    ".repeat(depth);
        for item in items {
            match item {
                PlanItem::Kernel(k) if ctx == Ctx::Device => {
                    self.unsupported(sid, k.entry, format!("kernel `{}` nested in device code", k.name));
                }
                PlanItem::Kernel(k) => {
                    self.emit_kernel(sid, state, k);
                    self.emit_launch(out, &pad, k);
                }
                PlanItem::ThreadBlock(nest) if ctx == Ctx::Device => {
                    self.emit_thread_block(out, sid, state, nest, depth);
                }
                PlanItem::ParallelFor(nest) if ctx == Ctx::Device => {
                    self.unsupported(sid, nest.entry, format!("multicore map `{}` in device code", nest.label));
                }
                PlanItem::ParallelFor(nest) => {
                    if self.options.openmp {
                        let collapse = if nest.params.len() > 1 {
                            format!(" collapse({})", nest.params.len())
                        } else {
                            String::new()
                        };
                        let _ = writeln!(out, "{pad}#pragma omp parallel for{collapse}");
                    }
                    self.emit_loop(out, sid, state, nest, depth, Ctx::HostParallel);
                }
                PlanItem::ThreadBlock(nest) | PlanItem::Loop(nest) => {
                    self.emit_loop(out, sid, state, nest, depth, ctx);
                }
                PlanItem::Tasklet { node, .. } => {
                    self.emit_tasklet(out, sid, state, *node, depth, ctx);
                }
                PlanItem::Copy(c) => self.emit_copy(out, &pad, c, ctx),
            }
        }
    }

    fn emit_loop(
        &mut self,
        out: &mut String,
        sid: StateId,
        state: &State,
        nest: &LoopNest,
        depth: usize,
        ctx: Ctx,
    ) {
        let mut inner = depth;
        for (param, r) in nest.params.iter().zip(&nest.range) {
            let pad = "    ".repeat(inner);
            let _ = writeln!(
                out,
                "{pad}for (long long {param} = {}; {param} <= {}; {param} += {}) {{",
                c_expr(&r.start),
                c_expr(&r.end),
                c_expr(&r.step)
            );
            inner += 1;
        }
        self.emit_scope_body(out, sid, state, nest.entry, &nest.body, inner, ctx);
        for d in (depth..inner).rev() {
            let _ = writeln!(out, "{}}}", "    ".repeat(d));
        }
    }

    /// Scope-local allocations, then the body, then the matching frees.
    #[allow(clippy::too_many_arguments)]
    fn emit_scope_body(
        &mut self,
        out: &mut String,
        sid: StateId,
        state: &State,
        entry: NodeId,
        body: &[PlanItem],
        depth: usize,
        ctx: Ctx,
    ) {
        let pad = "    ".repeat(depth);
        let plan = self.plan;
        let allocs: Vec<&Allocation> = plan
            .allocations_at(AllocationSite::Scope(sid, entry))
            .collect();
        for a in &allocs {
            self.emit_alloc(out, &pad, a);
        }
        self.emit_items(out, sid, state, body, depth, ctx);
        for a in allocs.iter().rev() {
            emit_free(out, &pad, a);
        }
    }

    // ── Kernels ─────────────────────────────────────────────────────────

    fn emit_kernel(&mut self, sid: StateId, state: &State, k: &Kernel) {
        if k.params.len() > DIMS.len() {
            self.unsupported(
                sid,
                k.entry,
                format!("kernel `{}` has more than {} dimensions", k.name, DIMS.len()),
            );
        }
        let has_block = thread_block_of(k).is_some();
        let mut out = String::new();
        let _ = writeln!(
            out,
            "__global__ void {}({}) {{",
            k.name,
            self.kernel_parameters(k).join(", ")
        );
        for (i, (param, r)) in k.params.iter().zip(&k.grid).rev().enumerate().take(DIMS.len()) {
            let dim = DIMS[i];
            let unit = if has_block || i > 0 {
                format!("blockIdx.{dim}")
            } else {
                format!("(blockIdx.{dim} * blockDim.{dim} + threadIdx.{dim})")
            };
            let _ = writeln!(
                out,
                "    const long long {param} = {} + {} * {unit};",
                c_expr(&r.start),
                factor(&r.step)
            );
            let _ = writeln!(out, "    if ({param} > {}) return;", c_expr(&r.end));
        }
        self.emit_scope_body(&mut out, sid, state, k.entry, &k.body, 1, Ctx::Device);
        out.push_str("}\n\n");
        self.kernels.push_str(&out);
    }

    fn emit_launch(&self, out: &mut String, pad: &str, k: &Kernel) {
        let mut grid = vec!["1".to_string(); DIMS.len()];
        let mut block = vec!["1".to_string(); DIMS.len()];
        let trips = |r: &Range| r.trip_count().unwrap_or_else(|_| Expr::one());
        match thread_block_of(k) {
            Some(tb) => {
                for (i, r) in tb.range.iter().rev().enumerate().take(DIMS.len()) {
                    block[i] = c_expr(&trips(r));
                }
                for (i, r) in k.grid.iter().rev().enumerate().take(DIMS.len()) {
                    grid[i] = c_expr(&trips(r));
                }
            }
            None => {
                block[0] = self.options.block_size.to_string();
                for (i, r) in k.grid.iter().rev().enumerate().take(DIMS.len()) {
                    grid[i] = if i == 0 {
                        format!("int_ceil({}, {})", c_expr(&trips(r)), self.options.block_size)
                    } else {
                        c_expr(&trips(r))
                    };
                }
            }
        }
        let mut args = k.arguments.clone();
        args.extend(self.kernel_symbols());
        let _ = writeln!(
            out,
            "{pad}{}<<<dim3({}), dim3({})>>>({});",
            k.name,
            grid.join(", "),
            block.join(", "),
            args.join(", ")
        );
    }

    fn emit_thread_block(
        &mut self,
        out: &mut String,
        sid: StateId,
        state: &State,
        nest: &LoopNest,
        depth: usize,
    ) {
        let pad = "    ".repeat(depth);
        let _ = writeln!(out, "{pad}{{");
        let inner = "    ".repeat(depth + 1);
        let mut guards = Vec::new();
        for (i, (param, r)) in nest.params.iter().zip(&nest.range).rev().enumerate().take(DIMS.len()) {
            let _ = writeln!(
                out,
                "{inner}const long long {param} = {} + {} * threadIdx.{};",
                c_expr(&r.start),
                factor(&r.step),
                DIMS[i]
            );
            guards.push(format!("{param} <= {}", c_expr(&r.end)));
        }
        let _ = writeln!(out, "{inner}if ({}) {{", guards.join(" && "));
        self.emit_scope_body(out, sid, state, nest.entry, &nest.body, depth + 2, Ctx::Device);
        let _ = writeln!(out, "{inner}}}");
        let _ = writeln!(out, "{pad}}}");
        let _ = writeln!(out, "{pad}__syncthreads();");
    }

    fn kernel_parameters(&self, k: &Kernel) -> Vec<String> {
        let mut params: Vec<String> = k
            .arguments
            .iter()
            .map(|name| format!("{}* {name}", self.dtype_of(name).c_type()))
            .collect();
        let sdfg = self.sdfg;
        params.extend(self.kernel_symbols().into_iter().map(|s| {
            let ty = sdfg
                .symbols
                .get(&s)
                .map_or("long long", |t| t.c_type());
            format!("{ty} {s}")
        }));
        params
    }

    /// Program symbols passed to every kernel, in name order.
    fn kernel_symbols(&self) -> Vec<String> {
        let all: BTreeSet<String> = self.sdfg.global_symbols();
        all.into_iter().collect()
    }

    // ── Tasklets ────────────────────────────────────────────────────────

    fn emit_tasklet(
        &mut self,
        out: &mut String,
        sid: StateId,
        state: &State,
        node: NodeId,
        depth: usize,
        ctx: Ctx,
    ) {
        let Some(NodeKind::Tasklet {
            label,
            code,
            language,
            ..
        }) = state.node(node).map(|n| &n.kind)
        else {
            return;
        };
        let pad = "    ".repeat(depth);
        let inner = "    ".repeat(depth + 1);
        let _ = writeln!(out, "{pad}{{ // {label}");

        for edge in state.in_edges(node) {
            let (Some(conn), Some(m)) = (&edge.dst_conn, &edge.memlet) else {
                continue;
            };
            let ty = self.dtype_of(&m.data).c_type();
            let target = self.element(&m.data, &m.subset);
            if is_element(&m.subset) {
                let _ = writeln!(out, "{inner}const {ty} {conn} = {target};");
            } else {
                let _ = writeln!(out, "{inner}const {ty}* {conn} = &{target};");
            }
        }
        let mut write_backs = Vec::new();
        for edge in state.out_edges(node) {
            let (Some(conn), Some(m)) = (&edge.src_conn, &edge.memlet) else {
                continue;
            };
            let ty = self.dtype_of(&m.data).c_type();
            let target = self.element(&m.data, &m.subset);
            if is_element(&m.subset) {
                let _ = writeln!(out, "{inner}{ty} {conn};");
                write_backs.push((target, conn.clone(), m.wcr.clone()));
            } else {
                let _ = writeln!(out, "{inner}{ty}* {conn} = &{target};");
            }
        }

        for line in code.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let terminated = line.ends_with(';') || line.ends_with('{') || line.ends_with('}');
            if *language == Language::Python && !terminated {
                let _ = writeln!(out, "{inner}{line};");
            } else {
                let _ = writeln!(out, "{inner}{line}");
            }
        }

        for (target, value, wcr) in write_backs {
            self.emit_write_back(out, &inner, sid, node, &target, &value, wcr.as_ref(), ctx);
        }
        let _ = writeln!(out, "{pad}}}");
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_write_back(
        &mut self,
        out: &mut String,
        pad: &str,
        sid: StateId,
        node: NodeId,
        target: &str,
        value: &str,
        wcr: Option<&Wcr>,
        ctx: Ctx,
    ) {
        let line = match (wcr, ctx) {
            (None, _) => format!("{target} = {value};"),
            (Some(Wcr::Sum), Ctx::Device) => format!("atomicAdd(&{target}, {value});"),
            (Some(Wcr::Min), Ctx::Device) => format!("atomicMin(&{target}, {value});"),
            (Some(Wcr::Max), Ctx::Device) => format!("atomicMax(&{target}, {value});"),
            (Some(Wcr::Sum), Ctx::HostParallel) => {
                format!("#pragma omp atomic\n{pad}{target} += {value};")
            }
            (Some(Wcr::Sum), Ctx::Host) => format!("{target} += {value};"),
            (Some(Wcr::Min), Ctx::HostParallel) => {
                format!("#pragma omp critical\n{pad}{target} = std::min({target}, {value});")
            }
            (Some(Wcr::Min), Ctx::Host) => format!("{target} = std::min({target}, {value});"),
            (Some(Wcr::Max), Ctx::HostParallel) => {
                format!("#pragma omp critical\n{pad}{target} = std::max({target}, {value});")
            }
            (Some(Wcr::Max), Ctx::Host) => format!("{target} = std::max({target}, {value});"),
            (Some(Wcr::Product), Ctx::HostParallel) => {
                format!("#pragma omp atomic\n{pad}{target} *= {value};")
            }
            (Some(Wcr::Product), Ctx::Host) => format!("{target} *= {value};"),
            (Some(Wcr::Product), Ctx::Device) => {
                self.diagnostics.push(
                    Diagnostic::warning(
                        DiagKind::Conflict,
                        Location::Node(sid, node),
                        format!("product reduction into `{target}` is emitted without an atomic"),
                    )
                    .with_code(codes::W0603),
                );
                format!("{target} *= {value};")
            }
            (Some(Wcr::Custom(lambda)), _) => {
                self.diagnostics.push(
                    Diagnostic::error(
                        DiagKind::Conflict,
                        Location::Node(sid, node),
                        format!("custom reduction `{lambda}` cannot be emitted"),
                    )
                    .with_code(codes::E0403)
                    .with_hint("use Sum, Product, Min or Max"),
                );
                format!("{target} = {value}; // unsupported reduction")
            }
        };
        let _ = writeln!(out, "{pad}{line}");
    }

    // ── Copies ──────────────────────────────────────────────────────────

    fn emit_copy(&mut self, out: &mut String, pad: &str, c: &DataCopy, ctx: Ctx) {
        let ty = self.dtype_of(&c.src).c_type();
        let src_off = c_expr(&self.offset(&c.src, &c.src_subset));
        let dst_off = c_expr(&self.offset(&c.dst, &c.dst_subset));
        let volume = c_expr(&c.volume);
        if ctx == Ctx::Device {
            let _ = writeln!(
                out,
                "{pad}for (long long __k = 0; __k < {volume}; ++__k) {}[{dst_off} + __k] = {}[{src_off} + __k];",
                c.dst, c.src
            );
            return;
        }
        let kind = match c.direction {
            CopyDirection::HostToHost => {
                let _ = writeln!(
                    out,
                    "{pad}std::copy_n({} + {src_off}, {volume}, {} + {dst_off});",
                    c.src, c.dst
                );
                return;
            }
            CopyDirection::HostToDevice => "cudaMemcpyHostToDevice",
            CopyDirection::DeviceToHost => "cudaMemcpyDeviceToHost",
            CopyDirection::DeviceToDevice => "cudaMemcpyDeviceToDevice",
        };
        let _ = writeln!(
            out,
            "{pad}cudaMemcpy({} + {dst_off}, {} + {src_off}, sizeof({ty}) * ({volume}), {kind});",
            c.dst, c.src
        );
    }

    // ── Helpers ─────────────────────────────────────────────────────────

    fn dtype_of(&self, data: &str) -> ElementType {
        self.sdfg
            .arrays
            .get(data)
            .map_or(ElementType::Float64, |d| d.dtype)
    }

    /// Linear offset of a subset's first element.
    fn offset(&self, data: &str, subset: &Subset) -> Expr {
        let Some(desc) = self.sdfg.arrays.get(data) else {
            return Expr::zero();
        };
        let mut total = Expr::zero();
        for (r, stride) in subset.dims.iter().zip(&desc.strides) {
            total = Expr::add(total, Expr::mul(r.start.clone(), stride.clone()));
        }
        total.simplify().unwrap_or(total)
    }

    fn element(&self, data: &str, subset: &Subset) -> String {
        format!("{data}[{}]", c_expr(&self.offset(data, subset)))
    }

    fn emit_alloc(&self, out: &mut String, pad: &str, a: &Allocation) {
        let ty = self.dtype_of(&a.data).c_type();
        let size = c_expr(&a.size);
        let _ = match a.storage {
            StorageType::GpuGlobal => writeln!(
                out,
                "{pad}{ty}* {n};\n{pad}cudaMalloc((void**)&{n}, sizeof({ty}) * ({size}));",
                n = a.data
            ),
            StorageType::CpuPinned => writeln!(
                out,
                "{pad}{ty}* {n};\n{pad}cudaMallocHost((void**)&{n}, sizeof({ty}) * ({size}));",
                n = a.data
            ),
            StorageType::GpuShared => writeln!(out, "{pad}__shared__ {ty} {}[{size}];", a.data),
            StorageType::Default | StorageType::Register if a.size.as_int().is_some() => {
                writeln!(out, "{pad}{ty} {}[{size}];", a.data)
            }
            _ => writeln!(out, "{pad}{ty}* {} = new {ty}[{size}];", a.data),
        };
    }

    fn unsupported(&mut self, sid: StateId, node: NodeId, message: String) {
        self.diagnostics.push(
            Diagnostic::error(DiagKind::ScheduleCompatibility, Location::Node(sid, node), message)
                .with_code(codes::E0403),
        );
    }
}

fn thread_block_of(k: &Kernel) -> Option<&LoopNest> {
    k.body.iter().find_map(|item| match item {
        PlanItem::ThreadBlock(nest) => Some(nest),
        _ => None,
    })
}

fn is_element(subset: &Subset) -> bool {
    subset.dims.iter().all(Range::is_index)
}

fn emit_free(out: &mut String, pad: &str, a: &Allocation) {
    let _ = match a.storage {
        StorageType::GpuGlobal => writeln!(out, "{pad}cudaFree({});", a.data),
        StorageType::CpuPinned => writeln!(out, "{pad}cudaFreeHost({});", a.data),
        StorageType::GpuShared => Ok(()),
        StorageType::Default | StorageType::Register if a.size.as_int().is_some() => Ok(()),
        _ => writeln!(out, "{pad}delete[] {};", a.data),
    };
}

// ── Expression printing ─────────────────────────────────────────────────────

/// C++ text of a symbolic expression.
pub fn c_expr(e: &Expr) -> String {
    match e {
        Expr::Int(v) => v.to_string(),
        Expr::Sym(name) => name.clone(),
        Expr::Neg(a) => format!("-{}", factor(a)),
        Expr::Add(a, b) => format!("{} + {}", c_expr(a), term(b)),
        Expr::Sub(a, b) => format!("{} - {}", c_expr(a), term(b)),
        Expr::Mul(a, b) => format!("{}*{}", factor(a), factor(b)),
        Expr::Pow(a, k) => match k {
            0 => "1".to_string(),
            _ => vec![factor(a); *k as usize].join("*"),
        },
        Expr::FloorDiv(a, b) => format!("int_floor({}, {})", c_expr(a), c_expr(b)),
        Expr::CeilDiv(a, b) => format!("int_ceil({}, {})", c_expr(a), c_expr(b)),
        Expr::Mod(a, b) => format!("int_mod({}, {})", c_expr(a), c_expr(b)),
        Expr::Min(args) => fold_call("int_min", args),
        Expr::Max(args) => fold_call("int_max", args),
    }
}

fn fold_call(name: &str, args: &[Expr]) -> String {
    match args {
        [] => "0".to_string(),
        [only] => c_expr(only),
        [first, rest @ ..] => format!("{name}({}, {})", c_expr(first), fold_call(name, rest)),
    }
}

/// Right operand of `+`/`-`.
fn term(e: &Expr) -> String {
    match e {
        Expr::Add(..) | Expr::Sub(..) | Expr::Neg(_) => format!("({})", c_expr(e)),
        Expr::Int(v) if *v < 0 => format!("({v})"),
        _ => c_expr(e),
    }
}

/// Operand of `*`.
fn factor(e: &Expr) -> String {
    match e {
        Expr::Add(..) | Expr::Sub(..) | Expr::Neg(_) => format!("({})", c_expr(e)),
        Expr::Int(v) if *v < 0 => format!("({v})"),
        _ => c_expr(e),
    }
}

/// Interstate conditions and assignments use Python operators.
fn c_condition(text: &str) -> String {
    let spaced = format!(" {} ", text.trim());
    let replaced = spaced
        .replace(" and ", " && ")
        .replace(" or ", " || ")
        .replace(" not ", " !")
        .replace(" True ", " true ")
        .replace(" False ", " false ");
    replaced.trim().to_string()
}

// ── Tests ───────────────────────────────────────────────────────────────────
