// pipeline.rs — Compilation state and pass orchestration
//
// Holds all pass artifacts and runs the minimal set of passes for a given
// terminal PassId.
//
// Preconditions: the state holds either document text or a built program.
// Postconditions: all artifacts for required passes are populated, or
//                 `has_error` is set.
// Failure modes: a document that cannot be loaded (`PipelineError::Load`);
//                any pass emitting error-level diagnostics.
// Side effects: calls on_pass_complete after each pass for immediate display;
//               logs pass timings at debug level.

use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::codegen::GeneratedCode;
use crate::config::Config;
use crate::diag::codes;
use crate::diag::{has_errors, DiagKind, Diagnostic, Location};
use crate::error::SdfgError;
use crate::lower::{ExecutionPlan, LowerCert};
use crate::pass::{descriptor, required_passes, PassId, StageCert};
use crate::schedule::ScheduledProgram;
use crate::sdfg::Sdfg;

// ── Artifact storage ───────────────────────────────────────────────────────

/// Provenance metadata for reproducible builds and cache-key use.
///
/// `source_hash`: SHA-256 of the raw document text.
/// `compiler_version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub source_hash: [u8; 32],
    pub compiler_version: &'static str,
}

impl Provenance {
    /// Hex string of the source hash (64 characters).
    pub fn source_hash_hex(&self) -> String {
        let mut s = String::with_capacity(64);
        for b in &self.source_hash {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
        }
        s
    }
}

pub fn compute_provenance(source: &str) -> Provenance {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    let result = hasher.finalize();
    let mut source_hash = [0u8; 32];
    source_hash.copy_from_slice(&result);
    Provenance {
        source_hash,
        compiler_version: env!("CARGO_PKG_VERSION"),
    }
}

/// Holds all compilation artifacts and accumulated diagnostics.
pub struct CompilationState {
    pub source: Option<String>,
    pub program: Option<Sdfg>,
    pub schedule: Option<ScheduledProgram>,
    pub plan: Option<ExecutionPlan>,
    pub cert: Option<LowerCert>,
    pub generated: Option<GeneratedCode>,
    pub diagnostics: Vec<Diagnostic>,
    pub has_error: bool,
    pub provenance: Option<Provenance>,
}

impl CompilationState {
    /// Start from document text; the Load pass parses it.
    pub fn new(source: String) -> Self {
        let provenance = Some(compute_provenance(&source));
        Self {
            source: Some(source),
            provenance,
            ..Self::from_parts(None)
        }
    }

    /// Start from a program built in memory; the Load pass is a no-op.
    pub fn from_program(program: Sdfg) -> Self {
        Self::from_parts(Some(program))
    }

    fn from_parts(program: Option<Sdfg>) -> Self {
        Self {
            source: None,
            program,
            schedule: None,
            plan: None,
            cert: None,
            generated: None,
            diagnostics: Vec::new(),
            has_error: false,
            provenance: None,
        }
    }
}

// ── Error type ─────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("cannot load program: {0}")]
    Load(#[from] SdfgError),

    /// The specific diagnostics are in `CompilationState.diagnostics`.
    #[error("pass {failing_pass:?} reported errors")]
    Failed { failing_pass: PassId },

    /// A pass ran before the artifact it consumes was produced.
    #[error("pass {pass:?} is missing its input artifacts")]
    MissingInput { pass: PassId },
}

// ── Helper: per-pass post-processing ───────────────────────────────────────

/// Callback, accumulate, log, error check.
fn finish_pass(
    state: &mut CompilationState,
    pass_id: PassId,
    diags: Vec<Diagnostic>,
    elapsed: Duration,
    on_pass_complete: &mut impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    on_pass_complete(pass_id, &diags);
    let is_err = has_errors(&diags);
    debug!(
        pass = descriptor(pass_id).name,
        diagnostics = diags.len(),
        ms = elapsed.as_secs_f64() * 1000.0,
        "pass complete"
    );
    state.diagnostics.extend(diags);
    if is_err {
        state.has_error = true;
        return Err(PipelineError::Failed {
            failing_pass: pass_id,
        });
    }
    Ok(())
}

fn propagation_failure(err: &SdfgError) -> Diagnostic {
    let kind = match err {
        SdfgError::Symbol(_) => DiagKind::Symbol,
        _ => DiagKind::Structural,
    };
    Diagnostic::error(kind, Location::Program, format!("memlet propagation failed: {err}"))
        .with_code(codes::E0304)
}

fn cert_failure(cert: &impl StageCert, what: &str, code: crate::diag::DiagCode) -> Option<Diagnostic> {
    if cert.all_pass() {
        return None;
    }
    let failed: Vec<_> = cert
        .obligations()
        .into_iter()
        .filter(|(_, ok)| !ok)
        .map(|(name, _)| name)
        .collect();
    Some(
        Diagnostic::error(
            DiagKind::Structural,
            Location::Program,
            format!("{what} verification failed: {}", failed.join(", ")),
        )
        .with_code(code),
    )
}

// ── Pipeline runner ────────────────────────────────────────────────────────

/// Run the minimal set of passes to produce `terminal`.
///
/// Per-pass sequence: execute → on_pass_complete(callback) → log → error check.
pub fn run_pipeline(
    state: &mut CompilationState,
    terminal: PassId,
    config: &Config,
    mut on_pass_complete: impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    for pass_id in required_passes(terminal) {
        let t = Instant::now();
        match pass_id {
            PassId::Load => {
                if state.program.is_none() {
                    let source = state
                        .source
                        .as_deref()
                        .ok_or(PipelineError::MissingInput { pass: pass_id })?;
                    let program = crate::serialize::from_json(source)?;
                    state.program = Some(program);
                }
                finish_pass(state, pass_id, Vec::new(), t.elapsed(), &mut on_pass_complete)?;
            }
            PassId::Validate => {
                let program = state
                    .program
                    .as_ref()
                    .ok_or(PipelineError::MissingInput { pass: pass_id })?;
                let diags = crate::validate::validate_with(program, &config.validation);
                finish_pass(state, pass_id, diags, t.elapsed(), &mut on_pass_complete)?;
            }
            PassId::Propagate => {
                let program = state
                    .program
                    .as_mut()
                    .ok_or(PipelineError::MissingInput { pass: pass_id })?;
                let diags = match crate::propagate::propagate_sdfg(program) {
                    Ok(updated) => {
                        debug!(memlets = updated, "propagated memlets");
                        Vec::new()
                    }
                    Err(e) => vec![propagation_failure(&e)],
                };
                finish_pass(state, pass_id, diags, t.elapsed(), &mut on_pass_complete)?;
            }
            PassId::ScheduleCheck => {
                let program = state
                    .program
                    .as_ref()
                    .ok_or(PipelineError::MissingInput { pass: pass_id })?;
                let result = crate::schedule::check_schedules(program);
                let mut diags = result.diagnostics;
                let cert = crate::schedule::verify_schedule(&result.schedule, program);
                diags.extend(cert_failure(&cert, "schedule", codes::E0701));
                state.schedule = Some(result.schedule);
                finish_pass(state, pass_id, diags, t.elapsed(), &mut on_pass_complete)?;
            }
            PassId::Lower => {
                let (Some(program), Some(schedule)) = (&state.program, &state.schedule) else {
                    return Err(PipelineError::MissingInput { pass: pass_id });
                };
                let result = crate::lower::lower(program, schedule, &config.lower);
                let mut diags = result.diagnostics;
                diags.extend(cert_failure(&result.cert, "lowering", codes::E0702));
                state.plan = Some(result.plan);
                state.cert = Some(result.cert);
                finish_pass(state, pass_id, diags, t.elapsed(), &mut on_pass_complete)?;
            }
            PassId::Codegen => {
                let (Some(program), Some(plan)) = (&state.program, &state.plan) else {
                    return Err(PipelineError::MissingInput { pass: pass_id });
                };
                let result = crate::codegen::emit(program, plan, &config.codegen);
                let diags = result.diagnostics;
                state.generated = Some(result.generated);
                finish_pass(state, pass_id, diags, t.elapsed(), &mut on_pass_complete)?;
            }
        }
    }
    Ok(())
}

// ── Tests ──────────────────────────────────────────────────────────────────
