// pass.rs — Pass descriptor module: metadata, dependency resolution, artifact IDs
//
// Declares the compiler's passes (loading the document is the first), their
// dependency edges, and the artifacts they produce. Used by the pipeline
// runner to compute minimal pass subsets for each --emit target.

use std::collections::HashSet;

// ── Pass and Artifact identifiers ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    Load,
    Validate,
    Propagate,
    ScheduleCheck,
    Lower,
    Codegen,
}

/// Machine-readable artifact identifiers. Each maps to a concrete type
/// in the compilation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactId {
    Program,     // Sdfg
    Diagnostics, // Vec<Diagnostic> from validation
    Volumes,     // propagated memlets, stored back into the Sdfg
    Schedule,    // ScheduledProgram
    Plan,        // ExecutionPlan
    Cert,        // LowerCert
    Generated,   // GeneratedCode
}

/// Postcondition evidence a pass can hand back to the runner.
pub trait StageCert {
    fn all_pass(&self) -> bool;
    fn obligations(&self) -> Vec<(&'static str, bool)>;
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about a compiler pass.
pub struct PassDescriptor {
    /// Human-readable name for diagnostics/verbose output.
    pub name: &'static str,
    /// Pass dependencies (other passes whose outputs this pass consumes).
    pub inputs: &'static [PassId],
    /// Artifacts this pass produces.
    pub outputs: &'static [ArtifactId],
    /// What invalidates this pass's output.
    pub invalidation_key: &'static str,
    pub invariants: &'static str,
}

/// Return the static descriptor for a given pass.
pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::Load => PassDescriptor {
            name: "load",
            inputs: &[],
            outputs: &[ArtifactId::Program],
            invalidation_key: "document text",
            invariants: "version supported, expressions parsed",
        },
        PassId::Validate => PassDescriptor {
            name: "validate",
            inputs: &[PassId::Load],
            outputs: &[ArtifactId::Diagnostics],
            invalidation_key: "program + validation options",
            invariants: "scopes balanced, connectors bound, subsets in bounds",
        },
        PassId::Propagate => PassDescriptor {
            name: "propagate",
            inputs: &[PassId::Validate],
            outputs: &[ArtifactId::Volumes],
            invalidation_key: "program",
            invariants: "outer memlets cover the union of inner accesses",
        },
        PassId::ScheduleCheck => PassDescriptor {
            name: "schedule_check",
            inputs: &[PassId::Validate],
            outputs: &[ArtifactId::Schedule],
            invalidation_key: "program",
            invariants: "every map resolved, nesting compatible",
        },
        PassId::Lower => PassDescriptor {
            name: "lower",
            inputs: &[PassId::Propagate, PassId::ScheduleCheck],
            outputs: &[ArtifactId::Plan, ArtifactId::Cert],
            invalidation_key: "program + schedule + lower options",
            invariants: "maps lowered once, blocks inside kernels, one allocation per transient",
        },
        PassId::Codegen => PassDescriptor {
            name: "codegen",
            inputs: &[PassId::Lower],
            outputs: &[ArtifactId::Generated],
            invalidation_key: "program + plan + codegen options",
            invariants: "host and kernel source emitted",
        },
    }
}

// ── Dependency resolution ──────────────────────────────────────────────────

pub const ALL_PASSES: [PassId; 6] = [
    PassId::Load,
    PassId::Validate,
    PassId::Propagate,
    PassId::ScheduleCheck,
    PassId::Lower,
    PassId::Codegen,
];

/// Compute the minimal ordered set of passes needed to produce `terminal`.
/// Returns passes in topological (execution) order.
pub fn required_passes(terminal: PassId) -> Vec<PassId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(terminal, &mut visited, &mut order);
    order
}

fn visit(id: PassId, visited: &mut HashSet<PassId>, order: &mut Vec<PassId>) {
    if !visited.insert(id) {
        return;
    }
    for &dep in descriptor(id).inputs {
        visit(dep, visited, order);
    }
    order.push(id);
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_passes_validate_is_minimal() {
        assert_eq!(
            required_passes(PassId::Validate),
            vec![PassId::Load, PassId::Validate]
        );
    }

    #[test]
    fn required_passes_schedule_check_skips_propagation() {
        let passes = required_passes(PassId::ScheduleCheck);
        assert_eq!(
            passes,
            vec![PassId::Load, PassId::Validate, PassId::ScheduleCheck]
        );
        assert!(!passes.contains(&PassId::Propagate));
    }

    #[test]
    fn required_passes_codegen_includes_all() {
        let passes = required_passes(PassId::Codegen);
        assert_eq!(passes, ALL_PASSES.to_vec());
    }

    #[test]
    fn all_descriptors_have_outputs() {
        for pass in &ALL_PASSES {
            let desc = descriptor(*pass);
            assert!(
                !desc.outputs.is_empty(),
                "pass {:?} has no outputs declared",
                pass
            );
        }
    }

    #[test]
    fn dependency_edges_are_consistent() {
        for pass in &ALL_PASSES {
            let order = required_passes(*pass);
            let self_pos = order.iter().position(|p| p == pass);
            for dep in descriptor(*pass).inputs {
                let dep_pos = order.iter().position(|p| p == dep);
                assert!(
                    dep_pos.unwrap() < self_pos.unwrap(),
                    "{:?} depends on {:?} but it comes later in topological order",
                    pass,
                    dep
                );
            }
        }
    }
}
