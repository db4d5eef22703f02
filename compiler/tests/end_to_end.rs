// End-to-end tests over the `demos/add_one.sdfg` document.
//
// The document holds two host arrays `A`, `B` of length `N`, device copies
// `gpu_A`/`gpu_B`, and a GPU_Device map over `i` in `0:N:32` wrapping a
// GPU_ThreadBlock map over `j` in `0:32` whose tasklet computes `b = a + 1`.
// Library-level tests drive the pipeline directly; CLI tests run the
// `sdfc` binary the way a user would.

use std::path::{Path, PathBuf};
use std::process::Command;

use sdfc::config::Config;
use sdfc::diag::has_errors;
use sdfc::id::{EdgeId, StateId};
use sdfc::lower::PlanItem;
use sdfc::pass::{PassId, StageCert};
use sdfc::pipeline::{run_pipeline, CompilationState};

fn project_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .to_path_buf()
}

fn demo_path() -> PathBuf {
    project_root().join("demos").join("add_one.sdfg")
}

fn demo_source() -> String {
    let path = demo_path();
    std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("cannot read {}: {}", path.display(), e))
}

fn sdfc_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_sdfc"))
}

fn compile_to(terminal: PassId) -> CompilationState {
    let mut state = CompilationState::new(demo_source());
    if let Err(e) = run_pipeline(&mut state, terminal, &Config::default(), |_, _| {}) {
        panic!("pipeline failed: {e}\n{:#?}", state.diagnostics);
    }
    state
}

// ── Library ────────────────────────────────────────────────────────────────

#[test]
fn demo_validates_without_errors() {
    let program = sdfc::serialize::load(&demo_path()).unwrap();
    let diags = sdfc::validate::validate(&program);
    assert!(!has_errors(&diags), "unexpected errors: {:#?}", diags);
}

#[test]
fn device_inbound_volume_is_tiled_ceiling() {
    let program = sdfc::serialize::load(&demo_path()).unwrap();
    let sid = StateId(0);
    let inbound = EdgeId(1);

    let state = program.state(sid).unwrap();
    let stored = state.edge(inbound).unwrap().memlet.as_ref().unwrap();
    assert_eq!(stored.data, "gpu_A");
    assert_eq!(stored.volume.to_string(), "32*ceil(N/32)");

    let derived = sdfc::propagate::derived_volumes(&program).unwrap();
    assert_eq!(derived[&(sid, inbound)].to_string(), "32*ceil(N/32)");
}

#[test]
fn thread_block_is_lowered_inside_the_kernel() {
    let state = compile_to(PassId::Lower);
    assert!(!state.has_error);
    let plan = state.plan.as_ref().unwrap();
    let body = &plan.state(StateId(0)).unwrap().body;

    assert!(
        !body.iter().any(|item| matches!(item, PlanItem::ThreadBlock(_))),
        "thread block escaped its kernel: {plan}"
    );
    let kernel = body
        .iter()
        .find_map(|item| match item {
            PlanItem::Kernel(k) => Some(k),
            _ => None,
        })
        .expect("device map lowered to a kernel");
    assert_eq!(kernel.params, vec!["i".to_string()]);
    assert!(kernel
        .body
        .iter()
        .any(|item| matches!(item, PlanItem::ThreadBlock(l) if l.params == ["j"])));

    let cert = state.cert.as_ref().unwrap();
    assert!(cert.all_pass(), "{:?}", cert.obligations());
}

#[test]
fn generated_code_launches_one_kernel() {
    let state = compile_to(PassId::Codegen);
    let code = &state.generated.as_ref().unwrap().cpp_source;
    assert_eq!(code.matches("__global__ void").count(), 1);
    assert!(code.contains("<<<dim3(int_ceil(N, 32), 1, 1), dim3(32, 1, 1)>>>"));
    assert!(code.contains("b = a + 1;"));
    let to_device = code.find("cudaMemcpyHostToDevice").unwrap();
    let launch = code.find("<<<").unwrap();
    let to_host = code.find("cudaMemcpyDeviceToHost").unwrap();
    assert!(to_device < launch && launch < to_host);
}

#[test]
fn demo_survives_a_save_and_reload() {
    let program = sdfc::serialize::load(&demo_path()).unwrap();
    let text = sdfc::serialize::to_json(&program).unwrap();
    let back = sdfc::serialize::from_json(&text).unwrap();
    assert_eq!(back, program);
}

// ── CLI ────────────────────────────────────────────────────────────────────

#[test]
fn cli_validate_succeeds_silently_on_stdout() {
    let output = Command::new(sdfc_binary())
        .arg("--emit")
        .arg("validate")
        .arg(demo_path())
        .output()
        .expect("failed to run sdfc");
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(output.stdout.is_empty());
}

#[test]
fn cli_tree_shows_nested_maps() {
    let output = Command::new(sdfc_binary())
        .arg("--emit")
        .arg("tree")
        .arg(demo_path())
        .output()
        .expect("failed to run sdfc");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("map i in [0:N:32]:"), "{stdout}");
    assert!(stdout.contains("    map j in [0:32]:"), "{stdout}");
}

#[test]
fn cli_writes_output_file() {
    let out = std::env::temp_dir().join(format!("sdfc_e2e_{}.dot", std::process::id()));
    let status = Command::new(sdfc_binary())
        .arg("--emit")
        .arg("dot")
        .arg("-o")
        .arg(&out)
        .arg(demo_path())
        .status()
        .expect("failed to run sdfc");
    assert!(status.success());
    let dot = std::fs::read_to_string(&out).unwrap();
    let _ = std::fs::remove_file(&out);
    assert!(dot.starts_with("digraph \"add_one\" {"));
}

#[test]
fn cli_missing_file_exits_with_2() {
    let output = Command::new(sdfc_binary())
        .arg("does/not/exist.sdfg")
        .output()
        .expect("failed to run sdfc");
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("sdfc: error:"));
}

#[test]
fn cli_future_major_version_exits_with_2() {
    let text = demo_source().replace("\"sdfg_version\": \"1.0\"", "\"sdfg_version\": \"2.0\"");
    let path = std::env::temp_dir().join(format!("sdfc_e2e_v2_{}.sdfg", std::process::id()));
    std::fs::write(&path, text).unwrap();
    let output = Command::new(sdfc_binary())
        .arg("--emit")
        .arg("validate")
        .arg(&path)
        .output()
        .expect("failed to run sdfc");
    let _ = std::fs::remove_file(&path);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn cli_validation_errors_exit_with_1() {
    // Reading past the end of `A` is provably out of bounds.
    let text = demo_source().replace(
        "\"data\": \"A\", \"subset\": \"0:N\", \"volume\": \"N\"",
        "\"data\": \"A\", \"subset\": \"0:N + 1\", \"volume\": \"N + 1\"",
    );
    let path = std::env::temp_dir().join(format!("sdfc_e2e_oob_{}.sdfg", std::process::id()));
    std::fs::write(&path, text).unwrap();
    let output = Command::new(sdfc_binary())
        .arg("--emit")
        .arg("validate")
        .arg(&path)
        .output()
        .expect("failed to run sdfc");
    let _ = std::fs::remove_file(&path);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("E0201"));
}
