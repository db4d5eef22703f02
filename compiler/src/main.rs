use clap::Parser;
use std::path::{Path, PathBuf};

use sdfc::config::Config;
use sdfc::pass::PassId;
use sdfc::pipeline::{run_pipeline, CompilationState, PipelineError};
use sdfc::validate::WcrAnalysis;
use tracing::{debug, info};
use tracing_subscriber::prelude::*;

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum EmitStage {
    /// Only validate the program
    Validate,
    /// Schedule tree of the lowered program
    Tree,
    /// Graphviz rendering of the program
    Dot,
    /// Execution plan summary
    Plan,
    /// Generated C++/CUDA source
    Code,
    /// Program document with propagated memlets
    Json,
}

impl EmitStage {
    fn terminal(self) -> PassId {
        match self {
            EmitStage::Validate | EmitStage::Dot => PassId::Validate,
            EmitStage::Json => PassId::Propagate,
            EmitStage::Tree | EmitStage::Plan => PassId::Lower,
            EmitStage::Code => PassId::Codegen,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "sdfc",
    version,
    about = "SDFG compiler core: validates, propagates and lowers .sdfg program documents"
)]
struct Cli {
    /// Input .sdfg document
    source: PathBuf,

    /// Output file path (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Code)]
    emit: EmitStage,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write-conflict analysis depth (overrides the config file)
    #[arg(long, value_enum)]
    wcr: Option<WcrAnalysis>,

    /// Print compiler phases and timing
    #[arg(long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose { "sdfc=debug" } else { "sdfc=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    debug!(source = %cli.source.display(), emit = ?cli.emit, "starting");

    // ── Configuration ──
    let mut config = match &cli.config {
        Some(path) => match Config::load(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("sdfc: error: {}", e);
                std::process::exit(2);
            }
        },
        None => Config::default(),
    };
    if let Some(wcr) = cli.wcr {
        config.validation.wcr_analysis = wcr;
    }

    // ── Read document ──
    let source = match std::fs::read_to_string(&cli.source) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("sdfc: error: {}: {}", cli.source.display(), e);
            std::process::exit(2);
        }
    };

    // ── Run passes ──
    let mut state = CompilationState::new(source);
    let result = run_pipeline(&mut state, cli.emit.terminal(), &config, |_, diags| {
        for diag in diags {
            eprintln!("sdfc: {}", diag);
        }
    });
    match result {
        Ok(()) => {}
        Err(PipelineError::Failed { failing_pass }) => {
            debug!(pass = ?failing_pass, "stopping after errors");
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("sdfc: error: {}: {}", cli.source.display(), e);
            std::process::exit(2);
        }
    }

    // ── Emit ──
    let text = match render(&state, cli.emit) {
        Ok(Some(t)) => t,
        Ok(None) => {
            info!("{}: ok", cli.source.display());
            return;
        }
        Err(e) => {
            eprintln!("sdfc: error: {}", e);
            std::process::exit(2);
        }
    };
    if let Err(e) = write_output(cli.output.as_deref(), &text) {
        eprintln!("sdfc: error: {}", e);
        std::process::exit(2);
    }
}

/// Text for the requested stage; `None` when the stage only validates.
fn render(state: &CompilationState, emit: EmitStage) -> Result<Option<String>, PipelineError> {
    let missing = || PipelineError::MissingInput {
        pass: emit.terminal(),
    };
    let program = state.program.as_ref().ok_or_else(missing)?;
    let text = match emit {
        EmitStage::Validate => return Ok(None),
        EmitStage::Dot => sdfc::dot::emit_dot(program),
        EmitStage::Json => sdfc::serialize::to_json(program)?,
        EmitStage::Plan => state.plan.as_ref().ok_or_else(missing)?.to_string(),
        EmitStage::Tree => {
            let plan = state.plan.as_ref().ok_or_else(missing)?;
            sdfc::tree::build_schedule_tree(program, plan).as_string()
        }
        EmitStage::Code => state
            .generated
            .as_ref()
            .ok_or_else(missing)?
            .cpp_source
            .clone(),
    };
    Ok(Some(text))
}

fn write_output(path: Option<&Path>, text: &str) -> std::io::Result<()> {
    match path {
        Some(p) => std::fs::write(p, text),
        None => {
            print!("{}", text);
            Ok(())
        }
    }
}
