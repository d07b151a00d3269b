//! minicc: command-line driver for the minic compiler
//!
//! `minicc <debug-code> <input.c> <include-dir>[:<include-dir>...]`
//!
//! `debug-code` selects which pipeline stage's intermediate tree is dumped to
//! stdout instead of producing final assembly: `tokens`, `c-ast`, `typed-ast`,
//! `tac`, `assembly`, or `none` to write the final `.s` file next to the input.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser as ClapParser;
use tracing_subscriber::EnvFilter;

use minic::config::{CompilerConfig, DebugStage};
use minic::error::ArgumentError;
use minic::{CompileSession, DebugOutput};

/// Positional-only CLI matching the spec's `compiler <debug-code> <input.c>
/// <include-dir>[:<include-dir>...]` contract. `clap` handles `--help`/
/// `--version`; everything else is validated by hand so the exact
/// `ArgumentError` messages survive.
#[derive(ClapParser)]
#[command(name = "minicc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Compile a subset of C to x86-64 assembly", long_about = None)]
struct Cli {
    /// Which stage to dump: tokens | c-ast | typed-ast | tac | assembly | none
    debug_code: Option<String>,

    /// Input .c source file
    input: Option<PathBuf>,

    /// Colon-separated include directories
    include_dirs: Option<String>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(Failure::Compile(e)) => {
            eprintln!("{e}");
            ExitCode::from(1)
        }
        Err(Failure::Internal(e)) => {
            eprintln!("{e}");
            ExitCode::from(2)
        }
    }
}

enum Failure {
    Compile(minic::CompileError),
    Internal(String),
}

impl From<minic::CompileError> for Failure {
    fn from(e: minic::CompileError) -> Self {
        Failure::Compile(e)
    }
}

fn run(cli: Cli) -> Result<(), Failure> {
    let Some(debug_code) = cli.debug_code else {
        return Err(Failure::Compile(minic::CompileError::new(
            "<arguments>",
            0,
            ArgumentError::NoDebugCode.to_string(),
        )));
    };
    let Some(debug_stage) = DebugStage::parse(&debug_code) else {
        return Err(Failure::Compile(minic::CompileError::new(
            "<arguments>",
            0,
            ArgumentError::InvalidDebugCode(debug_code).to_string(),
        )));
    };

    let Some(input) = cli.input else {
        return Err(Failure::Compile(minic::CompileError::new(
            "<arguments>",
            0,
            ArgumentError::NoInputFile.to_string(),
        )));
    };

    let include_dirs: Vec<PathBuf> = match &cli.include_dirs {
        Some(dirs) if !dirs.is_empty() => dirs.split(':').map(PathBuf::from).collect(),
        _ => Vec::new(),
    };

    let config = CompilerConfig::new(include_dirs, debug_stage);

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let mut session = CompileSession::new();
        session.compile_file(&input, &config)
    }));

    let output = match result {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(Failure::Compile(e)),
        Err(payload) => {
            let message = match payload.downcast::<minic::error::InternalError>() {
                Ok(err) => err.to_string(),
                Err(payload) => match payload.downcast::<String>() {
                    Ok(s) => *s,
                    Err(_) => "internal compiler error (no diagnostic available)".to_string(),
                },
            };
            return Err(Failure::Internal(message));
        }
    };

    match output {
        DebugOutput::Tokens(text)
        | DebugOutput::CAst(text)
        | DebugOutput::TypedAst(text)
        | DebugOutput::Tac(text)
        | DebugOutput::Assembly(text) => {
            println!("{text}");
        }
        DebugOutput::Final(text) => {
            let out_path = output_path(&input);
            std::fs::write(&out_path, text).map_err(|e| {
                Failure::Compile(minic::CompileError::new(
                    out_path.display().to_string(),
                    0,
                    format!("failed to write output file: {e}"),
                ))
            })?;
        }
    }

    Ok(())
}

/// `<input-stem>.s` next to the input file, per spec.md §6.
fn output_path(input: &Path) -> PathBuf {
    input.with_extension("s")
}
