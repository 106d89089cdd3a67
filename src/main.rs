//! Kokoki command line entry point.
//!
//! With a script path the file is compiled and executed; a failing
//! program exits with status 1. With no arguments an interactive REPL
//! starts on the same context, so definitions accumulate line by line.
//!
//! Internal diagnostics go through `tracing`; set `RUST_LOG` (e.g.
//! `RUST_LOG=kokoki=trace`) to watch the compiler and the dispatch loop.

use std::path::Path;
use std::path::PathBuf;
use std::process;

use clap::Parser;

use kokoki::{eval, Ctx};

mod repl;

#[derive(Parser)]
#[command(name = "kokoki")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "The Kokoki concatenative language", long_about = None)]
struct Cli {
    /// Source file to run; starts the REPL when omitted
    script: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    kokoki::init(|ctx| match &cli.script {
        Some(path) => run_script(ctx, path),
        None => repl::run(ctx),
    });
}

fn run_script(ctx: &mut Ctx, path: &Path) {
    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Could not read {}: {}", path.display(), e);
            process::exit(1);
        }
    };
    if !eval(ctx, &source) {
        process::exit(1);
    }
}
