//! Demo host for `jsvm_core`.
//!
//! Grounded in the teacher's own CLI entry point: install the process
//! allocator, parse a handful of flags with `clap`, install a
//! `tracing-subscriber` filtered by `RUST_LOG`, then drive the engine.
//! Here "driving the engine" means running the scenario suite
//! (`jsvm run-scenarios`) instead of an editor event loop.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

// Pulls in `jsvm_allocator`'s `#[global_allocator]` registration; the
// crate is otherwise unused from this binary's own code.
use jsvm_allocator as _;

mod scenarios;

#[derive(Parser)]
#[command(name = "jsvm", version, about = "JSVM demo host")]
struct Cli {
  #[command(subcommand)]
  command: Command,

  /// Extra flags forwarded verbatim to `v8::V8::set_flags_from_string`,
  /// e.g. `--expose-gc`.
  #[arg(long = "v8-flag", global = true)]
  v8_flags: Vec<String>,
}

#[derive(Subcommand)]
enum Command {
  /// Run a single JS source file and print its result.
  Run {
    path: std::path::PathBuf,
    /// Attach a Chrome DevTools Protocol inspector before running; prints
    /// the `ws://` frontend address to stderr.
    #[arg(long)]
    inspect: bool,
  },
  /// Run the built-in scenario suite (S1-S6) and report pass/fail.
  RunScenarios,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .init();

  let cli = Cli::parse();
  jsvm_core::vm::init(jsvm_core::vm::InitOptions {
    v8_flags: cli.v8_flags,
  });

  match cli.command {
    Command::Run { path, inspect } => run_file(&path, inspect),
    Command::RunScenarios => scenarios::run_all(),
  }
}

fn run_file(path: &std::path::Path, inspect: bool) -> Result<()> {
  let source = std::fs::read_to_string(path)
    .with_context(|| format!("reading {}", path.display()))?;

  let vm = std::rc::Rc::new(jsvm_core::vm::VM::new(jsvm_core::vm::CreateVMOptions::default())?);
  let env = jsvm_core::env::Env::new(vm.clone(), jsvm_core::env::ModuleApiVersion::V1)?;

  #[cfg(feature = "inspector")]
  if inspect {
    env.open_inspector()?;
    if let Some(address) = env.inspector_address() {
      eprintln!("inspector listening on {address}");
    }
  }
  #[cfg(not(feature = "inspector"))]
  if inspect {
    anyhow::bail!("this binary was built without the `inspector` feature");
  }

  let filename = path.to_string_lossy().into_owned();
  let result = vm.with_locked(|isolate| -> Result<String> {
    let mut scope = v8::HandleScope::new(isolate);
    env.with_context_scope(&mut scope, |scope| -> Result<String> {
      match jsvm_core::compile::run_source(&env, scope, &source, &filename) {
        Ok(value) => Ok(value.to_rust_string_lossy(scope)),
        Err(status) => {
          if let Some(exception) = env.take_last_exception(scope) {
            Ok(format!("uncaught exception: {}", exception.to_rust_string_lossy(scope)))
          } else {
            anyhow::bail!("script failed: {status}")
          }
        }
      }
    })?
  })??;

  println!("{result}");
  env.destroy();
  Ok(())
}
