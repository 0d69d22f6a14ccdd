use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;

use crate::guard::{CommandEngine, GuardRegistry};
use crate::jail::{COMMAND_NOT_FOUND_EXIT_CODE, JailError, JailRunner};

use super::Globals;

#[derive(Args)]
pub struct JailArgs {
    /// Path to the development jail directory. Created if it does not exist.
    #[arg(long)]
    pub jail: PathBuf,

    /// Attach an ML guard worker to the jailed child for the run
    #[arg(long)]
    pub guard: bool,

    /// With --guard: observe only, never terminate
    #[arg(long)]
    pub no_kill: bool,

    /// Command to execute (use -- to separate it from wrapper flags)
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

pub async fn run(args: JailArgs, globals: &Globals) -> Result<i32> {
    let config = globals.load_config()?;
    let log_dir = globals.resolve_log_dir(&config);

    let runner = JailRunner::new(&args.jail, log_dir.clone(), &config)?;

    println!(
        "[devjail] Jail root: {}",
        runner.policy().jail_root().display()
    );
    println!("[devjail] Command: {}", args.command.join(" "));
    if !runner.observer().strace_available() {
        eprintln!(
            "[devjail] strace not available, falling back to /proc fd polling (best effort)."
        );
    }

    let registry = if args.guard {
        let engine = CommandEngine::new(
            config.guard.engine_command.clone(),
            config.guard.artifact_dir.clone().map(PathBuf::from),
        )
        .context("--guard requires [guard] engine_command in the config")?;

        let mut guard_config = config.guard.clone();
        if args.no_kill {
            guard_config.allow_terminate = false;
        }

        Some(GuardRegistry::new(
            guard_config,
            Arc::new(engine),
            log_dir.join("guard_events.jsonl"),
        ))
    } else {
        None
    };

    let report = match runner.run(&args.command, registry.as_ref()).await {
        Ok(report) => report,
        Err(JailError::CommandNotFound(program)) => {
            eprintln!("[devjail] Error: command not found: {}", program);
            return Ok(COMMAND_NOT_FOUND_EXIT_CODE);
        }
        Err(e) => return Err(e.into()),
    };

    if report.violations.is_empty() {
        println!("[devjail] No filesystem violations detected.");
    } else {
        println!("[devjail] Detected filesystem violations:");
        for path in &report.violations {
            println!("  - {}", path.display());
        }
    }
    println!("[devjail] Log written to {}", report.report_file.display());

    Ok(report.wrapper_exit_code)
}
