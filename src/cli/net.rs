use anyhow::Result;
use clap::Args;

use crate::net::{NetError, NetRunner};

use super::Globals;

#[derive(Args)]
pub struct NetArgs {
    /// Command to execute (use -- to separate it from wrapper flags)
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

pub async fn run(args: NetArgs, globals: &Globals) -> Result<i32> {
    let config = globals.load_config()?;
    let log_dir = globals.resolve_log_dir(&config);

    let runner = NetRunner::new(&config, log_dir)?;

    println!("[devjail] Network disabled for: {}", args.command.join(" "));

    let outcome = match runner.run(&args.command).await {
        Ok(outcome) => outcome,
        Err(NetError::CommandNotFound(program)) => {
            eprintln!("[devjail] Error: command not found: {}", program);
            return Ok(127);
        }
        Err(e) => return Err(e.into()),
    };

    if outcome.event_count == 0 {
        println!("[devjail] No socket attempts intercepted.");
    } else {
        println!(
            "[devjail] Blocked {} socket attempt(s).",
            outcome.event_count
        );
    }
    println!("[devjail] Log written to {}", outcome.log_path.display());

    Ok(outcome.exit_code)
}
