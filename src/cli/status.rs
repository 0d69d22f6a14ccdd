use anyhow::Result;

use crate::jail::Observer;
use crate::net::runner::locate_shim;

use super::Globals;

pub async fn run(globals: &Globals) -> Result<i32> {
    let config = globals.load_config()?;
    let log_dir = globals.resolve_log_dir(&config);

    println!("Observation Capabilities:");
    match Observer::detect() {
        Observer::Trace { strace } => {
            println!("  File jail:   strace ({})", strace.display());
        }
        Observer::FdPoll => {
            println!("  File jail:   /proc fd polling (strace not found; opens");
            println!("               shorter than one poll interval can be missed)");
        }
    }
    match locate_shim(&config) {
        Ok(shim) => println!("  Net shim:    {}", shim.display()),
        Err(e) => println!("  Net shim:    unavailable ({})", e),
    }
    println!();

    println!("Configuration:");
    println!("  Log dir:          {}", log_dir.display());
    println!("  Poll interval:    {:.2}s", config.guard.poll_interval_secs);
    println!("  Min samples:      {}", config.guard.min_samples);
    println!("  Kill threshold:   {:.2}", config.guard.kill_threshold);
    println!("  Allow terminate:  {}", config.guard.allow_terminate);
    println!("  Confidence delta: {:.2}", config.guard.confidence_delta);
    println!("  Alert cpu:        {:.1}%", config.alerts.cpu_percent);
    println!("  Alert rss:        {} bytes", config.alerts.memory_rss_bytes);
    if config.guard.engine_command.is_empty() {
        println!("  Engine:           not configured");
    } else {
        println!("  Engine:           {}", config.guard.engine_command.join(" "));
    }
    if !config.jail.extra_allow_prefixes.is_empty() {
        println!("  Extra prefixes:   {:?}", config.jail.extra_allow_prefixes);
    }
    if !config.jail.extra_allow_files.is_empty() {
        println!("  Extra files:      {:?}", config.jail.extra_allow_files);
    }

    Ok(0)
}
