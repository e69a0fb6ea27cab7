//! Configuration check command

use anyhow::Context;
use colored::Colorize;
use std::path::Path;

/// Load and validate the configuration and print what would be used
pub fn run_check_config(path: Option<&Path>) -> anyhow::Result<()> {
    let config = super::load(path).context("Configuration check failed")?;
    let gerrit = &config.connection;

    println!("{} Configuration is valid", "✓".green());
    println!();
    println!("Server:     {} ({}:{})", gerrit.name.bold(), gerrit.host, gerrit.port);
    println!("User:       {}", gerrit.username);
    println!("Key file:   {}", gerrit.credential().key_file_display());
    if let Some(proxy) = &gerrit.proxy {
        println!("Proxy:      {}", proxy);
    }
    match gerrit.watchdog_timeout() {
        Some(timeout) => println!(
            "Watchdog:   {}s, {} exempt window(s)",
            timeout.as_secs(),
            gerrit.watchdog_windows.len()
        ),
        None => println!("Watchdog:   {}", "disabled".dimmed()),
    }

    let dispatch = &config.dispatch;
    println!(
        "Workers:    {} (idle timeout {}s)",
        dispatch.worker_threads,
        dispatch.keep_alive().as_secs()
    );
    match &config.whitelist.location {
        Some(location) => println!(
            "Whitelist:  {} (every {} min)",
            location.display(),
            config.whitelist.refresh_interval().as_secs() / 60
        ),
        None => println!("Whitelist:  {}", "none, all projects".dimmed()),
    }

    Ok(())
}
