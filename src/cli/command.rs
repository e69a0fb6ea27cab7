//! One-shot `query` and `review` commands

use anyhow::{anyhow, Context};
use gerrit_events_core::error::GerritError;
use gerrit_events_core::{CommandRunner, PersistedQueryRunner, QueryOptions, ReviewCommand, SshCommandTransport};
use std::path::Path;
use std::sync::Arc;

/// Run a change query and print each matching change as a JSON line
pub fn run_query(path: Option<&Path>, query: &str, options: QueryOptions) -> anyhow::Result<()> {
    let config = super::load(path).context("Failed to load configuration")?;
    let transport = Arc::new(SshCommandTransport::new().map_err(GerritError::from)?);
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;

    runtime.block_on(async {
        let runner = PersistedQueryRunner::new(config.connection, transport);
        let result = runner.query(query, options).await;
        runner.disconnect().await;
        for change in result? {
            println!("{}", serde_json::to_string(&change)?);
        }
        Ok::<(), anyhow::Error>(())
    })
}

/// Parse `Label=value` as given on the command line
pub fn parse_label(label: &str) -> anyhow::Result<(String, i32)> {
    let (name, value) = label
        .split_once('=')
        .ok_or_else(|| anyhow!("Label '{}' is not of the form Label=value", label))?;
    let value = value
        .trim_start_matches('+')
        .parse()
        .with_context(|| format!("Invalid vote in label '{}'", label))?;
    Ok((name.to_string(), value))
}

/// Post a review message and votes on a patch set
pub fn run_review(
    path: Option<&Path>,
    change: u64,
    patch_set: u64,
    message: Option<String>,
    labels: &[String],
) -> anyhow::Result<()> {
    let config = super::load(path).context("Failed to load configuration")?;
    let mut review = ReviewCommand::new(change, patch_set);
    if let Some(message) = message {
        review = review.message(message);
    }
    for label in labels {
        let (name, value) = parse_label(label)?;
        review = review.label(name, value);
    }

    let transport = Arc::new(SshCommandTransport::new().map_err(GerritError::from)?);
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;

    let runner = CommandRunner::new(config.connection, transport);
    runtime
        .block_on(runner.run(&review.to_string()))
        .with_context(|| format!("Review of {},{} failed", change, patch_set))?;
    Ok(())
}
