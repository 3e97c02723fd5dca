//! Build and fetch command implementation
//!
//! Runs a [`Builder`] and presents its notifications while it works.

use anyhow::{Context, Result};
use tokio::sync::mpsc;

use crate::cli::output::Reporter;
use crate::cli::GlobalOptions;
use crate::core::builder::{Builder, RunSummary};

/// Execute `incubate build`, or `incubate fetch` when `fetch_only` is set
pub async fn execute(options: &GlobalOptions, packages: &[String], fetch_only: bool) -> Result<()> {
    let config = options.builder_config()?;
    let mut reporter = Reporter::new(options.output_mode(), options.log_file())
        .context("Failed to open log file")?;

    let (tx, rx) = mpsc::unbounded_channel();
    let builder = Builder::new(config, tx)?;
    tracing::info!("Using {} worker(s)", builder.config().workers());

    reporter.start();
    let presenter = tokio::spawn(reporter.run(rx));

    let result = incubate(&builder, packages, fetch_only).await;

    // closing the channel ends the presenter
    drop(builder);
    let reporter = presenter.await.context("Output task failed")?;

    reporter.finish(result.as_ref());
    result.map(|_| ())
}

async fn incubate(builder: &Builder, packages: &[String], fetch_only: bool) -> Result<RunSummary> {
    if fetch_only {
        let set = builder.load(packages)?;
        builder.download(&set).await?;
        Ok(RunSummary::default())
    } else {
        Ok(builder.run(packages).await?)
    }
}
