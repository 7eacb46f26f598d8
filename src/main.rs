mod checkpoint;
mod config;
mod input;
mod models;
mod pipeline;
mod scrapers;

use anyhow::Context;
use clap::Parser;
use config::{Cli, Command};
use pipeline::{DetailJob, LinkJob};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Conventional status for a run ended by SIGINT
const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Resolves on ctrl-c. If the handler cannot be installed the run simply
/// cannot be interrupted gracefully.
async fn interrupt() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Could not listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    info!("🏠 Condo Scout");
    info!("==========================================");

    let settings = cli.scrape.settings();
    let fetcher = scrapers::build_fetcher(cli.scrape.fetcher, &settings)?;

    let summary = match cli.command {
        Command::Links {
            site,
            first_page,
            last_page,
            output,
        } => {
            let site = scrapers::build_site(site)?;
            LinkJob::open(site.as_ref(), fetcher.as_ref(), &output, cli.scrape.run_options())
                .context("Failed to open links store")?
                .run(first_page, last_page, interrupt())
                .await?
        }
        Command::Details {
            site,
            input,
            output_dir,
        } => {
            let site = scrapers::build_site(site)?;
            let items = input::read_work_items(&input)?;
            DetailJob::open(
                site.as_ref(),
                fetcher.as_ref(),
                &output_dir,
                cli.scrape.run_options(),
            )
            .context("Failed to open output stores")?
            .run(&items, interrupt())
            .await?
        }
    };

    if summary.interrupted {
        info!("💾 Stopped early; rerun the same command to resume");
        // Stores are flushed. Leave now: a fetch blocked on the operator
        // prompt would otherwise hold the runtime open until ENTER.
        drop(fetcher);
        std::process::exit(INTERRUPTED_EXIT_CODE);
    }

    info!("✅ Done: {} items processed", summary.processed);
    Ok(())
}
