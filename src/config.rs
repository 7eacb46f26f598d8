//! Command-line configuration, with environment fallbacks for every knob.

use crate::checkpoint::ResumePolicy;
use crate::pipeline::{FailurePolicy, RunOptions};
use crate::scrapers::{FetcherKind, ScrapeSettings, SiteKind};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(name = "condo-scout", about = "Resumable condo listing scraper")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub scrape: ScrapeArgs,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Harvest detail links from listing pages
    Links {
        #[arg(long, env = "CONDO_SCOUT_SITE", value_enum)]
        site: SiteKind,

        #[arg(long, default_value_t = 1)]
        first_page: u32,

        #[arg(long, default_value_t = 50)]
        last_page: u32,

        /// Links store, appended to across runs
        #[arg(long, env = "CONDO_SCOUT_LINKS", default_value = "links.csv")]
        output: PathBuf,
    },
    /// Extract details for every link of an input file
    Details {
        #[arg(long, env = "CONDO_SCOUT_SITE", value_enum)]
        site: SiteKind,

        /// CSV with the URL in its first column
        #[arg(long, env = "CONDO_SCOUT_LINKS", default_value = "links.csv")]
        input: PathBuf,

        /// Directory holding the detail, nearby and history stores
        #[arg(long, env = "CONDO_SCOUT_OUTPUT_DIR", default_value = ".")]
        output_dir: PathBuf,
    },
}

/// Options shared by both jobs
#[derive(Args, Debug, Clone)]
pub struct ScrapeArgs {
    #[arg(long, global = true, env = "CONDO_SCOUT_FETCHER", value_enum, default_value_t = FetcherKind::Http)]
    pub fetcher: FetcherKind,

    /// Show the browser window (browser fetcher only)
    #[arg(long, global = true, env = "CONDO_SCOUT_HEADED")]
    pub headed: bool,

    /// Pause after each navigation until ENTER is pressed
    #[arg(long, global = true, env = "CONDO_SCOUT_CONFIRM_CHALLENGE")]
    pub confirm_challenge: bool,

    /// Milliseconds to wait between items
    #[arg(long, global = true, env = "CONDO_SCOUT_DELAY_MS", default_value_t = 1000)]
    pub delay_ms: u64,

    #[arg(long, global = true, env = "CONDO_SCOUT_TIMEOUT_SECS", default_value_t = 30)]
    pub timeout_secs: u64,

    #[arg(long, global = true, env = "CONDO_SCOUT_ON_FAILURE", value_enum, default_value_t = FailurePolicy::Skip)]
    pub on_failure: FailurePolicy,

    /// What counts as already processed when resuming
    #[arg(long, global = true, env = "CONDO_SCOUT_RESUME", value_enum, default_value_t = ResumePolicy::Presence)]
    pub resume: ResumePolicy,
}

impl ScrapeArgs {
    pub fn settings(&self) -> ScrapeSettings {
        ScrapeSettings {
            timeout: Duration::from_secs(self.timeout_secs),
            headed: self.headed,
            confirm_challenge: self.confirm_challenge,
            ..ScrapeSettings::default()
        }
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            delay: Duration::from_millis(self.delay_ms),
            on_failure: self.on_failure,
            resume: self.resume,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_details_with_defaults() {
        let cli = Cli::parse_from(["condo-scout", "details", "--site", "livinginsider"]);

        match cli.command {
            Command::Details { site, input, output_dir } => {
                assert_eq!(site, SiteKind::Livinginsider);
                assert_eq!(input, PathBuf::from("links.csv"));
                assert_eq!(output_dir, PathBuf::from("."));
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert_eq!(cli.scrape.fetcher, FetcherKind::Http);
        assert_eq!(cli.scrape.run_options().delay, Duration::from_secs(1));
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = Cli::parse_from([
            "condo-scout",
            "links",
            "--site",
            "hipflat",
            "--last-page",
            "3",
            "--fetcher",
            "browser",
            "--confirm-challenge",
            "--on-failure",
            "placeholder",
            "--resume",
            "complete",
        ]);

        assert!(matches!(cli.command, Command::Links { last_page: 3, .. }));
        assert_eq!(cli.scrape.fetcher, FetcherKind::Browser);
        assert!(cli.scrape.settings().confirm_challenge);
        assert_eq!(cli.scrape.on_failure, FailurePolicy::Placeholder);
        assert_eq!(cli.scrape.resume, ResumePolicy::Complete);
    }
}
