//! directory-scraper CLI
//!
//! ```text
//! directory-scraper collect-urls --out ./data/startup-urls.json
//! directory-scraper scrape --in ./data/startup-urls.json --out ./data/startups.csv
//! directory-scraper run
//! directory-scraper convert --in ./data/startups.json
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tower::Service;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use directory_scraper::service::walk_listing;
use directory_scraper::sink::convert_json_to_csv;
use directory_scraper::{RunSummary, ScrapeRequest, ScraperConfig, ScraperError, ScraperService};

#[derive(Parser, Debug)]
#[command(name = "directory-scraper", version, about = "Startup directory scraper")]
struct Cli {
    /// TOML file overriding the built-in configuration
    #[arg(long, global = true, env = "SCRAPER_CONFIG")]
    config: Option<PathBuf>,

    /// Run Chrome without a window (true/false, yes/no, on/off, 1/0)
    #[arg(long, global = true, value_parser = parse_bool_like)]
    headless: Option<bool>,

    /// Dump every record and log screenshots of failed pages
    #[arg(long, global = true)]
    debug: bool,

    /// -v info, -vv debug, -vvv trace
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Walk the listing and write the collected detail-page URLs
    CollectUrls {
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Scrape every URL of a JSON URL list
    Scrape {
        #[arg(long = "in")]
        input: PathBuf,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Walk the listing, then scrape every collected URL
    Run {
        #[arg(long)]
        urls_out: Option<PathBuf>,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Rebuild the CSV view from a JSON result file
    Convert {
        #[arg(long = "in")]
        input: PathBuf,
        /// Defaults to the input path with a .csv extension
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct OutputArgs {
    /// CSV result file
    #[arg(long)]
    out: Option<PathBuf>,
    /// JSON result file
    #[arg(long)]
    json: Option<PathBuf>,
}

impl OutputArgs {
    fn apply(self, mut config: ScraperConfig) -> ScraperConfig {
        if let Some(csv) = self.out {
            config = config.with_csv_output(csv);
        }
        if let Some(json) = self.json {
            config = config.with_json_output(json);
        }
        config
    }
}

fn parse_bool_like(value: &str) -> Result<bool, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(format!("expected a boolean, got {:?}", other)),
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("directory_scraper={}", level))),
        )
        .init();
}

fn base_config(cli: &Cli) -> Result<ScraperConfig, ScraperError> {
    let mut config = match &cli.config {
        Some(path) => ScraperConfig::load(path)?,
        None => ScraperConfig::new(),
    };
    if let Some(headless) = cli.headless {
        config = config.with_headless(headless);
    }
    if cli.debug {
        config = config.with_debug(true);
    }
    Ok(config)
}

fn report(summary: &RunSummary) {
    let elapsed = summary.finished_at - summary.started_at;
    println!(
        "{} records in {}s -> {}, {}",
        summary.records,
        elapsed.num_seconds(),
        summary.json_path.display(),
        summary.csv_path.display()
    );
    for failure in &summary.failures {
        warn!("Not scraped: {} ({})", failure.url, failure.error);
    }
    if let Some(e) = &summary.walk_interrupted {
        warn!("Listing walk stopped early: {}", e);
    }
}

async fn execute(cli: Cli) -> Result<(), ScraperError> {
    let config = base_config(&cli)?;

    match cli.command {
        Command::CollectUrls { out } => {
            let config = match out {
                Some(path) => config.with_urls_output(Some(path)),
                None => config,
            };
            let walk = walk_listing(&config).await?;
            if let Some(e) = &walk.interrupted {
                warn!("Listing walk stopped early: {}", e);
            }
            match &config.output.urls_path {
                Some(path) => println!("{} URLs -> {}", walk.urls.len(), path.display()),
                None => println!("{} URLs", walk.urls.len()),
            }
        }
        Command::Scrape { input, output } => {
            let config = output.apply(config);
            let summary = ScraperService::new()
                .call(ScrapeRequest::from_file(config, input))
                .await?;
            report(&summary);
        }
        Command::Run { urls_out, output } => {
            let mut config = output.apply(config);
            if urls_out.is_some() {
                config = config.with_urls_output(urls_out);
            }
            let summary = ScraperService::new()
                .call(ScrapeRequest::from_listing(config))
                .await?;
            report(&summary);
        }
        Command::Convert { input, out } => {
            let written = convert_json_to_csv(&input, out.as_deref())?;
            info!("Converted {}", input.display());
            println!("{}", written.display());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match execute(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
