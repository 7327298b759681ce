use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

mod config;
mod error;
mod extract;
mod mail;
mod ops;
mod recon;
mod reports;
mod sync;
mod table;

use config::Config;

#[derive(Parser)]
#[command(name = "k1mail")]
#[command(version = "0.1")]
#[command(about = "Match Schedule K-1 PDFs to investors and email them", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = config::CONFIG_FILE)]
    config: PathBuf,
    #[arg(long, global = true)]
    tax_year: Option<String>,
    #[arg(long, global = true)]
    sender: Option<String>,
    /// Deliver to the real recipients instead of the sender
    #[arg(long, global = true)]
    live: bool,
    /// Maximum number of emails in this batch
    #[arg(long, global = true)]
    limit: Option<usize>,
    /// Re-extract every document instead of trusting the cache
    #[arg(long, global = true)]
    skip_cache_load: bool,
    /// Clear email status before the run (asks first)
    #[arg(long, global = true)]
    reset_status: bool,
    /// Answer yes to every confirmation
    #[arg(long, short = 'y', global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Clone)]
enum Commands {
    /// Full batch: extract, reconcile and optionally send (default)
    Run {
        #[arg(long)]
        send: bool,
    },
    /// Discover and extract documents only
    Extract,
    /// Extract and reconcile against the investor table, no email
    Reconcile,
    /// Send against the table as it stands
    Send,
    /// Clear email status and batch timestamps
    ResetStatus,
    /// Mirror logs, snapshots and dumps to the sync directory
    Sync,
    /// Write the effective configuration to the config file
    Init,
    /// Internal: Extract PDF pages (hidden)
    #[command(hide = true)]
    ExtractPdf { path: PathBuf },
}

impl Cli {
    fn apply(&self, mut config: Config) -> Config {
        if let Some(year) = &self.tax_year {
            config.tax_year = year.clone();
        }
        if let Some(sender) = &self.sender {
            config.sender = sender.clone();
        }
        if self.live {
            config.test_mode = false;
        }
        if self.limit.is_some() {
            config.email_limit = self.limit;
        }
        config
    }

    fn options(&self, send: bool) -> ops::RunOptions {
        ops::RunOptions {
            skip_cache_load: self.skip_cache_load,
            reset_status: self.reset_status,
            send,
            assume_yes: self.yes,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    // Child process: print the pages and exit before any setup.
    if let Some(Commands::ExtractPdf { path }) = &cli.command {
        extract_pdf_child(path);
    }

    // Logging is not up yet; a bad config file is reported once it is.
    let (config, config_error) = match Config::load(&cli.config) {
        Ok(config) => (cli.apply(config), None),
        Err(e) => (cli.apply(Config::default()), Some(e)),
    };
    let ws = config.workspace();
    ws.ensure()?;

    let ts = reports::run_timestamp();
    let file_appender = tracing_appender::rolling::never(ws.logs_dir(), format!("log_{ts}.txt"));
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(tracing_subscriber::EnvFilter::new("debug,reqwest=info,hyper=info")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
                ),
        )
        .init();

    if let Some(e) = config_error {
        tracing::warn!("Using default configuration: {:#}", e);
    }
    if config.test_mode {
        tracing::info!("TEST MODE: every message goes to {:?}", config.sender);
    }

    let command = cli.command.clone().unwrap_or(Commands::Run { send: false });
    let result = match command {
        Commands::Run { send } => {
            let source = extract::SubprocessPdfSource::new()?;
            ops::run_all(&config, &ts, cli.options(send), &source).await
        }
        Commands::Extract => {
            let source = extract::SubprocessPdfSource::new()?;
            ops::prepare(&ws, &ts)
                .and_then(|_| ops::run_extraction(&ws, &ts, cli.skip_cache_load, &source))
                .map(|_| ())
        }
        Commands::Reconcile => {
            let source = extract::SubprocessPdfSource::new()?;
            ops::run_all(&config, &ts, cli.options(false), &source).await
        }
        Commands::Send => ops::run_send_only(&config, &ts, cli.yes).await,
        Commands::ResetStatus => {
            ops::prepare(&ws, &ts).and_then(|_| ops::run_reset_status(&ws, cli.yes))
        }
        Commands::Sync => ops::run_sync(&config),
        Commands::Init => config.save(&cli.config).map(|_| {
            tracing::info!("Wrote {:?}", cli.config);
        }),
        Commands::ExtractPdf { .. } => unreachable!(), // Handled above
    };

    if let Err(e) = &result {
        tracing::error!("{:#}", e);
    }
    drop(_guard);
    result.context("k1mail run failed")
}

fn extract_pdf_child(path: &std::path::Path) -> ! {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    match std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(&bytes)) {
        Ok(Ok(pages)) => match extract::format_content_block(&pages) {
            Ok(block) => {
                println!("{}", block);
                std::process::exit(0);
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        },
        Ok(Err(e)) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
        Err(_) => {
            eprintln!("Panic during extraction");
            std::process::exit(2);
        }
    }
}
