use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use smart_inbox::channels::{DisabledNotifier, ImapSource, SmtpNotifier};
use smart_inbox::config::{AppConfig, ImapConfig, MAX_BATCH, MAX_WINDOW_HOURS, PipelineConfig};
use smart_inbox::dashboard::{self, HistoryFilter};
use smart_inbox::error::PipelineError;
use smart_inbox::history::{self, HistoryRecord, HistoryStore};
use smart_inbox::llm::create_provider;
use smart_inbox::pipeline::types::{Category, Notifier, Priority};
use smart_inbox::pipeline::{DeliveryStatus, DigestPipeline, Enricher, Inference, KeywordInference, LlmInference};

#[derive(Parser)]
#[command(name = "smart-inbox", version, about = "Daily email digest: summarize, label, rank, send")]
struct Cli {
    #[command(subcommand)]
    cmd: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch recent mail, build the digest, record history and send it (default)
    Run(RunArgs),
    /// Report on the history ledger
    Stats(StatsArgs),
}

#[derive(Args, Default)]
struct RunArgs {
    /// Messages to fetch (1-500, default 10)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=MAX_BATCH as i64))]
    max_count: Option<u32>,
    /// How far back to look, in hours (1-720, default 24)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=MAX_WINDOW_HOURS))]
    window_hours: Option<u64>,
    /// Messages enriched concurrently (default 4)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=64))]
    workers: Option<u32>,
    /// History ledger path
    #[arg(long)]
    history: Option<PathBuf>,
    /// Where to write the text digest
    #[arg(long)]
    digest_out: Option<PathBuf>,
    /// Build and record the digest without emailing it
    #[arg(long)]
    no_send: bool,
}

#[derive(Args)]
struct StatsArgs {
    /// History ledger path
    #[arg(long)]
    history: Option<PathBuf>,
    /// First date to include (YYYY-MM-DD)
    #[arg(long)]
    since: Option<NaiveDate>,
    /// Last date to include (YYYY-MM-DD)
    #[arg(long)]
    until: Option<NaiveDate>,
    /// Only these categories (repeatable)
    #[arg(long = "category")]
    categories: Vec<Category>,
    /// Only these priorities (repeatable)
    #[arg(long = "priority")]
    priorities: Vec<Priority>,
    /// Case-insensitive text matched against subject and summary
    #[arg(long)]
    search: Option<String>,
    /// Write the filtered rows to this CSV file
    #[arg(long)]
    export: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Already installed is fine; any other TLS use picks up the same provider.
    let _ = rustls::crypto::ring::default_provider().install_default();

    if let Err(e) = dotenvy::dotenv()
        && !e.not_found()
    {
        eprintln!("Warning: could not read .env: {e}");
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd.unwrap_or_else(|| Command::Run(RunArgs::default())) {
        Command::Run(args) => run(args).await,
        Command::Stats(args) => stats(args),
    }
}

async fn run(args: RunArgs) -> ExitCode {
    let mut app = match AppConfig::from_env() {
        Ok(app) => app,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::from(1);
        }
    };
    apply_overrides(&mut app.pipeline, &args);
    if let Err(e) = app.pipeline.validate() {
        eprintln!("Error: {e}");
        return ExitCode::from(1);
    }

    let imap = match ImapConfig::from_env() {
        Ok(imap) => imap,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::from(1);
        }
    };

    eprintln!("📬 Smart Inbox v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Mailbox: {}@{}", imap.username, imap.host);
    eprintln!("   History: {}", app.pipeline.history_path.display());

    let inference: Arc<dyn Inference> = match &app.llm {
        Some(llm_config) => match create_provider(llm_config) {
            Ok(llm) => Arc::new(LlmInference::new(llm)),
            Err(e) => {
                warn!(error = %e, "LLM unavailable, using keyword classifier");
                Arc::new(KeywordInference::default_rules())
            }
        },
        None => {
            info!("No LLM API key set, using keyword classifier");
            Arc::new(KeywordInference::default_rules())
        }
    };
    eprintln!("   Classifier: {}", inference.name());

    let notifier: Arc<dyn Notifier> = match (&app.smtp, args.no_send) {
        (Some(smtp), false) => Arc::new(SmtpNotifier::new(smtp.clone())),
        _ => Arc::new(DisabledNotifier),
    };

    let history = HistoryStore::new(&app.pipeline.history_path);
    let enricher = Enricher::new(inference, app.pipeline.enricher.clone());
    let pipeline = DigestPipeline::new(
        Arc::new(ImapSource::new(imap)),
        enricher,
        history,
        notifier,
        app.pipeline,
    );

    match pipeline.run(Local::now().date_naive()).await {
        Ok(report) => {
            println!("{}", report.text);
            if let DeliveryStatus::Failed(reason) = &report.delivery {
                eprintln!("Digest recorded but not delivered: {reason}");
            }
            ExitCode::from(report.exit_code() as u8)
        }
        Err(e) => {
            eprintln!("Error: {} stage failed: {e}", e.stage());
            if let PipelineError::History(history_err) = &e {
                dump_unwritten(history_err.unwritten());
            }
            ExitCode::from(1)
        }
    }
}

fn apply_overrides(config: &mut PipelineConfig, args: &RunArgs) {
    if let Some(n) = args.max_count {
        config.max_count = n as usize;
    }
    if let Some(hours) = args.window_hours {
        config.window = Duration::from_secs(hours * 3600);
    }
    if let Some(workers) = args.workers {
        config.enricher.workers = workers as usize;
    }
    if let Some(path) = &args.history {
        config.history_path = path.clone();
    }
    if let Some(path) = &args.digest_out {
        config.digest_path = Some(path.clone());
    }
}

/// Save rows that missed the ledger somewhere the user can recover them.
fn dump_unwritten(rows: &[HistoryRecord]) {
    if rows.is_empty() {
        return;
    }
    let path = std::env::temp_dir().join(format!(
        "smart-inbox-unwritten-{}.csv",
        Local::now().format("%Y%m%d-%H%M%S")
    ));
    match history::export(rows, &path) {
        Ok(()) => eprintln!("   {} unwritten row(s) saved to {}", rows.len(), path.display()),
        Err(e) => eprintln!("   {} unwritten row(s) lost: {e}", rows.len()),
    }
}

fn stats(args: StatsArgs) -> ExitCode {
    let path = match args.history {
        Some(path) => path,
        None => match PipelineConfig::from_env() {
            Ok(config) => config.history_path,
            Err(e) => {
                eprintln!("Error: {e}");
                return ExitCode::from(1);
            }
        },
    };

    let records = match history::load(&path) {
        Ok(records) => records,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::from(1);
        }
    };

    let filter = HistoryFilter {
        since: args.since,
        until: args.until,
        categories: args.categories,
        priorities: args.priorities,
        search: args.search,
    };
    let summary = dashboard::summarize(&records, &filter);
    println!("{}", dashboard::render_report(&summary));

    if let Some(export_path) = args.export {
        let rows: Vec<HistoryRecord> = filter.apply(&records).into_iter().cloned().collect();
        if let Err(e) = history::export(&rows, &export_path) {
            eprintln!("Error: export to {} failed: {e}", export_path.display());
            return ExitCode::from(1);
        }
        eprintln!("Exported {} row(s) to {}", rows.len(), export_path.display());
    }

    ExitCode::SUCCESS
}
