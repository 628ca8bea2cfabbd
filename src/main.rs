use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use job_agent::channels::{Dispatcher, EmailDispatcher, LogDispatcher, WhatsAppDispatcher};
use job_agent::config::{AppConfig, NotifierConfig};
use job_agent::llm::{LlmProvider, create_provider};
use job_agent::pipeline::{
    DispatchOutcome, JobPipeline, JobPosting, ProfileMatcher, RawPosting, RequirementExtractor,
};
use job_agent::profile::CandidateProfile;
use job_agent::store::{HistoryStore, InMemoryHistoryStore, JsonHistoryStore};

#[derive(Debug, Parser)]
#[command(name = "job-agent", version, about = "Match job postings against your CV")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Evaluate a JSON array of postings and notify about matches.
    Run {
        /// Postings file, or `-` for stdin.
        #[arg(long, default_value = "data/jobs.json")]
        jobs: String,
        /// Log the batch instead of sending it; history is not written.
        #[arg(long)]
        dry_run: bool,
        /// Override MATCH_THRESHOLD (0-100).
        #[arg(long)]
        threshold: Option<i64>,
        /// Override MATCH_CONCURRENCY.
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Show the job history.
    History {
        /// Only jobs that passed but were never delivered.
        #[arg(long)]
        pending: bool,
    },
}

fn init_tracing(log_dir: &Path) -> tracing_appender::non_blocking::WorkerGuard {
    let file_appender = tracing_appender::rolling::daily(log_dir, "job-agent.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    guard
}

fn read_postings(source: &str) -> anyhow::Result<Vec<JobPosting>> {
    let raw = if source == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read postings from stdin")?;
        buf
    } else {
        std::fs::read_to_string(source)
            .with_context(|| format!("Failed to read postings from {source}"))?
    };

    let raw: Vec<RawPosting> =
        serde_json::from_str(&raw).context("Postings must be a JSON array of objects")?;
    let now = Utc::now();
    Ok(raw.into_iter().map(|p| p.into_posting(now)).collect())
}

fn build_dispatcher(config: &AppConfig, dry_run: bool) -> anyhow::Result<Arc<dyn Dispatcher>> {
    if dry_run {
        return Ok(Arc::new(LogDispatcher::new()));
    }
    Ok(match config.notifier_config()? {
        NotifierConfig::Email(email) => Arc::new(EmailDispatcher::new(email)?),
        NotifierConfig::WhatsApp(whatsapp) => Arc::new(WhatsAppDispatcher::new(whatsapp)?),
        NotifierConfig::Log => Arc::new(LogDispatcher::new()),
    })
}

async fn run(
    mut config: AppConfig,
    jobs: String,
    dry_run: bool,
    threshold: Option<i64>,
    concurrency: Option<usize>,
) -> anyhow::Result<()> {
    if let Some(value) = threshold {
        config.threshold = job_agent::pipeline::Threshold::new(value)?;
    }
    if let Some(limit) = concurrency {
        if limit == 0 {
            bail!("--concurrency must be at least 1");
        }
        config.concurrency_limit = limit;
    }

    let postings = read_postings(&jobs)?;
    let profile = CandidateProfile::load(&config.resolve_cv_path()?)?;

    let extract_llm = create_provider(&config.extract_llm_config()?)?;
    let match_llm = create_provider(&config.match_llm_config()?)?;

    let json_store = JsonHistoryStore::new(&config.history_path);
    let store: Arc<dyn HistoryStore> = if dry_run {
        Arc::new(InMemoryHistoryStore::from_snapshot(json_store.snapshot().await?))
    } else {
        Arc::new(json_store)
    };
    let dispatcher = build_dispatcher(&config, dry_run)?;

    eprintln!("🔎 Job Agent v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Postings:  {} from {}", postings.len(), jobs);
    if let Some(source) = profile.source() {
        eprintln!("   Profile:   {}", source.display());
    }
    eprintln!("   Models:    {} / {}", config.extract_model, config.match_model);
    eprintln!("   Threshold: {}", config.threshold);
    eprintln!("   History:   {}", store.describe());
    eprintln!(
        "   Notify:    {}{}\n",
        dispatcher.name(),
        if dry_run { " (dry run)" } else { "" }
    );

    let extractor = RequirementExtractor::new(
        extract_llm.clone() as Arc<dyn LlmProvider>,
        config.stage_timeout(),
    );
    let matcher = ProfileMatcher::new(
        match_llm.clone() as Arc<dyn LlmProvider>,
        &profile,
        config.match_reasoning_effort(),
        config.stage_timeout(),
    );
    let pipeline = JobPipeline::new(
        extractor,
        matcher,
        store,
        dispatcher,
        config.pipeline_config(),
    );

    let interrupted = async {
        if tokio::signal::ctrl_c().await.is_err() {
            // No signal handler; run to completion.
            std::future::pending::<()>().await;
        }
    };
    let Some(summary) = pipeline.run_until(postings, interrupted).await? else {
        eprintln!("\n⏹  Interrupted. Finished commits are kept; the rest runs next time.");
        return Ok(());
    };

    let usage = extract_llm.usage().merge(&match_llm.usage());
    let summary = summary.with_token_usage(usage.clone());

    match summary.write_to(&config.log_dir) {
        Ok(path) => tracing::info!(path = %path.display(), "Run summary written"),
        Err(e) => tracing::warn!(error = %e, "Failed to write run summary"),
    }

    eprintln!(
        "\n✅ {} new, {} passed, {} notified, {} pending, {} skipped",
        summary.new, summary.passed, summary.notified, summary.pending, summary.skipped
    );
    eprintln!(
        "   Tokens: {} in / {} out (≈ ${})",
        usage.input_tokens, usage.output_tokens, usage.estimated_cost_usd
    );
    if let DispatchOutcome::Failed { channel, reason, .. } = &summary.dispatch {
        eprintln!("⚠️  {channel} delivery failed: {reason}. Matches will be resent next run.");
    }
    Ok(())
}

async fn history(config: &AppConfig, pending_only: bool) -> anyhow::Result<()> {
    let store = JsonHistoryStore::new(&config.history_path);
    let snapshot = store.snapshot().await?;

    println!(
        "{} (revision {}, {} jobs)",
        store.describe(),
        snapshot.revision(),
        snapshot.len()
    );
    for record in snapshot.get_all() {
        if pending_only && !record.is_pending_notify() {
            continue;
        }
        let score = record
            .last_score
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".into());
        let status = if record.notified {
            "notified"
        } else if record.is_pending_notify() {
            "pending"
        } else {
            "seen"
        };
        let title = record
            .job
            .as_ref()
            .map(|j| format!("{} @ {}", j.title, j.company))
            .unwrap_or_default();
        println!("{status:>9}  {score:>3}  {}  {title}", record.job_id);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = AppConfig::from_env()?;

    std::fs::create_dir_all(&config.log_dir)
        .with_context(|| format!("Failed to create log dir {}", config.log_dir.display()))?;
    let _guard = init_tracing(&config.log_dir);

    match cli.command {
        Command::Run {
            jobs,
            dry_run,
            threshold,
            concurrency,
        } => run(config, jobs, dry_run, threshold, concurrency).await,
        Command::History { pending } => history(&config, pending).await,
    }
}
