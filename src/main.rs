use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use edgesync::config;
use edgesync::report::HttpReporter;
use edgesync::source::MySqlLogSource;
use edgesync::state::StateStore;
use edgesync::sync::SyncRunner;

/// Incremental GoEdge access-log traffic sync agent.
#[derive(Parser)]
#[command(name = "edgesync", about)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logging verbosity level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print version information and exit.
    Version,
}

/// Build-time version info, injected via RUSTFLAGS.
mod version {
    /// Release version string (set at build time).
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Git commit hash (set at build time via env, or "unknown").
    pub fn git_commit() -> &'static str {
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    }

    /// Full version string with platform info.
    pub fn full() -> String {
        format!(
            "{} (commit: {}, {}/{})",
            RELEASE,
            git_commit(),
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle version subcommand before anything else.
    if let Some(Command::Version) = &cli.command {
        println!("edgesync {}", version::full());
        return Ok(());
    }

    // Initialize tracing.
    let filter = EnvFilter::try_new(&cli.log_level)
        .with_context(|| format!("invalid log level: {}", cli.log_level))?;

    fmt().with_env_filter(filter).with_target(true).init();

    // Config is required for a sync run.
    let config_path = cli
        .config
        .context("--config is required (use --help for usage)")?;

    let cfg = config::Config::load(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    tracing::info!(
        version = version::RELEASE,
        commit = version::git_commit(),
        "starting traffic sync run",
    );

    // One run per invocation, fully sequential; the scheduler (cron) owns
    // the cadence. A current-thread runtime is all the run needs.
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    rt.block_on(async { run(cfg).await })
}

async fn run(cfg: config::Config) -> Result<()> {
    let store = StateStore::new(cfg.state.path.clone());

    let source = MySqlLogSource::connect(&cfg.source)
        .await
        .context("connecting to log database")?;

    let reporter = HttpReporter::new(&cfg.collector).context("creating reporter")?;

    let runner = SyncRunner::new(store, source, reporter, cfg.source.table_prefix.clone());

    let summary = runner.run().await.context("sync run aborted")?;

    tracing::info!(
        fetched = summary.fetched,
        users = summary.users,
        bytes = summary.bytes,
        last_id = summary.last_id,
        "sync run complete",
    );

    Ok(())
}
