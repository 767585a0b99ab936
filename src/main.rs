//! verity: operator CLI for the scoring engine
//!
//! Usage:
//!   verity sweep                       → run the background sweeper until Ctrl-C
//!   verity sweep-once                  → one gradient / consensus / token pass
//!   verity leaderboard --period weekly → print the leaderboard
//!   verity rank <agent>                → an agent's rank and percentile
//!   verity limits <agent>              → today's quota usage
//!   verity dump-config                 → effective config as TOML
//!   verity version                     → show version

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};
use verity::verity_core::{AgentId, LeaderboardPeriod, Tier};
use verity::verity_sweeper::{CancellationToken, Sweeper};
use verity::{config_path, load_config, Services};

#[derive(Parser)]
#[command(
    name = "verity",
    about = "Epistemic scoring and rate governance engine",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the config file (TOML); also VERITY_CONFIG
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database file, overrides store.path; also VERITY_DB
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Also write logs to daily-rotated files in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true, default_value_t = false)]
    log_json: bool,

    /// Print command output as JSON
    #[arg(long, global = true, default_value_t = false)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sweeper loops until interrupted
    Sweep,
    /// Run every sweeper stage once and print the report
    SweepOnce,
    /// Print the reputation leaderboard
    Leaderboard {
        #[arg(short, long, default_value_t = 20)]
        limit: u32,
        #[arg(short, long, default_value_t = 0)]
        offset: u32,
        /// new, established or trusted
        #[arg(short, long)]
        tier: Option<Tier>,
        /// all_time, weekly or monthly
        #[arg(short, long, default_value = "all_time")]
        period: LeaderboardPeriod,
    },
    /// Print an agent's rank
    Rank { agent: AgentId },
    /// Print an agent's quota usage for today
    Limits { agent: AgentId },
    /// Print the effective config
    DumpConfig,
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.log_dir.as_deref(), cli.log_json)?;

    let config = load_config(&config_path(cli.config), cli.db)?;

    match cli.command {
        Commands::Version => {
            println!("verity v{}", env!("CARGO_PKG_VERSION"));
        }
        Commands::DumpConfig => {
            print!("{}", config.to_toml());
        }
        Commands::Sweep => {
            let services = Services::open(config)?;
            let sweeper = Sweeper::new(services.engine);
            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("interrupt received, stopping");
                }
                on_signal.cancel();
            });
            sweeper.run(cancel).await;
        }
        Commands::SweepOnce => {
            let services = Services::open(config)?;
            let report = Sweeper::new(services.engine).run_once().await?;
            emit(cli.json, &report, || {
                format!(
                    "gradients updated: {}\nclaims examined: {}\nclaims rewarded: {} ({} agents)\nclaims resolved: {}\nalready processed: {}\ntokens purged: {}",
                    report.gradients_updated,
                    report.consensus.examined,
                    report.consensus.rewarded_claims,
                    report.consensus.reputation_updates,
                    report.consensus.resolved_claims,
                    report.consensus.already_processed,
                    report.tokens_purged,
                )
            })?;
        }
        Commands::Leaderboard {
            limit,
            offset,
            tier,
            period,
        } => {
            let services = Services::open(config)?;
            let board = services
                .engine
                .reputation()
                .get_leaderboard(limit, offset, tier, period)
                .await?;
            emit(cli.json, &board, || {
                let mut out = format!("{} leaderboard ({} agents)\n", board.period, board.total);
                for e in &board.entries {
                    out.push_str(&format!(
                        "{:>4}  {:<24} {:>9.1}  {:<11} claims {:<4} evidence {}\n",
                        e.rank,
                        e.display_name.as_deref().unwrap_or(&e.username),
                        e.reputation_score,
                        e.tier.to_string(),
                        e.claims_count,
                        e.evidence_count,
                    ));
                }
                out.trim_end().to_string()
            })?;
        }
        Commands::Rank { agent } => {
            let services = Services::open(config)?;
            let rank = services.engine.reputation().get_agent_rank(agent).await?;
            emit(cli.json, &rank, || {
                format!(
                    "rank {} of {} (top {:.1}%), reputation {:.1}, tier {}",
                    rank.rank,
                    rank.total,
                    100.0 - rank.percentile,
                    rank.reputation_score,
                    rank.tier,
                )
            })?;
        }
        Commands::Limits { agent } => {
            let services = Services::open(config)?;
            // The fast-path counters live in this process's cache, so the
            // durable audit trail is the authoritative count here.
            let today = services.engine.clock().today();
            let mut rows = Vec::new();
            for (action, status) in services.engine.rate_limiter().get_all_limits(agent).await? {
                let recorded = services
                    .store
                    .rate_counter(agent, action, today)
                    .await
                    .with_context(|| format!("reading {action} counter"))?;
                rows.push(LimitRow {
                    action: action.to_string(),
                    used: recorded.max(status.current),
                    limit: status.limit,
                });
            }
            emit(cli.json, &rows, || {
                rows.iter()
                    .map(|r| format!("{:<16} {:>4} / {}", r.action, r.used, r.limit))
                    .collect::<Vec<_>>()
                    .join("\n")
            })?;
        }
    }

    Ok(())
}

#[derive(Serialize)]
struct LimitRow {
    action: String,
    used: u32,
    limit: u32,
}

fn emit<T: Serialize>(json: bool, value: &T, text: impl FnOnce() -> String) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{}", text());
    }
    Ok(())
}

/// Logs go to stderr so command output on stdout stays clean. The returned
/// guard flushes the file writer on drop.
fn init_tracing(
    log_dir: Option<&std::path::Path>,
    json: bool,
) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let stderr = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .boxed()
    };

    let (file, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating log dir {}", dir.display()))?;
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "verity.log"));
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr)
        .with(file)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "verity=info".into()),
        )
        .init();
    Ok(guard)
}
