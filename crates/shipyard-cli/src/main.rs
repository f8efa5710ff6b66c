//! Shipyard - release pipeline runner
//!
//! Usage:
//!   shipyard                      # Deploy (default)
//!   shipyard --dry-run            # Show what a deploy would do
//!   shipyard verify               # Run the verification gate only
//!   shipyard rollback [--backup]  # Restore a retained backup
//!   shipyard backups              # List retained backups

mod render;

use std::future::Future;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shipyard_core::cancel::{CancelToken, CleanupLatch};
use shipyard_core::commands::{
    BackupsCommand, DeployCommand, RollbackCommand, RollbackOptions, VerifyCommand,
};
use shipyard_core::config::{default_config_path, load_config};
use shipyard_core::context::RunContext;
use shipyard_core::types::{ExitCode, RunFlags};

#[derive(Parser)]
#[command(name = "shipyard")]
#[command(about = "Release pipeline with verification gate and rollback", long_about = None)]
struct Cli {
    /// Path to shipyard.toml (default: ./shipyard.toml)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Unattended mode: skip the pause before distribution
    #[arg(long, short, global = true)]
    force: bool,

    /// Per-attempt and per-probe diagnostics
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Do not snapshot live state before distribution
    #[arg(long, global = true)]
    skip_backup: bool,

    /// Log every action instead of performing it
    #[arg(long, short = 'n', global = true)]
    dry_run: bool,

    /// Output format
    #[arg(long, global = true, default_value = "table")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    /// Run the full release: preflight, version, build, distribute, verify
    Deploy,

    /// Check the current deployment against the verification gate
    Verify,

    /// Restore a retained backup
    Rollback {
        /// Backup id (default: latest)
        #[arg(long)]
        backup: Option<String>,
    },

    /// List retained backups
    Backups,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Default)]
enum OutputFormat {
    /// Human-readable table
    #[default]
    Table,
    /// Machine-readable JSON
    Json,
}

impl Cli {
    fn flags(&self) -> RunFlags {
        RunFlags {
            force: self.force,
            dry_run: self.dry_run,
            verbose: self.verbose,
            skip_backup: self.skip_backup,
        }
    }
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "shipyard=debug,shipyard_core=debug,info"
    } else {
        "shipyard=info,shipyard_core=info,warn"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let code = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")
        .and_then(|runtime| runtime.block_on(run(cli)))
    {
        Ok(code) => code,
        Err(err) => {
            render::print_error(&err);
            ExitCode::General
        }
    };
    std::process::ExitCode::from(code.code() as u8)
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => default_config_path(&std::env::current_dir().context("Failed to read working directory")?),
    };
    let config = load_config(&config_path)?;
    let cancel = CancelToken::new();
    let ctx = RunContext::new(config, cli.flags(), cancel.clone())?;
    let latch = CleanupLatch::new();

    let code = match cli.command.unwrap_or(Commands::Deploy) {
        Commands::Deploy => {
            let command = DeployCommand::new(ctx);
            let report = until_signal(command.execute(), &cancel, || {
                latch.run_once(|| {
                    command.lock().release();
                    warn!("interrupted; live state is indeterminate, no rollback will be attempted");
                });
            })
            .await;
            render::run_report(&report, cli.format)?;
            report.exit()
        }
        Commands::Verify => {
            let command = VerifyCommand::new(ctx);
            let report = until_signal(command.execute(), &cancel, || {
                latch.run_once(|| warn!("interrupted during verification"));
            })
            .await?;
            render::verify_report(&report, cli.format)?;
            if report.is_healthy() {
                ExitCode::Success
            } else {
                ExitCode::Verification
            }
        }
        Commands::Rollback { backup } => {
            let command = RollbackCommand::new(ctx);
            let options = RollbackOptions { backup_id: backup };
            let report = until_signal(command.execute(&options), &cancel, || {
                latch.run_once(|| {
                    command.lock().release();
                    warn!("interrupted during rollback; live state is indeterminate");
                });
            })
            .await?;
            render::rollback_report(&report, cli.format)?;
            if report.exit_code == 0 {
                ExitCode::Success
            } else {
                ExitCode::RollbackFailed
            }
        }
        Commands::Backups => {
            let report = BackupsCommand::new(ctx).execute().await?;
            render::backups_report(&report, cli.format)?;
            ExitCode::Success
        }
    };

    if cancel.is_cancelled() {
        return Ok(ExitCode::Interrupted);
    }
    Ok(code)
}

/// Drive `work` to completion. On SIGINT/SIGTERM, cancel the run, fire the
/// cleanup handler and wait for the work to observe the cancellation.
async fn until_signal<T>(work: impl Future<Output = T>, cancel: &CancelToken, cleanup: impl FnOnce()) -> T {
    tokio::pin!(work);
    tokio::select! {
        out = &mut work => out,
        signal = shutdown_signal() => {
            warn!(signal, "received signal; cancelling run");
            cancel.cancel();
            cleanup();
            work.await
        }
    }
}

#[cfg(unix)]
async fn shutdown_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(err) => {
            warn!(error = %err, "could not install SIGTERM handler");
            return ctrl_c().await;
        }
    };
    tokio::select! {
        signal = ctrl_c() => signal,
        _ = terminate.recv() => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> &'static str {
    ctrl_c().await
}

async fn ctrl_c() -> &'static str {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "could not listen for interrupts");
        std::future::pending::<()>().await;
    }
    "SIGINT"
}
