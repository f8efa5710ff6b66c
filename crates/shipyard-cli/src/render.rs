//! Table and JSON rendering of command reports.

use anyhow::Result;
use console::style;
use serde::Serialize;

use shipyard_core::commands::{BackupsReport, RollbackReport, VerifyReport};
use shipyard_core::health::VerificationReport;
use shipyard_core::orchestrator::{FinalStatus, RollbackStatus, RunReport};
use shipyard_core::phase::PhaseKind;

use crate::OutputFormat;

pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {err:#}", style("error:").red().bold());
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn dry_run_label(dry_run: bool) -> String {
    if dry_run {
        format!("{} ", style("[dry-run]").yellow())
    } else {
        String::new()
    }
}

pub fn run_report(report: &RunReport, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(report);
    }
    let label = dry_run_label(report.dry_run);

    println!("{label}Run {}", style(&report.run_id).bold());
    if let Some(release) = &report.release {
        println!("  Release: {release}");
    }
    println!();

    for kind in PhaseKind::ALL {
        let done = report.phases.iter().find(|p| p.index == kind.index());
        let failed = report.failed_phase.as_ref().filter(|f| f.phase == kind);
        match (done, failed) {
            (Some(record), _) => println!(
                "  {} {:<22} {:>8}  {}",
                style("OK  ").green(),
                kind.title(),
                format_ms(record.duration_ms),
                record.summary
            ),
            (None, Some(failure)) => println!(
                "  {} {:<22} {:>8}  {}",
                style("FAIL").red().bold(),
                kind.title(),
                "",
                failure.error
            ),
            (None, None) => println!("  {} {}", style("--  ").dim(), style(kind.title()).dim()),
        }
    }

    if let Some(verification) = &report.verification {
        println!();
        verification_table(verification);
    }

    if let Some(failure) = &report.failed_phase {
        println!();
        println!(
            "{} phase {} ({}) failed",
            style("Failure:").red().bold(),
            failure.phase.index(),
            failure.phase
        );
        if let Some(operation) = &failure.operation {
            println!("  Operation: {operation} ({} attempt(s))", failure.attempts);
        }
        println!("  Error:     {}", failure.error);
    }

    if report.failed_phase.is_some() {
        println!("  Rollback:  {}", rollback_line(&report.rollback));
    }

    if let Some(backup) = &report.backup {
        println!("  Backup:    {} ({})", backup.id, backup.snapshot_path.display());
    }

    println!();
    let status = match report.status {
        FinalStatus::Succeeded => style("SUCCEEDED".to_string()).green().bold(),
        FinalStatus::RolledBack => style("FAILED (rolled back)".to_string()).red().bold(),
        FinalStatus::RollbackFailed => style("FAILED (ROLLBACK FAILED)".to_string()).red().bold(),
        FinalStatus::Interrupted => style("INTERRUPTED".to_string()).yellow().bold(),
        FinalStatus::Failed | FinalStatus::Running => style("FAILED".to_string()).red().bold(),
    };
    println!("{label}{status} (exit {})", report.exit_code);
    Ok(())
}

fn rollback_line(status: &RollbackStatus) -> String {
    match status {
        RollbackStatus::NotNeeded => "not needed (live state was not changed)".to_string(),
        RollbackStatus::Succeeded { backup_id } => {
            format!("{} restored {backup_id}", style("attempted, succeeded:").green())
        }
        RollbackStatus::Failed { backup_id, error } => format!(
            "{} {backup_id}: {error}; manual recovery required",
            style("attempted, FAILED for").red().bold()
        ),
        RollbackStatus::Unavailable => format!(
            "{} no backup exists; manual recovery required",
            style("not possible:").red().bold()
        ),
        RollbackStatus::Simulated => "simulated (dry-run; nothing was deployed or restored)".to_string(),
    }
}

fn verification_table(report: &VerificationReport) {
    println!("  {:<24} {:<6} Detail", "Probe", "Result");
    println!("  {}", "-".repeat(70));
    for result in &report.results {
        let verdict = if result.passed {
            style(result.severity.to_string()).green()
        } else {
            style(result.severity.to_string()).red().bold()
        };
        println!(
            "  {:<24} {:<6} {}",
            truncate(&result.probe_name, 24),
            verdict,
            result.detail
        );
    }
}

pub fn verify_report(report: &VerifyReport, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(report);
    }
    let label = dry_run_label(report.dry_run);
    match &report.release {
        Some(release) => println!("{label}Live release: {release}"),
        None => println!("{label}Live release: unknown (no status document)"),
    }
    println!();

    match &report.report {
        Some(verification) => {
            verification_table(verification);
            println!();
            if verification.is_healthy() {
                println!("{}", style("HEALTHY").green().bold());
            } else {
                let failed = verification.failures().count();
                println!(
                    "{} {failed} of {} probe(s) failed",
                    style("FAILED").red().bold(),
                    verification.results.len()
                );
            }
        }
        None => {
            println!("Would run {} probe(s):", report.planned.len());
            for probe in &report.planned {
                println!("  {probe}");
            }
        }
    }
    Ok(())
}

pub fn rollback_report(report: &RollbackReport, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(report);
    }
    let label = dry_run_label(report.dry_run);
    if let Some(backup) = &report.backup {
        println!(
            "{label}Backup {} taken {}",
            style(&backup.id).bold(),
            backup.created_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    println!("{label}Rollback: {}", rollback_line(&report.status));
    Ok(())
}

pub fn backups_report(report: &BackupsReport, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(report);
    }
    println!("Live path:   {}", report.live_path.display());
    println!("Backup root: {}", report.backup_root.display());
    println!();

    if report.backups.is_empty() {
        println!("No backups retained.");
        return Ok(());
    }

    println!("  {:<28} {:<20} {:<14} Snapshot", "Id", "Created", "Release");
    println!("  {}", "-".repeat(80));
    let latest = report.latest().map(|b| b.id.as_str());
    for backup in &report.backups {
        let marker = if Some(backup.id.as_str()) == latest { " (latest)" } else { "" };
        let snapshot = if backup.source_existed {
            backup.snapshot_path.display().to_string()
        } else {
            "(empty: first deploy)".to_string()
        };
        println!(
            "  {:<28} {:<20} {:<14} {snapshot}{marker}",
            backup.id,
            backup.created_at.format("%Y-%m-%d %H:%M:%S"),
            backup.release.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

fn format_ms(ms: u64) -> String {
    if ms < 1000 {
        format!("{ms}ms")
    } else {
        format!("{:.1}s", ms as f64 / 1000.0)
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}
