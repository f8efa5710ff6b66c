//! End-to-end deploys against a local target: exit codes, rollback
//! decisions and dry-run isolation.

mod support;

use std::sync::Arc;

use chrono::Utc;

use shipyard_core::commands::DeployCommand;
use shipyard_core::lock::RunLock;
use shipyard_core::orchestrator::{FinalStatus, RollbackStatus, RunReport};
use shipyard_core::phase::PhaseKind;
use shipyard_core::types::RunFlags;

use support::{
    BUILD_OK, CountingChannel, CountingTarget, Fixture, FixedCertSource, context, far_future_cert, forced,
    serve_dir,
};

const TLS_PROBE: &str = r#"
[[verify.tls]]
name = "cert"
host = "example.test"
"#;

async fn deploy(
    fixture: &Fixture,
    build: &str,
    extra: &str,
    flags: RunFlags,
    target: Arc<CountingTarget>,
) -> RunReport {
    let config = fixture.config(build, extra);
    let ctx = context(config, flags, target, Arc::new(CountingChannel::default()), far_future_cert());
    DeployCommand::new(ctx).execute().await
}

#[tokio::test]
async fn successful_deploy_replaces_live_and_discards_the_backup() {
    let fixture = Fixture::new();
    let addr = serve_dir(fixture.live.clone()).await;
    let extra = format!("[verify]\nstatus_url = \"http://{addr}/version.json\"\n");
    let target = Arc::new(CountingTarget::new());

    let report = deploy(&fixture, BUILD_OK, &extra, forced(), Arc::clone(&target)).await;

    assert_eq!(report.exit_code, 0, "{:?}", report.error);
    assert_eq!(report.status, FinalStatus::Succeeded);
    assert_eq!(report.phases.len(), 6);
    assert!(report.phases.iter().all(|p| !p.simulated));
    assert_eq!(fixture.live_file("index.html"), "new release");

    let stamp: serde_json::Value = serde_json::from_str(&fixture.live_file("version.json")).unwrap();
    assert_eq!(stamp["version"], "1.2.3");
    assert_eq!(stamp["build_number"], 7);
    assert!(report.verification.as_ref().unwrap().is_healthy());

    let retained = std::fs::read_dir(fixture.backup_root()).map(|d| d.count()).unwrap_or(0);
    assert_eq!(retained, 0, "backup should be discarded after success");
    assert_eq!(target.restores(), 0);
}

#[tokio::test]
async fn missing_tool_stops_before_anything_is_touched() {
    let fixture = Fixture::new();
    let extra = format!("[preflight]\nrequired_tools = [\"definitely-not-a-real-tool-xyz\"]\n{TLS_PROBE}");
    let target = Arc::new(CountingTarget::new());

    let report = deploy(&fixture, BUILD_OK, &extra, forced(), Arc::clone(&target)).await;

    assert_eq!(report.exit_code, 2);
    assert_eq!(report.status, FinalStatus::Failed);
    assert!(report.phases.is_empty());
    assert_eq!(report.failed_phase.as_ref().unwrap().phase, PhaseKind::Preflight);
    assert!(report.error.as_deref().unwrap().contains("definitely-not-a-real-tool-xyz"));
    assert!(!fixture.backup_root().exists());
    assert_eq!(target.mutations(), 0);
    assert_eq!(report.rollback, RollbackStatus::NotNeeded);
}

#[tokio::test]
async fn missing_probes_fail_preflight() {
    let fixture = Fixture::new();
    let target = Arc::new(CountingTarget::new());

    let report = deploy(&fixture, BUILD_OK, "", forced(), Arc::clone(&target)).await;

    assert_eq!(report.exit_code, 2);
    assert!(report.error.as_deref().unwrap().contains("probes"));
    assert_eq!(target.mutations(), 0);
}

#[tokio::test]
async fn build_failure_never_restores() {
    let fixture = Fixture::new();
    let target = Arc::new(CountingTarget::new());

    let report = deploy(&fixture, "exit 1", TLS_PROBE, forced(), Arc::clone(&target)).await;

    assert_eq!(report.exit_code, 3);
    assert_eq!(report.failed_phase.as_ref().unwrap().phase, PhaseKind::Build);
    assert_eq!(report.failed_phase.as_ref().unwrap().attempts, 1);
    assert_eq!(report.phases.len(), 2);
    assert_eq!(target.restores(), 0);
    assert_eq!(report.rollback, RollbackStatus::NotNeeded);
    assert_eq!(fixture.live_file("index.html"), "old release");
}

#[tokio::test]
async fn distribute_failure_restores_exactly_once() {
    let fixture = Fixture::new();
    let target = Arc::new(CountingTarget::failing_push());

    let report = deploy(&fixture, BUILD_OK, TLS_PROBE, forced(), Arc::clone(&target)).await;

    assert_eq!(report.exit_code, 4);
    assert_eq!(report.status, FinalStatus::RolledBack);
    assert_eq!(report.failed_phase.as_ref().unwrap().phase, PhaseKind::Distribute);
    assert!(report.error.as_deref().unwrap().contains("disk full"));
    assert_eq!(target.restores(), 1);
    assert!(matches!(report.rollback, RollbackStatus::Succeeded { .. }));
    assert_eq!(fixture.live_file("index.html"), "old release");
}

#[tokio::test]
async fn expiring_certificate_fails_verify_and_rolls_back() {
    let fixture = Fixture::new();
    let extra = format!("{TLS_PROBE}min_days = 30\n");
    let config = fixture.config(BUILD_OK, &extra);
    let target = Arc::new(CountingTarget::new());
    let soon = Arc::new(FixedCertSource(Utc::now() + chrono::Duration::days(2)));
    let ctx = context(config, forced(), target.clone(), Arc::new(CountingChannel::default()), soon);

    let report = DeployCommand::new(ctx).execute().await;

    assert_eq!(report.exit_code, 5);
    assert_eq!(report.failed_phase.as_ref().unwrap().phase, PhaseKind::Verify);
    assert_eq!(target.restores(), 1);
    let backup_id = report.backup.as_ref().unwrap().id.clone();
    assert_eq!(report.rollback, RollbackStatus::Succeeded { backup_id });
    assert_eq!(fixture.live_file("index.html"), "old release");

    let verification = report.verification.as_ref().unwrap();
    assert!(!verification.is_healthy());
    assert_eq!(verification.failures().next().unwrap().probe_name, "cert");
}

#[tokio::test]
async fn failed_rollback_exits_with_its_own_code() {
    let fixture = Fixture::new();
    let extra = format!("{TLS_PROBE}min_days = 30\n");
    let config = fixture.config(BUILD_OK, &extra);
    let target = Arc::new(CountingTarget::failing_restore());
    let soon = Arc::new(FixedCertSource(Utc::now() + chrono::Duration::days(2)));
    let ctx = context(config, forced(), target.clone(), Arc::new(CountingChannel::default()), soon);

    let report = DeployCommand::new(ctx).execute().await;

    assert_eq!(report.exit_code, 6);
    assert_eq!(report.status, FinalStatus::RollbackFailed);
    assert_eq!(report.failed_phase.as_ref().unwrap().phase, PhaseKind::Verify);
    assert_eq!(target.restores(), 1);
    match &report.rollback {
        RollbackStatus::Failed { backup_id, error } => {
            assert_eq!(Some(backup_id), report.backup.as_ref().map(|b| &b.id));
            assert!(error.contains("permission denied"), "{error}");
        }
        other => panic!("unexpected rollback status {other:?}"),
    }
}

#[tokio::test]
async fn skip_backup_without_any_retained_backup_cannot_roll_back() {
    let fixture = Fixture::new();
    let extra = format!("{TLS_PROBE}min_days = 30\n");
    let config = fixture.config(BUILD_OK, &extra);
    let flags = RunFlags {
        skip_backup: true,
        ..forced()
    };
    let target = Arc::new(CountingTarget::new());
    let soon = Arc::new(FixedCertSource(Utc::now() + chrono::Duration::days(2)));
    let ctx = context(config, flags, target.clone(), Arc::new(CountingChannel::default()), soon);

    let report = DeployCommand::new(ctx).execute().await;

    assert_eq!(report.exit_code, 5);
    assert_eq!(report.status, FinalStatus::Failed);
    assert_eq!(report.rollback, RollbackStatus::Unavailable);
    assert!(report.backup.is_none());
    assert_eq!(target.restores(), 0);
    assert_eq!(fixture.live_file("index.html"), "new release");
}

#[tokio::test]
async fn dry_run_touches_nothing() {
    let fixture = Fixture::new();
    let extra = format!("[preflight]\nrequired_tools = [\"sh\"]\n{TLS_PROBE}");
    let target = Arc::new(CountingTarget::new());
    let channel = Arc::new(CountingChannel::default());
    let config = fixture.config(BUILD_OK, &extra);
    let flags = RunFlags {
        dry_run: true,
        ..RunFlags::default()
    };
    let ctx = context(config, flags, target.clone(), channel.clone(), far_future_cert());

    let report = DeployCommand::new(ctx).execute().await;

    assert_eq!(report.exit_code, 0, "{:?}", report.error);
    assert!(report.dry_run);
    assert_eq!(report.phases.len(), 6);
    assert!(report.phases.iter().all(|p| p.simulated));
    assert_eq!(target.mutations(), 0);
    assert_eq!(channel.calls(), 0);
    assert!(!fixture.source.join("dist").exists());
    assert!(!fixture.source.join("version.json").exists());
    assert!(!fixture.backup_root().exists());
    assert!(!fixture.dir.path().join("locks").exists());
    assert_eq!(fixture.live_file("index.html"), "old release");
    assert_eq!(std::fs::read_to_string(fixture.source.join("VERSION")).unwrap(), "1.2.3+7\n");
}

#[tokio::test]
async fn held_lock_is_a_preflight_failure() {
    let fixture = Fixture::new();
    let config = fixture.config(BUILD_OK, TLS_PROBE);
    let lock_dir = config.lock_dir();
    let target = Arc::new(CountingTarget::new());
    let ctx = context(config, forced(), target.clone(), Arc::new(CountingChannel::default()), far_future_cert());
    let other = RunLock::acquire(&lock_dir, &ctx.target_key(), "20260101T000000-abcdef").unwrap();

    let report = DeployCommand::new(ctx).execute().await;

    assert_eq!(report.exit_code, 2);
    assert_eq!(report.failed_phase.as_ref().unwrap().phase, PhaseKind::Preflight);
    assert!(report.phases.is_empty());
    assert_eq!(target.mutations(), 0);
    assert!(other.path().exists());
    other.release();
}

#[tokio::test]
async fn lock_is_released_after_the_run() {
    let fixture = Fixture::new();
    let config = fixture.config(BUILD_OK, TLS_PROBE);
    let lock_dir = config.lock_dir();
    let ctx = context(
        config,
        forced(),
        Arc::new(CountingTarget::new()),
        Arc::new(CountingChannel::default()),
        far_future_cert(),
    );
    let key = ctx.target_key();

    let report = DeployCommand::new(ctx).execute().await;

    assert_eq!(report.exit_code, 0, "{:?}", report.error);
    let again = RunLock::acquire(&lock_dir, &key, "next").unwrap();
    again.release();
}

#[tokio::test]
async fn skip_backup_rolls_back_to_the_latest_retained_backup() {
    let fixture = Fixture::new();
    let keep = format!("[backup]\nkeep_on_success = true\n{TLS_PROBE}");
    let first = deploy(&fixture, BUILD_OK, &keep, forced(), Arc::new(CountingTarget::new())).await;
    assert_eq!(first.exit_code, 0, "{:?}", first.error);
    let kept = first.backup.unwrap().id;
    assert_eq!(fixture.live_file("index.html"), "new release");

    let broken = "mkdir -p dist && printf 'broken release' > dist/index.html";
    let extra = format!("{keep}min_days = 30\n");
    let config = fixture.config(broken, &extra);
    let flags = RunFlags {
        skip_backup: true,
        ..forced()
    };
    let soon = Arc::new(FixedCertSource(Utc::now() + chrono::Duration::days(2)));
    let target = Arc::new(CountingTarget::new());
    let ctx = context(config, flags, target.clone(), Arc::new(CountingChannel::default()), soon);

    let report = DeployCommand::new(ctx).execute().await;

    assert_eq!(report.exit_code, 5);
    assert!(report.backup.is_none());
    assert_eq!(target.snapshots.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert_eq!(report.rollback, RollbackStatus::Succeeded { backup_id: kept });
    assert_eq!(fixture.live_file("index.html"), "old release");
}

#[tokio::test]
async fn cancelled_run_exits_interrupted_without_rollback() {
    let fixture = Fixture::new();
    let config = fixture.config(BUILD_OK, TLS_PROBE);
    let target = Arc::new(CountingTarget::new());
    let ctx = context(config, forced(), target.clone(), Arc::new(CountingChannel::default()), far_future_cert());
    ctx.cancel_token().cancel();

    let report = DeployCommand::new(ctx).execute().await;

    assert_eq!(report.exit_code, 130);
    assert_eq!(report.status, FinalStatus::Interrupted);
    assert_eq!(report.rollback, RollbackStatus::NotNeeded);
    assert_eq!(target.mutations(), 0);
}
