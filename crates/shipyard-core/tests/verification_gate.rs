//! Gate strictness against real HTTP endpoints and canned probes.

mod support;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use shipyard_core::health::{
    HealthCheckResult, HealthProbe, HttpStatusProbe, JsonFieldProbe, Overall, StatusDocumentProbe,
    TlsExpiryProbe, VerificationGate,
};

use support::{FixedCertSource, Reply, serve};

const TIMEOUT: Duration = Duration::from_secs(5);

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .no_proxy()
        .build()
        .unwrap()
}

#[derive(Debug)]
struct Canned {
    name: String,
    pass: bool,
}

#[async_trait]
impl HealthProbe for Canned {
    fn name(&self) -> &str {
        &self.name
    }

    fn describe(&self) -> String {
        format!("canned {}", self.name)
    }

    async fn check(&self) -> HealthCheckResult {
        if self.pass {
            HealthCheckResult::pass(&self.name, "ok")
        } else {
            HealthCheckResult::fail(&self.name, "broken")
        }
    }
}

fn canned(name: &str, pass: bool) -> Arc<dyn HealthProbe> {
    Arc::new(Canned {
        name: name.to_string(),
        pass,
    })
}

#[tokio::test]
async fn one_failure_among_many_passes_fails_the_gate() {
    let mut gate = VerificationGate::new(TIMEOUT);
    for i in 0..10 {
        gate.add(canned(&format!("ok-{i}"), true));
    }
    gate.add(canned("broken", false));

    let report = gate.run().await;

    assert_eq!(report.overall, Overall::Failed);
    assert!(!report.is_healthy());
    assert_eq!(report.results.len(), 11);
    let failed: Vec<_> = report.failures().map(|r| r.probe_name.as_str()).collect();
    assert_eq!(failed, vec!["broken"]);
}

#[tokio::test]
async fn results_keep_probe_order() {
    let gate = VerificationGate::with_probes(
        vec![canned("first", true), canned("second", false), canned("third", true)],
        TIMEOUT,
    );

    let report = gate.run().await;

    let names: Vec<_> = report.results.iter().map(|r| r.probe_name.as_str()).collect();
    assert_eq!(names, vec!["first", "second", "third"]);
}

#[tokio::test]
async fn redirects_are_failures_not_followed() {
    let addr = serve(|path| match path {
        "/moved" => Reply::redirect(301, "/home"),
        "/found" => Reply::redirect(302, "/home"),
        _ => Reply::ok("home"),
    })
    .await;
    let gate = VerificationGate::with_probes(
        vec![
            Arc::new(HttpStatusProbe::new("moved", format!("http://{addr}/moved"), 200, TIMEOUT, client())),
            Arc::new(HttpStatusProbe::new("found", format!("http://{addr}/found"), 200, TIMEOUT, client())),
            Arc::new(HttpStatusProbe::new("home", format!("http://{addr}/home"), 200, TIMEOUT, client())),
        ],
        TIMEOUT,
    );

    let report = gate.run().await;

    assert_eq!(report.overall, Overall::Failed);
    assert!(!report.results[0].passed, "{}", report.results[0].detail);
    assert!(report.results[0].detail.contains("301"));
    assert!(!report.results[1].passed);
    assert!(report.results[1].detail.contains("302"));
    assert!(report.results[2].passed);
}

#[tokio::test]
async fn status_document_must_name_the_shipped_release() {
    let addr = serve(|path| match path {
        "/current.json" => Reply::ok(r#"{"version":"1.2.3","build_number":7}"#),
        "/stale.json" => Reply::ok(r#"{"version":"1.2.2","build_number":6}"#),
        _ => Reply::status(404),
    })
    .await;

    let current = StatusDocumentProbe::new(format!("http://{addr}/current.json"), "1.2.3", 7, TIMEOUT, client());
    let stale = StatusDocumentProbe::new(format!("http://{addr}/stale.json"), "1.2.3", 7, TIMEOUT, client());
    let missing = StatusDocumentProbe::new(format!("http://{addr}/none.json"), "1.2.3", 7, TIMEOUT, client());

    assert!(current.check().await.passed);
    let stale = stale.check().await;
    assert!(!stale.passed);
    assert!(stale.detail.contains("1.2.2"), "{}", stale.detail);
    assert!(!missing.check().await.passed);
}

#[tokio::test]
async fn json_field_probe_compares_the_pointer_value() {
    let addr = serve(|_| Reply::ok(r#"{"db":{"ok":true},"queue":{"ok":false}}"#)).await;
    let url = format!("http://{addr}/health");

    let db = JsonFieldProbe::new("db", &url, "/db/ok", json!(true), TIMEOUT, client());
    let queue = JsonFieldProbe::new("queue", &url, "/queue/ok", json!(true), TIMEOUT, client());
    let absent = JsonFieldProbe::new("cache", &url, "/cache/ok", json!(true), TIMEOUT, client());

    assert!(db.check().await.passed);
    assert!(!queue.check().await.passed);
    assert!(!absent.check().await.passed);
}

#[tokio::test]
async fn unreachable_endpoint_is_a_failure() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let probe = HttpStatusProbe::new("down", format!("http://{addr}/"), 200, TIMEOUT, client());
    let result = probe.check().await;

    assert!(!result.passed);
    assert!(result.detail.contains("failed"), "{}", result.detail);
}

#[tokio::test]
async fn certificate_close_to_expiry_fails() {
    let soon = Arc::new(FixedCertSource(Utc::now() + chrono::Duration::days(2)));
    let later = Arc::new(FixedCertSource(Utc::now() + chrono::Duration::days(90)));

    let near = TlsExpiryProbe::new("tls", "example.test", 443, 30, TIMEOUT, soon);
    let fine = TlsExpiryProbe::new("tls", "example.test", 443, 30, TIMEOUT, later);

    assert!(!near.check().await.passed);
    assert!(fine.check().await.passed);
}

#[derive(Debug)]
struct Hanging;

#[async_trait]
impl HealthProbe for Hanging {
    fn name(&self) -> &str {
        "hanging"
    }

    fn describe(&self) -> String {
        "never answers".to_string()
    }

    async fn check(&self) -> HealthCheckResult {
        std::future::pending().await
    }
}

#[tokio::test(start_paused = true)]
async fn probe_exceeding_the_gate_timeout_fails() {
    let gate = VerificationGate::with_probes(vec![Arc::new(Hanging), canned("ok", true)], Duration::from_secs(3));

    let report = gate.run().await;

    assert_eq!(report.overall, Overall::Failed);
    assert!(report.results[0].detail.contains("timed out"));
    assert!(report.results[1].passed);
}
