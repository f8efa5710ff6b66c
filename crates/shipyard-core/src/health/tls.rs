use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};

use super::{HealthCheckResult, HealthProbe};
use crate::exec::{LocalShell, shell_quote};

/// Where a certificate's expiry date comes from.
#[async_trait]
pub trait CertificateSource: Send + Sync + fmt::Debug {
    async fn not_after(&self, host: &str, port: u16, timeout: Duration) -> anyhow::Result<DateTime<Utc>>;
}

/// Asks the `openssl` CLI for the served certificate's `notAfter`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpensslSource {
    shell: LocalShell,
}

impl OpensslSource {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CertificateSource for OpensslSource {
    async fn not_after(&self, host: &str, port: u16, timeout: Duration) -> anyhow::Result<DateTime<Utc>> {
        let host_q = shell_quote(host);
        let command = format!(
            "echo | openssl s_client -servername {host_q} -connect {host_q}:{port} 2>/dev/null \
             | openssl x509 -noout -enddate"
        );
        let output = self
            .shell
            .run(&command, None, timeout)
            .await
            .with_context(|| format!("Failed to query certificate for {host}:{port}"))?;
        if !output.success() {
            anyhow::bail!(
                "openssl could not read the certificate for {host}:{port}: {}",
                output.diagnostic()
            );
        }
        parse_openssl_enddate(&output.stdout)
    }
}

/// Parse the `notAfter=Jan  1 00:00:00 2027 GMT` line printed by
/// `openssl x509 -enddate`.
pub fn parse_openssl_enddate(output: &str) -> anyhow::Result<DateTime<Utc>> {
    let raw = output
        .lines()
        .find_map(|line| line.trim().strip_prefix("notAfter="))
        .ok_or_else(|| anyhow::anyhow!("no notAfter= line in openssl output"))?;
    let normalized = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let without_zone = normalized.strip_suffix(" GMT").unwrap_or(&normalized);
    let naive = NaiveDateTime::parse_from_str(without_zone, "%b %d %H:%M:%S %Y")
        .with_context(|| format!("Unrecognized certificate date: {raw}"))?;
    Ok(naive.and_utc())
}

/// PASS iff the certificate is valid for more than `min_days` more days.
pub fn evaluate_expiry(
    name: &str,
    not_after: DateTime<Utc>,
    now: DateTime<Utc>,
    min_days: u32,
) -> HealthCheckResult {
    let remaining = not_after - now;
    let days_left = remaining.num_days();
    if remaining > TimeDelta::days(i64::from(min_days)) {
        HealthCheckResult::pass(
            name,
            format!("certificate valid until {} ({days_left} days)", not_after.to_rfc3339()),
        )
    } else if remaining <= TimeDelta::zero() {
        HealthCheckResult::fail(name, format!("certificate expired at {}", not_after.to_rfc3339()))
    } else {
        HealthCheckResult::fail(
            name,
            format!(
                "certificate expires in {days_left} days at {} (minimum {min_days})",
                not_after.to_rfc3339()
            ),
        )
    }
}

#[derive(Debug, Clone)]
pub struct TlsExpiryProbe {
    name: String,
    host: String,
    port: u16,
    min_days: u32,
    timeout: Duration,
    source: Arc<dyn CertificateSource>,
}

impl TlsExpiryProbe {
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        min_days: u32,
        timeout: Duration,
        source: Arc<dyn CertificateSource>,
    ) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            min_days,
            timeout,
            source,
        }
    }
}

#[async_trait]
impl HealthProbe for TlsExpiryProbe {
    fn name(&self) -> &str {
        &self.name
    }

    fn describe(&self) -> String {
        format!(
            "certificate for {}:{} valid for at least {} days",
            self.host, self.port, self.min_days
        )
    }

    async fn check(&self) -> HealthCheckResult {
        match self.source.not_after(&self.host, self.port, self.timeout).await {
            Ok(not_after) => evaluate_expiry(&self.name, not_after, Utc::now(), self.min_days),
            Err(err) => HealthCheckResult::fail(&self.name, format!("{err:#}")),
        }
    }
}
