//! Health probes and the all-or-nothing verification gate.
//!
//! A probe inspects one aspect of the running deployment and reports PASS or
//! FAIL. There is no warning level: anything that is not PASS
//! fails the gate.

mod gate;
mod http;
mod json;
mod service;
mod tls;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use gate::{Overall, VerificationGate, VerificationReport};
pub use http::HttpStatusProbe;
pub use json::{JsonFieldProbe, StatusDocumentProbe, values_match};
pub use service::ServiceStateProbe;
pub use tls::{
    CertificateSource, OpensslSource, TlsExpiryProbe, evaluate_expiry, parse_openssl_enddate,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Pass,
    Fail,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Pass => f.write_str("PASS"),
            Severity::Fail => f.write_str("FAIL"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub probe_name: String,
    pub passed: bool,
    pub detail: String,
    pub severity: Severity,
}

impl HealthCheckResult {
    pub fn pass(probe_name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            probe_name: probe_name.into(),
            passed: true,
            detail: detail.into(),
            severity: Severity::Pass,
        }
    }

    pub fn fail(probe_name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            probe_name: probe_name.into(),
            passed: false,
            detail: detail.into(),
            severity: Severity::Fail,
        }
    }
}

/// A named, side-effect-free check.
///
/// `check` never returns an error: a probe that cannot reach what it inspects
/// reports FAIL with the reason as detail.
#[async_trait]
pub trait HealthProbe: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// One-line summary of what is checked, for dry-run output.
    fn describe(&self) -> String;

    async fn check(&self) -> HealthCheckResult;
}
