use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::LOCATION;
use tracing::debug;

use super::{HealthCheckResult, HealthProbe};

/// Passes only when the endpoint answers with exactly `expected_status`.
///
/// The client must not follow redirects: a 301/302 in front of the real page
/// is a FAIL even though the site is reachable.
#[derive(Debug, Clone)]
pub struct HttpStatusProbe {
    name: String,
    url: String,
    expected_status: u16,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpStatusProbe {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        expected_status: u16,
        timeout: Duration,
        client: reqwest::Client,
    ) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            expected_status,
            timeout,
            client,
        }
    }
}

#[async_trait]
impl HealthProbe for HttpStatusProbe {
    fn name(&self) -> &str {
        &self.name
    }

    fn describe(&self) -> String {
        format!("GET {} expecting HTTP {}", self.url, self.expected_status)
    }

    async fn check(&self) -> HealthCheckResult {
        let response = match self.client.get(&self.url).timeout(self.timeout).send().await {
            Ok(response) => response,
            Err(err) => {
                return HealthCheckResult::fail(&self.name, format!("request to {} failed: {err}", self.url));
            }
        };
        let status = response.status();
        debug!(probe = %self.name, url = %self.url, status = status.as_u16(), "http probe answered");

        if status.as_u16() == self.expected_status {
            return HealthCheckResult::pass(&self.name, format!("HTTP {}", status.as_u16()));
        }
        if status.is_redirection() {
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|value| value.to_str().ok())
                .unwrap_or("<no location>");
            return HealthCheckResult::fail(
                &self.name,
                format!(
                    "redirect HTTP {} to {location} (expected {})",
                    status.as_u16(),
                    self.expected_status
                ),
            );
        }
        HealthCheckResult::fail(
            &self.name,
            format!("HTTP {} (expected {})", status.as_u16(), self.expected_status),
        )
    }
}
