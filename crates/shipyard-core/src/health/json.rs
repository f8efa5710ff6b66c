use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{HealthCheckResult, HealthProbe};

/// Equality with string/number leniency: `"3"` matches `3`.
pub fn values_match(actual: &Value, expected: &Value) -> bool {
    if actual == expected {
        return true;
    }
    match (actual, expected) {
        (Value::String(s), Value::Number(n)) | (Value::Number(n), Value::String(s)) => {
            s.trim() == n.to_string()
        }
        _ => false,
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

async fn fetch_json(client: &reqwest::Client, url: &str, timeout: Duration) -> Result<Value, String> {
    let response = client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|err| format!("request to {url} failed: {err}"))?;
    let status = response.status();
    if !status.is_success() {
        return Err(format!("HTTP {} from {url}", status.as_u16()));
    }
    response
        .json::<Value>()
        .await
        .map_err(|err| format!("{url} did not return JSON: {err}"))
}

/// Compares the value at a JSON pointer with an expected value.
#[derive(Debug, Clone)]
pub struct JsonFieldProbe {
    name: String,
    url: String,
    pointer: String,
    expected: Value,
    timeout: Duration,
    client: reqwest::Client,
}

impl JsonFieldProbe {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        pointer: impl Into<String>,
        expected: Value,
        timeout: Duration,
        client: reqwest::Client,
    ) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            pointer: pointer.into(),
            expected,
            timeout,
            client,
        }
    }
}

#[async_trait]
impl HealthProbe for JsonFieldProbe {
    fn name(&self) -> &str {
        &self.name
    }

    fn describe(&self) -> String {
        format!("{}{} == {}", self.url, self.pointer, render(&self.expected))
    }

    async fn check(&self) -> HealthCheckResult {
        let doc = match fetch_json(&self.client, &self.url, self.timeout).await {
            Ok(doc) => doc,
            Err(detail) => return HealthCheckResult::fail(&self.name, detail),
        };
        match doc.pointer(&self.pointer) {
            Some(actual) if values_match(actual, &self.expected) => {
                HealthCheckResult::pass(&self.name, format!("{} = {}", self.pointer, render(actual)))
            }
            Some(actual) => HealthCheckResult::fail(
                &self.name,
                format!(
                    "{} = {} (expected {})",
                    self.pointer,
                    render(actual),
                    render(&self.expected)
                ),
            ),
            None => HealthCheckResult::fail(&self.name, format!("{} missing from document", self.pointer)),
        }
    }
}

/// Reads back the deployed status document and checks it describes the
/// release that was just shipped.
#[derive(Debug, Clone)]
pub struct StatusDocumentProbe {
    url: String,
    version: String,
    build_number: u64,
    timeout: Duration,
    client: reqwest::Client,
}

impl StatusDocumentProbe {
    pub const NAME: &'static str = "status-document";

    pub fn new(
        url: impl Into<String>,
        version: impl Into<String>,
        build_number: u64,
        timeout: Duration,
        client: reqwest::Client,
    ) -> Self {
        Self {
            url: url.into(),
            version: version.into(),
            build_number,
            timeout,
            client,
        }
    }
}

#[async_trait]
impl HealthProbe for StatusDocumentProbe {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn describe(&self) -> String {
        format!(
            "{} reports version {} build {}",
            self.url, self.version, self.build_number
        )
    }

    async fn check(&self) -> HealthCheckResult {
        let doc = match fetch_json(&self.client, &self.url, self.timeout).await {
            Ok(doc) => doc,
            Err(detail) => return HealthCheckResult::fail(Self::NAME, detail),
        };

        let expectations = [
            ("/version", Value::String(self.version.clone())),
            ("/build_number", Value::from(self.build_number)),
        ];
        let mismatches: Vec<String> = expectations
            .iter()
            .filter_map(|(pointer, expected)| match doc.pointer(pointer) {
                Some(actual) if values_match(actual, expected) => None,
                Some(actual) => Some(format!(
                    "{pointer} = {} (expected {})",
                    render(actual),
                    render(expected)
                )),
                None => Some(format!("{pointer} missing")),
            })
            .collect();

        if mismatches.is_empty() {
            HealthCheckResult::pass(
                Self::NAME,
                format!("version {} build {}", self.version, self.build_number),
            )
        } else {
            HealthCheckResult::fail(Self::NAME, mismatches.join("; "))
        }
    }
}
