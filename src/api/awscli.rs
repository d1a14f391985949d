//! ST-021: `aws` command-line transport.
//!
//! Runs `aws <service> <operation> --cli-input-json <input> --output json`
//! and turns the CLI's stderr error line back into a structured [`ApiError`].

use super::{CloudApi, Request};
use crate::core::types::ProviderSettings;
use crate::error::ApiError;
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct AwsCli {
    bin: String,
    region: Option<String>,
    profile: Option<String>,
}

impl AwsCli {
    pub fn new(bin: impl Into<String>) -> Self {
        Self {
            bin: bin.into(),
            region: None,
            profile: None,
        }
    }

    pub fn from_settings(settings: &ProviderSettings) -> Self {
        Self {
            bin: settings.aws_bin.clone(),
            region: settings.region.clone(),
            profile: settings.profile.clone(),
        }
    }

    /// Full argument list for one request (without the binary).
    pub fn args(&self, request: &Request) -> Vec<String> {
        let mut args = vec![
            request.service.to_string(),
            operation_to_command(request.operation),
            "--cli-input-json".to_string(),
            request.input.to_string(),
            "--output".to_string(),
            "json".to_string(),
        ];
        if let Some(ref region) = self.region {
            args.push("--region".to_string());
            args.push(region.clone());
        }
        if let Some(ref profile) = self.profile {
            args.push("--profile".to_string());
            args.push(profile.clone());
        }
        args
    }
}

#[async_trait]
impl CloudApi for AwsCli {
    async fn call(&self, request: Request) -> Result<Value, ApiError> {
        debug!(
            service = request.service,
            operation = request.operation,
            "calling {}",
            self.bin
        );
        let output = Command::new(&self.bin)
            .args(self.args(&request))
            .output()
            .await
            .map_err(|e| {
                ApiError::transport(request.operation, format!("failed to spawn {}: {e}", self.bin))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(parse_cli_error(request.operation, &stderr));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        serde_json::from_str(&stdout).map_err(|e| {
            ApiError::transport(request.operation, format!("invalid JSON from aws cli: {e}"))
        })
    }
}

/// `DescribeInstanceRefreshes` -> `describe-instance-refreshes`.
///
/// Acronym runs stay together: `DescribeDBSnapshots` -> `describe-db-snapshots`.
pub fn operation_to_command(operation: &str) -> String {
    let chars: Vec<char> = operation.chars().collect();
    let mut out = String::with_capacity(operation.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_ascii_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_ascii_lowercase());
            if prev.is_ascii_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_ascii_uppercase() && next_is_lower)
            {
                out.push('-');
            }
        }
        out.push(c.to_ascii_lowercase());
    }
    out
}

static ERROR_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"An error occurred \(([A-Za-z0-9_.]+)\) when calling the (\w+) operation(?: \(reached max retries: \d+\))?: (.*)",
    )
    .expect("valid error-line regex")
});

/// Parse the CLI's error line. Unrecognized output becomes a transport error.
pub fn parse_cli_error(operation: &str, stderr: &str) -> ApiError {
    for line in stderr.lines() {
        if let Some(caps) = ERROR_LINE.captures(line) {
            return ApiError::new(
                caps.get(2).map_or(operation, |m| m.as_str()),
                caps.get(1).map_or("", |m| m.as_str()),
                caps.get(3).map_or("", |m| m.as_str().trim()),
            );
        }
    }
    let msg = stderr.trim();
    ApiError::transport(
        operation,
        if msg.is_empty() {
            "aws cli exited with an error and no output".to_string()
        } else {
            msg.to_string()
        },
    )
}
