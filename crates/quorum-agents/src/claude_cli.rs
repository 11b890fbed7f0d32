use std::time::{Duration, Instant};

use async_trait::async_trait;
use quorum_models::ProviderSignal;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{looks_rate_limited, ProviderError};
use crate::parser::parse_signal;
use crate::provider::{ProviderRequest, SignalProvider};

/// Invoke the `claude` CLI with a system prompt and user prompt.
/// Returns the raw stdout text.
pub async fn invoke_claude(
    system_prompt: &str,
    user_prompt: &str,
    model: &str,
    timeout: Duration,
) -> Result<String, ProviderError> {
    debug!(model = %model, "Invoking claude CLI");

    let output = tokio::time::timeout(timeout, async {
        Command::new("claude")
            .args([
                "-p",
                user_prompt,
                "--system-prompt",
                system_prompt,
                "--model",
                model,
                "--output-format",
                "text",
            ])
            .kill_on_drop(true)
            .output()
            .await
    })
    .await
    .map_err(|_| ProviderError::Timeout(timeout.as_millis() as u64))?
    .map_err(|e| ProviderError::Cli(format!("Failed to spawn claude: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!(status = %output.status, stderr = %stderr, "Claude CLI failed");
        let message = format!("claude exited {}: {}", output.status, stderr.trim());
        return Err(if looks_rate_limited(&stderr) {
            ProviderError::RateLimited(message)
        } else {
            ProviderError::Cli(message)
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    if stdout.trim().is_empty() {
        return Err(ProviderError::Cli("Claude returned empty response".to_string()));
    }

    Ok(stdout)
}

/// Check if the `claude` CLI is available on the system.
pub async fn check_cli_available() -> bool {
    match Command::new("claude").arg("--version").output().await {
        Ok(output) => output.status.success(),
        Err(_) => false,
    }
}

/// Signal provider backed by the local `claude` CLI.
pub struct ClaudeCliProvider {
    id: String,
    model: String,
    timeout: Duration,
}

impl ClaudeCliProvider {
    pub fn new(id: String, model: String, timeout: Duration) -> Self {
        Self { id, model, timeout }
    }
}

#[async_trait]
impl SignalProvider for ClaudeCliProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn generate(&self, request: &ProviderRequest) -> Result<ProviderSignal, ProviderError> {
        let start = Instant::now();
        let raw = invoke_claude(
            &request.system_prompt,
            &request.prompt,
            &self.model,
            self.timeout,
        )
        .await?;
        parse_signal(&self.id, &raw, start.elapsed().as_millis() as u64)
    }
}
