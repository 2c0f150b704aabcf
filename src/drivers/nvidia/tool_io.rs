use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;

/// Result of one tool invocation. Output is empty unless it was captured.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Process boundary for the NVIDIA command-line tools.
#[async_trait]
pub trait ToolRunner: Send + Sync + core::fmt::Debug {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        envs: &[(String, String)],
        capture: bool,
    ) -> Result<ToolOutput>;
}

/// Runs tools as child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

#[async_trait]
impl ToolRunner for SystemRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        envs: &[(String, String)],
        capture: bool,
    ) -> Result<ToolOutput> {
        let mut command = tokio::process::Command::new(program);
        command
            .args(args)
            .envs(envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .kill_on_drop(true);

        if capture {
            let output = command
                .output()
                .await
                .with_context(|| format!("Failed to execute {program}"))?;
            Ok(ToolOutput {
                success: output.status.success(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        } else {
            let status = command
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await
                .with_context(|| format!("Failed to execute {program}"))?;
            Ok(ToolOutput {
                success: status.success(),
                ..ToolOutput::default()
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_program_is_an_error() {
        let result = SystemRunner
            .run("/nonexistent/nvidia-settings", &[], &[], false)
            .await;
        assert!(result.is_err());
    }
}
