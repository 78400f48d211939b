use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use super::{CompletionAdapter, CompletionOptions};
use crate::error::{AugmenterError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Model {
    Opus,
    #[default]
    Sonnet,
    Haiku,
}

impl Model {
    pub fn as_str(&self) -> &'static str {
        match self {
            Model::Opus => "opus",
            Model::Sonnet => "sonnet",
            Model::Haiku => "haiku",
        }
    }
}

/// Completion through a command-line LLM (`claude --print`)
#[derive(Debug, Clone)]
pub struct CliCompletion {
    program: PathBuf,
    model: Model,
    working_dir: Option<PathBuf>,
    system_prompt: Option<String>,
}

impl CliCompletion {
    pub fn new(model: Model) -> Self {
        Self {
            program: PathBuf::from("claude"),
            model,
            working_dir: None,
            system_prompt: None,
        }
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn model(&self) -> Model {
        self.model
    }

    fn command(&self, prompt: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }

        cmd.arg("--print");
        cmd.arg("--model").arg(self.model.as_str());

        if let Some(ref system_prompt) = self.system_prompt {
            cmd.arg("--system-prompt").arg(system_prompt);
        }

        // Prompt is positional and must be last
        cmd.arg(prompt);

        // Closed stdin keeps the CLI from waiting on a terminal
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl CompletionAdapter for CliCompletion {
    fn name(&self) -> &str {
        "cli"
    }

    // Sampling options are not exposed by the CLI
    async fn complete(&self, prompt: &str, _options: &CompletionOptions) -> Result<String> {
        let mut cmd = self.command(prompt);
        tracing::debug!(program = %self.program.display(), model = self.model.as_str(), "Running completion CLI");

        let output = cmd.output().await.map_err(|e| {
            AugmenterError::adapter(
                self.name(),
                format!("failed to execute {}: {}", self.program.display(), e),
            )
        })?;

        let response = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !output.status.success() {
            return Err(AugmenterError::adapter(
                self.name(),
                format!(
                    "exit code {}: {}",
                    output.status.code().unwrap_or(-1),
                    stderr
                ),
            ));
        }
        if !stderr.is_empty() {
            tracing::warn!("completion CLI stderr: {}", stderr);
        }

        Ok(response)
    }
}
