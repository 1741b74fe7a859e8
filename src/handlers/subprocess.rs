//! Subprocess handler - runs an external command per step

use crate::core::{RunState, Step, StepOutput};
use crate::handlers::{HandlerError, StepHandler};
use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Handler that executes a program and uses its stdout as the step text
#[derive(Debug, Clone)]
pub struct CommandHandler {
    /// Program to execute
    program: String,

    /// Arguments placed before the composed input
    args: Vec<String>,

    /// Timeout for command execution in seconds
    timeout_secs: u64,
}

impl CommandHandler {
    /// Create a new command handler
    ///
    /// # Arguments
    /// * `program` - Executable name or path
    /// * `args` - Fixed arguments; the composed input is appended last
    /// * `timeout_secs` - Timeout for command execution in seconds
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            program: program.into(),
            args,
            timeout_secs,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Run the command with the given input
    ///
    /// # Errors
    /// Returns `HandlerError` if:
    /// - The program cannot be spawned
    /// - It exits with a non-zero status
    /// - The output is not valid UTF-8
    /// - The command times out
    pub async fn run(&self, input: &str) -> Result<String, HandlerError> {
        debug!(
            "Spawning {} with input length: {}",
            self.program,
            input.len()
        );

        let result = timeout(
            Duration::from_secs(self.timeout_secs),
            Command::new(&self.program)
                .args(&self.args)
                .arg(input)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| HandlerError::Timeout(self.timeout_secs))?;

        let output = result.map_err(|e| {
            HandlerError::Internal(format!("Failed to execute {}: {}", self.program, e))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output.status.code().unwrap_or(-1);
            warn!("{} exited with code {}: {}", self.program, exit_code, stderr.trim());
            return Err(HandlerError::Failed(format!(
                "{} exited with code {}: {}",
                self.program,
                exit_code,
                stderr.trim()
            )));
        }

        let content = String::from_utf8(output.stdout).map_err(|e| {
            HandlerError::Internal(format!("Failed to decode {} output: {}", self.program, e))
        })?;

        debug!("{} returned {} bytes of output", self.program, content.len());

        Ok(content)
    }
}

#[async_trait]
impl StepHandler for CommandHandler {
    async fn handle(
        &self,
        step: &Step,
        input: &str,
        _context: &[String],
        _state: &RunState,
    ) -> Result<StepOutput, HandlerError> {
        let text = self.run(input).await?;
        Ok(StepOutput::text(text.trim_end()).with_metadata(serde_json::json!({
            "program": self.program,
            "role": step.role,
        })))
    }
}
