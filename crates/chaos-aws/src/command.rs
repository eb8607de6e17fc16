use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::AwsError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Executes a binary with arguments. Split out so adapters can be exercised
/// against canned output.
pub trait CommandRunner: Send + Sync {
    fn run(&self, binary: &Path, args: &[String]) -> Result<CommandOutput, AwsError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(&self, binary: &Path, args: &[String]) -> Result<CommandOutput, AwsError> {
        let rendered = render_command(binary, args);
        let output = Command::new(binary)
            .args(args)
            .output()
            .map_err(|source| AwsError::Io {
                command: rendered.clone(),
                source,
            })?;

        let stdout =
            String::from_utf8(output.stdout).map_err(|source| AwsError::NonUtf8Output {
                command: rendered.clone(),
                stream: "stdout",
                source,
            })?;
        let stderr =
            String::from_utf8(output.stderr).map_err(|source| AwsError::NonUtf8Output {
                command: rendered,
                stream: "stderr",
                source,
            })?;

        Ok(CommandOutput {
            status: output.status.code(),
            success: output.status.success(),
            stdout,
            stderr,
        })
    }
}

#[derive(Clone)]
pub struct AwsCli {
    pub binary: PathBuf,
    pub region: String,
    runner: Arc<dyn CommandRunner>,
}

impl std::fmt::Debug for AwsCli {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCli")
            .field("binary", &self.binary)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

impl AwsCli {
    pub fn new(region: impl Into<String>) -> Self {
        Self::with_runner(region, Arc::new(ProcessRunner))
    }

    pub fn with_runner(region: impl Into<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            binary: PathBuf::from("aws"),
            region: region.into(),
            runner,
        }
    }

    /// Run `aws <service> <operation> <args..> --region R --output json`
    /// and return stdout.
    pub fn call(
        &self,
        service: &str,
        operation: &str,
        args: &[String],
    ) -> Result<String, AwsError> {
        let mut full = Vec::with_capacity(args.len() + 6);
        full.push(service.to_string());
        full.push(operation.to_string());
        full.extend(args.iter().cloned());
        full.push("--region".to_string());
        full.push(self.region.clone());
        full.push("--output".to_string());
        full.push("json".to_string());

        let rendered = render_command(&self.binary, &full);
        debug!(command = %rendered, "aws call");
        let output = self.runner.run(&self.binary, &full)?;
        if !output.success {
            return Err(AwsError::CommandFailed {
                command: rendered,
                status: output.status,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output.stdout)
    }

    /// Like [`AwsCli::call`] but decodes stdout. Empty stdout decodes as
    /// `T::default()`; the CLI prints nothing when e.g. a queue is empty.
    pub fn call_json<T>(
        &self,
        service: &str,
        operation: &str,
        args: &[String],
    ) -> Result<T, AwsError>
    where
        T: DeserializeOwned + Default,
    {
        let stdout = self.call(service, operation, args)?;
        if stdout.trim().is_empty() {
            return Ok(T::default());
        }
        serde_json::from_str(&stdout).map_err(|source| AwsError::Json {
            command: format!("aws {service} {operation}"),
            source,
        })
    }
}

fn render_command(binary: &Path, args: &[String]) -> String {
    let mut rendered = binary.to_string_lossy().into_owned();
    for arg in args {
        rendered.push(' ');
        rendered.push_str(arg);
    }
    rendered
}
