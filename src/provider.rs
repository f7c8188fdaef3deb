use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("{action} command failed with status {code:?}: {detail}")]
    CommandFailed {
        action: &'static str,
        code: Option<i32>,
        detail: String,
    },

    #[error("{action} produced unexpected output: {detail}")]
    UnexpectedOutput {
        action: &'static str,
        detail: String,
    },

    #[error("Failed to run {action} command: {source}")]
    Io {
        action: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Description of the probe job to submit. Its construction (templates,
/// payload packaging) happens upstream; the monitor passes it through.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub descriptor: String,
}

impl JobSpec {
    pub fn new(descriptor: impl Into<String>) -> Self {
        Self {
            descriptor: descriptor.into(),
        }
    }
}

/// The remote job-control system.
///
/// `cancel` and `purge` are best-effort at every call site: their failures
/// are reported but never block local bookkeeping. `logging_info` is
/// diagnostic only.
#[async_trait]
pub trait JobProvider: Send + Sync {
    /// Submit a job for `target`; returns the provider-assigned job id.
    async fn submit(&self, target: &str, spec: &JobSpec) -> Result<String, ProviderError>;

    /// Raw status text for a job. `Err(NotFound)` means the remote side no
    /// longer knows the job.
    async fn status(&self, job_id: &str) -> Result<String, ProviderError>;

    async fn cancel(&self, job_id: &str) -> Result<(), ProviderError>;

    async fn purge(&self, job_id: &str) -> Result<(), ProviderError>;

    async fn logging_info(&self, job_id: &str) -> Result<String, ProviderError>;

    /// Retrieve the output of a completed job.
    async fn fetch_output(&self, job_id: &str) -> Result<String, ProviderError>;
}

/// Command templates for [`CommandProvider`], one per job operation.
/// Templates are split on whitespace (no shell quoting); the operation's
/// arguments are appended.
#[derive(Debug, Clone)]
pub struct ProviderCommands {
    pub submit: String,
    pub status: String,
    pub cancel: String,
    pub purge: String,
    pub logging: String,
    pub output: String,
}

impl Default for ProviderCommands {
    fn default() -> Self {
        Self {
            submit: "glite-ce-job-submit -a -r".to_string(),
            status: "glite-ce-job-status".to_string(),
            cancel: "glite-ce-job-cancel --noint".to_string(),
            purge: "glite-ce-job-purge --noint".to_string(),
            logging: "glite-ce-job-status -L 1".to_string(),
            output: "glite-ce-job-output --noint".to_string(),
        }
    }
}

/// Job-control provider shelling out to external command-line tools.
///
/// Spawned processes get `kill_on_drop`, so a poll task reaped by the
/// scheduler takes its in-flight command down with it.
#[derive(Debug, Clone)]
pub struct CommandProvider {
    commands: ProviderCommands,
}

impl CommandProvider {
    pub fn new(commands: ProviderCommands) -> Self {
        Self { commands }
    }

    async fn run(
        &self,
        action: &'static str,
        template: &str,
        args: &[&str],
    ) -> Result<String, ProviderError> {
        let mut parts = template.split_whitespace();
        let program = parts.next().ok_or(ProviderError::UnexpectedOutput {
            action,
            detail: "empty command template".to_string(),
        })?;
        tracing::debug!(action, command = %template, ?args, "Running job-control command");
        let output = Command::new(program)
            .args(parts)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ProviderError::Io { action, source })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let combined = if stderr.is_empty() {
            stdout
        } else {
            format!("{}\n{}", stdout, stderr)
        };
        if combined.to_ascii_lowercase().contains("job not found") {
            return Err(ProviderError::NotFound(args.join(" ")));
        }
        if !output.status.success() {
            return Err(ProviderError::CommandFailed {
                action,
                code: output.status.code(),
                detail: combined,
            });
        }
        Ok(combined)
    }
}

#[async_trait]
impl JobProvider for CommandProvider {
    async fn submit(&self, target: &str, spec: &JobSpec) -> Result<String, ProviderError> {
        let out = self
            .run("submit", &self.commands.submit, &[target, &spec.descriptor])
            .await?;
        // the job id is the first URL-shaped line of the submit output
        out.lines()
            .map(str::trim)
            .find(|line| line.starts_with("http"))
            .map(str::to_string)
            .ok_or_else(|| ProviderError::UnexpectedOutput {
                action: "submit",
                detail: format!("no job id in output: {}", out),
            })
    }

    async fn status(&self, job_id: &str) -> Result<String, ProviderError> {
        self.run("status", &self.commands.status, &[job_id]).await
    }

    async fn cancel(&self, job_id: &str) -> Result<(), ProviderError> {
        self.run("cancel", &self.commands.cancel, &[job_id])
            .await
            .map(|_| ())
    }

    async fn purge(&self, job_id: &str) -> Result<(), ProviderError> {
        self.run("purge", &self.commands.purge, &[job_id])
            .await
            .map(|_| ())
    }

    async fn logging_info(&self, job_id: &str) -> Result<String, ProviderError> {
        self.run("logging", &self.commands.logging, &[job_id]).await
    }

    async fn fetch_output(&self, job_id: &str) -> Result<String, ProviderError> {
        self.run("output", &self.commands.output, &[job_id]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_provider(submit: &str) -> CommandProvider {
        CommandProvider::new(ProviderCommands {
            submit: submit.to_string(),
            status: "echo Status = [RUNNING] for".to_string(),
            cancel: "echo cancelled".to_string(),
            purge: "echo purged".to_string(),
            logging: "echo log".to_string(),
            output: "echo out".to_string(),
        })
    }

    #[tokio::test]
    async fn submit_extracts_job_id() {
        let provider = echo_provider("echo https://ce1.example.org:8443/CREAM42 submitted for");
        let id = provider
            .submit("wn1", &JobSpec::new("probe.jdl"))
            .await
            .unwrap();
        assert_eq!(id, "https://ce1.example.org:8443/CREAM42");
    }

    #[tokio::test]
    async fn submit_without_job_id_is_an_error() {
        let provider = echo_provider("echo nothing useful");
        let err = provider
            .submit("wn1", &JobSpec::new("probe.jdl"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::UnexpectedOutput { .. }));
    }

    #[tokio::test]
    async fn status_returns_raw_text() {
        let provider = echo_provider("echo id");
        let out = provider.status("job-1").await.unwrap();
        assert!(out.contains("Status = [RUNNING]"));
        assert!(out.contains("job-1"));
    }

    #[tokio::test]
    async fn not_found_text_maps_to_not_found() {
        let provider = CommandProvider::new(ProviderCommands {
            status: "echo error: job not found:".to_string(),
            ..ProviderCommands::default()
        });
        let err = provider.status("job-1").await.unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(_)));
    }

    #[tokio::test]
    async fn missing_binary_is_an_io_error() {
        let provider = CommandProvider::new(ProviderCommands {
            status: "definitely-not-a-real-binary-4X7".to_string(),
            ..ProviderCommands::default()
        });
        let err = provider.status("job-1").await.unwrap_err();
        assert!(matches!(err, ProviderError::Io { .. }));
    }
}
