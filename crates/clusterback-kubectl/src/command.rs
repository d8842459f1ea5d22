//! kubectl invocation.

use clusterback_core::config::KubectlConfig;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Default timeout for one-shot kubectl calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Errors from running kubectl.
#[derive(Debug, Error)]
pub enum KubectlError {
    /// The binary could not be started.
    #[error("failed to run {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    /// kubectl ran but exited unsuccessfully.
    #[error("kubectl {command} exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },

    /// kubectl did not finish in time.
    #[error("kubectl {command} timed out after {}s", .timeout.as_secs())]
    Timeout { command: String, timeout: Duration },

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl KubectlError {
    /// Whether kubectl never got to talk to the cluster.
    pub fn is_transport(&self) -> bool {
        matches!(self, KubectlError::Spawn { .. } | KubectlError::Timeout { .. })
    }
}

/// Result type for kubectl calls.
pub type KubectlResult<T> = Result<T, KubectlError>;

/// How to run kubectl.
#[derive(Debug, Clone)]
pub struct Kubectl {
    binary: String,
    context: Option<String>,
    kubeconfig: Option<PathBuf>,
    timeout: Duration,
}

impl Default for Kubectl {
    fn default() -> Self {
        Self {
            binary: "kubectl".to_string(),
            context: None,
            kubeconfig: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl Kubectl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &KubectlConfig) -> Self {
        let mut kubectl = Self::new();
        if let Some(binary) = &config.binary {
            kubectl.binary = binary.clone();
        }
        kubectl.context = config.context.clone();
        kubectl.kubeconfig = config.kubeconfig.clone();
        kubectl
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_kubeconfig(mut self, path: impl Into<PathBuf>) -> Self {
        self.kubeconfig = Some(path.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Full argument list, connection flags first.
    pub fn args(&self, args: &[&str]) -> Vec<String> {
        let mut full = Vec::with_capacity(args.len() + 4);
        if let Some(kubeconfig) = &self.kubeconfig {
            full.push("--kubeconfig".to_string());
            full.push(kubeconfig.display().to_string());
        }
        if let Some(context) = &self.context {
            full.push("--context".to_string());
            full.push(context.clone());
        }
        full.extend(args.iter().map(|a| a.to_string()));
        full
    }

    /// A ready-to-spawn command. Output is piped; stdin is closed.
    pub fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(self.args(args))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Run to completion and return stdout.
    pub async fn run(&self, args: &[&str], input: Option<&[u8]>) -> KubectlResult<Vec<u8>> {
        let command = args.join(" ");
        debug!(binary = %self.binary, command = %command, "Running kubectl");

        let mut cmd = self.command(args);
        if input.is_some() {
            cmd.stdin(Stdio::piped());
        }
        let mut child = cmd.spawn().map_err(|e| KubectlError::Spawn {
            binary: self.binary.clone(),
            source: e,
        })?;

        let writer = match (input, child.stdin.take()) {
            (Some(input), Some(mut stdin)) => {
                let input = input.to_vec();
                Some(tokio::spawn(async move {
                    stdin.write_all(&input).await?;
                    stdin.shutdown().await
                }))
            }
            _ => None,
        };

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| KubectlError::Timeout {
                command: command.clone(),
                timeout: self.timeout,
            })??;

        if let Some(writer) = writer {
            // A broken pipe here means kubectl exited early; its status says why.
            let _ = writer.await;
        }

        if !output.status.success() {
            return Err(KubectlError::Failed {
                command,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output.stdout)
    }
}
