//! Registry client - moves image bytes between registries
//!
//! The sync engine only needs four operations: pull, tag, push and remove. [`DockerCli`]
//! drives the local `docker` binary; tests substitute in-memory fakes.
//!
//! Every call takes the owning syncer's cancellation token and refuses to start once it is
//! cancelled. A call that has started runs to completion.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command as AsyncCommand;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::display::{TransferDisplay, TransferOp, TransferStatus};
use crate::error::{Result, SyncError};
use crate::image::{registry_host, Credentials};

#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Pull `image` from its source registry
    async fn pull(
        &self,
        image: &str,
        auth: Option<&Credentials>,
        display: &dyn TransferDisplay,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Add the `target` reference to the local image `source`
    async fn tag(&self, source: &str, target: &str, cancel: &CancellationToken) -> Result<()>;

    /// Push a fully qualified reference, logging in to `registry` when `auth` is given
    async fn push(
        &self,
        image: &str,
        registry: &str,
        auth: Option<&Credentials>,
        display: &dyn TransferDisplay,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Force-remove the local image `image` refers to, including every tag sharing its id
    async fn remove(&self, image: &str, cancel: &CancellationToken) -> Result<()>;
}

fn checkpoint(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(SyncError::Cancelled)
    } else {
        Ok(())
    }
}

/// Registry client backed by the docker command line
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: PathBuf,
}

impl DockerCli {
    /// Locate `docker` on the PATH
    pub fn new() -> Result<Self> {
        which::which("docker")
            .map(|binary| Self { binary })
            .map_err(|e| SyncError::ClientUnavailable(format!("docker binary not found: {e}")))
    }

    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn command_error(&self, args: &[&str], message: impl Into<String>) -> SyncError {
        SyncError::Command {
            command: format!("docker {}", args.join(" ")),
            message: message.into(),
        }
    }

    /// Run to completion and return stdout
    async fn run(&self, args: &[&str]) -> Result<String> {
        debug!("Running docker {}", args.join(" "));
        let output = AsyncCommand::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| self.command_error(args, e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(self.command_error(args, stderr.trim()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Run while feeding each stdout line to a progress renderer.
    ///
    /// stderr is drained alongside stdout so neither pipe can fill up and stall the child.
    async fn stream(
        &self,
        args: &[&str],
        op: TransferOp,
        image: &str,
        display: &dyn TransferDisplay,
    ) -> Result<()> {
        debug!("Streaming docker {}", args.join(" "));
        let mut child = AsyncCommand::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.command_error(args, e.to_string()))?;

        let mut progress = display.begin(op, image);
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let report = async {
            let Some(stdout) = stdout else { return };
            let mut segments = BufReader::new(stdout).split(b'\n');
            loop {
                match segments.next_segment().await {
                    Ok(Some(segment)) => {
                        let line = String::from_utf8_lossy(&segment);
                        progress.update(&TransferStatus::parse_line(line.trim_end_matches('\r')));
                    }
                    Ok(None) => break,
                    Err(e) => {
                        debug!("Stopped reading {} output for {}: {}", op, image, e);
                        break;
                    }
                }
            }
        };
        let collect_stderr = async {
            let mut buf = Vec::new();
            if let Some(mut stderr) = stderr {
                if let Err(e) = stderr.read_to_end(&mut buf).await {
                    debug!("Stopped reading {} errors for {}: {}", op, image, e);
                }
            }
            buf
        };
        let ((), stderr) = tokio::join!(report, collect_stderr);
        progress.finish();

        let status = child
            .wait()
            .await
            .map_err(|e| self.command_error(args, e.to_string()))?;

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr);
            if op == TransferOp::Pull && stderr.contains("repository does not exist") {
                return Err(SyncError::ImageNotFound {
                    image: image.to_string(),
                });
            }
            return Err(self.command_error(args, stderr.trim()));
        }

        Ok(())
    }

    async fn login(&self, server: &str, creds: &Credentials) -> Result<()> {
        let args = [
            "login",
            server,
            "--username",
            creds.username.as_str(),
            "--password-stdin",
        ];
        let mut child = AsyncCommand::new(&self.binary)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.command_error(&args[..2], e.to_string()))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(creds.password.as_bytes())
                .await
                .map_err(|e| self.command_error(&args[..2], e.to_string()))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| self.command_error(&args[..2], e.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(self.command_error(&args[..2], stderr.trim()));
        }
        Ok(())
    }
}

#[async_trait]
impl RegistryClient for DockerCli {
    async fn pull(
        &self,
        image: &str,
        auth: Option<&Credentials>,
        display: &dyn TransferDisplay,
        cancel: &CancellationToken,
    ) -> Result<()> {
        checkpoint(cancel)?;
        if let Some(creds) = auth {
            self.login(registry_host(image), creds).await?;
        }
        self.stream(&["pull", image], TransferOp::Pull, image, display)
            .await
    }

    async fn tag(&self, source: &str, target: &str, cancel: &CancellationToken) -> Result<()> {
        checkpoint(cancel)?;
        self.run(&["tag", source, target]).await.map(|_| ())
    }

    async fn push(
        &self,
        image: &str,
        registry: &str,
        auth: Option<&Credentials>,
        display: &dyn TransferDisplay,
        cancel: &CancellationToken,
    ) -> Result<()> {
        checkpoint(cancel)?;
        if let Some(creds) = auth {
            self.login(registry, creds).await?;
        }
        self.stream(&["push", image], TransferOp::Push, image, display)
            .await
    }

    async fn remove(&self, image: &str, cancel: &CancellationToken) -> Result<()> {
        checkpoint(cancel)?;
        let id = self
            .run(&["image", "inspect", "--format", "{{.Id}}", image])
            .await?;
        let id = id.trim();
        if id.is_empty() {
            return Err(SyncError::ImageNotFound {
                image: image.to_string(),
            });
        }
        self.run(&["image", "rm", "--force", id]).await.map(|_| ())
    }
}
