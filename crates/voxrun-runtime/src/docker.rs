//! Docker CLI gateway implementation
//!
//! Drives the `docker` binary as a child process: `ps` for daemon health,
//! `image inspect`/`image pull` for image availability, and `run` for jobs.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use voxrun_core::{RuntimeConfig, VoxrunError, VoxrunResult};

use crate::traits::{ContainerGateway, ProcessHandle, RunExit};

/// Gateway driving the docker command-line client
pub struct DockerCli {
    config: RuntimeConfig,
}

impl DockerCli {
    /// Create a new docker gateway
    pub fn new(config: RuntimeConfig) -> Self {
        Self { config }
    }

    /// Build a runtime command with quiet defaults
    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.config.executable);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::null());
        cmd.kill_on_drop(true);
        cmd
    }

    fn spawn(&self, cmd: &mut Command) -> VoxrunResult<Child> {
        cmd.spawn().map_err(|e| {
            VoxrunError::RuntimeUnavailable(format!(
                "failed to launch {}: {}",
                self.config.executable.display(),
                e
            ))
        })
    }

    /// Run a command and return the first stdout line, if any
    async fn first_line(&self, args: &[&str]) -> VoxrunResult<Option<String>> {
        let mut cmd = self.command();
        cmd.args(args).stdout(Stdio::piped());

        let mut child = self.spawn(&mut cmd)?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| VoxrunError::Internal("failed to capture runtime stdout".to_string()))?;

        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();
        let first = read_lossy_line(&mut reader, &mut buf).await?;
        // Drain so the child never blocks on a full pipe
        while read_lossy_line(&mut reader, &mut buf).await?.is_some() {}
        child.wait().await?;

        Ok(first)
    }

    async fn image_exists(&self, image: &str) -> VoxrunResult<bool> {
        let mut cmd = self.command();
        cmd.args(["image", "inspect", image]);
        let status = self.spawn(&mut cmd)?.wait().await?;
        Ok(status.success())
    }

    async fn pull_image(&self, image: &str) -> VoxrunResult<bool> {
        let mut cmd = self.command();
        cmd.args(["image", "pull", image]).stdout(Stdio::piped());

        let mut child = self.spawn(&mut cmd)?;
        if let Some(stdout) = child.stdout.take() {
            let mut reader = BufReader::new(stdout);
            let mut buf = Vec::new();
            while let Some(line) = read_lossy_line(&mut reader, &mut buf).await? {
                debug!(image = image, "pull: {}", line);
            }
        }
        let status = child.wait().await?;
        Ok(status.success())
    }
}

#[async_trait]
impl ContainerGateway for DockerCli {
    async fn is_daemon_available(&self) -> VoxrunResult<bool> {
        let first = self.first_line(&["ps"]).await?;
        let available = first
            .as_deref()
            .map_or(false, |line| line.starts_with(&self.config.status_header));

        debug!(available = available, "Checked container daemon");
        Ok(available)
    }

    async fn ensure_image_present(&self, image: &str) -> VoxrunResult<bool> {
        if self.image_exists(image).await? {
            debug!(image = image, "Image present locally");
            return Ok(true);
        }

        info!(image = image, "Image not found locally, pulling");
        if !self.pull_image(image).await? {
            warn!(image = image, "Image pull failed");
        }

        let present = self.image_exists(image).await?;
        if !present {
            warn!(image = image, "Image still unavailable after pull");
        }
        Ok(present)
    }

    async fn start_run(&self, argv: &[String]) -> VoxrunResult<Box<dyn ProcessHandle>> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| VoxrunError::Internal("empty argument vector".to_string()))?;

        info!(program = %program, args = ?args, "Starting container run");

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = self.spawn(&mut cmd)?;
        let pid = child.id().unwrap_or(0);

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| VoxrunError::Internal("failed to capture run stdout".to_string()))?;

        // Forward stderr to the log; stdout is the job's progress stream
        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr);
                let mut buf = Vec::new();
                while let Ok(Some(line)) = read_lossy_line(&mut reader, &mut buf).await {
                    warn!(pid = pid, "container stderr: {}", line);
                }
            })
        });

        debug!(pid = pid, "Container process spawned");

        Ok(Box::new(DockerProcess {
            child,
            stdout: BufReader::new(stdout),
            pending: Vec::new(),
            stderr_task,
        }))
    }

    async fn runtime_version(&self) -> VoxrunResult<String> {
        self.first_line(&["--version"]).await?.ok_or_else(|| {
            VoxrunError::RuntimeUnavailable(format!(
                "{} printed no version",
                self.config.executable.display()
            ))
        })
    }

    fn executable(&self) -> &Path {
        &self.config.executable
    }

    fn name(&self) -> &'static str {
        "docker"
    }
}

/// A running `docker run` child process
pub struct DockerProcess {
    child: Child,
    stdout: BufReader<ChildStdout>,
    /// Bytes of the line being read, kept across cancelled reads
    pending: Vec<u8>,
    stderr_task: Option<JoinHandle<()>>,
}

#[async_trait]
impl ProcessHandle for DockerProcess {
    async fn read_line(&mut self) -> VoxrunResult<Option<String>> {
        Ok(read_lossy_line(&mut self.stdout, &mut self.pending).await?)
    }

    async fn cancel(&mut self) -> VoxrunResult<()> {
        debug!("cancellation requested; killing container process");
        if let Err(e) = self.child.kill().await {
            debug!("failed to kill container process: {e}");
        }
        Ok(())
    }

    async fn wait(&mut self) -> VoxrunResult<RunExit> {
        let status = self.child.wait().await?;
        if let Some(task) = self.stderr_task.take() {
            let _ = task.await;
        }
        Ok(RunExit::from(status))
    }
}

/// Read one line, decoding invalid UTF-8 lossily
///
/// `buf` holds the partial line between calls, so a read dropped mid-line
/// loses nothing. A final line without a newline is still returned.
async fn read_lossy_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let read = reader.read_until(b'\n', buf).await?;
    if read == 0 && buf.is_empty() {
        return Ok(None);
    }
    let line = String::from_utf8_lossy(&buf[..])
        // `run -t` allocates a tty, lines come back CRLF-terminated
        .trim_end_matches(|c: char| c == '\n' || c == '\r')
        .to_string();
    buf.clear();
    Ok(Some(line))
}

/// Docker gateway for an explicit executable path, other settings default
pub fn docker_at(executable: impl Into<PathBuf>) -> DockerCli {
    DockerCli::new(RuntimeConfig {
        executable: executable.into(),
        ..RuntimeConfig::default()
    })
}
