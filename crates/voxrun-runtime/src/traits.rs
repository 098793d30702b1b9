//! Gateway trait definitions

use async_trait::async_trait;
use std::path::Path;
use voxrun_core::VoxrunResult;

/// Gateway to a container runtime's command-line interface
#[async_trait]
pub trait ContainerGateway: Send + Sync {
    /// Check that the runtime daemon answers a status query
    ///
    /// Failing to launch the runtime binary is a configuration error and is
    /// returned as `RuntimeUnavailable`.
    async fn is_daemon_available(&self) -> VoxrunResult<bool>;

    /// Make sure an image is present locally, pulling it at most once
    ///
    /// `Ok(false)` means the image is still absent after the pull attempt.
    async fn ensure_image_present(&self, image: &str) -> VoxrunResult<bool>;

    /// Launch a run; `argv[0]` is the program
    async fn start_run(&self, argv: &[String]) -> VoxrunResult<Box<dyn ProcessHandle>>;

    /// First line of the runtime's version banner
    async fn runtime_version(&self) -> VoxrunResult<String>;

    /// Path of the runtime executable, used as `argv[0]` of runs
    fn executable(&self) -> &Path;

    /// Get the gateway name
    fn name(&self) -> &'static str;
}

/// A launched container run
#[async_trait]
pub trait ProcessHandle: Send {
    /// Next output line, `None` at end of stream
    async fn read_line(&mut self) -> VoxrunResult<Option<String>>;

    /// Forcibly terminate the process
    async fn cancel(&mut self) -> VoxrunResult<()>;

    /// Wait for the process to exit
    async fn wait(&mut self) -> VoxrunResult<RunExit>;
}

/// Exit status of a finished run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunExit {
    /// Exit code, `None` when terminated by a signal
    pub code: Option<i32>,
}

impl RunExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for RunExit {
    fn from(status: std::process::ExitStatus) -> Self {
        Self {
            code: status.code(),
        }
    }
}
