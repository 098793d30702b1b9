//! voxrun-runtime: Container runtime gateway
//!
//! This crate wraps the container runtime's command-line interface:
//! - Daemon availability and image presence checks
//! - Image pulls (a single attempt per check)
//! - Launching runs with a line-oriented output stream and cancellation

pub mod docker;
pub mod traits;

pub use docker::{docker_at, DockerCli, DockerProcess};
pub use traits::{ContainerGateway, ProcessHandle, RunExit};
