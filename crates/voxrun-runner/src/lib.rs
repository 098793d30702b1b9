//! voxrun-runner: Job execution for voxrun
//!
//! This crate drives one container job at a time:
//! - Argument construction for the container run
//! - The run state machine and its background worker
//! - Progress and log observers

pub mod invocation;
pub mod observer;
pub mod runner;

pub use invocation::build_invocation;
pub use observer::{NoopObserver, ProgressCounter, RunObserver, TracingObserver};
pub use runner::{JobRunner, RunHandle, RunOutcome, RunReport};
