//! voxrun-core: Core types for the voxrun job runner
//!
//! This crate provides the fundamental types used throughout voxrun:
//! - Job descriptors, bindings and caller inputs
//! - Run state machine
//! - Configuration types
//! - Error handling

pub mod config;
pub mod error;
pub mod job;
pub mod run;

pub use config::*;
pub use error::*;
pub use job::*;
pub use run::*;
