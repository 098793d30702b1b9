//! voxrun-store: On-disk side of a run
//!
//! This crate provides the file handling around a container run:
//! - Staging layout, input volumes and runtime configuration files
//! - Materialization of output files into typed results
//! - The local catalog of model manifests

pub mod catalog;
pub mod materializer;
pub mod staging;

pub use catalog::{ModelCatalog, ModelManifest};
pub use materializer::{
    BindingResult, MaterializedOutputs, MaterializedResult, Materializer, Point, Segment,
    VolumeResult, DEFAULT_CLASS_THRESHOLD,
};
pub use staging::{StagingLayout, DIAGNOSIS_CONFIG_FILE, RUNTIME_CONFIG_FILE, VOLUME_EXTENSION};
