//! Host staging directory shared with the container
//!
//! ```text
//! <root>/
//!   data/     staged input volumes, runtime_config.ini, diagnosis_config.ini
//!   output/   written by the container, one file per output binding
//! ```

use flate2::write::GzEncoder;
use flate2::Compression;
use ini::Ini;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use voxrun_core::{PredictionsConfig, VoxrunError, VoxrunResult};

/// Extension of staged input volumes
pub const VOLUME_EXTENSION: &str = ".nii.gz";

pub const RUNTIME_CONFIG_FILE: &str = "runtime_config.ini";
pub const DIAGNOSIS_CONFIG_FILE: &str = "diagnosis_config.ini";

/// Filesystem layout of one staging root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingLayout {
    root: PathBuf,
}

impl StagingLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.join("output")
    }

    pub fn runtime_config_path(&self) -> PathBuf {
        self.data_dir().join(RUNTIME_CONFIG_FILE)
    }

    pub fn diagnosis_config_path(&self) -> PathBuf {
        self.data_dir().join(DIAGNOSIS_CONFIG_FILE)
    }

    /// File name an input volume is staged under
    pub fn staged_volume_name(binding: &str) -> String {
        format!("{}{}", binding, VOLUME_EXTENSION)
    }

    /// Recreate empty `data/` and `output/` directories
    ///
    /// Leftovers of a previous, possibly cancelled, run are removed here.
    pub fn prepare(&self) -> VoxrunResult<()> {
        for dir in [self.data_dir(), self.output_dir()] {
            if dir.exists() {
                fs::remove_dir_all(&dir).map_err(|e| {
                    VoxrunError::Staging(format!("failed to clear {}: {}", dir.display(), e))
                })?;
            }
            fs::create_dir_all(&dir).map_err(|e| {
                VoxrunError::Staging(format!("failed to create {}: {}", dir.display(), e))
            })?;
        }
        debug!(root = %self.root.display(), "Prepared staging directories");
        Ok(())
    }

    /// Copy an input volume to `data/<binding>.nii.gz`
    ///
    /// Uncompressed `.nii` sources are gzip-compressed on the way.
    pub fn stage_volume(&self, binding: &str, source: &Path) -> VoxrunResult<PathBuf> {
        let file_name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                VoxrunError::Staging(format!("invalid input path {}", source.display()))
            })?;
        if !source.is_file() {
            return Err(VoxrunError::Staging(format!(
                "input volume '{}' not found at {}",
                binding,
                source.display()
            )));
        }

        let target = self.data_dir().join(Self::staged_volume_name(binding));
        if file_name.ends_with(VOLUME_EXTENSION) {
            fs::copy(source, &target)?;
        } else if file_name.ends_with(".nii") {
            gzip_file(source, &target)?;
        } else {
            return Err(VoxrunError::Staging(format!(
                "input volume '{}' must be a NIfTI file (.nii or .nii.gz), got {}",
                binding, file_name
            )));
        }

        info!(
            binding = binding,
            source = %source.display(),
            target = %target.display(),
            "Staged input volume"
        );
        Ok(target)
    }

    /// Write `runtime_config.ini` and `diagnosis_config.ini` into `data/`
    pub fn write_configs(
        &self,
        predictions: &PredictionsConfig,
        diagnosis_task: &str,
    ) -> VoxrunResult<()> {
        let mut runtime = Ini::new();
        runtime
            .with_section(Some("Predictions"))
            .set("non_overlapping", bool_str(predictions.non_overlapping))
            .set(
                "reconstruction_method",
                predictions.reconstruction_method.as_str(),
            )
            .set(
                "reconstruction_order",
                predictions.reconstruction_order.as_str(),
            );
        runtime.with_section(Some("Neuro")).set(
            "brain_segmentation_filename",
            predictions.brain_segmentation_filename.as_str(),
        );
        runtime.with_section(Some("Mediastinum")).set(
            "lungs_segmentation_filename",
            predictions.lungs_segmentation_filename.as_str(),
        );
        runtime.write_to_file(self.runtime_config_path())?;

        let mut diagnosis = Ini::new();
        diagnosis
            .with_section(Some("Default"))
            .set("task", diagnosis_task)
            .set("trace", bool_str(predictions.trace))
            .set("from_slicer", "true");
        diagnosis.write_to_file(self.diagnosis_config_path())?;

        debug!(
            runtime = %self.runtime_config_path().display(),
            diagnosis = %self.diagnosis_config_path().display(),
            "Wrote runtime configuration"
        );
        Ok(())
    }
}

fn bool_str(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

fn gzip_file(source: &Path, target: &Path) -> io::Result<()> {
    let mut input = File::open(source)?;
    let mut encoder = GzEncoder::new(File::create(target)?, Compression::default());
    io::copy(&mut input, &mut encoder)?;
    encoder.finish()?;
    Ok(())
}
