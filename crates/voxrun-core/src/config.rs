//! Configuration types for voxrun

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::TaskKind;

/// Main configuration, passed explicitly to the gateway and the runner
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoxrunConfig {
    /// Container runtime configuration
    pub runtime: RuntimeConfig,
    /// Host staging directory configuration
    pub staging: StagingConfig,
    /// Mount points inside the container
    pub container: ContainerConfig,
    /// Options written to `runtime_config.ini`
    pub predictions: PredictionsConfig,
    /// Job runner configuration
    pub runner: RunnerConfig,
    /// Model catalog configuration
    pub catalog: CatalogConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl VoxrunConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, crate::VoxrunError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::VoxrunError::Config(format!("Failed to read config file: {}", e))
        })?;
        toml::from_str(&content)
            .map_err(|e| crate::VoxrunError::Config(format!("Failed to parse config: {}", e)))
    }
}

/// Container runtime configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Path to the runtime executable
    pub executable: PathBuf,
    /// First token of the `ps` header, proves the daemon answered
    pub status_header: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            executable: default_runtime_executable(),
            status_header: "CONTAINER".to_string(),
        }
    }
}

/// Platform default for the docker executable.
///
/// `nvidia-docker` next to it wins when installed; GPU use still depends on the
/// image supporting it.
pub fn default_runtime_executable() -> PathBuf {
    let docker = if cfg!(target_os = "macos") {
        PathBuf::from("/usr/local/bin/docker")
    } else if cfg!(windows) {
        PathBuf::from("C:/Program Files/Docker/Docker/resources/bin/docker.exe")
    } else {
        PathBuf::from("/usr/bin/docker")
    };

    let nvidia = docker.with_file_name("nvidia-docker");
    if nvidia.is_file() {
        nvidia
    } else {
        docker
    }
}

/// Host staging directory configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagingConfig {
    /// Directory mounted into the container; holds `data/` and `output/`
    pub root: PathBuf,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            root: voxrun_home().join("resources"),
        }
    }
}

/// Mount points inside the container, per task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    pub segmentation_root: String,
    pub diagnosis_root: String,
}

impl ContainerConfig {
    /// Container-side directory the staging root is mounted on
    pub fn root_for(&self, task: TaskKind) -> &str {
        match task {
            TaskKind::Segmentation => &self.segmentation_root,
            TaskKind::Diagnosis => &self.diagnosis_root,
        }
    }
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            segmentation_root: "/home/ubuntu/resources".to_string(),
            diagnosis_root: "/home/ubuntu/sintef-segmenter/resources".to_string(),
        }
    }
}

/// Prediction options sent to the container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionsConfig {
    /// Keep at most one label per voxel
    pub non_overlapping: bool,
    pub reconstruction_method: ReconstructionMethod,
    pub reconstruction_order: ReconstructionOrder,
    /// Pre-computed brain mask hint
    pub brain_segmentation_filename: String,
    /// Pre-computed lungs mask hint
    pub lungs_segmentation_filename: String,
    /// Ask the diagnosis pipeline to keep intermediate files
    pub trace: bool,
}

impl Default for PredictionsConfig {
    fn default() -> Self {
        Self {
            non_overlapping: true,
            reconstruction_method: ReconstructionMethod::Probabilities,
            reconstruction_order: ReconstructionOrder::ResampleFirst,
            brain_segmentation_filename: String::new(),
            lungs_segmentation_filename: String::new(),
            trace: false,
        }
    }
}

/// How predictions are turned into labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconstructionMethod {
    Probabilities,
    Thresholding,
}

impl ReconstructionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconstructionMethod::Probabilities => "probabilities",
            ReconstructionMethod::Thresholding => "thresholding",
        }
    }
}

/// Whether resampling happens before or after reconstruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconstructionOrder {
    ResampleFirst,
    ResampleSecond,
}

impl ReconstructionOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconstructionOrder::ResampleFirst => "resample_first",
            ReconstructionOrder::ResampleSecond => "resample_second",
        }
    }
}

/// Job runner configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Synthetic progress added per container output line
    pub progress_step: f64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            progress_step: 0.15,
        }
    }
}

/// Model catalog configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Directory of JSON model manifests
    pub models_dir: PathBuf,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            models_dir: voxrun_home().join("json").join("local"),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format (json or text)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// `~/.voxrun`, or `./.voxrun` when no home directory is known
pub fn voxrun_home() -> PathBuf {
    home::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".voxrun")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = VoxrunConfig::default();
        assert_eq!(config.runtime.status_header, "CONTAINER");
        assert_eq!(config.runner.progress_step, 0.15);
        assert!(config.predictions.non_overlapping);
        assert_eq!(
            config.predictions.reconstruction_method,
            ReconstructionMethod::Probabilities
        );
        assert!(config.staging.root.ends_with(".voxrun/resources"));
    }

    #[test]
    fn test_container_root_per_task() {
        let container = ContainerConfig::default();
        assert_eq!(
            container.root_for(TaskKind::Segmentation),
            "/home/ubuntu/resources"
        );
        assert_eq!(
            container.root_for(TaskKind::Diagnosis),
            "/home/ubuntu/sintef-segmenter/resources"
        );
    }

    #[test]
    fn test_config_parse_partial() {
        let toml_str = r#"
[runtime]
executable = "/opt/docker/bin/docker"

[staging]
root = "/srv/voxrun"

[predictions]
reconstruction_method = "thresholding"
reconstruction_order = "resample_second"

[runner]
progress_step = 1.0
"#;
        let config: VoxrunConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(
            config.runtime.executable,
            PathBuf::from("/opt/docker/bin/docker")
        );
        assert_eq!(config.runtime.status_header, "CONTAINER");
        assert_eq!(config.staging.root, PathBuf::from("/srv/voxrun"));
        assert_eq!(
            config.predictions.reconstruction_order,
            ReconstructionOrder::ResampleSecond
        );
        assert!(config.predictions.non_overlapping);
        assert_eq!(config.runner.progress_step, 1.0);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("voxrun.toml");
        std::fs::write(&path, "[logging]\nlevel = \"debug\"\n").unwrap();

        let config = VoxrunConfig::from_file(&path).unwrap();
        assert_eq!(config.logging.level, "debug");

        let missing = VoxrunConfig::from_file(&dir.path().join("absent.toml"));
        assert!(missing.is_err());
    }
}
