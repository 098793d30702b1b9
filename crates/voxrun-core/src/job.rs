//! Job descriptor, binding and input type definitions

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Component, Path, PathBuf};

use crate::{VoxrunError, VoxrunResult};

/// Describes one inference request against a container image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    /// Container image reference (e.g., "sintef/lungs:v1")
    pub image_reference: String,
    /// Sub-model inside the image
    #[serde(default)]
    pub model_name: Option<String>,
    /// Command-line verb passed to the container
    pub task_kind: TaskKind,
    /// Target organ, selects the diagnosis sub-task
    #[serde(default)]
    pub organ: Option<Organ>,
    /// GPU pass-through
    #[serde(default)]
    pub use_accelerator: bool,
    /// Ordered input/output/parameter slots
    #[serde(default)]
    pub bindings: Vec<Binding>,
}

impl JobDescriptor {
    /// Create a descriptor with no bindings
    pub fn new(image_reference: impl Into<String>, task_kind: TaskKind) -> Self {
        Self {
            image_reference: image_reference.into(),
            model_name: None,
            task_kind,
            organ: None,
            use_accelerator: false,
            bindings: Vec::new(),
        }
    }

    pub fn with_model(mut self, model_name: impl Into<String>) -> Self {
        self.model_name = Some(model_name.into());
        self
    }

    pub fn with_organ(mut self, organ: Organ) -> Self {
        self.organ = Some(organ);
        self
    }

    pub fn with_accelerator(mut self, enabled: bool) -> Self {
        self.use_accelerator = enabled;
        self
    }

    pub fn with_binding(mut self, binding: Binding) -> Self {
        self.bindings.push(binding);
        self
    }

    /// Load a descriptor from a TOML file
    pub fn from_file(path: &Path) -> VoxrunResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            VoxrunError::Config(format!("Failed to read job file {}: {}", path.display(), e))
        })?;
        let job: JobDescriptor = toml::from_str(&content)?;
        job.validate()?;
        Ok(job)
    }

    /// Check the descriptor invariants
    ///
    /// Binding names must be non-empty and unique. Outputs must be of a kind
    /// that can be read back, inputs of a kind that can be staged.
    pub fn validate(&self) -> VoxrunResult<()> {
        if self.image_reference.trim().is_empty() {
            return Err(VoxrunError::InvalidDescriptor(
                "image reference is empty".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for binding in &self.bindings {
            if binding.name.trim().is_empty() {
                return Err(VoxrunError::InvalidDescriptor(
                    "binding name is empty".to_string(),
                ));
            }
            if !is_file_stem(&binding.name) {
                return Err(VoxrunError::InvalidDescriptor(format!(
                    "binding name '{}' must be a plain file name",
                    binding.name
                )));
            }
            if !seen.insert(binding.name.as_str()) {
                return Err(VoxrunError::InvalidDescriptor(format!(
                    "duplicate binding name '{}'",
                    binding.name
                )));
            }
            match binding.direction {
                Direction::Input
                    if !matches!(binding.kind, BindingKind::Volume | BindingKind::Configuration) =>
                {
                    return Err(VoxrunError::InvalidDescriptor(format!(
                        "input '{}' has unsupported kind {}",
                        binding.name, binding.kind
                    )));
                }
                Direction::Output if !binding.kind.is_materializable() => {
                    return Err(VoxrunError::InvalidDescriptor(format!(
                        "output '{}' has unsupported kind {}",
                        binding.name, binding.kind
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Look up a binding by name
    pub fn binding(&self, name: &str) -> Option<&Binding> {
        self.bindings.iter().find(|b| b.name == name)
    }

    /// Input bindings, in declaration order
    pub fn inputs(&self) -> impl Iterator<Item = &Binding> {
        self.bindings
            .iter()
            .filter(|b| b.direction == Direction::Input)
    }

    /// Output bindings, in declaration order
    pub fn outputs(&self) -> impl Iterator<Item = &Binding> {
        self.bindings
            .iter()
            .filter(|b| b.direction == Direction::Output)
    }

    /// Parameter bindings, in declaration order
    pub fn parameters(&self) -> impl Iterator<Item = &Binding> {
        self.bindings
            .iter()
            .filter(|b| b.direction == Direction::Parameter)
    }

    /// Whether the job carries a runtime configuration input
    pub fn has_configuration(&self) -> bool {
        self.inputs().any(|b| b.kind == BindingKind::Configuration)
    }
}

/// A named slot of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    /// Logical item name, also the file name stem on disk
    pub name: String,
    /// Input, output or parameter
    pub direction: Direction,
    /// Declared kind
    pub kind: BindingKind,
    /// Display hints for outputs
    #[serde(default)]
    pub display: Option<DisplayMetadata>,
}

impl Binding {
    pub fn input(name: impl Into<String>, kind: BindingKind) -> Self {
        Self::new(name, Direction::Input, kind)
    }

    pub fn output(name: impl Into<String>, kind: BindingKind) -> Self {
        Self::new(name, Direction::Output, kind)
    }

    pub fn parameter(name: impl Into<String>, kind: BindingKind) -> Self {
        Self::new(name, Direction::Parameter, kind)
    }

    fn new(name: impl Into<String>, direction: Direction, kind: BindingKind) -> Self {
        Self {
            name: name.into(),
            direction,
            kind,
            display: None,
        }
    }

    pub fn with_display(mut self, display: DisplayMetadata) -> Self {
        self.display = Some(display);
        self
    }

    /// Whether a `<name>_description.csv` sidecar is expected
    pub fn wants_description(&self) -> bool {
        self.display.as_ref().map_or(false, |d| d.description)
    }
}

/// Binding direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Input,
    Output,
    Parameter,
}

/// Binding kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingKind {
    Volume,
    Configuration,
    PointSet,
    Text,
    Scalar,
}

impl BindingKind {
    /// Kinds the materializer knows how to read back
    pub fn is_materializable(&self) -> bool {
        matches!(
            self,
            BindingKind::Volume | BindingKind::PointSet | BindingKind::Text
        )
    }
}

impl std::fmt::Display for BindingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BindingKind::Volume => write!(f, "volume"),
            BindingKind::Configuration => write!(f, "configuration"),
            BindingKind::PointSet => write!(f, "point_set"),
            BindingKind::Text => write!(f, "text"),
            BindingKind::Scalar => write!(f, "scalar"),
        }
    }
}

/// Output display hints
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisplayMetadata {
    /// RGB color, 0-255 per channel
    #[serde(default)]
    pub color: Option<[u8; 3]>,
    /// Per-label names are shipped in a description sidecar
    #[serde(default)]
    pub description: bool,
}

/// Task verb understood by the container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Segmentation,
    Diagnosis,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Segmentation => "segmentation",
            TaskKind::Diagnosis => "diagnosis",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskKind {
    type Err = VoxrunError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "segmentation" => Ok(TaskKind::Segmentation),
            "diagnosis" => Ok(TaskKind::Diagnosis),
            other => Err(VoxrunError::InvalidDescriptor(format!(
                "unknown task kind '{}'",
                other
            ))),
        }
    }
}

/// Anatomical target of a diagnosis job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Organ {
    Brain,
    Mediastinum,
}

impl Organ {
    /// Value of `task` in the diagnosis config
    pub fn diagnosis_task(&self) -> &'static str {
        match self {
            Organ::Brain => "neuro_diagnosis",
            Organ::Mediastinum => "mediastinum_diagnosis",
        }
    }
}

/// Caller-supplied data for the input and parameter bindings of a job
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobInputs {
    /// Source files for volume inputs, by binding name
    pub volumes: BTreeMap<String, PathBuf>,
    /// Parameter values, by binding name
    pub parameters: BTreeMap<String, String>,
}

impl JobInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_volume(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.volumes.insert(name.into(), path.into());
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    /// Check that the inputs cover the descriptor's volume inputs and name
    /// only declared bindings
    pub fn check_against(&self, job: &JobDescriptor) -> VoxrunResult<()> {
        for binding in job.inputs().filter(|b| b.kind == BindingKind::Volume) {
            if !self.volumes.contains_key(&binding.name) {
                return Err(VoxrunError::InvalidDescriptor(format!(
                    "no source file for input volume '{}'",
                    binding.name
                )));
            }
        }
        for name in self.volumes.keys() {
            match job.binding(name) {
                Some(b) if b.direction == Direction::Input && b.kind == BindingKind::Volume => {}
                _ => {
                    return Err(VoxrunError::InvalidDescriptor(format!(
                        "'{}' is not an input volume of this job",
                        name
                    )))
                }
            }
        }
        for name in self.parameters.keys() {
            match job.binding(name) {
                Some(b) if b.direction == Direction::Parameter => {}
                _ => {
                    return Err(VoxrunError::InvalidDescriptor(format!(
                        "'{}' is not a parameter of this job",
                        name
                    )))
                }
            }
        }
        Ok(())
    }
}

/// Binding names become staged and output file names
fn is_file_stem(name: &str) -> bool {
    if name.contains(|c: char| c == '/' || c == '\\') {
        return false;
    }
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lung_job() -> JobDescriptor {
        JobDescriptor::new("demo:latest", TaskKind::Segmentation)
            .with_binding(Binding::input("InputVolume", BindingKind::Volume))
            .with_binding(Binding::output("OutputLabel", BindingKind::Volume))
    }

    #[test]
    fn test_descriptor_new() {
        let job = lung_job();
        assert_eq!(job.image_reference, "demo:latest");
        assert_eq!(job.task_kind, TaskKind::Segmentation);
        assert!(!job.use_accelerator);
        assert_eq!(job.inputs().count(), 1);
        assert_eq!(job.outputs().count(), 1);
        assert!(job.validate().is_ok());
    }

    #[test]
    fn test_duplicate_binding_rejected() {
        let job = lung_job().with_binding(Binding::output("OutputLabel", BindingKind::Text));
        let err = job.validate().unwrap_err();
        assert!(matches!(err, VoxrunError::InvalidDescriptor(_)));
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_unsupported_kinds_rejected() {
        let job = lung_job().with_binding(Binding::output("Threshold", BindingKind::Scalar));
        assert!(job.validate().is_err());

        let job = lung_job().with_binding(Binding::input("Notes", BindingKind::Text));
        assert!(job.validate().is_err());

        let job = lung_job().with_binding(Binding::parameter("Threshold", BindingKind::Scalar));
        assert!(job.validate().is_ok());
    }

    #[test]
    fn test_path_like_binding_names_rejected() {
        for name in ["../../../escaped", "data/InputVolume", "..\\Input", "..", "."] {
            let job = lung_job().with_binding(Binding::input(name, BindingKind::Volume));
            let err = job.validate().unwrap_err();
            assert!(
                matches!(err, VoxrunError::InvalidDescriptor(_)),
                "{} accepted",
                name
            );
        }

        let job = lung_job().with_binding(Binding::output("Lung.lobes-v2", BindingKind::Text));
        assert!(job.validate().is_ok());
    }

    #[test]
    fn test_empty_image_rejected() {
        let job = JobDescriptor::new("  ", TaskKind::Diagnosis);
        assert!(job.validate().is_err());
    }

    #[test]
    fn test_descriptor_parse() {
        let toml_str = r#"
image_reference = "sintef/mediastinum:latest"
model_name = "CT_Lungs"
task_kind = "diagnosis"
organ = "mediastinum"
use_accelerator = true

[[bindings]]
name = "InputVolume"
direction = "input"
kind = "volume"

[[bindings]]
name = "Config"
direction = "input"
kind = "configuration"

[[bindings]]
name = "OutputLabel"
direction = "output"
kind = "volume"
display = { color = [255, 0, 0], description = true }

[[bindings]]
name = "Report"
direction = "output"
kind = "text"
"#;
        let job: JobDescriptor = toml::from_str(toml_str).unwrap();
        assert_eq!(job.model_name.as_deref(), Some("CT_Lungs"));
        assert_eq!(job.organ, Some(Organ::Mediastinum));
        assert!(job.has_configuration());
        let label = job.binding("OutputLabel").unwrap();
        assert!(label.wants_description());
        assert_eq!(label.display.as_ref().unwrap().color, Some([255, 0, 0]));
        assert_eq!(job.binding("Report").unwrap().kind, BindingKind::Text);
        assert!(job.validate().is_ok());
    }

    #[test]
    fn test_task_kind_from_str() {
        assert_eq!("Segmentation".parse::<TaskKind>().unwrap(), TaskKind::Segmentation);
        assert_eq!("diagnosis".parse::<TaskKind>().unwrap(), TaskKind::Diagnosis);
        assert!("parsing".parse::<TaskKind>().is_err());
    }

    #[test]
    fn test_organ_diagnosis_task() {
        assert_eq!(Organ::Brain.diagnosis_task(), "neuro_diagnosis");
        assert_eq!(Organ::Mediastinum.diagnosis_task(), "mediastinum_diagnosis");
    }

    #[test]
    fn test_inputs_check() {
        let job = lung_job().with_binding(Binding::parameter("Threshold", BindingKind::Scalar));

        let inputs = JobInputs::new()
            .with_volume("InputVolume", "/tmp/ct.nii.gz")
            .with_parameter("Threshold", "0.5");
        assert!(inputs.check_against(&job).is_ok());

        let missing = JobInputs::new();
        assert!(missing.check_against(&job).is_err());

        let unknown = JobInputs::new()
            .with_volume("InputVolume", "/tmp/ct.nii.gz")
            .with_volume("OutputLabel", "/tmp/out.nii.gz");
        assert!(unknown.check_against(&job).is_err());
    }
}
