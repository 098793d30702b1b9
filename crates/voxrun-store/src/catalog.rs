//! Local catalog of model manifests
//!
//! Each model is described by a JSON manifest naming its container image and
//! the bindings it expects, e.g. `~/.voxrun/json/local/CT_Lungs.json`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use voxrun_core::{Binding, JobDescriptor, Organ, TaskKind, VoxrunError, VoxrunResult};

/// Description of a packaged model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelManifest {
    /// Catalog name
    pub name: String,
    /// Container image reference
    pub image: String,
    /// Sub-model inside the image
    #[serde(default)]
    pub model_name: Option<String>,
    pub task: TaskKind,
    #[serde(default)]
    pub organ: Option<Organ>,
    /// Free-text description shown to users
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub bindings: Vec<Binding>,
}

impl ModelManifest {
    /// Build a job descriptor running this model
    pub fn to_descriptor(&self, use_accelerator: bool) -> JobDescriptor {
        JobDescriptor {
            image_reference: self.image.clone(),
            model_name: self.model_name.clone(),
            task_kind: self.task,
            organ: self.organ,
            use_accelerator,
            bindings: self.bindings.clone(),
        }
    }
}

/// Directory of model manifests
pub struct ModelCatalog {
    /// Base path of the manifests
    base_path: PathBuf,
}

impl ModelCatalog {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Manifest path for a model name
    pub fn manifest_path(&self, name: &str) -> PathBuf {
        self.base_path.join(format!("{}.json", name))
    }

    /// List valid manifests, sorted by name
    ///
    /// Unreadable manifests are skipped with a warning.
    pub fn list(&self) -> VoxrunResult<Vec<ModelManifest>> {
        let mut models = Vec::new();

        if !self.base_path.exists() {
            return Ok(models);
        }

        for entry in std::fs::read_dir(&self.base_path)? {
            let path = entry?.path();
            if path.extension().map_or(false, |e| e == "json") {
                match read_manifest(&path) {
                    Ok(manifest) => models.push(manifest),
                    Err(e) => warn!(path = %path.display(), error = %e, "Skipping manifest"),
                }
            }
        }

        models.sort_by(|a, b| a.name.cmp(&b.name));
        debug!(count = models.len(), "Listed model catalog");
        Ok(models)
    }

    /// Load a model by name
    ///
    /// `<name>.json` is tried first, then every manifest's `name` field.
    pub fn load(&self, name: &str) -> VoxrunResult<ModelManifest> {
        self.find(name)?.ok_or_else(|| {
            VoxrunError::Config(format!(
                "model '{}' not found in {}",
                name,
                self.base_path.display()
            ))
        })
    }

    /// Like [`load`](Self::load), but `Ok(None)` when no manifest matches
    ///
    /// A matching manifest that cannot be read is still an error.
    pub fn find(&self, name: &str) -> VoxrunResult<Option<ModelManifest>> {
        let path = self.manifest_path(name);
        if path.is_file() {
            return read_manifest(&path).map(Some);
        }
        Ok(self.list()?.into_iter().find(|m| m.name == name))
    }
}

fn read_manifest(path: &Path) -> VoxrunResult<ModelManifest> {
    let content = std::fs::read_to_string(path)?;
    let manifest: ModelManifest = serde_json::from_str(&content)?;
    manifest.to_descriptor(false).validate()?;
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxrun_core::BindingKind;

    const LUNGS: &str = r#"{
        "name": "CT_Lungs",
        "image": "sintef/lungs:latest",
        "model_name": "CT_Lungs",
        "task": "segmentation",
        "description": "Lung lobes from chest CT",
        "bindings": [
            { "name": "InputVolume", "direction": "input", "kind": "volume" },
            { "name": "OutputLabel", "direction": "output", "kind": "volume",
              "display": { "color": [128, 174, 128], "description": true } }
        ]
    }"#;

    #[test]
    fn test_manifest_path() {
        let catalog = ModelCatalog::new("/home/user/.voxrun/json/local");
        assert_eq!(
            catalog.manifest_path("CT_Lungs"),
            PathBuf::from("/home/user/.voxrun/json/local/CT_Lungs.json")
        );
    }

    #[test]
    fn test_list_and_load() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lungs.json"), LUNGS).unwrap();
        std::fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
        std::fs::write(dir.path().join("notes.md"), "# models").unwrap();

        let catalog = ModelCatalog::new(dir.path());
        let models = catalog.list().unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].name, "CT_Lungs");

        let manifest = catalog.load("CT_Lungs").unwrap();
        let job = manifest.to_descriptor(true);
        assert_eq!(job.image_reference, "sintef/lungs:latest");
        assert!(job.use_accelerator);
        assert_eq!(job.outputs().next().unwrap().kind, BindingKind::Volume);

        assert!(catalog.load("MRI_Brain").is_err());
    }

    #[test]
    fn test_find_separates_missing_from_broken() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("CT_Lungs.json"), LUNGS).unwrap();
        std::fs::write(dir.path().join("MRI_Brain.json"), "{ \"name\": ").unwrap();

        let catalog = ModelCatalog::new(dir.path());
        assert!(catalog.find("CT_Lungs").unwrap().is_some());
        assert!(catalog.find("sintef/lungs:latest").unwrap().is_none());
        assert!(catalog.find("MRI_Brain").is_err());
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let catalog = ModelCatalog::new("/nonexistent/voxrun/models");
        assert!(catalog.list().unwrap().is_empty());
    }
}
