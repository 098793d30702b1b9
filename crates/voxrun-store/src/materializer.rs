//! Reading container outputs back into typed results
//!
//! The output directory is listed once, sorted by file name, and each output
//! binding is resolved to the first file whose name contains the binding name
//! and carries an extension of the binding's kind. Failures are recorded per
//! binding; one unreadable output never discards the others.

use ndarray::ArrayD;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use voxrun_core::{Binding, BindingKind, JobDescriptor, VoxrunError, VoxrunResult};

/// Default per-class threshold for probability volumes
pub const DEFAULT_CLASS_THRESHOLD: f32 = 0.55;

/// Suffix of per-label description sidecars
pub const DESCRIPTION_SUFFIX: &str = "_description.csv";

/// Decoded content of one output binding
#[derive(Debug, Clone)]
pub enum MaterializedResult {
    Volume(VolumeResult),
    PointSet(Vec<Point>),
    Text(String),
}

impl MaterializedResult {
    pub fn as_volume(&self) -> Option<&VolumeResult> {
        match self {
            MaterializedResult::Volume(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_points(&self) -> Option<&[Point]> {
        match self {
            MaterializedResult::PointSet(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            MaterializedResult::Text(t) => Some(t),
            _ => None,
        }
    }
}

/// A decoded output volume
#[derive(Debug, Clone)]
pub struct VolumeResult {
    /// File the volume was read from
    pub path: PathBuf,
    /// Header as written by the container
    pub header: NiftiHeader,
    /// Voxel values, scaled by the header slope/intercept
    pub data: ArrayD<f32>,
    /// Original file bytes, for re-encoding into a host scene unchanged
    pub encoded: Vec<u8>,
    /// Labels present in the volume with their display names
    pub segments: Vec<Segment>,
    /// Display color, normalized to 0..=1
    pub color: Option<[f32; 3]>,
}

impl VolumeResult {
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    /// Binary mask of voxels at or above `threshold`
    pub fn threshold(&self, threshold: f32) -> ArrayD<u8> {
        self.data.mapv(|v| u8::from(v >= threshold))
    }

    /// Display name of a label, if known
    pub fn segment_name(&self, label: u32) -> Option<&str> {
        self.segments
            .iter()
            .find(|s| s.label == label)
            .map(|s| s.name.as_str())
    }
}

/// One labelled region of a label volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub label: u32,
    pub name: String,
}

/// A point of a markups point set
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub label: String,
    pub position: [f64; 3],
}

/// Materialization outcome of a single output binding
#[derive(Debug)]
pub struct BindingResult {
    pub name: String,
    pub kind: BindingKind,
    pub result: VoxrunResult<MaterializedResult>,
}

impl BindingResult {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Results of all output bindings, in declaration order
#[derive(Debug, Default)]
pub struct MaterializedOutputs {
    pub entries: Vec<BindingResult>,
}

impl MaterializedOutputs {
    pub fn get(&self, name: &str) -> Option<&BindingResult> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Every output resolved and decoded
    pub fn is_complete(&self) -> bool {
        self.entries.iter().all(BindingResult::is_ok)
    }

    pub fn failures(&self) -> impl Iterator<Item = &BindingResult> {
        self.entries.iter().filter(|e| !e.is_ok())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Reads output files of a finished run
pub struct Materializer {
    output_dir: PathBuf,
}

impl Materializer {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Materialize every output binding of `job`
    pub fn materialize(&self, job: &JobDescriptor) -> MaterializedOutputs {
        let listing = self.snapshot();
        let entries = job
            .outputs()
            .map(|binding| {
                let result = match &listing {
                    Ok(files) => self.materialize_binding(binding, files),
                    Err(reason) => Err(VoxrunError::output(&binding.name, reason)),
                };
                match &result {
                    Ok(_) => debug!(binding = %binding.name, "Materialized output"),
                    Err(e) => warn!(binding = %binding.name, error = %e, "Output unavailable"),
                }
                BindingResult {
                    name: binding.name.clone(),
                    kind: binding.kind,
                    result,
                }
            })
            .collect::<Vec<_>>();

        let outputs = MaterializedOutputs { entries };
        info!(
            outputs = outputs.len(),
            failed = outputs.failures().count(),
            "Materialized run outputs"
        );
        outputs
    }

    /// Sorted file names of the output directory
    fn snapshot(&self) -> Result<Vec<String>, String> {
        let entries = std::fs::read_dir(&self.output_dir).map_err(|e| {
            format!(
                "cannot list output directory {}: {}",
                self.output_dir.display(),
                e
            )
        })?;

        let mut files = Vec::new();
        for entry in entries.flatten() {
            if entry.file_type().map_or(false, |t| t.is_file()) {
                if let Ok(name) = entry.file_name().into_string() {
                    files.push(name);
                }
            }
        }
        files.sort();
        Ok(files)
    }

    fn materialize_binding(
        &self,
        binding: &Binding,
        listing: &[String],
    ) -> VoxrunResult<MaterializedResult> {
        let file = resolve(listing, &binding.name, binding.kind).ok_or_else(|| {
            VoxrunError::output(
                &binding.name,
                format!(
                    "no {} file containing '{}' in {}",
                    binding.kind,
                    binding.name,
                    self.output_dir.display()
                ),
            )
        })?;
        let path = self.output_dir.join(file);

        let decoded = match binding.kind {
            BindingKind::Volume => self.load_volume(binding, &path).map(MaterializedResult::Volume),
            BindingKind::PointSet => load_points(&path).map(MaterializedResult::PointSet),
            BindingKind::Text => std::fs::read_to_string(&path)
                .map(MaterializedResult::Text)
                .map_err(VoxrunError::from),
            other => Err(VoxrunError::Decode(format!("kind {} is not readable", other))),
        };
        decoded.map_err(|e| match e {
            VoxrunError::OutputResolution { .. } => e,
            other => VoxrunError::output(&binding.name, format!("{}: {}", path.display(), other)),
        })
    }

    fn load_volume(&self, binding: &Binding, path: &Path) -> VoxrunResult<VolumeResult> {
        let encoded = std::fs::read(path)?;
        let object = ReaderOptions::new()
            .read_file(path)
            .map_err(|e| VoxrunError::Decode(e.to_string()))?;
        let header = object.header().clone();
        let data = object
            .into_volume()
            .into_ndarray::<f32>()
            .map_err(|e| VoxrunError::Decode(e.to_string()))?;

        let descriptions = if binding.wants_description() {
            let sidecar = self
                .output_dir
                .join(format!("{}{}", binding.name, DESCRIPTION_SUFFIX));
            match load_descriptions(&sidecar) {
                Ok(names) => names,
                Err(e) => {
                    warn!(
                        binding = %binding.name,
                        error = %e,
                        "Segment descriptions unavailable, using default names"
                    );
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };

        let color = binding
            .display
            .as_ref()
            .and_then(|d| d.color)
            .map(|[r, g, b]| [r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0]);

        Ok(VolumeResult {
            path: path.to_path_buf(),
            header,
            segments: segments_for(&data, descriptions),
            data,
            encoded,
            color,
        })
    }
}

/// File extensions accepted for each output kind
fn extensions(kind: BindingKind) -> &'static [&'static str] {
    match kind {
        BindingKind::Volume => &[".nii.gz", ".nii"],
        BindingKind::PointSet => &[".fcsv"],
        BindingKind::Text => &[".txt"],
        BindingKind::Configuration | BindingKind::Scalar => &[],
    }
}

/// First listed file containing `binding` with an extension of `kind`
pub fn resolve<'a>(listing: &'a [String], binding: &str, kind: BindingKind) -> Option<&'a str> {
    let exts = extensions(kind);
    listing
        .iter()
        .map(String::as_str)
        .find(|file| file.contains(binding) && exts.iter().any(|ext| file.ends_with(ext)))
}

#[derive(Debug, Deserialize)]
struct DescriptionRow {
    label: u32,
    text: String,
}

/// Read a `label,text` sidecar
fn load_descriptions(path: &Path) -> VoxrunResult<BTreeMap<u32, String>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| VoxrunError::Decode(e.to_string()))?;

    let mut names = BTreeMap::new();
    for row in reader.deserialize::<DescriptionRow>() {
        let row = row.map_err(|e| VoxrunError::Decode(e.to_string()))?;
        names.insert(row.label, row.text);
    }
    Ok(names)
}

/// Distinct non-zero labels of an integer-valued volume, named from
/// `descriptions` or `Segment_<label>`
fn segments_for(data: &ArrayD<f32>, descriptions: BTreeMap<u32, String>) -> Vec<Segment> {
    let mut labels = BTreeSet::new();
    for &v in data.iter() {
        if v.fract() != 0.0 {
            // probability map, no discrete labels
            labels.clear();
            break;
        }
        if v > 0.0 {
            labels.insert(v as u32);
        }
    }

    let mut names: BTreeMap<u32, String> = labels
        .into_iter()
        .map(|label| (label, format!("Segment_{}", label)))
        .collect();
    names.extend(descriptions);

    names
        .into_iter()
        .map(|(label, name)| Segment { label, name })
        .collect()
}

/// Parse a markups fiducial CSV (`.fcsv`)
///
/// Rows are `id,x,y,z,ow,ox,oy,oz,vis,sel,lock,label,...`; `#` lines are
/// headers. A row without a label column is named after its id.
fn load_points(path: &Path) -> VoxrunResult<Vec<Point>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .comment(Some(b'#'))
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| VoxrunError::Decode(e.to_string()))?;

    let mut points = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record.map_err(|e| VoxrunError::Decode(e.to_string()))?;
        if record.len() < 4 {
            return Err(VoxrunError::Decode(format!(
                "row {} has {} columns, expected at least 4",
                row + 1,
                record.len()
            )));
        }

        let mut position = [0.0f64; 3];
        for (axis, value) in position.iter_mut().enumerate() {
            let field = &record[axis + 1];
            *value = field.parse().map_err(|_| {
                VoxrunError::Decode(format!("row {}: invalid coordinate '{}'", row + 1, field))
            })?;
        }

        let label = record
            .get(11)
            .filter(|l| !l.is_empty())
            .unwrap_or(&record[0])
            .to_string();
        points.push(Point { label, position });
    }
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use voxrun_core::{Binding, DisplayMetadata, TaskKind};

    /// Write a minimal single-file NIfTI-1 volume of `u8` voxels, gzip-compressed
    fn write_label_volume(path: &Path, dims: [u16; 3], voxels: &[u8]) {
        assert_eq!(
            voxels.len(),
            dims.iter().map(|&d| d as usize).product::<usize>()
        );
        let mut header = vec![0u8; 348];
        header[0..4].copy_from_slice(&348i32.to_le_bytes());
        let dim: [i16; 8] = [3, dims[0] as i16, dims[1] as i16, dims[2] as i16, 1, 1, 1, 1];
        for (i, d) in dim.iter().enumerate() {
            header[40 + 2 * i..42 + 2 * i].copy_from_slice(&d.to_le_bytes());
        }
        // datatype DT_UINT8, 8 bits per voxel
        header[70..72].copy_from_slice(&2i16.to_le_bytes());
        header[72..74].copy_from_slice(&8i16.to_le_bytes());
        let pixdim: [f32; 8] = [1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0];
        for (i, p) in pixdim.iter().enumerate() {
            header[76 + 4 * i..80 + 4 * i].copy_from_slice(&p.to_le_bytes());
        }
        header[108..112].copy_from_slice(&352f32.to_le_bytes());
        header[112..116].copy_from_slice(&1f32.to_le_bytes());
        header[344..348].copy_from_slice(b"n+1\0");

        let mut encoder = GzEncoder::new(std::fs::File::create(path).unwrap(), Compression::fast());
        encoder.write_all(&header).unwrap();
        encoder.write_all(&[0u8; 4]).unwrap();
        encoder.write_all(voxels).unwrap();
        encoder.finish().unwrap();
    }

    fn job_with_outputs(outputs: Vec<Binding>) -> JobDescriptor {
        outputs.into_iter().fold(
            JobDescriptor::new("demo:latest", TaskKind::Segmentation)
                .with_binding(Binding::input("InputVolume", BindingKind::Volume)),
            JobDescriptor::with_binding,
        )
    }

    fn listing(names: &[&str]) -> Vec<String> {
        let mut files: Vec<String> = names.iter().map(|s| s.to_string()).collect();
        files.sort();
        files
    }

    #[test]
    fn test_resolve_filters_by_kind() {
        let files = listing(&[
            "OutputLabel_description.csv",
            "OutputLabel.nii.gz",
            "Landmarks.fcsv",
            "Report.txt",
        ]);
        assert_eq!(
            resolve(&files, "OutputLabel", BindingKind::Volume),
            Some("OutputLabel.nii.gz")
        );
        assert_eq!(
            resolve(&files, "Landmarks", BindingKind::PointSet),
            Some("Landmarks.fcsv")
        );
        assert_eq!(resolve(&files, "Report", BindingKind::Text), Some("Report.txt"));
        assert_eq!(resolve(&files, "Report", BindingKind::Volume), None);
    }

    #[test]
    fn test_resolve_first_match_wins() {
        let files = listing(&["Lungs_right.nii.gz", "Lungs.nii.gz", "Lungs_left.nii.gz"]);
        assert_eq!(
            resolve(&files, "Lungs", BindingKind::Volume),
            Some("Lungs.nii.gz")
        );
        // Overlapping names resolve to the earliest listed candidate
        let files = listing(&["input-Tumor-Tumor_core.nii.gz", "input-Tumor.nii.gz"]);
        assert_eq!(
            resolve(&files, "Tumor", BindingKind::Volume),
            Some("input-Tumor-Tumor_core.nii.gz")
        );
    }

    #[test]
    fn test_volume_with_descriptions() {
        let dir = tempfile::tempdir().unwrap();
        let mut voxels = vec![0u8; 8];
        voxels[1] = 1;
        voxels[6] = 2;
        write_label_volume(&dir.path().join("OutputLabel.nii.gz"), [2, 2, 2], &voxels);
        std::fs::write(
            dir.path().join("OutputLabel_description.csv"),
            "label,text\n1,Lobe A\n",
        )
        .unwrap();

        let job = job_with_outputs(vec![Binding::output("OutputLabel", BindingKind::Volume)
            .with_display(DisplayMetadata {
                color: Some([255, 0, 0]),
                description: true,
            })]);
        let outputs = Materializer::new(dir.path()).materialize(&job);
        assert!(outputs.is_complete());

        let entry = outputs.get("OutputLabel").unwrap();
        let volume = entry.result.as_ref().unwrap().as_volume().unwrap();
        assert_eq!(volume.path, dir.path().join("OutputLabel.nii.gz"));
        assert_eq!(volume.shape().iter().product::<usize>(), 8);
        assert_eq!(volume.segment_name(1), Some("Lobe A"));
        assert_eq!(volume.segment_name(2), Some("Segment_2"));
        assert_eq!(volume.color, Some([1.0, 0.0, 0.0]));
        assert!(!volume.encoded.is_empty());

        let mask = volume.threshold(DEFAULT_CLASS_THRESHOLD);
        assert_eq!(mask.iter().filter(|&&v| v == 1).count(), 2);
    }

    #[test]
    fn test_missing_output_reported_per_binding() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Report.txt"), "Tumor volume: 12.3 ml\n").unwrap();

        let job = job_with_outputs(vec![
            Binding::output("OutputLabel", BindingKind::Volume),
            Binding::output("Report", BindingKind::Text),
        ]);
        let outputs = Materializer::new(dir.path()).materialize(&job);
        assert_eq!(outputs.len(), 2);
        assert!(!outputs.is_complete());

        let label = outputs.get("OutputLabel").unwrap();
        assert!(matches!(
            label.result,
            Err(VoxrunError::OutputResolution { ref binding, .. }) if binding == "OutputLabel"
        ));

        let report = outputs.get("Report").unwrap();
        assert_eq!(
            report.result.as_ref().unwrap().as_text(),
            Some("Tumor volume: 12.3 ml\n")
        );
    }

    #[test]
    fn test_corrupt_volume_reported_per_binding() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("OutputLabel.nii.gz"), b"not a volume").unwrap();

        let job = job_with_outputs(vec![Binding::output("OutputLabel", BindingKind::Volume)]);
        let outputs = Materializer::new(dir.path()).materialize(&job);
        assert!(matches!(
            outputs.get("OutputLabel").unwrap().result,
            Err(VoxrunError::OutputResolution { .. })
        ));
    }

    #[test]
    fn test_missing_directory_fails_every_binding() {
        let dir = tempfile::tempdir().unwrap();
        let job = job_with_outputs(vec![
            Binding::output("OutputLabel", BindingKind::Volume),
            Binding::output("Report", BindingKind::Text),
        ]);
        let outputs = Materializer::new(dir.path().join("absent")).materialize(&job);
        assert_eq!(outputs.failures().count(), 2);
    }

    #[test]
    fn test_point_set() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("Landmarks.fcsv"),
            "# Markups fiducial file version = 4.10\n\
             # CoordinateSystem = 0\n\
             # columns = id,x,y,z,ow,ox,oy,oz,vis,sel,lock,label,desc,associatedNodeID\n\
             vtkMRMLMarkupsFiducialNode_0,10.5,-3,42,0,0,0,1,1,1,0,Carina,,\n\
             vtkMRMLMarkupsFiducialNode_1,1,2,3\n",
        )
        .unwrap();

        let job = job_with_outputs(vec![Binding::output("Landmarks", BindingKind::PointSet)]);
        let outputs = Materializer::new(dir.path()).materialize(&job);
        let points = outputs
            .get("Landmarks")
            .unwrap()
            .result
            .as_ref()
            .unwrap()
            .as_points()
            .unwrap()
            .to_vec();
        assert_eq!(
            points,
            vec![
                Point {
                    label: "Carina".to_string(),
                    position: [10.5, -3.0, 42.0],
                },
                Point {
                    label: "vtkMRMLMarkupsFiducialNode_1".to_string(),
                    position: [1.0, 2.0, 3.0],
                },
            ]
        );
    }

    #[test]
    fn test_probability_volume_has_no_segments() {
        let data = ArrayD::from_shape_vec(vec![2, 2], vec![0.1f32, 0.7, 0.0, 0.9]).unwrap();
        assert!(segments_for(&data, BTreeMap::new()).is_empty());

        let labels = ArrayD::from_shape_vec(vec![2, 2], vec![0.0f32, 3.0, 3.0, 1.0]).unwrap();
        let segments = segments_for(&labels, BTreeMap::new());
        assert_eq!(
            segments,
            vec![
                Segment {
                    label: 1,
                    name: "Segment_1".to_string()
                },
                Segment {
                    label: 3,
                    name: "Segment_3".to_string()
                },
            ]
        );
    }
}
