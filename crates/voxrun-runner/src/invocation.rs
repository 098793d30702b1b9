//! Container argument construction

use std::path::Path;
use voxrun_core::{BindingKind, ContainerConfig, JobDescriptor, TaskKind};
use voxrun_store::{StagingLayout, DIAGNOSIS_CONFIG_FILE};

/// Build the full argument vector of a container run
///
/// ```text
/// <runtime> run -t -v <host>:<root> <image> [--Task segmentation]
///     [--Input <root>/data/<name>.nii.gz]... --Output <root>/output/
///     [--Model <name>] [--GPU 0] [--Config <root>/data/diagnosis_config.ini]
/// ```
///
/// The result depends only on the arguments.
pub fn build_invocation(
    job: &JobDescriptor,
    runtime: &Path,
    host_root: &Path,
    container: &ContainerConfig,
) -> Vec<String> {
    let root = container.root_for(job.task_kind).trim_end_matches('/');

    let mut argv = vec![
        runtime.display().to_string(),
        "run".to_string(),
        "-t".to_string(),
        "-v".to_string(),
        format!("{}:{}", host_root.display(), root),
        job.image_reference.clone(),
    ];

    if job.task_kind == TaskKind::Segmentation {
        argv.push("--Task".to_string());
        argv.push(TaskKind::Segmentation.as_str().to_string());
    }

    for binding in job.inputs().filter(|b| b.kind == BindingKind::Volume) {
        argv.push("--Input".to_string());
        argv.push(format!(
            "{}/data/{}",
            root,
            StagingLayout::staged_volume_name(&binding.name)
        ));
    }

    argv.push("--Output".to_string());
    argv.push(format!("{}/output/", root));

    if let Some(model) = &job.model_name {
        argv.push("--Model".to_string());
        argv.push(model.clone());
    }

    if job.use_accelerator {
        argv.push("--GPU".to_string());
        argv.push("0".to_string());
    }

    if job.task_kind == TaskKind::Diagnosis {
        argv.push("--Config".to_string());
        argv.push(format!("{}/data/{}", root, DIAGNOSIS_CONFIG_FILE));
    }

    argv
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxrun_core::{Binding, Organ};

    fn lungs_job() -> JobDescriptor {
        JobDescriptor::new("sintef/lungs:latest", TaskKind::Segmentation)
            .with_binding(Binding::input("InputVolume", BindingKind::Volume))
            .with_binding(Binding::output("OutputLabel", BindingKind::Volume))
    }

    #[test]
    fn test_segmentation_invocation() {
        let container = ContainerConfig::default();
        let argv = build_invocation(
            &lungs_job(),
            Path::new("/usr/bin/docker"),
            Path::new("/home/user/.voxrun/resources"),
            &container,
        );

        let root = container.segmentation_root.trim_end_matches('/');
        let expected: Vec<String> = vec![
            "/usr/bin/docker".to_string(),
            "run".to_string(),
            "-t".to_string(),
            "-v".to_string(),
            format!("/home/user/.voxrun/resources:{}", root),
            "sintef/lungs:latest".to_string(),
            "--Task".to_string(),
            "segmentation".to_string(),
            "--Input".to_string(),
            format!("{}/data/InputVolume.nii.gz", root),
            "--Output".to_string(),
            format!("{}/output/", root),
        ];
        assert_eq!(argv, expected);
    }

    #[test]
    fn test_diagnosis_invocation_with_model_and_gpu() {
        let container = ContainerConfig::default();
        let job = JobDescriptor::new("sintef/neuro:2", TaskKind::Diagnosis)
            .with_model("MRI_Meningioma")
            .with_organ(Organ::Brain)
            .with_accelerator(true)
            .with_binding(Binding::input("T1", BindingKind::Volume))
            .with_binding(Binding::input("Settings", BindingKind::Configuration))
            .with_binding(Binding::input("Flair", BindingKind::Volume))
            .with_binding(Binding::output("Report", BindingKind::Text));

        let argv = build_invocation(
            &job,
            Path::new("docker"),
            Path::new("/srv/staging"),
            &container,
        );
        let root = container.diagnosis_root.trim_end_matches('/');

        assert!(!argv.contains(&"--Task".to_string()));
        let tail: Vec<&str> = argv[6..].iter().map(String::as_str).collect();
        assert_eq!(
            tail,
            vec![
                "--Input",
                &format!("{}/data/T1.nii.gz", root),
                "--Input",
                &format!("{}/data/Flair.nii.gz", root),
                "--Output",
                &format!("{}/output/", root),
                "--Model",
                "MRI_Meningioma",
                "--GPU",
                "0",
                "--Config",
                &format!("{}/data/diagnosis_config.ini", root),
            ]
        );
    }

    #[test]
    fn test_invocation_is_deterministic() {
        let container = ContainerConfig {
            segmentation_root: "/mnt/resources/".to_string(),
            ..ContainerConfig::default()
        };
        let job = lungs_job().with_model("CT_Lungs");
        let first = build_invocation(&job, Path::new("docker"), Path::new("/tmp/a"), &container);
        let second = build_invocation(&job, Path::new("docker"), Path::new("/tmp/a"), &container);
        assert_eq!(first, second);
        assert_eq!(first[4], "/tmp/a:/mnt/resources");
        assert!(first.contains(&"/mnt/resources/output/".to_string()));
    }
}
