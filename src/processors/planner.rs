//! Output path planning.
//!
//! Maps every source file of a manifest to its target in the BrainVoyager
//! tree:
//!
//! ```text
//! <out>/sub-XX/anat/*.vmr, *.srf
//! <out>/sub-XX[/ses-YY]/*.vtc, *.mtc, *.sdm
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use thiserror::Error;

use crate::core::paths::{self, file_name, replace_marker, session_token, strip_known_suffix, PathError};

use super::classify::FileCategory;
use super::manifest::SubjectManifest;

const NIFTI_SUFFIXES: &[&str] = &[".nii.gz", ".nii"];
const SURFACE_MARKER: &str = ".surf.gii";
const FUNC_SURFACE_MARKER: &str = ".func.gii";
const CONFOUNDS_SUFFIXES: &[&str] = &[".tsv"];

/// Name of the anatomical output directory.
pub const ANAT_DIR: &str = "anat";

/// Errors that can occur while planning or creating the output tree.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error(transparent)]
    Path(#[from] PathError),

    #[error("Failed to create output directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, PlanError>;

/// Target paths for one subject, mirroring its manifest.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TargetPlan {
    targets: BTreeMap<FileCategory, Vec<PathBuf>>,
    directories: BTreeSet<PathBuf>,
}

impl TargetPlan {
    /// Targets of `category`, in the same order as the manifest's sources.
    pub fn targets(&self, category: FileCategory) -> &[PathBuf] {
        self.targets.get(&category).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Distinct directories the targets live in.
    pub fn directories(&self) -> &BTreeSet<PathBuf> {
        &self.directories
    }
}

/// Derives target names and directories under an output root.
#[derive(Debug, Clone)]
pub struct OutputPathPlanner {
    output_root: PathBuf,
}

impl OutputPathPlanner {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
        }
    }

    /// Default output root: a sibling of `pipeline_root` called `dir_name`.
    pub fn sibling_of(pipeline_root: &Path, dir_name: &str) -> Self {
        let parent = pipeline_root.parent().unwrap_or(Path::new(""));
        Self::new(parent.join(dir_name))
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Builds the target plan for `manifest`. Touches no files.
    pub fn plan(&self, manifest: &SubjectManifest) -> Result<TargetPlan> {
        let subject_dir = self.output_root.join(&manifest.subject);
        let mut plan = TargetPlan::default();

        for category in FileCategory::CONVERTIBLE {
            let sources = manifest.files(category);
            let mut targets = Vec::with_capacity(sources.len());
            for source in sources {
                let name = file_name(&source.path)?;
                let dir = target_dir(&subject_dir, category, name);
                let target = dir.join(target_name(category, name)?);
                plan.directories.insert(dir);
                targets.push(target);
            }
            plan.targets.insert(category, targets);
        }

        Ok(plan)
    }

    /// Creates every directory in `plan`; existing directories are fine.
    pub fn create_directories(&self, plan: &TargetPlan) -> Result<()> {
        for dir in plan.directories() {
            fs::create_dir_all(dir).map_err(|source| PlanError::CreateDirectory {
                path: dir.clone(),
                source,
            })?;
            debug!("Ensured directory {}", dir.display());
        }
        Ok(())
    }
}

fn target_dir(subject_dir: &Path, category: FileCategory, name: &str) -> PathBuf {
    if !category.is_functional() {
        return subject_dir.join(ANAT_DIR);
    }
    match session_token(name) {
        Some(session) => subject_dir.join(session),
        None => subject_dir.to_path_buf(),
    }
}

/// Target file name for a source file name of the given category.
pub fn target_name(category: FileCategory, name: &str) -> paths::Result<String> {
    Ok(match category {
        FileCategory::Anatomical => format!("{}.vmr", strip_known_suffix(name, NIFTI_SUFFIXES)?),
        FileCategory::Surface => replace_marker(name, SURFACE_MARKER, ".srf")?,
        FileCategory::VolumeTimeseries => {
            format!("{}.vtc", strip_known_suffix(name, NIFTI_SUFFIXES)?)
        }
        FileCategory::SurfaceTimeseries => replace_marker(name, FUNC_SURFACE_MARKER, ".mtc")?,
        FileCategory::Confounds => {
            format!("{}.sdm", strip_known_suffix(name, CONFOUNDS_SUFFIXES)?)
        }
        FileCategory::SurfaceToAnatTransform => name.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::classify::FileClassifier;
    use crate::processors::manifest::tests::touch;
    use crate::processors::manifest::ManifestBuilder;
    use tempfile::tempdir;

    fn manifest_for(root: &Path, rel: &[&str]) -> SubjectManifest {
        let sub = root.join("fmriprep/sub-01");
        for r in rel {
            touch(&sub, r);
        }
        ManifestBuilder::new(FileClassifier::new().unwrap())
            .build_subject(&sub)
            .unwrap()
    }

    #[test]
    fn test_target_names() {
        let cases = [
            (FileCategory::Anatomical, "sub-01_desc-preproc_T1w.nii.gz", "sub-01_desc-preproc_T1w.vmr"),
            (FileCategory::Anatomical, "sub-01_desc-preproc_T1w.nii", "sub-01_desc-preproc_T1w.vmr"),
            (FileCategory::Surface, "sub-01_hemi-L_pial.surf.gii", "sub-01_hemi-L_pial.srf"),
            (
                FileCategory::VolumeTimeseries,
                "sub-01_task-a_desc-preproc_bold.nii.gz",
                "sub-01_task-a_desc-preproc_bold.vtc",
            ),
            (
                FileCategory::SurfaceTimeseries,
                "sub-01_task-a_hemi-R_space-fsnative_bold.func.gii",
                "sub-01_task-a_hemi-R_space-fsnative_bold.mtc",
            ),
            (
                FileCategory::Confounds,
                "sub-01_task-a_desc-confounds_timeseries.tsv",
                "sub-01_task-a_desc-confounds_timeseries.sdm",
            ),
        ];
        for (category, source, expected) in cases {
            assert_eq!(target_name(category, source).unwrap(), expected);
        }
        assert!(target_name(FileCategory::Anatomical, "brain.mgz").is_err());
    }

    #[test]
    fn test_anatomical_scenario() {
        let dir = tempdir().unwrap();
        let manifest = manifest_for(dir.path(), &["anat/sub-01_desc-preproc_T1w.nii.gz"]);
        let planner = OutputPathPlanner::sibling_of(&dir.path().join("fmriprep"), "brainvoyager");
        let plan = planner.plan(&manifest).unwrap();

        let anat_dir = dir.path().join("brainvoyager/sub-01/anat");
        assert_eq!(
            plan.targets(FileCategory::Anatomical),
            &[anat_dir.join("sub-01_desc-preproc_T1w.vmr")]
        );
        assert!(!anat_dir.exists());

        planner.create_directories(&plan).unwrap();
        assert!(anat_dir.is_dir());
        // Second creation is a no-op.
        planner.create_directories(&plan).unwrap();
    }

    #[test]
    fn test_session_nesting() {
        let dir = tempdir().unwrap();
        let manifest = manifest_for(
            dir.path(),
            &[
                "ses-01/func/sub-01_ses-01_task-a_desc-preproc_bold.nii.gz",
                "func/sub-01_task-b_desc-preproc_bold.nii.gz",
                "ses-01/func/sub-01_ses-01_task-a_desc-confounds_timeseries.tsv",
                "ses-01/func/sub-01_ses-01_task-a_hemi-L_space-fsnative_bold.func.gii",
            ],
        );
        let out = dir.path().join("out");
        let plan = OutputPathPlanner::new(&out).plan(&manifest).unwrap();

        let vtc = plan.targets(FileCategory::VolumeTimeseries);
        assert_eq!(vtc.len(), 2);
        assert_eq!(vtc[0], out.join("sub-01/sub-01_task-b_desc-preproc_bold.vtc"));
        assert_eq!(
            vtc[1],
            out.join("sub-01/ses-01/sub-01_ses-01_task-a_desc-preproc_bold.vtc")
        );
        assert_eq!(
            plan.targets(FileCategory::Confounds),
            &[out.join("sub-01/ses-01/sub-01_ses-01_task-a_desc-confounds_timeseries.sdm")]
        );
        assert_eq!(
            plan.targets(FileCategory::SurfaceTimeseries),
            &[out.join("sub-01/ses-01/sub-01_ses-01_task-a_hemi-L_space-fsnative_bold.mtc")]
        );

        let dirs: Vec<_> = plan.directories().iter().cloned().collect();
        assert_eq!(dirs, vec![out.join("sub-01"), out.join("sub-01/ses-01")]);
    }

    #[test]
    fn test_plan_mirrors_manifest_and_is_deterministic() {
        let dir = tempdir().unwrap();
        let manifest = manifest_for(
            dir.path(),
            &[
                "anat/sub-01_desc-preproc_T1w.nii.gz",
                "anat/sub-01_hemi-L_pial.surf.gii",
                "anat/sub-01_hemi-R_white.surf.gii",
                "func/sub-01_task-a_hemi-L_space-fsnative_bold.func.gii",
                "func/sub-01_task-a_desc-confounds_timeseries.tsv",
            ],
        );
        let planner = OutputPathPlanner::new(dir.path().join("out"));
        let first = planner.plan(&manifest).unwrap();
        let second = planner.plan(&manifest).unwrap();
        assert_eq!(first, second);

        for category in FileCategory::CONVERTIBLE {
            assert_eq!(first.targets(category).len(), manifest.files(category).len());
        }
        assert!(first
            .targets(FileCategory::Surface)
            .iter()
            .all(|t| t.parent().unwrap().ends_with("sub-01/anat")));
    }
}
