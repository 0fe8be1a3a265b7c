//! Fixed-order, idempotent conversion of one subject.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::info;

use crate::core::loaders::read_transform;
use crate::core::paths::with_reduction_token;
use crate::core::transforms::Affine;

use super::classify::FileCategory;
use super::converters::Converter;
use super::manifest::SubjectManifest;
use super::planner::TargetPlan;
use super::surface::{MIN_PERCENT, START_PERCENT};

/// Outcome of one category.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryReport {
    /// Paths written, after any renaming by the converter.
    pub converted: Vec<PathBuf>,
    /// Targets left alone because they already existed.
    pub skipped: Vec<PathBuf>,
}

/// Outcome of converting one subject.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversionReport {
    pub subject: String,
    pub categories: BTreeMap<FileCategory, CategoryReport>,
}

impl ConversionReport {
    pub fn converted_count(&self) -> usize {
        self.categories.values().map(|c| c.converted.len()).sum()
    }

    pub fn skipped_count(&self) -> usize {
        self.categories.values().map(|c| c.skipped.len()).sum()
    }

    pub fn category(&self, category: FileCategory) -> Option<&CategoryReport> {
        self.categories.get(&category)
    }
}

/// Runs a [`Converter`] over a subject's manifest and plan.
#[derive(Debug)]
pub struct ConversionOrchestrator<C> {
    converter: C,
    overwrite: bool,
}

impl<C: Converter> ConversionOrchestrator<C> {
    pub fn new(converter: C, overwrite: bool) -> Self {
        Self {
            converter,
            overwrite,
        }
    }

    pub fn converter(&self) -> &C {
        &self.converter
    }

    /// Converts every planned file of `manifest`.
    ///
    /// Categories run in the order of [`FileCategory::CONVERTIBLE`], files in
    /// discovery order. Existing targets are skipped unless overwriting. The
    /// first converter error aborts the subject.
    pub fn run(&self, manifest: &SubjectManifest, plan: &TargetPlan) -> Result<ConversionReport> {
        let mut report = ConversionReport {
            subject: manifest.subject.clone(),
            ..Default::default()
        };

        for category in FileCategory::CONVERTIBLE {
            let sources = manifest.files(category);
            let targets = plan.targets(category);
            let entry = report.categories.entry(category).or_default();

            if sources.is_empty() {
                info!("{}: no {} files", manifest.subject, category);
                continue;
            }
            anyhow::ensure!(
                sources.len() == targets.len(),
                "{}: plan has {} {} targets for {} sources",
                manifest.subject,
                targets.len(),
                category,
                sources.len()
            );

            let transform = if category == FileCategory::Surface {
                self.load_transform(manifest)?
            } else {
                Affine::IDENTITY
            };

            for (source, target) in sources.iter().zip(targets) {
                if !self.overwrite {
                    if let Some(existing) = existing_target(category, target) {
                        info!("Skipping {} (exists)", existing.display());
                        entry.skipped.push(existing);
                        continue;
                    }
                }

                info!("Converting {} -> {}", source.path.display(), target.display());
                let written = self
                    .dispatch(category, target, &source.path, &transform)
                    .with_context(|| {
                        format!(
                            "{}: failed to convert {} file {}",
                            manifest.subject,
                            category,
                            source.path.display()
                        )
                    })?;
                entry.converted.push(written);
            }
        }

        Ok(report)
    }

    fn dispatch(&self, category: FileCategory, target: &Path, source: &Path, transform: &Affine) -> Result<PathBuf> {
        match category {
            FileCategory::Anatomical => self.converter.anatomical(target, source)?,
            FileCategory::Surface => return self.converter.surface(target, source, transform),
            FileCategory::VolumeTimeseries => self.converter.volume_timeseries(target, source)?,
            FileCategory::SurfaceTimeseries => self.converter.surface_timeseries(target, source)?,
            FileCategory::Confounds => self.converter.confounds(target, source)?,
            FileCategory::SurfaceToAnatTransform => {
                anyhow::bail!("transform files are not converted: {}", source.display())
            }
        }
        Ok(target.to_path_buf())
    }

    fn load_transform(&self, manifest: &SubjectManifest) -> Result<Affine> {
        match manifest.transform() {
            Some(file) => {
                let affine = read_transform(&file.path).with_context(|| {
                    format!("{}: failed to read transform {}", manifest.subject, file.path.display())
                })?;
                info!("Using surface transform {}", file.path.display());
                Ok(affine)
            }
            None => Ok(Affine::IDENTITY),
        }
    }
}

/// The file that makes `target` count as done, if any.
///
/// A surface also counts as done when a reduced variant of it exists.
pub fn existing_target(category: FileCategory, target: &Path) -> Option<PathBuf> {
    if target.exists() {
        return Some(target.to_path_buf());
    }
    if category != FileCategory::Surface {
        return None;
    }
    (MIN_PERCENT + 1..=START_PERCENT)
        .rev()
        .filter_map(|percent| with_reduction_token(target, percent).ok())
        .find(|path| path.exists())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::classify::FileClassifier;
    use crate::processors::manifest::tests::touch;
    use crate::processors::manifest::ManifestBuilder;
    use crate::processors::planner::OutputPathPlanner;
    use std::cell::RefCell;
    use std::fs;
    use tempfile::{tempdir, TempDir};

    /// Writes an empty file per call and records what it was asked to do.
    #[derive(Default)]
    struct RecordingConverter {
        calls: RefCell<Vec<(FileCategory, PathBuf)>>,
        transforms: RefCell<Vec<Affine>>,
        /// Reduction percent the surface call pretends to have needed.
        surface_reduction: Option<u32>,
        fail_on: Option<FileCategory>,
    }

    impl RecordingConverter {
        fn record(&self, category: FileCategory, target: &Path) -> Result<PathBuf> {
            if self.fail_on == Some(category) {
                anyhow::bail!("converter failure");
            }
            fs::write(target, b"")?;
            self.calls.borrow_mut().push((category, target.to_path_buf()));
            Ok(target.to_path_buf())
        }
    }

    impl Converter for RecordingConverter {
        fn anatomical(&self, target: &Path, _source: &Path) -> Result<()> {
            self.record(FileCategory::Anatomical, target).map(drop)
        }

        fn surface(&self, target: &Path, _source: &Path, transform: &Affine) -> Result<PathBuf> {
            self.transforms.borrow_mut().push(*transform);
            let target = match self.surface_reduction {
                Some(percent) => with_reduction_token(target, percent)?,
                None => target.to_path_buf(),
            };
            self.record(FileCategory::Surface, &target)
        }

        fn volume_timeseries(&self, target: &Path, _source: &Path) -> Result<()> {
            self.record(FileCategory::VolumeTimeseries, target).map(drop)
        }

        fn surface_timeseries(&self, target: &Path, _source: &Path) -> Result<()> {
            self.record(FileCategory::SurfaceTimeseries, target).map(drop)
        }

        fn confounds(&self, target: &Path, _source: &Path) -> Result<()> {
            self.record(FileCategory::Confounds, target).map(drop)
        }
    }

    const FILES: &[&str] = &[
        "anat/sub-01_desc-preproc_T1w.nii.gz",
        "anat/sub-01_hemi-L_pial.surf.gii",
        "anat/sub-01_hemi-R_pial.surf.gii",
        "ses-01/func/sub-01_ses-01_task-a_desc-preproc_bold.nii.gz",
        "func/sub-01_task-b_hemi-L_space-fsnative_bold.func.gii",
        "func/sub-01_task-b_desc-confounds_timeseries.tsv",
    ];

    fn setup(files: &[&str]) -> (TempDir, SubjectManifest, TargetPlan) {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("fmriprep/sub-01");
        for f in files {
            touch(&sub, f);
        }
        let manifest = ManifestBuilder::new(FileClassifier::new().unwrap())
            .build_subject(&sub)
            .unwrap();
        let planner = OutputPathPlanner::new(dir.path().join("bv"));
        let plan = planner.plan(&manifest).unwrap();
        planner.create_directories(&plan).unwrap();
        (dir, manifest, plan)
    }

    #[test]
    fn test_fixed_category_order() {
        let (_dir, manifest, plan) = setup(FILES);
        let orch = ConversionOrchestrator::new(RecordingConverter::default(), false);
        let report = orch.run(&manifest, &plan).unwrap();

        let order: Vec<FileCategory> = orch.converter().calls.borrow().iter().map(|(c, _)| *c).collect();
        assert_eq!(
            order,
            vec![
                FileCategory::Anatomical,
                FileCategory::Surface,
                FileCategory::Surface,
                FileCategory::VolumeTimeseries,
                FileCategory::SurfaceTimeseries,
                FileCategory::Confounds,
            ]
        );
        assert_eq!(report.converted_count(), 6);
        assert_eq!(report.skipped_count(), 0);
        assert!(orch.converter().transforms.borrow().iter().all(Affine::is_identity));
    }

    #[test]
    fn test_second_run_converts_nothing() {
        let (_dir, manifest, plan) = setup(FILES);
        ConversionOrchestrator::new(RecordingConverter::default(), false)
            .run(&manifest, &plan)
            .unwrap();

        let orch = ConversionOrchestrator::new(RecordingConverter::default(), false);
        let report = orch.run(&manifest, &plan).unwrap();
        assert!(orch.converter().calls.borrow().is_empty());
        assert_eq!(report.converted_count(), 0);
        assert_eq!(report.skipped_count(), 6);
    }

    #[test]
    fn test_overwrite_converts_again() {
        let (_dir, manifest, plan) = setup(FILES);
        ConversionOrchestrator::new(RecordingConverter::default(), false)
            .run(&manifest, &plan)
            .unwrap();

        let orch = ConversionOrchestrator::new(RecordingConverter::default(), true);
        let report = orch.run(&manifest, &plan).unwrap();
        assert_eq!(orch.converter().calls.borrow().len(), 6);
        assert_eq!(report.skipped_count(), 0);
    }

    #[test]
    fn test_reduced_surface_counts_as_existing() {
        let (_dir, manifest, plan) = setup(&["anat/sub-01_hemi-L_pial.surf.gii"]);
        let first = ConversionOrchestrator::new(
            RecordingConverter {
                surface_reduction: Some(98),
                ..Default::default()
            },
            false,
        );
        let report = first.run(&manifest, &plan).unwrap();
        let written = &report.category(FileCategory::Surface).unwrap().converted[0];
        assert!(written.ends_with("sub-01_hemi-L_res-reduce98_pial.srf"));

        let second = ConversionOrchestrator::new(RecordingConverter::default(), false);
        let report = second.run(&manifest, &plan).unwrap();
        assert!(second.converter().calls.borrow().is_empty());
        assert_eq!(&report.category(FileCategory::Surface).unwrap().skipped[0], written);
    }

    #[test]
    fn test_transform_file_is_passed_to_surfaces() {
        let (dir, manifest, plan) = setup(&[
            "anat/sub-01_hemi-L_pial.surf.gii",
            "anat/sub-01_from-fsnative_to-T1w_mode-image_xfm.txt",
        ]);
        fs::write(
            dir.path().join("fmriprep/sub-01/anat/sub-01_from-fsnative_to-T1w_mode-image_xfm.txt"),
            "1 0 0 2\n0 1 0 0\n0 0 1 0\n0 0 0 1\n",
        )
        .unwrap();

        let orch = ConversionOrchestrator::new(RecordingConverter::default(), false);
        orch.run(&manifest, &plan).unwrap();
        let transforms = orch.converter().transforms.borrow();
        assert_eq!(transforms.len(), 1);
        assert_eq!(transforms[0].0[0][3], 2.0);
    }

    #[test]
    fn test_empty_categories_do_no_work() {
        let (_dir, manifest, plan) = setup(&["anat/sub-01_desc-preproc_T1w.nii.gz"]);
        let orch = ConversionOrchestrator::new(RecordingConverter::default(), false);
        let report = orch.run(&manifest, &plan).unwrap();
        assert_eq!(report.converted_count(), 1);
        assert_eq!(report.categories.len(), FileCategory::CONVERTIBLE.len());
        assert!(report.category(FileCategory::Confounds).unwrap().converted.is_empty());
        assert!(orch.converter().transforms.borrow().is_empty());
    }

    #[test]
    fn test_converter_error_aborts_with_context() {
        let (_dir, manifest, plan) = setup(FILES);
        let orch = ConversionOrchestrator::new(
            RecordingConverter {
                fail_on: Some(FileCategory::VolumeTimeseries),
                ..Default::default()
            },
            false,
        );
        let err = orch.run(&manifest, &plan).unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("sub-01"));
        assert!(message.contains("volume timeseries"));
        assert!(message.contains("converter failure"));
        // later categories never ran
        assert!(orch
            .converter()
            .calls
            .borrow()
            .iter()
            .all(|(c, _)| *c < FileCategory::VolumeTimeseries));
    }

    #[test]
    fn test_anatomical_scenario_target() {
        let (dir, manifest, plan) = setup(&["anat/sub-01_desc-preproc_T1w.nii.gz"]);
        let orch = ConversionOrchestrator::new(RecordingConverter::default(), false);
        let report = orch.run(&manifest, &plan).unwrap();
        let written = &report.category(FileCategory::Anatomical).unwrap().converted[0];
        assert_eq!(written, &dir.path().join("bv/sub-01/anat/sub-01_desc-preproc_T1w.vmr"));
        assert!(written.exists());
    }
}
