//! Pattern-based classification of a subject's files.
//!
//! Every file under a subject directory is matched, by its path relative to
//! that directory, against one regular expression per category. Files that
//! match nothing are ignored; files that match more than one category are
//! rejected.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use regex::Regex;
use thiserror::Error;

use crate::core::paths::relative_slash_path;

/// Optional `ses-*/` level in front of the datatype directory.
const SESSION_DIR: &str = r"(?:ses-[A-Za-z0-9]+/)?";

/// Semantic category of an upstream file.
///
/// The declaration order is the conversion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FileCategory {
    Anatomical,
    Surface,
    VolumeTimeseries,
    SurfaceTimeseries,
    Confounds,
    SurfaceToAnatTransform,
}

impl FileCategory {
    /// Categories that produce an output file, in conversion order.
    pub const CONVERTIBLE: [FileCategory; 5] = [
        FileCategory::Anatomical,
        FileCategory::Surface,
        FileCategory::VolumeTimeseries,
        FileCategory::SurfaceTimeseries,
        FileCategory::Confounds,
    ];

    /// Every category, in declaration order.
    pub const ALL: [FileCategory; 6] = [
        FileCategory::Anatomical,
        FileCategory::Surface,
        FileCategory::VolumeTimeseries,
        FileCategory::SurfaceTimeseries,
        FileCategory::Confounds,
        FileCategory::SurfaceToAnatTransform,
    ];

    /// Short label used in logs and summaries.
    pub fn label(self) -> &'static str {
        match self {
            FileCategory::Anatomical => "anatomical",
            FileCategory::Surface => "surface",
            FileCategory::VolumeTimeseries => "volume timeseries",
            FileCategory::SurfaceTimeseries => "surface timeseries",
            FileCategory::Confounds => "confounds",
            FileCategory::SurfaceToAnatTransform => "surface-to-anat transform",
        }
    }

    /// Functional categories are nested by session in the output tree.
    pub fn is_functional(self) -> bool {
        matches!(
            self,
            FileCategory::VolumeTimeseries | FileCategory::SurfaceTimeseries | FileCategory::Confounds
        )
    }

    /// Relative-path pattern identifying this category.
    pub fn pattern(self) -> String {
        let tail = match self {
            FileCategory::Anatomical => r"anat/[^/]*_desc-preproc_T1w\.nii(?:\.gz)?",
            FileCategory::Surface => r"anat/[^/]*_hemi-[LR]_(?:pial|white|inflated)\.surf\.gii",
            FileCategory::SurfaceToAnatTransform => {
                r"anat/[^/]*_from-fsnative_to-T1w_mode-image_xfm\.txt"
            }
            FileCategory::VolumeTimeseries => r"func/[^/]*_desc-preproc_bold\.nii(?:\.gz)?",
            FileCategory::SurfaceTimeseries => r"func/[^/]*_hemi-[LR]_space-[A-Za-z0-9]+_bold\.func\.gii",
            FileCategory::Confounds => {
                r"func/[^/]*_desc-confounds_(?:timeseries|regressors)\.tsv"
            }
        };
        format!("^{SESSION_DIR}{tail}$")
    }
}

impl fmt::Display for FileCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A discovered upstream file and the category it was assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub category: FileCategory,
}

/// Errors raised during classification.
#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("invalid pattern for {category}: {source}")]
    Pattern {
        category: FileCategory,
        #[source]
        source: regex::Error,
    },

    #[error("{path} matches more than one category: {categories:?}")]
    Ambiguous {
        path: PathBuf,
        categories: Vec<FileCategory>,
    },
}

pub type Result<T> = std::result::Result<T, ClassifyError>;

/// Files grouped by category, each list in discovery order.
pub type Classified = BTreeMap<FileCategory, Vec<SourceFile>>;

/// Compiled (category, pattern) table.
#[derive(Debug, Clone)]
pub struct FileClassifier {
    table: Vec<(FileCategory, Regex)>,
}

impl FileClassifier {
    /// Builds the classifier for the standard derivatives layout.
    pub fn new() -> Result<Self> {
        let table: Vec<(FileCategory, String)> = FileCategory::ALL
            .iter()
            .map(|&c| (c, c.pattern()))
            .collect();
        Self::with_patterns(&table)
    }

    /// Builds a classifier from an explicit pattern table.
    pub fn with_patterns<S: AsRef<str>>(patterns: &[(FileCategory, S)]) -> Result<Self> {
        let table = patterns
            .iter()
            .map(|(category, pattern)| {
                Regex::new(pattern.as_ref())
                    .map(|re| (*category, re))
                    .map_err(|source| ClassifyError::Pattern {
                        category: *category,
                        source,
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { table })
    }

    /// Categories whose pattern matches a relative path.
    pub fn matches(&self, relative: &str) -> Vec<FileCategory> {
        self.table
            .iter()
            .filter(|(_, re)| re.is_match(relative))
            .map(|(category, _)| *category)
            .collect()
    }

    /// Partitions `files` (all under `subject_root`) into categories.
    ///
    /// Every category in the table gets an entry, possibly empty. Paths
    /// outside `subject_root` or with non-UTF-8 components never match.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifyError::Ambiguous`] if a path matches more than one
    /// pattern.
    pub fn classify<I, P>(&self, subject_root: &Path, files: I) -> Result<Classified>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut classified: Classified = self
            .table
            .iter()
            .map(|(category, _)| (*category, Vec::new()))
            .collect();

        for file in files {
            let path = file.as_ref();
            let Some(relative) = relative_slash_path(subject_root, path) else {
                continue;
            };
            let categories = self.matches(&relative);
            match categories.as_slice() {
                [] => {}
                [category] => {
                    if let Some(list) = classified.get_mut(category) {
                        list.push(SourceFile {
                            path: path.to_path_buf(),
                            category: *category,
                        });
                    }
                }
                _ => {
                    return Err(ClassifyError::Ambiguous {
                        path: path.to_path_buf(),
                        categories,
                    })
                }
            }
        }

        Ok(classified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(rel: &[&str]) -> Classified {
        let root = Path::new("/data/fmriprep/sub-01");
        let files: Vec<PathBuf> = rel.iter().map(|r| root.join(r)).collect();
        FileClassifier::new().unwrap().classify(root, &files).unwrap()
    }

    #[test]
    fn test_each_category_pattern() {
        let cases = [
            ("anat/sub-01_desc-preproc_T1w.nii.gz", FileCategory::Anatomical),
            ("anat/sub-01_hemi-L_pial.surf.gii", FileCategory::Surface),
            ("anat/sub-01_hemi-R_inflated.surf.gii", FileCategory::Surface),
            ("anat/sub-01_from-fsnative_to-T1w_mode-image_xfm.txt", FileCategory::SurfaceToAnatTransform),
            ("func/sub-01_task-rest_desc-preproc_bold.nii.gz", FileCategory::VolumeTimeseries),
            ("ses-01/func/sub-01_ses-01_task-rest_space-T1w_desc-preproc_bold.nii", FileCategory::VolumeTimeseries),
            ("func/sub-01_task-rest_hemi-L_space-fsnative_bold.func.gii", FileCategory::SurfaceTimeseries),
            ("func/sub-01_task-rest_desc-confounds_timeseries.tsv", FileCategory::Confounds),
            ("func/sub-01_task-rest_desc-confounds_regressors.tsv", FileCategory::Confounds),
        ];
        let classifier = FileClassifier::new().unwrap();
        for (rel, expected) in cases {
            assert_eq!(classifier.matches(rel), vec![expected], "{rel}");
        }
    }

    #[test]
    fn test_unmatched_files_are_excluded() {
        let classified = classify(&[
            "anat/sub-01_desc-brain_mask.nii.gz",
            "anat/sub-01_hemi-L_midthickness.surf.gii",
            "func/sub-01_task-rest_desc-preproc_bold.json",
            "figures/sub-01_dseg.svg",
            "log/crash.txt",
        ]);
        assert!(classified.values().all(|v| v.is_empty()));
        assert_eq!(classified.len(), FileCategory::ALL.len());
    }

    #[test]
    fn test_classification_is_a_partition_in_discovery_order() {
        let rel = [
            "anat/sub-01_desc-preproc_T1w.nii.gz",
            "anat/sub-01_hemi-L_pial.surf.gii",
            "anat/sub-01_hemi-R_pial.surf.gii",
            "anat/sub-01_hemi-L_white.surf.gii",
            "func/sub-01_task-a_desc-preproc_bold.nii.gz",
            "func/sub-01_task-a_desc-confounds_timeseries.tsv",
            "func/sub-01_task-a_desc-preproc_bold.json",
        ];
        let classified = classify(&rel);

        let total: usize = classified.values().map(|v| v.len()).sum();
        assert_eq!(total, 6);

        let surfaces: Vec<&str> = classified[&FileCategory::Surface]
            .iter()
            .map(|s| s.path.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(
            surfaces,
            vec![
                "sub-01_hemi-L_pial.surf.gii",
                "sub-01_hemi-R_pial.surf.gii",
                "sub-01_hemi-L_white.surf.gii"
            ]
        );

        let mut seen = std::collections::HashSet::new();
        for (category, files) in &classified {
            for file in files {
                assert_eq!(file.category, *category);
                assert!(seen.insert(file.path.clone()), "duplicate {:?}", file.path);
            }
        }
    }

    #[test]
    fn test_ambiguous_match_is_an_error() {
        let classifier = FileClassifier::with_patterns(&[
            (FileCategory::VolumeTimeseries, r"^func/.*\.nii\.gz$"),
            (FileCategory::Anatomical, r"^func/.*_bold\.nii\.gz$"),
        ])
        .unwrap();
        let root = Path::new("/d/sub-01");
        let err = classifier
            .classify(root, [root.join("func/sub-01_bold.nii.gz")])
            .unwrap_err();
        match err {
            ClassifyError::Ambiguous { categories, .. } => {
                assert_eq!(categories, vec![FileCategory::VolumeTimeseries, FileCategory::Anatomical]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_invalid_pattern() {
        let err = FileClassifier::with_patterns(&[(FileCategory::Anatomical, "(")]);
        assert!(matches!(err, Err(ClassifyError::Pattern { .. })));
    }

    #[test]
    fn test_conversion_order() {
        let mut sorted = FileCategory::CONVERTIBLE.to_vec();
        sorted.sort();
        assert_eq!(sorted, FileCategory::CONVERTIBLE.to_vec());
        assert!(FileCategory::Confounds.is_functional());
        assert!(!FileCategory::Surface.is_functional());
    }
}
