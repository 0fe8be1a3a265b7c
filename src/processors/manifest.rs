//! Subject discovery and per-subject file manifests.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use thiserror::Error;
use walkdir::WalkDir;

use crate::core::paths::{self, subject_dir_name, PathError, SUBJECT_PREFIX};

use super::classify::{ClassifyError, FileCategory, FileClassifier, SourceFile};

/// Errors that can occur while building manifests.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("No pipeline root given")]
    MissingRoot,

    #[error("Pipeline root not found: {0}")]
    RootNotFound(PathBuf),

    #[error("Pipeline root is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("Failed to list {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("Failed to read directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Classify(#[from] ClassifyError),

    #[error("Invalid subject directory: {0}")]
    Path(#[from] PathError),

    #[error("{subject} has more than one surface-to-anat transform: {first} and {second}")]
    DuplicateTransform {
        subject: String,
        first: PathBuf,
        second: PathBuf,
    },
}

impl ManifestError {
    /// Configuration errors are raised before any discovery work.
    pub fn is_configuration(&self) -> bool {
        matches!(self, ManifestError::MissingRoot)
    }
}

pub type Result<T> = std::result::Result<T, ManifestError>;

/// Classified files of one subject.
#[derive(Debug, Clone)]
pub struct SubjectManifest {
    /// Subject directory name, e.g. `sub-01`.
    pub subject: String,
    /// Absolute path of the subject directory.
    pub root: PathBuf,
    files: BTreeMap<FileCategory, Vec<SourceFile>>,
    transform: Option<SourceFile>,
}

impl SubjectManifest {
    /// Assembles a manifest from classified files.
    ///
    /// The transform category is folded into a single optional slot.
    pub fn new(
        subject: impl Into<String>,
        root: impl Into<PathBuf>,
        mut files: BTreeMap<FileCategory, Vec<SourceFile>>,
    ) -> Result<Self> {
        let subject = subject.into();
        let mut transforms = files
            .remove(&FileCategory::SurfaceToAnatTransform)
            .unwrap_or_default()
            .into_iter();
        let transform = transforms.next();
        if let (Some(first), Some(second)) = (&transform, transforms.next()) {
            return Err(ManifestError::DuplicateTransform {
                subject,
                first: first.path.clone(),
                second: second.path,
            });
        }
        for category in FileCategory::CONVERTIBLE {
            files.entry(category).or_default();
        }
        Ok(Self {
            subject,
            root: root.into(),
            files,
            transform,
        })
    }

    /// Source files of `category`, in discovery order.
    pub fn files(&self, category: FileCategory) -> &[SourceFile] {
        self.files.get(&category).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The subject's surface-to-anatomical transform file, if present.
    pub fn transform(&self) -> Option<&SourceFile> {
        self.transform.as_ref()
    }

    /// Number of convertible source files.
    pub fn len(&self) -> usize {
        self.files.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Builds subject manifests below a pipeline root.
#[derive(Debug, Clone)]
pub struct ManifestBuilder {
    classifier: FileClassifier,
}

impl ManifestBuilder {
    pub fn new(classifier: FileClassifier) -> Self {
        Self { classifier }
    }

    /// Lists subject directories under `root`, sorted by name.
    ///
    /// # Arguments
    ///
    /// * `root` - Pipeline root directory
    /// * `subjects` - Allow-list of labels (`01` or `sub-01`); empty means all
    pub fn subjects(&self, root: &Path, subjects: &[String]) -> Result<Vec<PathBuf>> {
        check_root(root)?;

        let entries = fs::read_dir(root).map_err(|source| ManifestError::ReadDir {
            path: root.to_path_buf(),
            source,
        })?;
        let mut found = subject_dirs(root, entries.map(|entry| entry.map(|e| e.path())))?;
        found.sort();

        if subjects.is_empty() {
            return Ok(found);
        }

        let wanted: Vec<String> = subjects.iter().map(|s| subject_dir_name(s)).collect();
        for name in &wanted {
            if !found.iter().any(|p| p.ends_with(name)) {
                warn!("Subject {} not found under {}", name, root.display());
            }
        }
        found.retain(|p| wanted.iter().any(|name| p.ends_with(name)));
        Ok(found)
    }

    /// Builds the manifest for one subject directory.
    pub fn build_subject(&self, subject_root: &Path) -> Result<SubjectManifest> {
        let subject = paths::file_name(subject_root)?.to_string();

        let mut files = Vec::new();
        for entry in WalkDir::new(subject_root)
            .follow_links(true)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|source| ManifestError::Walk {
                path: subject_root.to_path_buf(),
                source,
            })?;
            if entry.file_type().is_file() {
                files.push(entry.into_path());
            }
        }
        debug!("{}: {} files found", subject, files.len());

        let classified = self.classifier.classify(subject_root, &files)?;
        SubjectManifest::new(subject, subject_root, classified)
    }

    /// Builds manifests for every selected subject under `root`.
    pub fn build(&self, root: &Path, subjects: &[String]) -> Result<Vec<SubjectManifest>> {
        self.subjects(root, subjects)?
            .iter()
            .map(|dir| self.build_subject(dir))
            .collect()
    }
}

/// Keeps the `sub-*` directories among `entries`. An unreadable entry fails
/// the whole listing.
fn subject_dirs(root: &Path, entries: impl IntoIterator<Item = io::Result<PathBuf>>) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in entries {
        let path = entry.map_err(|source| ManifestError::ReadDir {
            path: root.to_path_buf(),
            source,
        })?;
        let is_subject = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(is_subject_dir_name);
        if is_subject && path.is_dir() {
            dirs.push(path);
        }
    }
    Ok(dirs)
}

/// `sub-<label>` with an alphanumeric, non-empty label.
fn is_subject_dir_name(name: &str) -> bool {
    name.strip_prefix(SUBJECT_PREFIX)
        .is_some_and(|label| !label.is_empty() && label.chars().all(|c| c.is_ascii_alphanumeric()))
}

fn check_root(root: &Path) -> Result<()> {
    if root.as_os_str().is_empty() {
        return Err(ManifestError::MissingRoot);
    }
    if !root.exists() {
        return Err(ManifestError::RootNotFound(root.to_path_buf()));
    }
    if !root.is_dir() {
        return Err(ManifestError::NotADirectory(root.to_path_buf()));
    }
    Ok(())
}
