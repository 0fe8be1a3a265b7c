//! File name and path helpers shared by discovery and planning.
//!
//! BIDS-style names are `key-value` entities joined by underscores and
//! followed by a multi-part extension (`.nii.gz`, `.surf.gii`, ...), so
//! `Path::extension` is not enough to work with them.

use std::path::{Component, Path, PathBuf};

use thiserror::Error;

/// Key of the session entity in BIDS file names.
pub const SESSION_KEY: &str = "ses";

/// Key of the subject entity and prefix of subject directories.
pub const SUBJECT_PREFIX: &str = "sub-";

/// Errors raised when a path does not have the expected shape.
#[derive(Debug, Error)]
pub enum PathError {
    #[error("path has no file name: {0}")]
    NoFileName(PathBuf),

    #[error("file name is not valid UTF-8: {0}")]
    NotUtf8(PathBuf),

    #[error("'{name}' does not end with any of {expected:?}")]
    UnknownSuffix { name: String, expected: Vec<String> },

    #[error("marker '{marker}' not found in '{name}'")]
    MissingMarker { name: String, marker: String },
}

pub type Result<T> = std::result::Result<T, PathError>;

/// Returns the final component of `path` as UTF-8.
pub fn file_name(path: &Path) -> Result<&str> {
    path.file_name()
        .ok_or_else(|| PathError::NoFileName(path.to_path_buf()))?
        .to_str()
        .ok_or_else(|| PathError::NotUtf8(path.to_path_buf()))
}

/// Strips the first matching suffix in `suffixes` from `name`.
///
/// Longer suffixes should come first (`.nii.gz` before `.nii`).
pub fn strip_known_suffix<'a>(name: &'a str, suffixes: &[&str]) -> Result<&'a str> {
    suffixes
        .iter()
        .find_map(|suffix| name.strip_suffix(suffix))
        .ok_or_else(|| PathError::UnknownSuffix {
            name: name.to_string(),
            expected: suffixes.iter().map(|s| s.to_string()).collect(),
        })
}

/// Replaces the last occurrence of `marker` in `name` with `replacement`.
///
/// All other tokens of the file name are preserved.
pub fn replace_marker(name: &str, marker: &str, replacement: &str) -> Result<String> {
    let idx = name.rfind(marker).ok_or_else(|| PathError::MissingMarker {
        name: name.to_string(),
        marker: marker.to_string(),
    })?;
    let mut out = String::with_capacity(name.len() + replacement.len());
    out.push_str(&name[..idx]);
    out.push_str(replacement);
    out.push_str(&name[idx + marker.len()..]);
    Ok(out)
}

/// Looks up a `key-value` entity in a BIDS file name.
///
/// Only the part before the first `.` is searched, so extensions never match.
///
/// # Example
///
/// ```
/// use bv_pipeline::core::paths::entity;
///
/// let name = "sub-01_ses-02_task-rest_desc-preproc_bold.nii.gz";
/// assert_eq!(entity(name, "ses"), Some("ses-02"));
/// assert_eq!(entity(name, "run"), None);
/// ```
pub fn entity<'a>(name: &'a str, key: &str) -> Option<&'a str> {
    let stem = name.split('.').next().unwrap_or(name);
    stem.split('_').find(|token| {
        token
            .strip_prefix(key)
            .and_then(|rest| rest.strip_prefix('-'))
            .is_some_and(|value| !value.is_empty())
    })
}

/// Returns the session token (`ses-XX`) embedded in a file name, if any.
pub fn session_token(name: &str) -> Option<&str> {
    entity(name, SESSION_KEY)
}

/// Token inserted into surface names whose mesh had to be reduced.
pub fn reduction_token(percent: u32) -> String {
    format!("res-reduce{percent:02}")
}

/// Inserts a `res-reduceNN` token immediately before the last `_` segment.
///
/// `sub-01_hemi-L_pial.srf` becomes `sub-01_hemi-L_res-reduce98_pial.srf`.
/// A name without underscores gets the token as a prefix.
pub fn with_reduction_token(path: &Path, percent: u32) -> Result<PathBuf> {
    let name = file_name(path)?;
    let token = reduction_token(percent);
    let renamed = match name.rsplit_once('_') {
        Some((head, last)) => format!("{head}_{token}_{last}"),
        None => format!("{token}_{name}"),
    };
    Ok(path.with_file_name(renamed))
}

/// Path of `path` relative to `root`, with `/` separators on every platform.
pub fn relative_slash_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(parts.join("/"))
}

/// Normalises a subject label to its directory name (`01` -> `sub-01`).
pub fn subject_dir_name(label: &str) -> String {
    let label = label.trim();
    if label.starts_with(SUBJECT_PREFIX) {
        label.to_string()
    } else {
        format!("{SUBJECT_PREFIX}{label}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_known_suffix_prefers_listed_order() {
        let stem = strip_known_suffix("sub-01_T1w.nii.gz", &[".nii.gz", ".nii"]).unwrap();
        assert_eq!(stem, "sub-01_T1w");

        let stem = strip_known_suffix("sub-01_T1w.nii", &[".nii.gz", ".nii"]).unwrap();
        assert_eq!(stem, "sub-01_T1w");

        assert!(strip_known_suffix("sub-01_T1w.mgz", &[".nii.gz", ".nii"]).is_err());
    }

    #[test]
    fn test_replace_marker_keeps_other_tokens() {
        let out = replace_marker("sub-01_ses-1_hemi-R_white.surf.gii", ".surf.gii", ".srf").unwrap();
        assert_eq!(out, "sub-01_ses-1_hemi-R_white.srf");

        let err = replace_marker("sub-01_hemi-R_white.gii", ".surf.gii", ".srf");
        assert!(matches!(err, Err(PathError::MissingMarker { .. })));
    }

    #[test]
    fn test_session_token() {
        assert_eq!(
            session_token("sub-01_ses-01_task-rest_desc-confounds_timeseries.tsv"),
            Some("ses-01")
        );
        assert_eq!(session_token("sub-01_task-rest_desc-preproc_bold.nii.gz"), None);
        // an empty value is not a token
        assert_eq!(session_token("sub-01_ses-_bold.nii"), None);
        // "session" is a different key
        assert_eq!(session_token("sub-01_session-3_bold.nii"), None);
    }

    #[test]
    fn test_with_reduction_token() {
        let path = Path::new("/out/sub-01/anat/sub-01_hemi-L_pial.srf");
        let renamed = with_reduction_token(path, 98).unwrap();
        assert_eq!(
            renamed,
            Path::new("/out/sub-01/anat/sub-01_hemi-L_res-reduce98_pial.srf")
        );

        let renamed = with_reduction_token(Path::new("mesh.srf"), 5).unwrap();
        assert_eq!(renamed, Path::new("res-reduce05_mesh.srf"));
    }

    #[test]
    fn test_relative_slash_path() {
        let root = Path::new("/data/sub-01");
        let path = root.join("ses-1").join("func").join("x.tsv");
        assert_eq!(relative_slash_path(root, &path).as_deref(), Some("ses-1/func/x.tsv"));
        assert_eq!(relative_slash_path(root, Path::new("/other/x.tsv")), None);
    }

    #[test]
    fn test_subject_dir_name() {
        assert_eq!(subject_dir_name("01"), "sub-01");
        assert_eq!(subject_dir_name("sub-01"), "sub-01");
        assert_eq!(subject_dir_name(" 02 "), "sub-02");
    }
}
