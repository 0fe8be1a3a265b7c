//! Data loaders for surface meshes, affine transforms and confound tables.
//!
//! This module provides parsers for:
//! - Surface meshes in GIfTI, FreeSurfer binary and Wavefront OBJ form
//! - Plain-text affine matrices (4x4 or 3x4)
//! - Tab-separated confound tables with `n/a` placeholders

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use csv::ReaderBuilder;
use thiserror::Error;

use super::gifti::{self, GiftiError};
use super::mesh::Mesh;
use super::nifti::NiftiError;
use super::transforms::Affine;

/// FreeSurfer surface file extensions (`lh.pial`, `rh.white`, ...).
const FREESURFER_EXTENSIONS: &[&str] = &[
    "pial",
    "white",
    "inflated",
    "orig",
    "smoothwm",
    "sphere",
    "midthickness",
];

/// Errors that can occur during file loading.
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("GIfTI error: {0}")]
    Gifti(#[from] GiftiError),

    #[error("NIfTI error: {0}")]
    Nifti(#[from] NiftiError),

    #[error("FreeSurfer surface error in {path}: {message}")]
    FreeSurfer { path: PathBuf, message: String },

    #[error("Unrecognized mesh file extension: {0}")]
    UnknownMeshFormat(PathBuf),

    #[error("Empty file: {0}")]
    EmptyFile(PathBuf),

    #[error("Invalid transform in {path}: expected 12 or 16 values, found {found}")]
    InvalidTransform { path: PathBuf, found: usize },

    #[error("Mesh in {path} references vertex outside the mesh (face {face})")]
    InvalidFace { path: PathBuf, face: usize },

    #[error("Parse error: {0}")]
    ParseError(String),
}

/// Result type for loader operations.
pub type Result<T> = std::result::Result<T, LoaderError>;

/// Source mesh representations the reader understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshFormat {
    /// GIfTI surface (`.surf.gii`, `.gii`)
    Gifti,
    /// FreeSurfer binary triangle surface (`lh.pial`, `rh.white`, ...)
    FreeSurfer,
    /// Wavefront OBJ
    Obj,
}

impl MeshFormat {
    /// Resolves the format from a file name.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();
        if name.ends_with(".gii") {
            return Some(MeshFormat::Gifti);
        }
        if name.ends_with(".obj") {
            return Some(MeshFormat::Obj);
        }
        let ext = name.rsplit_once('.').map(|(_, ext)| ext)?;
        FREESURFER_EXTENSIONS
            .contains(&ext)
            .then_some(MeshFormat::FreeSurfer)
    }
}

/// Load a mesh in the given format.
///
/// # Errors
///
/// Returns an error if the file cannot be read, is malformed, or contains
/// faces referencing vertices that do not exist.
pub fn read_mesh(path: &Path, format: MeshFormat) -> Result<Mesh> {
    let mesh = match format {
        MeshFormat::Gifti => {
            let image = gifti::read_gifti(path)?;
            Mesh::new(image.vertices()?, image.triangles()?)
        }
        MeshFormat::FreeSurfer => read_freesurfer_surface(path)?,
        MeshFormat::Obj => read_obj(path)?,
    };

    if mesh.is_empty() {
        return Err(LoaderError::EmptyFile(path.to_path_buf()));
    }
    if let Some(face) = mesh.first_invalid_face() {
        return Err(LoaderError::InvalidFace {
            path: path.to_path_buf(),
            face,
        });
    }
    Ok(mesh)
}

fn read_freesurfer_surface(path: &Path) -> Result<Mesh> {
    let surf = neuroformats::read_surf(path).map_err(|e| LoaderError::FreeSurfer {
        path: path.to_path_buf(),
        message: format!("{e:?}"),
    })?;
    let vertices = surf
        .mesh
        .vertices
        .chunks_exact(3)
        .map(|c| [c[0], c[1], c[2]])
        .collect();
    let faces = surf
        .mesh
        .faces
        .chunks_exact(3)
        .map(|c| [c[0] as u32, c[1] as u32, c[2] as u32])
        .collect();
    Ok(Mesh::new(vertices, faces))
}

/// Load a Wavefront OBJ file.
///
/// Only `v` and `f` records are used. Polygons are fan-triangulated and
/// `v/vt/vn` index triplets are reduced to their vertex index.
pub fn read_obj(path: &Path) -> Result<Mesh> {
    let reader = BufReader::new(File::open(path)?);
    let mut mesh = Mesh::default();

    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("v") => {
                let coords: Vec<f32> = parts
                    .take(3)
                    .map(|s| s.parse::<f32>())
                    .collect::<std::result::Result<_, _>>()
                    .map_err(|_| LoaderError::ParseError(format!("{}:{}: bad vertex", path.display(), lineno + 1)))?;
                if coords.len() != 3 {
                    return Err(LoaderError::ParseError(format!(
                        "{}:{}: vertex needs 3 coordinates",
                        path.display(),
                        lineno + 1
                    )));
                }
                mesh.vertices.push([coords[0], coords[1], coords[2]]);
            }
            Some("f") => {
                let idx: Vec<u32> = parts
                    .map(|tok| {
                        tok.split('/')
                            .next()
                            .and_then(|s| s.parse::<u32>().ok())
                            .filter(|&i| i > 0)
                            .map(|i| i - 1)
                    })
                    .collect::<Option<_>>()
                    .ok_or_else(|| LoaderError::ParseError(format!("{}:{}: bad face", path.display(), lineno + 1)))?;
                for k in 1..idx.len().saturating_sub(1) {
                    mesh.faces.push([idx[0], idx[k], idx[k + 1]]);
                }
            }
            _ => {}
        }
    }

    Ok(mesh)
}

/// Load an affine matrix from a plain-text file.
///
/// Numbers may be separated by any whitespace or commas; lines starting
/// with `#` are ignored. A missing bottom row is taken as `0 0 0 1`.
pub fn read_transform(path: &Path) -> Result<Affine> {
    let reader = BufReader::new(File::open(path)?);
    let mut values = Vec::with_capacity(16);
    for line in reader.lines() {
        let line = line?;
        let content = line.trim();
        if content.is_empty() || content.starts_with('#') {
            continue;
        }
        for tok in content.split(|c: char| c.is_whitespace() || c == ',').filter(|t| !t.is_empty()) {
            let v: f64 = tok
                .parse()
                .map_err(|_| LoaderError::ParseError(format!("{}: invalid number '{tok}'", path.display())))?;
            values.push(v);
        }
    }

    Affine::from_row_major(&values).ok_or(LoaderError::InvalidTransform {
        path: path.to_path_buf(),
        found: values.len(),
    })
}

/// A table of nuisance regressors, one column per confound.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfoundsTable {
    pub columns: Vec<String>,
    /// Row-major values, one row per time point.
    pub rows: Vec<Vec<f32>>,
}

impl ConfoundsTable {
    /// Returns the number of time points.
    #[inline]
    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    /// Keeps only the named columns, in the order given.
    ///
    /// Unknown names are returned so the caller can report them.
    pub fn select(&self, names: &[String]) -> (ConfoundsTable, Vec<String>) {
        let mut picked = Vec::new();
        let mut missing = Vec::new();
        for name in names {
            match self.columns.iter().position(|c| c == name) {
                Some(i) => picked.push(i),
                None => missing.push(name.clone()),
            }
        }
        let table = ConfoundsTable {
            columns: picked.iter().map(|&i| self.columns[i].clone()).collect(),
            rows: self
                .rows
                .iter()
                .map(|row| picked.iter().map(|&i| row[i]).collect())
                .collect(),
        };
        (table, missing)
    }
}

/// Load a tab-separated confounds table.
///
/// `n/a` and empty cells (typical for derivative regressors in the first
/// volume) are read as zero.
pub fn read_confounds_tsv(path: &Path) -> Result<ConfoundsTable> {
    let file = File::open(path)?;
    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .from_reader(BufReader::new(file));

    let columns: Vec<String> = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();
    if columns.is_empty() {
        return Err(LoaderError::EmptyFile(path.to_path_buf()));
    }

    let mut rows = Vec::new();
    for (lineno, result) in reader.records().enumerate() {
        let record = result?;
        let row = record
            .iter()
            .map(|cell| match cell.trim() {
                "" | "n/a" | "NaN" | "nan" => Ok(0.0),
                value => value.parse::<f32>().map_err(|_| {
                    LoaderError::ParseError(format!(
                        "{}: row {}: invalid value '{value}'",
                        path.display(),
                        lineno + 2
                    ))
                }),
            })
            .collect::<Result<Vec<f32>>>()?;
        rows.push(row);
    }

    Ok(ConfoundsTable { columns, rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;
    use tempfile::{tempdir, NamedTempFile};

    #[test]
    fn test_mesh_format_from_path() {
        assert_eq!(MeshFormat::from_path(Path::new("sub-01_hemi-L_pial.surf.gii")), Some(MeshFormat::Gifti));
        assert_eq!(MeshFormat::from_path(Path::new("/x/lh.white")), Some(MeshFormat::FreeSurfer));
        assert_eq!(MeshFormat::from_path(Path::new("brain.OBJ")), Some(MeshFormat::Obj));
        assert_eq!(MeshFormat::from_path(Path::new("brain.stl")), None);
        assert_eq!(MeshFormat::from_path(Path::new("pial")), None);
    }

    #[test]
    fn test_read_gifti_mesh() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tri.surf.gii");
        fs::write(&path, crate::core::gifti::tests::triangle_surface_xml()).unwrap();

        let mesh = read_mesh(&path, MeshFormat::Gifti)?;
        assert_eq!(mesh.num_vertices(), 3);
        assert_eq!(mesh.faces, vec![[0, 1, 2]]);
        Ok(())
    }

    #[test]
    fn test_read_obj_fan_triangulates() -> Result<()> {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "# quad").unwrap();
        writeln!(file, "v 0 0 0").unwrap();
        writeln!(file, "v 1 0 0").unwrap();
        writeln!(file, "v 1 1 0").unwrap();
        writeln!(file, "v 0 1 0").unwrap();
        writeln!(file, "vn 0 0 1").unwrap();
        writeln!(file, "f 1//1 2//1 3//1 4//1").unwrap();
        file.flush().unwrap();

        let mesh = read_obj(file.path())?;
        assert_eq!(mesh.num_vertices(), 4);
        assert_eq!(mesh.faces, vec![[0, 1, 2], [0, 2, 3]]);
        Ok(())
    }

    #[test]
    fn test_read_mesh_rejects_out_of_range_faces() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 7").unwrap();
        file.flush().unwrap();

        let err = read_mesh(file.path(), MeshFormat::Obj);
        assert!(matches!(err, Err(LoaderError::InvalidFace { face: 0, .. })));
    }

    #[test]
    fn test_read_transform_4x4_and_3x4() -> Result<()> {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "# surface to T1w").unwrap();
        writeln!(file, "1 0 0 2.5").unwrap();
        writeln!(file, "0 1 0 -1").unwrap();
        writeln!(file, "0 0 1 0").unwrap();
        writeln!(file, "0 0 0 1").unwrap();
        file.flush().unwrap();
        let affine = read_transform(file.path())?;
        assert_eq!(affine.0[0][3], 2.5);
        assert_eq!(affine.0[1][3], -1.0);

        let mut short = NamedTempFile::new().unwrap();
        writeln!(short, "1,0,0,0\n0,1,0,0\n0,0,1,3").unwrap();
        short.flush().unwrap();
        let affine = read_transform(short.path())?;
        assert_eq!(affine.0[2][3], 3.0);
        assert_eq!(affine.0[3], [0.0, 0.0, 0.0, 1.0]);
        Ok(())
    }

    #[test]
    fn test_read_transform_wrong_count() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "1 0 0\n0 1 0\n0 0 1").unwrap();
        file.flush().unwrap();
        assert!(matches!(
            read_transform(file.path()),
            Err(LoaderError::InvalidTransform { found: 9, .. })
        ));
    }

    #[test]
    fn test_read_confounds_tsv() -> Result<()> {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "global_signal\tframewise_displacement\ttrans_x").unwrap();
        writeln!(file, "101.5\tn/a\t0.01").unwrap();
        writeln!(file, "99.0\t0.12\t-0.02").unwrap();
        file.flush().unwrap();

        let table = read_confounds_tsv(file.path())?;
        assert_eq!(table.columns, vec!["global_signal", "framewise_displacement", "trans_x"]);
        assert_eq!(table.num_rows(), 2);
        assert_eq!(table.rows[0][1], 0.0);
        assert_eq!(table.rows[1][2], -0.02);

        let (subset, missing) = table.select(&["trans_x".to_string(), "rot_z".to_string()]);
        assert_eq!(subset.columns, vec!["trans_x"]);
        assert_eq!(subset.rows, vec![vec![0.01], vec![-0.02]]);
        assert_eq!(missing, vec!["rot_z"]);
        Ok(())
    }
}
