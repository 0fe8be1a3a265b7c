//! Data writers for BrainVoyager formats.
//!
//! This module serialises already-prepared data into:
//! - SRF surface meshes (version 4, little-endian)
//! - VMR anatomical volumes (version 4)
//! - VTC volume time courses (version 3, float data)
//! - MTC mesh time courses (version 1, float data)
//! - SDM design matrices (text, version 1)
//!
//! Reorientation and rescaling happen before these functions are called.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};
use thiserror::Error;

use super::mesh::SurfaceMesh;

/// Errors that can occur during write operations.
#[derive(Error, Debug)]
pub enum WriteError {
    /// Failed to create parent directories.
    #[error("failed to create parent directories for '{path}': {source}")]
    CreateDirectory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to create or open file for writing.
    #[error("failed to create file '{path}': {source}")]
    CreateFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write data to file.
    #[error("failed to write to file '{path}': {source}")]
    WriteFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Buffer sizes disagree with the declared dimensions.
    #[error("length mismatch in '{path}': expected {expected} values, got {actual}")]
    LengthMismatch {
        path: String,
        expected: usize,
        actual: usize,
    },
}

/// Result type for write operations.
pub type Result<T> = std::result::Result<T, WriteError>;

/// Creates parent directories for a file path if they don't exist.
fn ensure_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| WriteError::CreateDirectory {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
    }
    Ok(())
}

/// Creates a buffered writer for the given path.
fn create_buffered_writer(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).map_err(|e| WriteError::CreateFile {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(BufWriter::new(file))
}

/// Opens `path`, runs `body` against a buffered writer and flushes it.
fn write_with<F>(path: &Path, body: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> std::io::Result<()>,
{
    ensure_parent_dirs(path)?;
    let mut writer = create_buffered_writer(path)?;
    body(&mut writer)
        .and_then(|_| writer.flush())
        .map_err(|e| WriteError::WriteFile {
            path: path.display().to_string(),
            source: e,
        })
}

fn check_len(path: &Path, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(WriteError::LengthMismatch {
            path: path.display().to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}

/// Writes a null-terminated string.
fn write_cstr<W: Write>(w: &mut W, s: &str) -> std::io::Result<()> {
    w.write_all(s.as_bytes())?;
    w.write_u8(0)
}

/// Write a surface mesh as a BrainVoyager SRF (version 4) file.
///
/// Layout: header (version, reserved, counts, mesh centre), vertex
/// coordinates and normals stored axis by axis, convex/concave colours,
/// per-vertex colours, neighbour rings, triangles, an empty triangle strip
/// block and an empty linked MTC name.
///
/// # Errors
///
/// Returns an error if the attribute arrays do not match the vertex count or
/// the file cannot be written.
pub fn write_srf(path: &Path, surface: &SurfaceMesh) -> Result<()> {
    let mesh = &surface.mesh;
    let nv = mesh.num_vertices();
    check_len(path, nv, surface.normals.len())?;
    check_len(path, nv, surface.neighbors.len())?;
    check_len(path, nv, surface.vertex_colors.len())?;

    write_with(path, |w| {
        w.write_f32::<LittleEndian>(4.0)?;
        w.write_i32::<LittleEndian>(0)?;
        w.write_i32::<LittleEndian>(nv as i32)?;
        w.write_i32::<LittleEndian>(mesh.num_faces() as i32)?;
        for c in surface.center {
            w.write_f32::<LittleEndian>(c)?;
        }

        for axis in 0..3 {
            for v in &mesh.vertices {
                w.write_f32::<LittleEndian>(v[axis])?;
            }
        }
        for axis in 0..3 {
            for n in &surface.normals {
                w.write_f32::<LittleEndian>(n[axis])?;
            }
        }

        for c in surface.convex_color.iter().chain(surface.concave_color.iter()) {
            w.write_f32::<LittleEndian>(*c)?;
        }

        for &color in &surface.vertex_colors {
            w.write_u32::<LittleEndian>(color)?;
        }

        for ring in &surface.neighbors {
            w.write_i32::<LittleEndian>(ring.len() as i32)?;
            for &n in ring {
                w.write_i32::<LittleEndian>(n as i32)?;
            }
        }

        for face in &mesh.faces {
            for &i in face {
                w.write_i32::<LittleEndian>(i as i32)?;
            }
        }

        // no triangle strips, no linked MTC
        w.write_i32::<LittleEndian>(0)?;
        write_cstr(w, "")
    })
}

/// An anatomical volume already in BrainVoyager voxel order.
#[derive(Debug, Clone)]
pub struct VmrVolume {
    /// Grid size `[x, y, z]`, x varying fastest in `data`.
    pub dims: [usize; 3],
    /// Voxel size in millimetres along each BrainVoyager axis.
    pub voxel_size: [f32; 3],
    /// Intensities in `0..=225`.
    pub data: Vec<u8>,
}

/// Write an anatomical volume as a BrainVoyager VMR (version 4) file.
pub fn write_vmr(path: &Path, vmr: &VmrVolume) -> Result<()> {
    let [nx, ny, nz] = vmr.dims;
    check_len(path, nx * ny * nz, vmr.data.len())?;

    let (min, max, mean) = intensity_stats(&vmr.data);
    let framing = nx.max(ny).max(nz).max(256);

    write_with(path, |w| {
        w.write_u16::<LittleEndian>(4)?;
        for d in vmr.dims {
            w.write_u16::<LittleEndian>(d as u16)?;
        }
        w.write_all(&vmr.data)?;

        // post-data header
        for _ in 0..3 {
            w.write_i16::<LittleEndian>(0)?;
        }
        w.write_i16::<LittleEndian>(framing as i16)?;
        w.write_i32::<LittleEndian>(0)?; // position infos not verified
        w.write_i32::<LittleEndian>(1)?; // coordinate system
        let half_z = nz as f32 * vmr.voxel_size[2] / 2.0;
        for c in [0.0, 0.0, -half_z, 0.0, 0.0, half_z] {
            w.write_f32::<LittleEndian>(c)?; // first and last slice centre
        }
        for c in [0.0, 1.0, 0.0, 0.0, 0.0, -1.0] {
            w.write_f32::<LittleEndian>(c)?; // row and column directions
        }
        w.write_i32::<LittleEndian>(ny as i32)?;
        w.write_i32::<LittleEndian>(nx as i32)?;
        w.write_f32::<LittleEndian>(ny as f32 * vmr.voxel_size[1])?;
        w.write_f32::<LittleEndian>(nx as f32 * vmr.voxel_size[0])?;
        w.write_f32::<LittleEndian>(vmr.voxel_size[2])?;
        w.write_f32::<LittleEndian>(0.0)?; // gap thickness
        w.write_i32::<LittleEndian>(0)?; // past spatial transformations
        w.write_u8(1)?; // radiological left-right convention
        w.write_u8(0)?; // reference space unknown
        for s in vmr.voxel_size {
            w.write_f32::<LittleEndian>(s)?;
        }
        w.write_u8(0)?; // voxel resolution not verified
        w.write_u8(1)?; // resolution in mm
        w.write_i32::<LittleEndian>(min)?;
        w.write_i32::<LittleEndian>(mean)?;
        w.write_i32::<LittleEndian>(max)
    })
}

fn intensity_stats(data: &[u8]) -> (i32, i32, i32) {
    if data.is_empty() {
        return (0, 0, 0);
    }
    let min = *data.iter().min().unwrap_or(&0) as i32;
    let max = *data.iter().max().unwrap_or(&0) as i32;
    let sum: u64 = data.iter().map(|&v| v as u64).sum();
    (min, max, (sum / data.len() as u64) as i32)
}

/// A volume time course in BrainVoyager voxel order.
#[derive(Debug, Clone)]
pub struct VtcData {
    /// Grid size `[x, y, z]` in VTC voxels.
    pub dims: [usize; 3],
    /// Edge length of one VTC voxel in millimetres.
    pub resolution: u16,
    pub num_volumes: usize,
    pub tr_ms: f32,
    /// Samples with time varying fastest, then x, y and z.
    pub data: Vec<f32>,
}

/// Write a volume time course as a BrainVoyager VTC (version 3) file.
pub fn write_vtc(path: &Path, vtc: &VtcData) -> Result<()> {
    let [nx, ny, nz] = vtc.dims;
    check_len(path, nx * ny * nz * vtc.num_volumes, vtc.data.len())?;
    let res = vtc.resolution as usize;

    write_with(path, |w| {
        w.write_i16::<LittleEndian>(3)?;
        write_cstr(w, "")?; // source FMR
        w.write_i16::<LittleEndian>(0)?; // linked protocols
        w.write_i16::<LittleEndian>(0)?; // current protocol
        w.write_i16::<LittleEndian>(2)?; // float data
        w.write_i16::<LittleEndian>(vtc.num_volumes as i16)?;
        w.write_i16::<LittleEndian>(vtc.resolution as i16)?;
        for extent in [nx, ny, nz] {
            w.write_i16::<LittleEndian>(0)?;
            w.write_i16::<LittleEndian>((extent * res) as i16)?;
        }
        w.write_u8(1)?; // radiological left-right convention
        w.write_u8(1)?; // native reference space
        w.write_f32::<LittleEndian>(vtc.tr_ms)?;
        for &v in &vtc.data {
            w.write_f32::<LittleEndian>(v)?;
        }
        Ok(())
    })
}

/// A mesh time course, one time series per vertex.
#[derive(Debug, Clone)]
pub struct MtcData {
    pub num_vertices: usize,
    pub num_timepoints: usize,
    pub tr_ms: f32,
    /// Samples with time varying fastest.
    pub data: Vec<f32>,
}

/// Write a mesh time course as a BrainVoyager MTC (version 1) file.
pub fn write_mtc(path: &Path, mtc: &MtcData) -> Result<()> {
    check_len(path, mtc.num_vertices * mtc.num_timepoints, mtc.data.len())?;

    write_with(path, |w| {
        w.write_i32::<LittleEndian>(1)?;
        w.write_i32::<LittleEndian>(mtc.num_vertices as i32)?;
        w.write_i32::<LittleEndian>(mtc.num_timepoints as i32)?;
        write_cstr(w, "")?; // source VTC
        write_cstr(w, "")?; // linked protocol
        w.write_i32::<LittleEndian>(1)?; // hemodynamic delay
        w.write_f32::<LittleEndian>(mtc.tr_ms)?;
        w.write_f32::<LittleEndian>(2.5)?; // HRF delta
        w.write_f32::<LittleEndian>(1.25)?; // HRF tau
        w.write_i32::<LittleEndian>(1)?; // segment size
        w.write_i32::<LittleEndian>(0)?; // segment offset
        w.write_u8(1)?; // float data
        for &v in &mtc.data {
            w.write_f32::<LittleEndian>(v)?;
        }
        Ok(())
    })
}

/// A design matrix: named, coloured predictors over time.
#[derive(Debug, Clone, Default)]
pub struct DesignMatrix {
    pub names: Vec<String>,
    pub colors: Vec<[u8; 3]>,
    /// One row per data point, one value per predictor.
    pub rows: Vec<Vec<f32>>,
}

/// Write a design matrix as a BrainVoyager SDM text file.
///
/// All predictors are written as confounds (no constant column).
pub fn write_sdm(path: &Path, sdm: &DesignMatrix) -> Result<()> {
    let np = sdm.names.len();
    check_len(path, np, sdm.colors.len())?;
    if let Some(bad) = sdm.rows.iter().find(|r| r.len() != np) {
        check_len(path, np, bad.len())?;
    }

    write_with(path, |w| {
        writeln!(w)?;
        writeln!(w, "FileVersion:            1")?;
        writeln!(w)?;
        writeln!(w, "NrOfPredictors:         {np}")?;
        writeln!(w, "NrOfDataPoints:         {}", sdm.rows.len())?;
        writeln!(w, "IncludesConstant:       0")?;
        writeln!(w, "FirstConfoundPredictor: 1")?;
        writeln!(w)?;
        let colors: Vec<String> = sdm
            .colors
            .iter()
            .map(|[r, g, b]| format!("{r} {g} {b}"))
            .collect();
        writeln!(w, "{}", colors.join("   "))?;
        let names: Vec<String> = sdm.names.iter().map(|n| format!("\"{n}\"")).collect();
        writeln!(w, "{}", names.join(" "))?;
        for row in &sdm.rows {
            let cells: Vec<String> = row.iter().map(|v| format!("{v:.6}")).collect();
            writeln!(w, "{}", cells.join(" "))?;
        }
        Ok(())
    })
}
