//! Surface mesh conversion with adaptive decimation.
//!
//! A mesh that the writer rejects as too large is reduced and written again,
//! one percent smaller each time, until it fits or the retention drops to a
//! third of the original face count.

use std::path::{Path, PathBuf};

use log::{debug, info};
use thiserror::Error;

use crate::config::SurfaceConfig;
use crate::core::loaders::{LoaderError, MeshFormat};
use crate::core::mesh::{Rgba, SurfaceMesh};
use crate::core::paths::{with_reduction_token, PathError};
use crate::core::transforms::{remap_to_brainvoyager, Affine, HALF_EXTENT};
use crate::core::writers::WriteError;

use super::capabilities::{Capabilities, MeshWriteError};

/// Retention (percent) of the first attempt.
pub const START_PERCENT: u32 = 99;

/// Exclusive lower bound on the retention percent.
pub const MIN_PERCENT: u32 = 33;

/// Extension of BrainVoyager surface files.
pub const SRF_EXTENSION: &str = "srf";

/// Errors that can occur while converting a surface.
#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("Unsupported surface target (expected .srf): {0}")]
    UnsupportedTarget(PathBuf),

    #[error("Unsupported surface source format: {0}")]
    UnsupportedSource(PathBuf),

    #[error("Failed to read surface: {0}")]
    Read(#[from] LoaderError),

    #[error("Failed to write surface: {0}")]
    Write(#[from] WriteError),

    #[error(transparent)]
    Path(#[from] PathError),

    #[error("Surface {path} is too large even after reduction to {min_percent}%")]
    TooLarge { path: PathBuf, min_percent: u32 },
}

/// Loads, remaps and persists surface meshes.
#[derive(Debug)]
pub struct SurfaceConverter {
    capabilities: Capabilities,
    convex_color: Rgba,
    concave_color: Rgba,
}

impl SurfaceConverter {
    pub fn new(capabilities: Capabilities, config: &SurfaceConfig) -> Self {
        Self {
            capabilities,
            convex_color: config.convex_color,
            concave_color: config.concave_color,
        }
    }

    /// Converts `source` to an SRF file at `target`.
    ///
    /// Vertices are remapped into BrainVoyager coordinates, then `transform`
    /// is applied. If the writer reports the mesh as too large it is reduced
    /// and retried; in that case the returned path carries a `res-reduceNN`
    /// token and differs from `target`.
    ///
    /// # Errors
    ///
    /// Unsupported extensions are rejected before any read. Writer failures
    /// other than [`MeshWriteError::CapacityExceeded`] are returned at once.
    pub fn convert(&self, target: &Path, source: &Path, transform: &Affine) -> Result<PathBuf, SurfaceError> {
        if !has_srf_extension(target) {
            return Err(SurfaceError::UnsupportedTarget(target.to_path_buf()));
        }
        let format = MeshFormat::from_path(source)
            .ok_or_else(|| SurfaceError::UnsupportedSource(source.to_path_buf()))?;

        let mut mesh = self.capabilities.reader.read_mesh(source, format)?;
        debug!(
            "Loaded {} ({} vertices, {} faces)",
            source.display(),
            mesh.num_vertices(),
            mesh.num_faces()
        );
        remap_to_brainvoyager(&mut mesh.vertices);
        transform.apply_all(&mut mesh.vertices);

        let mut percent = START_PERCENT;
        let mut reduced = false;
        while percent > MIN_PERCENT {
            let path = if reduced {
                with_reduction_token(target, percent + 1)?
            } else {
                target.to_path_buf()
            };
            let surface = SurfaceMesh::build(
                mesh,
                [HALF_EXTENT; 3],
                self.convex_color,
                self.concave_color,
            );

            match self.capabilities.writer.write_mesh(&path, &surface) {
                Ok(()) => {
                    if reduced {
                        info!(
                            "Wrote {} reduced to {} faces",
                            path.display(),
                            surface.mesh.num_faces()
                        );
                    }
                    return Ok(path);
                }
                Err(MeshWriteError::CapacityExceeded { vertices, faces, .. }) => {
                    debug!(
                        "{vertices} vertices / {faces} faces too large, reducing to {percent}%"
                    );
                    mesh = self
                        .capabilities
                        .reducer
                        .reduce(&surface.mesh, percent as f32 / 100.0);
                    reduced = true;
                    percent -= 1;
                }
                Err(MeshWriteError::Write(e)) => return Err(e.into()),
            }
        }

        Err(SurfaceError::TooLarge {
            path: target.to_path_buf(),
            min_percent: MIN_PERCENT,
        })
    }
}

fn has_srf_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(SRF_EXTENSION))
}
