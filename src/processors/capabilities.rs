//! Mesh read, write and reduce capabilities.
//!
//! The surface converter talks to these traits only. The crate ships native
//! implementations; tests swap in recording mocks.

use std::fmt;
use std::path::Path;

use thiserror::Error;

use crate::config::SurfaceConfig;
use crate::core::decimate::reduce_mesh;
use crate::core::loaders::{self, LoaderError, MeshFormat};
use crate::core::mesh::{Mesh, SurfaceMesh};
use crate::core::writers::{write_srf, WriteError};

/// Failure of a mesh write.
#[derive(Debug, Error)]
pub enum MeshWriteError {
    /// The mesh is larger than the target format accepts. Retryable after
    /// reduction.
    #[error("mesh with {vertices} vertices and {faces} faces exceeds the limit of {max_vertices} vertices / {max_faces} faces")]
    CapacityExceeded {
        vertices: usize,
        faces: usize,
        max_vertices: usize,
        max_faces: usize,
    },

    #[error(transparent)]
    Write(#[from] WriteError),
}

/// Loads a mesh from disk.
pub trait MeshReader {
    fn read_mesh(&self, path: &Path, format: MeshFormat) -> Result<Mesh, LoaderError>;
}

/// Persists a prepared surface.
pub trait MeshWriter {
    fn write_mesh(&self, path: &Path, surface: &SurfaceMesh) -> Result<(), MeshWriteError>;
}

/// Reduces a mesh to roughly `proportion` of its faces.
pub trait MeshReducer {
    fn reduce(&self, mesh: &Mesh, proportion: f32) -> Mesh;
}

/// Reads GIfTI, FreeSurfer and OBJ meshes.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeMeshReader;

impl MeshReader for NativeMeshReader {
    fn read_mesh(&self, path: &Path, format: MeshFormat) -> Result<Mesh, LoaderError> {
        loaders::read_mesh(path, format)
    }
}

/// Writes SRF files, refusing meshes above a vertex/triangle budget.
#[derive(Debug, Clone, Copy)]
pub struct SrfWriter {
    pub max_vertices: usize,
    pub max_triangles: usize,
}

impl SrfWriter {
    pub fn from_config(config: &SurfaceConfig) -> Self {
        Self {
            max_vertices: config.max_vertices,
            max_triangles: config.max_triangles,
        }
    }
}

impl MeshWriter for SrfWriter {
    fn write_mesh(&self, path: &Path, surface: &SurfaceMesh) -> Result<(), MeshWriteError> {
        let vertices = surface.mesh.num_vertices();
        let faces = surface.mesh.num_faces();
        if vertices > self.max_vertices || faces > self.max_triangles {
            return Err(MeshWriteError::CapacityExceeded {
                vertices,
                faces,
                max_vertices: self.max_vertices,
                max_faces: self.max_triangles,
            });
        }
        write_srf(path, surface)?;
        Ok(())
    }
}

/// Greedy shortest-edge collapse.
#[derive(Debug, Clone, Copy, Default)]
pub struct EdgeCollapseReducer;

impl MeshReducer for EdgeCollapseReducer {
    fn reduce(&self, mesh: &Mesh, proportion: f32) -> Mesh {
        reduce_mesh(mesh, proportion)
    }
}

/// Raised when a capability set is incomplete.
#[derive(Debug, Error)]
#[error("missing mesh capabilities: {}", .missing.join(", "))]
pub struct CapabilityError {
    pub missing: Vec<&'static str>,
}

/// The full set of mesh capabilities the surface converter needs.
pub struct Capabilities {
    pub reader: Box<dyn MeshReader>,
    pub writer: Box<dyn MeshWriter>,
    pub reducer: Box<dyn MeshReducer>,
}

impl Capabilities {
    /// Native implementations, with write limits taken from `config`.
    pub fn native(config: &SurfaceConfig) -> Self {
        Self {
            reader: Box::new(NativeMeshReader),
            writer: Box::new(SrfWriter::from_config(config)),
            reducer: Box::new(EdgeCollapseReducer),
        }
    }

    pub fn builder() -> CapabilitiesBuilder {
        CapabilitiesBuilder::default()
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capabilities").finish_non_exhaustive()
    }
}

/// Collects capabilities one by one and validates the set at the end.
#[derive(Default)]
pub struct CapabilitiesBuilder {
    reader: Option<Box<dyn MeshReader>>,
    writer: Option<Box<dyn MeshWriter>>,
    reducer: Option<Box<dyn MeshReducer>>,
}

impl CapabilitiesBuilder {
    pub fn reader(mut self, reader: impl MeshReader + 'static) -> Self {
        self.reader = Some(Box::new(reader));
        self
    }

    pub fn writer(mut self, writer: impl MeshWriter + 'static) -> Self {
        self.writer = Some(Box::new(writer));
        self
    }

    pub fn reducer(mut self, reducer: impl MeshReducer + 'static) -> Self {
        self.reducer = Some(Box::new(reducer));
        self
    }

    /// Names of the capabilities not yet provided.
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.reader.is_none() {
            missing.push("mesh reader");
        }
        if self.writer.is_none() {
            missing.push("mesh writer");
        }
        if self.reducer.is_none() {
            missing.push("mesh reducer");
        }
        missing
    }

    /// Finishes the set, listing every missing capability on failure.
    pub fn validate(self) -> Result<Capabilities, CapabilityError> {
        let missing = self.missing();
        match (self.reader, self.writer, self.reducer) {
            (Some(reader), Some(writer), Some(reducer)) => Ok(Capabilities {
                reader,
                writer,
                reducer,
            }),
            _ => Err(CapabilityError { missing }),
        }
    }
}
