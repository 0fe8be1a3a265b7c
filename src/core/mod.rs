//! Core data types and file formats.

pub mod decimate;
pub mod gifti;
pub mod loaders;
pub mod mesh;
pub mod nifti;
pub mod paths;
pub mod transforms;
pub mod writers;

pub use mesh::{Mesh, SurfaceMesh};
pub use transforms::Affine;
pub use writers::WriteError;
