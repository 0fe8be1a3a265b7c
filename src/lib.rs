//! Conversion of fMRIPrep derivatives into BrainVoyager layouts and formats.
//!
//! This crate provides tools for:
//! - Discovering subjects and classifying their files by naming pattern
//! - Planning target names and directories, nested by session where needed
//! - Converting volumes, surfaces, time series and confounds idempotently
//! - Reducing surface meshes that exceed the SRF size budget and retrying
//!
//! # Example
//!
//! ```no_run
//! use bv_pipeline::processors::{FileClassifier, ManifestBuilder, OutputPathPlanner};
//! use std::path::Path;
//!
//! let root = Path::new("/data/derivatives/fmriprep");
//! let builder = ManifestBuilder::new(FileClassifier::new().unwrap());
//! let planner = OutputPathPlanner::sibling_of(root, "brainvoyager");
//! for manifest in builder.build(root, &[]).unwrap() {
//!     let plan = planner.plan(&manifest).unwrap();
//!     println!("{}: {} directories", manifest.subject, plan.directories().len());
//! }
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod processors;

pub use config::{ConfoundsConfig, FunctionalConfig, OutputConfig, PipelineConfig, SurfaceConfig};
pub use core::mesh::{Mesh, SurfaceMesh};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
