//! Discovery, planning and conversion stages.

pub mod capabilities;
pub mod classify;
pub mod converters;
pub mod manifest;
pub mod orchestrator;
pub mod planner;
pub mod surface;

// Re-export key types for convenience
pub use capabilities::{
    Capabilities, CapabilityError, EdgeCollapseReducer, MeshReader, MeshReducer, MeshWriteError,
    MeshWriter, NativeMeshReader, SrfWriter,
};
pub use classify::{ClassifyError, FileCategory, FileClassifier, SourceFile};
pub use converters::{BrainVoyagerConverter, Converter};
pub use manifest::{ManifestBuilder, ManifestError, SubjectManifest};
pub use orchestrator::{CategoryReport, ConversionOrchestrator, ConversionReport};
pub use planner::{OutputPathPlanner, PlanError, TargetPlan};
pub use surface::{SurfaceConverter, SurfaceError};
