//! Configuration types for the conversion pipeline.

use serde::{Deserialize, Serialize};
use std::path::Path;

use thiserror::Error;

/// Errors raised while loading or saving a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Where converted files are written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Name of the output directory created next to the pipeline root
    #[serde(default = "default_output_dir_name")]
    pub dir_name: String,
}

fn default_output_dir_name() -> String {
    "brainvoyager".to_string()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir_name: default_output_dir_name(),
        }
    }
}

/// Surface mesh persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurfaceConfig {
    /// Largest vertex count the SRF writer accepts
    #[serde(default = "default_max_vertices")]
    pub max_vertices: usize,

    /// Largest triangle count the SRF writer accepts
    #[serde(default = "default_max_triangles")]
    pub max_triangles: usize,

    /// RGBA shading colour for convex curvature
    #[serde(default = "default_convex_color")]
    pub convex_color: [f32; 4],

    /// RGBA shading colour for concave curvature
    #[serde(default = "default_concave_color")]
    pub concave_color: [f32; 4],
}

fn default_max_vertices() -> usize {
    300_000
}

fn default_max_triangles() -> usize {
    600_000
}

fn default_convex_color() -> [f32; 4] {
    [0.322, 0.733, 0.980, 0.400]
}

fn default_concave_color() -> [f32; 4] {
    [0.100, 0.240, 0.320, 0.400]
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            max_vertices: default_max_vertices(),
            max_triangles: default_max_triangles(),
            convex_color: default_convex_color(),
            concave_color: default_concave_color(),
        }
    }
}

/// Functional data settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionalConfig {
    /// TR written into MTC files; GIfTI time series carry no reliable TR
    #[serde(default = "default_surface_tr_ms")]
    pub surface_tr_ms: f32,

    /// TR used for VTC files whose NIfTI header has none
    #[serde(default = "default_fallback_tr_ms")]
    pub fallback_tr_ms: f32,
}

fn default_surface_tr_ms() -> f32 {
    2000.0
}

fn default_fallback_tr_ms() -> f32 {
    2000.0
}

impl Default for FunctionalConfig {
    fn default() -> Self {
        Self {
            surface_tr_ms: default_surface_tr_ms(),
            fallback_tr_ms: default_fallback_tr_ms(),
        }
    }
}

/// Confounds table conversion settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfoundsConfig {
    /// Columns to keep, in order (empty keeps every column)
    #[serde(default)]
    pub columns: Vec<String>,
}

/// Main pipeline configuration combining all sub-configs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub surface: SurfaceConfig,

    #[serde(default)]
    pub functional: FunctionalConfig,

    #[serde(default)]
    pub confounds: ConfoundsConfig,
}

impl PipelineConfig {
    /// Load configuration from a YAML file.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a YAML file.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
