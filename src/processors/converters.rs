//! Per-category converters.
//!
//! [`Converter`] has one method per file category. [`BrainVoyagerConverter`]
//! is the real implementation; the orchestrator only sees the trait.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, warn};
use thiserror::Error;

use crate::config::{ConfoundsConfig, FunctionalConfig, PipelineConfig};
use crate::core::gifti::read_gifti;
use crate::core::loaders::read_confounds_tsv;
use crate::core::nifti::{read_nifti, NiftiVolume};
use crate::core::transforms::Affine;
use crate::core::writers::{
    write_mtc, write_sdm, write_vmr, write_vtc, DesignMatrix, MtcData, VmrVolume, VtcData,
};

use super::capabilities::Capabilities;
use super::surface::SurfaceConverter;

/// Largest intensity stored in a VMR.
pub const VMR_MAX_INTENSITY: f32 = 225.0;

const NIFTI_SUFFIXES: &[&str] = &[".nii.gz", ".nii"];

/// Predictor colours for SDM files, cycled when there are more predictors.
const PREDICTOR_COLORS: [[u8; 3]; 8] = [
    [255, 0, 0],
    [0, 255, 0],
    [0, 0, 255],
    [255, 255, 0],
    [255, 0, 255],
    [0, 255, 255],
    [255, 128, 0],
    [128, 0, 255],
];

/// Raised before any work when a source or target has the wrong extension.
#[derive(Debug, Error)]
#[error("Unsupported extension for {path} (expected one of {expected:?})")]
pub struct UnsupportedExtension {
    pub path: PathBuf,
    pub expected: &'static [&'static str],
}

/// One conversion per file category.
pub trait Converter {
    fn anatomical(&self, target: &Path, source: &Path) -> Result<()>;

    /// Returns the path actually written, which may differ from `target`.
    fn surface(&self, target: &Path, source: &Path, transform: &Affine) -> Result<PathBuf>;

    fn volume_timeseries(&self, target: &Path, source: &Path) -> Result<()>;

    fn surface_timeseries(&self, target: &Path, source: &Path) -> Result<()>;

    fn confounds(&self, target: &Path, source: &Path) -> Result<()>;
}

/// Converts fMRIPrep derivatives to BrainVoyager formats.
#[derive(Debug)]
pub struct BrainVoyagerConverter {
    surface: SurfaceConverter,
    functional: FunctionalConfig,
    confounds: ConfoundsConfig,
}

impl BrainVoyagerConverter {
    pub fn new(config: &PipelineConfig, capabilities: Capabilities) -> Self {
        Self {
            surface: SurfaceConverter::new(capabilities, &config.surface),
            functional: config.functional.clone(),
            confounds: config.confounds.clone(),
        }
    }
}

impl Converter for BrainVoyagerConverter {
    fn anatomical(&self, target: &Path, source: &Path) -> Result<()> {
        require_suffix(source, NIFTI_SUFFIXES)?;
        require_suffix(target, &[".vmr"])?;

        let volume = read_nifti(source)?;
        if volume.num_frames() > 1 {
            warn!(
                "{} has {} frames; using the first",
                source.display(),
                volume.num_frames()
            );
        }
        write_vmr(target, &nifti_to_vmr(&volume))?;
        Ok(())
    }

    fn surface(&self, target: &Path, source: &Path, transform: &Affine) -> Result<PathBuf> {
        Ok(self.surface.convert(target, source, transform)?)
    }

    fn volume_timeseries(&self, target: &Path, source: &Path) -> Result<()> {
        require_suffix(source, NIFTI_SUFFIXES)?;
        require_suffix(target, &[".vtc"])?;

        let volume = read_nifti(source)?;
        let tr_ms = match volume.tr_seconds {
            Some(tr) => tr * 1000.0,
            None => {
                warn!(
                    "{} has no TR, using {} ms",
                    source.display(),
                    self.functional.fallback_tr_ms
                );
                self.functional.fallback_tr_ms
            }
        };
        write_vtc(target, &nifti_to_vtc(&volume, tr_ms))?;
        Ok(())
    }

    fn surface_timeseries(&self, target: &Path, source: &Path) -> Result<()> {
        require_suffix(source, &[".func.gii"])?;
        require_suffix(target, &[".mtc"])?;

        let series = read_gifti(source)?.timeseries()?;
        let num_vertices = series.len();
        let num_timepoints = series.first().map_or(0, Vec::len);
        debug!(
            "{}: {} vertices x {} time points",
            source.display(),
            num_vertices,
            num_timepoints
        );
        let mtc = MtcData {
            num_vertices,
            num_timepoints,
            tr_ms: self.functional.surface_tr_ms,
            data: series.into_iter().flatten().collect(),
        };
        write_mtc(target, &mtc)?;
        Ok(())
    }

    fn confounds(&self, target: &Path, source: &Path) -> Result<()> {
        require_suffix(source, &[".tsv"])?;
        require_suffix(target, &[".sdm"])?;

        let mut table = read_confounds_tsv(source)?;
        if !self.confounds.columns.is_empty() {
            let (selected, missing) = table.select(&self.confounds.columns);
            if !missing.is_empty() {
                warn!("{}: columns not found: {}", source.display(), missing.join(", "));
            }
            table = selected;
        }

        let sdm = DesignMatrix {
            colors: (0..table.columns.len())
                .map(|i| PREDICTOR_COLORS[i % PREDICTOR_COLORS.len()])
                .collect(),
            names: table.columns,
            rows: table.rows,
        };
        write_sdm(target, &sdm).with_context(|| format!("writing {} predictors", sdm.names.len()))?;
        Ok(())
    }
}

fn require_suffix(path: &Path, expected: &'static [&'static str]) -> Result<(), UnsupportedExtension> {
    let ok = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| expected.iter().any(|s| n.ends_with(s)));
    if ok {
        Ok(())
    } else {
        Err(UnsupportedExtension {
            path: path.to_path_buf(),
            expected,
        })
    }
}

/// BrainVoyager grid size for a NIfTI grid: `(y, z, x)`.
fn bv_dims(volume: &NiftiVolume) -> [usize; 3] {
    let [nx, ny, nz, _] = volume.dims;
    [ny, nz, nx]
}

/// NIfTI voxel index `(i, j, k)` for BrainVoyager voxel `(bx, by, bz)`.
///
/// BrainVoyager axes run anterior to posterior, superior to inferior and
/// right to left, the reverse of RAS on every axis.
#[inline]
fn nifti_index(volume: &NiftiVolume, bx: usize, by: usize, bz: usize) -> (usize, usize, usize) {
    let [nx, ny, nz, _] = volume.dims;
    (nx - 1 - bz, ny - 1 - bx, nz - 1 - by)
}

/// Rescales the first frame to `0..=225` in BrainVoyager voxel order.
pub fn nifti_to_vmr(volume: &NiftiVolume) -> VmrVolume {
    let dims = bv_dims(volume);
    let [dx, dy, dz] = dims;
    let frame = &volume.data[..volume.frame_len()];
    let (min, max) = frame
        .iter()
        .filter(|v| v.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let range = max - min;
    let scale = if range > 0.0 { VMR_MAX_INTENSITY / range } else { 0.0 };

    let mut data = Vec::with_capacity(dx * dy * dz);
    for bz in 0..dz {
        for by in 0..dy {
            for bx in 0..dx {
                let (i, j, k) = nifti_index(volume, bx, by, bz);
                let v = volume.at(i, j, k, 0);
                let scaled = if v.is_finite() { ((v - min) * scale).round() } else { 0.0 };
                data.push(scaled.clamp(0.0, VMR_MAX_INTENSITY) as u8);
            }
        }
    }

    let [vx, vy, vz] = volume.voxel_size;
    VmrVolume {
        dims,
        voxel_size: [vy, vz, vx],
        data,
    }
}

/// Reorders a 4-D volume into VTC layout (time fastest).
pub fn nifti_to_vtc(volume: &NiftiVolume, tr_ms: f32) -> VtcData {
    let dims = bv_dims(volume);
    let [dx, dy, dz] = dims;
    let nt = volume.num_frames();

    let mut data = Vec::with_capacity(dx * dy * dz * nt);
    for bz in 0..dz {
        for by in 0..dy {
            for bx in 0..dx {
                let (i, j, k) = nifti_index(volume, bx, by, bz);
                data.extend((0..nt).map(|t| volume.at(i, j, k, t)));
            }
        }
    }

    VtcData {
        dims,
        resolution: volume.voxel_size[0].round().max(1.0) as u16,
        num_volumes: nt,
        tr_ms,
        data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::nifti::tests::nifti_bytes;
    use std::fs;
    use tempfile::tempdir;

    fn converter(config: &PipelineConfig) -> BrainVoyagerConverter {
        BrainVoyagerConverter::new(config, Capabilities::native(&config.surface))
    }

    fn ramp(dims: [usize; 4]) -> NiftiVolume {
        let n: usize = dims.iter().product();
        NiftiVolume {
            dims,
            voxel_size: [1.0, 2.0, 3.0],
            tr_seconds: Some(1.5),
            data: (0..n).map(|v| v as f32).collect(),
        }
    }

    #[test]
    fn test_vmr_rescale_and_axis_order() {
        let volume = ramp([2, 3, 4, 1]);
        let vmr = nifti_to_vmr(&volume);

        assert_eq!(vmr.dims, [3, 4, 2]);
        assert_eq!(vmr.voxel_size, [2.0, 3.0, 1.0]);
        assert_eq!(vmr.data.len(), 24);
        // BV origin is the NIfTI corner (nx-1, ny-1, nz-1), the maximum
        assert_eq!(vmr.data[0], 225);
        assert_eq!(*vmr.data.last().unwrap(), 0);
        assert!(vmr.data.iter().all(|&v| v <= 225));
    }

    #[test]
    fn test_vmr_constant_volume() {
        let volume = NiftiVolume {
            dims: [2, 2, 2, 1],
            voxel_size: [1.0; 3],
            tr_seconds: None,
            data: vec![7.0; 8],
        };
        assert!(nifti_to_vmr(&volume).data.iter().all(|&v| v == 0));
    }

    #[test]
    fn test_vtc_time_is_fastest() {
        let volume = ramp([2, 2, 2, 3]);
        let vtc = nifti_to_vtc(&volume, 1500.0);

        assert_eq!(vtc.num_volumes, 3);
        assert_eq!(vtc.resolution, 1);
        assert_eq!(vtc.data.len(), 24);
        // first BV voxel is NIfTI (1, 1, 1): index 7 in frame 0, +8 per frame
        assert_eq!(&vtc.data[..3], &[7.0, 15.0, 23.0]);
    }

    #[test]
    fn test_anatomical_and_volume_timeseries_files() {
        let dir = tempdir().unwrap();
        let config = PipelineConfig::default();
        let conv = converter(&config);

        let t1 = dir.path().join("sub-01_desc-preproc_T1w.nii");
        fs::write(&t1, nifti_bytes(&[2, 2, 2], [1.0; 3], 0.0, &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0])).unwrap();
        let vmr = dir.path().join("out/sub-01_desc-preproc_T1w.vmr");
        conv.anatomical(&vmr, &t1).unwrap();
        let bytes = fs::read(&vmr).unwrap();
        assert_eq!(&bytes[..8], &[4, 0, 2, 0, 2, 0, 2, 0]);

        let bold = dir.path().join("sub-01_task-a_desc-preproc_bold.nii");
        fs::write(&bold, nifti_bytes(&[1, 1, 1, 4], [3.0; 3], 2.0, &[1.0, 2.0, 3.0, 4.0])).unwrap();
        let vtc = dir.path().join("out/sub-01_task-a_desc-preproc_bold.vtc");
        conv.volume_timeseries(&vtc, &bold).unwrap();
        assert!(vtc.exists());
    }

    #[test]
    fn test_wrong_extensions_are_rejected_before_reading() {
        let conv = converter(&PipelineConfig::default());
        let err = conv
            .anatomical(Path::new("/out/a.vmr"), Path::new("/missing/a.mgz"))
            .unwrap_err();
        assert!(err.downcast_ref::<UnsupportedExtension>().is_some());

        let err = conv
            .confounds(Path::new("/out/a.txt"), Path::new("/missing/a.tsv"))
            .unwrap_err();
        assert!(err.downcast_ref::<UnsupportedExtension>().is_some());
    }

    #[test]
    fn test_confounds_with_column_selection() {
        let dir = tempdir().unwrap();
        let tsv = dir.path().join("sub-01_desc-confounds_timeseries.tsv");
        fs::write(&tsv, "trans_x\ttrans_y\trot_z\n0.1\tn/a\t0.3\n0.2\t0.5\t0.6\n").unwrap();

        let mut config = PipelineConfig::default();
        config.confounds.columns = vec!["rot_z".to_string(), "trans_x".to_string(), "csf".to_string()];
        let sdm = dir.path().join("sub-01_desc-confounds_timeseries.sdm");
        converter(&config).confounds(&sdm, &tsv).unwrap();

        let text = fs::read_to_string(&sdm).unwrap();
        assert!(text.contains("NrOfPredictors:         2"));
        assert!(text.contains("NrOfDataPoints:         2"));
        assert!(text.contains("\"rot_z\" \"trans_x\""));
    }
}
