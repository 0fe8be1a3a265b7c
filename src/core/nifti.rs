//! NIfTI-1 single-file (`.nii`, `.nii.gz`) volume reader.

use std::fs;
use std::io::Read;
use std::path::Path;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use flate2::read::GzDecoder;
use thiserror::Error;

const HEADER_SIZE: usize = 348;

/// Errors that can occur while reading a NIfTI file.
#[derive(Debug, Error)]
pub enum NiftiError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a NIfTI-1 file (header size field is not 348)")]
    NotNifti,

    #[error("unsupported NIfTI {what}: {value}")]
    Unsupported { what: &'static str, value: String },

    #[error("truncated image data: expected {expected} bytes after offset, found {found}")]
    Truncated { expected: usize, found: usize },
}

pub type Result<T> = std::result::Result<T, NiftiError>;

/// A decoded NIfTI volume with scaling applied.
#[derive(Debug, Clone, PartialEq)]
pub struct NiftiVolume {
    /// Grid size `[nx, ny, nz, nt]`; missing dimensions are 1.
    pub dims: [usize; 4],
    /// Voxel edge lengths in millimetres.
    pub voxel_size: [f32; 3],
    /// Repetition time in seconds, when the header carries one.
    pub tr_seconds: Option<f32>,
    /// Samples with x varying fastest, then y, z and t.
    pub data: Vec<f32>,
}

impl NiftiVolume {
    /// Number of voxels in one 3-D frame.
    pub fn frame_len(&self) -> usize {
        self.dims[0] * self.dims[1] * self.dims[2]
    }

    /// Number of frames (time points).
    pub fn num_frames(&self) -> usize {
        self.dims[3]
    }

    /// Sample at voxel `(i, j, k)` of frame `t`.
    #[inline]
    pub fn at(&self, i: usize, j: usize, k: usize, t: usize) -> f32 {
        let [nx, ny, nz, _] = self.dims;
        self.data[((t * nz + k) * ny + j) * nx + i]
    }
}

#[derive(Clone, Copy)]
enum Endian {
    Little,
    Big,
}

impl Endian {
    fn i16(self, b: &[u8]) -> i16 {
        match self {
            Endian::Little => LittleEndian::read_i16(b),
            Endian::Big => BigEndian::read_i16(b),
        }
    }

    fn i32(self, b: &[u8]) -> i32 {
        match self {
            Endian::Little => LittleEndian::read_i32(b),
            Endian::Big => BigEndian::read_i32(b),
        }
    }

    fn u16(self, b: &[u8]) -> u16 {
        match self {
            Endian::Little => LittleEndian::read_u16(b),
            Endian::Big => BigEndian::read_u16(b),
        }
    }

    fn u32(self, b: &[u8]) -> u32 {
        match self {
            Endian::Little => LittleEndian::read_u32(b),
            Endian::Big => BigEndian::read_u32(b),
        }
    }

    fn f32(self, b: &[u8]) -> f32 {
        match self {
            Endian::Little => LittleEndian::read_f32(b),
            Endian::Big => BigEndian::read_f32(b),
        }
    }

    fn f64(self, b: &[u8]) -> f64 {
        match self {
            Endian::Little => LittleEndian::read_f64(b),
            Endian::Big => BigEndian::read_f64(b),
        }
    }
}

/// Reads a NIfTI-1 file, transparently inflating gzip-compressed input.
pub fn read_nifti<P: AsRef<Path>>(path: P) -> Result<NiftiVolume> {
    let raw = fs::read(path)?;
    if raw.starts_with(&[0x1f, 0x8b]) {
        let mut bytes = Vec::with_capacity(raw.len() * 3);
        GzDecoder::new(raw.as_slice()).read_to_end(&mut bytes)?;
        parse_nifti(&bytes)
    } else {
        parse_nifti(&raw)
    }
}

/// Decodes an uncompressed NIfTI-1 byte stream.
pub fn parse_nifti(bytes: &[u8]) -> Result<NiftiVolume> {
    if bytes.len() < HEADER_SIZE {
        return Err(NiftiError::NotNifti);
    }
    let endian = if LittleEndian::read_i32(&bytes[0..4]) == HEADER_SIZE as i32 {
        Endian::Little
    } else if BigEndian::read_i32(&bytes[0..4]) == HEADER_SIZE as i32 {
        Endian::Big
    } else {
        return Err(NiftiError::NotNifti);
    };

    let magic = &bytes[344..348];
    if magic != b"n+1\0" {
        return Err(NiftiError::Unsupported {
            what: "magic",
            value: String::from_utf8_lossy(magic).into_owned(),
        });
    }

    let mut dim = [0i16; 8];
    for (i, d) in dim.iter_mut().enumerate() {
        *d = endian.i16(&bytes[40 + 2 * i..]);
    }
    let ndim = dim[0];
    if !(1..=4).contains(&ndim) {
        return Err(NiftiError::Unsupported {
            what: "dimensionality",
            value: ndim.to_string(),
        });
    }
    let mut dims = [1usize; 4];
    for (i, slot) in dims.iter_mut().enumerate().take(ndim as usize) {
        *slot = dim[i + 1].max(1) as usize;
    }

    let datatype = endian.i16(&bytes[70..]);
    let mut pixdim = [0f32; 8];
    for (i, p) in pixdim.iter_mut().enumerate() {
        *p = endian.f32(&bytes[76 + 4 * i..]);
    }
    let vox_offset = endian.f32(&bytes[108..]).max(HEADER_SIZE as f32) as usize;
    let slope = endian.f32(&bytes[112..]);
    let inter = endian.f32(&bytes[116..]);
    let xyzt_units = bytes[123];

    let count: usize = dims.iter().product();
    let width = element_width(datatype)?;
    let available = bytes.len().saturating_sub(vox_offset);
    if available < count * width {
        return Err(NiftiError::Truncated {
            expected: count * width,
            found: available,
        });
    }

    let payload = &bytes[vox_offset..vox_offset + count * width];
    let mut data: Vec<f32> = payload
        .chunks_exact(width)
        .map(|c| decode_sample(c, datatype, endian))
        .collect();

    if slope != 0.0 && slope.is_finite() && !(slope == 1.0 && inter == 0.0) {
        for v in &mut data {
            *v = *v * slope + inter;
        }
    }

    let tr_seconds = (ndim == 4 && pixdim[4] > 0.0).then(|| {
        match xyzt_units & 0x18 {
            0x10 => pixdim[4] / 1_000.0,
            0x18 => pixdim[4] / 1_000_000.0,
            _ => pixdim[4],
        }
    });

    Ok(NiftiVolume {
        dims,
        voxel_size: [pixdim[1].abs(), pixdim[2].abs(), pixdim[3].abs()],
        tr_seconds,
        data,
    })
}

fn element_width(datatype: i16) -> Result<usize> {
    Ok(match datatype {
        2 | 256 => 1,
        4 | 512 => 2,
        8 | 16 | 768 => 4,
        64 => 8,
        other => {
            return Err(NiftiError::Unsupported {
                what: "datatype",
                value: other.to_string(),
            })
        }
    })
}

fn decode_sample(c: &[u8], datatype: i16, endian: Endian) -> f32 {
    match datatype {
        2 => c[0] as f32,
        256 => c[0] as i8 as f32,
        4 => endian.i16(c) as f32,
        512 => endian.u16(c) as f32,
        8 => endian.i32(c) as f32,
        768 => endian.u32(c) as f32,
        16 => endian.f32(c),
        64 => endian.f64(c) as f32,
        _ => 0.0,
    }
}
