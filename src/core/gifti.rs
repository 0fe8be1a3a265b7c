//! Minimal GIfTI reader.
//!
//! Supports the data array encodings written by common neuroimaging tools:
//! `ASCII`, `Base64Binary` and `GZipBase64Binary`, with uint8, int16, int32,
//! float32 and float64 element types. External file storage is rejected.

use std::borrow::Cow;
use std::fs;
use std::io::Read;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use flate2::read::{GzDecoder, ZlibDecoder};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

pub const INTENT_POINTSET: &str = "NIFTI_INTENT_POINTSET";
pub const INTENT_TRIANGLE: &str = "NIFTI_INTENT_TRIANGLE";
pub const INTENT_TIME_SERIES: &str = "NIFTI_INTENT_TIME_SERIES";

/// Errors that can occur while reading a GIfTI file.
#[derive(Debug, Error)]
pub enum GiftiError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("unsupported {what}: {value}")]
    Unsupported { what: &'static str, value: String },

    #[error("invalid data array {index}: {reason}")]
    InvalidArray { index: usize, reason: String },

    #[error("missing data array with intent {0}")]
    MissingIntent(&'static str),
}

pub type Result<T> = std::result::Result<T, GiftiError>;

/// One decoded `<DataArray>`, always stored row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct DataArray {
    pub intent: String,
    pub dims: Vec<usize>,
    pub data: Vec<f64>,
}

impl DataArray {
    /// Number of rows (first dimension).
    pub fn rows(&self) -> usize {
        self.dims.first().copied().unwrap_or(0)
    }

    /// Number of columns (1 for vectors).
    pub fn cols(&self) -> usize {
        self.dims.iter().skip(1).product::<usize>().max(1)
    }
}

/// All data arrays of a GIfTI file in document order.
#[derive(Debug, Clone, Default)]
pub struct GiftiImage {
    pub arrays: Vec<DataArray>,
}

impl GiftiImage {
    /// First array carrying the given intent.
    pub fn find(&self, intent: &'static str) -> Result<&DataArray> {
        self.arrays
            .iter()
            .find(|a| a.intent == intent)
            .ok_or(GiftiError::MissingIntent(intent))
    }

    /// Vertex coordinates of the surface's point set.
    pub fn vertices(&self) -> Result<Vec<[f32; 3]>> {
        let array = self.find(INTENT_POINTSET)?;
        Ok(rows3(array).map(|r| r.map(|v| v as f32)).collect())
    }

    /// Triangle indices of the surface's topology.
    pub fn triangles(&self) -> Result<Vec<[u32; 3]>> {
        let array = self.find(INTENT_TRIANGLE)?;
        Ok(rows3(array).map(|r| r.map(|v| v as u32)).collect())
    }

    /// Per-vertex time courses, shaped `[vertex][timepoint]`.
    ///
    /// Accepts either one array per time point (each a vector over vertices)
    /// or a single 2-D array of shape `vertices x timepoints`.
    pub fn timeseries(&self) -> Result<Vec<Vec<f32>>> {
        let frames: Vec<&DataArray> = self
            .arrays
            .iter()
            .filter(|a| a.intent != INTENT_POINTSET && a.intent != INTENT_TRIANGLE)
            .collect();

        match frames.as_slice() {
            [] => Err(GiftiError::MissingIntent(INTENT_TIME_SERIES)),
            [single] if single.dims.len() == 2 => {
                let (rows, cols) = (single.rows(), single.cols());
                Ok((0..rows)
                    .map(|v| single.data[v * cols..(v + 1) * cols].iter().map(|&x| x as f32).collect())
                    .collect())
            }
            _ => {
                let nv = frames[0].rows();
                if let Some(idx) = frames.iter().position(|f| f.data.len() != nv) {
                    return Err(GiftiError::InvalidArray {
                        index: idx,
                        reason: format!("expected {nv} values, found {}", frames[idx].data.len()),
                    });
                }
                let mut series = vec![Vec::with_capacity(frames.len()); nv];
                for frame in &frames {
                    for (v, &x) in frame.data.iter().enumerate() {
                        series[v].push(x as f32);
                    }
                }
                Ok(series)
            }
        }
    }
}

fn rows3(array: &DataArray) -> impl Iterator<Item = [f64; 3]> + '_ {
    array.data.chunks_exact(3).map(|c| [c[0], c[1], c[2]])
}

/// Reads and decodes a GIfTI file.
pub fn read_gifti<P: AsRef<Path>>(path: P) -> Result<GiftiImage> {
    let text = fs::read_to_string(path)?;
    parse_gifti(&text)
}

/// Attributes of a `<DataArray>` element needed for decoding.
#[derive(Debug, Default)]
struct ArrayHeader {
    intent: String,
    data_type: String,
    encoding: String,
    endian: String,
    column_major: bool,
    dims: Vec<usize>,
}

/// Decodes GIfTI XML text.
pub fn parse_gifti(xml: &str) -> Result<GiftiImage> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut image = GiftiImage::default();
    let mut header: Option<ArrayHeader> = None;
    let mut payload = String::new();
    let mut in_data = false;

    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Start(e) if e.name().as_ref() == b"DataArray" => {
                header = Some(parse_header(&e, image.arrays.len())?);
                payload.clear();
            }
            Event::Start(e) if e.name().as_ref() == b"Data" => in_data = true,
            Event::Text(t) if in_data => payload.push_str(&t.unescape().map_err(xml_err)?),
            Event::CData(c) if in_data => payload.push_str(&String::from_utf8_lossy(&c.into_inner())),
            Event::End(e) if e.name().as_ref() == b"Data" => in_data = false,
            Event::End(e) if e.name().as_ref() == b"DataArray" => {
                let index = image.arrays.len();
                let head = header.take().ok_or_else(|| GiftiError::InvalidArray {
                    index,
                    reason: "closing tag without header".to_string(),
                })?;
                image.arrays.push(decode_array(head, &payload, index)?);
                payload.clear();
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(image)
}

fn xml_err<E: std::fmt::Display>(e: E) -> GiftiError {
    GiftiError::Xml(e.to_string())
}

fn parse_header(e: &BytesStart<'_>, index: usize) -> Result<ArrayHeader> {
    let mut head = ArrayHeader {
        endian: "LittleEndian".to_string(),
        ..ArrayHeader::default()
    };
    let mut ndim = 0usize;
    let mut dims = [0usize; 8];

    for attr in e.attributes() {
        let attr = attr.map_err(xml_err)?;
        let value: Cow<'_, str> = attr.unescape_value().map_err(xml_err)?;
        match attr.key.as_ref() {
            b"Intent" => head.intent = value.into_owned(),
            b"DataType" => head.data_type = value.into_owned(),
            b"Encoding" => head.encoding = value.into_owned(),
            b"Endian" => head.endian = value.into_owned(),
            b"ArrayIndexingOrder" => head.column_major = value == "ColumnMajorOrder",
            b"Dimensionality" => ndim = parse_usize(&value, index)?,
            key if key.starts_with(b"Dim") => {
                let slot = std::str::from_utf8(&key[3..])
                    .ok()
                    .and_then(|s| s.parse::<usize>().ok())
                    .filter(|&i| i < dims.len());
                if let Some(i) = slot {
                    dims[i] = parse_usize(&value, index)?;
                }
            }
            _ => {}
        }
    }

    head.dims = dims[..ndim.min(dims.len())].to_vec();
    Ok(head)
}

fn parse_usize(value: &str, index: usize) -> Result<usize> {
    value.trim().parse().map_err(|_| GiftiError::InvalidArray {
        index,
        reason: format!("invalid integer attribute '{value}'"),
    })
}

fn decode_array(head: ArrayHeader, payload: &str, index: usize) -> Result<DataArray> {
    let expected: usize = head.dims.iter().product();

    let mut data = match head.encoding.as_str() {
        "ASCII" => payload
            .split_whitespace()
            .map(|tok| {
                tok.parse::<f64>().map_err(|_| GiftiError::InvalidArray {
                    index,
                    reason: format!("invalid ASCII value '{tok}'"),
                })
            })
            .collect::<Result<Vec<f64>>>()?,
        "Base64Binary" | "GZipBase64Binary" => {
            let compact: String = payload.split_whitespace().collect();
            let raw = STANDARD.decode(compact.as_bytes()).map_err(|e| GiftiError::InvalidArray {
                index,
                reason: format!("base64: {e}"),
            })?;
            let bytes = if head.encoding == "GZipBase64Binary" {
                inflate(&raw)?
            } else {
                raw
            };
            decode_binary(&bytes, &head.data_type, &head.endian)?
        }
        other => {
            return Err(GiftiError::Unsupported {
                what: "encoding",
                value: other.to_string(),
            })
        }
    };

    if data.len() != expected {
        return Err(GiftiError::InvalidArray {
            index,
            reason: format!("expected {expected} values, decoded {}", data.len()),
        });
    }

    if head.column_major && head.dims.len() == 2 {
        data = transpose(&data, head.dims[0], head.dims[1]);
    }

    Ok(DataArray {
        intent: head.intent,
        dims: head.dims,
        data,
    })
}

/// The "GZip" encoding is zlib in practice, but accept real gzip streams too.
fn inflate(raw: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(raw.len() * 4);
    if raw.starts_with(&[0x1f, 0x8b]) {
        GzDecoder::new(raw).read_to_end(&mut out)?;
    } else {
        ZlibDecoder::new(raw).read_to_end(&mut out)?;
    }
    Ok(out)
}

fn decode_binary(bytes: &[u8], data_type: &str, endian: &str) -> Result<Vec<f64>> {
    let big = endian == "BigEndian";
    let values = match data_type {
        "NIFTI_TYPE_UINT8" => bytes.iter().map(|&b| f64::from(b)).collect(),
        "NIFTI_TYPE_INT16" => bytes
            .chunks_exact(2)
            .map(|c| f64::from(if big { BigEndian::read_i16(c) } else { LittleEndian::read_i16(c) }))
            .collect(),
        "NIFTI_TYPE_INT32" => bytes
            .chunks_exact(4)
            .map(|c| f64::from(if big { BigEndian::read_i32(c) } else { LittleEndian::read_i32(c) }))
            .collect(),
        "NIFTI_TYPE_FLOAT32" => bytes
            .chunks_exact(4)
            .map(|c| f64::from(if big { BigEndian::read_f32(c) } else { LittleEndian::read_f32(c) }))
            .collect(),
        "NIFTI_TYPE_FLOAT64" => bytes
            .chunks_exact(8)
            .map(|c| if big { BigEndian::read_f64(c) } else { LittleEndian::read_f64(c) })
            .collect(),
        other => {
            return Err(GiftiError::Unsupported {
                what: "data type",
                value: other.to_string(),
            })
        }
    };
    Ok(values)
}

fn transpose(data: &[f64], rows: usize, cols: usize) -> Vec<f64> {
    let mut out = vec![0.0; data.len()];
    for r in 0..rows {
        for c in 0..cols {
            out[r * cols + c] = data[c * rows + r];
        }
    }
    out
}
