//! Coordinate transformations for surface vertices.
//!
//! Surfaces arrive in scanner RAS millimetres centred on the origin.
//! BrainVoyager expects its own axis order (anterior→posterior,
//! superior→inferior, right→left) inside a 256 mm framing cube, so every
//! vertex goes through a fixed permutation/reflection and a centre offset
//! before the subject-specific affine is applied.

use std::fmt;

/// Half the edge length of the BrainVoyager framing cube, in millimetres.
pub const HALF_EXTENT: f32 = 128.0;

/// Axis permutation from RAS `(x, y, z)` to BrainVoyager `(y, z, x)`.
///
/// Combined with the subtraction in [`to_brainvoyager`] this also flips
/// every axis.
pub const RAS_TO_BV_AXES: [[f32; 3]; 3] = [
    [0.0, 1.0, 0.0],
    [0.0, 0.0, 1.0],
    [1.0, 0.0, 0.0],
];

/// A 4×4 affine transform stored row-major.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine(pub [[f64; 4]; 4]);

impl Affine {
    /// The identity transform.
    pub const IDENTITY: Affine = Affine([
        [1.0, 0.0, 0.0, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ]);

    /// Builds an affine from 16 row-major values, or 12 values of the top
    /// three rows with the `0 0 0 1` row implied.
    pub fn from_row_major(values: &[f64]) -> Option<Self> {
        let mut m = Self::IDENTITY.0;
        match values.len() {
            16 | 12 => {
                for (i, &v) in values.iter().enumerate() {
                    m[i / 4][i % 4] = v;
                }
                Some(Affine(m))
            }
            _ => None,
        }
    }

    /// Returns true if this is exactly the identity.
    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    /// Applies the transform to a single point.
    #[inline]
    pub fn apply(&self, p: [f32; 3]) -> [f32; 3] {
        let m = &self.0;
        let (x, y, z) = (p[0] as f64, p[1] as f64, p[2] as f64);
        let mut out = [0.0f64; 4];
        for (row, o) in m.iter().zip(out.iter_mut()) {
            *o = row[0] * x + row[1] * y + row[2] * z + row[3];
        }
        // projective row is [0 0 0 1] for real affines
        let w = if out[3].abs() > f64::EPSILON { out[3] } else { 1.0 };
        [(out[0] / w) as f32, (out[1] / w) as f32, (out[2] / w) as f32]
    }

    /// Applies the transform to every vertex in place.
    pub fn apply_all(&self, vertices: &mut [[f32; 3]]) {
        if self.is_identity() {
            return;
        }
        for v in vertices.iter_mut() {
            *v = self.apply(*v);
        }
    }
}

impl Default for Affine {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl fmt::Display for Affine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, row) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{:.4} {:.4} {:.4} {:.4}", row[0], row[1], row[2], row[3])?;
        }
        Ok(())
    }
}

/// Maps one RAS point into the BrainVoyager convention.
#[inline]
pub fn to_brainvoyager(p: [f32; 3]) -> [f32; 3] {
    let mut out = [0.0f32; 3];
    for (row, o) in RAS_TO_BV_AXES.iter().zip(out.iter_mut()) {
        *o = HALF_EXTENT - (row[0] * p[0] + row[1] * p[1] + row[2] * p[2]);
    }
    out
}

/// Remaps all vertices from RAS into the BrainVoyager convention in place.
pub fn remap_to_brainvoyager(vertices: &mut [[f32; 3]]) {
    for v in vertices.iter_mut() {
        *v = to_brainvoyager(*v);
    }
}
