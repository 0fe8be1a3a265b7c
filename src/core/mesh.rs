//! Triangle mesh container and derived per-vertex data.

use std::collections::HashMap;

/// RGBA colour with components in `0.0..=1.0`.
pub type Rgba = [f32; 4];

/// A triangulated surface: vertex coordinates plus a triangle index list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    /// Vertex coordinates.
    pub vertices: Vec<[f32; 3]>,
    /// Triangles as indices into `vertices`.
    pub faces: Vec<[u32; 3]>,
}

impl Mesh {
    /// Creates a mesh from vertex and face lists.
    pub fn new(vertices: Vec<[f32; 3]>, faces: Vec<[u32; 3]>) -> Self {
        Self { vertices, faces }
    }

    /// Returns the number of vertices.
    #[inline]
    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    /// Returns the number of triangles.
    #[inline]
    pub fn num_faces(&self) -> usize {
        self.faces.len()
    }

    /// Returns true if the mesh has no vertices.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Index of the first face referencing a vertex outside the mesh.
    pub fn first_invalid_face(&self) -> Option<usize> {
        let n = self.vertices.len() as u32;
        self.faces.iter().position(|f| f.iter().any(|&v| v >= n))
    }

    /// Area-weighted vertex normals, normalised to unit length.
    ///
    /// Vertices that belong to no triangle get a zero normal.
    pub fn vertex_normals(&self) -> Vec<[f32; 3]> {
        let mut normals = vec![[0.0f32; 3]; self.vertices.len()];
        for face in &self.faces {
            let [a, b, c] = face.map(|i| self.vertices[i as usize]);
            let u = sub(b, a);
            let v = sub(c, a);
            // cross product length is twice the triangle area
            let n = cross(u, v);
            for &i in face {
                let acc = &mut normals[i as usize];
                acc[0] += n[0];
                acc[1] += n[1];
                acc[2] += n[2];
            }
        }
        for n in &mut normals {
            let len = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
            if len > f32::EPSILON {
                n[0] /= len;
                n[1] /= len;
                n[2] /= len;
            }
        }
        normals
    }

    /// Neighbour ring of every vertex.
    ///
    /// For interior vertices the ring is ordered by walking the triangle fan,
    /// which is the order surface viewers expect. Vertices on a boundary or
    /// with non-manifold fans fall back to ascending index order.
    pub fn neighbor_rings(&self) -> Vec<Vec<u32>> {
        // for each vertex, map "previous neighbour" -> "next neighbour" around the fan
        let mut fans: Vec<HashMap<u32, u32>> = vec![HashMap::new(); self.vertices.len()];
        for &[a, b, c] in &self.faces {
            fans[a as usize].insert(b, c);
            fans[b as usize].insert(c, a);
            fans[c as usize].insert(a, b);
        }

        fans.into_iter()
            .map(|fan| {
                if fan.is_empty() {
                    return Vec::new();
                }
                let start = *fan.keys().min().unwrap_or(&0);
                let mut ring = Vec::with_capacity(fan.len());
                let mut current = start;
                loop {
                    ring.push(current);
                    match fan.get(&current) {
                        Some(&next) if next == start => break,
                        Some(&next) if ring.len() < fan.len() => current = next,
                        _ => break,
                    }
                }
                let closed = ring.len() == fan.len() && fan.get(&current) == Some(&start);
                if closed {
                    return ring;
                }
                // open or non-manifold fan
                let mut all: Vec<u32> = fan.keys().chain(fan.values()).copied().collect();
                all.sort_unstable();
                all.dedup();
                all
            })
            .collect()
    }
}

/// A mesh ready to be persisted, with all derived attributes attached.
#[derive(Debug, Clone)]
pub struct SurfaceMesh {
    pub mesh: Mesh,
    /// Centre of the coordinate system the vertices live in.
    pub center: [f32; 3],
    pub normals: Vec<[f32; 3]>,
    pub neighbors: Vec<Vec<u32>>,
    /// Per-vertex colour index (0 means "use the curvature colours").
    pub vertex_colors: Vec<u32>,
    pub convex_color: Rgba,
    pub concave_color: Rgba,
}

impl SurfaceMesh {
    /// Computes normals and neighbour rings for `mesh` and attaches default colours.
    pub fn build(mesh: Mesh, center: [f32; 3], convex_color: Rgba, concave_color: Rgba) -> Self {
        let normals = mesh.vertex_normals();
        let neighbors = mesh.neighbor_rings();
        let vertex_colors = vec![0; mesh.num_vertices()];
        Self {
            mesh,
            center,
            normals,
            neighbors,
            vertex_colors,
            convex_color,
            concave_color,
        }
    }
}

#[inline]
fn sub(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
fn cross(u: [f32; 3], v: [f32; 3]) -> [f32; 3] {
    [
        u[1] * v[2] - u[2] * v[1],
        u[2] * v[0] - u[0] * v[2],
        u[0] * v[1] - u[1] * v[0],
    ]
}
