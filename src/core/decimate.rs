//! Greedy shortest-edge-collapse mesh reduction.
//!
//! Edges are collapsed to their midpoint, shortest first, until the number
//! of surviving triangles reaches the requested proportion. Ties are broken
//! by vertex index so the result is fully deterministic.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use super::mesh::Mesh;

/// Heap entry: squared length bits, endpoints, and the endpoint stamps at push time.
type EdgeEntry = Reverse<(u32, u32, u32, u32, u32)>;

/// Resolution of the retention proportion, in parts per unit.
const BASIS_POINTS: u64 = 10_000;

/// Number of faces a reduction to `proportion` aims for.
///
/// The proportion is snapped to basis points first, so `0.99` of 100 faces
/// is exactly 99 rather than whatever the widened `f32` rounds up to.
pub fn target_face_count(faces: usize, proportion: f32) -> usize {
    let bp = (proportion.clamp(0.0, 1.0) as f64 * BASIS_POINTS as f64).round() as u64;
    (faces as u64 * bp).div_ceil(BASIS_POINTS) as usize
}

/// Reduces `mesh` to roughly `proportion` of its current triangle count.
///
/// The face count of the result is at most `ceil(faces * proportion)` unless
/// the mesh runs out of collapsible edges first. Unreferenced vertices are
/// dropped and the remaining ones keep their relative order.
///
/// # Example
///
/// ```
/// use bv_pipeline::core::decimate::reduce_mesh;
/// use bv_pipeline::core::mesh::Mesh;
///
/// let mesh = Mesh::new(
///     vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 1.0, 0.0]],
///     vec![[0, 1, 2], [1, 3, 2]],
/// );
/// let reduced = reduce_mesh(&mesh, 0.5);
/// assert!(reduced.num_faces() <= 1);
/// ```
pub fn reduce_mesh(mesh: &Mesh, proportion: f32) -> Mesh {
    let total = mesh.num_faces();
    if total == 0 || proportion >= 1.0 {
        return mesh.clone();
    }
    let target = target_face_count(total, proportion);

    let n = mesh.num_vertices();
    let mut vertices = mesh.vertices.clone();
    let mut faces = mesh.faces.clone();
    let mut face_alive = vec![true; total];
    let mut alive = total;
    let mut vertex_alive = vec![true; n];
    let mut stamp = vec![0u32; n];

    let mut vertex_faces: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (fi, face) in faces.iter().enumerate() {
        for &v in face {
            vertex_faces[v as usize].push(fi);
        }
    }

    let mut heap: BinaryHeap<EdgeEntry> = BinaryHeap::with_capacity(total * 3);
    for face in &faces {
        for (a, b) in face_edges(face) {
            push_edge(&mut heap, &vertices, &stamp, a, b);
        }
    }

    while alive > target {
        let Some(Reverse((_, u, v, su, sv))) = heap.pop() else {
            break;
        };
        let (ui, vi) = (u as usize, v as usize);
        if !vertex_alive[ui] || !vertex_alive[vi] || stamp[ui] != su || stamp[vi] != sv {
            continue;
        }

        // collapse v into u at the edge midpoint
        let (pu, pv) = (vertices[ui], vertices[vi]);
        vertices[ui] = [
            (pu[0] + pv[0]) * 0.5,
            (pu[1] + pv[1]) * 0.5,
            (pu[2] + pv[2]) * 0.5,
        ];
        vertex_alive[vi] = false;
        stamp[ui] += 1;

        for fi in std::mem::take(&mut vertex_faces[vi]) {
            if !face_alive[fi] {
                continue;
            }
            let face = &mut faces[fi];
            for idx in face.iter_mut() {
                if *idx == v {
                    *idx = u;
                }
            }
            if face[0] == face[1] || face[1] == face[2] || face[0] == face[2] {
                face_alive[fi] = false;
                alive -= 1;
            } else {
                vertex_faces[ui].push(fi);
            }
        }
        vertex_faces[ui].retain(|&fi| face_alive[fi]);
        vertex_faces[ui].sort_unstable();
        vertex_faces[ui].dedup();

        for &fi in &vertex_faces[ui] {
            for &w in &faces[fi] {
                if w != u {
                    push_edge(&mut heap, &vertices, &stamp, u, w);
                }
            }
        }
    }

    compact(&vertices, &faces, &face_alive)
}

fn face_edges(face: &[u32; 3]) -> [(u32, u32); 3] {
    [(face[0], face[1]), (face[1], face[2]), (face[2], face[0])]
}

fn push_edge(heap: &mut BinaryHeap<EdgeEntry>, vertices: &[[f32; 3]], stamp: &[u32], a: u32, b: u32) {
    let (u, v) = if a < b { (a, b) } else { (b, a) };
    let (pu, pv) = (vertices[u as usize], vertices[v as usize]);
    let d = [pu[0] - pv[0], pu[1] - pv[1], pu[2] - pv[2]];
    let len2 = d[0] * d[0] + d[1] * d[1] + d[2] * d[2];
    // bit patterns of non-negative floats sort like the floats themselves
    let key = if len2.is_finite() { len2.max(0.0).to_bits() } else { u32::MAX };
    heap.push(Reverse((key, u, v, stamp[u as usize], stamp[v as usize])));
}

fn compact(vertices: &[[f32; 3]], faces: &[[u32; 3]], face_alive: &[bool]) -> Mesh {
    const UNUSED: u32 = u32::MAX;
    let mut used = vec![false; vertices.len()];
    for (face, _) in faces.iter().zip(face_alive).filter(|&(_, &a)| a) {
        for &v in face {
            used[v as usize] = true;
        }
    }

    let mut remap = vec![UNUSED; vertices.len()];
    let mut new_vertices = Vec::with_capacity(used.iter().filter(|&&u| u).count());
    for (i, &is_used) in used.iter().enumerate() {
        if is_used {
            remap[i] = new_vertices.len() as u32;
            new_vertices.push(vertices[i]);
        }
    }

    let new_faces = faces
        .iter()
        .zip(face_alive)
        .filter(|&(_, &a)| a)
        .map(|(face, _)| face.map(|v| remap[v as usize]))
        .collect();

    Mesh::new(new_vertices, new_faces)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Flat `n x n` grid of quads split into triangles.
    fn grid(n: u32) -> Mesh {
        let mut vertices = Vec::new();
        for y in 0..=n {
            for x in 0..=n {
                vertices.push([x as f32, y as f32, 0.0]);
            }
        }
        let row = n + 1;
        let mut faces = Vec::new();
        for y in 0..n {
            for x in 0..n {
                let i = y * row + x;
                faces.push([i, i + 1, i + row]);
                faces.push([i + 1, i + row + 1, i + row]);
            }
        }
        Mesh::new(vertices, faces)
    }

    #[test]
    fn test_target_face_count() {
        assert_eq!(target_face_count(100, 0.99), 99);
        assert_eq!(target_face_count(7, 0.5), 4);
        assert_eq!(target_face_count(10, 1.5), 10);
        assert_eq!(target_face_count(200, 0.99), 198);
        assert_eq!(target_face_count(100, 0.07), 7);
        assert_eq!(target_face_count(3, 0.34), 2);
    }

    #[test]
    fn test_first_step_removes_whole_percent() {
        let mesh = grid(10);
        assert_eq!(mesh.num_faces(), 200);

        let reduced = reduce_mesh(&mesh, 0.99);
        assert!(reduced.num_faces() <= 198, "{} faces left", reduced.num_faces());
        assert!(reduced.num_faces() < mesh.num_faces());
    }

    #[test]
    fn test_reduce_respects_target() {
        let mesh = grid(10);
        assert_eq!(mesh.num_faces(), 200);

        let reduced = reduce_mesh(&mesh, 0.5);
        assert!(reduced.num_faces() <= 100);
        assert!(reduced.num_faces() > 0);
        assert!(reduced.num_vertices() < mesh.num_vertices());
        assert_eq!(reduced.first_invalid_face(), None);
    }

    #[test]
    fn test_reduce_is_monotonic_in_proportion() {
        let mesh = grid(12);
        let mut last = usize::MAX;
        for p in [0.9f32, 0.7, 0.5, 0.3] {
            let faces = reduce_mesh(&mesh, p).num_faces();
            assert!(faces <= last, "p={p}: {faces} > {last}");
            last = faces;
        }
    }

    #[test]
    fn test_reduce_is_deterministic() {
        let mesh = grid(8);
        assert_eq!(reduce_mesh(&mesh, 0.6), reduce_mesh(&mesh, 0.6));
    }

    #[test]
    fn test_reduce_noop_cases() {
        let mesh = grid(3);
        assert_eq!(reduce_mesh(&mesh, 1.0), mesh);
        assert_eq!(reduce_mesh(&Mesh::default(), 0.5), Mesh::default());
    }

    #[test]
    fn test_reduced_faces_are_not_degenerate() {
        let mesh = grid(6);
        let reduced = reduce_mesh(&mesh, 0.8);
        for face in &reduced.faces {
            assert!(face[0] != face[1] && face[1] != face[2] && face[0] != face[2]);
        }
    }
}
