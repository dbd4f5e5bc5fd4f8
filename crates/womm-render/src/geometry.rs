// SPDX-License-Identifier: CEPL-1.0
//! Geometry lives in two global GPU buffers. Every upload is carved out of
//! them by a bump cursor and stays for the rest of the session.

use bytemuck::Pod;
use std::fmt;
use thiserror::Error;
use womm_core::units::MIB;
use womm_math::{Vec2, Vec3, Vertex3d};

pub const VERTEX_BUFFER_SIZE: u64 = 32 * MIB;
pub const INDEX_BUFFER_SIZE: u64 = 4 * MIB;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferKind {
    Vertex,
    Index,
}

impl fmt::Display for BufferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferKind::Vertex => f.write_str("vertex"),
            BufferKind::Index => f.write_str("index"),
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum GeometryError {
    #[error("{kind} buffer out of space: {requested} bytes at offset {offset}, capacity {capacity}")]
    OutOfSpace {
        kind: BufferKind,
        requested: u64,
        offset: u64,
        capacity: u64,
    },
    #[error("unsupported index size {0}; expected 2 or 4")]
    BadIndexSize(u32),
    #[error("geometry has no vertices or no indices")]
    Empty,
    #[error("vertex size must be non-zero")]
    ZeroVertexSize,
    #[error("{kind} data is {actual} bytes, expected {expected} (count x size)")]
    LengthMismatch {
        kind: BufferKind,
        expected: u64,
        actual: u64,
    },
}

/// Placement of one mesh inside the global buffers. Offsets are in bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GeoGpu {
    pub vertex_offset: u64,
    pub vertex_count: u32,
    pub vertex_size: u32,
    pub index_offset: u64,
    pub index_count: u32,
    pub index_size: u32,
}

impl GeoGpu {
    pub fn vertex_bytes(&self) -> u64 {
        self.vertex_count as u64 * self.vertex_size as u64
    }

    pub fn index_bytes(&self) -> u64 {
        self.index_count as u64 * self.index_size as u64
    }
}

/// CPU-side mesh ready for upload.
#[derive(Clone, Debug, PartialEq)]
pub struct GeoCpu {
    pub vertex_size: u32,
    pub vertex_count: u32,
    pub vertices: Vec<u8>,
    pub index_size: u32,
    pub index_count: u32,
    pub indices: Vec<u8>,
}

impl GeoCpu {
    pub fn new<V: Pod, I: Pod>(vertices: &[V], indices: &[I]) -> Self {
        Self {
            vertex_size: std::mem::size_of::<V>() as u32,
            vertex_count: vertices.len() as u32,
            vertices: bytemuck::cast_slice(vertices).to_vec(),
            index_size: std::mem::size_of::<I>() as u32,
            index_count: indices.len() as u32,
            indices: bytemuck::cast_slice(indices).to_vec(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeometryCursor {
    vertex_offset: u64,
    index_offset: u64,
    vertex_capacity: u64,
    index_capacity: u64,
}

impl Default for GeometryCursor {
    fn default() -> Self {
        Self::new(VERTEX_BUFFER_SIZE, INDEX_BUFFER_SIZE)
    }
}

impl GeometryCursor {
    pub fn new(vertex_capacity: u64, index_capacity: u64) -> Self {
        Self {
            vertex_offset: 0,
            index_offset: 0,
            vertex_capacity,
            index_capacity,
        }
    }

    /// Claim space for `geo`. Both buffers are bounds-checked before either
    /// cursor moves. Index offsets are aligned to the index size so the
    /// region can be bound directly.
    pub fn reserve(&mut self, geo: &GeoCpu) -> Result<GeoGpu, GeometryError> {
        if geo.vertex_count == 0 || geo.index_count == 0 {
            return Err(GeometryError::Empty);
        }
        if geo.vertex_size == 0 {
            return Err(GeometryError::ZeroVertexSize);
        }
        if geo.index_size != 2 && geo.index_size != 4 {
            return Err(GeometryError::BadIndexSize(geo.index_size));
        }

        // The staged bytes must be exactly the reserved region.
        let vertex_bytes = geo.vertex_count as u64 * geo.vertex_size as u64;
        let index_bytes = geo.index_count as u64 * geo.index_size as u64;
        same_len(BufferKind::Vertex, vertex_bytes, geo.vertices.len())?;
        same_len(BufferKind::Index, index_bytes, geo.indices.len())?;
        let index_offset = self.index_offset.next_multiple_of(geo.index_size as u64);

        fit(BufferKind::Vertex, self.vertex_offset, vertex_bytes, self.vertex_capacity)?;
        fit(BufferKind::Index, index_offset, index_bytes, self.index_capacity)?;

        let placed = GeoGpu {
            vertex_offset: self.vertex_offset,
            vertex_count: geo.vertex_count,
            vertex_size: geo.vertex_size,
            index_offset,
            index_count: geo.index_count,
            index_size: geo.index_size,
        };
        self.vertex_offset += vertex_bytes;
        self.index_offset = index_offset + index_bytes;
        Ok(placed)
    }

    pub fn vertex_used(&self) -> u64 {
        self.vertex_offset
    }

    pub fn index_used(&self) -> u64 {
        self.index_offset
    }

    pub fn vertex_capacity(&self) -> u64 {
        self.vertex_capacity
    }

    pub fn index_capacity(&self) -> u64 {
        self.index_capacity
    }
}

fn same_len(kind: BufferKind, expected: u64, actual: usize) -> Result<(), GeometryError> {
    let actual = actual as u64;
    if actual == expected {
        Ok(())
    } else {
        Err(GeometryError::LengthMismatch {
            kind,
            expected,
            actual,
        })
    }
}

fn fit(kind: BufferKind, offset: u64, requested: u64, capacity: u64) -> Result<(), GeometryError> {
    match offset.checked_add(requested) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(GeometryError::OutOfSpace {
            kind,
            requested,
            offset,
            capacity,
        }),
    }
}

/// Flat grid on the XZ plane facing +Y, centered on the origin.
pub fn plane(
    width: f32,
    depth: f32,
    x_segments: u32,
    z_segments: u32,
    tile_x: f32,
    tile_z: f32,
) -> GeoCpu {
    let xs = x_segments.max(1);
    let zs = z_segments.max(1);
    let width = if width > 0.0 { width } else { 1.0 };
    let depth = if depth > 0.0 { depth } else { 1.0 };

    let mut vertices = Vec::with_capacity(((xs + 1) * (zs + 1)) as usize);
    for j in 0..=zs {
        for i in 0..=xs {
            let u = i as f32 / xs as f32;
            let v = j as f32 / zs as f32;
            vertices.push(Vertex3d::new(
                Vec3::new(-0.5 * width + u * width, 0.0, -0.5 * depth + v * depth),
                Vec3::Y,
                Vec2::new(u * tile_x, v * tile_z),
            ));
        }
    }

    let row = xs + 1;
    let mut indices: Vec<u32> = Vec::with_capacity((xs * zs * 6) as usize);
    for j in 0..zs {
        for i in 0..xs {
            let tl = j * row + i;
            let tr = tl + 1;
            let bl = tl + row;
            let br = bl + 1;
            indices.extend_from_slice(&[tl, bl, br, tl, br, tr]);
        }
    }
    GeoCpu::new(&vertices, &indices)
}

/// Axis-aligned cube with per-face normals and texcoords: 24 vertices,
/// 36 indices, every face wound counter-clockwise seen from outside.
pub fn cube(size: f32) -> GeoCpu {
    let h = 0.5 * if size > 0.0 { size } else { 1.0 };
    // (normal, right, up) with right x up == normal
    let faces = [
        (Vec3::Z, Vec3::X, Vec3::Y),
        (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
        (Vec3::X, Vec3::NEG_Z, Vec3::Y),
        (Vec3::NEG_X, Vec3::Z, Vec3::Y),
        (Vec3::Y, Vec3::X, Vec3::NEG_Z),
        (Vec3::NEG_Y, Vec3::X, Vec3::Z),
    ];
    let corners = [
        (-1.0, 1.0, Vec2::new(0.0, 0.0)),
        (1.0, 1.0, Vec2::new(1.0, 0.0)),
        (1.0, -1.0, Vec2::new(1.0, 1.0)),
        (-1.0, -1.0, Vec2::new(0.0, 1.0)),
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices: Vec<u32> = Vec::with_capacity(36);
    for (n, right, up) in faces {
        let base = vertices.len() as u32;
        for (sx, sy, uv) in corners {
            let p = (n + right * sx + up * sy) * h;
            vertices.push(Vertex3d::new(p, n, uv));
        }
        indices.extend_from_slice(&[base, base + 3, base + 2, base, base + 2, base + 1]);
    }
    GeoCpu::new(&vertices, &indices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tri_normals(geo: &GeoCpu) -> Vec<(Vec3, Vec3)> {
        let verts: &[Vertex3d] = bytemuck::cast_slice(&geo.vertices);
        let idx: &[u32] = bytemuck::cast_slice(&geo.indices);
        idx.chunks(3)
            .map(|t| {
                let p = |i: u32| Vec3::from(verts[i as usize].position);
                let face = (p(t[1]) - p(t[0])).cross(p(t[2]) - p(t[0]));
                (face, Vec3::from(verts[t[0] as usize].normal))
            })
            .collect()
    }

    fn mesh(vertex_bytes: u32, index_count: u32) -> GeoCpu {
        GeoCpu {
            vertex_size: 1,
            vertex_count: vertex_bytes,
            vertices: vec![0; vertex_bytes as usize],
            index_size: 4,
            index_count,
            indices: vec![0; index_count as usize * 4],
        }
    }

    #[test]
    fn cube_has_24_vertices_and_outward_ccw_faces() {
        let geo = cube(5.0);
        assert_eq!(geo.vertex_count, 24);
        assert_eq!(geo.index_count, 36);
        assert_eq!(geo.vertex_size, Vertex3d::STRIDE);
        for (face, normal) in tri_normals(&geo) {
            assert!(face.dot(normal) > 0.0, "face {face} against normal {normal}");
        }
        let verts: &[Vertex3d] = bytemuck::cast_slice(&geo.vertices);
        assert!(verts.iter().all(|v| v.position.iter().all(|c| c.abs() == 2.5)));
    }

    #[test]
    fn plane_grid_faces_up() {
        let geo = plane(10.0, 4.0, 3, 2, 2.0, 1.0);
        assert_eq!(geo.vertex_count, 4 * 3);
        assert_eq!(geo.index_count, 3 * 2 * 6);
        for (face, _) in tri_normals(&geo) {
            assert!(face.y > 0.0);
        }
        let verts: &[Vertex3d] = bytemuck::cast_slice(&geo.vertices);
        assert_eq!(verts.last().unwrap().texcoord, [2.0, 1.0]);
    }

    #[test]
    fn out_of_space_is_reported_and_cursor_stays() {
        let mut cursor = GeometryCursor::new(100, 64);
        cursor.reserve(&mesh(60, 4)).unwrap();
        let err = cursor.reserve(&mesh(41, 1)).unwrap_err();
        assert_eq!(
            err,
            GeometryError::OutOfSpace {
                kind: BufferKind::Vertex,
                requested: 41,
                offset: 60,
                capacity: 100
            }
        );
        // Index overflow must not move the vertex cursor either.
        assert!(cursor.reserve(&mesh(10, 13)).is_err());
        assert_eq!(cursor.vertex_used(), 60);
        assert_eq!(cursor.index_used(), 16);
    }

    #[test]
    fn rejects_empty_and_odd_index_sizes() {
        let mut cursor = GeometryCursor::default();
        assert_eq!(cursor.reserve(&mesh(0, 3)), Err(GeometryError::Empty));
        let mut odd = mesh(12, 3);
        odd.index_size = 1;
        assert_eq!(cursor.reserve(&odd), Err(GeometryError::BadIndexSize(1)));
    }

    #[test]
    fn byte_length_must_match_the_reserved_region() {
        let mut cursor = GeometryCursor::default();
        // One 4-byte vertex declared, 100 bytes supplied.
        let oversized = GeoCpu {
            vertex_size: 4,
            vertex_count: 1,
            vertices: vec![0; 100],
            index_size: 2,
            index_count: 1,
            indices: vec![0; 2],
        };
        assert_eq!(
            cursor.reserve(&oversized),
            Err(GeometryError::LengthMismatch {
                kind: BufferKind::Vertex,
                expected: 4,
                actual: 100
            })
        );
        let mut short_indices = mesh(8, 3);
        short_indices.indices.truncate(10);
        assert_eq!(
            cursor.reserve(&short_indices),
            Err(GeometryError::LengthMismatch {
                kind: BufferKind::Index,
                expected: 12,
                actual: 10
            })
        );
        assert_eq!((cursor.vertex_used(), cursor.index_used()), (0, 0));

        // Two well-formed uploads land back to back without overlap.
        let a = cursor.reserve(&mesh(4, 1)).unwrap();
        let b = cursor.reserve(&mesh(4, 1)).unwrap();
        assert_eq!(a.vertex_offset + a.vertex_bytes(), b.vertex_offset);
    }

    #[test]
    fn zero_vertex_size_is_rejected() {
        let mut cursor = GeometryCursor::default();
        let mut flat = mesh(0, 3);
        flat.vertex_size = 0;
        flat.vertex_count = 5;
        assert_eq!(cursor.reserve(&flat), Err(GeometryError::ZeroVertexSize));
    }

    #[test]
    fn mixed_index_sizes_stay_aligned() {
        let mut cursor = GeometryCursor::default();
        let small = GeoCpu::new(&[0u8; 8], &[0u16; 3]);
        let wide = GeoCpu::new(&[0u8; 8], &[0u32; 3]);
        assert_eq!(cursor.reserve(&small).unwrap().index_offset, 0);
        assert_eq!(cursor.reserve(&wide).unwrap().index_offset, 8);
    }

    proptest! {
        #[test]
        fn offsets_are_prefix_sums_and_never_overlap(
            sizes in proptest::collection::vec((1u32..4096, 1u32..512), 1..64)
        ) {
            let mut cursor = GeometryCursor::default();
            let mut vsum = 0u64;
            let mut isum = 0u64;
            let mut placed: Vec<GeoGpu> = Vec::new();
            for (vb, ic) in sizes {
                let geo = cursor.reserve(&mesh(vb, ic)).unwrap();
                prop_assert_eq!(geo.vertex_offset, vsum);
                prop_assert_eq!(geo.index_offset, isum);
                for prev in &placed {
                    prop_assert!(prev.vertex_offset + prev.vertex_bytes() <= geo.vertex_offset);
                    prop_assert!(prev.index_offset + prev.index_bytes() <= geo.index_offset);
                }
                vsum += vb as u64;
                isum += ic as u64 * 4;
                placed.push(geo);
            }
        }
    }
}
