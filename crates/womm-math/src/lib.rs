// SPDX-License-Identifier: CEPL-1.0
//! GPU-facing POD types. Every padding slot is an explicit field so the
//! layouts match std140 and the vertex input strides without relying on
//! compiler padding.

use bytemuck::{Pod, Zeroable};
pub use glam::{Mat4, Quat, Vec2, Vec3, Vec4};

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex3d {
    pub position: [f32; 3],
    _pad0: f32,
    pub normal: [f32; 3],
    _pad1: f32,
    pub texcoord: [f32; 2],
    _pad2: [f32; 2],
}

impl Vertex3d {
    pub const STRIDE: u32 = std::mem::size_of::<Self>() as u32;
    pub const POSITION_OFFSET: u32 = 0;
    pub const NORMAL_OFFSET: u32 = 16;
    pub const TEXCOORD_OFFSET: u32 = 32;

    pub fn new(position: Vec3, normal: Vec3, texcoord: Vec2) -> Self {
        Self {
            position: position.to_array(),
            normal: normal.to_array(),
            texcoord: texcoord.to_array(),
            ..Self::default()
        }
    }
}

/// Global (per-frame) uniform block. 256 bytes.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct CameraData {
    pub proj: Mat4,
    pub view: Mat4,
    _reserved0: Mat4,
    _reserved1: Mat4,
}

impl CameraData {
    pub fn new(proj: Mat4, view: Mat4) -> Self {
        Self {
            proj,
            view,
            _reserved0: Mat4::ZERO,
            _reserved1: Mat4::ZERO,
        }
    }
}

impl Default for CameraData {
    fn default() -> Self {
        Self::new(Mat4::IDENTITY, Mat4::IDENTITY)
    }
}

/// Per-object uniform block. 64 bytes.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct ObjectData {
    pub diffuse_color: Vec4,
    _reserved: [Vec4; 3],
}

impl ObjectData {
    pub fn new(diffuse_color: Vec4) -> Self {
        Self {
            diffuse_color,
            _reserved: [Vec4::ZERO; 3],
        }
    }
}

/// Right-handed perspective with a 0..1 depth range.
pub fn perspective(fov_y_radians: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
    Mat4::perspective_rh(fov_y_radians, aspect.max(f32::EPSILON), near, far)
}

pub fn look_at(eye: Vec3, target: Vec3, up: Vec3) -> Mat4 {
    Mat4::look_at_rh(eye, target, up)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{offset_of, size_of};

    #[test]
    fn vertex_layout_is_padded_to_vec4_slots() {
        assert_eq!(size_of::<Vertex3d>(), 48);
        assert_eq!(Vertex3d::STRIDE, 48);
        assert_eq!(offset_of!(Vertex3d, position) as u32, Vertex3d::POSITION_OFFSET);
        assert_eq!(offset_of!(Vertex3d, normal) as u32, Vertex3d::NORMAL_OFFSET);
        assert_eq!(offset_of!(Vertex3d, texcoord) as u32, Vertex3d::TEXCOORD_OFFSET);
    }

    #[test]
    fn uniform_blocks_match_std140_sizes() {
        assert_eq!(size_of::<CameraData>(), 256);
        assert_eq!(size_of::<ObjectData>(), 64);
    }

    #[test]
    fn vertex_bytes_round_through_bytemuck() {
        let v = Vertex3d::new(Vec3::new(1.0, 2.0, 3.0), Vec3::Y, Vec2::new(0.5, 1.0));
        let bytes = bytemuck::bytes_of(&v);
        let floats: &[f32] = bytemuck::cast_slice(bytes);
        assert_eq!(&floats[0..3], &[1.0, 2.0, 3.0]);
        assert_eq!(&floats[8..10], &[0.5, 1.0]);
    }
}
