// SPDX-License-Identifier: CEPL-1.0
//! Per-frame draw list handed from the game to the renderer.

use crate::geometry::GeoGpu;
use thiserror::Error;
use womm_math::{CameraData, Mat4, Vec4};

/// Upper bound on draws per frame; matches the per-frame object UBO slots.
pub const MAX_BUNDLE_OBJECTS: usize = 1024;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BundleError {
    #[error("render bundle is full ({0} objects)")]
    Full(usize),
}

#[derive(Clone, Debug, PartialEq)]
pub struct MaterialData {
    pub name: String,
    pub diffuse_color: Vec4,
}

impl Default for MaterialData {
    fn default() -> Self {
        Self {
            name: "default".to_owned(),
            diffuse_color: Vec4::new(0.5, 0.5, 0.5, 1.0),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ObjectDraw {
    pub geometry: GeoGpu,
    pub model: Mat4,
    pub diffuse_color: Vec4,
}

impl ObjectDraw {
    pub fn new(geometry: GeoGpu, model: Mat4, material: &MaterialData) -> Self {
        Self {
            geometry,
            model,
            diffuse_color: material.diffuse_color,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct RenderBundle {
    objects: Vec<ObjectDraw>,
    pub camera: CameraData,
    pub delta: f32,
}

impl RenderBundle {
    pub fn new(camera: CameraData, delta: f32) -> Self {
        Self {
            objects: Vec::new(),
            camera,
            delta,
        }
    }

    pub fn push(&mut self, draw: ObjectDraw) -> Result<(), BundleError> {
        if self.objects.len() >= MAX_BUNDLE_OBJECTS {
            return Err(BundleError::Full(MAX_BUNDLE_OBJECTS));
        }
        self.objects.push(draw);
        Ok(())
    }

    pub fn objects(&self) -> &[ObjectDraw] {
        &self.objects
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Keeps the allocation for the next frame.
    pub fn clear(&mut self) {
        self.objects.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_material_is_mid_grey() {
        let m = MaterialData::default();
        assert_eq!(m.diffuse_color, Vec4::new(0.5, 0.5, 0.5, 1.0));
    }

    #[test]
    fn bundle_caps_object_count() {
        let mut bundle = RenderBundle::new(CameraData::default(), 0.016);
        let draw = ObjectDraw::new(GeoGpu::default(), Mat4::IDENTITY, &MaterialData::default());
        for _ in 0..MAX_BUNDLE_OBJECTS {
            bundle.push(draw).unwrap();
        }
        assert_eq!(bundle.push(draw), Err(BundleError::Full(MAX_BUNDLE_OBJECTS)));
        assert_eq!(bundle.len(), MAX_BUNDLE_OBJECTS);
        bundle.clear();
        assert!(bundle.is_empty());
    }
}
