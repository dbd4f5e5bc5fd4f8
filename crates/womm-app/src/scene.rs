// SPDX-License-Identifier: CEPL-1.0
//! Demo scene: a spinning cube over a tiled plane, seen by an orbit camera.

use anyhow::{Context, Result};
use womm_math::{look_at, perspective, CameraData, Mat4, Quat, Vec3, Vec4};
use womm_render::geometry::{cube, plane};
use womm_render::{GeoGpu, MaterialData, ObjectDraw, RenderBundle, Renderer};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrbitCamera {
    pub target: Vec3,
    pub radius: f32,
    pub height: f32,
    /// Radians per second.
    pub speed: f32,
    pub fov_y: f32,
}

impl Default for OrbitCamera {
    fn default() -> Self {
        Self {
            target: Vec3::new(0.0, 0.5, 0.0),
            radius: 6.0,
            height: 3.0,
            speed: 0.35,
            fov_y: 60f32.to_radians(),
        }
    }
}

impl OrbitCamera {
    pub fn eye(&self, t: f32) -> Vec3 {
        let a = t * self.speed;
        Vec3::new(
            self.target.x + self.radius * a.cos(),
            self.target.y + self.height,
            self.target.z + self.radius * a.sin(),
        )
    }

    pub fn camera_data(&self, t: f32, aspect: f32) -> CameraData {
        let proj = perspective(self.fov_y, aspect, 0.1, 100.0);
        let view = look_at(self.eye(t), self.target, Vec3::Y);
        CameraData::new(proj, view)
    }
}

pub struct Scene {
    cube: GeoGpu,
    plane: GeoGpu,
    cube_material: MaterialData,
    plane_material: MaterialData,
    pub camera: OrbitCamera,
    elapsed: f32,
}

impl Scene {
    /// Upload the demo meshes through `renderer`.
    pub fn load(renderer: &mut impl Renderer) -> Result<Self> {
        let cube = renderer.geo_init(&cube(1.0)).context("cube upload")?;
        let plane = renderer
            .geo_init(&plane(20.0, 20.0, 10, 10, 10.0, 10.0))
            .context("plane upload")?;
        Ok(Self {
            cube,
            plane,
            cube_material: MaterialData {
                name: "cube".to_owned(),
                diffuse_color: Vec4::ONE,
            },
            plane_material: MaterialData::default(),
            camera: OrbitCamera::default(),
            elapsed: 0.0,
        })
    }

    /// Advance the clock by `delta` seconds and build this frame's draws.
    pub fn frame(&mut self, delta: f32, aspect: f32) -> Result<RenderBundle> {
        self.elapsed += delta;
        let t = self.elapsed;

        let mut bundle = RenderBundle::new(self.camera.camera_data(t, aspect), delta);
        bundle.push(ObjectDraw::new(self.plane, Mat4::IDENTITY, &self.plane_material))?;
        let spin = Mat4::from_rotation_translation(
            Quat::from_rotation_y(t) * Quat::from_rotation_x(0.5 * t),
            Vec3::new(0.0, 1.0, 0.0),
        );
        bundle.push(ObjectDraw::new(self.cube, spin, &self.cube_material))?;
        Ok(bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use womm_platform::winit::raw_window_handle::{HasDisplayHandle, HasWindowHandle};
    use std::sync::Arc;
    use womm_core::{Arena, MemTracker};
    use womm_render::{FrameStatus, GeoCpu, GeometryCursor, RenderConfig, RenderSize, TextureData};

    /// Places geometry with the real cursor; no GPU.
    struct Placement {
        cursor: GeometryCursor,
        uploads: usize,
    }

    impl Renderer for Placement {
        fn new(
            _arena: &mut Arena,
            _heap: Arc<MemTracker>,
            _window: &dyn HasWindowHandle,
            _display: &dyn HasDisplayHandle,
            _size: RenderSize,
            _config: &RenderConfig,
        ) -> Result<Self> {
            bail!("not constructible from a window")
        }

        fn resize(&mut self, _size: RenderSize) -> Result<()> {
            Ok(())
        }

        fn draw(&mut self, _bundle: &RenderBundle) -> Result<FrameStatus> {
            Ok(FrameStatus::Presented)
        }

        fn geo_init(&mut self, geo: &GeoCpu) -> Result<GeoGpu> {
            self.uploads += 1;
            Ok(self.cursor.reserve(geo)?)
        }

        fn set_diffuse_texture(&mut self, _texture: &TextureData) -> Result<()> {
            Ok(())
        }

        fn set_clear_color(&mut self, _rgba: [f32; 4]) {}

        fn vram_status(&self) -> String {
            String::new()
        }
    }

    #[test]
    fn orbit_stays_on_its_circle() {
        let cam = OrbitCamera::default();
        for step in 0..32 {
            let eye = cam.eye(step as f32 * 0.7);
            let flat = Vec3::new(eye.x - cam.target.x, 0.0, eye.z - cam.target.z);
            assert!((flat.length() - cam.radius).abs() < 1e-4);
            assert!((eye.y - cam.target.y - cam.height).abs() < 1e-6);
        }
    }

    #[test]
    fn scene_uploads_two_meshes_back_to_back() {
        let mut r = Placement {
            cursor: GeometryCursor::default(),
            uploads: 0,
        };
        let scene = Scene::load(&mut r).unwrap();
        assert_eq!(r.uploads, 2);
        assert_eq!(scene.cube.index_count, 36);
        assert_eq!(scene.plane.vertex_offset, scene.cube.vertex_bytes());
        assert_eq!(scene.plane.index_count, 10 * 10 * 6);
    }

    #[test]
    fn frame_draws_plane_then_cube() {
        let mut r = Placement {
            cursor: GeometryCursor::default(),
            uploads: 0,
        };
        let mut scene = Scene::load(&mut r).unwrap();
        let bundle = scene.frame(0.016, 16.0 / 9.0).unwrap();
        assert_eq!(bundle.len(), 2);
        assert_eq!(bundle.objects()[0].model, Mat4::IDENTITY);
        assert_eq!(
            bundle.objects()[0].diffuse_color,
            MaterialData::default().diffuse_color
        );
        assert_eq!(bundle.objects()[1].geometry, scene.cube);
        assert!((bundle.delta - 0.016).abs() < f32::EPSILON);

        let later = scene.frame(0.5, 16.0 / 9.0).unwrap();
        assert_ne!(later.camera, bundle.camera);
    }
}
