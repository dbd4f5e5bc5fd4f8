// SPDX-License-Identifier: CEPL-1.0
//! Backend-agnostic half of the renderer: budgets, frame-slot bookkeeping,
//! geometry placement, pass descriptions and CPU-side asset data.

use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::sync::Arc;
use womm_core::{Arena, MemTracker};

pub mod bundle;
pub mod chain;
pub mod config;
pub mod frame;
pub mod geometry;
pub mod pass;
pub mod texture;
pub mod vram;

pub use bundle::{BundleError, MaterialData, ObjectDraw, RenderBundle, MAX_BUNDLE_OBJECTS};
pub use chain::{rebuild_chain, ChainSteps};
pub use config::{RenderConfig, ShaderStage};
pub use frame::{FrameError, FrameRing, SlotState, FRAME_FLIGHT};
pub use geometry::{
    BufferKind, GeoCpu, GeoGpu, GeometryCursor, GeometryError, INDEX_BUFFER_SIZE,
    VERTEX_BUFFER_SIZE,
};
pub use pass::{AttachmentSpec, ClearFlags, Layout, LoadOp, PassDesc, StoreOp};
pub use texture::{TextureData, DEFAULT_TEXTURE_NAME};
pub use vram::{MemoryLocality, VramBudget, VramError, VramTag, VRAM_BUDGET};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub fn is_zero(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Outcome of one `draw`. Both variants keep the frame loop running.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    Presented,
    /// Nothing was presented: paused, or the swapchain was rebuilt mid-frame.
    Skipped,
}

pub trait Renderer {
    fn new(
        arena: &mut Arena,
        heap: Arc<MemTracker>,
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        config: &RenderConfig,
    ) -> Result<Self>
    where
        Self: Sized;

    fn resize(&mut self, size: RenderSize) -> Result<()>;

    /// `Err` is fatal and the caller should stop its frame loop.
    fn draw(&mut self, bundle: &RenderBundle) -> Result<FrameStatus>;

    fn geo_init(&mut self, geo: &GeoCpu) -> Result<GeoGpu>;
    fn set_diffuse_texture(&mut self, texture: &TextureData) -> Result<()>;
    fn set_clear_color(&mut self, rgba: [f32; 4]);
    fn vram_status(&self) -> String;
}
