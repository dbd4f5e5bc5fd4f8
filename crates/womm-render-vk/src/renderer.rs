// SPDX-License-Identifier: CEPL-1.0
//! `RenderSystem`: the Vulkan implementation of [`Renderer`].

use crate::command;
use crate::device::Core;
use crate::geometry::GeometryBuffers;
use crate::material::Material;
use crate::renderpass::{Framebuffers, RenderPass};
use crate::swapchain::Swapchain;
use crate::sync::FrameSync;
use crate::texture::GpuTexture;
use anyhow::{anyhow, Context, Result};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::sync::Arc;
use tracing::{debug, info, warn};
use womm_core::{Arena, ArenaBlock, MemTracker};
use womm_math::ObjectData;
use womm_render::{
    FrameStatus, GeoCpu, GeoGpu, PassDesc, RenderBundle, RenderConfig, RenderSize, Renderer,
    TextureData,
};

pub struct RenderSystem {
    /// Arena slot reserved for the system state.
    _state_block: ArenaBlock,
    size: RenderSize,
    /// Set while the surface is 0x0; `draw` skips until a resize clears it.
    paused: bool,
    world_pass: RenderPass,
    ui_pass: RenderPass,
    framebuffers: Framebuffers,
    sync: FrameSync,
    material: Material,
    texture: GpuTexture,
    geometry: GeometryBuffers,
    swapchain: Swapchain,
    // Dropped last: everything above is created from it.
    core: Core,
}

fn viewport(extent: vk::Extent2D) -> vk::Viewport {
    // Negative height flips Y so clip space matches the math crate's
    // y-up convention.
    vk::Viewport {
        x: 0.0,
        y: extent.height as f32,
        width: extent.width as f32,
        height: -(extent.height as f32),
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

impl RenderSystem {
    // STRICT ORDER:
    // 1) Core (instance, surface, device, pool)
    // 2) Swapchain + attachments
    // 3) World and UI passes against the swapchain format
    // 4) Framebuffers, then sync objects sized to the image count
    // 5) Geometry buffers, default texture, material
    unsafe fn build(
        state_block: ArenaBlock,
        heap: &Arc<MemTracker>,
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        config: &RenderConfig,
    ) -> Result<Self> {
        let mut core = Core::new(window, display)?;
        let swapchain = Swapchain::new(&mut core, size, heap)?;

        let format = swapchain.format.format;
        let world_pass = RenderPass::new(&core, format, PassDesc::world(config.clear_color))?;
        let ui_pass = RenderPass::new(&core, format, PassDesc::ui())?;
        let framebuffers =
            Framebuffers::new(&core.device, heap, &swapchain, &world_pass, &ui_pass)?;
        let sync = FrameSync::new(&core, swapchain.images.len())?;

        let geometry = GeometryBuffers::new(&mut core)?;
        let texture = GpuTexture::upload(&mut core, &TextureData::checkerboard())?;
        let mut material = Material::world(&mut core, config, world_pass.handle)?;
        material.set_texture(texture.image.view, texture.sampler);

        Ok(Self {
            _state_block: state_block,
            size,
            paused: size.is_zero(),
            world_pass,
            ui_pass,
            framebuffers,
            sync,
            material,
            texture,
            geometry,
            swapchain,
            core,
        })
    }

    /// Drain the GPU and rebuild everything sized to the surface. Pauses
    /// instead when the surface is 0x0.
    unsafe fn reinit(&mut self) -> Result<()> {
        self.core
            .device
            .device_wait_idle()
            .context("device_wait_idle")?;
        self.sync.wait_all(&self.core.device)?;
        self.framebuffers.destroy(&self.core.device);

        let old_format = self.swapchain.format.format;
        if !self.swapchain.reinit(&mut self.core, self.size)? {
            if !self.paused {
                info!("vk: surface is 0x0; rendering paused");
            }
            self.paused = true;
            return Ok(());
        }
        self.paused = false;

        let format = self.swapchain.format.format;
        if format != old_format {
            info!("vk: surface format changed; rebuilding passes and pipeline");
            let world_desc = self.world_pass.desc;
            let ui_desc = self.ui_pass.desc;
            self.world_pass.destroy(&self.core.device);
            self.ui_pass.destroy(&self.core.device);
            self.world_pass = RenderPass::new(&self.core, format, world_desc)?;
            self.ui_pass = RenderPass::new(&self.core, format, ui_desc)?;
            self.material
                .rebuild_pipeline(&self.core.device, self.world_pass.handle)?;
        }

        self.framebuffers.rebuild(
            &self.core.device,
            &self.swapchain,
            &self.world_pass,
            &self.ui_pass,
        )?;
        self.sync
            .rebuild_image_semaphores(&self.core.device, self.swapchain.images.len())?;
        Ok(())
    }

    /// `None` skips the frame: the swapchain could not hand out an image
    /// even after a rebuild.
    unsafe fn acquire(&mut self, slot: usize) -> Result<Option<(u32, bool)>> {
        let signal = self.sync.image_available[slot];
        match self.swapchain.acquire(signal) {
            Ok(acquired) => return Ok(Some(acquired)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                debug!("vk: swapchain out of date at acquire; rebuilding");
            }
            Err(err) => return Err(anyhow!("acquire_next_image failed: {:?}", err)),
        }

        self.reinit()?;
        if self.paused {
            return Ok(None);
        }
        match self.swapchain.acquire(self.sync.image_available[slot]) {
            Ok(acquired) => Ok(Some(acquired)),
            Err(err) => {
                warn!("vk: acquire failed after rebuild ({:?}); frame skipped", err);
                Ok(None)
            }
        }
    }

    unsafe fn draw_frame(&mut self, bundle: &RenderBundle) -> Result<FrameStatus> {
        let slot = self.sync.frame();
        self.sync.wait_slot(&self.core.device, slot)?;

        // --- Acquire ---
        let Some((image, acquire_suboptimal)) = self.acquire(slot)? else {
            return Ok(FrameStatus::Skipped);
        };
        let image_idx = image as usize;

        // --- Image fence correlation ---
        if let Some(prev) = self.sync.ring.claim_image(image_idx)? {
            self.sync.wait_slot(&self.core.device, prev)?;
        }
        self.sync.ring.begin_recording()?;

        // --- Record ---
        // The fence is reset only once a submit is certain to follow.
        let recorded = self
            .record(slot, image_idx, bundle)
            .and_then(|()| self.sync.reset_fence(&self.core.device, slot));
        if let Err(err) = recorded {
            self.abandon_frame(slot);
            return Err(err);
        }

        // --- Submit ---
        let cmd = self.sync.cmd(slot);
        let wait_stage = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &self.sync.image_available[slot],
            p_wait_dst_stage_mask: &wait_stage,
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &self.sync.render_done[image_idx],
            ..Default::default()
        };
        self.core
            .device
            .queue_submit(
                self.core.graphics_queue,
                std::slice::from_ref(&submit),
                self.sync.fences[slot],
            )
            .context("queue_submit")?;
        self.sync.ring.mark_submitted()?;

        // --- Present, then advance whatever the outcome ---
        let presented = self.swapchain.present(
            self.core.present_queue,
            image,
            self.sync.render_done[image_idx],
        );
        self.sync.ring.advance();

        match presented {
            Ok(suboptimal) => {
                if suboptimal || acquire_suboptimal {
                    debug!("vk: swapchain suboptimal; rebuilding");
                    self.reinit()?;
                }
                Ok(FrameStatus::Presented)
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                debug!("vk: swapchain out of date at present; rebuilding");
                self.reinit()?;
                Ok(FrameStatus::Skipped)
            }
            Err(err) => Err(anyhow!("queue_present failed: {:?}", err)),
        }
    }

    /// Recording failed after acquire. Consume the acquire semaphore and
    /// put the slot back to idle; its fence is still signaled.
    unsafe fn abandon_frame(&mut self, slot: usize) {
        if let Err(err) =
            self.sync
                .release_acquire(&self.core.device, self.core.graphics_queue, slot)
        {
            warn!("vk: releasing the acquire semaphore failed: {err:#}");
        }
        if let Err(err) = self.sync.ring.abort_recording() {
            warn!("vk: frame slot {slot} left in an unexpected state: {err}");
        }
    }

    unsafe fn record(&mut self, slot: usize, image: usize, bundle: &RenderBundle) -> Result<()> {
        // Uniform writes are safe: this slot's fence has signaled.
        self.material.apply_updates(&self.core.device, slot)?;
        self.material.write_global(slot, &bundle.camera)?;
        for (i, obj) in bundle.objects().iter().enumerate() {
            self.material
                .write_object(slot, i, &ObjectData::new(obj.diffuse_color))?;
        }

        let device = &self.core.device;
        let cmd = self.sync.cmd(slot);
        device
            .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
            .context("reset_command_buffer")?;
        command::begin(device, cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;

        let extent = self.swapchain.extent;
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        device.cmd_set_viewport(cmd, 0, &[viewport(extent)]);
        device.cmd_set_scissor(cmd, 0, std::slice::from_ref(&scissor));
        device.cmd_set_line_width(cmd, 1.0);

        // --- World pass ---
        self.world_pass
            .begin(device, cmd, self.framebuffers.world[image], extent);
        self.material.bind(device, cmd, slot);
        for (i, obj) in bundle.objects().iter().enumerate() {
            self.material.bind_object(device, cmd, slot, i);
            self.material.push_model(device, cmd, &obj.model);
            self.geometry.bind(device, cmd, &obj.geometry)?;
            device.cmd_draw_indexed(cmd, obj.geometry.index_count, 1, 0, 0, 0);
        }
        self.world_pass.end(device, cmd);

        // --- UI pass (overlay hook) ---
        self.ui_pass
            .begin(device, cmd, self.framebuffers.ui[image], extent);
        self.ui_pass.end(device, cmd);

        device
            .end_command_buffer(cmd)
            .context("end_command_buffer")
    }
}

impl Renderer for RenderSystem {
    fn new(
        arena: &mut Arena,
        heap: Arc<MemTracker>,
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        config: &RenderConfig,
    ) -> Result<Self> {
        let state_block = arena
            .alloc(std::mem::size_of::<Self>())
            .context("arena space for the render system")?;
        let system = unsafe { Self::build(state_block, &heap, window, display, size, config)? };
        info!(
            "vk: render system ready ({}x{}, {} images)",
            system.swapchain.extent.width,
            system.swapchain.extent.height,
            system.swapchain.images.len()
        );
        Ok(system)
    }

    fn resize(&mut self, size: RenderSize) -> Result<()> {
        self.size = size;
        if size.is_zero() {
            if !self.paused {
                info!("vk: window minimized; rendering paused");
            }
            self.paused = true;
            return Ok(());
        }
        unsafe { self.reinit() }
    }

    fn draw(&mut self, bundle: &RenderBundle) -> Result<FrameStatus> {
        if self.paused {
            return Ok(FrameStatus::Skipped);
        }
        unsafe { self.draw_frame(bundle) }
    }

    fn geo_init(&mut self, geo: &GeoCpu) -> Result<GeoGpu> {
        unsafe { self.geometry.upload(&mut self.core, geo) }
    }

    fn set_diffuse_texture(&mut self, texture: &TextureData) -> Result<()> {
        unsafe {
            self.core
                .device
                .device_wait_idle()
                .context("device_wait_idle")?;
            self.sync.wait_all(&self.core.device)?;
            let uploaded = GpuTexture::upload(&mut self.core, texture)?;
            let mut old = std::mem::replace(&mut self.texture, uploaded);
            old.destroy(&mut self.core);
        }
        self.material
            .set_texture(self.texture.image.view, self.texture.sampler);
        Ok(())
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.world_pass.desc.clear_color = rgba;
    }

    fn vram_status(&self) -> String {
        self.core.budget().status_report()
    }
}

// STRICT TEARDOWN ORDER (after the GPU is idle):
// 1) material: pipeline, pools, layouts, uniform buffers
// 2) texture, then geometry buffers
// 3) framebuffers BEFORE render passes
// 4) sync objects and command buffers
// 5) swapchain + attachments
// 6) Core (its own Drop): pool, device, surface, messenger, instance
impl Drop for RenderSystem {
    fn drop(&mut self) {
        unsafe {
            if let Err(err) = self.core.device.device_wait_idle() {
                warn!("vk: device_wait_idle at shutdown failed: {:?}", err);
            }
            if let Err(err) = self.sync.wait_all(&self.core.device) {
                warn!("vk: waiting on frame fences at shutdown failed: {err:#}");
            }
            self.material.destroy(&mut self.core);
            self.texture.destroy(&mut self.core);
            self.geometry.destroy(&mut self.core);
            self.framebuffers.destroy(&self.core.device);
            self.ui_pass.destroy(&self.core.device);
            self.world_pass.destroy(&self.core.device);
            self.sync.destroy(&self.core);
            self.swapchain.destroy(&mut self.core);
        }
        info!("vk: render system shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewport_flips_y() {
        let vp = viewport(vk::Extent2D {
            width: 800,
            height: 600,
        });
        assert_eq!(vp.y, 600.0);
        assert_eq!(vp.height, -600.0);
        assert_eq!(vp.width, 800.0);
        assert_eq!((vp.min_depth, vp.max_depth), (0.0, 1.0));
    }
}
