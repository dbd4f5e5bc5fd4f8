// SPDX-License-Identifier: CEPL-1.0
//! Fences, semaphores and command buffers for frames in flight.
//!
//! Fences and `image_available` are per slot. `render_done` is per
//! swapchain image, since presentation may still be waiting on it after the
//! slot has moved on.

use crate::command;
use crate::device::Core;
use anyhow::{Context, Result};
use ash::vk;
use womm_render::{FrameRing, SlotState, FRAME_FLIGHT};

pub struct FrameSync {
    pub fences: [vk::Fence; FRAME_FLIGHT],
    pub image_available: [vk::Semaphore; FRAME_FLIGHT],
    pub cmd_bufs: Vec<vk::CommandBuffer>,
    pub render_done: Vec<vk::Semaphore>,
    pub ring: FrameRing,
}

unsafe fn semaphore(device: &ash::Device) -> Result<vk::Semaphore> {
    let si = vk::SemaphoreCreateInfo {
        s_type: vk::StructureType::SEMAPHORE_CREATE_INFO,
        ..Default::default()
    };
    device
        .create_semaphore(&si, None)
        .context("create_semaphore")
}

impl FrameSync {
    pub unsafe fn new(core: &Core, image_count: usize) -> Result<Self> {
        let mut sync = Self {
            fences: [vk::Fence::null(); FRAME_FLIGHT],
            image_available: [vk::Semaphore::null(); FRAME_FLIGHT],
            cmd_bufs: Vec::new(),
            render_done: Vec::new(),
            ring: FrameRing::new(image_count),
        };
        if let Err(err) = sync.create(core, image_count) {
            sync.destroy(core);
            return Err(err);
        }
        Ok(sync)
    }

    unsafe fn create(&mut self, core: &Core, image_count: usize) -> Result<()> {
        // Signaled so the first wait on every slot returns immediately.
        let fi = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: vk::FenceCreateFlags::SIGNALED,
            ..Default::default()
        };
        for slot in 0..FRAME_FLIGHT {
            self.fences[slot] = core
                .device
                .create_fence(&fi, None)
                .context("create_fence")?;
            self.image_available[slot] = semaphore(&core.device)?;
        }
        self.cmd_bufs = command::allocate_primary(core, FRAME_FLIGHT as u32)?;
        self.rebuild_image_semaphores(&core.device, image_count)
    }

    pub fn frame(&self) -> usize {
        self.ring.frame_idx()
    }

    pub fn cmd(&self, slot: usize) -> vk::CommandBuffer {
        self.cmd_bufs[slot]
    }

    /// Block until `slot`'s last submission is finished.
    pub unsafe fn wait_slot(&mut self, device: &ash::Device, slot: usize) -> Result<()> {
        device
            .wait_for_fences(std::slice::from_ref(&self.fences[slot]), true, u64::MAX)
            .context("wait_for_fences")?;
        self.ring.fence_signaled(slot)?;
        Ok(())
    }

    /// Wait on every slot that still has work queued.
    pub unsafe fn wait_all(&mut self, device: &ash::Device) -> Result<()> {
        let pending: Vec<vk::Fence> = (0..FRAME_FLIGHT)
            .filter(|&s| self.ring.state(s) == SlotState::Submitted)
            .map(|s| self.fences[s])
            .collect();
        if !pending.is_empty() {
            device
                .wait_for_fences(&pending, true, u64::MAX)
                .context("wait_for_fences(all)")?;
        }
        self.ring.all_signaled();
        Ok(())
    }

    pub unsafe fn reset_fence(&self, device: &ash::Device, slot: usize) -> Result<()> {
        device
            .reset_fences(std::slice::from_ref(&self.fences[slot]))
            .context("reset_fences")
    }

    /// Give the queue a wait on `image_available[slot]` with no work and no
    /// fence, so the acquire signal of an abandoned frame is consumed.
    pub unsafe fn release_acquire(
        &self,
        device: &ash::Device,
        queue: vk::Queue,
        slot: usize,
    ) -> Result<()> {
        let wait_stage = vk::PipelineStageFlags::ALL_COMMANDS;
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &self.image_available[slot],
            p_wait_dst_stage_mask: &wait_stage,
            ..Default::default()
        };
        device
            .queue_submit(queue, std::slice::from_ref(&submit), vk::Fence::null())
            .context("queue_submit(release acquire)")
    }

    /// One `render_done` per swapchain image. Image ownership history is
    /// cleared along with them.
    pub unsafe fn rebuild_image_semaphores(
        &mut self,
        device: &ash::Device,
        image_count: usize,
    ) -> Result<()> {
        for sem in self.render_done.drain(..) {
            device.destroy_semaphore(sem, None);
        }
        for _ in 0..image_count {
            let sem = semaphore(device)?;
            self.render_done.push(sem);
        }
        self.ring.reset_images(image_count);
        Ok(())
    }

    /// Caller has drained the GPU.
    pub unsafe fn destroy(&mut self, core: &Core) {
        let device = &core.device;
        for sem in self.render_done.drain(..) {
            device.destroy_semaphore(sem, None);
        }
        for slot in 0..FRAME_FLIGHT {
            if self.image_available[slot] != vk::Semaphore::null() {
                device.destroy_semaphore(self.image_available[slot], None);
                self.image_available[slot] = vk::Semaphore::null();
            }
            if self.fences[slot] != vk::Fence::null() {
                device.destroy_fence(self.fences[slot], None);
                self.fences[slot] = vk::Fence::null();
            }
        }
        if !self.cmd_bufs.is_empty() {
            device.free_command_buffers(core.gfx_pool, &self.cmd_bufs);
            self.cmd_bufs.clear();
        }
    }
}
