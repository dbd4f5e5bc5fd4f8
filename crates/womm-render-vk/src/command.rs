// SPDX-License-Identifier: CEPL-1.0
//! Command buffer helpers.

use crate::device::Core;
use anyhow::{Context, Result};
use ash::vk;

pub(crate) unsafe fn allocate_primary(core: &Core, count: u32) -> Result<Vec<vk::CommandBuffer>> {
    let alloc_info = vk::CommandBufferAllocateInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
        command_pool: core.gfx_pool,
        level: vk::CommandBufferLevel::PRIMARY,
        command_buffer_count: count,
        ..Default::default()
    };
    core.device
        .allocate_command_buffers(&alloc_info)
        .context("allocate_command_buffers")
}

pub(crate) unsafe fn begin(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    flags: vk::CommandBufferUsageFlags,
) -> Result<()> {
    let bi = vk::CommandBufferBeginInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
        flags,
        ..Default::default()
    };
    device
        .begin_command_buffer(cmd, &bi)
        .context("begin_command_buffer")
}

/// Allocate and begin a throwaway ONE_TIME_SUBMIT buffer.
pub(crate) unsafe fn begin_one_time(core: &Core) -> Result<vk::CommandBuffer> {
    let cmd = allocate_primary(core, 1)?
        .pop()
        .context("driver returned no command buffer")?;
    if let Err(err) = begin(&core.device, cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT) {
        core.device
            .free_command_buffers(core.gfx_pool, std::slice::from_ref(&cmd));
        return Err(err);
    }
    Ok(cmd)
}

/// End, submit to the graphics queue, wait for idle, free.
pub(crate) unsafe fn end_one_time(core: &Core, cmd: vk::CommandBuffer) -> Result<()> {
    let result = submit_and_wait(core, cmd);
    core.device
        .free_command_buffers(core.gfx_pool, std::slice::from_ref(&cmd));
    result
}

unsafe fn submit_and_wait(core: &Core, cmd: vk::CommandBuffer) -> Result<()> {
    core.device
        .end_command_buffer(cmd)
        .context("end_command_buffer")?;
    let si = vk::SubmitInfo {
        s_type: vk::StructureType::SUBMIT_INFO,
        command_buffer_count: 1,
        p_command_buffers: &cmd,
        ..Default::default()
    };
    core.device
        .queue_submit(core.graphics_queue, std::slice::from_ref(&si), vk::Fence::null())
        .context("queue_submit(one-time)")?;
    core.device
        .queue_wait_idle(core.graphics_queue)
        .context("queue_wait_idle")
}
