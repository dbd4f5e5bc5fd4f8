// SPDX-License-Identifier: CEPL-1.0
//! Budget-tracked `VkBuffer`s.

use crate::command;
use crate::device::{Allocation, Core};
use anyhow::{anyhow, bail, Context, Result};
use ash::vk;
use std::ptr::NonNull;
use womm_render::VramTag;

pub const HOST_COHERENT: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

#[derive(Debug)]
pub struct GpuBuffer {
    pub handle: vk::Buffer,
    pub size: u64,
    pub usage: vk::BufferUsageFlags,
    allocation: Option<Allocation>,
    /// Set for persistently mapped buffers; stays valid until `destroy`.
    mapped: Option<NonNull<u8>>,
}

fn check_range(offset: u64, len: usize, size: u64) -> Result<()> {
    match offset.checked_add(len as u64) {
        Some(end) if end <= size => Ok(()),
        _ => Err(anyhow!("write of {len} bytes at {offset} overruns buffer of {size}")),
    }
}

impl GpuBuffer {
    /// Create, query requirements, allocate against the budget, bind.
    /// Anything created before a failure is released again.
    pub unsafe fn new(
        core: &mut Core,
        size: u64,
        usage: vk::BufferUsageFlags,
        props: vk::MemoryPropertyFlags,
        tag: VramTag,
    ) -> Result<Self> {
        let bci = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        let handle = core
            .device
            .create_buffer(&bci, None)
            .context("create_buffer")?;
        let req = core.device.get_buffer_memory_requirements(handle);

        let allocation = match core.allocate_memory(req, props, tag) {
            Ok(a) => a,
            Err(err) => {
                core.device.destroy_buffer(handle, None);
                return Err(err).with_context(|| format!("{size} byte buffer ({})", tag.label()));
            }
        };
        if let Err(err) = core.device.bind_buffer_memory(handle, allocation.memory, 0) {
            core.free_memory(allocation);
            core.device.destroy_buffer(handle, None);
            return Err(err).context("bind_buffer_memory");
        }

        Ok(Self {
            handle,
            size,
            usage,
            allocation: Some(allocation),
            mapped: None,
        })
    }

    /// Host-visible, coherent and mapped for its whole lifetime.
    pub unsafe fn new_mapped(
        core: &mut Core,
        size: u64,
        usage: vk::BufferUsageFlags,
        tag: VramTag,
    ) -> Result<Self> {
        let mut buf = Self::new(core, size, usage, HOST_COHERENT, tag)?;
        if let Err(err) = buf.map(&core.device) {
            buf.destroy(core);
            return Err(err);
        }
        Ok(buf)
    }

    unsafe fn map(&mut self, device: &ash::Device) -> Result<()> {
        let memory = self.memory();
        let ptr = device
            .map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
            .context("map_memory")?;
        self.mapped = Some(NonNull::new(ptr.cast::<u8>()).context("map_memory returned null")?);
        Ok(())
    }

    /// Copy into a persistently mapped buffer.
    pub fn write(&self, offset: u64, bytes: &[u8]) -> Result<()> {
        let Some(base) = self.mapped else {
            bail!("write to an unmapped buffer");
        };
        check_range(offset, bytes.len(), self.size)?;
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                base.as_ptr().add(offset as usize),
                bytes.len(),
            );
        }
        Ok(())
    }

    /// Map, copy, unmap. For host-visible buffers that are not kept mapped.
    pub unsafe fn load(&self, device: &ash::Device, offset: u64, bytes: &[u8]) -> Result<()> {
        if self.mapped.is_some() {
            return self.write(offset, bytes);
        }
        check_range(offset, bytes.len(), self.size)?;
        let memory = self.memory();
        let ptr = device
            .map_memory(memory, offset, bytes.len() as u64, vk::MemoryMapFlags::empty())
            .context("map_memory")?;
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.cast::<u8>(), bytes.len());
        device.unmap_memory(memory);
        Ok(())
    }

    fn memory(&self) -> vk::DeviceMemory {
        self.allocation
            .as_ref()
            .map_or(vk::DeviceMemory::null(), |a| a.memory)
    }

    /// Idempotent.
    pub unsafe fn destroy(&mut self, core: &mut Core) {
        if self.mapped.take().is_some() {
            core.device.unmap_memory(self.memory());
        }
        if self.handle != vk::Buffer::null() {
            core.device.destroy_buffer(self.handle, None);
            self.handle = vk::Buffer::null();
        }
        if let Some(allocation) = self.allocation.take() {
            core.free_memory(allocation);
        }
    }
}

/// One-shot staging upload: host -> staging, then staging -> `dst` at
/// `dst_offset`. Blocks until the graphics queue is idle.
pub unsafe fn upload_via_staging(
    core: &mut Core,
    dst: &GpuBuffer,
    dst_offset: u64,
    bytes: &[u8],
) -> Result<()> {
    if bytes.is_empty() {
        bail!("empty staging upload");
    }
    check_range(dst_offset, bytes.len(), dst.size)?;

    let size = bytes.len() as u64;
    let mut staging = GpuBuffer::new(
        core,
        size,
        vk::BufferUsageFlags::TRANSFER_SRC,
        HOST_COHERENT,
        VramTag::BufferStaging,
    )?;
    let mut result = staging.load(&core.device, 0, bytes);
    if result.is_ok() {
        result = copy_buffer(core, staging.handle, dst.handle, dst_offset, size);
    }
    staging.destroy(core);
    result
}

unsafe fn copy_buffer(
    core: &Core,
    src: vk::Buffer,
    dst: vk::Buffer,
    dst_offset: u64,
    size: u64,
) -> Result<()> {
    let cmd = command::begin_one_time(core)?;
    let region = vk::BufferCopy {
        src_offset: 0,
        dst_offset,
        size,
    };
    core.device
        .cmd_copy_buffer(cmd, src, dst, std::slice::from_ref(&region));
    command::end_one_time(core, cmd)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_check_rejects_overruns() {
        assert!(check_range(0, 64, 64).is_ok());
        assert!(check_range(60, 4, 64).is_ok());
        assert!(check_range(61, 4, 64).is_err());
        assert!(check_range(u64::MAX, 1, 64).is_err());
    }

    #[test]
    fn host_coherent_is_both_bits() {
        assert!(HOST_COHERENT.contains(vk::MemoryPropertyFlags::HOST_VISIBLE));
        assert!(HOST_COHERENT.contains(vk::MemoryPropertyFlags::HOST_COHERENT));
        assert!(!HOST_COHERENT.contains(vk::MemoryPropertyFlags::DEVICE_LOCAL));
    }
}
