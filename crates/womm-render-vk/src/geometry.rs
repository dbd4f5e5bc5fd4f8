// SPDX-License-Identifier: CEPL-1.0
//! The global vertex and index buffers and uploads into them.

use crate::buffer::{upload_via_staging, GpuBuffer};
use crate::device::Core;
use anyhow::{bail, Result};
use ash::vk;
use tracing::debug;
use womm_render::{
    GeoCpu, GeoGpu, GeometryCursor, VramTag, INDEX_BUFFER_SIZE, VERTEX_BUFFER_SIZE,
};

pub(crate) fn index_type(index_size: u32) -> Option<vk::IndexType> {
    match index_size {
        2 => Some(vk::IndexType::UINT16),
        4 => Some(vk::IndexType::UINT32),
        _ => None,
    }
}

pub struct GeometryBuffers {
    pub vertex: GpuBuffer,
    pub index: GpuBuffer,
    cursor: GeometryCursor,
}

impl GeometryBuffers {
    pub unsafe fn new(core: &mut Core) -> Result<Self> {
        let vertex = GpuBuffer::new(
            core,
            VERTEX_BUFFER_SIZE,
            vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            VramTag::BufferVertex,
        )?;
        let index = GpuBuffer::new(
            core,
            INDEX_BUFFER_SIZE,
            vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            VramTag::BufferIndex,
        );
        let index = match index {
            Ok(b) => b,
            Err(err) => {
                let mut vertex = vertex;
                vertex.destroy(core);
                return Err(err);
            }
        };
        Ok(Self {
            vertex,
            index,
            cursor: GeometryCursor::new(VERTEX_BUFFER_SIZE, INDEX_BUFFER_SIZE),
        })
    }

    /// Place and upload `geo`. The cursor only advances once both copies
    /// have landed.
    pub unsafe fn upload(&mut self, core: &mut Core, geo: &GeoCpu) -> Result<GeoGpu> {
        let mut cursor = self.cursor.clone();
        let placed = cursor.reserve(geo)?;

        upload_via_staging(core, &self.vertex, placed.vertex_offset, &geo.vertices)?;
        upload_via_staging(core, &self.index, placed.index_offset, &geo.indices)?;

        self.cursor = cursor;
        debug!(
            "vk: geometry placed at v{}+{} i{}+{}",
            placed.vertex_offset,
            placed.vertex_bytes(),
            placed.index_offset,
            placed.index_bytes()
        );
        Ok(placed)
    }

    pub unsafe fn bind(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        geo: &GeoGpu,
    ) -> Result<()> {
        let Some(ty) = index_type(geo.index_size) else {
            bail!("geometry with index size {}", geo.index_size);
        };
        device.cmd_bind_vertex_buffers(
            cmd,
            0,
            std::slice::from_ref(&self.vertex.handle),
            &[geo.vertex_offset],
        );
        device.cmd_bind_index_buffer(cmd, self.index.handle, geo.index_offset, ty);
        Ok(())
    }

    pub unsafe fn destroy(&mut self, core: &mut Core) {
        self.index.destroy(core);
        self.vertex.destroy(core);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_sizes_map_to_vulkan_types() {
        assert_eq!(index_type(2), Some(vk::IndexType::UINT16));
        assert_eq!(index_type(4), Some(vk::IndexType::UINT32));
        assert_eq!(index_type(1), None);
        assert_eq!(index_type(8), None);
    }
}
