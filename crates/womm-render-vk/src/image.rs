// SPDX-License-Identifier: CEPL-1.0
//! Budget-tracked `VkImage`s with a single 2D view.

use crate::device::{Allocation, Core};
use anyhow::{Context, Result};
use ash::vk;
use womm_render::VramTag;

#[derive(Clone, Copy, Debug)]
pub struct ImageDesc {
    pub width: u32,
    pub height: u32,
    pub format: vk::Format,
    pub tiling: vk::ImageTiling,
    pub usage: vk::ImageUsageFlags,
    pub memory: vk::MemoryPropertyFlags,
    pub aspect: vk::ImageAspectFlags,
    pub tag: VramTag,
}

impl ImageDesc {
    pub fn depth_target(width: u32, height: u32, format: vk::Format) -> Self {
        Self {
            width,
            height,
            format,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            memory: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            aspect: vk::ImageAspectFlags::DEPTH,
            tag: VramTag::DepthTarget,
        }
    }

    pub fn sampled(width: u32, height: u32, format: vk::Format) -> Self {
        Self {
            width,
            height,
            format,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            memory: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            aspect: vk::ImageAspectFlags::COLOR,
            tag: VramTag::Texture,
        }
    }
}

#[derive(Debug)]
pub struct GpuImage {
    pub handle: vk::Image,
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub width: u32,
    pub height: u32,
    pub size: u64,
    allocation: Option<Allocation>,
}

pub(crate) fn subresource(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspect,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

pub(crate) unsafe fn create_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
    aspect: vk::ImageAspectFlags,
) -> Result<vk::ImageView> {
    let iv_info = vk::ImageViewCreateInfo {
        s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
        image,
        view_type: vk::ImageViewType::TYPE_2D,
        format,
        subresource_range: subresource(aspect),
        ..Default::default()
    };
    device
        .create_image_view(&iv_info, None)
        .context("create_image_view")
}

impl GpuImage {
    /// Null handles, nothing allocated. Destroying it is a no-op.
    pub fn empty() -> Self {
        Self {
            handle: vk::Image::null(),
            view: vk::ImageView::null(),
            format: vk::Format::UNDEFINED,
            width: 0,
            height: 0,
            size: 0,
            allocation: None,
        }
    }

    /// Create, allocate against the budget, bind, then create the view.
    /// A failure at any step releases what was already made.
    pub unsafe fn new(core: &mut Core, desc: &ImageDesc) -> Result<Self> {
        let img_ci = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            image_type: vk::ImageType::TYPE_2D,
            format: desc.format,
            extent: vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: desc.tiling,
            usage: desc.usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        let handle = core
            .device
            .create_image(&img_ci, None)
            .context("create_image")?;
        let req = core.device.get_image_memory_requirements(handle);

        let allocation = match core.allocate_memory(req, desc.memory, desc.tag) {
            Ok(a) => a,
            Err(err) => {
                core.device.destroy_image(handle, None);
                return Err(err).with_context(|| {
                    format!("{}x{} image ({})", desc.width, desc.height, desc.tag.label())
                });
            }
        };
        let size = allocation.size;
        if let Err(err) = core.device.bind_image_memory(handle, allocation.memory, 0) {
            core.free_memory(allocation);
            core.device.destroy_image(handle, None);
            return Err(err).context("bind_image_memory");
        }

        let view = match create_view(&core.device, handle, desc.format, desc.aspect) {
            Ok(v) => v,
            Err(err) => {
                core.free_memory(allocation);
                core.device.destroy_image(handle, None);
                return Err(err);
            }
        };

        Ok(Self {
            handle,
            view,
            format: desc.format,
            width: desc.width,
            height: desc.height,
            size,
            allocation: Some(allocation),
        })
    }

    /// Idempotent: view, then image, then memory.
    pub unsafe fn destroy(&mut self, core: &mut Core) {
        if self.view != vk::ImageView::null() {
            core.device.destroy_image_view(self.view, None);
            self.view = vk::ImageView::null();
        }
        if self.handle != vk::Image::null() {
            core.device.destroy_image(self.handle, None);
            self.handle = vk::Image::null();
        }
        if let Some(allocation) = self.allocation.take() {
            core.free_memory(allocation);
        }
        self.size = 0;
    }
}

/// Layout transition for a single-mip color image.
pub(crate) unsafe fn transition(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) {
    let (src_access, dst_access, src_stage, dst_stage) = transition_masks(old_layout, new_layout);
    let barrier = vk::ImageMemoryBarrier {
        s_type: vk::StructureType::IMAGE_MEMORY_BARRIER,
        src_access_mask: src_access,
        dst_access_mask: dst_access,
        old_layout,
        new_layout,
        src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        image,
        subresource_range: subresource(vk::ImageAspectFlags::COLOR),
        ..Default::default()
    };
    device.cmd_pipeline_barrier(
        cmd,
        src_stage,
        dst_stage,
        vk::DependencyFlags::empty(),
        &[],
        &[],
        std::slice::from_ref(&barrier),
    );
}

pub(crate) fn transition_masks(
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> (
    vk::AccessFlags,
    vk::AccessFlags,
    vk::PipelineStageFlags,
    vk::PipelineStageFlags,
) {
    match (old_layout, new_layout) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => (
            vk::AccessFlags::empty(),
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
        ),
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => (
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
        ),
        _ => (
            vk::AccessFlags::MEMORY_WRITE,
            vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
            vk::PipelineStageFlags::ALL_COMMANDS,
            vk::PipelineStageFlags::ALL_COMMANDS,
        ),
    }
}
