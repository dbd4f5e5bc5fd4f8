// SPDX-License-Identifier: CEPL-1.0
//! Vulkan render passes built from a [`PassDesc`], and the per-image
//! framebuffers for the world and UI passes.

use crate::device::Core;
use crate::swapchain::Swapchain;
use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;
use womm_core::{MemTag, MemTracker, TrackedVec};
use womm_render::{AttachmentSpec, ClearFlags, Layout, LoadOp, PassDesc, StoreOp};

fn load_op(op: LoadOp) -> vk::AttachmentLoadOp {
    match op {
        LoadOp::Clear => vk::AttachmentLoadOp::CLEAR,
        LoadOp::Load => vk::AttachmentLoadOp::LOAD,
        LoadOp::DontCare => vk::AttachmentLoadOp::DONT_CARE,
    }
}

fn store_op(op: StoreOp) -> vk::AttachmentStoreOp {
    match op {
        StoreOp::Store => vk::AttachmentStoreOp::STORE,
        StoreOp::DontCare => vk::AttachmentStoreOp::DONT_CARE,
    }
}

fn layout(l: Layout) -> vk::ImageLayout {
    match l {
        Layout::Undefined => vk::ImageLayout::UNDEFINED,
        Layout::ColorAttachment => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        Layout::DepthStencilAttachment => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        Layout::PresentSrc => vk::ImageLayout::PRESENT_SRC_KHR,
    }
}

pub(crate) fn attachment_description(
    att: AttachmentSpec,
    format: vk::Format,
) -> vk::AttachmentDescription {
    vk::AttachmentDescription {
        format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: load_op(att.load),
        store_op: store_op(att.store),
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: layout(att.initial),
        final_layout: layout(att.final_layout),
        ..Default::default()
    }
}

pub(crate) fn dependencies(desc: &PassDesc) -> Vec<vk::SubpassDependency> {
    let mut deps = Vec::with_capacity(desc.dependency_count());
    deps.push(vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        src_access_mask: vk::AccessFlags::empty(),
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_READ
            | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        dependency_flags: vk::DependencyFlags::empty(),
    });
    if desc.next_pass {
        deps.push(vk::SubpassDependency {
            src_subpass: 0,
            dst_subpass: vk::SUBPASS_EXTERNAL,
            src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_stage_mask: vk::PipelineStageFlags::FRAGMENT_SHADER,
            src_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            dst_access_mask: vk::AccessFlags::SHADER_READ,
            dependency_flags: vk::DependencyFlags::empty(),
        });
    }
    deps
}

pub(crate) fn clear_values(desc: &PassDesc) -> Vec<vk::ClearValue> {
    let mut values = Vec::with_capacity(desc.clear_value_count());
    if desc.clear.contains(ClearFlags::COLOR) {
        values.push(vk::ClearValue {
            color: vk::ClearColorValue {
                float32: desc.clear_color,
            },
        });
    }
    if desc.clear.intersects(ClearFlags::DEPTH | ClearFlags::STENCIL) {
        values.push(vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: desc.depth,
                stencil: desc.stencil,
            },
        });
    }
    values
}

pub struct RenderPass {
    pub handle: vk::RenderPass,
    pub desc: PassDesc,
}

impl RenderPass {
    pub unsafe fn new(core: &Core, color_format: vk::Format, desc: PassDesc) -> Result<Self> {
        let mut attachments = vec![attachment_description(desc.color_attachment(), color_format)];
        if let Some(depth) = desc.depth_attachment() {
            attachments.push(attachment_description(depth, core.depth_format));
        }

        let color_ref = vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        };
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };

        let subpass = vk::SubpassDescription {
            pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
            color_attachment_count: 1,
            p_color_attachments: &color_ref,
            p_depth_stencil_attachment: if desc.has_depth() {
                &depth_ref
            } else {
                std::ptr::null()
            },
            ..Default::default()
        };

        let deps = dependencies(&desc);
        let rp_info = vk::RenderPassCreateInfo {
            s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
            attachment_count: attachments.len() as u32,
            p_attachments: attachments.as_ptr(),
            subpass_count: 1,
            p_subpasses: &subpass,
            dependency_count: deps.len() as u32,
            p_dependencies: deps.as_ptr(),
            ..Default::default()
        };
        let handle = core
            .device
            .create_render_pass(&rp_info, None)
            .context("create_render_pass")?;
        Ok(Self { handle, desc })
    }

    pub unsafe fn begin(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
    ) {
        let clears = clear_values(&self.desc);
        let rp_begin = vk::RenderPassBeginInfo {
            s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
            render_pass: self.handle,
            framebuffer,
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            },
            clear_value_count: clears.len() as u32,
            p_clear_values: clears.as_ptr(),
            ..Default::default()
        };
        device.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);
    }

    pub unsafe fn end(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        device.cmd_end_render_pass(cmd);
    }

    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        if self.handle != vk::RenderPass::null() {
            device.destroy_render_pass(self.handle, None);
            self.handle = vk::RenderPass::null();
        }
    }
}

/// One world and one UI framebuffer per swapchain image.
pub struct Framebuffers {
    pub world: TrackedVec<vk::Framebuffer>,
    pub ui: TrackedVec<vk::Framebuffer>,
}

unsafe fn create_framebuffer(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    attachments: &[vk::ImageView],
    extent: vk::Extent2D,
) -> Result<vk::Framebuffer> {
    let fb_info = vk::FramebufferCreateInfo {
        s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
        render_pass,
        attachment_count: attachments.len() as u32,
        p_attachments: attachments.as_ptr(),
        width: extent.width,
        height: extent.height,
        layers: 1,
        ..Default::default()
    };
    device
        .create_framebuffer(&fb_info, None)
        .context("create_framebuffer")
}

/// The swapchain view is the color attachment; the depth image is shared by
/// every world framebuffer.
pub(crate) fn world_attachments(
    desc: &PassDesc,
    color: vk::ImageView,
    depth: vk::ImageView,
) -> Vec<vk::ImageView> {
    if desc.has_depth() {
        vec![color, depth]
    } else {
        vec![color]
    }
}

impl Framebuffers {
    pub unsafe fn new(
        device: &ash::Device,
        heap: &Arc<MemTracker>,
        swapchain: &Swapchain,
        world: &RenderPass,
        ui: &RenderPass,
    ) -> Result<Self> {
        let mut fbs = Self {
            world: TrackedVec::new(heap, MemTag::Render),
            ui: TrackedVec::new(heap, MemTag::Render),
        };
        if let Err(err) = fbs.rebuild(device, swapchain, world, ui) {
            fbs.destroy(device);
            return Err(err);
        }
        Ok(fbs)
    }

    /// Drop the old framebuffers and build new ones against the current
    /// swapchain views.
    pub unsafe fn rebuild(
        &mut self,
        device: &ash::Device,
        swapchain: &Swapchain,
        world: &RenderPass,
        ui: &RenderPass,
    ) -> Result<()> {
        self.destroy(device);

        let extent = swapchain.extent;
        let mut world_fbs = Vec::with_capacity(swapchain.views.len());
        let mut ui_fbs = Vec::with_capacity(swapchain.views.len());
        for &view in swapchain.views.iter() {
            let world_atts = world_attachments(&world.desc, view, swapchain.depth.view);
            let made = create_framebuffer(device, world.handle, &world_atts, extent).and_then(|w| {
                world_fbs.push(w);
                create_framebuffer(device, ui.handle, &[view], extent)
            });
            match made {
                Ok(u) => ui_fbs.push(u),
                Err(err) => {
                    for fb in world_fbs.into_iter().chain(ui_fbs) {
                        device.destroy_framebuffer(fb, None);
                    }
                    return Err(err);
                }
            }
        }
        self.world.replace(world_fbs);
        self.ui.replace(ui_fbs);
        Ok(())
    }

    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        for &fb in self.world.iter().chain(self.ui.iter()) {
            device.destroy_framebuffer(fb, None);
        }
        self.world.clear();
        self.ui.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn world_color_clears_from_undefined_into_attachment_layout() {
        let desc = PassDesc::world([0.0, 0.0, 0.0, 1.0]);
        let att = attachment_description(desc.color_attachment(), vk::Format::B8G8R8A8_UNORM);
        assert_eq!(att.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(att.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(att.initial_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(att.final_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

        let depth = attachment_description(desc.depth_attachment().unwrap(), vk::Format::D32_SFLOAT);
        assert_eq!(depth.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(depth.store_op, vk::AttachmentStoreOp::DONT_CARE);
        assert_eq!(
            depth.final_layout,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        );
    }

    #[test]
    fn ui_color_loads_and_ends_in_present() {
        let desc = PassDesc::ui();
        let att = attachment_description(desc.color_attachment(), vk::Format::B8G8R8A8_UNORM);
        assert_eq!(att.load_op, vk::AttachmentLoadOp::LOAD);
        assert_eq!(att.initial_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(att.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert!(desc.depth_attachment().is_none());
    }

    #[test]
    fn outgoing_dependency_only_for_last_pass() {
        let world = dependencies(&PassDesc::world([0.0; 4]));
        assert_eq!(world.len(), 1);
        assert_eq!(world[0].src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(world[0].dst_subpass, 0);

        let ui = dependencies(&PassDesc::ui());
        assert_eq!(ui.len(), 2);
        assert_eq!(ui[1].src_subpass, 0);
        assert_eq!(ui[1].dst_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(ui[1].dst_access_mask, vk::AccessFlags::SHADER_READ);
    }

    #[test]
    fn world_framebuffer_binds_view_then_depth() {
        let color = vk::ImageView::from_raw(0x10);
        let depth = vk::ImageView::from_raw(0x20);
        let world = PassDesc::world([0.0; 4]);
        assert_eq!(world_attachments(&world, color, depth), vec![color, depth]);

        let mut flat = world;
        flat.clear = ClearFlags::COLOR;
        assert_eq!(world_attachments(&flat, color, depth), vec![color]);
    }

    #[test]
    fn clear_values_follow_flags() {
        let world = PassDesc::world([0.25, 0.5, 0.75, 1.0]);
        let values = clear_values(&world);
        assert_eq!(values.len(), 2);
        unsafe {
            assert_eq!(values[0].color.float32, [0.25, 0.5, 0.75, 1.0]);
            assert_eq!(values[1].depth_stencil.depth, 1.0);
        }
        assert!(clear_values(&PassDesc::ui()).is_empty());
    }
}
