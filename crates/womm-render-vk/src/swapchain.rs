// SPDX-License-Identifier: CEPL-1.0
//! Presentable image chain, its image views (the color attachments) and the
//! depth attachment sized to it.

use crate::device::{surface_capabilities, Core};
use crate::image::{create_view, GpuImage, ImageDesc};
use anyhow::{Context, Result};
use ash::khr::swapchain;
use ash::vk;
use std::sync::Arc;
use tracing::{debug, info};
use womm_core::{MemTag, MemTracker, TrackedVec};
use womm_render::{rebuild_chain, ChainSteps, RenderSize};

pub(crate) fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    match formats {
        [only] if only.format == vk::Format::UNDEFINED => Some(vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }),
        _ => formats.first().copied(),
    }
}

/// FIFO is the only mode every driver must support.
pub(crate) fn choose_present_mode(_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    vk::PresentModeKHR::FIFO
}

pub(crate) fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// `min + 1`, clamped to the maximum when the surface has one.
pub(crate) fn image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let want = caps.min_image_count + 1;
    if caps.max_image_count == 0 {
        want
    } else {
        want.min(caps.max_image_count)
    }
}

fn fmt_name(f: vk::Format) -> &'static str {
    match f {
        vk::Format::B8G8R8A8_UNORM => "B8G8R8A8_UNORM",
        vk::Format::B8G8R8A8_SRGB => "B8G8R8A8_SRGB",
        vk::Format::R8G8B8A8_UNORM => "R8G8B8A8_UNORM",
        vk::Format::R8G8B8A8_SRGB => "R8G8B8A8_SRGB",
        _ => "OTHER",
    }
}

pub struct Swapchain {
    loader: swapchain::Device,
    pub handle: vk::SwapchainKHR,
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub images: TrackedVec<vk::Image>,
    pub views: TrackedVec<vk::ImageView>,
    pub depth: GpuImage,
}

struct Chain {
    handle: vk::SwapchainKHR,
    format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
}

unsafe fn create_chain(
    core: &Core,
    loader: &swapchain::Device,
    caps: &vk::SurfaceCapabilitiesKHR,
    extent: vk::Extent2D,
    old: vk::SwapchainKHR,
) -> Result<Chain> {
    // --- Query formats / present modes ---
    let formats = core
        .surface_loader
        .get_physical_device_surface_formats(core.phys, core.surface)
        .context("get_physical_device_surface_formats")?;
    let modes = core
        .surface_loader
        .get_physical_device_surface_present_modes(core.phys, core.surface)
        .context("get_physical_device_surface_present_modes")?;

    let format = choose_surface_format(&formats).context("surface reports no formats")?;
    let present_mode = choose_present_mode(&modes);

    // --- Sharing mode: concurrent only across distinct families ---
    let family_indices = [core.families.graphics, core.families.present];
    let (sharing_mode, index_count) = if core.families.graphics != core.families.present {
        (vk::SharingMode::CONCURRENT, family_indices.len() as u32)
    } else {
        (vk::SharingMode::EXCLUSIVE, 0)
    };

    let swap_info = vk::SwapchainCreateInfoKHR {
        s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
        surface: core.surface,
        min_image_count: image_count(caps),
        image_format: format.format,
        image_color_space: format.color_space,
        image_extent: extent,
        image_array_layers: 1,
        image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
        image_sharing_mode: sharing_mode,
        queue_family_index_count: index_count,
        p_queue_family_indices: family_indices.as_ptr(),
        pre_transform: caps.current_transform,
        composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
        present_mode,
        clipped: vk::TRUE,
        old_swapchain: old,
        ..Default::default()
    };
    let handle = loader
        .create_swapchain(&swap_info, None)
        .context("create_swapchain")?;

    Ok(Chain {
        handle,
        format,
        present_mode,
        extent,
    })
}

impl Swapchain {
    pub unsafe fn new(core: &mut Core, size: RenderSize, heap: &Arc<MemTracker>) -> Result<Self> {
        let loader = swapchain::Device::new(&core.instance, &core.device);
        let caps = surface_capabilities(core)?;
        let extent = choose_extent(&caps, size);
        let chain = create_chain(core, &loader, &caps, extent, vk::SwapchainKHR::null())?;

        let mut sc = Self {
            loader,
            handle: chain.handle,
            format: chain.format,
            present_mode: chain.present_mode,
            extent: chain.extent,
            images: TrackedVec::new(heap, MemTag::Render),
            views: TrackedVec::new(heap, MemTag::Render),
            depth: GpuImage::empty(),
        };
        if let Err(err) = sc.create_images(core) {
            sc.destroy(core);
            return Err(err);
        }
        sc.log_ready();
        Ok(sc)
    }

    /// Returns `false` when the surface is currently 0x0 and nothing was
    /// rebuilt. Caller must have drained the GPU. The step order lives in
    /// [`rebuild_chain`].
    pub unsafe fn reinit(&mut self, core: &mut Core, size: RenderSize) -> Result<bool> {
        let caps = surface_capabilities(core)?;
        let extent = choose_extent(&caps, size);
        if extent.width == 0 || extent.height == 0 {
            debug!("vk: surface extent is 0x0, swapchain left as is");
            return Ok(false);
        }

        let mut handle = self.handle;
        let rebuilt = rebuild_chain(
            &mut ChainRebuild {
                swapchain: self,
                core,
                caps,
                extent,
            },
            &mut handle,
        );
        self.handle = handle;
        rebuilt?;
        self.log_ready();
        Ok(true)
    }

    unsafe fn create_images(&mut self, core: &mut Core) -> Result<()> {
        let images = self
            .loader
            .get_swapchain_images(self.handle)
            .context("get_swapchain_images")?;
        self.images.replace(images);

        let mut views = Vec::with_capacity(self.images.len());
        for &img in self.images.iter() {
            let view = create_view(&core.device, img, self.format.format, vk::ImageAspectFlags::COLOR);
            match view {
                Ok(v) => views.push(v),
                Err(err) => {
                    for v in views {
                        core.device.destroy_image_view(v, None);
                    }
                    return Err(err);
                }
            }
        }
        self.views.replace(views);

        let depth_desc =
            ImageDesc::depth_target(self.extent.width, self.extent.height, core.depth_format);
        self.depth = GpuImage::new(core, &depth_desc).context("depth attachment")?;
        Ok(())
    }

    unsafe fn destroy_images(&mut self, core: &mut Core) {
        self.depth.destroy(core);
        for &view in self.views.iter() {
            core.device.destroy_image_view(view, None);
        }
        self.views.clear();
        self.images.clear();
    }

    fn log_ready(&self) {
        info!(
            "vk: swapchain ready ({}x{}, {} images, fmt {}, {:?})",
            self.extent.width,
            self.extent.height,
            self.images.len(),
            fmt_name(self.format.format),
            self.present_mode
        );
    }

    pub unsafe fn acquire(&self, signal: vk::Semaphore) -> ash::prelude::VkResult<(u32, bool)> {
        self.loader
            .acquire_next_image(self.handle, u64::MAX, signal, vk::Fence::null())
    }

    /// `Ok(true)` means presented but suboptimal.
    pub unsafe fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> ash::prelude::VkResult<bool> {
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait,
            swapchain_count: 1,
            p_swapchains: &self.handle,
            p_image_indices: &image_index,
            ..Default::default()
        };
        self.loader.queue_present(queue, &present)
    }

    pub unsafe fn destroy(&mut self, core: &mut Core) {
        self.destroy_images(core);
        if self.handle != vk::SwapchainKHR::null() {
            self.loader.destroy_swapchain(self.handle, None);
            self.handle = vk::SwapchainKHR::null();
        }
    }
}

/// Vulkan side of [`ChainSteps`] for one reinit.
struct ChainRebuild<'a> {
    swapchain: &'a mut Swapchain,
    core: &'a mut Core,
    caps: vk::SurfaceCapabilitiesKHR,
    extent: vk::Extent2D,
}

impl ChainSteps for ChainRebuild<'_> {
    type Handle = vk::SwapchainKHR;

    fn release_attachments(&mut self) {
        unsafe { self.swapchain.destroy_images(self.core) }
    }

    fn create_chain(&mut self, old: vk::SwapchainKHR) -> Result<vk::SwapchainKHR> {
        let chain = unsafe {
            create_chain(self.core, &self.swapchain.loader, &self.caps, self.extent, old)?
        };
        self.swapchain.format = chain.format;
        self.swapchain.present_mode = chain.present_mode;
        self.swapchain.extent = chain.extent;
        Ok(chain.handle)
    }

    fn destroy_chain(&mut self, handle: vk::SwapchainKHR) {
        unsafe { self.swapchain.loader.destroy_swapchain(handle, None) }
    }

    fn create_attachments(&mut self, handle: vk::SwapchainKHR) -> Result<()> {
        self.swapchain.handle = handle;
        unsafe { self.swapchain.create_images(self.core) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(current: (u32, u32), min: (u32, u32), max: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: min.0,
                height: min.1,
            },
            max_image_extent: vk::Extent2D {
                width: max.0,
                height: max.1,
            },
            ..Default::default()
        }
    }

    #[test]
    fn undefined_only_falls_back_to_bgra_srgb() {
        let only_undefined = [vk::SurfaceFormatKHR {
            format: vk::Format::UNDEFINED,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }];
        let picked = choose_surface_format(&only_undefined).unwrap();
        assert_eq!(picked.format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(picked.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn first_reported_format_wins() {
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];
        assert_eq!(
            choose_surface_format(&formats).unwrap().format,
            vk::Format::R8G8B8A8_SRGB
        );
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn present_mode_is_always_fifo() {
        let modes = [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn extent_uses_current_unless_sentinel() {
        let fixed = caps((800, 600), (1, 1), (4096, 4096));
        let want = RenderSize {
            width: 1920,
            height: 1080,
        };
        assert_eq!(
            choose_extent(&fixed, want),
            vk::Extent2D {
                width: 800,
                height: 600
            }
        );

        let free = caps((u32::MAX, u32::MAX), (64, 64), (1600, 900));
        assert_eq!(
            choose_extent(&free, want),
            vk::Extent2D {
                width: 1600,
                height: 900
            }
        );
        let tiny = RenderSize {
            width: 10,
            height: 10,
        };
        assert_eq!(
            choose_extent(&free, tiny),
            vk::Extent2D {
                width: 64,
                height: 64
            }
        );
    }

    #[test]
    fn image_count_is_min_plus_one_clamped() {
        let mut c = caps((1, 1), (1, 1), (1, 1));
        c.min_image_count = 2;
        c.max_image_count = 0;
        assert_eq!(image_count(&c), 3);
        c.max_image_count = 2;
        assert_eq!(image_count(&c), 2);
        c.max_image_count = 8;
        assert_eq!(image_count(&c), 3);
    }
}
