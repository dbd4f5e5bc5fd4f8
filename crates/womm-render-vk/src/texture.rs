// SPDX-License-Identifier: CEPL-1.0
//! Sampled RGBA8 textures uploaded through a staging buffer.

use crate::buffer::{GpuBuffer, HOST_COHERENT};
use crate::command;
use crate::device::Core;
use crate::image::{self, GpuImage, ImageDesc};
use anyhow::{bail, Context, Result};
use ash::vk;
use tracing::info;
use womm_render::{TextureData, VramTag};

pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

fn expected_len(tex: &TextureData) -> Result<u64> {
    if tex.channels != 4 {
        bail!("texture '{}' has {} channels; expected RGBA", tex.name, tex.channels);
    }
    if tex.width == 0 || tex.height == 0 {
        bail!("texture '{}' is empty", tex.name);
    }
    let want = tex.width as u64 * tex.height as u64 * 4;
    if tex.byte_len() != want {
        bail!(
            "texture '{}' is {}x{} but carries {} bytes (expected {want})",
            tex.name,
            tex.width,
            tex.height,
            tex.byte_len()
        );
    }
    Ok(want)
}

pub(crate) fn sampler_info() -> vk::SamplerCreateInfo<'static> {
    vk::SamplerCreateInfo {
        s_type: vk::StructureType::SAMPLER_CREATE_INFO,
        mag_filter: vk::Filter::LINEAR,
        min_filter: vk::Filter::LINEAR,
        mipmap_mode: vk::SamplerMipmapMode::LINEAR,
        address_mode_u: vk::SamplerAddressMode::REPEAT,
        address_mode_v: vk::SamplerAddressMode::REPEAT,
        address_mode_w: vk::SamplerAddressMode::REPEAT,
        anisotropy_enable: vk::FALSE,
        max_anisotropy: 1.0,
        compare_op: vk::CompareOp::ALWAYS,
        border_color: vk::BorderColor::INT_OPAQUE_BLACK,
        unnormalized_coordinates: vk::FALSE,
        ..Default::default()
    }
}

pub struct GpuTexture {
    pub name: String,
    pub image: GpuImage,
    pub sampler: vk::Sampler,
}

impl GpuTexture {
    pub unsafe fn upload(core: &mut Core, tex: &TextureData) -> Result<Self> {
        let size = expected_len(tex)?;

        let mut staging = GpuBuffer::new(
            core,
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            HOST_COHERENT,
            VramTag::BufferStaging,
        )?;
        let desc = ImageDesc::sampled(tex.width, tex.height, TEXTURE_FORMAT);
        let mut img = match GpuImage::new(core, &desc) {
            Ok(i) => i,
            Err(err) => {
                staging.destroy(core);
                return Err(err);
            }
        };

        let mut result = staging.load(&core.device, 0, &tex.pixels);
        if result.is_ok() {
            result = copy_into(core, staging.handle, &img);
        }
        staging.destroy(core);
        let sampler = result.and_then(|()| {
            core.device
                .create_sampler(&sampler_info(), None)
                .context("create_sampler")
        });
        let sampler = match sampler {
            Ok(s) => s,
            Err(err) => {
                img.destroy(core);
                return Err(err).with_context(|| format!("texture '{}'", tex.name));
            }
        };

        info!("vk: texture '{}' uploaded ({}x{})", tex.name, tex.width, tex.height);
        Ok(Self {
            name: tex.name.clone(),
            image: img,
            sampler,
        })
    }

    pub unsafe fn destroy(&mut self, core: &mut Core) {
        if self.sampler != vk::Sampler::null() {
            core.device.destroy_sampler(self.sampler, None);
            self.sampler = vk::Sampler::null();
        }
        self.image.destroy(core);
    }
}

/// UNDEFINED -> TRANSFER_DST, copy, -> SHADER_READ_ONLY, in one submission.
unsafe fn copy_into(core: &Core, src: vk::Buffer, img: &GpuImage) -> Result<()> {
    let cmd = command::begin_one_time(core)?;
    image::transition(
        &core.device,
        cmd,
        img.handle,
        vk::ImageLayout::UNDEFINED,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    );
    let region = vk::BufferImageCopy {
        buffer_offset: 0,
        buffer_row_length: 0,
        buffer_image_height: 0,
        image_subresource: vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        },
        image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
        image_extent: vk::Extent3D {
            width: img.width,
            height: img.height,
            depth: 1,
        },
    };
    core.device.cmd_copy_buffer_to_image(
        cmd,
        src,
        img.handle,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        std::slice::from_ref(&region),
    );
    image::transition(
        &core.device,
        cmd,
        img.handle,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    );
    command::end_one_time(core, cmd)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkerboard_passes_validation() {
        let tex = TextureData::checkerboard();
        assert_eq!(expected_len(&tex).unwrap(), 256 * 256 * 4);
    }

    #[test]
    fn short_pixel_data_is_rejected() {
        let mut tex = TextureData::checkerboard();
        tex.pixels.truncate(100);
        let err = expected_len(&tex).unwrap_err().to_string();
        assert!(err.contains("default_checker"), "{err}");
    }

    #[test]
    fn non_rgba_is_rejected() {
        let tex = TextureData {
            name: "gray".into(),
            width: 2,
            height: 2,
            channels: 1,
            pixels: vec![0; 4],
        };
        assert!(expected_len(&tex).is_err());
    }

    #[test]
    fn sampler_repeats_and_filters_linearly() {
        let info = sampler_info();
        assert_eq!(info.address_mode_u, vk::SamplerAddressMode::REPEAT);
        assert_eq!(info.address_mode_v, vk::SamplerAddressMode::REPEAT);
        assert_eq!(info.mag_filter, vk::Filter::LINEAR);
    }
}
