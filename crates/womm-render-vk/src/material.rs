// SPDX-License-Identifier: CEPL-1.0
//! The world material: one shader pair, one pipeline and two descriptor
//! frequencies.
//!
//! Set 0 (global) carries the camera block for the vertex stage. Set 1
//! (object) carries a dynamic uniform block with one slot per drawn object
//! plus the diffuse sampler for the fragment stage. Both are backed by one
//! persistently mapped buffer per frame in flight.

use crate::buffer::GpuBuffer;
use crate::device::Core;
use crate::pipeline::{load_spirv, Pipeline};
use anyhow::{anyhow, bail, Context, Result};
use ash::vk;
use tracing::{debug, info};
use womm_math::{CameraData, Mat4, ObjectData};
use womm_render::{RenderConfig, ShaderStage, VramTag, FRAME_FLIGHT, MAX_BUNDLE_OBJECTS};

/// Upper bound on object descriptor sets the pool can hand out.
pub const VK_MATERIAL_COUNT: u32 = 1024;

const BUILTIN_VERT: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/world.vert.spv"));
const BUILTIN_FRAG: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/world.frag.spv"));

const GLOBAL_UBO_SIZE: u64 = std::mem::size_of::<CameraData>() as u64;
const OBJECT_DATA_SIZE: u64 = std::mem::size_of::<ObjectData>() as u64;

/// Per-object slot size in the dynamic uniform buffer.
pub(crate) fn object_stride(min_alignment: u64) -> u64 {
    let align = min_alignment.max(1);
    OBJECT_DATA_SIZE.div_ceil(align) * align
}

unsafe fn set_layout(
    device: &ash::Device,
    bindings: &[vk::DescriptorSetLayoutBinding],
) -> Result<vk::DescriptorSetLayout> {
    let info = vk::DescriptorSetLayoutCreateInfo {
        s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
        binding_count: bindings.len() as u32,
        p_bindings: bindings.as_ptr(),
        ..Default::default()
    };
    device
        .create_descriptor_set_layout(&info, None)
        .context("create_descriptor_set_layout")
}

unsafe fn pool(
    device: &ash::Device,
    sizes: &[vk::DescriptorPoolSize],
    max_sets: u32,
) -> Result<vk::DescriptorPool> {
    let info = vk::DescriptorPoolCreateInfo {
        s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
        max_sets,
        pool_size_count: sizes.len() as u32,
        p_pool_sizes: sizes.as_ptr(),
        ..Default::default()
    };
    device
        .create_descriptor_pool(&info, None)
        .context("create_descriptor_pool")
}

unsafe fn allocate_sets(
    device: &ash::Device,
    pool: vk::DescriptorPool,
    layout: vk::DescriptorSetLayout,
) -> Result<[vk::DescriptorSet; FRAME_FLIGHT]> {
    let layouts = [layout; FRAME_FLIGHT];
    let info = vk::DescriptorSetAllocateInfo {
        s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
        descriptor_pool: pool,
        descriptor_set_count: layouts.len() as u32,
        p_set_layouts: layouts.as_ptr(),
        ..Default::default()
    };
    let sets = device
        .allocate_descriptor_sets(&info)
        .context("allocate_descriptor_sets")?;
    sets.try_into()
        .map_err(|v: Vec<_>| anyhow!("expected {FRAME_FLIGHT} descriptor sets, got {}", v.len()))
}

pub struct Material {
    pub name: String,
    pub pipeline: Pipeline,
    global_layout: vk::DescriptorSetLayout,
    object_layout: vk::DescriptorSetLayout,
    global_pool: vk::DescriptorPool,
    object_pool: vk::DescriptorPool,
    global_sets: [vk::DescriptorSet; FRAME_FLIGHT],
    object_sets: [vk::DescriptorSet; FRAME_FLIGHT],
    global_ubos: Vec<GpuBuffer>,
    object_ubos: Vec<GpuBuffer>,
    object_stride: u64,
    /// Object sets whose sampler binding is stale for that frame.
    needs_update: [bool; FRAME_FLIGHT],
    texture: Option<(vk::ImageView, vk::Sampler)>,
    vs_code: Vec<u32>,
    fs_code: Vec<u32>,
}

impl Material {
    /// Shaders come from `<assets>/shaders/<material>.{vert,frag}.spv`,
    /// falling back to the pair compiled into the crate.
    pub unsafe fn world(
        core: &mut Core,
        config: &RenderConfig,
        render_pass: vk::RenderPass,
    ) -> Result<Self> {
        let name = config.material.clone();
        let vs_code = load_spirv(&config.shader_path(&name, ShaderStage::Vertex), BUILTIN_VERT)?;
        let fs_code = load_spirv(&config.shader_path(&name, ShaderStage::Fragment), BUILTIN_FRAG)?;

        let mut mat = Self {
            name,
            pipeline: Pipeline {
                handle: vk::Pipeline::null(),
                layout: vk::PipelineLayout::null(),
            },
            global_layout: vk::DescriptorSetLayout::null(),
            object_layout: vk::DescriptorSetLayout::null(),
            global_pool: vk::DescriptorPool::null(),
            object_pool: vk::DescriptorPool::null(),
            global_sets: [vk::DescriptorSet::null(); FRAME_FLIGHT],
            object_sets: [vk::DescriptorSet::null(); FRAME_FLIGHT],
            global_ubos: Vec::with_capacity(FRAME_FLIGHT),
            object_ubos: Vec::with_capacity(FRAME_FLIGHT),
            object_stride: object_stride(core.min_uniform_alignment()),
            needs_update: [true; FRAME_FLIGHT],
            texture: None,
            vs_code,
            fs_code,
        };
        if let Err(err) = mat.create(core, render_pass) {
            mat.destroy(core);
            return Err(err).with_context(|| format!("material '{}'", config.material));
        }
        info!(
            "vk: material '{}' ready (object stride {} bytes)",
            mat.name, mat.object_stride
        );
        Ok(mat)
    }

    unsafe fn create(&mut self, core: &mut Core, render_pass: vk::RenderPass) -> Result<()> {
        // --- Layouts ---
        let global_bindings = [vk::DescriptorSetLayoutBinding {
            binding: 0,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: 1,
            stage_flags: vk::ShaderStageFlags::VERTEX,
            ..Default::default()
        }];
        let object_bindings = [
            vk::DescriptorSetLayoutBinding {
                binding: 0,
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
                descriptor_count: 1,
                stage_flags: vk::ShaderStageFlags::FRAGMENT,
                ..Default::default()
            },
            vk::DescriptorSetLayoutBinding {
                binding: 1,
                descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: 1,
                stage_flags: vk::ShaderStageFlags::FRAGMENT,
                ..Default::default()
            },
        ];
        self.global_layout = set_layout(&core.device, &global_bindings)?;
        self.object_layout = set_layout(&core.device, &object_bindings)?;

        // --- Pools + sets ---
        self.global_pool = pool(
            &core.device,
            &[vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: FRAME_FLIGHT as u32,
            }],
            FRAME_FLIGHT as u32,
        )?;
        self.object_pool = pool(
            &core.device,
            &[
                vk::DescriptorPoolSize {
                    ty: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
                    descriptor_count: VK_MATERIAL_COUNT,
                },
                vk::DescriptorPoolSize {
                    ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                    descriptor_count: VK_MATERIAL_COUNT,
                },
            ],
            VK_MATERIAL_COUNT,
        )?;
        self.global_sets = allocate_sets(&core.device, self.global_pool, self.global_layout)?;
        self.object_sets = allocate_sets(&core.device, self.object_pool, self.object_layout)?;

        // --- Uniform buffers, one per frame in flight ---
        let object_ubo_size = self.object_stride * MAX_BUNDLE_OBJECTS as u64;
        for _ in 0..FRAME_FLIGHT {
            let global = GpuBuffer::new_mapped(
                core,
                GLOBAL_UBO_SIZE,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                VramTag::BufferUniform,
            )?;
            self.global_ubos.push(global);
            let object = GpuBuffer::new_mapped(
                core,
                object_ubo_size,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                VramTag::BufferUniform,
            )?;
            self.object_ubos.push(object);
        }
        self.write_buffer_descriptors(&core.device);

        // --- Pipeline ---
        self.pipeline = Pipeline::new(
            &core.device,
            render_pass,
            &[self.global_layout, self.object_layout],
            &self.vs_code,
            &self.fs_code,
        )?;
        Ok(())
    }

    /// Uniform buffer bindings never change after creation.
    unsafe fn write_buffer_descriptors(&self, device: &ash::Device) {
        for frame in 0..FRAME_FLIGHT {
            let global_info = vk::DescriptorBufferInfo {
                buffer: self.global_ubos[frame].handle,
                offset: 0,
                range: GLOBAL_UBO_SIZE,
            };
            let object_info = vk::DescriptorBufferInfo {
                buffer: self.object_ubos[frame].handle,
                offset: 0,
                range: OBJECT_DATA_SIZE,
            };
            let writes = [
                vk::WriteDescriptorSet {
                    s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                    dst_set: self.global_sets[frame],
                    dst_binding: 0,
                    descriptor_count: 1,
                    descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                    p_buffer_info: &global_info,
                    ..Default::default()
                },
                vk::WriteDescriptorSet {
                    s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                    dst_set: self.object_sets[frame],
                    dst_binding: 0,
                    descriptor_count: 1,
                    descriptor_type: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
                    p_buffer_info: &object_info,
                    ..Default::default()
                },
            ];
            device.update_descriptor_sets(&writes, &[]);
        }
    }

    /// Rebind the diffuse texture. Every frame's object set is rewritten
    /// the next time that frame is recorded.
    pub fn set_texture(&mut self, view: vk::ImageView, sampler: vk::Sampler) {
        self.texture = Some((view, sampler));
        self.needs_update = [true; FRAME_FLIGHT];
    }

    /// Called once `frame`'s fence has signaled, before recording.
    pub unsafe fn apply_updates(&mut self, device: &ash::Device, frame: usize) -> Result<()> {
        if !self.needs_update[frame] {
            return Ok(());
        }
        let Some((view, sampler)) = self.texture else {
            bail!("material '{}' has no texture bound", self.name);
        };
        let image_info = vk::DescriptorImageInfo {
            sampler,
            image_view: view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        };
        let write = vk::WriteDescriptorSet {
            s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
            dst_set: self.object_sets[frame],
            dst_binding: 1,
            descriptor_count: 1,
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            p_image_info: &image_info,
            ..Default::default()
        };
        device.update_descriptor_sets(std::slice::from_ref(&write), &[]);
        self.needs_update[frame] = false;
        debug!("vk: material '{}' sampler rewritten for frame {frame}", self.name);
        Ok(())
    }

    pub fn write_global(&self, frame: usize, camera: &CameraData) -> Result<()> {
        self.global_ubos[frame].write(0, bytemuck::bytes_of(camera))
    }

    pub fn write_object(&self, frame: usize, index: usize, data: &ObjectData) -> Result<()> {
        if index >= MAX_BUNDLE_OBJECTS {
            bail!("object index {index} exceeds {MAX_BUNDLE_OBJECTS}");
        }
        self.object_ubos[frame].write(index as u64 * self.object_stride, bytemuck::bytes_of(data))
    }

    /// Pipeline plus the global set.
    pub unsafe fn bind(&self, device: &ash::Device, cmd: vk::CommandBuffer, frame: usize) {
        self.pipeline.bind(device, cmd);
        device.cmd_bind_descriptor_sets(
            cmd,
            vk::PipelineBindPoint::GRAPHICS,
            self.pipeline.layout,
            0,
            std::slice::from_ref(&self.global_sets[frame]),
            &[],
        );
    }

    pub unsafe fn bind_object(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        frame: usize,
        index: usize,
    ) {
        let offset = (index as u64 * self.object_stride) as u32;
        device.cmd_bind_descriptor_sets(
            cmd,
            vk::PipelineBindPoint::GRAPHICS,
            self.pipeline.layout,
            1,
            std::slice::from_ref(&self.object_sets[frame]),
            &[offset],
        );
    }

    pub unsafe fn push_model(&self, device: &ash::Device, cmd: vk::CommandBuffer, model: &Mat4) {
        device.cmd_push_constants(
            cmd,
            self.pipeline.layout,
            vk::ShaderStageFlags::VERTEX,
            0,
            bytemuck::bytes_of(model),
        );
    }

    /// New pipeline against a rebuilt render pass. Caller has drained the GPU.
    pub unsafe fn rebuild_pipeline(
        &mut self,
        device: &ash::Device,
        render_pass: vk::RenderPass,
    ) -> Result<()> {
        self.pipeline.destroy(device);
        self.pipeline = Pipeline::new(
            device,
            render_pass,
            &[self.global_layout, self.object_layout],
            &self.vs_code,
            &self.fs_code,
        )?;
        Ok(())
    }

    // STRICT TEARDOWN ORDER:
    // - pipeline BEFORE the set layouts it was built against
    // - pools (and their sets) BEFORE the layouts
    // - uniform buffers last
    pub unsafe fn destroy(&mut self, core: &mut Core) {
        self.pipeline.destroy(&core.device);
        for pool in [&mut self.global_pool, &mut self.object_pool] {
            if *pool != vk::DescriptorPool::null() {
                core.device.destroy_descriptor_pool(*pool, None);
                *pool = vk::DescriptorPool::null();
            }
        }
        for layout in [&mut self.global_layout, &mut self.object_layout] {
            if *layout != vk::DescriptorSetLayout::null() {
                core.device.destroy_descriptor_set_layout(*layout, None);
                *layout = vk::DescriptorSetLayout::null();
            }
        }
        for mut ubo in self.global_ubos.drain(..).chain(self.object_ubos.drain(..)) {
            ubo.destroy(core);
        }
        self.texture = None;
    }
}
