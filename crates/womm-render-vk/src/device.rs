// SPDX-License-Identifier: CEPL-1.0
//! Instance, surface, physical-device selection and the logical device.
//!
//! [`Core`] is created once per render system and owns the VRAM budget, so
//! every device memory allocation in the backend goes through it.

use anyhow::{anyhow, Context, Result};
use ash::ext::debug_utils;
use ash::khr::{surface, swapchain};
use ash::{vk, Entry, Instance};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use std::ffi::{c_char, CStr};
use thiserror::Error;
use tracing::{debug, info, warn};
use womm_core::units::MIB;
use womm_render::{MemoryLocality, VramBudget, VramError, VramTag};

const APP_NAME: &CStr = c"womm";
const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Depth formats in order of preference. There is no fallback past these.
pub(crate) const DEPTH_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

#[derive(Debug, Error)]
pub enum AllocError {
    #[error(transparent)]
    Budget(#[from] VramError),
    #[error("no memory type matches the requested properties")]
    NoMemoryType,
    #[error("vkAllocateMemory failed: {0:?}")]
    Driver(vk::Result),
}

/// Device memory handed out by [`Core::allocate_memory`]. Must go back
/// through [`Core::free_memory`] so the budget stays balanced.
#[derive(Debug)]
pub struct Allocation {
    pub memory: vk::DeviceMemory,
    pub size: u64,
    pub tag: VramTag,
    pub locality: MemoryLocality,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
    pub transfer: u32,
}

impl QueueFamilies {
    /// Distinct family indices, graphics first.
    pub fn unique(&self) -> Vec<u32> {
        let mut out = vec![self.graphics];
        for family in [self.present, self.transfer] {
            if !out.contains(&family) {
                out.push(family);
            }
        }
        out
    }
}

pub struct Core {
    _entry: Entry,
    pub(crate) instance: Instance,
    debug: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    pub(crate) surface_loader: surface::Instance,
    pub(crate) surface: vk::SurfaceKHR,

    pub(crate) phys: vk::PhysicalDevice,
    pub(crate) properties: vk::PhysicalDeviceProperties,
    pub(crate) memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub(crate) device: ash::Device,

    pub(crate) families: QueueFamilies,
    pub(crate) graphics_queue: vk::Queue,
    pub(crate) present_queue: vk::Queue,
    pub(crate) gfx_pool: vk::CommandPool,
    pub(crate) depth_format: vk::Format,

    budget: VramBudget,
}

#[cfg(debug_assertions)]
unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    if data.is_null() || (*data).p_message.is_null() {
        return vk::FALSE;
    }
    let msg = CStr::from_ptr((*data).p_message).to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        tracing::error!(target: "vulkan", "{msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!(target: "vulkan", "{msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        debug!(target: "vulkan", "{msg}");
    } else {
        tracing::trace!(target: "vulkan", "{msg}");
    }
    vk::FALSE
}

#[cfg(debug_assertions)]
unsafe fn validation_available(entry: &Entry) -> bool {
    entry
        .enumerate_instance_layer_properties()
        .unwrap_or_default()
        .iter()
        .any(|l| CStr::from_ptr(l.layer_name.as_ptr()) == VALIDATION_LAYER)
}

#[cfg(not(debug_assertions))]
unsafe fn validation_available(_entry: &Entry) -> bool {
    false
}

#[cfg(debug_assertions)]
unsafe fn create_debug_messenger(
    entry: &Entry,
    instance: &Instance,
    enabled: bool,
) -> Result<Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>> {
    if !enabled {
        return Ok(None);
    }
    let loader = debug_utils::Instance::new(entry, instance);
    let ci = vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    };
    let messenger = loader
        .create_debug_utils_messenger(&ci, None)
        .context("create_debug_utils_messenger")?;
    Ok(Some((loader, messenger)))
}

#[cfg(not(debug_assertions))]
unsafe fn create_debug_messenger(
    _entry: &Entry,
    _instance: &Instance,
    _enabled: bool,
) -> Result<Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>> {
    Ok(None)
}

unsafe fn create_instance(
    entry: &Entry,
    display_raw: RawDisplayHandle,
    validation: bool,
) -> Result<Instance> {
    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: APP_NAME.as_ptr(),
        application_version: 0,
        p_engine_name: APP_NAME.as_ptr(),
        engine_version: 0,
        api_version: vk::API_VERSION_1_2,
        ..Default::default()
    };

    let mut extensions = ash_window::enumerate_required_extensions(display_raw)
        .context("enumerate_required_extensions")?
        .to_vec();
    let mut layers: Vec<*const c_char> = Vec::new();
    if validation {
        extensions.push(debug_utils::NAME.as_ptr());
        layers.push(VALIDATION_LAYER.as_ptr());
    }

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        enabled_layer_count: layers.len() as u32,
        pp_enabled_layer_names: layers.as_ptr(),
        ..Default::default()
    };

    Ok(entry.create_instance(&create_info, None)?)
}

/// First GRAPHICS family; a dedicated TRANSFER family if one exists; the
/// graphics family for present when it can, else the first family that can.
pub(crate) fn pick_queue_families(
    families: &[vk::QueueFamilyProperties],
    can_present: impl Fn(u32) -> bool,
) -> Option<QueueFamilies> {
    let usable = |f: &vk::QueueFamilyProperties| f.queue_count > 0;
    let graphics = families
        .iter()
        .position(|f| usable(f) && f.queue_flags.contains(vk::QueueFlags::GRAPHICS))?
        as u32;
    let transfer = families
        .iter()
        .position(|f| {
            usable(f)
                && f.queue_flags.contains(vk::QueueFlags::TRANSFER)
                && !f.queue_flags.contains(vk::QueueFlags::GRAPHICS)
        })
        .map_or(graphics, |i| i as u32);
    let present = if can_present(graphics) {
        graphics
    } else {
        (0..families.len() as u32).find(|&i| usable(&families[i as usize]) && can_present(i))?
    };
    Some(QueueFamilies {
        graphics,
        present,
        transfer,
    })
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct DeviceCandidate {
    pub device_type: vk::PhysicalDeviceType,
    pub max_image_dimension_2d: u32,
    pub device_local_bytes: u64,
    pub has_swapchain: bool,
    pub families: Option<QueueFamilies>,
}

/// `None` rejects the device outright.
pub(crate) fn score_device(c: &DeviceCandidate) -> Option<u64> {
    if !c.has_swapchain || c.families.is_none() {
        return None;
    }
    let kind = match c.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 500,
        _ => 0,
    };
    Some(kind + c.max_image_dimension_2d as u64 + c.device_local_bytes / MIB / 128)
}

pub(crate) fn pick_depth_format(supports: impl Fn(vk::Format) -> bool) -> Option<vk::Format> {
    DEPTH_CANDIDATES.into_iter().find(|&f| supports(f))
}

pub(crate) fn find_memory_type(
    mem: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    req: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..mem.memory_type_count).find(|&i| {
        (type_bits & (1 << i)) != 0 && mem.memory_types[i as usize].property_flags.contains(req)
    })
}

pub(crate) fn locality_of(props: vk::MemoryPropertyFlags) -> MemoryLocality {
    if props.contains(vk::MemoryPropertyFlags::DEVICE_LOCAL) {
        MemoryLocality::DeviceLocal
    } else if props.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
        MemoryLocality::HostVisible
    } else {
        MemoryLocality::Other
    }
}

/// Wanted features intersected with what the device has, plus the names of
/// the ones it lacks.
pub(crate) fn enabled_features(
    supported: &vk::PhysicalDeviceFeatures,
) -> (vk::PhysicalDeviceFeatures, Vec<&'static str>) {
    let mut on = vk::PhysicalDeviceFeatures::default();
    let mut missing = Vec::new();
    let mut want = |name: &'static str, have: vk::Bool32, slot: &mut vk::Bool32| {
        if have == vk::TRUE {
            *slot = vk::TRUE;
        } else {
            missing.push(name);
        }
    };
    want(
        "fill_mode_non_solid",
        supported.fill_mode_non_solid,
        &mut on.fill_mode_non_solid,
    );
    want(
        "multi_draw_indirect",
        supported.multi_draw_indirect,
        &mut on.multi_draw_indirect,
    );
    want("depth_clamp", supported.depth_clamp, &mut on.depth_clamp);
    want("wide_lines", supported.wide_lines, &mut on.wide_lines);
    (on, missing)
}

fn device_local_bytes(mem: &vk::PhysicalDeviceMemoryProperties) -> u64 {
    mem.memory_heaps[..mem.memory_heap_count as usize]
        .iter()
        .filter(|h| h.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
        .map(|h| h.size)
        .sum()
}

unsafe fn device_name(props: &vk::PhysicalDeviceProperties) -> String {
    CStr::from_ptr(props.device_name.as_ptr())
        .to_string_lossy()
        .into_owned()
}

unsafe fn select_physical_device(
    instance: &Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<(vk::PhysicalDevice, QueueFamilies)> {
    let mut best: Option<(u64, vk::PhysicalDevice, QueueFamilies)> = None;

    for phys in instance
        .enumerate_physical_devices()
        .context("enumerate_physical_devices")?
    {
        let props = instance.get_physical_device_properties(phys);
        let mem = instance.get_physical_device_memory_properties(phys);
        let has_swapchain = instance
            .enumerate_device_extension_properties(phys)
            .unwrap_or_default()
            .iter()
            .any(|e| CStr::from_ptr(e.extension_name.as_ptr()) == swapchain::NAME);
        let qprops = instance.get_physical_device_queue_family_properties(phys);
        let families = pick_queue_families(&qprops, |i| {
            surface_loader
                .get_physical_device_surface_support(phys, i, surface)
                .unwrap_or(false)
        });

        let candidate = DeviceCandidate {
            device_type: props.device_type,
            max_image_dimension_2d: props.limits.max_image_dimension2_d,
            device_local_bytes: device_local_bytes(&mem),
            has_swapchain,
            families,
        };
        let name = device_name(&props);
        match (score_device(&candidate), families) {
            (Some(score), Some(families)) => {
                debug!("gpu candidate {name}: score {score}");
                if best.map_or(true, |(s, _, _)| score > s) {
                    best = Some((score, phys, families));
                }
            }
            _ => debug!("gpu candidate {name}: rejected"),
        }
    }

    best.map(|(_, phys, families)| (phys, families))
        .ok_or_else(|| anyhow!("no physical device with graphics, present and swapchain support"))
}

impl Core {
    // STRICT ORDER:
    // 1) Load the loader, create the instance (+ validation in debug builds)
    // 2) Create the surface FROM THIS INSTANCE
    // 3) Pick a physical device and queue families AGAINST THIS SURFACE
    // 4) Depth format, then the logical device, then the graphics pool
    pub unsafe fn new(window: &dyn HasWindowHandle, display: &dyn HasDisplayHandle) -> Result<Self> {
        // --- Platform handles ---
        let dh = display
            .display_handle()
            .map_err(|e| anyhow!("{e}"))?
            .as_raw();
        let wh = window.window_handle().map_err(|e| anyhow!("{e}"))?.as_raw();

        // --- Loader + instance ---
        let entry = Entry::load().map_err(|e| anyhow!("failed to load the Vulkan loader: {e}"))?;
        let validation = validation_available(&entry);
        if cfg!(debug_assertions) && !validation {
            warn!("{} not available; running without validation", VALIDATION_LAYER.to_string_lossy());
        }
        let instance = create_instance(&entry, dh, validation).context("create_instance")?;
        let debug = create_debug_messenger(&entry, &instance, validation)?;

        // --- Surface ---
        let surface_loader = surface::Instance::new(&entry, &instance);
        let surface = ash_window::create_surface(&entry, &instance, dh, wh, None)
            .context("ash_window::create_surface")?;

        // --- Physical device + queue families ---
        let (phys, families) = select_physical_device(&instance, &surface_loader, surface)?;
        let properties = instance.get_physical_device_properties(phys);
        let memory_properties = instance.get_physical_device_memory_properties(phys);

        let depth_format = pick_depth_format(|f| {
            instance
                .get_physical_device_format_properties(phys, f)
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        })
        .context("no supported depth format")?;

        // --- Logical device: one queue per unique family ---
        let priorities = [1.0_f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .unique()
            .into_iter()
            .map(|family| vk::DeviceQueueCreateInfo {
                s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
                queue_family_index: family,
                queue_count: 1,
                p_queue_priorities: priorities.as_ptr(),
                ..Default::default()
            })
            .collect();

        let (features, missing) = enabled_features(&instance.get_physical_device_features(phys));
        for name in missing {
            warn!("device feature {name} not supported; disabled");
        }

        let device_exts = [swapchain::NAME.as_ptr()];
        let dinfo = vk::DeviceCreateInfo {
            s_type: vk::StructureType::DEVICE_CREATE_INFO,
            queue_create_info_count: queue_infos.len() as u32,
            p_queue_create_infos: queue_infos.as_ptr(),
            enabled_extension_count: device_exts.len() as u32,
            pp_enabled_extension_names: device_exts.as_ptr(),
            p_enabled_features: &features,
            ..Default::default()
        };
        let device = instance
            .create_device(phys, &dinfo, None)
            .context("create_device")?;

        let graphics_queue = device.get_device_queue(families.graphics, 0);
        let present_queue = device.get_device_queue(families.present, 0);

        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: families.graphics,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            ..Default::default()
        };
        let gfx_pool = device
            .create_command_pool(&pool_info, None)
            .context("create_command_pool")?;

        info!(
            "vk: using {} (graphics {}, present {}, transfer {}, depth {:?})",
            device_name(&properties),
            families.graphics,
            families.present,
            families.transfer,
            depth_format
        );

        Ok(Self {
            _entry: entry,
            instance,
            debug,
            surface_loader,
            surface,
            phys,
            properties,
            memory_properties,
            device,
            families,
            graphics_queue,
            present_queue,
            gfx_pool,
            depth_format,
            budget: VramBudget::default(),
        })
    }

    /// Budget check first, then the driver. A rejected request leaves the
    /// counters untouched.
    pub unsafe fn allocate_memory(
        &mut self,
        req: vk::MemoryRequirements,
        props: vk::MemoryPropertyFlags,
        tag: VramTag,
    ) -> Result<Allocation, AllocError> {
        self.budget.check(req.size)?;
        let memory_type_index =
            find_memory_type(&self.memory_properties, req.memory_type_bits, props)
                .ok_or(AllocError::NoMemoryType)?;
        let info = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: req.size,
            memory_type_index,
            ..Default::default()
        };
        let memory = self
            .device
            .allocate_memory(&info, None)
            .map_err(AllocError::Driver)?;

        let locality = locality_of(props);
        self.budget.record_alloc(req.size, tag, locality);
        Ok(Allocation {
            memory,
            size: req.size,
            tag,
            locality,
        })
    }

    pub unsafe fn free_memory(&mut self, allocation: Allocation) {
        self.device.free_memory(allocation.memory, None);
        self.budget
            .record_free(allocation.size, allocation.tag, allocation.locality);
    }

    pub fn budget(&self) -> &VramBudget {
        &self.budget
    }

    pub fn min_uniform_alignment(&self) -> u64 {
        self.properties.limits.min_uniform_buffer_offset_alignment
    }
}

// STRICT TEARDOWN ORDER (everything device-owned is gone by now):
// - command pool BEFORE device
// - device BEFORE surface
// - messenger and surface BEFORE instance; instance last
impl Drop for Core {
    fn drop(&mut self) {
        if self.budget.total_allocated() != 0 {
            warn!("vk: VRAM still allocated at shutdown\n{}", self.budget.status_report());
        }
        unsafe {
            self.device.destroy_command_pool(self.gfx_pool, None);
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some((loader, messenger)) = self.debug.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Fails early when the surface can no longer be queried.
pub(crate) unsafe fn surface_capabilities(core: &Core) -> Result<vk::SurfaceCapabilitiesKHR> {
    core.surface_loader
        .get_physical_device_surface_capabilities(core.phys, core.surface)
        .context("get_physical_device_surface_capabilities")
}
