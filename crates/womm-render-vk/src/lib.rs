// SPDX-License-Identifier: CEPL-1.0
//! Vulkan backend for `womm-render`.

pub mod buffer;
pub mod command;
pub mod device;
pub mod geometry;
pub mod image;
pub mod material;
pub mod pipeline;
pub mod renderer;
pub mod renderpass;
pub mod swapchain;
pub mod sync;
pub mod texture;

pub use renderer::RenderSystem;
