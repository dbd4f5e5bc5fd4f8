// SPDX-License-Identifier: CEPL-1.0
//! Window collaborator. The renderer only ever sees the native handles and
//! the inner size; everything else about the window stays here.

pub use winit;

use serde::Deserialize;
use tracing::debug;
use winit::dpi::PhysicalSize;
use winit::window::{Window, WindowAttributes};

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "womm".to_owned(),
            width: 1280,
            height: 720,
            resizable: true,
        }
    }
}

impl WindowConfig {
    pub fn attributes(&self) -> WindowAttributes {
        debug!(
            "window attributes: {} {}x{} resizable={}",
            self.title, self.width, self.height, self.resizable
        );
        Window::default_attributes()
            .with_title(self.title.clone())
            .with_inner_size(PhysicalSize::new(self.width.max(1), self.height.max(1)))
            .with_resizable(self.resizable)
    }
}

/// Inner size in physical pixels; either side may be 0 while minimized.
pub fn inner_size(window: &Window) -> (u32, u32) {
    let size = window.inner_size();
    (size.width, size.height)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_section_keeps_defaults() {
        let cfg: WindowConfig = toml::from_str("width = 800\nresizable = false").unwrap();
        assert_eq!(cfg.width, 800);
        assert_eq!(cfg.height, 720);
        assert_eq!(cfg.title, "womm");
        assert!(!cfg.resizable);
    }
}
