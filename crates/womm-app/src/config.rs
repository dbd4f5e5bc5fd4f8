// SPDX-License-Identifier: CEPL-1.0
//! `womm.toml`: window, render and memory sections.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use womm_core::units::MIB;
use womm_platform::WindowConfig;
use womm_render::RenderConfig;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct MemoryCfg {
    /// Size of the linear arena for long-lived engine state.
    pub arena_mib: u64,
}

impl Default for MemoryCfg {
    fn default() -> Self {
        Self { arena_mib: 64 }
    }
}

impl MemoryCfg {
    pub fn arena_bytes(&self) -> usize {
        (self.arena_mib.max(1) * MIB) as usize
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppCfg {
    pub window: WindowConfig,
    pub render: RenderConfig,
    pub memory: MemoryCfg,
}

impl AppCfg {
    pub fn parse(src: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(src)
    }

    /// Missing or unparsable files fall back to defaults.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(s) => Self::parse(&s).unwrap_or_else(|err| {
                warn!("{}: {err}; using defaults", path.display());
                Self::default()
            }),
            Err(err) => {
                debug!("{} not read ({err}); using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Command-line values win over the file.
    pub fn apply_overrides(
        &mut self,
        assets: Option<PathBuf>,
        width: Option<u32>,
        height: Option<u32>,
    ) {
        if let Some(assets) = assets {
            self.render.assets = assets;
        }
        if let Some(w) = width {
            self.window.width = w;
        }
        if let Some(h) = height {
            self.window.height = h;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let cfg = AppCfg::parse("").unwrap();
        assert_eq!(cfg, AppCfg::default());
        assert_eq!(cfg.memory.arena_bytes(), 64 * MIB as usize);
    }

    #[test]
    fn sections_parse_independently() {
        let cfg = AppCfg::parse(
            r#"
            [window]
            title = "demo"
            width = 640

            [render]
            clear_color = [1.0, 0.0, 0.0, 1.0]
            texture = "textures/crate.png"

            [memory]
            arena_mib = 8
            "#,
        )
        .unwrap();
        assert_eq!(cfg.window.title, "demo");
        assert_eq!(cfg.window.width, 640);
        assert_eq!(cfg.window.height, 720);
        assert_eq!(cfg.render.clear_color, [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(
            cfg.render.texture_path(),
            Some(PathBuf::from("assets/textures/crate.png"))
        );
        assert_eq!(cfg.memory.arena_bytes(), 8 * MIB as usize);
    }

    #[test]
    fn broken_or_missing_file_falls_back() {
        let dir = std::env::temp_dir().join(format!("womm-cfg-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let broken = dir.join("broken.toml");
        fs::write(&broken, "[window\nwidth = ").unwrap();
        assert_eq!(AppCfg::load(&broken), AppCfg::default());
        assert_eq!(AppCfg::load(&dir.join("absent.toml")), AppCfg::default());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn cli_overrides_file_values() {
        let mut cfg = AppCfg::parse("[window]\nwidth = 640\nheight = 480").unwrap();
        cfg.apply_overrides(Some(PathBuf::from("/data")), None, Some(1080));
        assert_eq!(cfg.window.width, 640);
        assert_eq!(cfg.window.height, 1080);
        assert_eq!(cfg.render.assets, PathBuf::from("/data"));
    }
}
