// SPDX-License-Identifier: CEPL-1.0
//! `[render]` section of the app config.

use serde::Deserialize;
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    pub fn extension(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vert.spv",
            ShaderStage::Fragment => "frag.spv",
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct RenderConfig {
    pub clear_color: [f32; 4],
    /// Root for shader binaries and textures.
    pub assets: PathBuf,
    pub material: String,
    /// Diffuse texture for the demo scene, relative to `assets`.
    pub texture: Option<PathBuf>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            clear_color: [0.02, 0.02, 0.04, 1.0],
            assets: PathBuf::from("assets"),
            material: "world".to_owned(),
            texture: None,
        }
    }
}

impl RenderConfig {
    /// `<assets>/shaders/<name>.<stage>.spv`
    pub fn shader_path(&self, name: &str, stage: ShaderStage) -> PathBuf {
        self.assets
            .join("shaders")
            .join(format!("{name}.{}", stage.extension()))
    }

    pub fn texture_path(&self) -> Option<PathBuf> {
        self.texture.as_ref().map(|t| self.assets.join(t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_table_keeps_defaults() {
        let cfg: RenderConfig = toml::from_str("clear_color = [1.0, 0.0, 0.0, 1.0]").unwrap();
        assert_eq!(cfg.clear_color, [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(cfg.material, "world");
        assert!(cfg.texture_path().is_none());
    }

    #[test]
    fn shader_and_texture_paths() {
        let cfg: RenderConfig =
            toml::from_str("assets = \"data\"\ntexture = \"textures/crate.png\"").unwrap();
        assert_eq!(
            cfg.shader_path("world", ShaderStage::Fragment),
            PathBuf::from("data/shaders/world.frag.spv")
        );
        assert_eq!(cfg.texture_path(), Some(PathBuf::from("data/textures/crate.png")));
    }
}
