// SPDX-License-Identifier: CEPL-1.0
//! CPU-side texture data and the image loader.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::{debug, warn};

pub const DEFAULT_TEXTURE_NAME: &str = "default_checker";

const CHECKER_SIZE: u32 = 256;
const CHECKER_CELL: u32 = 32;
const WHITE: [u8; 4] = [255, 255, 255, 255];
const MAGENTA: [u8; 4] = [255, 0, 255, 255];

/// Tightly packed RGBA8 pixels, row-major, top row first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextureData {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub pixels: Vec<u8>,
}

impl TextureData {
    pub fn checkerboard() -> Self {
        let mut pixels = Vec::with_capacity((CHECKER_SIZE * CHECKER_SIZE * 4) as usize);
        for y in 0..CHECKER_SIZE {
            for x in 0..CHECKER_SIZE {
                let even = (x / CHECKER_CELL + y / CHECKER_CELL) % 2 == 0;
                pixels.extend_from_slice(if even { &WHITE } else { &MAGENTA });
            }
        }
        Self {
            name: DEFAULT_TEXTURE_NAME.to_owned(),
            width: CHECKER_SIZE,
            height: CHECKER_SIZE,
            channels: 4,
            pixels,
        }
    }

    pub fn byte_len(&self) -> u64 {
        self.pixels.len() as u64
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<&[u8]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let c = self.channels as usize;
        let i = (y as usize * self.width as usize + x as usize) * c;
        self.pixels.get(i..i + c)
    }
}

/// Decode an image file into RGBA8.
pub fn load(path: impl AsRef<Path>) -> Result<TextureData> {
    let path = path.as_ref();
    let img = image::open(path)
        .with_context(|| format!("failed to decode texture {}", path.display()))?
        .to_rgba8();
    let (width, height) = img.dimensions();
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    debug!("loaded texture {name} ({width}x{height})");
    Ok(TextureData {
        name,
        width,
        height,
        channels: 4,
        pixels: img.into_raw(),
    })
}

/// Like [`load`], but a missing or broken file yields the checkerboard.
pub fn load_or_default(path: impl AsRef<Path>) -> TextureData {
    match load(path) {
        Ok(tex) => tex,
        Err(err) => {
            warn!("{err:#}; using {DEFAULT_TEXTURE_NAME}");
            TextureData::checkerboard()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkerboard_cells_alternate() {
        let tex = TextureData::checkerboard();
        assert_eq!((tex.width, tex.height, tex.channels), (256, 256, 4));
        assert_eq!(tex.byte_len(), 256 * 256 * 4);
        assert_eq!(tex.pixel(0, 0), Some(&WHITE[..]));
        assert_eq!(tex.pixel(31, 31), Some(&WHITE[..]));
        assert_eq!(tex.pixel(32, 0), Some(&MAGENTA[..]));
        assert_eq!(tex.pixel(0, 32), Some(&MAGENTA[..]));
        assert_eq!(tex.pixel(32, 32), Some(&WHITE[..]));
        assert_eq!(tex.pixel(256, 0), None);
    }

    #[test]
    fn missing_file_falls_back() {
        let tex = load_or_default("does/not/exist.png");
        assert_eq!(tex, TextureData::checkerboard());
        assert_eq!(tex.name, DEFAULT_TEXTURE_NAME);
    }

    #[test]
    fn undecodable_file_falls_back() {
        let path = std::env::temp_dir().join("womm_texture_garbage.png");
        std::fs::write(&path, b"definitely not a png").unwrap();
        assert!(load(&path).is_err());
        assert_eq!(load_or_default(&path).name, DEFAULT_TEXTURE_NAME);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn loads_png_from_disk() {
        let path = std::env::temp_dir().join("womm_texture_2x1.png");
        let img = image::RgbaImage::from_raw(2, 1, vec![1, 2, 3, 255, 4, 5, 6, 128]).unwrap();
        img.save(&path).unwrap();
        let tex = load(&path).unwrap();
        assert_eq!(tex.name, "womm_texture_2x1");
        assert_eq!((tex.width, tex.height), (2, 1));
        assert_eq!(tex.pixel(1, 0), Some(&[4u8, 5, 6, 128][..]));
        let _ = std::fs::remove_file(&path);
    }
}
