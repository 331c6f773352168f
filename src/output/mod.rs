//! Where rendered frames and exported animations go: the preview window
//! and GIF files on disk.

pub mod window_output;

pub use window_output::WindowRenderer;

use crate::frame::Frame;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Gap between the preview and the gallery, in pixels.
pub const PANEL_GAP: u32 = 16;

const BACKDROP: [u8; 3] = [0xff, 0xff, 0xff];

/// Placement of the preview (left) and the gallery (right) in the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompositeLayout {
    pub preview: (u32, u32),
    pub gallery: (u32, u32),
}

impl CompositeLayout {
    pub fn new(preview: (u32, u32), gallery: (u32, u32)) -> Self {
        Self { preview, gallery }
    }

    pub fn size(&self) -> (u32, u32) {
        (
            self.preview.0 + PANEL_GAP + self.gallery.0,
            self.preview.1.max(self.gallery.1),
        )
    }

    pub fn gallery_origin(&self) -> (u32, u32) {
        (self.preview.0 + PANEL_GAP, 0)
    }

    /// Maps a window position to gallery coordinates. The composite is
    /// stretched over the whole window.
    pub fn to_gallery(&self, x: f64, y: f64, window: (u32, u32)) -> Option<(f64, f64)> {
        let (width, height) = self.size();
        if window.0 == 0 || window.1 == 0 {
            return None;
        }
        let x = x * width as f64 / window.0 as f64;
        let y = y * height as f64 / window.1 as f64;
        let (gx, gy) = self.gallery_origin();
        let (gx, gy) = (x - gx as f64, y - gy as f64);
        let inside = gx >= 0.0 && gy >= 0.0 && gx < self.gallery.0 as f64 && gy < self.gallery.1 as f64;
        inside.then_some((gx, gy))
    }

    /// Draws both panels over an opaque backdrop.
    pub fn compose(&self, preview: &Frame, gallery: &Frame) -> Frame {
        let (width, height) = self.size();
        let mut out = Frame::new(width, height);
        for px in out.data.chunks_exact_mut(4) {
            px[..3].copy_from_slice(&BACKDROP);
            px[3] = 255;
        }
        blit_over(&mut out, preview, (0, 0));
        blit_over(&mut out, gallery, self.gallery_origin());
        out
    }
}

/// Alpha-composites `src` onto `dst` at `origin`, clipping to `dst`.
fn blit_over(dst: &mut Frame, src: &Frame, origin: (u32, u32)) {
    for y in 0..src.height {
        let dy = origin.1 + y;
        if dy >= dst.height {
            break;
        }
        for x in 0..src.width {
            let dx = origin.0 + x;
            if dx >= dst.width {
                break;
            }
            let s = src.pixel(x, y);
            let i = ((dy * dst.width + dx) * 4) as usize;
            let a = s[3] as u32;
            for c in 0..3 {
                let d = dst.data[i + c] as u32;
                dst.data[i + c] = ((s[c] as u32 * a + d * (255 - a) + 127) / 255) as u8;
            }
        }
    }
}

/// Writes an exported GIF into `dir`, creating it if needed.
pub fn save_gif(dir: &Path, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {:?}", dir))?;
    let path = dir.join(file_name);
    fs::write(&path, bytes).with_context(|| format!("failed to write {:?}", path))?;
    info!("Saved {:?} ({} bytes)", path, bytes.len());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::RowOrder;

    fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Frame {
        let data = rgba.iter().copied().cycle().take((width * height * 4) as usize).collect();
        Frame::from_data(width, height, RowOrder::TopDown, data).unwrap()
    }

    #[test]
    fn test_layout_size_and_origin() {
        let layout = CompositeLayout::new((112, 112), (600, 155));
        assert_eq!(layout.size(), (112 + PANEL_GAP + 600, 155));
        assert_eq!(layout.gallery_origin(), (128, 0));
    }

    #[test]
    fn test_window_position_maps_to_gallery() {
        let layout = CompositeLayout::new((100, 100), (200, 100));
        let window = (632, 200);
        assert_eq!(layout.to_gallery(50.0, 50.0, window), None);
        assert_eq!(layout.to_gallery(2.0 * 116.0 + 20.0, 40.0, window), Some((10.0, 20.0)));
        assert_eq!(layout.to_gallery(10.0, 10.0, (0, 0)), None);
    }

    #[test]
    fn test_compose_blends_over_backdrop() {
        let layout = CompositeLayout::new((2, 2), (3, 1));
        let preview = solid(2, 2, [0, 255, 0, 255]);
        let gallery = solid(3, 1, [0, 0, 0, 0]);
        let out = layout.compose(&preview, &gallery);

        assert_eq!((out.width, out.height), (2 + PANEL_GAP + 3, 2));
        assert_eq!(out.pixel(1, 1), [0, 255, 0, 255]);
        // Transparent gallery pixels show the backdrop.
        assert_eq!(out.pixel(2 + PANEL_GAP, 0), [255, 255, 255, 255]);
        // Gallery is shorter than the preview.
        assert_eq!(out.pixel(2 + PANEL_GAP, 1), [255, 255, 255, 255]);
    }

    #[test]
    fn test_save_gif_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out");
        let path = save_gif(&target, "kappa.gif", b"GIF89a").unwrap();
        assert_eq!(path, target.join("kappa.gif"));
        assert_eq!(fs::read(&path).unwrap(), b"GIF89a");
    }
}
