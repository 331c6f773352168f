//! Label text for the gallery, rasterized with a system font.

use ab_glyph::{Font, FontVec, PxScale, ScaleFont};
use fontdb::{Database, Family, Query, Source};
use tiny_skia::{Pixmap, PremultipliedColorU8};
use tracing::{info, warn};

/// A parsed font used to draw filter names under the thumbnails.
pub struct LabelFont {
    font: FontVec,
}

impl LabelFont {
    /// Loads the system serif font, or the first face found when no serif
    /// family is installed. Returns `None` when no font can be loaded.
    pub fn system() -> Option<Self> {
        let mut db = Database::new();
        db.load_system_fonts();
        info!("Loaded {} system fonts", db.len());

        let serif = db.query(&Query {
            families: &[Family::Serif],
            ..Query::default()
        });
        let Some(id) = serif.or_else(|| db.faces().next().map(|f| f.id)) else {
            warn!("No fonts available, gallery labels are not drawn");
            return None;
        };

        let (data, index) = db.face_source(id).and_then(|(source, index)| {
            let data = match source {
                Source::Binary(data) => Some(data.as_ref().as_ref().to_vec()),
                Source::File(path) => std::fs::read(path).ok(),
                Source::SharedFile(path, _) => std::fs::read(path).ok(),
            }?;
            Some((data, index))
        })?;
        let font = Self::from_data(data, index);
        if font.is_none() {
            warn!("Failed to parse label font");
        }
        font
    }

    pub fn from_data(data: Vec<u8>, index: u32) -> Option<Self> {
        FontVec::try_from_vec_and_index(data, index).ok().map(|font| Self { font })
    }

    /// Width of `text` at `size` pixels, without kerning.
    pub fn measure(&self, text: &str, size: f32) -> f32 {
        let scaled = self.font.as_scaled(PxScale::from(size));
        text.chars().map(|c| scaled.h_advance(scaled.glyph_id(c))).sum()
    }

    /// Draws `text` horizontally centered on `center_x` with its baseline
    /// at `baseline`. Glyph coverage is blended over the existing pixels.
    pub fn draw_centered(
        &self,
        pixmap: &mut Pixmap,
        center_x: f32,
        baseline: f32,
        text: &str,
        size: f32,
        color: (u8, u8, u8),
    ) {
        let scale = PxScale::from(size);
        let scaled = self.font.as_scaled(scale);
        let (width, height) = (pixmap.width() as i64, pixmap.height() as i64);
        let mut cursor_x = center_x - self.measure(text, size) / 2.0;

        for c in text.chars() {
            let glyph_id = scaled.glyph_id(c);
            let glyph = glyph_id.with_scale_and_position(scale, ab_glyph::point(cursor_x, baseline));
            cursor_x += scaled.h_advance(glyph_id);
            let Some(outlined) = scaled.outline_glyph(glyph) else {
                continue;
            };
            let bounds = outlined.px_bounds();
            let (left, top) = (bounds.min.x as i64, bounds.min.y as i64);
            let pixels = pixmap.pixels_mut();
            outlined.draw(|gx, gy, coverage| {
                let (x, y) = (left + gx as i64, top + gy as i64);
                if x < 0 || y < 0 || x >= width || y >= height {
                    return;
                }
                let pixel = &mut pixels[(y * width + x) as usize];
                *pixel = blend(*pixel, color, coverage.clamp(0.0, 1.0));
            });
        }
    }
}

/// Source-over of an opaque `color` at `coverage` onto a premultiplied pixel.
fn blend(dst: PremultipliedColorU8, color: (u8, u8, u8), coverage: f32) -> PremultipliedColorU8 {
    let keep = 1.0 - coverage;
    let mix = |src: u8, dst: u8| (src as f32 * coverage + dst as f32 * keep).round().min(255.0) as u8;
    let a = mix(255, dst.alpha());
    let r = mix(color.0, dst.red()).min(a);
    let g = mix(color.1, dst.green()).min(a);
    let b = mix(color.2, dst.blue()).min(a);
    PremultipliedColorU8::from_rgba(r, g, b, a).unwrap_or(dst)
}
