//! Animated thumbnail gallery of every filter.
//!
//! The cycler renders one filter at a time on its own small rasterizer for
//! a fixed number of synthetic ticks, compositing each render into that
//! filter's cell of one of [`SNAPSHOT_COUNT`] gallery snapshots. Playing the
//! snapshots back in a loop animates every cell at once, each showing the
//! last 100 steps rendered for its filter.

use crate::clock::{AnimationClock, GALLERY_STEP};
use crate::filters::{self, FilterDefinition};
use crate::frame::{Frame, RowOrder};
use crate::shader::{AttributeBindings, ProgramSlot, Rasterizer};
use crate::text::LabelFont;
use anyhow::{anyhow, Result};
use tiny_skia::{BlendMode, IntSize, Paint, Pixmap, PixmapPaint, Rect, Transform};
use tracing::{debug, warn};

pub const GALLERY_WIDTH: u32 = 600;
pub const CELLS_PER_ROW: u32 = 8;
pub const CELL_AREA: u32 = GALLERY_WIDTH / CELLS_PER_ROW;
pub const CELL_MARGIN: u32 = 10;
/// Side of a thumbnail, and of the gallery rasterizer.
pub const THUMBNAIL_SIZE: u32 = CELL_AREA - CELL_MARGIN * 2;
pub const TICKS_PER_FILTER: u32 = 100;
pub const SNAPSHOT_COUNT: usize = 100;

const CELL_COLOR: (u8, u8, u8) = (0xf8, 0xf8, 0xf8);
const CHECKER_COLOR: (u8, u8, u8) = (0xd0, 0xd8, 0xdf);
const CHECKER_DIVISIONS: u32 = 10;
const LABEL_SIZE: f32 = 15.0;
const LABEL_COLOR: (u8, u8, u8) = (0, 0, 0);

/// Grid placement of the catalog entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GalleryLayout {
    count: usize,
}

impl GalleryLayout {
    pub fn new(count: usize) -> Self {
        Self { count }
    }

    pub fn width(&self) -> u32 {
        GALLERY_WIDTH
    }

    pub fn height(&self) -> u32 {
        CELL_AREA * (self.count as u32).div_ceil(CELLS_PER_ROW) + 5
    }

    /// Anchor of the name of entry `index`: horizontal center of its cell
    /// and the baseline just below it.
    pub fn label_anchor(&self, index: usize) -> (f32, f32) {
        let index = index as u32;
        let (col, row) = (index % CELLS_PER_ROW, index / CELLS_PER_ROW);
        (
            (CELL_AREA * col) as f32 + CELL_AREA as f32 / 2.0,
            (CELL_AREA * (row + 1) + 3) as f32,
        )
    }

    /// Top-left corner of the thumbnail of entry `index`.
    pub fn cell_origin(&self, index: usize) -> (u32, u32) {
        let index = index as u32;
        (
            CELL_MARGIN + CELL_AREA * (index % CELLS_PER_ROW),
            CELL_MARGIN + CELL_AREA * (index / CELLS_PER_ROW),
        )
    }

    /// Catalog index of the thumbnail under (x, y), if any.
    pub fn hit_test(&self, x: f64, y: f64) -> Option<usize> {
        if x < 0.0 || y < 0.0 {
            return None;
        }
        let (x, y) = (x as u32, y as u32);
        let (col, row) = (x / CELL_AREA, y / CELL_AREA);
        if col >= CELLS_PER_ROW {
            return None;
        }
        let inside = |offset: u32| (CELL_MARGIN..CELL_MARGIN + THUMBNAIL_SIZE).contains(&offset);
        if !inside(x % CELL_AREA) || !inside(y % CELL_AREA) {
            return None;
        }
        let index = (row * CELLS_PER_ROW + col) as usize;
        (index < self.count).then_some(index)
    }
}

/// Round-robin thumbnail renderer. Owns its rasterizer, program and clock;
/// nothing is shared with the preview.
pub struct GalleryCycler<R: Rasterizer> {
    rasterizer: R,
    slot: ProgramSlot,
    bindings: AttributeBindings,
    clock: AnimationClock,
    layout: GalleryLayout,
    filter_index: usize,
    ticks_remaining: u32,
    snapshot_index: usize,
    display_index: usize,
    snapshots: Vec<Pixmap>,
    cell_background: Pixmap,
    thumbnails: Vec<Option<Frame>>,
    refreshes: Vec<u64>,
    stopped: bool,
}

impl<R: Rasterizer> GalleryCycler<R> {
    /// Filter names are drawn under the cells when `labels` is given.
    pub fn new(rasterizer: R, labels: Option<&LabelFont>) -> Result<Self> {
        let catalog = filters::all();
        let layout = GalleryLayout::new(catalog.len());
        let blank = paint_gallery(&layout, labels)?;
        let cell_background = paint_cell()?;
        let mut cycler = Self {
            rasterizer,
            slot: ProgramSlot::new(),
            bindings: AttributeBindings::mesh(),
            clock: AnimationClock::synthetic(filters::default_filter().loop_duration, GALLERY_STEP),
            layout,
            filter_index: catalog.len() - 1,
            ticks_remaining: 0,
            snapshot_index: 0,
            display_index: 0,
            snapshots: vec![blank; SNAPSHOT_COUNT],
            cell_background,
            thumbnails: vec![None; catalog.len()],
            refreshes: vec![0; catalog.len()],
            stopped: false,
        };
        cycler.advance_filter();
        Ok(cycler)
    }

    pub fn layout(&self) -> &GalleryLayout {
        &self.layout
    }

    pub fn filter_index(&self) -> usize {
        self.filter_index
    }

    pub fn ticks_remaining(&self) -> u32 {
        self.ticks_remaining
    }

    pub fn rasterizer(&self) -> &R {
        &self.rasterizer
    }

    /// Latest thumbnail rendered for catalog entry `index`.
    pub fn thumbnail(&self, index: usize) -> Option<&Frame> {
        self.thumbnails.get(index).and_then(Option::as_ref)
    }

    /// How many times entry `index` has been rendered.
    pub fn refresh_count(&self, index: usize) -> u64 {
        self.refreshes.get(index).copied().unwrap_or(0)
    }

    pub fn upload_image(&mut self, image: &image::RgbaImage) -> Result<()> {
        self.rasterizer.upload_image(image)
    }

    /// Renders the current filter once and composites it into its cell.
    /// With no filter loaded the tick only counts down to the next load
    /// attempt.
    pub fn tick(&mut self) -> Result<()> {
        if self.stopped {
            return Ok(());
        }
        let Some(program) = self.slot.current() else {
            self.count_down();
            return Ok(());
        };
        program.draw_over(&mut self.rasterizer, self.clock.time(), [0.0; 4])?;
        let frame = self.rasterizer.read_pixels()?.into_top_down();

        let (x, y) = self.layout.cell_origin(self.filter_index);
        let thumbnail = frame_to_pixmap(&frame)?;
        let snapshot = &mut self.snapshots[self.snapshot_index];
        let source = PixmapPaint {
            blend_mode: BlendMode::Source,
            ..PixmapPaint::default()
        };
        snapshot.draw_pixmap(x as i32, y as i32, self.cell_background.as_ref(), &source, Transform::identity(), None);
        snapshot.draw_pixmap(
            x as i32,
            y as i32,
            thumbnail.as_ref(),
            &PixmapPaint::default(),
            Transform::identity(),
            None,
        );

        self.thumbnails[self.filter_index] = Some(frame);
        self.refreshes[self.filter_index] += 1;
        self.clock.advance();
        self.snapshot_index = (self.snapshot_index + 1) % SNAPSHOT_COUNT;
        self.count_down();
        Ok(())
    }

    fn count_down(&mut self) {
        self.ticks_remaining = self.ticks_remaining.saturating_sub(1);
        if self.ticks_remaining == 0 {
            self.advance_filter();
        }
    }

    /// Swaps to the next filter that loads. Filters that fail are skipped.
    fn advance_filter(&mut self) {
        let catalog = filters::all();
        for _ in 0..catalog.len() {
            self.filter_index = (self.filter_index + 1) % catalog.len();
            let definition: &'static FilterDefinition = &catalog[self.filter_index];
            match self.slot.load(&mut self.rasterizer, definition, &self.bindings) {
                Ok(program) => {
                    debug!("Gallery renders {}", program.name);
                    self.clock.set_period(program.loop_duration);
                    self.ticks_remaining = TICKS_PER_FILTER;
                    return;
                }
                Err(e) => warn!("Gallery skips {}: {}", definition.name, e),
            }
        }
        warn!("Gallery could not load any filter, retrying in {} ticks", TICKS_PER_FILTER);
        self.ticks_remaining = TICKS_PER_FILTER;
    }

    pub fn snapshot(&self, index: usize) -> &Pixmap {
        &self.snapshots[index % SNAPSHOT_COUNT]
    }

    /// The snapshot to show on this display refresh; successive calls cycle
    /// through all of them.
    pub fn next_display_frame(&mut self) -> Frame {
        let frame = pixmap_to_frame(&self.snapshots[self.display_index]);
        self.display_index = (self.display_index + 1) % SNAPSHOT_COUNT;
        frame
    }

    /// Releases the gallery program. Later ticks do nothing.
    pub fn shutdown(&mut self) {
        self.stopped = true;
        self.slot.release(&mut self.rasterizer);
    }
}

fn solid_paint(color: (u8, u8, u8)) -> Paint<'static> {
    let mut paint = Paint::default();
    paint.set_color_rgba8(color.0, color.1, color.2, 255);
    paint.anti_alias = false;
    paint
}

/// One empty cell: light background with a checkerboard.
fn paint_cell() -> Result<Pixmap> {
    let mut pixmap =
        Pixmap::new(THUMBNAIL_SIZE, THUMBNAIL_SIZE).ok_or_else(|| anyhow!("failed to create cell pixmap"))?;
    fill_cell(&mut pixmap, 0.0, 0.0);
    Ok(pixmap)
}

fn fill_cell(pixmap: &mut Pixmap, x: f32, y: f32) {
    let size = THUMBNAIL_SIZE as f32;
    if let Some(rect) = Rect::from_xywh(x, y, size, size) {
        pixmap.fill_rect(rect, &solid_paint(CELL_COLOR), Transform::identity(), None);
    }
    let step = size / CHECKER_DIVISIONS as f32;
    let checker = solid_paint(CHECKER_COLOR);
    for j in 0..CHECKER_DIVISIONS {
        for i in 0..CHECKER_DIVISIONS {
            if (i + j) % 2 == 1 {
                continue;
            }
            if let Some(rect) = Rect::from_xywh(x + i as f32 * step, y + j as f32 * step, step, step) {
                pixmap.fill_rect(rect, &checker, Transform::identity(), None);
            }
        }
    }
}

fn paint_gallery(layout: &GalleryLayout, labels: Option<&LabelFont>) -> Result<Pixmap> {
    let mut pixmap =
        Pixmap::new(layout.width(), layout.height()).ok_or_else(|| anyhow!("failed to create gallery pixmap"))?;
    for (index, filter) in filters::all().iter().enumerate().take(layout.count) {
        let (x, y) = layout.cell_origin(index);
        fill_cell(&mut pixmap, x as f32, y as f32);
        if let Some(font) = labels {
            let (center, baseline) = layout.label_anchor(index);
            font.draw_centered(&mut pixmap, center, baseline, filter.name, LABEL_SIZE, LABEL_COLOR);
        }
    }
    Ok(pixmap)
}

fn frame_to_pixmap(frame: &Frame) -> Result<Pixmap> {
    let mut data = frame.data.clone();
    for px in data.chunks_exact_mut(4) {
        let a = px[3] as u16;
        for c in &mut px[..3] {
            *c = ((*c as u16 * a + 127) / 255) as u8;
        }
    }
    let size = IntSize::from_wh(frame.width, frame.height).ok_or_else(|| anyhow!("empty thumbnail"))?;
    Pixmap::from_vec(data, size).ok_or_else(|| anyhow!("thumbnail data does not match its size"))
}

pub fn pixmap_to_frame(pixmap: &Pixmap) -> Frame {
    let data = pixmap
        .pixels()
        .iter()
        .flat_map(|p| {
            let c = p.demultiply();
            [c.red(), c.green(), c.blue(), c.alpha()]
        })
        .collect();
    Frame {
        width: pixmap.width(),
        height: pixmap.height(),
        rows: RowOrder::TopDown,
        data,
    }
}
