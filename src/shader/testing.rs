//! Deterministic in-memory rasterizer for tests.

use super::{LinkedProgram, ProgramId, Rasterizer, UniformHandle, UniformValue, UNIFORM_BLOCK_SIZE};
use crate::error::{FilterError, Result};
use crate::frame::{Frame, RowOrder};
use anyhow::anyhow;
use std::collections::HashMap;

/// Records every call and renders frames derived from the uniforms.
///
/// Frames come back bottom-up like GL readback. Buffer row `r` holds
/// `[r, time * 100, program id, 255]` in every pixel, so tests can check
/// both the flip and which time a frame was drawn at.
pub struct MockRasterizer {
    width: u32,
    height: u32,
    programs: HashMap<ProgramId, String>,
    next_id: u64,
    bound: Option<ProgramId>,
    uniforms: [u8; UNIFORM_BLOCK_SIZE],
    last_clear: Option<[f32; 4]>,
    drawn: Option<(f32, u64)>,
    draw_count: usize,
    read_count: usize,
    image_size: Option<(u32, u32)>,
    fail_next_create: Option<String>,
    fail_creates: bool,
    fail_draws: bool,
}

impl MockRasterizer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            programs: HashMap::new(),
            next_id: 1,
            bound: None,
            uniforms: [0; UNIFORM_BLOCK_SIZE],
            last_clear: None,
            drawn: None,
            draw_count: 0,
            read_count: 0,
            image_size: None,
            fail_next_create: None,
            fail_creates: false,
            fail_draws: false,
        }
    }

    pub fn bound(&self) -> Option<ProgramId> {
        self.bound
    }

    pub fn bound_filter(&self) -> Option<&str> {
        self.bound.and_then(|id| self.programs.get(&id)).map(String::as_str)
    }

    pub fn time(&self) -> f32 {
        bytemuck::pod_read_unaligned(&self.uniforms[0..4])
    }

    pub fn resolution(&self) -> [f32; 2] {
        [
            bytemuck::pod_read_unaligned(&self.uniforms[8..12]),
            bytemuck::pod_read_unaligned(&self.uniforms[12..16]),
        ]
    }

    pub fn last_clear(&self) -> Option<[f32; 4]> {
        self.last_clear
    }

    pub fn draw_count(&self) -> usize {
        self.draw_count
    }

    pub fn read_count(&self) -> usize {
        self.read_count
    }

    pub fn image_size(&self) -> Option<(u32, u32)> {
        self.image_size
    }

    pub fn fail_next_create(&mut self, log: &str) {
        self.fail_next_create = Some(log.to_string());
    }

    /// Makes every program creation fail until turned off.
    pub fn fail_creates(&mut self, fail: bool) {
        self.fail_creates = fail;
    }

    pub fn fail_draws(&mut self, fail: bool) {
        self.fail_draws = fail;
    }
}

impl Rasterizer for MockRasterizer {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn row_order(&self) -> RowOrder {
        RowOrder::BottomUp
    }

    fn create_program(&mut self, program: &LinkedProgram) -> Result<ProgramId> {
        if let Some(log) = self.fail_next_create.take() {
            return Err(FilterError::ShaderLinkError {
                filter: program.filter.clone(),
                log,
            });
        }
        if self.fail_creates {
            return Err(FilterError::ShaderLinkError {
                filter: program.filter.clone(),
                log: "program creation disabled".to_string(),
            });
        }
        let id = ProgramId(self.next_id);
        self.next_id += 1;
        self.programs.insert(id, program.filter.clone());
        Ok(id)
    }

    fn delete_program(&mut self, id: ProgramId) {
        self.programs.remove(&id);
        if self.bound == Some(id) {
            self.bound = None;
        }
    }

    fn use_program(&mut self, id: ProgramId) -> anyhow::Result<()> {
        if !self.programs.contains_key(&id) {
            return Err(anyhow!("program {:?} does not exist", id));
        }
        self.bound = Some(id);
        Ok(())
    }

    fn live_programs(&self) -> usize {
        self.programs.len()
    }

    fn set_uniform(&mut self, handle: UniformHandle, value: UniformValue) {
        value.write_into(handle, &mut self.uniforms);
    }

    fn upload_image(&mut self, image: &image::RgbaImage) -> anyhow::Result<()> {
        self.image_size = Some(image.dimensions());
        Ok(())
    }

    fn clear(&mut self, color: [f32; 4]) {
        self.last_clear = Some(color);
    }

    fn draw_quad(&mut self) -> anyhow::Result<()> {
        if self.fail_draws {
            return Err(anyhow!("device lost"));
        }
        let id = self.bound.ok_or_else(|| anyhow!("no program bound"))?;
        self.drawn = Some((self.time(), id.0));
        self.draw_count += 1;
        Ok(())
    }

    fn read_pixels(&mut self) -> anyhow::Result<Frame> {
        self.read_count += 1;
        let (time, id) = self.drawn.unwrap_or((0.0, 0));
        let mut data = Vec::with_capacity((self.width * self.height * 4) as usize);
        for row in 0..self.height {
            for _ in 0..self.width {
                data.extend_from_slice(&[row as u8, (time * 100.0).round() as u8, id as u8, 255]);
            }
        }
        Frame::from_data(self.width, self.height, RowOrder::BottomUp, data)
    }
}
