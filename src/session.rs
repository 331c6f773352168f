//! State of the live preview: the selected filter, its program, the clock,
//! the source image and the running export.

use crate::clock::AnimationClock;
use crate::error::Result;
use crate::export::{ExportJob, ExportOutcome, ExportSettings, Exporter};
use crate::filters::{self, FilterDefinition};
use crate::frame::Frame;
use crate::input::ImageInput;
use crate::shader::{AttributeBindings, CompiledProgram, ProgramSlot, Rasterizer};
use anyhow::anyhow;
use std::time::Instant;
use tracing::{info, warn};

pub struct PreviewSession<R: Rasterizer> {
    rasterizer: R,
    slot: ProgramSlot,
    bindings: AttributeBindings,
    clock: AnimationClock,
    selected: &'static FilterDefinition,
    image: ImageInput,
    exporter: Exporter,
    settings: ExportSettings,
}

impl<R: Rasterizer> PreviewSession<R> {
    /// Loads `filter` and uploads `image`. Failing to load the initial
    /// filter is an error since there is nothing to fall back to.
    pub fn new(
        mut rasterizer: R,
        filter: &'static FilterDefinition,
        image: ImageInput,
        settings: ExportSettings,
    ) -> anyhow::Result<Self> {
        let bindings = AttributeBindings::mesh();
        let mut slot = ProgramSlot::new();
        slot.load(&mut rasterizer, filter, &bindings)?;
        rasterizer.upload_image(&image.image)?;
        Ok(Self {
            rasterizer,
            slot,
            bindings,
            clock: AnimationClock::live(filter.loop_duration),
            selected: filter,
            image,
            exporter: Exporter::new(),
            settings,
        })
    }

    pub fn selected(&self) -> &'static FilterDefinition {
        self.selected
    }

    pub fn program(&self) -> Option<&CompiledProgram> {
        self.slot.current()
    }

    pub fn image(&self) -> &ImageInput {
        &self.image
    }

    pub fn rasterizer(&self) -> &R {
        &self.rasterizer
    }

    pub fn clock(&self) -> &AnimationClock {
        &self.clock
    }

    /// Switches the preview to filter `name`. On error the previous filter
    /// stays selected and bound. A running export is aborted on success.
    pub fn select(&mut self, name: &str) -> Result<()> {
        let definition = filters::lookup(name)?;
        if std::ptr::eq(definition, self.selected) && self.slot.current().is_some() {
            return Ok(());
        }
        self.slot.load(&mut self.rasterizer, definition, &self.bindings)?;
        if self.exporter.is_running() {
            warn!("Filter changed, aborting export");
            self.exporter.abort();
        }
        self.selected = definition;
        self.clock.set_period(definition.loop_duration);
        Ok(())
    }

    /// Selects the filter `offset` positions away in catalog order,
    /// wrapping around. Filters that fail to load are skipped.
    pub fn select_relative(&mut self, offset: isize) -> Result<()> {
        let catalog = filters::all();
        let count = catalog.len() as isize;
        let mut index = filters::index_of(self.selected.name).unwrap_or(0) as isize;
        let mut last_error = None;
        for _ in 0..catalog.len() {
            index = (index + offset).rem_euclid(count);
            match self.select(catalog[index as usize].name) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!("{}", e);
                    last_error = Some(e);
                }
            }
        }
        last_error.map_or(Ok(()), Err)
    }

    /// Replaces the source image. A running export is aborted.
    pub fn set_image(&mut self, image: ImageInput) -> anyhow::Result<()> {
        self.rasterizer.upload_image(&image.image)?;
        if self.exporter.is_running() {
            warn!("Source image changed, aborting export");
            self.exporter.abort();
        }
        info!(
            "Source image: {}",
            image
                .path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "placeholder".to_string())
        );
        self.image = image;
        Ok(())
    }

    /// Advances the live clock to `now` and renders one preview frame.
    pub fn render_frame(&mut self, now: Instant) -> anyhow::Result<Frame> {
        let time = self.clock.advance_to(now);
        let program = self.slot.current().ok_or_else(|| anyhow!("no filter loaded"))?;
        program.draw_at(&mut self.rasterizer, time)?;
        Ok(self.rasterizer.read_pixels()?.into_top_down())
    }

    /// Starts exporting the selected filter, replacing any running export.
    /// The output file name is fixed from the current image.
    pub fn start_export(&mut self) -> anyhow::Result<()> {
        let program = self.slot.current().ok_or_else(|| anyhow!("no filter loaded"))?.clone();
        let job = ExportJob::new(program, self.rasterizer.size(), &self.settings)?
            .with_file_name(self.image.output_file_name());
        self.exporter.start(job);
        Ok(())
    }

    /// Advances the running export by one step. Returns its outcome once,
    /// when it ends.
    pub fn step_export(&mut self) -> Option<ExportOutcome> {
        self.exporter.step(&mut self.rasterizer)
    }

    /// Combined export progress in 0..=1, if an export is running.
    pub fn export_progress(&self) -> Option<f32> {
        self.exporter.active().map(ExportJob::progress)
    }

    pub fn abort_export(&mut self) {
        self.exporter.abort();
    }

    pub fn output_file_name(&self) -> String {
        self.image.output_file_name()
    }

    /// Aborts any export and releases the preview program.
    pub fn shutdown(&mut self) {
        self.exporter.abort();
        self.slot.release(&mut self.rasterizer);
    }
}
