//! Filter programs and the rasterizer they run on.
//!
//! Loading a filter is split in two halves: [`compile_and_link`] turns the
//! GLSL sources into a backend-neutral [`LinkedProgram`] (pure, no GPU),
//! and a [`Rasterizer`] turns that into a program bound on its context.

mod glsl;
mod gpu_context;
mod wgpu_rasterizer;

#[cfg(test)]
pub(crate) mod testing;

pub use glsl::{compile_and_link, CompiledStage, LinkedProgram, ResolvedUniforms};
pub use gpu_context::GpuContext;
pub use wgpu_rasterizer::WgpuRasterizer;

use crate::error::{FilterError, Result};
use crate::filters::{background_for, ChromaKey, FilterDefinition, LoopDuration};
use crate::frame::{Frame, MeshVertex, RowOrder};
use tracing::{debug, info};

/// Size in bytes of the uniform block shared by every filter.
pub const UNIFORM_BLOCK_SIZE: usize = 16;

/// Name of the uniform carrying the animation time in seconds.
pub const TIME_UNIFORM: &str = "time";
/// Name of the uniform carrying the canvas size in pixels.
pub const RESOLUTION_UNIFORM: &str = "resolution";

/// Fixed table from vertex attribute name to shader location. One mesh
/// buffer serves every filter because all of them bind the same slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeBindings(Vec<(String, u32)>);

impl AttributeBindings {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn with(mut self, name: &str, location: u32) -> Self {
        self.0.push((name.to_string(), location));
        self
    }

    /// The binding table of the shared quad mesh.
    pub fn mesh() -> Self {
        Self::new().with(MeshVertex::POSITION_ATTRIBUTE, MeshVertex::POSITION_LOCATION)
    }

    pub fn location_of(&self, name: &str) -> Option<u32> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, location)| *location)
    }
}

impl Default for AttributeBindings {
    fn default() -> Self {
        Self::mesh()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformKind {
    Float,
    Vec2,
}

impl UniformKind {
    pub fn size(&self) -> usize {
        match self {
            UniformKind::Float => 4,
            UniformKind::Vec2 => 8,
        }
    }
}

/// Resolved location of a uniform inside the uniform block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformHandle {
    pub offset: u32,
    pub kind: UniformKind,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Vec2([f32; 2]),
}

impl UniformValue {
    fn kind(&self) -> UniformKind {
        match self {
            UniformValue::Float(_) => UniformKind::Float,
            UniformValue::Vec2(_) => UniformKind::Vec2,
        }
    }

    /// Writes the value into a uniform block. Values that do not match the
    /// handle's kind or fall outside the block are ignored.
    pub fn write_into(&self, handle: UniformHandle, block: &mut [u8; UNIFORM_BLOCK_SIZE]) {
        if handle.kind != self.kind() {
            return;
        }
        let start = handle.offset as usize;
        let Some(dst) = block.get_mut(start..start + handle.kind.size()) else {
            return;
        };
        match self {
            UniformValue::Float(v) => dst.copy_from_slice(bytemuck::bytes_of(v)),
            UniformValue::Vec2(v) => dst.copy_from_slice(bytemuck::cast_slice(v)),
        }
    }
}

/// Opaque handle of a program living on a rasterizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramId(pub u64);

/// A rendering context able to run filter programs over one image.
///
/// Mirrors the small slice of a GPU API the filters need: programs,
/// two uniforms, one texture, clear, a full-quad draw and readback.
pub trait Rasterizer {
    /// Size of the render target in pixels.
    fn size(&self) -> (u32, u32);

    /// Row order of frames returned by [`Rasterizer::read_pixels`].
    fn row_order(&self) -> RowOrder;

    /// Builds a program from linked sources. The sources must come from
    /// [`compile_and_link`], which has already checked them against the
    /// shared resource layout. Missing stages are reported as link errors.
    fn create_program(&mut self, program: &LinkedProgram) -> Result<ProgramId>;

    /// Releases a program. Unknown ids are ignored.
    fn delete_program(&mut self, id: ProgramId);

    /// Makes `id` the program used by subsequent draws.
    fn use_program(&mut self, id: ProgramId) -> anyhow::Result<()>;

    /// Number of programs currently alive on this context.
    fn live_programs(&self) -> usize;

    fn set_uniform(&mut self, handle: UniformHandle, value: UniformValue);

    /// Replaces the image bound to the filter's sampler.
    fn upload_image(&mut self, image: &image::RgbaImage) -> anyhow::Result<()>;

    /// Clears the render target before the next draw.
    fn clear(&mut self, color: [f32; 4]);

    /// Draws the shared quad mesh with the current program.
    fn draw_quad(&mut self) -> anyhow::Result<()>;

    fn read_pixels(&mut self) -> anyhow::Result<Frame>;
}

/// A filter program installed on a rasterizer, with its resolved uniforms
/// and the definition metadata it was built from.
///
/// Clones refer to the same installed program and do not own it; only the
/// [`ProgramSlot`] that loaded it releases it.
#[derive(Debug, Clone)]
pub struct CompiledProgram {
    id: ProgramId,
    pub name: &'static str,
    pub loop_duration: LoopDuration,
    pub chroma_key: ChromaKey,
    pub time_uniform: Option<UniformHandle>,
    pub resolution_uniform: Option<UniformHandle>,
}

impl CompiledProgram {
    pub fn id(&self) -> ProgramId {
        self.id
    }

    pub fn background(&self) -> [f32; 4] {
        background_for(self.chroma_key)
    }

    /// Sets `time`. A no-op when the filter does not declare it.
    pub fn set_time<R: Rasterizer + ?Sized>(&self, rasterizer: &mut R, time: f64) {
        if let Some(handle) = self.time_uniform {
            rasterizer.set_uniform(handle, UniformValue::Float(time as f32));
        }
    }

    /// Sets `resolution`. A no-op when the filter does not declare it.
    pub fn set_resolution<R: Rasterizer + ?Sized>(&self, rasterizer: &mut R, width: u32, height: u32) {
        if let Some(handle) = self.resolution_uniform {
            rasterizer.set_uniform(handle, UniformValue::Vec2([width as f32, height as f32]));
        }
    }

    /// Sets both uniforms, clears to the filter background and draws one
    /// frame at `time`. Does not read back.
    pub fn draw_at<R: Rasterizer + ?Sized>(&self, rasterizer: &mut R, time: f64) -> anyhow::Result<()> {
        self.draw_over(rasterizer, time, self.background())
    }

    /// Like [`CompiledProgram::draw_at`] with an explicit clear color.
    pub fn draw_over<R: Rasterizer + ?Sized>(
        &self,
        rasterizer: &mut R,
        time: f64,
        clear: [f32; 4],
    ) -> anyhow::Result<()> {
        let (width, height) = rasterizer.size();
        rasterizer.use_program(self.id)?;
        self.set_time(rasterizer, time);
        self.set_resolution(rasterizer, width, height);
        rasterizer.clear(clear);
        rasterizer.draw_quad()
    }
}

/// Compiles, links and installs a filter on `rasterizer`, leaving it bound.
///
/// The caller owns the returned program and must release it through
/// [`ProgramSlot`] or [`Rasterizer::delete_program`].
pub fn load_program<R: Rasterizer + ?Sized>(
    rasterizer: &mut R,
    definition: &'static FilterDefinition,
    bindings: &AttributeBindings,
) -> Result<CompiledProgram> {
    let linked = compile_and_link(definition, bindings)?;
    let id = rasterizer.create_program(&linked)?;
    if let Err(e) = rasterizer.use_program(id) {
        rasterizer.delete_program(id);
        return Err(FilterError::ShaderLinkError {
            filter: definition.name.to_string(),
            log: e.to_string(),
        });
    }
    debug!(
        "Loaded filter {} (time: {:?}, resolution: {:?})",
        definition.name, linked.uniforms.time, linked.uniforms.resolution
    );
    Ok(CompiledProgram {
        id,
        name: definition.name,
        loop_duration: definition.loop_duration,
        chroma_key: definition.chroma_key,
        time_uniform: linked.uniforms.time,
        resolution_uniform: linked.uniforms.resolution,
    })
}

/// The single active program of one rendering context.
#[derive(Debug, Default)]
pub struct ProgramSlot {
    current: Option<CompiledProgram>,
}

impl ProgramSlot {
    pub fn new() -> Self {
        Self { current: None }
    }

    pub fn current(&self) -> Option<&CompiledProgram> {
        self.current.as_ref()
    }

    /// Loads `definition` and makes it the active program. The previous
    /// program is released only once the new one has loaded; on failure the
    /// previous program stays installed and bound.
    pub fn load<R: Rasterizer + ?Sized>(
        &mut self,
        rasterizer: &mut R,
        definition: &'static FilterDefinition,
        bindings: &AttributeBindings,
    ) -> Result<&CompiledProgram> {
        let program = match load_program(rasterizer, definition, bindings) {
            Ok(program) => program,
            Err(e) => {
                if let Some(previous) = &self.current {
                    // The previous program must stay the bound one.
                    let _ = rasterizer.use_program(previous.id);
                }
                return Err(e);
            }
        };
        self.release(rasterizer);
        info!("Active filter: {}", program.name);
        Ok(self.current.insert(program))
    }

    /// Releases the active program, if any.
    pub fn release<R: Rasterizer + ?Sized>(&mut self, rasterizer: &mut R) {
        if let Some(previous) = self.current.take() {
            rasterizer.delete_program(previous.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MockRasterizer;
    use super::*;
    use crate::filters;

    #[test]
    fn test_uniform_write_respects_kind_and_bounds() {
        let mut block = [0u8; UNIFORM_BLOCK_SIZE];
        let time = UniformHandle { offset: 0, kind: UniformKind::Float };
        let resolution = UniformHandle { offset: 8, kind: UniformKind::Vec2 };

        UniformValue::Float(1.5).write_into(time, &mut block);
        UniformValue::Vec2([64.0, 32.0]).write_into(resolution, &mut block);
        assert_eq!(&block[0..4], &1.5f32.to_ne_bytes());
        assert_eq!(&block[8..12], &64.0f32.to_ne_bytes());
        assert_eq!(&block[12..16], &32.0f32.to_ne_bytes());

        let before = block;
        UniformValue::Float(9.0).write_into(resolution, &mut block);
        UniformValue::Vec2([1.0, 1.0]).write_into(UniformHandle { offset: 12, kind: UniformKind::Vec2 }, &mut block);
        assert_eq!(block, before);
    }

    #[test]
    fn test_attribute_bindings() {
        let bindings = AttributeBindings::mesh();
        assert_eq!(bindings.location_of("meshPosition"), Some(0));
        assert_eq!(bindings.location_of("position"), None);
        assert_eq!(AttributeBindings::default(), bindings);
    }

    #[test]
    fn test_load_program_binds_and_resolves_uniforms() {
        let mut rasterizer = MockRasterizer::new(8, 8);
        let program = load_program(&mut rasterizer, filters::lookup("Hop").unwrap(), &AttributeBindings::mesh()).unwrap();
        assert_eq!(rasterizer.bound(), Some(program.id()));
        assert_eq!(program.time_uniform, Some(UniformHandle { offset: 0, kind: UniformKind::Float }));
        assert_eq!(program.resolution_uniform, Some(UniformHandle { offset: 8, kind: UniformKind::Vec2 }));
        assert_eq!(program.name, "Hop");
    }

    #[test]
    fn test_switching_filters_keeps_one_live_program() {
        let mut rasterizer = MockRasterizer::new(8, 8);
        let mut slot = ProgramSlot::new();
        let bindings = AttributeBindings::mesh();

        slot.load(&mut rasterizer, filters::lookup("Hop").unwrap(), &bindings).unwrap();
        assert_eq!(rasterizer.live_programs(), 1);
        for name in ["Bounce", "Pride", "Hop", "Peek"] {
            let id = slot.load(&mut rasterizer, filters::lookup(name).unwrap(), &bindings).unwrap().id();
            assert_eq!(rasterizer.live_programs(), 1);
            assert_eq!(rasterizer.bound(), Some(id));
        }

        slot.release(&mut rasterizer);
        assert_eq!(rasterizer.live_programs(), 0);
        assert!(slot.current().is_none());
    }

    #[test]
    fn test_failed_load_keeps_previous_program() {
        let mut rasterizer = MockRasterizer::new(8, 8);
        let mut slot = ProgramSlot::new();
        let bindings = AttributeBindings::mesh();
        let hop = slot.load(&mut rasterizer, filters::lookup("Hop").unwrap(), &bindings).unwrap().id();

        rasterizer.fail_next_create("pipeline creation failed");
        let err = slot.load(&mut rasterizer, filters::lookup("Go").unwrap(), &bindings).unwrap_err();
        assert!(matches!(err, FilterError::ShaderLinkError { ref filter, .. } if filter == "Go"));

        assert_eq!(slot.current().map(|p| p.name), Some("Hop"));
        assert_eq!(rasterizer.bound(), Some(hop));
        assert_eq!(rasterizer.live_programs(), 1);
    }

    #[test]
    fn test_draw_at_sets_uniforms_and_background() {
        let mut rasterizer = MockRasterizer::new(4, 2);
        let program = load_program(&mut rasterizer, filters::lookup("Hop").unwrap(), &AttributeBindings::mesh()).unwrap();
        program.draw_at(&mut rasterizer, 0.5).unwrap();

        assert_eq!(rasterizer.time(), 0.5);
        assert_eq!(rasterizer.resolution(), [4.0, 2.0]);
        assert_eq!(rasterizer.last_clear(), Some([0.0, 1.0, 0.0, 1.0]));
        assert_eq!(rasterizer.draw_count(), 1);
    }
}
