//! GLSL compilation and linking through naga.

use super::{AttributeBindings, UniformHandle, UniformKind, RESOLUTION_UNIFORM, TIME_UNIFORM, UNIFORM_BLOCK_SIZE};
use crate::error::{FilterError, Result, ShaderStage};
use crate::filters::FilterDefinition;
use naga::front::glsl::{Frontend, Options};
use naga::valid::{Capabilities, ModuleInfo, ValidationFlags, Validator};
use naga::{AddressSpace, Binding, Handle, Module, ResourceBinding, Scalar, Type, TypeInner, VectorSize};

/// Group and binding of the uniform block every filter shares.
const UNIFORM_BINDING: ResourceBinding = ResourceBinding { group: 0, binding: 0 };
/// Binding of the emote texture in group 0.
const IMAGE_BINDING: u32 = 1;
/// Binding of the emote sampler in group 0.
const SAMPLER_BINDING: u32 = 2;

/// One validated shader stage.
pub struct CompiledStage {
    pub stage: ShaderStage,
    module: Module,
    info: ModuleInfo,
}

impl CompiledStage {
    /// Parses and validates a single stage.
    pub fn compile(source: &str, stage: ShaderStage, filter: &str) -> Result<Self> {
        let compile_error = |log: String| FilterError::ShaderCompileError {
            stage,
            filter: filter.to_string(),
            log,
        };

        let mut frontend = Frontend::default();
        let options = Options::from(naga::ShaderStage::from(stage));
        let module = frontend
            .parse(&options, source)
            .map_err(|e| compile_error(e.emit_to_string(source)))?;

        let mut validator = Validator::new(ValidationFlags::all(), Capabilities::all());
        let info = validator
            .validate(&module)
            .map_err(|e| compile_error(e.emit_to_string(source)))?;

        Ok(Self { stage, module, info })
    }

    fn entry_point(&self) -> Option<&naga::EntryPoint> {
        let stage = naga::ShaderStage::from(self.stage);
        self.module.entry_points.iter().find(|ep| ep.stage == stage)
    }

    fn to_wgsl(&self) -> std::result::Result<String, String> {
        naga::back::wgsl::write_string(&self.module, &self.info, naga::back::wgsl::WriterFlags::empty())
            .map_err(|e| format!("WGSL generation error: {:?}", e))
    }

    /// Members of the shared uniform block declared by this stage.
    fn uniform_members(&self) -> Vec<(String, u32, &TypeInner)> {
        let mut members = Vec::new();
        for (_, var) in self.module.global_variables.iter() {
            if var.space != AddressSpace::Uniform || var.binding != Some(UNIFORM_BINDING) {
                continue;
            }
            if let TypeInner::Struct { members: fields, .. } = &self.module.types[var.ty].inner {
                for field in fields {
                    if let Some(name) = &field.name {
                        members.push((name.clone(), field.offset, &self.module.types[field.ty].inner));
                    }
                }
            }
        }
        members
    }

    /// Rejects resources the rasterizer's bind group layout does not
    /// provide: only the uniform block, the image and its sampler, all in
    /// group 0.
    fn check_resource_layout(&self) -> std::result::Result<(), String> {
        for (_, var) in self.module.global_variables.iter() {
            let Some(binding) = &var.binding else {
                continue;
            };
            let name = var.name.as_deref().unwrap_or("?");
            let inner = &self.module.types[var.ty].inner;
            let fits = binding.group == 0
                && match binding.binding {
                    0 => var.space == AddressSpace::Uniform,
                    IMAGE_BINDING => matches!(inner, TypeInner::Image { .. }),
                    SAMPLER_BINDING => matches!(inner, TypeInner::Sampler { comparison: false }),
                    _ => false,
                };
            if !fits {
                return Err(format!(
                    "{} resource `{}` at set {} binding {} is outside the filter layout",
                    self.stage, name, binding.group, binding.binding
                ));
            }
        }
        Ok(())
    }
}

/// An interface variable with an explicit location.
#[derive(Debug)]
struct Varying {
    name: Option<String>,
    location: u32,
    ty: TypeInner,
}

fn collect_varyings(
    module: &Module,
    name: Option<&str>,
    ty: Handle<Type>,
    binding: Option<&Binding>,
    out: &mut Vec<Varying>,
) {
    match binding {
        Some(Binding::Location { location, .. }) => out.push(Varying {
            name: name.map(str::to_string),
            location: *location,
            ty: module.types[ty].inner.clone(),
        }),
        Some(Binding::BuiltIn(_)) => {}
        None => {
            if let TypeInner::Struct { members, .. } = &module.types[ty].inner {
                for member in members {
                    collect_varyings(module, member.name.as_deref(), member.ty, member.binding.as_ref(), out);
                }
            }
        }
    }
}

fn inputs(stage: &CompiledStage, ep: &naga::EntryPoint) -> Vec<Varying> {
    let mut out = Vec::new();
    for arg in &ep.function.arguments {
        collect_varyings(&stage.module, arg.name.as_deref(), arg.ty, arg.binding.as_ref(), &mut out);
    }
    out
}

fn outputs(stage: &CompiledStage, ep: &naga::EntryPoint) -> Vec<Varying> {
    let mut out = Vec::new();
    if let Some(result) = &ep.function.result {
        collect_varyings(&stage.module, None, result.ty, result.binding.as_ref(), &mut out);
    }
    out
}

/// Resolved uniform handles of a linked program.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolvedUniforms {
    pub time: Option<UniformHandle>,
    pub resolution: Option<UniformHandle>,
}

/// Both stages of a filter, checked against each other and translated to
/// WGSL for the GPU backend.
#[derive(Debug, Clone)]
pub struct LinkedProgram {
    pub filter: String,
    pub vertex_wgsl: String,
    pub vertex_entry: String,
    pub fragment_wgsl: String,
    pub fragment_entry: String,
    pub uniforms: ResolvedUniforms,
}

fn matches_kind(ty: &TypeInner, kind: UniformKind) -> bool {
    match kind {
        UniformKind::Float => *ty == TypeInner::Scalar(Scalar::F32),
        UniformKind::Vec2 => {
            *ty == TypeInner::Vector {
                size: VectorSize::Bi,
                scalar: Scalar::F32,
            }
        }
    }
}

fn resolve_uniform(
    name: &str,
    kind: UniformKind,
    vertex: &CompiledStage,
    fragment: &CompiledStage,
) -> std::result::Result<Option<UniformHandle>, String> {
    let mut resolved: Option<UniformHandle> = None;
    for stage in [vertex, fragment] {
        let Some((_, offset, ty)) = stage.uniform_members().into_iter().find(|(n, _, _)| n == name) else {
            continue;
        };
        if !matches_kind(ty, kind) {
            return Err(format!("uniform `{}` in {} stage must be a {:?}", name, stage.stage, kind));
        }
        if offset as usize + kind.size() > UNIFORM_BLOCK_SIZE {
            return Err(format!("uniform `{}` at offset {} overflows the uniform block", name, offset));
        }
        match resolved {
            Some(handle) if handle.offset != offset => {
                return Err(format!(
                    "uniform `{}` is at offset {} in the vertex stage but {} in the fragment stage",
                    name, handle.offset, offset
                ));
            }
            _ => resolved = Some(UniformHandle { offset, kind }),
        }
    }
    Ok(resolved)
}

fn link_stages(
    vertex: &CompiledStage,
    fragment: &CompiledStage,
    bindings: &AttributeBindings,
) -> std::result::Result<(String, String, ResolvedUniforms), String> {
    let vertex_ep = vertex.entry_point().ok_or("vertex stage has no entry point")?;
    let fragment_ep = fragment.entry_point().ok_or("fragment stage has no entry point")?;
    vertex.check_resource_layout()?;
    fragment.check_resource_layout()?;

    for input in inputs(vertex, vertex_ep) {
        let expected = match &input.name {
            Some(name) => bindings.location_of(name),
            None => Some(input.location),
        };
        match expected {
            Some(location) if location == input.location => {}
            Some(location) => {
                return Err(format!(
                    "attribute `{}` is bound to location {} but declared at location {}",
                    input.name.as_deref().unwrap_or("?"),
                    location,
                    input.location
                ));
            }
            None => {
                return Err(format!(
                    "attribute `{}` has no binding",
                    input.name.as_deref().unwrap_or("?")
                ));
            }
        }
    }

    let produced = outputs(vertex, vertex_ep);
    for input in inputs(fragment, fragment_ep) {
        let name = input.name.as_deref().unwrap_or("?");
        match produced.iter().find(|out| out.location == input.location) {
            Some(out) if out.ty == input.ty => {}
            Some(_) => {
                return Err(format!(
                    "varying `{}` at location {} has different types in the two stages",
                    name, input.location
                ));
            }
            None => {
                return Err(format!(
                    "varying `{}` at location {} is not written by the vertex stage",
                    name, input.location
                ));
            }
        }
    }

    let uniforms = ResolvedUniforms {
        time: resolve_uniform(TIME_UNIFORM, UniformKind::Float, vertex, fragment)?,
        resolution: resolve_uniform(RESOLUTION_UNIFORM, UniformKind::Vec2, vertex, fragment)?,
    };
    Ok((vertex_ep.name.clone(), fragment_ep.name.clone(), uniforms))
}

/// Compiles both stages of `definition` independently, then links them
/// against `bindings`. The stage modules are dropped once linked.
pub fn compile_and_link(definition: &FilterDefinition, bindings: &AttributeBindings) -> Result<LinkedProgram> {
    let vertex = CompiledStage::compile(definition.vertex_source, ShaderStage::Vertex, definition.name)?;
    let fragment = CompiledStage::compile(definition.fragment_source, ShaderStage::Fragment, definition.name)?;

    let link_error = |log: String| FilterError::ShaderLinkError {
        filter: definition.name.to_string(),
        log,
    };
    let (vertex_entry, fragment_entry, uniforms) = link_stages(&vertex, &fragment, bindings).map_err(link_error)?;

    Ok(LinkedProgram {
        filter: definition.name.to_string(),
        vertex_wgsl: vertex.to_wgsl().map_err(link_error)?,
        vertex_entry,
        fragment_wgsl: fragment.to_wgsl().map_err(link_error)?,
        fragment_entry,
        uniforms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::{self, ChromaKey, LoopDuration};

    const PLAIN_VERT: &str = "#version 450
layout(location = 0) in vec2 meshPosition;
layout(location = 0) out vec2 uv;
void main() {
    gl_Position = vec4(meshPosition, 0.0, 1.0);
    uv = meshPosition;
}
";

    const PLAIN_FRAG: &str = "#version 450
layout(location = 0) in vec2 uv;
layout(location = 0) out vec4 fragColor;
void main() {
    fragColor = vec4(uv, 0.0, 1.0);
}
";

    fn definition(vertex_source: &'static str, fragment_source: &'static str) -> FilterDefinition {
        FilterDefinition {
            name: "Test",
            vertex_source,
            fragment_source,
            loop_duration: LoopDuration::new(1.0).unwrap(),
            chroma_key: ChromaKey::None,
        }
    }

    #[test]
    fn test_every_catalog_filter_links() {
        for filter in filters::all() {
            let linked = compile_and_link(filter, &AttributeBindings::mesh())
                .unwrap_or_else(|e| panic!("{} failed: {}", filter.name, e));
            assert_eq!(linked.filter, filter.name);
            assert!(linked.uniforms.time.is_some(), "{} has no time uniform", filter.name);
            assert!(!linked.vertex_wgsl.is_empty());
            assert!(!linked.fragment_wgsl.is_empty());
        }
    }

    #[test]
    fn test_missing_uniforms_are_optional() {
        let linked = compile_and_link(&definition(PLAIN_VERT, PLAIN_FRAG), &AttributeBindings::mesh()).unwrap();
        assert_eq!(linked.uniforms, ResolvedUniforms::default());
    }

    #[test]
    fn test_compile_error_reports_stage() {
        let broken = "#version 450\nlayout(location = 0) out vec4 fragColor;\nvoid main() { fragColor = nope; }\n";
        let err = compile_and_link(&definition(PLAIN_VERT, broken), &AttributeBindings::mesh()).unwrap_err();
        match err {
            FilterError::ShaderCompileError { stage, filter, log } => {
                assert_eq!(stage, ShaderStage::Fragment);
                assert_eq!(filter, "Test");
                assert!(!log.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unwritten_varying_fails_to_link() {
        let frag = "#version 450
layout(location = 1) in vec2 other;
layout(location = 0) out vec4 fragColor;
void main() {
    fragColor = vec4(other, 0.0, 1.0);
}
";
        let err = compile_and_link(&definition(PLAIN_VERT, frag), &AttributeBindings::mesh()).unwrap_err();
        assert!(matches!(err, FilterError::ShaderLinkError { ref log, .. } if log.contains("location 1")));
    }

    #[test]
    fn test_attribute_must_match_binding_table() {
        let bindings = AttributeBindings::new().with("meshPosition", 3);
        let err = compile_and_link(&definition(PLAIN_VERT, PLAIN_FRAG), &bindings).unwrap_err();
        assert!(matches!(err, FilterError::ShaderLinkError { ref log, .. } if log.contains("meshPosition")));
    }

    #[test]
    fn test_uniform_type_is_checked() {
        let frag = "#version 450
layout(set = 0, binding = 0) uniform Uniforms {
    vec2 time;
};
layout(location = 0) in vec2 uv;
layout(location = 0) out vec4 fragColor;
void main() {
    fragColor = vec4(uv + time, 0.0, 1.0);
}
";
        let err = compile_and_link(&definition(PLAIN_VERT, frag), &AttributeBindings::mesh()).unwrap_err();
        assert!(matches!(err, FilterError::ShaderLinkError { ref log, .. } if log.contains("`time`")));
    }

    #[test]
    fn test_uniform_declared_in_one_stage_resolves() {
        let frag = "#version 450
layout(set = 0, binding = 0) uniform Uniforms {
    float time;
    vec2 resolution;
};
layout(location = 0) in vec2 uv;
layout(location = 0) out vec4 fragColor;
void main() {
    fragColor = vec4(uv * resolution, time, 1.0);
}
";
        let linked = compile_and_link(&definition(PLAIN_VERT, frag), &AttributeBindings::mesh()).unwrap();
        assert_eq!(linked.uniforms.time, Some(UniformHandle { offset: 0, kind: UniformKind::Float }));
        assert_eq!(linked.uniforms.resolution, Some(UniformHandle { offset: 8, kind: UniformKind::Vec2 }));
    }

    #[test]
    fn test_resource_outside_layout_fails_to_link() {
        let frag = "#version 450
layout(set = 0, binding = 3) uniform Extra {
    float gain;
};
layout(location = 0) in vec2 uv;
layout(location = 0) out vec4 fragColor;
void main() {
    fragColor = vec4(uv * gain, 0.0, 1.0);
}
";
        let err = compile_and_link(&definition(PLAIN_VERT, frag), &AttributeBindings::mesh()).unwrap_err();
        assert!(matches!(err, FilterError::ShaderLinkError { ref log, .. } if log.contains("binding 3")));

        let frag = "#version 450
layout(set = 1, binding = 1) uniform texture2D other;
layout(set = 0, binding = 2) uniform sampler otherSampler;
layout(location = 0) in vec2 uv;
layout(location = 0) out vec4 fragColor;
void main() {
    fragColor = texture(sampler2D(other, otherSampler), uv);
}
";
        let err = compile_and_link(&definition(PLAIN_VERT, frag), &AttributeBindings::mesh()).unwrap_err();
        assert!(matches!(err, FilterError::ShaderLinkError { ref log, .. } if log.contains("set 1")));
    }

    #[test]
    fn test_resource_kind_must_match_binding() {
        let frag = "#version 450
layout(set = 0, binding = 1) uniform sampler wrongSampler;
layout(set = 0, binding = 2) uniform texture2D wrongTexture;
layout(location = 0) in vec2 uv;
layout(location = 0) out vec4 fragColor;
void main() {
    fragColor = texture(sampler2D(wrongTexture, wrongSampler), uv);
}
";
        let err = compile_and_link(&definition(PLAIN_VERT, frag), &AttributeBindings::mesh()).unwrap_err();
        assert!(matches!(err, FilterError::ShaderLinkError { ref log, .. } if log.contains("outside the filter layout")));
    }
}
