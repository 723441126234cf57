//! Ray-traced shadow compute pass
//!
//! One pass per light. Each dispatch reads the G-buffer position and normal attachments,
//! brute-forces every scene triangle for every covered pixel inside the light's radius and
//! writes 0 (occluded) or 1 (lit) into that light's layer of the shadow array.

use std::sync::{Arc, OnceLock};

use bytemuck::{Pod, Zeroable};

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::engine::{RendererError, RendererResult};
use crate::pipeline::raytrace::{SHADOW_EPSILON, SHADOW_NORMAL_OFFSET};
use crate::pipeline::{GBUFFER_NORMAL, GBUFFER_POSITION, SCENE_TRIANGLES, SHADOW_ARRAY};
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;
use crate::scene::PointLight;
use crate::SHADOW_WORKGROUP_SIZE;

/// Uniform block of `SHADOW_SHADER`
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ShadowUniforms {
    /// xyz = light position, w = influence radius
    pub light_position_radius: [f32; 4],
    pub light_color: [f32; 4],
    /// x = linear, y = quadratic, z = hit epsilon, w = normal offset
    pub attenuation: [f32; 4],
    pub screen_size: [u32; 2],
    pub triangle_count: u32,
    pub _padding: u32,
}

impl ShadowUniforms {
    pub fn new(light: &PointLight, width: u32, height: u32, triangle_count: u32) -> Self {
        Self {
            light_position_radius: light.position.extend(light.radius()).to_array(),
            light_color: light.color.extend(1.0).to_array(),
            attenuation: [
                light.linear,
                light.quadratic,
                SHADOW_EPSILON,
                SHADOW_NORMAL_OFFSET,
            ],
            screen_size: [width, height],
            triangle_count,
            _padding: 0,
        }
    }
}

/// Workgroups covering a `width` x `height` image
pub fn dispatch_size(width: u32, height: u32) -> (u32, u32) {
    (
        width.div_ceil(SHADOW_WORKGROUP_SIZE),
        height.div_ceil(SHADOW_WORKGROUP_SIZE),
    )
}

#[derive(Debug, Clone, Copy)]
struct ShadowPipeline {
    pipeline: ComputePipelineHandle,
    layout: BindGroupLayoutHandle,
}

/// Compute pipeline shared by every light's pass, compiled on first use
#[derive(Debug, Clone, Default)]
pub struct SharedShadowPipeline(Arc<OnceLock<ShadowPipeline>>);

impl SharedShadowPipeline {
    fn get_or_create(&self, backend: &mut dyn GraphicsBackend) -> RendererResult<ShadowPipeline> {
        if let Some(pipeline) = self.0.get() {
            return Ok(*pipeline);
        }

        let layout = backend.create_bind_group_layout(&[
            BindGroupLayoutEntry {
                binding: 0,
                visibility: ShaderStageFlags::COMPUTE,
                ty: BindingType::Texture {
                    sample_type: TextureSampleType::Float { filterable: false },
                    view_dimension: TextureViewDimension::D2,
                },
            },
            BindGroupLayoutEntry {
                binding: 1,
                visibility: ShaderStageFlags::COMPUTE,
                ty: BindingType::Texture {
                    sample_type: TextureSampleType::Float { filterable: false },
                    view_dimension: TextureViewDimension::D2,
                },
            },
            BindGroupLayoutEntry {
                binding: 2,
                visibility: ShaderStageFlags::COMPUTE,
                ty: BindingType::StorageBuffer { read_only: true },
            },
            BindGroupLayoutEntry {
                binding: 3,
                visibility: ShaderStageFlags::COMPUTE,
                ty: BindingType::StorageTexture {
                    format: TextureFormat::R32Float,
                    view_dimension: TextureViewDimension::D2,
                },
            },
            BindGroupLayoutEntry {
                binding: 4,
                visibility: ShaderStageFlags::COMPUTE,
                ty: BindingType::UniformBuffer,
            },
        ])?;

        let pipeline = backend.create_compute_pipeline(&ComputePipelineDescriptor {
            label: Some("Shadow Trace Pipeline".into()),
            shader: SHADOW_SHADER.to_string(),
            entry_point: "cs_main".into(),
            bind_group_layouts: vec![layout],
        })?;
        log::debug!("Compiled shadow trace pipeline");

        Ok(*self.0.get_or_init(|| ShadowPipeline { pipeline, layout }))
    }
}

/// Traces one light's shadow layer
pub struct ShadowPass {
    light_index: usize,
    name: String,
    shared: SharedShadowPipeline,
    position: Option<ResourceId>,
    normal: Option<ResourceId>,
    triangles: Option<ResourceId>,
    shadow_array: Option<ResourceId>,
    uniform_buffer: Option<BufferHandle>,
    pipeline: Option<ComputePipelineHandle>,
    bind_group: Option<BindGroupHandle>,
}

impl ShadowPass {
    pub fn new(light_index: usize, shared: SharedShadowPipeline) -> Self {
        Self {
            light_index,
            name: format!("shadow_pass_{}", light_index),
            shared,
            position: None,
            normal: None,
            triangles: None,
            shadow_array: None,
            uniform_buffer: None,
            pipeline: None,
            bind_group: None,
        }
    }

    pub fn light_index(&self) -> usize {
        self.light_index
    }

    fn declared(&self) -> RendererResult<(ResourceId, ResourceId, ResourceId, ResourceId)> {
        match (self.position, self.normal, self.triangles, self.shadow_array) {
            (Some(p), Some(n), Some(t), Some(s)) => Ok((p, n, t, s)),
            _ => Err(RendererError::MissingResource(format!(
                "{} was prepared before setup",
                self.name
            ))),
        }
    }
}

impl RenderPass for ShadowPass {
    fn name(&self) -> &str {
        &self.name
    }

    fn pass_type(&self) -> PassType {
        PassType::Compute
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) -> RendererResult<()> {
        let position = ctx.resource(GBUFFER_POSITION)?;
        let normal = ctx.resource(GBUFFER_NORMAL)?;
        let triangles = ctx.resource(SCENE_TRIANGLES)?;
        let shadow_array = ctx.resource(SHADOW_ARRAY)?;

        ctx.read(position, ResourceUsage::TextureRead);
        ctx.read(normal, ResourceUsage::TextureRead);
        ctx.read(triangles, ResourceUsage::StorageBufferRead);
        ctx.write(shadow_array, ResourceUsage::StorageWrite);

        self.position = Some(position);
        self.normal = Some(normal);
        self.triangles = Some(triangles);
        self.shadow_array = Some(shadow_array);
        Ok(())
    }

    fn prepare(&mut self, ctx: &mut PassPrepareContext) -> RendererResult<()> {
        let (position, normal, triangles, shadow_array) = self.declared()?;
        let light = ctx.scene.lights.get(self.light_index).ok_or_else(|| {
            RendererError::MissingResource(format!("light {} for {}", self.light_index, self.name))
        })?;

        let shared = self.shared.get_or_create(ctx.backend)?;
        self.pipeline = Some(shared.pipeline);

        let uniform_buffer = match self.uniform_buffer {
            Some(buffer) => buffer,
            None => {
                let buffer = ctx.backend.create_buffer(&BufferDescriptor {
                    label: Some(format!("{} uniforms", self.name)),
                    size: std::mem::size_of::<ShadowUniforms>() as u64,
                    usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
                    mapped_at_creation: false,
                })?;
                self.uniform_buffer = Some(buffer);
                buffer
            }
        };

        let triangle_buffer = ctx.resources.buffer(triangles)?;
        let triangle_count = ctx.scene.triangle_count() as u32;
        let uniforms = ShadowUniforms::new(light, ctx.width, ctx.height, triangle_count);
        ctx.backend
            .write_buffer(uniform_buffer, 0, bytemuck::bytes_of(&uniforms));

        if let Some(stale) = self.bind_group.take() {
            ctx.backend.destroy_bind_group(stale);
        }
        let bind_group = ctx.backend.create_bind_group(
            shared.layout,
            &[
                (0, BindGroupEntry::Texture(ctx.resources.texture_view(position)?)),
                (1, BindGroupEntry::Texture(ctx.resources.texture_view(normal)?)),
                (2, BindGroupEntry::buffer(triangle_buffer)),
                (
                    3,
                    BindGroupEntry::StorageTexture(
                        ctx.resources.layer_view(shadow_array, self.light_index)?,
                    ),
                ),
                (4, BindGroupEntry::buffer(uniform_buffer)),
            ],
        )?;
        self.bind_group = Some(bind_group);

        log::trace!(
            "{}: radius {:.2}, {} triangles",
            self.name,
            light.radius(),
            triangle_count
        );
        Ok(())
    }

    fn execute(&self, ctx: &mut PassExecuteContext) -> RendererResult<()> {
        let (Some(pipeline), Some(bind_group)) = (self.pipeline, self.bind_group) else {
            return Err(RendererError::MissingResource(format!(
                "{} executed before prepare",
                self.name
            )));
        };

        let (groups_x, groups_y) = dispatch_size(ctx.width, ctx.height);

        ctx.backend.begin_compute_pass(Some(&self.name));
        ctx.backend.set_compute_pipeline(pipeline);
        ctx.backend.set_bind_group(0, bind_group);
        ctx.backend.dispatch_compute(groups_x, groups_y, 1);
        ctx.backend.end_compute_pass();
        Ok(())
    }
}

/// Per-light visibility trace
pub const SHADOW_SHADER: &str = r#"
struct Triangle {
    v0: vec4<f32>,
    v1: vec4<f32>,
    v2: vec4<f32>,
    normal: vec4<f32>,
    id: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
}

struct ShadowUniforms {
    // xyz = position, w = radius
    light_position_radius: vec4<f32>,
    light_color: vec4<f32>,
    // x = linear, y = quadratic, z = hit epsilon, w = normal offset
    attenuation: vec4<f32>,
    screen_size: vec2<u32>,
    triangle_count: u32,
    _padding: u32,
}

@group(0) @binding(0) var gbuffer_position: texture_2d<f32>;
@group(0) @binding(1) var gbuffer_normal: texture_2d<f32>;
@group(0) @binding(2) var<storage, read> triangles: array<Triangle>;
@group(0) @binding(3) var shadow_out: texture_storage_2d<r32float, write>;
@group(0) @binding(4) var<uniform> params: ShadowUniforms;

// Moller-Trumbore, two-sided. Returns a negative value on a miss.
fn intersect(origin: vec3<f32>, dir: vec3<f32>, tri: Triangle) -> f32 {
    let edge1 = tri.v1.xyz - tri.v0.xyz;
    let edge2 = tri.v2.xyz - tri.v0.xyz;
    let pvec = cross(dir, edge2);
    let det = dot(edge1, pvec);
    if abs(det) < 1e-8 {
        return -1.0;
    }
    let inv_det = 1.0 / det;

    let tvec = origin - tri.v0.xyz;
    let u = dot(tvec, pvec) * inv_det;
    if u < 0.0 || u > 1.0 {
        return -1.0;
    }

    let qvec = cross(tvec, edge1);
    let v = dot(dir, qvec) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return -1.0;
    }

    return dot(edge2, qvec) * inv_det;
}

fn visibility(position: vec4<f32>, normal: vec3<f32>) -> f32 {
    // Background
    if position.w < 0.5 {
        return 1.0;
    }

    let light_pos = params.light_position_radius.xyz;
    if distance(position.xyz, light_pos) > params.light_position_radius.w {
        return 1.0;
    }

    let epsilon = params.attenuation.z;
    let origin = position.xyz + normal * params.attenuation.w;
    let to_light = light_pos - origin;
    let dist = length(to_light);
    if dist <= epsilon {
        return 1.0;
    }
    let dir = to_light / dist;

    for (var i = 0u; i < params.triangle_count; i = i + 1u) {
        let t = intersect(origin, dir, triangles[i]);
        if t > 0.0 && t < dist - epsilon {
            return 0.0;
        }
    }
    return 1.0;
}

@compute @workgroup_size(16, 16, 1)
fn cs_main(@builtin(global_invocation_id) id: vec3<u32>) {
    if id.x >= params.screen_size.x || id.y >= params.screen_size.y {
        return;
    }

    let coord = vec2<i32>(id.xy);
    let position = textureLoad(gbuffer_position, coord, 0);
    let normal = textureLoad(gbuffer_normal, coord, 0).xyz;

    let lit = visibility(position, normal);
    textureStore(shadow_out, coord, vec4<f32>(lit, 0.0, 0.0, 1.0));
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::recording::{RecordedCommand, RecordingBackend};
    use crate::pipeline::shader_tests::validate_wgsl;
    use rstest::rstest;

    #[test]
    fn uniform_block_is_64_bytes() {
        assert_eq!(std::mem::size_of::<ShadowUniforms>(), 64);
        assert_eq!(std::mem::offset_of!(ShadowUniforms, screen_size), 48);
        assert_eq!(std::mem::offset_of!(ShadowUniforms, triangle_count), 56);
    }

    #[test]
    fn uniforms_carry_light_and_tracing_constants() {
        let light = PointLight::new(glam::Vec3::new(1.0, 2.0, 3.0), glam::Vec3::ONE);
        let uniforms = ShadowUniforms::new(&light, 640, 480, 110);
        assert_eq!(&uniforms.light_position_radius[..3], &[1.0, 2.0, 3.0]);
        assert_eq!(uniforms.light_position_radius[3], light.radius());
        assert_eq!(uniforms.attenuation[2], SHADOW_EPSILON);
        assert_eq!(uniforms.attenuation[3], SHADOW_NORMAL_OFFSET);
        assert_eq!(uniforms.screen_size, [640, 480]);
        assert_eq!(uniforms.triangle_count, 110);
    }

    #[rstest]
    #[case(1920, 1080, (120, 68))]
    #[case(16, 16, (1, 1))]
    #[case(17, 1, (2, 1))]
    #[case(1, 1, (1, 1))]
    fn dispatch_covers_every_pixel(#[case] width: u32, #[case] height: u32, #[case] expected: (u32, u32)) {
        assert_eq!(dispatch_size(width, height), expected);
    }

    #[test]
    fn shader_is_valid_wgsl() {
        let module = validate_wgsl(SHADOW_SHADER);
        let entry = module
            .entry_points
            .iter()
            .find(|e| e.name == "cs_main")
            .expect("compute entry point");
        assert_eq!(entry.workgroup_size, [SHADOW_WORKGROUP_SIZE, SHADOW_WORKGROUP_SIZE, 1]);
    }

    #[test]
    fn passes_share_one_pipeline() {
        let mut backend = RecordingBackend::headless(4, 4);
        let shared = SharedShadowPipeline::default();
        let first = shared.get_or_create(&mut backend).unwrap();
        let second = shared.clone().get_or_create(&mut backend).unwrap();
        assert_eq!(first.pipeline, second.pipeline);
        assert_eq!(backend.compute_pipeline_count(), 1);
    }

    #[test]
    fn execute_requires_prepare() {
        let mut backend = RecordingBackend::headless(4, 4);
        let pass = ShadowPass::new(0, SharedShadowPipeline::default());
        let scene = crate::scene::Scene::new();
        let settings = crate::settings::RenderSettings::new(4, 4);
        let frame = FrameInputs {
            camera: crate::scene::Camera::default().uniform_data(),
            settings: &settings,
        };
        let resources = ResourceTable::default();
        let mut ctx = PassExecuteContext {
            backend: &mut backend,
            scene: &scene,
            frame: &frame,
            resources: &resources,
            width: 4,
            height: 4,
        };
        assert!(pass.execute(&mut ctx).is_err());
        assert!(!backend
            .commands()
            .iter()
            .any(|c| matches!(c, RecordedCommand::Dispatch { .. })));
    }
}
