//! Deferred lighting pass
//!
//! Fullscreen composite that lights the G-buffer with every point light, each term scaled by
//! that light's ray-traced visibility. The pass also copies G-buffer depth into the
//! presentation depth target through `frag_depth`, so overlays drawn afterwards are occluded
//! by scene geometry.

use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::engine::{RendererError, RendererResult};
use crate::pipeline::{
    GBUFFER_ALBEDO_SPEC, GBUFFER_DEPTH, GBUFFER_NORMAL, GBUFFER_POSITION, PRESENT_DEPTH,
    SHADOW_ARRAY, SWAPCHAIN,
};
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;
use crate::resources::DEPTH_FORMAT;
use crate::scene::GpuPointLight;
use crate::settings::DeferredShadingMode;

/// Color of pixels no geometry covers
pub const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// Uniform block of `DEFERRED_LIGHTING_SHADER`
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct LightingUniforms {
    pub view_position: [f32; 4],
    pub clear_color: [f32; 4],
    pub light_count: u32,
    pub shading_mode: u32,
    pub ambient: f32,
    pub _padding: u32,
}

impl LightingUniforms {
    pub fn new(
        view_position: Vec3,
        light_count: usize,
        shading_mode: DeferredShadingMode,
        ambient: f32,
    ) -> Self {
        Self {
            view_position: view_position.extend(1.0).to_array(),
            clear_color: CLEAR_COLOR,
            light_count: light_count as u32,
            shading_mode: shading_mode.shader_index(),
            ambient,
            _padding: 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Inputs {
    position: ResourceId,
    normal: ResourceId,
    albedo_spec: ResourceId,
    depth: ResourceId,
    shadow_array: ResourceId,
    swapchain: ResourceId,
    present_depth: ResourceId,
}

#[derive(Debug, Clone, Copy)]
struct LightingGpu {
    pipeline: RenderPipelineHandle,
    layout: BindGroupLayoutHandle,
    light_buffer: BufferHandle,
    uniform_buffer: BufferHandle,
}

/// Deferred lighting pass
pub struct LightingPass {
    ambient: f32,
    inputs: Option<Inputs>,
    gpu: Option<LightingGpu>,
    bind_group: Option<BindGroupHandle>,
}

impl LightingPass {
    pub fn new(ambient: f32) -> Self {
        Self {
            ambient,
            inputs: None,
            gpu: None,
            bind_group: None,
        }
    }

    fn create_gpu(&self, ctx: &mut PassPrepareContext) -> RendererResult<LightingGpu> {
        let backend = &mut *ctx.backend;
        let fragment_texture = |binding, sample_type, view_dimension| BindGroupLayoutEntry {
            binding,
            visibility: ShaderStageFlags::FRAGMENT,
            ty: BindingType::Texture {
                sample_type,
                view_dimension,
            },
        };
        let unfilterable = TextureSampleType::Float { filterable: false };

        let layout = backend.create_bind_group_layout(&[
            fragment_texture(0, unfilterable, TextureViewDimension::D2),
            fragment_texture(1, unfilterable, TextureViewDimension::D2),
            fragment_texture(2, unfilterable, TextureViewDimension::D2),
            fragment_texture(3, TextureSampleType::Depth, TextureViewDimension::D2),
            fragment_texture(4, unfilterable, TextureViewDimension::D2Array),
            BindGroupLayoutEntry {
                binding: 5,
                visibility: ShaderStageFlags::FRAGMENT,
                ty: BindingType::StorageBuffer { read_only: true },
            },
            BindGroupLayoutEntry {
                binding: 6,
                visibility: ShaderStageFlags::FRAGMENT,
                ty: BindingType::UniformBuffer,
            },
        ])?;

        let pipeline = backend.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("Deferred Lighting Pipeline".into()),
            vertex_shader: DEFERRED_LIGHTING_SHADER.to_string(),
            fragment_shader: Some(DEFERRED_LIGHTING_SHADER.to_string()),
            vertex_layouts: vec![],
            bind_group_layouts: vec![layout],
            primitive_topology: PrimitiveTopology::TriangleList,
            front_face: FrontFace::Ccw,
            cull_mode: CullMode::None,
            depth_stencil: Some(DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: CompareFunction::Always,
            }),
            color_targets: vec![ColorTargetState::opaque(backend.swapchain_format())],
        })?;

        // Lights never change after startup. An empty set still gets one zeroed record.
        let mut lights = ctx.scene.lights.gpu_data();
        if lights.is_empty() {
            lights.push(GpuPointLight::zeroed());
        }
        let light_bytes: &[u8] = bytemuck::cast_slice(&lights);
        let light_buffer = backend.create_buffer_init(
            &BufferDescriptor {
                label: Some("Point Light Buffer".into()),
                size: light_bytes.len() as u64,
                usage: BufferUsage::STORAGE,
                mapped_at_creation: false,
            },
            light_bytes,
        )?;

        let uniform_buffer = backend.create_buffer(&BufferDescriptor {
            label: Some("Lighting Uniforms".into()),
            size: std::mem::size_of::<LightingUniforms>() as u64,
            usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
            mapped_at_creation: false,
        })?;

        log::debug!("Deferred lighting ready for {} lights", ctx.scene.lights.len());

        Ok(LightingGpu {
            pipeline,
            layout,
            light_buffer,
            uniform_buffer,
        })
    }
}

impl RenderPass for LightingPass {
    fn name(&self) -> &str {
        "Deferred Lighting Pass"
    }

    fn pass_type(&self) -> PassType {
        PassType::Graphics
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) -> RendererResult<()> {
        let present_depth = ctx.create_texture(
            PRESENT_DEPTH,
            TextureSize::default(),
            DEPTH_FORMAT,
            TextureUsage::RENDER_ATTACHMENT,
        );
        let inputs = Inputs {
            position: ctx.resource(GBUFFER_POSITION)?,
            normal: ctx.resource(GBUFFER_NORMAL)?,
            albedo_spec: ctx.resource(GBUFFER_ALBEDO_SPEC)?,
            depth: ctx.resource(GBUFFER_DEPTH)?,
            shadow_array: ctx.resource(SHADOW_ARRAY)?,
            swapchain: ctx.resource(SWAPCHAIN)?,
            present_depth,
        };

        for id in [
            inputs.position,
            inputs.normal,
            inputs.albedo_spec,
            inputs.depth,
            inputs.shadow_array,
        ] {
            ctx.read(id, ResourceUsage::TextureRead);
        }
        ctx.write(inputs.swapchain, ResourceUsage::RenderTarget);
        ctx.write(inputs.present_depth, ResourceUsage::DepthStencilWrite);

        self.inputs = Some(inputs);
        Ok(())
    }

    fn prepare(&mut self, ctx: &mut PassPrepareContext) -> RendererResult<()> {
        let Some(inputs) = self.inputs else {
            return Err(RendererError::MissingResource(
                "lighting pass prepared before setup".into(),
            ));
        };
        let gpu = match self.gpu {
            Some(gpu) => gpu,
            None => {
                let gpu = self.create_gpu(ctx)?;
                self.gpu = Some(gpu);
                gpu
            }
        };

        // G-buffer views change on resize, so the bind group is rebuilt every prepare
        if let Some(stale) = self.bind_group.take() {
            ctx.backend.destroy_bind_group(stale);
        }
        let resources = ctx.resources;
        self.bind_group = Some(ctx.backend.create_bind_group(
            gpu.layout,
            &[
                (0, BindGroupEntry::Texture(resources.texture_view(inputs.position)?)),
                (1, BindGroupEntry::Texture(resources.texture_view(inputs.normal)?)),
                (2, BindGroupEntry::Texture(resources.texture_view(inputs.albedo_spec)?)),
                (3, BindGroupEntry::Texture(resources.texture_view(inputs.depth)?)),
                (4, BindGroupEntry::Texture(resources.texture_view(inputs.shadow_array)?)),
                (5, BindGroupEntry::buffer(gpu.light_buffer)),
                (6, BindGroupEntry::buffer(gpu.uniform_buffer)),
            ],
        )?);
        Ok(())
    }

    fn execute(&self, ctx: &mut PassExecuteContext) -> RendererResult<()> {
        let (Some(inputs), Some(gpu), Some(bind_group)) = (self.inputs, self.gpu, self.bind_group)
        else {
            return Err(RendererError::MissingResource(
                "lighting pass executed before prepare".into(),
            ));
        };
        let color_view = ctx.resources.texture_view(inputs.swapchain)?;
        let depth_view = ctx.resources.texture_view(inputs.present_depth)?;

        let uniforms = LightingUniforms::new(
            ctx.frame.camera.position.truncate(),
            ctx.scene.lights.len(),
            ctx.frame.settings.shading_mode,
            self.ambient,
        );
        ctx.backend
            .write_buffer(gpu.uniform_buffer, 0, bytemuck::bytes_of(&uniforms));

        let backend = &mut *ctx.backend;
        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("Deferred Lighting Pass".into()),
            color_attachments: vec![ColorAttachment {
                view: color_view,
                resolve_target: None,
                load_op: LoadOp::Clear(CLEAR_COLOR),
                store_op: StoreOp::Store,
            }],
            depth_stencil_attachment: Some(DepthStencilAttachment {
                view: depth_view,
                depth_load_op: LoadOp::Clear([1.0, 0.0, 0.0, 0.0]),
                depth_store_op: StoreOp::Store,
                depth_clear_value: 1.0,
            }),
        });
        backend.set_viewport(0.0, 0.0, ctx.width as f32, ctx.height as f32, 0.0, 1.0);
        backend.set_render_pipeline(gpu.pipeline);
        backend.set_bind_group(0, bind_group);
        backend.draw(0..3, 0..1);
        backend.end_render_pass();
        Ok(())
    }
}

/// Deferred lighting shader
pub const DEFERRED_LIGHTING_SHADER: &str = r#"
struct PointLight {
    // xyz = position, w = radius
    position_radius: vec4<f32>,
    color: vec4<f32>,
    // x = linear, y = quadratic
    attenuation: vec4<f32>,
}

struct LightingUniforms {
    view_position: vec4<f32>,
    clear_color: vec4<f32>,
    light_count: u32,
    // 0 lit, 1 shadow visibility
    shading_mode: u32,
    ambient: f32,
    _padding: u32,
}

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
}

struct FragmentOutput {
    @location(0) color: vec4<f32>,
    @builtin(frag_depth) depth: f32,
}

@group(0) @binding(0) var gbuffer_position: texture_2d<f32>;
@group(0) @binding(1) var gbuffer_normal: texture_2d<f32>;
@group(0) @binding(2) var gbuffer_albedo_spec: texture_2d<f32>;
@group(0) @binding(3) var gbuffer_depth: texture_depth_2d;
@group(0) @binding(4) var shadow_layers: texture_2d_array<f32>;
@group(0) @binding(5) var<storage, read> lights: array<PointLight>;
@group(0) @binding(6) var<uniform> lighting: LightingUniforms;

// Fullscreen triangle
@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32) -> VertexOutput {
    var output: VertexOutput;
    let x = f32((vertex_index << 1u) & 2u);
    let y = f32(vertex_index & 2u);
    output.position = vec4<f32>(x * 2.0 - 1.0, y * 2.0 - 1.0, 0.0, 1.0);
    return output;
}

@fragment
fn fs_main(input: VertexOutput) -> FragmentOutput {
    var output: FragmentOutput;
    let coord = vec2<i32>(input.position.xy);

    output.depth = textureLoad(gbuffer_depth, coord, 0);

    let position = textureLoad(gbuffer_position, coord, 0);
    if position.w < 0.5 {
        output.color = lighting.clear_color;
        return output;
    }

    if lighting.shading_mode == 1u {
        var visible = 0.0;
        for (var i = 0u; i < lighting.light_count; i = i + 1u) {
            visible = visible + textureLoad(shadow_layers, coord, i32(i), 0).r;
        }
        let average = visible / max(f32(lighting.light_count), 1.0);
        output.color = vec4<f32>(vec3<f32>(average), 1.0);
        return output;
    }

    let world_pos = position.xyz;
    let normal = normalize(textureLoad(gbuffer_normal, coord, 0).xyz);
    let albedo_spec = textureLoad(gbuffer_albedo_spec, coord, 0);
    let albedo = albedo_spec.rgb;
    let view_dir = normalize(lighting.view_position.xyz - world_pos);

    var color = albedo * lighting.ambient;
    for (var i = 0u; i < lighting.light_count; i = i + 1u) {
        let light = lights[i];
        let to_light = light.position_radius.xyz - world_pos;
        let dist = length(to_light);
        if dist > light.position_radius.w {
            continue;
        }

        let visibility = textureLoad(shadow_layers, coord, i32(i), 0).r;
        let light_dir = to_light / max(dist, 1e-4);

        // Blinn-Phong
        let diffuse = max(dot(normal, light_dir), 0.0) * albedo * light.color.rgb;
        let halfway = normalize(light_dir + view_dir);
        let spec = pow(max(dot(normal, halfway), 0.0), 16.0);
        let specular = light.color.rgb * spec * albedo_spec.a;

        let attenuation = 1.0 / (1.0 + light.attenuation.x * dist + light.attenuation.y * dist * dist);
        color = color + (diffuse + specular) * attenuation * visibility;
    }

    output.color = vec4<f32>(color, 1.0);
    return output;
}
"#;

/// One G-buffer texel as the lighting shader loads it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompositeTexel {
    /// xyz = world position, w = 1 where geometry was drawn
    pub position: Vec4,
    pub normal: Vec3,
    /// rgb = albedo, a = specular intensity
    pub albedo_spec: Vec4,
}

/// CPU mirror of `fs_main` in [`DEFERRED_LIGHTING_SHADER`].
///
/// `visibility[i]` is the shadow layer sample for light `i`; missing entries count as lit.
pub fn shade_pixel(
    texel: &CompositeTexel,
    uniforms: &LightingUniforms,
    lights: &[GpuPointLight],
    visibility: &[f32],
) -> Vec4 {
    if texel.position.w < 0.5 {
        return Vec4::from_array(uniforms.clear_color);
    }

    let light_count = (uniforms.light_count as usize).min(lights.len());
    let sample = |i: usize| visibility.get(i).copied().unwrap_or(1.0);

    if uniforms.shading_mode == DeferredShadingMode::Shadows.shader_index() {
        let visible: f32 = (0..uniforms.light_count as usize).map(sample).sum();
        let average = visible / (uniforms.light_count as f32).max(1.0);
        return Vec3::splat(average).extend(1.0);
    }

    let world_pos = texel.position.truncate();
    let normal = texel.normal.normalize_or_zero();
    let albedo = texel.albedo_spec.truncate();
    let view_position = Vec4::from_array(uniforms.view_position).truncate();
    let view_dir = (view_position - world_pos).normalize_or_zero();

    let mut color = albedo * uniforms.ambient;
    for (i, light) in lights.iter().take(light_count).enumerate() {
        let to_light = light.position_radius.truncate() - world_pos;
        let dist = to_light.length();
        if dist > light.position_radius.w {
            continue;
        }

        let light_dir = to_light / dist.max(1e-4);
        let light_color = light.color.truncate();

        let diffuse = normal.dot(light_dir).max(0.0) * albedo * light_color;
        let halfway = (light_dir + view_dir).normalize_or_zero();
        let spec = normal.dot(halfway).max(0.0).powf(16.0);
        let specular = light_color * spec * texel.albedo_spec.w;

        let attenuation =
            1.0 / (1.0 + light.attenuation.x * dist + light.attenuation.y * dist * dist);
        color += (diffuse + specular) * attenuation * sample(i);
    }

    color.extend(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::shader_tests::validate_wgsl;

    #[test]
    fn uniform_block_is_48_bytes() {
        assert_eq!(std::mem::size_of::<LightingUniforms>(), 48);
        assert_eq!(std::mem::offset_of!(LightingUniforms, light_count), 32);
    }

    use crate::scene::PointLight;
    use rstest::rstest;

    const AMBIENT: f32 = 0.1;

    fn texel(albedo: Vec3) -> CompositeTexel {
        CompositeTexel {
            position: Vec4::new(0.0, 0.0, 0.0, 1.0),
            normal: Vec3::Y,
            albedo_spec: albedo.extend(0.5),
        }
    }

    fn overhead_light() -> GpuPointLight {
        PointLight::new(Vec3::new(0.0, 1.0, 0.0), Vec3::ONE).to_gpu_data()
    }

    fn lit(light_count: usize) -> LightingUniforms {
        let eye = Vec3::new(0.0, 2.0, 2.0);
        LightingUniforms::new(eye, light_count, DeferredShadingMode::Lit, AMBIENT)
    }

    #[test]
    fn zero_lights_composite_ambient_only() {
        let uniforms = lit(0);
        assert_eq!(uniforms.light_count, 0);
        assert_eq!(uniforms.clear_color, CLEAR_COLOR);

        let albedo = Vec3::new(0.8, 0.4, 0.2);
        let color = shade_pixel(&texel(albedo), &uniforms, &[], &[]);
        assert!(color.truncate().abs_diff_eq(albedo * AMBIENT, 1e-6));
        assert_eq!(color.w, 1.0);
    }

    #[test]
    fn background_texel_gets_clear_color() {
        let mut background = texel(Vec3::ONE);
        background.position.w = 0.0;
        let color = shade_pixel(&background, &lit(1), &[overhead_light()], &[1.0]);
        assert_eq!(color, Vec4::from_array(CLEAR_COLOR));
    }

    #[test]
    fn light_beyond_radius_adds_nothing() {
        let light = overhead_light();
        let radius = light.position_radius.w;
        let mut far = light;
        far.position_radius = Vec4::new(0.0, radius + 1.0, 0.0, radius);

        let albedo = Vec3::splat(0.5);
        let color = shade_pixel(&texel(albedo), &lit(1), &[far], &[1.0]);
        assert!(color.truncate().abs_diff_eq(albedo * AMBIENT, 1e-6));
    }

    #[rstest]
    #[case(0.0, false)]
    #[case(1.0, true)]
    fn visibility_scales_the_light_term(#[case] visibility: f32, #[case] contributes: bool) {
        let albedo = Vec3::splat(0.5);
        let ambient_only = albedo * AMBIENT;
        let color = shade_pixel(&texel(albedo), &lit(1), &[overhead_light()], &[visibility]);
        assert_eq!(!color.truncate().abs_diff_eq(ambient_only, 1e-6), contributes);
    }

    #[test]
    fn occluded_light_leaves_the_others() {
        let albedo = Vec3::splat(0.5);
        let lights = [overhead_light(), overhead_light()];
        let one = shade_pixel(&texel(albedo), &lit(1), &lights[..1], &[1.0]);
        let both_one_occluded = shade_pixel(&texel(albedo), &lit(2), &lights, &[1.0, 0.0]);
        assert!(one.abs_diff_eq(both_one_occluded, 1e-6));
    }

    #[rstest]
    #[case(0, &[], 0.0)]
    #[case(2, &[1.0, 0.0], 0.5)]
    #[case(4, &[1.0, 1.0, 1.0, 0.0], 0.75)]
    fn shadow_mode_averages_visibility(
        #[case] light_count: usize,
        #[case] visibility: &[f32],
        #[case] expected: f32,
    ) {
        let uniforms =
            LightingUniforms::new(Vec3::ZERO, light_count, DeferredShadingMode::Shadows, AMBIENT);
        let lights = vec![overhead_light(); light_count];
        let color = shade_pixel(&texel(Vec3::ONE), &uniforms, &lights, visibility);
        assert!(color.is_finite());
        assert!(color.truncate().abs_diff_eq(Vec3::splat(expected), 1e-6));
    }

    #[test]
    fn shadow_debug_mode_reaches_the_shader() {
        let uniforms = LightingUniforms::new(Vec3::ONE, 3, DeferredShadingMode::Shadows, 0.1);
        assert_eq!(uniforms.shading_mode, 1);
        assert_eq!(uniforms.view_position, [1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn shader_is_valid_wgsl() {
        let module = validate_wgsl(DEFERRED_LIGHTING_SHADER);
        assert_eq!(module.entry_points.len(), 2);
    }
}
