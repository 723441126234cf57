//! G-Buffer generation pass for deferred rendering
//!
//! Renders every object instance and then the floor into three color targets plus depth:
//! - world position, w = coverage flag (background stays 0 from the clear)
//! - world normal
//! - albedo in rgb and the specular map in alpha, or a debug visualization
//!
//! The render mode only changes what lands in the albedo/specular target. Position and
//! normal always hold geometry because the shadow and lighting passes consume them.

use std::path::PathBuf;

use bytemuck::{Pod, Zeroable};

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::engine::{RendererError, RendererResult};
use crate::pipeline::{GBUFFER_ALBEDO_SPEC, GBUFFER_DEPTH, GBUFFER_NORMAL, GBUFFER_POSITION};
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;
use crate::resources::{
    GpuMesh, GpuTexture, Mesh, TextureData, TextureLoader, DEPTH_FORMAT,
    GBUFFER_ALBEDO_SPEC_FORMAT, GBUFFER_NORMAL_FORMAT, GBUFFER_POSITION_FORMAT,
};

/// Image files for the two material groups. `None` uses a built-in fallback.
#[derive(Debug, Clone, Default)]
pub struct SurfaceTextures {
    pub object_diffuse: Option<PathBuf>,
    pub object_specular: Option<PathBuf>,
    pub floor_diffuse: Option<PathBuf>,
    pub floor_specular: Option<PathBuf>,
}

/// Per-frame uniform block of `GBUFFER_SHADER`
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct GeometryFrameUniform {
    pub camera: CameraUniform,
    pub render_mode: u32,
    pub _padding: [u32; 3],
}

#[derive(Debug, Clone, Copy)]
struct Targets {
    position: ResourceId,
    normal: ResourceId,
    albedo_spec: ResourceId,
    depth: ResourceId,
}

#[derive(Debug, Clone, Copy)]
struct Instance {
    bind_group: BindGroupHandle,
}

/// GPU state built once on first prepare
struct GeometryGpu {
    pipeline: RenderPipelineHandle,
    frame_buffer: BufferHandle,
    frame_bind_group: BindGroupHandle,
    cube: GpuMesh,
    floor_mesh: GpuMesh,
    object_material: BindGroupHandle,
    floor_material: BindGroupHandle,
    objects: Vec<Instance>,
    floor: Option<Instance>,
}

/// G-Buffer generation pass for deferred rendering
pub struct GBufferPass {
    textures: SurfaceTextures,
    targets: Option<Targets>,
    gpu: Option<GeometryGpu>,
}

impl GBufferPass {
    pub fn new(textures: SurfaceTextures) -> Self {
        Self {
            textures,
            targets: None,
            gpu: None,
        }
    }

    fn create_gpu(&self, ctx: &mut PassPrepareContext) -> RendererResult<GeometryGpu> {
        let backend = &mut *ctx.backend;

        let frame_layout = backend.create_bind_group_layout(&[BindGroupLayoutEntry {
            binding: 0,
            visibility: ShaderStageFlags::VERTEX_FRAGMENT,
            ty: BindingType::UniformBuffer,
        }])?;
        let object_layout = backend.create_bind_group_layout(&[BindGroupLayoutEntry {
            binding: 0,
            visibility: ShaderStageFlags::VERTEX,
            ty: BindingType::UniformBuffer,
        }])?;
        let material_layout = backend.create_bind_group_layout(&[
            BindGroupLayoutEntry {
                binding: 0,
                visibility: ShaderStageFlags::FRAGMENT,
                ty: BindingType::Texture {
                    sample_type: TextureSampleType::Float { filterable: true },
                    view_dimension: TextureViewDimension::D2,
                },
            },
            BindGroupLayoutEntry {
                binding: 1,
                visibility: ShaderStageFlags::FRAGMENT,
                ty: BindingType::Texture {
                    sample_type: TextureSampleType::Float { filterable: true },
                    view_dimension: TextureViewDimension::D2,
                },
            },
            BindGroupLayoutEntry {
                binding: 2,
                visibility: ShaderStageFlags::FRAGMENT,
                ty: BindingType::Sampler,
            },
        ])?;

        let pipeline = backend.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("Geometry Pipeline".into()),
            vertex_shader: GBUFFER_SHADER.to_string(),
            fragment_shader: Some(GBUFFER_SHADER.to_string()),
            vertex_layouts: vec![Vertex::layout()],
            bind_group_layouts: vec![frame_layout, object_layout, material_layout],
            primitive_topology: PrimitiveTopology::TriangleList,
            front_face: FrontFace::Ccw,
            cull_mode: CullMode::None,
            depth_stencil: Some(DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: CompareFunction::Less,
            }),
            color_targets: vec![
                ColorTargetState::opaque(GBUFFER_POSITION_FORMAT),
                ColorTargetState::opaque(GBUFFER_NORMAL_FORMAT),
                ColorTargetState::opaque(GBUFFER_ALBEDO_SPEC_FORMAT),
            ],
        })?;

        let frame_buffer = backend.create_buffer(&BufferDescriptor {
            label: Some("Geometry Frame Uniforms".into()),
            size: std::mem::size_of::<GeometryFrameUniform>() as u64,
            usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
            mapped_at_creation: false,
        })?;
        let frame_bind_group =
            backend.create_bind_group(frame_layout, &[(0, BindGroupEntry::buffer(frame_buffer))])?;

        // Materials: loaded images where given, built-in fallbacks otherwise
        let sampler = backend.create_sampler(&SamplerDescriptor {
            label: Some("Surface Sampler".into()),
            address_mode_u: AddressMode::Repeat,
            address_mode_v: AddressMode::Repeat,
            ..Default::default()
        })?;
        let white = GpuTexture::create(backend, &TextureData::white())?;
        let checker = GpuTexture::create(
            backend,
            &TextureData::checkerboard(64, [200, 200, 200, 255], [90, 90, 90, 255]),
        )?;
        let dull = GpuTexture::create(
            backend,
            &TextureData::solid_color([64, 64, 64, 255], "dull specular").linear(),
        )?;

        let mut loader = TextureLoader::new();
        let mut view = |path: &Option<PathBuf>, srgb: bool, fallback: TextureViewHandle| match path {
            Some(path) => {
                let handle = loader.load(&mut *backend, path, srgb);
                loader.view_or(handle, fallback)
            }
            None => fallback,
        };
        let object_diffuse = view(&self.textures.object_diffuse, true, white.view);
        let object_specular = view(&self.textures.object_specular, false, white.view);
        let floor_diffuse = view(&self.textures.floor_diffuse, true, checker.view);
        let floor_specular = view(&self.textures.floor_specular, false, dull.view);

        let object_material = backend.create_bind_group(
            material_layout,
            &[
                (0, BindGroupEntry::Texture(object_diffuse)),
                (1, BindGroupEntry::Texture(object_specular)),
                (2, BindGroupEntry::Sampler(sampler)),
            ],
        )?;
        let floor_material = backend.create_bind_group(
            material_layout,
            &[
                (0, BindGroupEntry::Texture(floor_diffuse)),
                (1, BindGroupEntry::Texture(floor_specular)),
                (2, BindGroupEntry::Sampler(sampler)),
            ],
        )?;

        // One uniform buffer per instance; model matrices never change after startup
        let mut instance = |label: String, uniform: ObjectUniform| -> RendererResult<Instance> {
            let buffer = backend.create_buffer_init(
                &BufferDescriptor {
                    label: Some(label),
                    size: std::mem::size_of::<ObjectUniform>() as u64,
                    usage: BufferUsage::UNIFORM,
                    mapped_at_creation: false,
                },
                bytemuck::bytes_of(&uniform),
            )?;
            let bind_group =
                backend.create_bind_group(object_layout, &[(0, BindGroupEntry::buffer(buffer))])?;
            Ok(Instance { bind_group })
        };
        let objects = ctx
            .scene
            .objects
            .iter()
            .enumerate()
            .map(|(i, t)| instance(format!("Object {} Uniforms", i), t.uniform_data()))
            .collect::<RendererResult<Vec<_>>>()?;
        let floor = ctx
            .scene
            .floor
            .as_ref()
            .map(|t| instance("Floor Uniforms".into(), t.uniform_data()))
            .transpose()?;

        let cube = GpuMesh::upload(backend, &Mesh::cube())?;
        let floor_mesh = GpuMesh::upload(backend, &Mesh::floor())?;

        log::debug!(
            "Geometry pass ready: {} objects, floor: {}",
            objects.len(),
            floor.is_some()
        );

        Ok(GeometryGpu {
            pipeline,
            frame_buffer,
            frame_bind_group,
            cube,
            floor_mesh,
            object_material,
            floor_material,
            objects,
            floor,
        })
    }
}

impl Default for GBufferPass {
    fn default() -> Self {
        Self::new(SurfaceTextures::default())
    }
}

impl RenderPass for GBufferPass {
    fn name(&self) -> &str {
        "Geometry Pass"
    }

    fn pass_type(&self) -> PassType {
        PassType::Graphics
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) -> RendererResult<()> {
        let targets = Targets {
            position: ctx.resource(GBUFFER_POSITION)?,
            normal: ctx.resource(GBUFFER_NORMAL)?,
            albedo_spec: ctx.resource(GBUFFER_ALBEDO_SPEC)?,
            depth: ctx.resource(GBUFFER_DEPTH)?,
        };
        ctx.write(targets.position, ResourceUsage::RenderTarget);
        ctx.write(targets.normal, ResourceUsage::RenderTarget);
        ctx.write(targets.albedo_spec, ResourceUsage::RenderTarget);
        ctx.write(targets.depth, ResourceUsage::DepthStencilWrite);
        self.targets = Some(targets);
        Ok(())
    }

    fn prepare(&mut self, ctx: &mut PassPrepareContext) -> RendererResult<()> {
        // Attachments are looked up per frame, so a resize needs no rebuild
        if self.gpu.is_none() {
            self.gpu = Some(self.create_gpu(ctx)?);
        }
        Ok(())
    }

    fn execute(&self, ctx: &mut PassExecuteContext) -> RendererResult<()> {
        let (Some(targets), Some(gpu)) = (self.targets, self.gpu.as_ref()) else {
            return Err(RendererError::MissingResource(
                "geometry pass executed before prepare".into(),
            ));
        };

        let color_attachment = |view| ColorAttachment {
            view,
            resolve_target: None,
            load_op: LoadOp::Clear([0.0, 0.0, 0.0, 0.0]),
            store_op: StoreOp::Store,
        };
        let color_attachments = vec![
            color_attachment(ctx.resources.texture_view(targets.position)?),
            color_attachment(ctx.resources.texture_view(targets.normal)?),
            color_attachment(ctx.resources.texture_view(targets.albedo_spec)?),
        ];
        let depth_view = ctx.resources.texture_view(targets.depth)?;

        let uniform = GeometryFrameUniform {
            camera: ctx.frame.camera,
            render_mode: ctx.frame.settings.gbuffer_mode.shader_index(),
            _padding: [0; 3],
        };
        ctx.backend
            .write_buffer(gpu.frame_buffer, 0, bytemuck::bytes_of(&uniform));

        let backend = &mut *ctx.backend;
        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("Geometry Pass".into()),
            color_attachments,
            depth_stencil_attachment: Some(DepthStencilAttachment {
                view: depth_view,
                depth_load_op: LoadOp::Clear([1.0, 0.0, 0.0, 0.0]),
                depth_store_op: StoreOp::Store,
                depth_clear_value: 1.0,
            }),
        });
        backend.set_viewport(0.0, 0.0, ctx.width as f32, ctx.height as f32, 0.0, 1.0);
        backend.set_render_pipeline(gpu.pipeline);
        backend.set_bind_group(0, gpu.frame_bind_group);

        backend.set_bind_group(2, gpu.object_material);
        for object in &gpu.objects {
            backend.set_bind_group(1, object.bind_group);
            gpu.cube.draw(backend);
        }

        if let Some(floor) = gpu.floor {
            backend.set_bind_group(2, gpu.floor_material);
            backend.set_bind_group(1, floor.bind_group);
            gpu.floor_mesh.draw(backend);
        }

        backend.end_render_pass();
        Ok(())
    }
}

/// G-Buffer generation shader
pub const GBUFFER_SHADER: &str = r#"
struct FrameUniforms {
    view: mat4x4<f32>,
    proj: mat4x4<f32>,
    view_proj: mat4x4<f32>,
    camera_position: vec4<f32>,
    // 0 texture, 1 position, 2 normals, 3 albedo, 4 specular
    render_mode: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
}

struct ObjectUniforms {
    model: mat4x4<f32>,
    normal_matrix: mat4x4<f32>,
}

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
}

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) world_position: vec3<f32>,
    @location(1) world_normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
}

struct GBufferOutput {
    @location(0) position: vec4<f32>,
    @location(1) normal: vec4<f32>,
    @location(2) albedo_spec: vec4<f32>,
}

@group(0) @binding(0) var<uniform> frame: FrameUniforms;
@group(1) @binding(0) var<uniform> instance_data: ObjectUniforms;
@group(2) @binding(0) var diffuse_map: texture_2d<f32>;
@group(2) @binding(1) var specular_map: texture_2d<f32>;
@group(2) @binding(2) var surface_sampler: sampler;

@vertex
fn vs_main(input: VertexInput) -> VertexOutput {
    var output: VertexOutput;
    let world_pos = instance_data.model * vec4<f32>(input.position, 1.0);
    output.world_position = world_pos.xyz;
    output.clip_position = frame.view_proj * world_pos;
    output.world_normal = (instance_data.normal_matrix * vec4<f32>(input.normal, 0.0)).xyz;
    output.uv = input.uv;
    return output;
}

@fragment
fn fs_main(input: VertexOutput) -> GBufferOutput {
    var output: GBufferOutput;
    let normal = normalize(input.world_normal);
    let diffuse = textureSample(diffuse_map, surface_sampler, input.uv).rgb;
    let specular = textureSample(specular_map, surface_sampler, input.uv).r;

    // w = 1 marks the pixel as covered
    output.position = vec4<f32>(input.world_position, 1.0);
    output.normal = vec4<f32>(normal, 0.0);

    switch frame.render_mode {
        case 1u: {
            output.albedo_spec = vec4<f32>(input.world_position, specular);
        }
        case 2u: {
            output.albedo_spec = vec4<f32>(normal * 0.5 + 0.5, specular);
        }
        case 3u: {
            output.albedo_spec = vec4<f32>(diffuse, 0.0);
        }
        case 4u: {
            output.albedo_spec = vec4<f32>(vec3<f32>(specular), specular);
        }
        default: {
            output.albedo_spec = vec4<f32>(diffuse, specular);
        }
    }
    return output;
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::shader_tests::validate_wgsl;

    #[test]
    fn frame_uniform_matches_wgsl_layout() {
        assert_eq!(std::mem::size_of::<GeometryFrameUniform>(), 224);
        assert_eq!(std::mem::offset_of!(GeometryFrameUniform, render_mode), 208);
    }

    #[test]
    fn shader_is_valid_wgsl() {
        let module = validate_wgsl(GBUFFER_SHADER);
        let names: Vec<_> = module.entry_points.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["vs_main", "fs_main"]);
    }
}
