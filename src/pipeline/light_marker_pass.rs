//! Light marker overlay
//!
//! Draws a small cube in each light's color at its position, depth-tested against the
//! scene depth the lighting pass transferred.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::engine::{RendererError, RendererResult};
use crate::pipeline::{PRESENT_DEPTH, SWAPCHAIN};
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;
use crate::resources::{GpuMesh, Mesh, DEPTH_FORMAT};
use crate::scene::PointLight;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MarkerUniform {
    pub model: Mat4,
    pub color: Vec4,
}

impl MarkerUniform {
    pub fn new(light: &PointLight, scale: f32) -> Self {
        Self {
            model: Mat4::from_translation(light.position) * Mat4::from_scale(glam::Vec3::splat(scale)),
            color: light.color.extend(1.0),
        }
    }
}

struct MarkerGpu {
    pipeline: RenderPipelineHandle,
    camera_buffer: BufferHandle,
    camera_bind_group: BindGroupHandle,
    cube: GpuMesh,
    markers: Vec<BindGroupHandle>,
}

pub struct LightMarkerPass {
    scale: f32,
    targets: Option<(ResourceId, ResourceId)>,
    gpu: Option<MarkerGpu>,
}

impl LightMarkerPass {
    pub fn new(scale: f32) -> Self {
        Self {
            scale,
            targets: None,
            gpu: None,
        }
    }

    fn create_gpu(&self, ctx: &mut PassPrepareContext) -> RendererResult<MarkerGpu> {
        let backend = &mut *ctx.backend;

        let camera_layout = backend.create_bind_group_layout(&[BindGroupLayoutEntry {
            binding: 0,
            visibility: ShaderStageFlags::VERTEX,
            ty: BindingType::UniformBuffer,
        }])?;
        let marker_layout = backend.create_bind_group_layout(&[BindGroupLayoutEntry {
            binding: 0,
            visibility: ShaderStageFlags::VERTEX_FRAGMENT,
            ty: BindingType::UniformBuffer,
        }])?;

        let pipeline = backend.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("Light Marker Pipeline".into()),
            vertex_shader: LIGHT_MARKER_SHADER.to_string(),
            fragment_shader: Some(LIGHT_MARKER_SHADER.to_string()),
            vertex_layouts: vec![Vertex::layout()],
            bind_group_layouts: vec![camera_layout, marker_layout],
            primitive_topology: PrimitiveTopology::TriangleList,
            front_face: FrontFace::Ccw,
            cull_mode: CullMode::Back,
            depth_stencil: Some(DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: CompareFunction::Less,
            }),
            color_targets: vec![ColorTargetState::opaque(backend.swapchain_format())],
        })?;

        let camera_buffer = backend.create_buffer(&BufferDescriptor {
            label: Some("Light Marker Camera".into()),
            size: std::mem::size_of::<CameraUniform>() as u64,
            usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
            mapped_at_creation: false,
        })?;
        let camera_bind_group = backend
            .create_bind_group(camera_layout, &[(0, BindGroupEntry::buffer(camera_buffer))])?;

        let mut markers = Vec::with_capacity(ctx.scene.lights.len());
        for (i, light) in ctx.scene.lights.iter().enumerate() {
            let uniform = MarkerUniform::new(light, self.scale);
            let buffer = backend.create_buffer_init(
                &BufferDescriptor {
                    label: Some(format!("Light Marker {}", i)),
                    size: std::mem::size_of::<MarkerUniform>() as u64,
                    usage: BufferUsage::UNIFORM,
                    mapped_at_creation: false,
                },
                bytemuck::bytes_of(&uniform),
            )?;
            markers.push(
                backend.create_bind_group(marker_layout, &[(0, BindGroupEntry::buffer(buffer))])?,
            );
        }

        let cube = GpuMesh::upload(backend, &Mesh::cube())?;

        Ok(MarkerGpu {
            pipeline,
            camera_buffer,
            camera_bind_group,
            cube,
            markers,
        })
    }
}

impl RenderPass for LightMarkerPass {
    fn name(&self) -> &str {
        "Light Markers"
    }

    fn pass_type(&self) -> PassType {
        PassType::Graphics
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) -> RendererResult<()> {
        let color = ctx.resource(SWAPCHAIN)?;
        let depth = ctx.resource(PRESENT_DEPTH)?;
        ctx.write(color, ResourceUsage::RenderTargetLoad);
        ctx.write(depth, ResourceUsage::DepthStencilReadWrite);
        self.targets = Some((color, depth));
        Ok(())
    }

    fn prepare(&mut self, ctx: &mut PassPrepareContext) -> RendererResult<()> {
        if self.gpu.is_none() {
            self.gpu = Some(self.create_gpu(ctx)?);
        }
        Ok(())
    }

    fn execute(&self, ctx: &mut PassExecuteContext) -> RendererResult<()> {
        let (Some((color, depth)), Some(gpu)) = (self.targets, self.gpu.as_ref()) else {
            return Err(RendererError::MissingResource(
                "light marker pass executed before prepare".into(),
            ));
        };
        if gpu.markers.is_empty() {
            return Ok(());
        }

        let color_view = ctx.resources.texture_view(color)?;
        let depth_view = ctx.resources.texture_view(depth)?;
        ctx.backend
            .write_buffer(gpu.camera_buffer, 0, bytemuck::bytes_of(&ctx.frame.camera));

        let backend = &mut *ctx.backend;
        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("Light Markers".into()),
            color_attachments: vec![ColorAttachment {
                view: color_view,
                resolve_target: None,
                load_op: LoadOp::Load,
                store_op: StoreOp::Store,
            }],
            depth_stencil_attachment: Some(DepthStencilAttachment {
                view: depth_view,
                depth_load_op: LoadOp::Load,
                depth_store_op: StoreOp::Store,
                depth_clear_value: 1.0,
            }),
        });
        backend.set_viewport(0.0, 0.0, ctx.width as f32, ctx.height as f32, 0.0, 1.0);
        backend.set_render_pipeline(gpu.pipeline);
        backend.set_bind_group(0, gpu.camera_bind_group);
        for &marker in &gpu.markers {
            backend.set_bind_group(1, marker);
            gpu.cube.draw(backend);
        }
        backend.end_render_pass();
        Ok(())
    }
}

pub const LIGHT_MARKER_SHADER: &str = r#"
struct CameraUniforms {
    view: mat4x4<f32>,
    proj: mat4x4<f32>,
    view_proj: mat4x4<f32>,
    position: vec4<f32>,
}

struct MarkerUniforms {
    model: mat4x4<f32>,
    color: vec4<f32>,
}

@group(0) @binding(0) var<uniform> camera: CameraUniforms;
@group(1) @binding(0) var<uniform> marker: MarkerUniforms;

@vertex
fn vs_main(@location(0) position: vec3<f32>) -> @builtin(position) vec4<f32> {
    return camera.view_proj * marker.model * vec4<f32>(position, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return marker.color;
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::shader_tests::validate_wgsl;
    use glam::Vec3;

    #[test]
    fn marker_is_scaled_cube_at_light() {
        let light = PointLight::new(Vec3::new(1.0, 2.0, 3.0), Vec3::new(0.5, 0.6, 0.7));
        let uniform = MarkerUniform::new(&light, 0.125);
        let corner = uniform.model.transform_point3(Vec3::ONE);
        assert!((corner - Vec3::new(1.125, 2.125, 3.125)).length() < 1e-6);
        assert_eq!(uniform.color, Vec4::new(0.5, 0.6, 0.7, 1.0));
    }

    #[test]
    fn shader_is_valid_wgsl() {
        validate_wgsl(LIGHT_MARKER_SHADER);
    }
}
