//! Main renderer orchestrator
//!
//! Owns the backend, the frame resources the graph imports (G-buffer, shadow array, scene
//! triangle buffer) and the compiled hybrid render graph.

use thiserror::Error;

use crate::backend::traits::*;
use crate::pipeline::{
    build_hybrid_graph, GBUFFER_ALBEDO_SPEC, GBUFFER_DEPTH, GBUFFER_NORMAL, GBUFFER_POSITION,
    SCENE_TRIANGLES, SHADOW_ARRAY, SWAPCHAIN,
};
use crate::render_graph::{CompiledGraph, FrameInputs, RenderGraph, RenderGraphExecutor, ResourceId};
use crate::resources::{GBuffer, SceneBuffer, ShadowArray};
use crate::scene::{Camera, Scene, TriangleIdAllocator};
use crate::settings::RenderSettings;
use crate::EngineConfig;

/// Renderer error type
#[derive(Error, Debug)]
pub enum RendererError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("Framebuffer incomplete: {reason}")]
    FramebufferIncomplete { reason: String },
    #[error("Render graph contains a cycle through: {}", .passes.join(", "))]
    GraphCycle { passes: Vec<String> },
    #[error("Missing render graph resource: {0}")]
    MissingResource(String),
}

pub type RendererResult<T> = Result<T, RendererError>;

/// The hybrid deferred renderer
pub struct Renderer<B: GraphicsBackend + 'static> {
    backend: B,
    config: EngineConfig,
    scene: Scene,
    gbuffer: GBuffer,
    shadows: ShadowArray,
    scene_buffer: SceneBuffer,
    graph: RenderGraph,
    compiled: CompiledGraph,
    executor: RenderGraphExecutor,
    width: u32,
    height: u32,
    /// False when the current frame was skipped because the surface was lost
    frame_active: bool,
}

impl<B: GraphicsBackend + 'static> Renderer<B> {
    /// Build every frame resource, compile the graph and prepare all passes.
    ///
    /// Any failure here is fatal: framebuffer incompleteness, pipeline creation or a
    /// malformed graph.
    pub fn new(mut backend: B, config: EngineConfig, scene: Scene) -> RendererResult<Self> {
        let (width, height) = backend.surface_size();
        let (width, height) = (width.max(1), height.max(1));
        let light_count = scene.lights.len();

        let gbuffer = GBuffer::create(&mut backend, width, height)?;
        let shadows = ShadowArray::create(&mut backend, width, height, light_count as u32)?;

        let mut ids = TriangleIdAllocator::new();
        let triangles = scene.build_triangles(&mut ids);
        let scene_buffer = SceneBuffer::upload(&mut backend, &triangles)?;

        let mut graph = build_hybrid_graph(light_count, &config)?;
        let compiled = graph.compile()?;
        log::info!(
            "Render graph order: {}",
            compiled.pass_names(&graph).join(" -> ")
        );

        let mut executor = RenderGraphExecutor::new();
        executor.allocate_resources(&graph, &mut backend, width, height)?;
        bind_frame_resources(&mut executor, &graph, &gbuffer, &shadows, &scene_buffer)?;
        executor.prepare(&mut graph, &mut backend, &scene, width, height)?;

        log::info!(
            "Renderer ready at {}x{}: {} objects, {} lights, {} triangles",
            width,
            height,
            scene.objects.len(),
            light_count,
            scene_buffer.triangle_count
        );

        Ok(Self {
            backend,
            config,
            scene,
            gbuffer,
            shadows,
            scene_buffer,
            graph,
            compiled,
            executor,
            width,
            height,
            frame_active: false,
        })
    }

    /// Handle window resize. Attachments are recreated and every pass is re-prepared.
    pub fn resize(&mut self, width: u32, height: u32) -> RendererResult<()> {
        if width == 0 || height == 0 {
            return Ok(());
        }
        self.backend.resize(width, height);

        // Get actual surface size (may be clamped by device limits)
        let (width, height) = self.backend.surface_size();
        if width == self.width && height == self.height {
            return Ok(());
        }

        // Both replacements exist before either old set is released
        let gbuffer = GBuffer::create(&mut self.backend, width, height)?;
        let shadows = match ShadowArray::create(
            &mut self.backend,
            width,
            height,
            self.shadows.light_count,
        ) {
            Ok(shadows) => shadows,
            Err(e) => {
                gbuffer.destroy(&mut self.backend);
                return Err(e);
            }
        };
        std::mem::replace(&mut self.gbuffer, gbuffer).destroy(&mut self.backend);
        std::mem::replace(&mut self.shadows, shadows).destroy(&mut self.backend);

        self.executor
            .allocate_resources(&self.graph, &mut self.backend, width, height)?;
        bind_frame_resources(
            &mut self.executor,
            &self.graph,
            &self.gbuffer,
            &self.shadows,
            &self.scene_buffer,
        )?;
        self.executor
            .prepare(&mut self.graph, &mut self.backend, &self.scene, width, height)?;

        self.width = width;
        self.height = height;
        log::debug!("Resized frame resources to {}x{}", width, height);
        Ok(())
    }

    /// Record the whole graph for one frame without presenting.
    ///
    /// Call [`Renderer::end_frame`] afterwards, after any overlay rendering (like egui).
    /// A lost surface skips the frame.
    pub fn render_scene(&mut self, camera: &Camera, settings: &RenderSettings) -> RendererResult<()> {
        let frame = match self.backend.begin_frame() {
            Ok(frame) => frame,
            Err(BackendError::SurfaceLost) => {
                log::warn!("Surface lost, skipping frame");
                self.frame_active = false;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        self.frame_active = true;

        let swapchain = self.external(SWAPCHAIN)?;
        self.executor.set_external_view(swapchain, frame.swapchain_view);

        let inputs = FrameInputs {
            camera: camera.uniform_data(),
            settings,
        };
        self.executor.execute(
            &self.graph,
            &self.compiled,
            &mut self.backend,
            &self.scene,
            &inputs,
            self.width,
            self.height,
        )?;
        log::trace!("Recorded {} passes", self.compiled.pass_order.len());
        Ok(())
    }

    /// Present the frame begun by [`Renderer::render_scene`]
    pub fn end_frame(&mut self) -> RendererResult<()> {
        if !std::mem::take(&mut self.frame_active) {
            return Ok(());
        }
        self.backend.end_frame()?;
        Ok(())
    }

    /// Render and present one frame
    pub fn render(&mut self, camera: &Camera, settings: &RenderSettings) -> RendererResult<()> {
        self.render_scene(camera, settings)?;
        self.end_frame()
    }

    /// Whether a frame is recorded and waiting for [`Renderer::end_frame`]
    pub fn frame_active(&self) -> bool {
        self.frame_active
    }

    fn external(&self, name: &str) -> RendererResult<ResourceId> {
        self.graph
            .resource_id(name)
            .ok_or_else(|| RendererError::MissingResource(name.to_string()))
    }

    /// Pass names in execution order
    pub fn pass_order(&self) -> Vec<&str> {
        self.compiled.pass_names(&self.graph)
    }

    pub fn compiled_graph(&self) -> &CompiledGraph {
        &self.compiled
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn scene_buffer(&self) -> &SceneBuffer {
        &self.scene_buffer
    }

    pub fn gbuffer(&self) -> &GBuffer {
        &self.gbuffer
    }

    pub fn shadow_array(&self) -> &ShadowArray {
        &self.shadows
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Get current dimensions
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Get mutable access to the backend (like egui rendering)
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Release every GPU object the renderer created
    pub fn destroy(mut self) {
        self.executor.cleanup(&mut self.backend);
        self.gbuffer.destroy(&mut self.backend);
        self.shadows.destroy(&mut self.backend);
        self.scene_buffer.destroy(&mut self.backend);
    }
}

/// Bind the renderer-owned resources to the graph's imported names
fn bind_frame_resources(
    executor: &mut RenderGraphExecutor,
    graph: &RenderGraph,
    gbuffer: &GBuffer,
    shadows: &ShadowArray,
    scene_buffer: &SceneBuffer,
) -> RendererResult<()> {
    let id = |name: &str| {
        graph
            .resource_id(name)
            .ok_or_else(|| RendererError::MissingResource(name.to_string()))
    };

    for (name, target) in [
        (GBUFFER_POSITION, &gbuffer.position),
        (GBUFFER_NORMAL, &gbuffer.normal),
        (GBUFFER_ALBEDO_SPEC, &gbuffer.albedo_spec),
        (GBUFFER_DEPTH, &gbuffer.depth),
    ] {
        executor.set_external_texture(id(name)?, target.texture, target.view);
    }

    let shadow_array = id(SHADOW_ARRAY)?;
    executor.set_external_texture(shadow_array, shadows.texture, shadows.array_view);
    executor.set_external_layers(shadow_array, shadows.layer_views.clone());

    executor.set_external_buffer(id(SCENE_TRIANGLES)?, scene_buffer.buffer);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::recording::RecordingBackend;

    fn renderer(lights: usize) -> Renderer<RecordingBackend> {
        let backend = RecordingBackend::headless(64, 48);
        Renderer::new(backend, EngineConfig::default(), Scene::demo(lights, 13)).unwrap()
    }

    #[test]
    fn resize_recreates_attachments_at_new_extent() {
        let mut renderer = renderer(2);
        renderer.resize(128, 96).unwrap();
        assert_eq!(renderer.dimensions(), (128, 96));
        assert_eq!(renderer.gbuffer().width, 128);
        assert_eq!(renderer.shadow_array().height, 96);
        renderer.gbuffer().validate().unwrap();
    }

    #[test]
    fn failed_resize_keeps_previous_attachments() {
        let mut renderer = renderer(4);
        let textures = renderer.backend().live_texture_count();
        let old_position = renderer.gbuffer().position.texture;

        // Room for a new G-buffer but not for a new four-layer shadow array
        let (width, height) = (128u64, 96u64);
        let budget = renderer.backend().live_texels() + 5 * width * height;
        renderer.backend_mut().set_texel_budget(Some(budget));

        let err = renderer.resize(128, 96).unwrap_err();
        assert!(matches!(err, RendererError::Backend(BackendError::OutOfMemory)));

        assert_eq!(renderer.dimensions(), (64, 48));
        assert_eq!(renderer.gbuffer().width, 64);
        assert_eq!(renderer.shadow_array().width, 64);
        assert_eq!(renderer.backend().live_texture_count(), textures);
        assert!(renderer.backend().texture_descriptor(old_position).is_some());

        renderer.backend_mut().set_texel_budget(None);
        renderer
            .render(&Camera::default(), &RenderSettings::default())
            .unwrap();
        assert_eq!(renderer.backend().frames_presented(), 1);
    }

    #[test]
    fn zero_size_resize_is_ignored() {
        let mut renderer = renderer(1);
        renderer.resize(0, 10).unwrap();
        assert_eq!(renderer.dimensions(), (64, 48));
    }

    #[test]
    fn end_frame_without_render_is_a_no_op() {
        let mut renderer = renderer(1);
        renderer.end_frame().unwrap();
        assert_eq!(renderer.backend().frames_presented(), 0);
    }

    #[test]
    fn cycle_error_names_passes() {
        let err = RendererError::GraphCycle {
            passes: vec!["a".into(), "b".into()],
        };
        assert_eq!(err.to_string(), "Render graph contains a cycle through: a, b");
    }
}
