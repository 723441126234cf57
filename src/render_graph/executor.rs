//! Render graph executor

use std::collections::HashMap;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::engine::RendererResult;
use crate::render_graph::graph::*;
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;
use crate::scene::Scene;

/// Binds concrete GPU objects to graph resources and runs the compiled pass order
pub struct RenderGraphExecutor {
    /// Graph-owned textures mapped by resource ID
    allocated_textures: HashMap<ResourceId, TextureHandle>,
    resources: ResourceTable,
}

impl RenderGraphExecutor {
    pub fn new() -> Self {
        Self {
            allocated_textures: HashMap::new(),
            resources: ResourceTable::default(),
        }
    }

    /// Bind an external texture and its default view
    pub fn set_external_texture(
        &mut self,
        resource: ResourceId,
        texture: TextureHandle,
        view: TextureViewHandle,
    ) {
        self.resources.textures.insert(resource, texture);
        self.resources.views.insert(resource, view);
    }

    /// Bind an external view only (e.g., the swapchain image of this frame)
    pub fn set_external_view(&mut self, resource: ResourceId, view: TextureViewHandle) {
        self.resources.views.insert(resource, view);
    }

    /// Bind per-layer views of an external array texture
    pub fn set_external_layers(&mut self, resource: ResourceId, layers: Vec<TextureViewHandle>) {
        self.resources.layer_views.insert(resource, layers);
    }

    pub fn set_external_buffer(&mut self, resource: ResourceId, buffer: BufferHandle) {
        self.resources.buffers.insert(resource, buffer);
    }

    pub fn resources(&self) -> &ResourceTable {
        &self.resources
    }

    /// Allocate graph-owned textures at the given screen size, replacing earlier allocations.
    pub fn allocate_resources(
        &mut self,
        graph: &RenderGraph,
        backend: &mut dyn GraphicsBackend,
        width: u32,
        height: u32,
    ) -> RendererResult<()> {
        self.release_owned(backend);

        for resource in graph.resources() {
            self.resources
                .names
                .insert(resource.id(), resource.name().to_string());

            if let VirtualResource::Texture(tex) = resource {
                let handle = backend.create_texture(&tex.descriptor(width, height))?;
                let view = backend.create_texture_view(handle, &TextureViewDescriptor::default())?;
                self.allocated_textures.insert(tex.id, handle);
                self.resources.textures.insert(tex.id, handle);
                self.resources.views.insert(tex.id, view);
                log::debug!("Render graph: allocated '{}' at {}x{}", tex.name, width, height);
            }
        }

        Ok(())
    }

    /// Let every pass build pipelines and bind groups against the bound resources.
    pub fn prepare(
        &self,
        graph: &mut RenderGraph,
        backend: &mut dyn GraphicsBackend,
        scene: &Scene,
        width: u32,
        height: u32,
    ) -> RendererResult<()> {
        for pass in graph.passes_mut() {
            let mut ctx = PassPrepareContext {
                backend: &mut *backend,
                scene,
                resources: &self.resources,
                width,
                height,
            };
            pass.prepare(&mut ctx)?;
        }
        Ok(())
    }

    /// Execute the render graph
    #[allow(clippy::too_many_arguments)]
    pub fn execute(
        &self,
        graph: &RenderGraph,
        compiled: &CompiledGraph,
        backend: &mut dyn GraphicsBackend,
        scene: &Scene,
        frame: &FrameInputs,
        width: u32,
        height: u32,
    ) -> RendererResult<()> {
        for (&pass_id, &barrier) in compiled.pass_order.iter().zip(&compiled.barrier_after) {
            let Some(pass) = graph.get_pass(pass_id) else {
                continue;
            };

            let mut ctx = PassExecuteContext {
                backend: &mut *backend,
                scene,
                frame,
                resources: &self.resources,
                width,
                height,
            };
            pass.execute(&mut ctx)?;

            if barrier {
                backend.memory_barrier();
            }
        }
        Ok(())
    }

    fn release_owned(&mut self, backend: &mut dyn GraphicsBackend) {
        for (id, handle) in self.allocated_textures.drain() {
            backend.destroy_texture(handle);
            self.resources.textures.remove(&id);
            self.resources.views.remove(&id);
        }
    }

    /// Clean up allocated resources
    pub fn cleanup(&mut self, backend: &mut dyn GraphicsBackend) {
        self.release_owned(backend);
        self.resources = ResourceTable::default();
    }
}

impl Default for RenderGraphExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::recording::{RecordedCommand, RecordingBackend};
    use crate::engine::RendererError;
    use crate::settings::RenderSettings;

    /// Opens and closes a labelled compute pass
    struct Marker {
        name: &'static str,
        target: &'static str,
        id: Option<ResourceId>,
    }

    impl Marker {
        fn new(name: &'static str, target: &'static str) -> Self {
            Self { name, target, id: None }
        }
    }

    impl RenderPass for Marker {
        fn name(&self) -> &str {
            self.name
        }

        fn pass_type(&self) -> PassType {
            PassType::Compute
        }

        fn setup(&mut self, ctx: &mut PassSetupContext) -> RendererResult<()> {
            let target = ctx.resource(self.target)?;
            ctx.write(target, ResourceUsage::StorageWrite);
            self.id = Some(target);
            Ok(())
        }

        fn prepare(&mut self, ctx: &mut PassPrepareContext) -> RendererResult<()> {
            if let Some(id) = self.id {
                ctx.resources.texture_view(id)?;
            }
            Ok(())
        }

        fn execute(&self, ctx: &mut PassExecuteContext) -> RendererResult<()> {
            ctx.backend.begin_compute_pass(Some(self.name));
            ctx.backend.end_compute_pass();
            Ok(())
        }
    }

    #[test]
    fn barriers_follow_shared_writers() {
        let mut backend = RecordingBackend::headless(8, 8);
        let mut graph = RenderGraph::new();
        let shared = graph.import("shared");
        graph.add_pass(Marker::new("one", "shared")).unwrap();
        graph.add_pass(Marker::new("two", "shared")).unwrap();
        let compiled = graph.compile().unwrap();

        let mut executor = RenderGraphExecutor::new();
        executor.allocate_resources(&graph, &mut backend, 8, 8).unwrap();
        let texture = backend.create_texture(&TextureDescriptor::default()).unwrap();
        let view = backend
            .create_texture_view(texture, &TextureViewDescriptor::default())
            .unwrap();
        executor.set_external_texture(shared, texture, view);
        executor
            .prepare(&mut graph, &mut backend, &Scene::new(), 8, 8)
            .unwrap();

        let settings = RenderSettings::new(8, 8);
        let frame = FrameInputs {
            camera: crate::scene::Camera::default().uniform_data(),
            settings: &settings,
        };
        executor
            .execute(&graph, &compiled, &mut backend, &Scene::new(), &frame, 8, 8)
            .unwrap();

        assert_eq!(
            backend.commands(),
            &[
                RecordedCommand::BeginComputePass { label: Some("one".into()) },
                RecordedCommand::EndComputePass,
                RecordedCommand::MemoryBarrier,
                RecordedCommand::BeginComputePass { label: Some("two".into()) },
                RecordedCommand::EndComputePass,
            ]
        );
    }

    #[test]
    fn unbound_external_is_reported_by_name() {
        let mut backend = RecordingBackend::headless(8, 8);
        let mut graph = RenderGraph::new();
        graph.import("never_bound");
        graph.add_pass(Marker::new("one", "never_bound")).unwrap();

        let mut executor = RenderGraphExecutor::new();
        executor.allocate_resources(&graph, &mut backend, 8, 8).unwrap();
        let err = executor
            .prepare(&mut graph, &mut backend, &Scene::new(), 8, 8)
            .unwrap_err();
        assert!(matches!(err, RendererError::MissingResource(ref msg) if msg.contains("never_bound")));
    }

    #[test]
    fn reallocation_replaces_owned_textures() {
        struct Owner;
        impl RenderPass for Owner {
            fn name(&self) -> &str {
                "owner"
            }
            fn pass_type(&self) -> PassType {
                PassType::Graphics
            }
            fn setup(&mut self, ctx: &mut PassSetupContext) -> RendererResult<()> {
                let id = ctx.create_texture(
                    "scratch",
                    TextureSize::default(),
                    TextureFormat::Depth32Float,
                    TextureUsage::RENDER_ATTACHMENT,
                );
                ctx.write(id, ResourceUsage::DepthStencilWrite);
                Ok(())
            }
            fn prepare(&mut self, _ctx: &mut PassPrepareContext) -> RendererResult<()> {
                Ok(())
            }
            fn execute(&self, _ctx: &mut PassExecuteContext) -> RendererResult<()> {
                Ok(())
            }
        }

        let mut backend = RecordingBackend::headless(8, 8);
        let mut graph = RenderGraph::new();
        graph.add_pass(Owner).unwrap();
        let scratch = graph.resource_id("scratch").unwrap();

        let mut executor = RenderGraphExecutor::new();
        executor.allocate_resources(&graph, &mut backend, 8, 8).unwrap();
        executor.allocate_resources(&graph, &mut backend, 20, 10).unwrap();
        assert_eq!(backend.live_texture_count(), 1);

        let texture = executor.resources().textures[&scratch];
        let desc = backend.texture_descriptor(texture).unwrap();
        assert_eq!((desc.width, desc.height), (20, 10));

        executor.cleanup(&mut backend);
        assert_eq!(backend.live_texture_count(), 0);
    }
}
