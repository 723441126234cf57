//! Render pass definitions for the render graph

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::engine::{RendererError, RendererResult};
use crate::render_graph::resource::*;
use crate::scene::Scene;
use crate::settings::RenderSettings;

/// Unique identifier for a render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassId(pub(crate) u32);

/// Context for declaring pass resources
pub struct PassSetupContext<'a> {
    pub(crate) resources: &'a mut Vec<VirtualResource>,
    pub(crate) inputs: &'a mut Vec<ResourceAccess>,
    pub(crate) outputs: &'a mut Vec<ResourceAccess>,
    pub(crate) next_resource_id: &'a mut u32,
}

impl<'a> PassSetupContext<'a> {
    /// Create a graph-owned texture, allocated by the executor
    pub fn create_texture(
        &mut self,
        name: &str,
        size: TextureSize,
        format: TextureFormat,
        usage: TextureUsage,
    ) -> ResourceId {
        let id = ResourceId(*self.next_resource_id);
        *self.next_resource_id += 1;

        self.resources.push(VirtualResource::Texture(VirtualTexture {
            id,
            name: name.to_string(),
            size,
            format,
            usage,
        }));

        id
    }

    /// Look up an imported or previously created resource by name
    pub fn resource(&self, name: &str) -> RendererResult<ResourceId> {
        self.resources
            .iter()
            .find(|r| r.name() == name)
            .map(VirtualResource::id)
            .ok_or_else(|| RendererError::MissingResource(name.to_string()))
    }

    /// Declare that this pass reads from a resource
    pub fn read(&mut self, resource: ResourceId, usage: ResourceUsage) {
        self.inputs.push(ResourceAccess { resource, usage });
    }

    /// Declare that this pass writes to a resource
    pub fn write(&mut self, resource: ResourceId, usage: ResourceUsage) {
        self.outputs.push(ResourceAccess { resource, usage });
    }
}

/// Per-frame values every pass may consume
#[derive(Debug, Clone, Copy)]
pub struct FrameInputs<'a> {
    pub camera: CameraUniform,
    pub settings: &'a RenderSettings,
}

/// Context for creating pipelines and bind groups
///
/// Runs once after the graph's resources are bound and again whenever they are reallocated.
pub struct PassPrepareContext<'a> {
    pub backend: &'a mut dyn GraphicsBackend,
    pub scene: &'a Scene,
    pub resources: &'a ResourceTable,
    pub width: u32,
    pub height: u32,
}

/// Context for executing a render pass
pub struct PassExecuteContext<'a> {
    pub backend: &'a mut dyn GraphicsBackend,
    pub scene: &'a Scene,
    pub frame: &'a FrameInputs<'a>,
    pub resources: &'a ResourceTable,
    pub width: u32,
    pub height: u32,
}

/// Trait for render passes
pub trait RenderPass: Send + Sync {
    /// Get the pass name for debugging
    fn name(&self) -> &str;

    fn pass_type(&self) -> PassType;

    /// Setup phase - declare resources and dependencies
    fn setup(&mut self, ctx: &mut PassSetupContext) -> RendererResult<()>;

    /// Create pipelines and bind groups against the currently bound resources
    fn prepare(&mut self, ctx: &mut PassPrepareContext) -> RendererResult<()>;

    /// Execute phase - record commands
    fn execute(&self, ctx: &mut PassExecuteContext) -> RendererResult<()>;
}

/// Type of render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassType {
    /// Graphics render pass
    Graphics,
    /// Compute pass
    Compute,
}

/// Metadata about a pass in the graph
#[derive(Debug)]
pub struct PassNode {
    pub id: PassId,
    pub name: String,
    pub pass_type: PassType,
    pub inputs: Vec<ResourceAccess>,
    pub outputs: Vec<ResourceAccess>,
}

impl PassNode {
    fn accesses(&self) -> impl Iterator<Item = &ResourceAccess> {
        self.inputs.iter().chain(self.outputs.iter())
    }

    pub fn reads_resource(&self, resource: ResourceId) -> bool {
        self.accesses().any(|a| a.resource == resource && a.is_read())
    }

    pub fn writes_resource(&self, resource: ResourceId) -> bool {
        self.accesses().any(|a| a.resource == resource && a.is_write())
    }

    /// Every resource this pass writes
    pub fn written_resources(&self) -> impl Iterator<Item = ResourceId> + '_ {
        self.accesses().filter(|a| a.is_write()).map(|a| a.resource)
    }
}
