//! Command-recording backend for testing without GPU hardware.
//!
//! Resource creation is validated the way wgpu would validate it, buffer contents are kept in
//! host memory, and every pass-level command is appended to a flat command log that tests can
//! inspect.

use crate::backend::traits::*;
use crate::backend::types::*;
use std::collections::HashMap;
use std::sync::Arc;

/// One command as it was issued through [`GraphicsBackend`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    BeginRenderPass {
        label: Option<String>,
        color_attachments: Vec<TextureViewHandle>,
        depth_attachment: Option<TextureViewHandle>,
    },
    EndRenderPass,
    BeginComputePass {
        label: Option<String>,
    },
    EndComputePass,
    MemoryBarrier,
    SetRenderPipeline(RenderPipelineHandle),
    SetComputePipeline(ComputePipelineHandle),
    SetBindGroup {
        index: u32,
        bind_group: BindGroupHandle,
    },
    SetVertexBuffer {
        slot: u32,
        buffer: BufferHandle,
    },
    SetIndexBuffer {
        buffer: BufferHandle,
        format: IndexFormat,
    },
    SetViewport {
        width: f32,
        height: f32,
    },
    Draw {
        vertices: std::ops::Range<u32>,
        instances: std::ops::Range<u32>,
    },
    DrawIndexed {
        indices: std::ops::Range<u32>,
        base_vertex: i32,
        instances: std::ops::Range<u32>,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    WriteBuffer {
        buffer: BufferHandle,
        offset: u64,
        size: u64,
    },
}

#[derive(Debug)]
struct RecordedBuffer {
    descriptor: BufferDescriptor,
    data: Vec<u8>,
}

#[derive(Debug)]
struct RecordedView {
    texture: TextureHandle,
    descriptor: TextureViewDescriptor,
}

/// Backend that records commands instead of submitting them.
#[derive(Debug)]
pub struct RecordingBackend {
    width: u32,
    height: u32,
    format: TextureFormat,
    buffers: HashMap<u64, RecordedBuffer>,
    textures: HashMap<u64, TextureDescriptor>,
    views: HashMap<u64, RecordedView>,
    layouts: HashMap<u64, Vec<BindGroupLayoutEntry>>,
    bind_groups: HashMap<u64, BindGroupLayoutHandle>,
    render_pipelines: HashMap<u64, Option<String>>,
    compute_pipelines: HashMap<u64, Option<String>>,
    samplers: u64,
    next_id: u64,
    commands: Vec<RecordedCommand>,
    swapchain_view: Option<TextureViewHandle>,
    frames_presented: u64,
    in_render_pass: bool,
    in_compute_pass: bool,
    /// Upper bound on texels across all live textures, standing in for device memory
    texel_budget: Option<u64>,
}

impl RecordingBackend {
    /// Create a backend with a virtual surface of the given size.
    pub fn headless(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            format: TextureFormat::Bgra8UnormSrgb,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            views: HashMap::new(),
            layouts: HashMap::new(),
            bind_groups: HashMap::new(),
            render_pipelines: HashMap::new(),
            compute_pipelines: HashMap::new(),
            samplers: 0,
            next_id: 1,
            commands: Vec::new(),
            swapchain_view: None,
            frames_presented: 0,
            in_render_pass: false,
            in_compute_pass: false,
            texel_budget: None,
        }
    }

    /// Fail texture creation with [`BackendError::OutOfMemory`] once live textures would hold
    /// more than `texels` texels.
    pub fn set_texel_budget(&mut self, texels: Option<u64>) {
        self.texel_budget = texels;
    }

    /// Texels held by every live texture
    pub fn live_texels(&self) -> u64 {
        self.textures.values().map(texel_count).sum()
    }

    fn next_handle(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Every command recorded since creation or the last [`Self::clear_commands`].
    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    /// Labels of the compute passes in recording order.
    pub fn compute_pass_labels(&self) -> Vec<String> {
        self.commands
            .iter()
            .filter_map(|cmd| match cmd {
                RecordedCommand::BeginComputePass { label } => {
                    Some(label.clone().unwrap_or_default())
                }
                _ => None,
            })
            .collect()
    }

    /// Labels of the render passes in recording order.
    pub fn render_pass_labels(&self) -> Vec<String> {
        self.commands
            .iter()
            .filter_map(|cmd| match cmd {
                RecordedCommand::BeginRenderPass { label, .. } => {
                    Some(label.clone().unwrap_or_default())
                }
                _ => None,
            })
            .collect()
    }

    pub fn dispatch_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|cmd| matches!(cmd, RecordedCommand::Dispatch { .. }))
            .count()
    }

    /// Host copy of a buffer's current contents.
    pub fn buffer_data(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(&buffer.0).map(|b| b.data.as_slice())
    }

    pub fn buffer_descriptor(&self, buffer: BufferHandle) -> Option<&BufferDescriptor> {
        self.buffers.get(&buffer.0).map(|b| &b.descriptor)
    }

    pub fn texture_descriptor(&self, texture: TextureHandle) -> Option<&TextureDescriptor> {
        self.textures.get(&texture.0)
    }

    /// The texture a view was created from, together with the view's descriptor.
    pub fn view_descriptor(
        &self,
        view: TextureViewHandle,
    ) -> Option<(TextureHandle, &TextureViewDescriptor)> {
        self.views.get(&view.0).map(|v| (v.texture, &v.descriptor))
    }

    pub fn live_texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn live_view_count(&self) -> usize {
        self.views.len()
    }

    pub fn live_bind_group_count(&self) -> usize {
        self.bind_groups.len()
    }

    pub fn compute_pipeline_count(&self) -> usize {
        self.compute_pipelines.len()
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    fn check_view(&self, view: TextureViewHandle) -> BackendResult<&RecordedView> {
        if Some(view) == self.swapchain_view {
            return Err(BackendError::InvalidHandle(
                "swapchain view cannot be bound to a bind group".into(),
            ));
        }
        self.views
            .get(&view.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("{:?}", view)))
    }
}

impl GraphicsBackend for RecordingBackend {
    fn new(window: Arc<winit::window::Window>, _vsync: bool) -> BackendResult<Self> {
        let size = window.inner_size();
        Ok(Self::headless(size.width, size.height))
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.width = width;
            self.height = height;
        }
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn begin_frame(&mut self) -> BackendResult<FrameContext> {
        let view = TextureViewHandle(self.next_handle());
        self.swapchain_view = Some(view);
        log::trace!("RecordingBackend: begin frame {}", self.frames_presented);
        Ok(FrameContext {
            swapchain_view: view,
            width: self.width,
            height: self.height,
        })
    }

    fn end_frame(&mut self) -> BackendResult<()> {
        self.swapchain_view = None;
        self.frames_presented += 1;
        Ok(())
    }

    fn swapchain_format(&self) -> TextureFormat {
        self.format
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        log::trace!(
            "RecordingBackend: creating buffer {:?} (size: {})",
            desc.label,
            desc.size
        );
        let id = self.next_handle();
        self.buffers.insert(
            id,
            RecordedBuffer {
                descriptor: desc.clone(),
                data: vec![0; desc.size as usize],
            },
        );
        Ok(BufferHandle(id))
    }

    fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle> {
        if data.is_empty() {
            return Err(BackendError::BufferCreationFailed(format!(
                "{}: empty initial contents",
                desc.label.as_deref().unwrap_or("buffer")
            )));
        }
        let id = self.next_handle();
        let mut descriptor = desc.clone();
        descriptor.size = data.len() as u64;
        self.buffers.insert(
            id,
            RecordedBuffer {
                descriptor,
                data: data.to_vec(),
            },
        );
        Ok(BufferHandle(id))
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        let Some(buf) = self.buffers.get_mut(&buffer.0) else {
            log::warn!("RecordingBackend: write to unknown buffer {:?}", buffer);
            return;
        };
        let start = offset as usize;
        let end = start + data.len();
        if end > buf.data.len() {
            log::warn!(
                "RecordingBackend: write of {} bytes at {} overflows {:?}",
                data.len(),
                offset,
                buf.descriptor.label
            );
            return;
        }
        buf.data[start..end].copy_from_slice(data);
        self.commands.push(RecordedCommand::WriteBuffer {
            buffer,
            offset,
            size: data.len() as u64,
        });
    }

    fn read_buffer(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        size: u64,
    ) -> BackendResult<Vec<u8>> {
        let buf = self
            .buffers
            .get(&buffer.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("{:?}", buffer)))?;
        if !buf.descriptor.usage.contains(BufferUsage::COPY_SRC) {
            return Err(BackendError::ReadbackFailed(
                "buffer was not created with COPY_SRC".into(),
            ));
        }
        let start = offset as usize;
        let end = start + size as usize;
        buf.data
            .get(start..end)
            .map(|bytes| bytes.to_vec())
            .ok_or_else(|| BackendError::ReadbackFailed("range out of bounds".into()))
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        if desc.width == 0 || desc.height == 0 || desc.array_layers == 0 {
            return Err(BackendError::TextureCreationFailed(format!(
                "{}: zero extent {}x{}x{}",
                desc.label.as_deref().unwrap_or("texture"),
                desc.width,
                desc.height,
                desc.array_layers
            )));
        }
        log::trace!(
            "RecordingBackend: creating texture {:?} ({}x{}x{})",
            desc.label,
            desc.width,
            desc.height,
            desc.array_layers
        );
        if let Some(budget) = self.texel_budget {
            if self.live_texels() + texel_count(desc) > budget {
                log::warn!("RecordingBackend: texture {:?} exceeds texel budget", desc.label);
                return Err(BackendError::OutOfMemory);
            }
        }
        let id = self.next_handle();
        self.textures.insert(id, desc.clone());
        Ok(TextureHandle(id))
    }

    fn create_texture_view(
        &mut self,
        texture: TextureHandle,
        desc: &TextureViewDescriptor,
    ) -> BackendResult<TextureViewHandle> {
        let tex = self
            .textures
            .get(&texture.0)
            .ok_or_else(|| BackendError::TextureCreationFailed("Texture not found".into()))?;
        let count = desc
            .array_layer_count
            .unwrap_or(tex.array_layers.saturating_sub(desc.base_array_layer));
        if count == 0 || desc.base_array_layer + count > tex.array_layers {
            return Err(BackendError::TextureCreationFailed(format!(
                "view layers {}..{} outside of {} layers",
                desc.base_array_layer,
                desc.base_array_layer + count,
                tex.array_layers
            )));
        }
        let id = self.next_handle();
        self.views.insert(
            id,
            RecordedView {
                texture,
                descriptor: desc.clone(),
            },
        );
        Ok(TextureViewHandle(id))
    }

    fn write_texture(&mut self, texture: TextureHandle, data: &[u8], width: u32, height: u32) {
        if !self.textures.contains_key(&texture.0) {
            log::warn!("RecordingBackend: write to unknown texture {:?}", texture);
            return;
        }
        log::trace!(
            "RecordingBackend: texture upload {}x{} ({} bytes)",
            width,
            height,
            data.len()
        );
    }

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        log::trace!("RecordingBackend: creating sampler {:?}", desc.label);
        self.samplers += 1;
        Ok(SamplerHandle(self.next_handle()))
    }

    fn create_bind_group_layout(
        &mut self,
        entries: &[BindGroupLayoutEntry],
    ) -> BackendResult<BindGroupLayoutHandle> {
        let id = self.next_handle();
        self.layouts.insert(id, entries.to_vec());
        Ok(BindGroupLayoutHandle(id))
    }

    fn create_bind_group(
        &mut self,
        layout: BindGroupLayoutHandle,
        entries: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle> {
        let layout_entries = self
            .layouts
            .get(&layout.0)
            .ok_or_else(|| BackendError::PipelineCreationFailed("Layout not found".into()))?;
        if layout_entries.len() != entries.len() {
            return Err(BackendError::PipelineCreationFailed(format!(
                "bind group has {} entries, layout expects {}",
                entries.len(),
                layout_entries.len()
            )));
        }

        for (binding, entry) in entries {
            match entry {
                BindGroupEntry::Buffer { buffer, .. } => {
                    if !self.buffers.contains_key(&buffer.0) {
                        return Err(BackendError::InvalidHandle(format!("{:?}", buffer)));
                    }
                }
                BindGroupEntry::Texture(view) => {
                    let view = self.check_view(*view)?;
                    let usage = self.textures.get(&view.texture.0).map(|t| t.usage);
                    if !usage.is_some_and(|u| u.contains(TextureUsage::TEXTURE_BINDING)) {
                        return Err(BackendError::InvalidHandle(format!(
                            "binding {} needs TEXTURE_BINDING usage",
                            binding
                        )));
                    }
                }
                BindGroupEntry::StorageTexture(view) => {
                    let view = self.check_view(*view)?;
                    let usage = self.textures.get(&view.texture.0).map(|t| t.usage);
                    if !usage.is_some_and(|u| u.contains(TextureUsage::STORAGE_BINDING)) {
                        return Err(BackendError::InvalidHandle(format!(
                            "binding {} needs STORAGE_BINDING usage",
                            binding
                        )));
                    }
                }
                BindGroupEntry::Sampler(_) => {}
            }
        }

        let id = self.next_handle();
        self.bind_groups.insert(id, layout);
        Ok(BindGroupHandle(id))
    }

    fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDescriptor,
    ) -> BackendResult<RenderPipelineHandle> {
        if desc.vertex_shader.is_empty() {
            return Err(BackendError::ShaderCreationFailed("empty shader source".into()));
        }
        let id = self.next_handle();
        self.render_pipelines.insert(id, desc.label.clone());
        Ok(RenderPipelineHandle(id))
    }

    fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDescriptor,
    ) -> BackendResult<ComputePipelineHandle> {
        if desc.shader.is_empty() {
            return Err(BackendError::ShaderCreationFailed("empty shader source".into()));
        }
        let id = self.next_handle();
        self.compute_pipelines.insert(id, desc.label.clone());
        Ok(ComputePipelineHandle(id))
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor) {
        self.in_render_pass = true;
        self.commands.push(RecordedCommand::BeginRenderPass {
            label: desc.label.clone(),
            color_attachments: desc.color_attachments.iter().map(|a| a.view).collect(),
            depth_attachment: desc.depth_stencil_attachment.as_ref().map(|a| a.view),
        });
    }

    fn end_render_pass(&mut self) {
        self.in_render_pass = false;
        self.commands.push(RecordedCommand::EndRenderPass);
    }

    fn begin_compute_pass(&mut self, label: Option<&str>) {
        self.in_compute_pass = true;
        self.commands.push(RecordedCommand::BeginComputePass {
            label: label.map(str::to_string),
        });
    }

    fn end_compute_pass(&mut self) {
        self.in_compute_pass = false;
        self.commands.push(RecordedCommand::EndComputePass);
    }

    fn memory_barrier(&mut self) {
        self.commands.push(RecordedCommand::MemoryBarrier);
    }

    fn set_render_pipeline(&mut self, pipeline: RenderPipelineHandle) {
        if self.in_render_pass {
            self.commands.push(RecordedCommand::SetRenderPipeline(pipeline));
        }
    }

    fn set_compute_pipeline(&mut self, pipeline: ComputePipelineHandle) {
        if self.in_compute_pass {
            self.commands.push(RecordedCommand::SetComputePipeline(pipeline));
        }
    }

    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupHandle) {
        if self.in_render_pass || self.in_compute_pass {
            self.commands.push(RecordedCommand::SetBindGroup { index, bind_group });
        }
    }

    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, _offset: u64) {
        if self.in_render_pass {
            self.commands.push(RecordedCommand::SetVertexBuffer { slot, buffer });
        }
    }

    fn set_index_buffer(&mut self, buffer: BufferHandle, _offset: u64, format: IndexFormat) {
        if self.in_render_pass {
            self.commands.push(RecordedCommand::SetIndexBuffer { buffer, format });
        }
    }

    fn set_viewport(&mut self, _x: f32, _y: f32, width: f32, height: f32, _min_depth: f32, _max_depth: f32) {
        if self.in_render_pass {
            self.commands.push(RecordedCommand::SetViewport { width, height });
        }
    }

    fn draw(&mut self, vertices: std::ops::Range<u32>, instances: std::ops::Range<u32>) {
        if self.in_render_pass {
            self.commands.push(RecordedCommand::Draw { vertices, instances });
        }
    }

    fn draw_indexed(
        &mut self,
        indices: std::ops::Range<u32>,
        base_vertex: i32,
        instances: std::ops::Range<u32>,
    ) {
        if self.in_render_pass {
            self.commands.push(RecordedCommand::DrawIndexed {
                indices,
                base_vertex,
                instances,
            });
        }
    }

    fn dispatch_compute(&mut self, x: u32, y: u32, z: u32) {
        if self.in_compute_pass {
            self.commands.push(RecordedCommand::Dispatch { x, y, z });
        }
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer.0);
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture.0);
        self.views.retain(|_, view| view.texture != texture);
    }

    fn destroy_bind_group(&mut self, bind_group: BindGroupHandle) {
        self.bind_groups.remove(&bind_group.0);
    }
}

fn texel_count(desc: &TextureDescriptor) -> u64 {
    desc.width as u64 * desc.height as u64 * desc.array_layers as u64
}
