//! Virtual resources for the render graph

use std::collections::HashMap;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::engine::{RendererError, RendererResult};

/// Unique identifier for a render graph resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub(crate) u32);

/// Texture owned and allocated by the graph executor
#[derive(Debug, Clone)]
pub struct VirtualTexture {
    pub id: ResourceId,
    pub name: String,
    pub size: TextureSize,
    pub format: TextureFormat,
    pub usage: TextureUsage,
}

impl VirtualTexture {
    pub fn descriptor(&self, screen_width: u32, screen_height: u32) -> TextureDescriptor {
        let (width, height) = self.size.resolve(screen_width, screen_height);
        TextureDescriptor {
            label: Some(self.name.clone()),
            width,
            height,
            array_layers: 1,
            mip_levels: 1,
            format: self.format,
            usage: self.usage,
        }
    }
}

/// Resource type enumeration
#[derive(Debug, Clone)]
pub enum VirtualResource {
    Texture(VirtualTexture),
    /// Created outside the graph (swapchain, G-buffer, scene buffer) and bound by name
    External { id: ResourceId, name: String },
}

impl VirtualResource {
    pub fn id(&self) -> ResourceId {
        match self {
            VirtualResource::Texture(t) => t.id,
            VirtualResource::External { id, .. } => *id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            VirtualResource::Texture(t) => &t.name,
            VirtualResource::External { name, .. } => name,
        }
    }
}

/// How a pass uses a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceUsage {
    /// Read as a texture (sampled or loaded)
    TextureRead,
    /// Write as a render target
    RenderTarget,
    /// Load and write as a render target
    RenderTargetLoad,
    /// Write-only storage texture
    StorageWrite,
    /// Depth attachment, cleared or fully overwritten
    DepthStencilWrite,
    /// Depth attachment, loaded and tested against
    DepthStencilReadWrite,
    /// Read as uniform buffer
    UniformBuffer,
    /// Read-only storage buffer
    StorageBufferRead,
}

/// Resource access declaration for a pass
#[derive(Debug, Clone)]
pub struct ResourceAccess {
    pub resource: ResourceId,
    pub usage: ResourceUsage,
}

impl ResourceAccess {
    pub fn is_read(&self) -> bool {
        matches!(
            self.usage,
            ResourceUsage::TextureRead
                | ResourceUsage::RenderTargetLoad
                | ResourceUsage::DepthStencilReadWrite
                | ResourceUsage::UniformBuffer
                | ResourceUsage::StorageBufferRead
        )
    }

    pub fn is_write(&self) -> bool {
        matches!(
            self.usage,
            ResourceUsage::RenderTarget
                | ResourceUsage::RenderTargetLoad
                | ResourceUsage::StorageWrite
                | ResourceUsage::DepthStencilWrite
                | ResourceUsage::DepthStencilReadWrite
        )
    }
}

/// Describes texture dimensions that can be relative to screen size
#[derive(Debug, Clone, Copy)]
pub enum TextureSize {
    /// Absolute size in pixels
    Absolute { width: u32, height: u32 },
    /// Relative to screen size (1.0 = full screen)
    Relative { width_scale: f32, height_scale: f32 },
}

impl Default for TextureSize {
    fn default() -> Self {
        TextureSize::Relative {
            width_scale: 1.0,
            height_scale: 1.0,
        }
    }
}

impl TextureSize {
    pub fn resolve(&self, screen_width: u32, screen_height: u32) -> (u32, u32) {
        match self {
            TextureSize::Absolute { width, height } => (*width, *height),
            TextureSize::Relative {
                width_scale,
                height_scale,
            } => (
                (((screen_width as f32) * width_scale) as u32).max(1),
                (((screen_height as f32) * height_scale) as u32).max(1),
            ),
        }
    }
}

/// Concrete GPU objects bound to graph resources
#[derive(Debug, Default)]
pub struct ResourceTable {
    pub(crate) textures: HashMap<ResourceId, TextureHandle>,
    pub(crate) views: HashMap<ResourceId, TextureViewHandle>,
    pub(crate) layer_views: HashMap<ResourceId, Vec<TextureViewHandle>>,
    pub(crate) buffers: HashMap<ResourceId, BufferHandle>,
    pub(crate) names: HashMap<ResourceId, String>,
}

impl ResourceTable {
    fn missing(&self, resource: ResourceId, what: &str) -> RendererError {
        let name = self
            .names
            .get(&resource)
            .cloned()
            .unwrap_or_else(|| format!("#{}", resource.0));
        RendererError::MissingResource(format!("{} ({})", name, what))
    }

    /// Default view of a texture resource
    pub fn texture_view(&self, resource: ResourceId) -> RendererResult<TextureViewHandle> {
        self.views
            .get(&resource)
            .copied()
            .ok_or_else(|| self.missing(resource, "texture view"))
    }

    /// Single-layer view of an array texture resource
    pub fn layer_view(&self, resource: ResourceId, layer: usize) -> RendererResult<TextureViewHandle> {
        self.layer_views
            .get(&resource)
            .and_then(|views| views.get(layer))
            .copied()
            .ok_or_else(|| self.missing(resource, "layer view"))
    }

    pub fn buffer(&self, resource: ResourceId) -> RendererResult<BufferHandle> {
        self.buffers
            .get(&resource)
            .copied()
            .ok_or_else(|| self.missing(resource, "buffer"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_modify_write_usages_are_both() {
        for usage in [ResourceUsage::RenderTargetLoad, ResourceUsage::DepthStencilReadWrite] {
            let access = ResourceAccess {
                resource: ResourceId(0),
                usage,
            };
            assert!(access.is_read() && access.is_write());
        }
        let write = ResourceAccess {
            resource: ResourceId(0),
            usage: ResourceUsage::StorageWrite,
        };
        assert!(write.is_write() && !write.is_read());
    }

    #[test]
    fn relative_size_never_collapses_to_zero() {
        let size = TextureSize::Relative {
            width_scale: 0.25,
            height_scale: 0.25,
        };
        assert_eq!(size.resolve(2, 2), (1, 1));
        assert_eq!(TextureSize::default().resolve(640, 480), (640, 480));
    }

    #[test]
    fn missing_resource_names_the_resource() {
        let mut table = ResourceTable::default();
        table.names.insert(ResourceId(3), "shadow_array".into());
        let err = table.layer_view(ResourceId(3), 0).unwrap_err();
        assert!(err.to_string().contains("shadow_array"));
    }
}
