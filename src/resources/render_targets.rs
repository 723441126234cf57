//! Off-screen render targets: the G-buffer and the shadow result array

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::engine::{RendererError, RendererResult};

/// G-buffer world position (w = coverage flag)
pub const GBUFFER_POSITION_FORMAT: TextureFormat = TextureFormat::Rgba16Float;
/// G-buffer world normal
pub const GBUFFER_NORMAL_FORMAT: TextureFormat = TextureFormat::Rgba16Float;
/// G-buffer albedo (rgb) and specular (a)
pub const GBUFFER_ALBEDO_SPEC_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;
/// Depth format shared by the G-buffer and the presentation depth
pub const DEPTH_FORMAT: TextureFormat = TextureFormat::Depth32Float;
/// One visibility value per pixel and light
pub const SHADOW_FORMAT: TextureFormat = TextureFormat::R32Float;

/// A single-layer texture with its default view
#[derive(Debug, Clone)]
pub struct RenderTarget {
    pub texture: TextureHandle,
    pub view: TextureViewHandle,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub usage: TextureUsage,
}

impl RenderTarget {
    pub fn create(
        backend: &mut dyn GraphicsBackend,
        label: &str,
        width: u32,
        height: u32,
        format: TextureFormat,
        usage: TextureUsage,
    ) -> BackendResult<Self> {
        let texture = backend.create_texture(&TextureDescriptor {
            label: Some(label.to_string()),
            width,
            height,
            array_layers: 1,
            mip_levels: 1,
            format,
            usage,
        })?;
        let view = match backend.create_texture_view(texture, &TextureViewDescriptor::default()) {
            Ok(view) => view,
            Err(e) => {
                backend.destroy_texture(texture);
                return Err(e);
            }
        };

        Ok(Self {
            texture,
            view,
            width,
            height,
            format,
            usage,
        })
    }

    pub fn destroy(&self, backend: &mut dyn GraphicsBackend) {
        backend.destroy_texture(self.texture);
    }
}

/// The geometry buffer written by the geometry pass
#[derive(Debug, Clone)]
pub struct GBuffer {
    pub width: u32,
    pub height: u32,
    pub position: RenderTarget,
    pub normal: RenderTarget,
    pub albedo_spec: RenderTarget,
    pub depth: RenderTarget,
}

impl GBuffer {
    fn attachment_usage() -> TextureUsage {
        TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING
    }

    /// Allocate every attachment and check the set is render-complete.
    pub fn create(backend: &mut dyn GraphicsBackend, width: u32, height: u32) -> RendererResult<Self> {
        if width == 0 || height == 0 {
            return Err(RendererError::FramebufferIncomplete {
                reason: format!("zero extent {}x{}", width, height),
            });
        }

        let layout = [
            ("G-Buffer Position", GBUFFER_POSITION_FORMAT),
            ("G-Buffer Normal", GBUFFER_NORMAL_FORMAT),
            ("G-Buffer Albedo/Specular", GBUFFER_ALBEDO_SPEC_FORMAT),
            ("G-Buffer Depth", DEPTH_FORMAT),
        ];

        let mut targets = Vec::with_capacity(layout.len());
        for (label, format) in layout {
            match RenderTarget::create(backend, label, width, height, format, Self::attachment_usage()) {
                Ok(target) => targets.push(target),
                Err(e) => {
                    for target in &targets {
                        target.destroy(backend);
                    }
                    return Err(e.into());
                }
            }
        }

        let mut targets = targets.into_iter();
        let (Some(position), Some(normal), Some(albedo_spec), Some(depth)) =
            (targets.next(), targets.next(), targets.next(), targets.next())
        else {
            return Err(RendererError::FramebufferIncomplete {
                reason: "missing attachment".into(),
            });
        };

        let gbuffer = Self {
            width,
            height,
            position,
            normal,
            albedo_spec,
            depth,
        };

        if let Err(e) = gbuffer.validate() {
            gbuffer.destroy(backend);
            return Err(e);
        }

        log::debug!("Created G-buffer {}x{}", width, height);
        Ok(gbuffer)
    }

    /// Check every attachment against the layout the geometry pass renders into.
    pub fn validate(&self) -> RendererResult<()> {
        let incomplete = |reason: String| Err(RendererError::FramebufferIncomplete { reason });

        if self.width == 0 || self.height == 0 {
            return incomplete(format!("zero extent {}x{}", self.width, self.height));
        }

        for (name, target) in self.attachments() {
            if target.width != self.width || target.height != self.height {
                return incomplete(format!(
                    "{} is {}x{}, expected {}x{}",
                    name, target.width, target.height, self.width, self.height
                ));
            }
            if !target.usage.contains(Self::attachment_usage()) {
                return incomplete(format!("{} is missing attachment or binding usage", name));
            }
        }

        for (name, target) in self.color_attachments() {
            if !target.format.is_color_renderable() {
                return incomplete(format!("{} format {:?} is not color-renderable", name, target.format));
            }
        }

        if !self.depth.format.is_depth() {
            return incomplete(format!("depth format {:?} is not a depth format", self.depth.format));
        }

        Ok(())
    }

    /// Replace every attachment with a new set at the given size.
    ///
    /// The old set stays intact if the new one cannot be created.
    pub fn resize(&mut self, backend: &mut dyn GraphicsBackend, width: u32, height: u32) -> RendererResult<()> {
        if width == self.width && height == self.height {
            return Ok(());
        }
        let replacement = Self::create(backend, width, height)?;
        let old = std::mem::replace(self, replacement);
        old.destroy(backend);
        Ok(())
    }

    pub fn destroy(&self, backend: &mut dyn GraphicsBackend) {
        for (_, target) in self.attachments() {
            target.destroy(backend);
        }
    }

    fn color_attachments(&self) -> [(&'static str, &RenderTarget); 3] {
        [
            ("position", &self.position),
            ("normal", &self.normal),
            ("albedo_spec", &self.albedo_spec),
        ]
    }

    fn attachments(&self) -> [(&'static str, &RenderTarget); 4] {
        let [position, normal, albedo_spec] = self.color_attachments();
        [position, normal, albedo_spec, ("depth", &self.depth)]
    }
}

/// Per-light visibility layers written by the shadow pass
#[derive(Debug, Clone)]
pub struct ShadowArray {
    pub texture: TextureHandle,
    /// `texture_2d_array` view covering every layer
    pub array_view: TextureViewHandle,
    /// One single-layer storage view per light
    pub layer_views: Vec<TextureViewHandle>,
    pub width: u32,
    pub height: u32,
    pub light_count: u32,
}

impl ShadowArray {
    /// Allocate `max(light_count, 1)` layers. With no lights the single placeholder layer keeps
    /// the composite's binding valid but has no storage view.
    pub fn create(
        backend: &mut dyn GraphicsBackend,
        width: u32,
        height: u32,
        light_count: u32,
    ) -> RendererResult<Self> {
        if width == 0 || height == 0 {
            return Err(RendererError::FramebufferIncomplete {
                reason: format!("shadow array has zero extent {}x{}", width, height),
            });
        }

        let texture = backend.create_texture(&TextureDescriptor {
            label: Some("Shadow Array".into()),
            width,
            height,
            array_layers: light_count.max(1),
            mip_levels: 1,
            format: SHADOW_FORMAT,
            usage: TextureUsage::STORAGE_BINDING | TextureUsage::TEXTURE_BINDING,
        })?;

        let views = Self::create_views(backend, texture, light_count);
        let (array_view, layer_views) = match views {
            Ok(views) => views,
            Err(e) => {
                backend.destroy_texture(texture);
                return Err(e.into());
            }
        };

        log::debug!(
            "Created shadow array {}x{} with {} layer(s)",
            width,
            height,
            light_count.max(1)
        );

        Ok(Self {
            texture,
            array_view,
            layer_views,
            width,
            height,
            light_count,
        })
    }

    fn create_views(
        backend: &mut dyn GraphicsBackend,
        texture: TextureHandle,
        light_count: u32,
    ) -> BackendResult<(TextureViewHandle, Vec<TextureViewHandle>)> {
        let array_view = backend.create_texture_view(texture, &TextureViewDescriptor::array())?;
        let layer_views = (0..light_count)
            .map(|layer| backend.create_texture_view(texture, &TextureViewDescriptor::single_layer(layer)))
            .collect::<BackendResult<Vec<_>>>()?;
        Ok((array_view, layer_views))
    }

    pub fn layer_view(&self, light_index: usize) -> Option<TextureViewHandle> {
        self.layer_views.get(light_index).copied()
    }

    pub fn layer_count(&self) -> u32 {
        self.light_count.max(1)
    }

    pub fn resize(&mut self, backend: &mut dyn GraphicsBackend, width: u32, height: u32) -> RendererResult<()> {
        if width == self.width && height == self.height {
            return Ok(());
        }
        let replacement = Self::create(backend, width, height, self.light_count)?;
        let old = std::mem::replace(self, replacement);
        old.destroy(backend);
        Ok(())
    }

    pub fn destroy(&self, backend: &mut dyn GraphicsBackend) {
        backend.destroy_texture(self.texture);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::recording::RecordingBackend;

    #[test]
    fn gbuffer_attachments_share_extent_and_formats() {
        let mut backend = RecordingBackend::headless(64, 32);
        let gbuffer = GBuffer::create(&mut backend, 64, 32).unwrap();

        for target in [&gbuffer.position, &gbuffer.normal, &gbuffer.albedo_spec, &gbuffer.depth] {
            let desc = backend.texture_descriptor(target.texture).unwrap();
            assert_eq!((desc.width, desc.height), (64, 32));
        }
        assert_eq!(gbuffer.position.format, TextureFormat::Rgba16Float);
        assert_eq!(gbuffer.normal.format, TextureFormat::Rgba16Float);
        assert_eq!(gbuffer.albedo_spec.format, TextureFormat::Rgba8Unorm);
        assert_eq!(gbuffer.depth.format, TextureFormat::Depth32Float);
        assert_eq!(backend.live_texture_count(), 4);
    }

    #[test]
    fn zero_extent_is_incomplete() {
        let mut backend = RecordingBackend::headless(8, 8);
        let err = GBuffer::create(&mut backend, 0, 8).unwrap_err();
        assert!(matches!(err, RendererError::FramebufferIncomplete { .. }));
        assert_eq!(backend.live_texture_count(), 0);
    }

    #[test]
    fn mismatched_attachment_fails_validation() {
        let mut backend = RecordingBackend::headless(16, 16);
        let mut gbuffer = GBuffer::create(&mut backend, 16, 16).unwrap();
        gbuffer.normal.width = 8;
        assert!(matches!(
            gbuffer.validate(),
            Err(RendererError::FramebufferIncomplete { .. })
        ));

        let mut gbuffer = GBuffer::create(&mut backend, 16, 16).unwrap();
        gbuffer.depth.format = TextureFormat::Rgba8Unorm;
        assert!(gbuffer.validate().is_err());

        let mut gbuffer = GBuffer::create(&mut backend, 16, 16).unwrap();
        gbuffer.albedo_spec.format = TextureFormat::Depth32Float;
        assert!(gbuffer.validate().is_err());
    }

    #[test]
    fn resize_replaces_every_attachment() {
        let mut backend = RecordingBackend::headless(16, 16);
        let mut gbuffer = GBuffer::create(&mut backend, 16, 16).unwrap();
        let old_position = gbuffer.position.texture;

        gbuffer.resize(&mut backend, 40, 30).unwrap();
        assert_ne!(gbuffer.position.texture, old_position);
        assert!(backend.texture_descriptor(old_position).is_none());
        assert_eq!(backend.live_texture_count(), 4);
        gbuffer.validate().unwrap();
    }

    #[test]
    fn failed_resize_keeps_old_attachments() {
        let mut backend = RecordingBackend::headless(16, 16);
        let mut gbuffer = GBuffer::create(&mut backend, 16, 16).unwrap();
        assert!(gbuffer.resize(&mut backend, 0, 0).is_err());
        assert_eq!((gbuffer.width, gbuffer.height), (16, 16));
        assert!(backend.texture_descriptor(gbuffer.depth.texture).is_some());
    }

    #[test]
    fn shadow_array_has_one_view_per_light() {
        let mut backend = RecordingBackend::headless(32, 32);
        let shadows = ShadowArray::create(&mut backend, 32, 32, 5).unwrap();
        let desc = backend.texture_descriptor(shadows.texture).unwrap();
        assert_eq!(desc.array_layers, 5);
        assert_eq!(desc.format, TextureFormat::R32Float);
        assert!(desc.usage.contains(TextureUsage::STORAGE_BINDING | TextureUsage::TEXTURE_BINDING));

        assert_eq!(shadows.layer_views.len(), 5);
        for (layer, view) in shadows.layer_views.iter().enumerate() {
            let (texture, view_desc) = backend.view_descriptor(*view).unwrap();
            assert_eq!(texture, shadows.texture);
            assert_eq!(view_desc.base_array_layer, layer as u32);
            assert_eq!(view_desc.array_layer_count, Some(1));
        }
        let (_, array_desc) = backend.view_descriptor(shadows.array_view).unwrap();
        assert_eq!(array_desc.dimension, TextureViewDimension::D2Array);
    }

    #[test]
    fn zero_lights_allocate_placeholder_layer() {
        let mut backend = RecordingBackend::headless(32, 32);
        let shadows = ShadowArray::create(&mut backend, 32, 32, 0).unwrap();
        assert_eq!(backend.texture_descriptor(shadows.texture).unwrap().array_layers, 1);
        assert!(shadows.layer_views.is_empty());
        assert_eq!(shadows.layer_view(0), None);
    }
}
