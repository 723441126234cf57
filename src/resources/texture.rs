//! Texture loading and management

use crate::backend::traits::*;
use crate::backend::types::*;
use image::{DynamicImage, GenericImageView};
use std::collections::HashMap;
use std::path::Path;

/// Loaded texture data
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub data: Vec<u8>,
    pub name: String,
}

impl TextureData {
    /// Load texture from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, image::ImageError> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();

        let img = image::open(path)?;
        Ok(Self::from_image(img, &name))
    }

    /// Load texture from bytes
    pub fn from_bytes(bytes: &[u8], name: &str) -> Result<Self, image::ImageError> {
        let img = image::load_from_memory(bytes)?;
        Ok(Self::from_image(img, name))
    }

    fn from_image(img: DynamicImage, name: &str) -> Self {
        let (width, height) = img.dimensions();
        let data = img.to_rgba8().into_raw();

        Self {
            width,
            height,
            format: TextureFormat::Rgba8UnormSrgb,
            data,
            name: name.to_string(),
        }
    }

    /// Store texels as linear data (specular maps)
    pub fn linear(mut self) -> Self {
        self.format = TextureFormat::Rgba8Unorm;
        self
    }

    /// Create a solid color texture
    pub fn solid_color(color: [u8; 4], name: &str) -> Self {
        Self {
            width: 1,
            height: 1,
            format: TextureFormat::Rgba8UnormSrgb,
            data: color.to_vec(),
            name: name.to_string(),
        }
    }

    /// Create a default white texture
    pub fn white() -> Self {
        Self::solid_color([255, 255, 255, 255], "white")
    }

    /// Create a checkerboard texture
    pub fn checkerboard(size: u32, color1: [u8; 4], color2: [u8; 4]) -> Self {
        let mut data = Vec::with_capacity((size * size * 4) as usize);

        for y in 0..size {
            for x in 0..size {
                let is_even = ((x / 8) + (y / 8)) % 2 == 0;
                let color = if is_even { color1 } else { color2 };
                data.extend_from_slice(&color);
            }
        }

        Self {
            width: size,
            height: size,
            format: TextureFormat::Rgba8UnormSrgb,
            data,
            name: "checkerboard".to_string(),
        }
    }
}

/// GPU texture with its default view
#[derive(Debug, Clone)]
pub struct GpuTexture {
    pub handle: TextureHandle,
    pub view: TextureViewHandle,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub name: String,
}

impl GpuTexture {
    /// Create and upload texture to GPU
    pub fn create(backend: &mut dyn GraphicsBackend, data: &TextureData) -> BackendResult<Self> {
        let handle = backend.create_texture(&TextureDescriptor {
            label: Some(data.name.clone()),
            width: data.width,
            height: data.height,
            array_layers: 1,
            mip_levels: 1,
            format: data.format,
            usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
        })?;

        let view = backend.create_texture_view(handle, &TextureViewDescriptor::default())?;
        backend.write_texture(handle, &data.data, data.width, data.height);

        Ok(Self {
            handle,
            view,
            width: data.width,
            height: data.height,
            format: data.format,
            name: data.name.clone(),
        })
    }
}

/// Loads image files into GPU textures.
///
/// A failed load is logged and yields [`TextureHandle::INVALID`]; [`TextureLoader::view_or`]
/// then hands out the caller's fallback so rendering continues.
#[derive(Debug, Default)]
pub struct TextureLoader {
    loaded: HashMap<TextureHandle, GpuTexture>,
}

impl TextureLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `path` and upload it. `srgb` selects color vs. linear storage.
    pub fn load(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        path: impl AsRef<Path>,
        srgb: bool,
    ) -> TextureHandle {
        let path = path.as_ref();
        let data = match TextureData::from_file(path) {
            Ok(data) if srgb => data,
            Ok(data) => data.linear(),
            Err(e) => {
                log::error!("Texture failed to load at path {}: {}", path.display(), e);
                return TextureHandle::INVALID;
            }
        };

        match GpuTexture::create(backend, &data) {
            Ok(texture) => {
                log::info!(
                    "Loaded texture {} ({}x{})",
                    path.display(),
                    texture.width,
                    texture.height
                );
                let handle = texture.handle;
                self.loaded.insert(handle, texture);
                handle
            }
            Err(e) => {
                log::error!("Texture upload failed for {}: {}", path.display(), e);
                TextureHandle::INVALID
            }
        }
    }

    pub fn get(&self, handle: TextureHandle) -> Option<&GpuTexture> {
        self.loaded.get(&handle)
    }

    /// View of a loaded texture, or `fallback` for invalid handles
    pub fn view_or(&self, handle: TextureHandle, fallback: TextureViewHandle) -> TextureViewHandle {
        self.get(handle).map(|t| t.view).unwrap_or(fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::recording::RecordingBackend;

    #[test]
    fn missing_file_yields_invalid_handle() {
        let mut backend = RecordingBackend::headless(4, 4);
        let mut loader = TextureLoader::new();
        let handle = loader.load(&mut backend, "does/not/exist.png", true);
        assert!(!handle.is_valid());

        let fallback = GpuTexture::create(&mut backend, &TextureData::white()).unwrap();
        assert_eq!(loader.view_or(handle, fallback.view), fallback.view);
    }

    #[test]
    fn decodes_in_memory_png() {
        let mut bytes = Vec::new();
        let img = image::RgbaImage::from_pixel(2, 3, image::Rgba([10, 20, 30, 255]));
        DynamicImage::ImageRgba8(img)
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();

        let data = TextureData::from_bytes(&bytes, "tiny").unwrap();
        assert_eq!((data.width, data.height), (2, 3));
        assert_eq!(&data.data[..4], &[10, 20, 30, 255]);
        assert_eq!(data.linear().format, TextureFormat::Rgba8Unorm);
    }
}
