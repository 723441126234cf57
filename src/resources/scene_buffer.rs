//! GPU-resident triangle storage traced by the shadow pass

use bytemuck::Zeroable;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::scene::TriangleGpu;

/// Storage buffer holding the flattened scene triangles.
///
/// Uploaded once at startup. An empty scene still gets one zeroed record so the binding is
/// legal; [`SceneBuffer::triangle_count`] stays 0 in that case.
#[derive(Debug, Clone, Copy)]
pub struct SceneBuffer {
    pub buffer: BufferHandle,
    pub triangle_count: u32,
}

impl SceneBuffer {
    pub fn upload(backend: &mut dyn GraphicsBackend, triangles: &[TriangleGpu]) -> BackendResult<Self> {
        let placeholder = [TriangleGpu::zeroed()];
        let records = if triangles.is_empty() {
            &placeholder[..]
        } else {
            triangles
        };
        let bytes: &[u8] = bytemuck::cast_slice(records);

        let buffer = backend.create_buffer_init(
            &BufferDescriptor {
                label: Some("Scene Triangles".into()),
                size: bytes.len() as u64,
                usage: BufferUsage::STORAGE | BufferUsage::COPY_SRC,
                mapped_at_creation: false,
            },
            bytes,
        )?;

        let triangle_count = u32::try_from(triangles.len()).map_err(|_| {
            BackendError::BufferCreationFailed(format!("{} triangles exceed u32", triangles.len()))
        })?;

        log::info!(
            "Uploaded {} scene triangles ({} bytes)",
            triangle_count,
            bytes.len()
        );

        Ok(Self {
            buffer,
            triangle_count,
        })
    }

    /// Size of the buffer in bytes, including the placeholder record of an empty scene
    pub fn byte_size(&self) -> u64 {
        self.triangle_count.max(1) as u64 * std::mem::size_of::<TriangleGpu>() as u64
    }

    /// Copy the live records back from the GPU.
    pub fn read_back(&self, backend: &mut dyn GraphicsBackend) -> BackendResult<Vec<TriangleGpu>> {
        let size = self.triangle_count as u64 * std::mem::size_of::<TriangleGpu>() as u64;
        if size == 0 {
            return Ok(Vec::new());
        }
        let bytes = backend.read_buffer(self.buffer, 0, size)?;
        // Staging memory is not guaranteed to be 16-byte aligned.
        Ok(bytemuck::pod_collect_to_vec(&bytes))
    }

    pub fn destroy(&self, backend: &mut dyn GraphicsBackend) {
        backend.destroy_buffer(self.buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::recording::RecordingBackend;
    use glam::Vec3;

    #[test]
    fn empty_scene_uploads_one_zeroed_record() {
        let mut backend = RecordingBackend::headless(4, 4);
        let scene = SceneBuffer::upload(&mut backend, &[]).unwrap();
        assert_eq!(scene.triangle_count, 0);
        assert_eq!(scene.byte_size(), 80);

        let data = backend.buffer_data(scene.buffer).unwrap();
        assert_eq!(data.len(), 80);
        assert!(data.iter().all(|&b| b == 0));
        assert!(scene.read_back(&mut backend).unwrap().is_empty());
    }

    #[test]
    fn buffer_is_storage_and_copy_src() {
        let mut backend = RecordingBackend::headless(4, 4);
        let tri = TriangleGpu::new([Vec3::ZERO, Vec3::X, Vec3::Z], Vec3::Y, 0);
        let scene = SceneBuffer::upload(&mut backend, &[tri]).unwrap();
        let desc = backend.buffer_descriptor(scene.buffer).unwrap();
        assert!(desc.usage.contains(BufferUsage::STORAGE | BufferUsage::COPY_SRC));
        assert_eq!(scene.read_back(&mut backend).unwrap(), vec![tri]);
    }
}
