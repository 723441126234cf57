//! Scene geometry builder
//!
//! Flattens instanced meshes into the world-space triangle soup traced by the shadow pass.
//!
//! # GPU layout
//!
//! [`TriangleGpu`] follows the std430 rules for a struct of `vec4<f32>` and `u32` members:
//!
//! | field      | offset | size |
//! |------------|--------|------|
//! | `v0`       | 0      | 16   |
//! | `v1`       | 16     | 16   |
//! | `v2`       | 32     | 16   |
//! | `normal`   | 48     | 16   |
//! | `id`       | 64     | 4    |
//! | `_padding` | 68     | 12   |
//!
//! for a stride of 80 bytes. Padding words are always zero.

use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};

use super::transform::InstanceTransform;
use crate::resources::Mesh;

/// One world-space triangle as stored in the scene storage buffer
#[repr(C, align(16))]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct TriangleGpu {
    /// World position, w = 1
    pub v0: [f32; 4],
    pub v1: [f32; 4],
    pub v2: [f32; 4],
    /// Unit face normal, w = 0
    pub normal: [f32; 4],
    pub id: u32,
    pub _padding: [u32; 3],
}

impl TriangleGpu {
    pub fn new(positions: [Vec3; 3], normal: Vec3, id: u32) -> Self {
        Self {
            v0: positions[0].extend(1.0).to_array(),
            v1: positions[1].extend(1.0).to_array(),
            v2: positions[2].extend(1.0).to_array(),
            normal: normal.extend(0.0).to_array(),
            id,
            _padding: [0; 3],
        }
    }

    pub fn positions(&self) -> [Vec3; 3] {
        [
            Vec4::from_array(self.v0).truncate(),
            Vec4::from_array(self.v1).truncate(),
            Vec4::from_array(self.v2).truncate(),
        ]
    }

    pub fn face_normal(&self) -> Vec3 {
        Vec4::from_array(self.normal).truncate()
    }
}

/// Hands out triangle identities.
///
/// Values increase by one per triangle and are never reused for the lifetime of the allocator.
#[derive(Debug, Default)]
pub struct TriangleIdAllocator {
    next: u32,
}

impl TriangleIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self) -> u32 {
        let id = self.next;
        self.next += 1;
        id
    }

    /// Number of identities handed out so far
    pub fn issued(&self) -> u32 {
        self.next
    }
}

/// Append every triangle of `mesh` placed by `transform`.
pub fn append_instance_triangles(
    out: &mut Vec<TriangleGpu>,
    mesh: &Mesh,
    transform: &InstanceTransform,
    ids: &mut TriangleIdAllocator,
) {
    let model = transform.matrix();
    let normal_matrix = transform.normal_matrix();

    for tri in mesh.triangles() {
        let positions = tri.map(|v| model.transform_point3(v.position));
        let normal = (normal_matrix * tri[0].normal).normalize_or_zero();
        out.push(TriangleGpu::new(positions, normal, ids.allocate()));
    }
}

/// Build the flat triangle array: every object instance in order, then the floor.
///
/// An empty instance list without a floor yields an empty vector.
pub fn build_scene_triangles(
    object_mesh: &Mesh,
    instances: &[InstanceTransform],
    floor: Option<(&Mesh, &InstanceTransform)>,
    ids: &mut TriangleIdAllocator,
) -> Vec<TriangleGpu> {
    let floor_count = floor.map_or(0, |(mesh, _)| mesh.triangle_count());
    let mut triangles =
        Vec::with_capacity(instances.len() * object_mesh.triangle_count() + floor_count);

    for transform in instances {
        append_instance_triangles(&mut triangles, object_mesh, transform, ids);
    }

    if let Some((mesh, transform)) = floor {
        append_instance_triangles(&mut triangles, mesh, transform, ids);
    }

    log::debug!(
        "Built scene geometry: {} instances, {} triangles",
        instances.len(),
        triangles.len()
    );

    triangles
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::mem::{align_of, offset_of, size_of};

    #[test]
    fn record_layout_matches_std430() {
        assert_eq!(size_of::<TriangleGpu>(), 80);
        assert_eq!(align_of::<TriangleGpu>(), 16);
        assert_eq!(offset_of!(TriangleGpu, v0), 0);
        assert_eq!(offset_of!(TriangleGpu, v1), 16);
        assert_eq!(offset_of!(TriangleGpu, v2), 32);
        assert_eq!(offset_of!(TriangleGpu, normal), 48);
        assert_eq!(offset_of!(TriangleGpu, id), 64);
        assert_eq!(offset_of!(TriangleGpu, _padding), 68);
    }

    #[test]
    fn padding_bytes_are_zero() {
        let tri = TriangleGpu::new([Vec3::X, Vec3::Y, Vec3::Z], Vec3::Y, 7);
        let bytes = bytemuck::bytes_of(&tri);
        assert!(bytes[68..80].iter().all(|&b| b == 0));
        assert_eq!(&bytes[64..68], &7u32.to_ne_bytes());
    }

    #[rstest]
    #[case(InstanceTransform::default())]
    #[case(InstanceTransform::new(Vec3::new(3.0, -0.5, -3.0), Vec3::splat(0.7)))]
    #[case(InstanceTransform::new(Vec3::new(-1.0, 2.0, 0.5), Vec3::new(2.0, 0.5, 1.0)))]
    fn positions_and_normals_follow_transform(#[case] transform: InstanceTransform) {
        let cube = Mesh::cube();
        let mut ids = TriangleIdAllocator::new();
        let triangles = build_scene_triangles(&cube, &[transform], None, &mut ids);
        assert_eq!(triangles.len(), 12);

        let model = transform.matrix();
        let normal_matrix = transform.normal_matrix();
        for (gpu, local) in triangles.iter().zip(cube.triangles()) {
            for (world, vertex) in gpu.positions().iter().zip(local.iter()) {
                let expected = model.transform_point3(vertex.position);
                assert!((*world - expected).length() < 1e-5);
            }
            let expected = (normal_matrix * local[0].normal).normalize();
            assert!((gpu.face_normal() - expected).length() < 1e-5);
            assert!((gpu.face_normal().length() - 1.0).abs() < 1e-5);
            assert_eq!(gpu.v0[3], 1.0);
            assert_eq!(gpu.normal[3], 0.0);
        }
    }

    #[test]
    fn identities_increase_objects_then_floor() {
        let instances = [
            InstanceTransform::from_position(Vec3::new(-3.0, 0.0, 0.0)),
            InstanceTransform::from_position(Vec3::new(3.0, 0.0, 0.0)),
        ];
        let floor_mesh = Mesh::floor();
        let floor = InstanceTransform::new(Vec3::new(0.0, -1.0, 0.0), Vec3::new(10.0, 1.0, 10.0));
        let mut ids = TriangleIdAllocator::new();

        let triangles =
            build_scene_triangles(&Mesh::cube(), &instances, Some((&floor_mesh, &floor)), &mut ids);

        assert_eq!(triangles.len(), 26);
        assert!(triangles.windows(2).all(|w| w[0].id < w[1].id));
        // Floor triangles come last and face up.
        for tri in &triangles[24..] {
            assert!((tri.face_normal() - Vec3::Y).length() < 1e-6);
            assert!(tri.positions().iter().all(|p| (p.y + 1.0).abs() < 1e-6));
        }
        assert_eq!(ids.issued(), 26);
    }

    #[test]
    fn identities_are_not_reused_across_builds() {
        let mut ids = TriangleIdAllocator::new();
        let first = build_scene_triangles(&Mesh::cube(), &[InstanceTransform::default()], None, &mut ids);
        let second = build_scene_triangles(&Mesh::cube(), &[InstanceTransform::default()], None, &mut ids);
        let last_first = first.last().map(|t| t.id).unwrap();
        assert!(second.iter().all(|t| t.id > last_first));
    }

    #[test]
    fn empty_scene_is_empty() {
        let mut ids = TriangleIdAllocator::new();
        assert!(build_scene_triangles(&Mesh::cube(), &[], None, &mut ids).is_empty());

        let floor_mesh = Mesh::floor();
        let floor = InstanceTransform::default();
        let only_floor =
            build_scene_triangles(&Mesh::cube(), &[], Some((&floor_mesh, &floor)), &mut ids);
        assert_eq!(only_floor.len(), 2);
    }
}
