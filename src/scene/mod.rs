//! Scene description: instances, floor, lights and the camera

mod camera;
mod camera_controller;
mod geometry;
mod light;
mod transform;

pub use camera::*;
pub use camera_controller::*;
pub use geometry::*;
pub use light::*;
pub use transform::*;

use glam::Vec3;

use crate::resources::Mesh;

/// Static content rendered every frame.
///
/// Objects all share the unit cube mesh; the floor uses the 2x2 quad.
#[derive(Debug, Clone, Default)]
pub struct Scene {
    pub objects: Vec<InstanceTransform>,
    pub floor: Option<InstanceTransform>,
    pub lights: LightSet,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Nine cubes on a 3x3 grid standing on a 20x20 floor, lit by seeded lights
    pub fn demo(light_count: usize, light_seed: u64) -> Self {
        let mut scene = Self::new();
        for z in [-3.0, 0.0, 3.0] {
            for x in [-3.0, 0.0, 3.0] {
                scene.add_object(InstanceTransform::new(
                    Vec3::new(x, -0.5, z),
                    Vec3::ONE,
                ));
            }
        }
        scene.floor = Some(InstanceTransform::new(
            Vec3::new(0.0, -1.0, 0.0),
            Vec3::new(10.0, 1.0, 10.0),
        ));
        scene.lights = LightSet::seeded(light_count, light_seed);
        scene
    }

    /// Add an object instance, returning its index
    pub fn add_object(&mut self, transform: InstanceTransform) -> usize {
        let id = self.objects.len();
        self.objects.push(transform);
        id
    }

    pub fn with_floor(mut self, floor: InstanceTransform) -> Self {
        self.floor = Some(floor);
        self
    }

    pub fn with_lights(mut self, lights: LightSet) -> Self {
        self.lights = lights;
        self
    }

    /// Flatten every object and the floor into world-space triangles
    pub fn build_triangles(&self, ids: &mut TriangleIdAllocator) -> Vec<TriangleGpu> {
        let floor_mesh = Mesh::floor();
        build_scene_triangles(
            &Mesh::cube(),
            &self.objects,
            self.floor.as_ref().map(|t| (&floor_mesh, t)),
            ids,
        )
    }

    /// Number of records [`Scene::build_triangles`] produces
    pub fn triangle_count(&self) -> usize {
        let floor = self
            .floor
            .as_ref()
            .map_or(0, |_| Mesh::floor().triangle_count());
        self.objects.len() * Mesh::cube().triangle_count() + floor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_scene_rests_on_floor() {
        let scene = Scene::demo(4, 13);
        assert_eq!(scene.objects.len(), 9);
        assert_eq!(scene.lights.len(), 4);

        let mut ids = TriangleIdAllocator::new();
        let triangles = scene.build_triangles(&mut ids);
        assert_eq!(triangles.len(), 9 * 12 + 2);
        assert_eq!(scene.triangle_count(), triangles.len());

        let lowest = triangles
            .iter()
            .flat_map(|t| t.positions())
            .map(|p| p.y)
            .fold(f32::INFINITY, f32::min);
        assert!((lowest + 1.0).abs() < 1e-6);
    }
}
