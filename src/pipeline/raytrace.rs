//! CPU reference for the ray-traced shadow pass
//!
//! Mirrors `SHADOW_SHADER` pixel for pixel so shadow behavior can be checked without a GPU.
//! The compute shader and this module share [`SHADOW_EPSILON`] and [`SHADOW_NORMAL_OFFSET`]
//! through the shadow uniforms.

use glam::{Vec3, Vec4};

use crate::scene::{PointLight, TriangleGpu};

/// A hit closer than `distance_to_light - SHADOW_EPSILON` occludes the light.
pub const SHADOW_EPSILON: f32 = 1.0e-3;

/// Shadow rays start this far along the surface normal to escape self-intersection.
pub const SHADOW_NORMAL_OFFSET: f32 = 1.0e-2;

/// Determinant below which a ray counts as parallel to a triangle
const PARALLEL_EPSILON: f32 = 1.0e-8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    /// Unit length
    pub direction: Vec3,
}

impl Ray {
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin,
            direction: direction.normalize(),
        }
    }
}

/// Möller–Trumbore intersection. Returns the ray parameter of a hit in front of the origin.
///
/// Triangles are two-sided.
pub fn intersect_triangle(ray: &Ray, triangle: &TriangleGpu) -> Option<f32> {
    let [v0, v1, v2] = triangle.positions();
    let edge1 = v1 - v0;
    let edge2 = v2 - v0;

    let pvec = ray.direction.cross(edge2);
    let det = edge1.dot(pvec);
    if det.abs() < PARALLEL_EPSILON {
        return None;
    }
    let inv_det = 1.0 / det;

    let tvec = ray.origin - v0;
    let u = tvec.dot(pvec) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }

    let qvec = tvec.cross(edge1);
    let v = ray.direction.dot(qvec) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }

    let t = edge2.dot(qvec) * inv_det;
    (t > 0.0).then_some(t)
}

/// Host-side copy of the G-buffer attachments the shadow pass reads
#[derive(Debug, Clone)]
pub struct CpuGBuffer {
    pub width: u32,
    pub height: u32,
    /// xyz = world position, w = coverage flag
    pub position: Vec<Vec4>,
    pub normal: Vec<Vec4>,
}

impl CpuGBuffer {
    /// A G-buffer with every pixel marked as background
    pub fn background(width: u32, height: u32) -> Self {
        let len = (width * height) as usize;
        Self {
            width,
            height,
            position: vec![Vec4::ZERO; len],
            normal: vec![Vec4::ZERO; len],
        }
    }

    /// Mark a pixel as covered by geometry at `position` facing `normal`.
    pub fn set_surface(&mut self, x: u32, y: u32, position: Vec3, normal: Vec3) {
        let index = self.index(x, y);
        self.position[index] = position.extend(1.0);
        self.normal[index] = normal.normalize().extend(0.0);
    }

    pub fn index(&self, x: u32, y: u32) -> usize {
        (y * self.width + x) as usize
    }

    pub fn pixel_count(&self) -> usize {
        self.position.len()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShadowStats {
    /// Ray/triangle tests performed
    pub triangle_tests: u64,
}

/// Visibility of `light` from one G-buffer texel: 1 lit, 0 occluded.
///
/// `origin_triangle` skips the triangle the texel lies on when the caller knows it.
pub fn shade_pixel_visibility(
    position: Vec4,
    normal: Vec4,
    light: &PointLight,
    triangles: &[TriangleGpu],
    origin_triangle: Option<u32>,
    stats: &mut ShadowStats,
) -> f32 {
    if position.w < 0.5 {
        return 1.0;
    }

    let surface = position.truncate();
    if surface.distance(light.position) > light.radius() {
        return 1.0;
    }

    let origin = surface + normal.truncate() * SHADOW_NORMAL_OFFSET;
    let to_light = light.position - origin;
    let distance = to_light.length();
    if distance <= SHADOW_EPSILON {
        return 1.0;
    }
    let ray = Ray {
        origin,
        direction: to_light / distance,
    };

    for triangle in triangles {
        if origin_triangle == Some(triangle.id) {
            continue;
        }
        stats.triangle_tests += 1;
        if let Some(t) = intersect_triangle(&ray, triangle) {
            if t < distance - SHADOW_EPSILON {
                return 0.0;
            }
        }
    }
    1.0
}

/// Trace one light over a whole G-buffer, producing the contents of its shadow layer.
pub fn trace_shadow_layer(
    gbuffer: &CpuGBuffer,
    light: &PointLight,
    triangles: &[TriangleGpu],
) -> (Vec<f32>, ShadowStats) {
    let mut stats = ShadowStats::default();
    let layer = gbuffer
        .position
        .iter()
        .zip(&gbuffer.normal)
        .map(|(&position, &normal)| {
            shade_pixel_visibility(position, normal, light, triangles, None, &mut stats)
        })
        .collect();
    (layer, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    /// Square in the XZ plane at height `y`, centered on the origin
    fn square(y: f32, half: f32, first_id: u32) -> Vec<TriangleGpu> {
        let a = Vec3::new(-half, y, -half);
        let b = Vec3::new(-half, y, half);
        let c = Vec3::new(half, y, half);
        let d = Vec3::new(half, y, -half);
        vec![
            TriangleGpu::new([a, b, c], Vec3::Y, first_id),
            TriangleGpu::new([a, c, d], Vec3::Y, first_id + 1),
        ]
    }

    /// 16x16 floor samples covering x, z in [-2, 2] at y = 0
    fn floor_gbuffer() -> CpuGBuffer {
        let mut gbuffer = CpuGBuffer::background(16, 16);
        for y in 0..16 {
            for x in 0..16 {
                let world = Vec3::new(
                    -2.0 + 4.0 * x as f32 / 15.0,
                    0.0,
                    -2.0 + 4.0 * y as f32 / 15.0,
                );
                gbuffer.set_surface(x, y, world, Vec3::Y);
            }
        }
        gbuffer
    }

    fn overhead_light() -> PointLight {
        PointLight::new(Vec3::new(0.0, 3.0, 0.0), Vec3::ONE)
    }

    #[rstest]
    #[case(Vec3::new(0.1, 1.0, 0.3), Vec3::NEG_Y, Some(1.0))]
    #[case(Vec3::new(0.1, -1.0, 0.3), Vec3::Y, Some(1.0))]
    #[case(Vec3::new(0.1, 1.0, 0.3), Vec3::Y, None)]
    #[case(Vec3::new(5.0, 1.0, 5.0), Vec3::NEG_Y, None)]
    #[case(Vec3::new(0.0, 1.0, 0.0), Vec3::X, None)]
    fn ray_hits_square(#[case] origin: Vec3, #[case] direction: Vec3, #[case] expected: Option<f32>) {
        let ray = Ray::new(origin, direction);
        let hit = square(0.0, 1.0, 0)
            .iter()
            .find_map(|t| intersect_triangle(&ray, t));
        match (hit, expected) {
            (Some(t), Some(e)) => assert!((t - e).abs() < 1e-5),
            (None, None) => {}
            other => panic!("unexpected intersection result {:?}", other),
        }
    }

    #[test]
    fn occluder_shadows_only_what_is_below_it() {
        let gbuffer = floor_gbuffer();
        let mut triangles = square(0.0, 2.0, 0);
        triangles.extend(square(1.0, 0.5, 2));

        let (layer, _) = trace_shadow_layer(&gbuffer, &overhead_light(), &triangles);

        // (7, 8) sits at about (-0.13, 0, 0.13), straight under the occluder
        assert_eq!(layer[gbuffer.index(7, 8)], 0.0);
        assert_eq!(layer[gbuffer.index(8, 7)], 0.0);
        assert_eq!(layer[gbuffer.index(0, 0)], 1.0);
        assert_eq!(layer[gbuffer.index(15, 15)], 1.0);
        assert!(layer.iter().all(|&v| v == 0.0 || v == 1.0));
    }

    #[test]
    fn receiver_does_not_shadow_itself() {
        let gbuffer = floor_gbuffer();
        let triangles = square(0.0, 2.0, 0);
        let (layer, stats) = trace_shadow_layer(&gbuffer, &overhead_light(), &triangles);
        assert!(layer.iter().all(|&v| v == 1.0));
        assert!(stats.triangle_tests > 0);
    }

    #[test]
    fn tracing_is_idempotent() {
        let gbuffer = floor_gbuffer();
        let mut triangles = square(0.0, 2.0, 0);
        triangles.extend(square(1.2, 0.7, 2));
        let light = PointLight::new(Vec3::new(0.4, 2.5, -0.3), Vec3::new(0.9, 0.6, 0.7));

        let (first, first_stats) = trace_shadow_layer(&gbuffer, &light, &triangles);
        let (second, second_stats) = trace_shadow_layer(&gbuffer, &light, &triangles);

        let bits = |layer: &[f32]| layer.iter().map(|v| v.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&first), bits(&second));
        assert_eq!(first_stats, second_stats);
    }

    #[test]
    fn background_is_lit_and_never_tested() {
        let gbuffer = CpuGBuffer::background(8, 8);
        let triangles = square(1.0, 10.0, 0);
        let (layer, stats) = trace_shadow_layer(&gbuffer, &overhead_light(), &triangles);
        assert_eq!(layer.len(), gbuffer.pixel_count());
        assert!(layer.iter().all(|&v| v == 1.0));
        assert_eq!(stats.triangle_tests, 0);
    }

    #[test]
    fn out_of_radius_pixels_skip_the_triangle_loop() {
        let mut gbuffer = CpuGBuffer::background(1, 1);
        gbuffer.set_surface(0, 0, Vec3::new(50.0, 0.0, 0.0), Vec3::Y);
        let triangles = square(1.0, 100.0, 0);

        let (layer, stats) = trace_shadow_layer(&gbuffer, &overhead_light(), &triangles);
        assert_eq!(layer, vec![1.0]);
        assert_eq!(stats.triangle_tests, 0);
    }

    #[test]
    fn origin_triangle_is_skipped() {
        let triangles = square(1.0, 0.5, 7);
        let light = overhead_light();
        // Under triangle 8, the half with z < x
        let below = Vec3::new(0.2, 0.0, -0.1).extend(1.0);
        let mut stats = ShadowStats::default();

        let shadowed = shade_pixel_visibility(below, Vec4::Y, &light, &triangles, None, &mut stats);
        assert_eq!(shadowed, 0.0);

        let mut stats = ShadowStats::default();
        let skipping_one =
            shade_pixel_visibility(below, Vec4::Y, &light, &triangles, Some(8), &mut stats);
        assert_eq!(stats.triangle_tests, 1);
        // The remaining half of the square does not cover this point
        assert_eq!(skipping_one, 1.0);
    }
}
