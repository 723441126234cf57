//! Point lights and the analytic influence radius

use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::CUTOFF_FRACTION;

/// Default linear attenuation coefficient
pub const DEFAULT_LINEAR: f32 = 0.7;
/// Default quadratic attenuation coefficient
pub const DEFAULT_QUADRATIC: f32 = 1.8;

/// A point light with constant attenuation term fixed at 1.0
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointLight {
    pub position: Vec3,
    pub color: Vec3,
    pub linear: f32,
    pub quadratic: f32,
}

impl Default for PointLight {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            color: Vec3::ONE,
            linear: DEFAULT_LINEAR,
            quadratic: DEFAULT_QUADRATIC,
        }
    }
}

impl PointLight {
    pub fn new(position: Vec3, color: Vec3) -> Self {
        Self {
            position,
            color,
            ..Default::default()
        }
    }

    pub fn with_attenuation(mut self, linear: f32, quadratic: f32) -> Self {
        self.linear = linear;
        self.quadratic = quadratic;
        self
    }

    /// `1 / (1 + L·d + Q·d²)`
    pub fn attenuation_at(&self, distance: f32) -> f32 {
        1.0 / (1.0 + self.linear * distance + self.quadratic * distance * distance)
    }

    /// Distance at which the brightest channel falls to [`CUTOFF_FRACTION`].
    ///
    /// Positive root of `Q r² + L r + (1 - max(c) / CUTOFF_FRACTION) = 0`. A light whose
    /// brightest channel never exceeds the cutoff has radius 0.
    pub fn radius(&self) -> f32 {
        let brightness = self.color.max_element();
        let constant = 1.0 - brightness / CUTOFF_FRACTION;
        if constant >= 0.0 {
            return 0.0;
        }

        let (l, q) = (self.linear, self.quadratic);
        if q > 0.0 {
            (-l + (l * l - 4.0 * q * constant).sqrt()) / (2.0 * q)
        } else if l > 0.0 {
            -constant / l
        } else {
            f32::INFINITY
        }
    }

    /// Convert to GPU data format
    pub fn to_gpu_data(&self) -> GpuPointLight {
        GpuPointLight {
            position_radius: self.position.extend(self.radius()),
            color: self.color.extend(1.0),
            attenuation: Vec4::new(self.linear, self.quadratic, 0.0, 0.0),
        }
    }
}

/// GPU-friendly point light record
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuPointLight {
    /// xyz = position, w = influence radius
    pub position_radius: Vec4,
    /// xyz = color, w unused
    pub color: Vec4,
    /// x = linear, y = quadratic
    pub attenuation: Vec4,
}

/// The fixed set of lights used for the whole run
#[derive(Debug, Clone, Default)]
pub struct LightSet {
    lights: Vec<PointLight>,
}

impl LightSet {
    pub fn new(lights: Vec<PointLight>) -> Self {
        Self { lights }
    }

    /// Scatter `count` lights above the floor with a reproducible RNG.
    ///
    /// Positions fall in `x, z ∈ [-3, 3)` and `y ∈ [0.5, 3.5)`; every color channel
    /// lies in `[0.5, 1.0)`.
    pub fn seeded(count: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let lights = (0..count)
            .map(|_| {
                let position = Vec3::new(
                    rng.gen_range(-3.0..3.0),
                    rng.gen_range(0.5..3.5),
                    rng.gen_range(-3.0..3.0),
                );
                let color = Vec3::new(
                    rng.gen_range(0.5..1.0),
                    rng.gen_range(0.5..1.0),
                    rng.gen_range(0.5..1.0),
                );
                PointLight::new(position, color)
            })
            .collect();
        Self { lights }
    }

    pub fn len(&self) -> usize {
        self.lights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lights.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PointLight> {
        self.lights.iter()
    }

    pub fn get(&self, index: usize) -> Option<&PointLight> {
        self.lights.get(index)
    }

    pub fn gpu_data(&self) -> Vec<GpuPointLight> {
        self.lights.iter().map(PointLight::to_gpu_data).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Vec3::ONE, 0.7, 1.8)]
    #[case(Vec3::new(0.5, 0.9, 0.6), 0.7, 1.8)]
    #[case(Vec3::new(0.8, 0.2, 0.1), 0.35, 0.44)]
    #[case(Vec3::splat(0.75), 0.09, 0.032)]
    fn radius_is_positive_root(#[case] color: Vec3, #[case] linear: f32, #[case] quadratic: f32) {
        let light = PointLight::new(Vec3::ZERO, color).with_attenuation(linear, quadratic);
        let r = light.radius();
        assert!(r > 0.0);

        let c = 1.0 - color.max_element() / CUTOFF_FRACTION;
        let residual = quadratic * r * r + linear * r + c;
        assert!(residual.abs() < 1e-3 * c.abs(), "residual {residual} for r = {r}");
    }

    #[test]
    fn brightest_channel_hits_cutoff_at_radius() {
        let light = PointLight::new(Vec3::ZERO, Vec3::new(0.9, 0.6, 0.7));
        let r = light.radius();
        let contribution = light.color.max_element() * light.attenuation_at(r);
        assert!((contribution - CUTOFF_FRACTION).abs() < 1e-4);
    }

    #[test]
    fn dim_light_has_zero_radius() {
        let light = PointLight::new(Vec3::ZERO, Vec3::splat(0.01));
        assert_eq!(light.radius(), 0.0);
    }

    #[test]
    fn seeded_lights_are_reproducible() {
        let a = LightSet::seeded(8, 13);
        let b = LightSet::seeded(8, 13);
        assert_eq!(a.gpu_data(), b.gpu_data());

        for light in a.iter() {
            assert!((-3.0..3.0).contains(&light.position.x));
            assert!((0.5..3.5).contains(&light.position.y));
            assert!(light.color.min_element() >= 0.5);
        }
    }

    #[test]
    fn gpu_record_is_three_vec4() {
        assert_eq!(std::mem::size_of::<GpuPointLight>(), 48);
        let gpu = PointLight::new(Vec3::new(1.0, 2.0, 3.0), Vec3::ONE).to_gpu_data();
        assert_eq!(gpu.position_radius.truncate(), Vec3::new(1.0, 2.0, 3.0));
        assert!(gpu.position_radius.w > 0.0);
    }
}
