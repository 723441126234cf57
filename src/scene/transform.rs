//! Instance transforms

use glam::{Mat3, Mat4, Vec3};

use crate::backend::ObjectUniform;

/// Placement of one mesh instance in world space.
///
/// The model matrix is `translate(position) * scale(scale)`: the mesh is scaled in its local
/// frame first and then moved to `position`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstanceTransform {
    pub position: Vec3,
    pub scale: Vec3,
}

impl Default for InstanceTransform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            scale: Vec3::ONE,
        }
    }
}

impl InstanceTransform {
    pub fn new(position: Vec3, scale: Vec3) -> Self {
        Self { position, scale }
    }

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    pub fn from_position_uniform_scale(position: Vec3, scale: f32) -> Self {
        Self {
            position,
            scale: Vec3::splat(scale),
        }
    }

    /// Get the model matrix for this transform
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_translation(self.position) * Mat4::from_scale(self.scale)
    }

    /// Inverse transpose of the upper 3x3 of the model matrix
    pub fn normal_matrix(&self) -> Mat3 {
        Mat3::from_mat4(self.matrix()).inverse().transpose()
    }

    /// Build uniform data for shaders
    pub fn uniform_data(&self) -> ObjectUniform {
        ObjectUniform {
            model: self.matrix(),
            normal_matrix: Mat4::from_mat3(self.normal_matrix()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_applies_before_translation() {
        let t = InstanceTransform::new(Vec3::new(1.0, 2.0, 3.0), Vec3::splat(2.0));
        let p = t.matrix().transform_point3(Vec3::new(1.0, 0.0, 0.0));
        assert!((p - Vec3::new(3.0, 2.0, 3.0)).length() < 1e-6);
    }

    #[test]
    fn normal_matrix_undoes_non_uniform_scale() {
        let t = InstanceTransform::new(Vec3::ZERO, Vec3::new(4.0, 1.0, 1.0));
        // A plane tilted 45 degrees in XY keeps its normal perpendicular after scaling.
        let tangent = t.matrix().transform_vector3(Vec3::new(1.0, -1.0, 0.0));
        let normal = (t.normal_matrix() * Vec3::new(1.0, 1.0, 0.0)).normalize();
        assert!(tangent.dot(normal).abs() < 1e-5);
    }

    #[test]
    fn translation_does_not_touch_normals() {
        let t = InstanceTransform::from_position(Vec3::new(10.0, -5.0, 2.0));
        let n = t.normal_matrix() * Vec3::Y;
        assert!((n - Vec3::Y).length() < 1e-6);
    }
}
