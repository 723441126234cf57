//! Per-frame render settings
//!
//! Owned by the application and handed to the renderer by reference every frame.

use glam::Vec2;

/// What the geometry pass writes into the albedo/specular attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GBufferRenderMode {
    /// Diffuse texture color with the specular map in alpha
    #[default]
    Texture,
    Position,
    Normals,
    /// Diffuse texture only
    Albedo,
    /// Specular map broadcast to rgb
    Specular,
}

impl GBufferRenderMode {
    pub const ALL: [Self; 5] = [
        Self::Texture,
        Self::Position,
        Self::Normals,
        Self::Albedo,
        Self::Specular,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Texture => "Texture",
            Self::Position => "Position",
            Self::Normals => "Normals",
            Self::Albedo => "Albedo",
            Self::Specular => "Specular",
        }
    }

    /// Value of the mode selector uniform read by the geometry shader
    pub fn shader_index(&self) -> u32 {
        *self as u32
    }
}

/// What the deferred composite outputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeferredShadingMode {
    /// Full Blinn-Phong lighting modulated by ray-traced visibility
    #[default]
    Lit,
    /// Averaged per-light visibility, for inspecting the shadow pass
    Shadows,
}

impl DeferredShadingMode {
    pub const ALL: [Self; 2] = [Self::Lit, Self::Shadows];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Lit => "Lit",
            Self::Shadows => "Shadows",
        }
    }

    pub fn shader_index(&self) -> u32 {
        *self as u32
    }
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub gbuffer_mode: GBufferRenderMode,
    pub shading_mode: DeferredShadingMode,
    /// While enabled the cursor is captured and drives the camera
    pub mouse_look: bool,
    pub last_x: f32,
    pub last_y: f32,
    pub first_mouse: bool,
}

impl RenderSettings {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            gbuffer_mode: GBufferRenderMode::default(),
            shading_mode: DeferredShadingMode::default(),
            mouse_look: false,
            last_x: width as f32 / 2.0,
            last_y: height as f32 / 2.0,
            first_mouse: true,
        }
    }

    /// Toggle mouse look. Re-enabling swallows the first cursor event so the camera does not jump.
    pub fn set_mouse_look(&mut self, enabled: bool) {
        if enabled && !self.mouse_look {
            self.first_mouse = true;
        }
        self.mouse_look = enabled;
    }

    /// Track a cursor position and return the look delta in screen pixels (y grows downward).
    ///
    /// Returns zero while mouse look is off and for the first event after enabling it.
    pub fn cursor_moved(&mut self, x: f32, y: f32) -> Vec2 {
        if !self.mouse_look {
            return Vec2::ZERO;
        }
        if self.first_mouse {
            self.last_x = x;
            self.last_y = y;
            self.first_mouse = false;
        }

        let delta = Vec2::new(x - self.last_x, y - self.last_y);
        self.last_x = x;
        self.last_y = y;
        delta
    }
}

impl Default for RenderSettings {
    fn default() -> Self {
        let config = crate::EngineConfig::default();
        Self::new(config.width, config.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_ignored_without_mouse_look() {
        let mut settings = RenderSettings::new(800, 600);
        assert_eq!(settings.cursor_moved(10.0, 10.0), Vec2::ZERO);
        assert_eq!((settings.last_x, settings.last_y), (400.0, 300.0));
    }

    #[test]
    fn first_event_after_enabling_does_not_jump() {
        let mut settings = RenderSettings::new(800, 600);
        settings.set_mouse_look(true);
        assert_eq!(settings.cursor_moved(50.0, 70.0), Vec2::ZERO);
        assert_eq!(settings.cursor_moved(55.0, 60.0), Vec2::new(5.0, -10.0));

        settings.set_mouse_look(false);
        settings.set_mouse_look(true);
        assert!(settings.first_mouse);
        assert_eq!(settings.cursor_moved(500.0, 500.0), Vec2::ZERO);
    }

    #[test]
    fn shader_indices_follow_declaration_order() {
        for (i, mode) in GBufferRenderMode::ALL.iter().enumerate() {
            assert_eq!(mode.shader_index(), i as u32);
        }
        assert_eq!(DeferredShadingMode::Shadows.shader_index(), 1);
    }
}
