//! Hybrid Renderer - deferred shading with compute ray-traced shadows on wgpu
//!
//! Every frame renders a G-buffer, ray traces one visibility layer per point light in a
//! compute pass against a GPU-resident triangle soup, and composites Blinn-Phong lighting
//! scaled by those visibilities.
//!
//! # Features
//! - Render graph system for declarative render pass management
//! - Brute-force Möller–Trumbore shadow rays, one compute dispatch per light
//! - Analytic light-volume culling from attenuation coefficients
//! - A command-recording backend for testing pass order and resource usage without a GPU

pub mod backend;
pub mod egui_integration;
pub mod engine;
pub mod pipeline;
pub mod render_graph;
pub mod resources;
pub mod scene;
pub mod settings;

pub use egui_integration::WgpuEguiIntegration;
pub use engine::{Renderer, RendererError, RendererResult};
pub use pipeline::SurfaceTextures;
pub use settings::{DeferredShadingMode, GBufferRenderMode, RenderSettings};

// Re-export wgpu backend for direct access
pub use backend::wgpu_backend::WgpuBackend;

/// Edge length of the square shadow workgroup, in pixels
pub const SHADOW_WORKGROUP_SIZE: u32 = 16;

/// Fraction of a light's brightest channel below which its contribution is cut off
pub const CUTOFF_FRACTION: f32 = 5.0 / 256.0;

/// Configuration for initializing the renderer
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Window title
    pub title: String,
    /// Initial window width
    pub width: u32,
    /// Initial window height
    pub height: u32,
    /// Number of seeded point lights
    pub light_count: usize,
    pub light_seed: u64,
    /// Uniform scale of the cube drawn at each light
    pub light_marker_scale: f32,
    /// Enable vsync
    pub vsync: bool,
    /// Ambient term as a fraction of albedo
    pub ambient: f32,
    pub textures: SurfaceTextures,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            title: "Hybrid Renderer".to_string(),
            width: 1920,
            height: 1080,
            light_count: 32,
            light_seed: 13,
            light_marker_scale: 0.125,
            vsync: true,
            ambient: 0.1,
            textures: SurfaceTextures::default(),
        }
    }
}
