//! Hybrid deferred rendering pipeline
//!
//! Per frame:
//! 1. Geometry pass - world position, normal and albedo/specular into the G-buffer
//! 2. Shadow passes - one compute dispatch per light, ray tracing the scene triangles
//! 3. Deferred lighting - fullscreen composite scaled by each light's visibility
//! 4. Light markers - overlay cubes depth-tested against the transferred scene depth

pub mod gbuffer_pass;
pub mod light_marker_pass;
pub mod lighting_pass;
pub mod raytrace;
pub mod shadow_pass;

pub use gbuffer_pass::{GBufferPass, SurfaceTextures};
pub use light_marker_pass::LightMarkerPass;
pub use lighting_pass::LightingPass;
pub use shadow_pass::{ShadowPass, SharedShadowPipeline};

use crate::engine::RendererResult;
use crate::render_graph::RenderGraph;
use crate::EngineConfig;

/// Presentation target of the current frame
pub const SWAPCHAIN: &str = "swapchain";
pub const GBUFFER_POSITION: &str = "gbuffer_position";
pub const GBUFFER_NORMAL: &str = "gbuffer_normal";
pub const GBUFFER_ALBEDO_SPEC: &str = "gbuffer_albedo_spec";
pub const GBUFFER_DEPTH: &str = "gbuffer_depth";
/// Per-light visibility layers
pub const SHADOW_ARRAY: &str = "shadow_array";
/// Scene triangle storage buffer
pub const SCENE_TRIANGLES: &str = "scene_triangles";
/// Depth the overlays test against, created by the lighting pass
pub const PRESENT_DEPTH: &str = "present_depth";

/// Resources the renderer owns and binds to the graph by name
pub const EXTERNAL_RESOURCES: [&str; 7] = [
    SWAPCHAIN,
    GBUFFER_POSITION,
    GBUFFER_NORMAL,
    GBUFFER_ALBEDO_SPEC,
    GBUFFER_DEPTH,
    SHADOW_ARRAY,
    SCENE_TRIANGLES,
];

/// Build the hybrid render graph for `light_count` lights
pub fn build_hybrid_graph(light_count: usize, config: &EngineConfig) -> RendererResult<RenderGraph> {
    let mut graph = RenderGraph::new();
    for name in EXTERNAL_RESOURCES {
        graph.import(name);
    }

    graph.add_pass(GBufferPass::new(config.textures.clone()))?;

    let shadow_pipeline = SharedShadowPipeline::default();
    for light in 0..light_count {
        graph.add_pass(ShadowPass::new(light, shadow_pipeline.clone()))?;
    }

    graph.add_pass(LightingPass::new(config.ambient))?;
    graph.add_pass(LightMarkerPass::new(config.light_marker_scale))?;

    log::debug!(
        "Built hybrid render graph: {} passes ({} shadow)",
        graph.passes().len(),
        light_count
    );
    Ok(graph)
}

#[cfg(test)]
pub(crate) mod shader_tests {
    use naga::valid::{Capabilities, ValidationFlags, Validator};

    /// Parse and validate a WGSL source, panicking with the diagnostics on failure
    pub fn validate_wgsl(source: &str) -> naga::Module {
        let module = match naga::front::wgsl::parse_str(source) {
            Ok(module) => module,
            Err(e) => panic!("WGSL parse error:\n{}", e.emit_to_string(source)),
        };
        if let Err(e) = Validator::new(ValidationFlags::all(), Capabilities::all()).validate(&module) {
            panic!("WGSL validation error:\n{}", e.emit_to_string(source));
        }
        module
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_runs_geometry_then_shadows_then_composite() {
        let graph = build_hybrid_graph(3, &EngineConfig::default()).unwrap();
        let compiled = graph.compile().unwrap();
        assert_eq!(
            compiled.pass_names(&graph),
            [
                "Geometry Pass",
                "shadow_pass_0",
                "shadow_pass_1",
                "shadow_pass_2",
                "Deferred Lighting Pass",
                "Light Markers",
            ]
        );
        // Every pass but the last feeds a later one
        assert_eq!(compiled.barrier_after, [true, true, true, true, true, false]);
    }

    #[test]
    fn zero_lights_have_no_shadow_passes() {
        let graph = build_hybrid_graph(0, &EngineConfig::default()).unwrap();
        let compiled = graph.compile().unwrap();
        assert_eq!(
            compiled.pass_names(&graph),
            ["Geometry Pass", "Deferred Lighting Pass", "Light Markers"]
        );
    }
}
