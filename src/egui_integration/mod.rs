//! egui GUI integration
//!
//! Draws the debug overlay on top of the composited frame, after the render graph and
//! before presentation.

use egui::ViewportId;
use egui_wgpu::ScreenDescriptor;
use winit::event::WindowEvent;
use winit::window::Window;

use crate::backend::wgpu_backend::WgpuBackend;
use crate::settings::{DeferredShadingMode, GBufferRenderMode, RenderSettings};

pub struct WgpuEguiIntegration {
    ctx: egui::Context,
    /// Input translation from winit
    winit_state: egui_winit::State,
    renderer: egui_wgpu::Renderer,
    /// Tessellated output of the last finished frame
    paint_jobs: Vec<egui::ClippedPrimitive>,
    textures_delta: egui::TexturesDelta,
}

impl WgpuEguiIntegration {
    pub fn new(backend: &WgpuBackend, window: &Window) -> Self {
        let ctx = egui::Context::default();

        let winit_state = egui_winit::State::new(
            ctx.clone(),
            ViewportId::ROOT,
            window,
            Some(window.scale_factor() as f32),
            None,
        );

        let renderer = egui_wgpu::Renderer::new(
            backend.device(),
            backend.wgpu_surface_format(),
            None,
            1,
        );

        Self {
            ctx,
            winit_state,
            renderer,
            paint_jobs: Vec::new(),
            textures_delta: egui::TexturesDelta::default(),
        }
    }

    /// Feed a window event to egui. Returns true when egui consumed it.
    pub fn on_window_event(&mut self, window: &Window, event: &WindowEvent) -> bool {
        self.winit_state.on_window_event(window, event).consumed
    }

    /// Run one UI frame and keep its tessellated output for [`Self::render`]
    pub fn run(&mut self, window: &Window, ui: impl FnOnce(&egui::Context)) {
        let raw_input = self.winit_state.take_egui_input(window);
        let full_output = self.ctx.run(raw_input, ui);

        self.winit_state
            .handle_platform_output(window, full_output.platform_output);

        self.paint_jobs = self
            .ctx
            .tessellate(full_output.shapes, full_output.pixels_per_point);
        self.textures_delta.append(full_output.textures_delta);
    }

    /// Record the overlay into the frame currently open on the backend
    pub fn render(&mut self, backend: &mut WgpuBackend, screen_width: u32, screen_height: u32) {
        let screen_descriptor = ScreenDescriptor {
            size_in_pixels: [screen_width, screen_height],
            pixels_per_point: self.ctx.pixels_per_point(),
        };

        let (device, queue, encoder) = backend.device_queue_encoder();
        let Some(encoder) = encoder else {
            // Frame skipped; textures stay queued for the next one
            return;
        };

        for (id, image_delta) in &self.textures_delta.set {
            self.renderer.update_texture(device, queue, *id, image_delta);
        }
        self.renderer
            .update_buffers(device, queue, encoder, &self.paint_jobs, &screen_descriptor);

        backend.render_egui(&self.renderer, &self.paint_jobs, &screen_descriptor);

        for id in &self.textures_delta.free {
            self.renderer.free_texture(id);
        }
        self.textures_delta = egui::TexturesDelta::default();
    }

    pub fn context(&self) -> &egui::Context {
        &self.ctx
    }

    pub fn wants_keyboard_input(&self) -> bool {
        self.ctx.wants_keyboard_input()
    }

    pub fn wants_pointer_input(&self) -> bool {
        self.ctx.wants_pointer_input()
    }
}

/// Render mode selectors plus frame statistics
pub fn settings_window(ctx: &egui::Context, settings: &mut RenderSettings, stats: &FrameStats) {
    egui::Window::new("Renderer")
        .default_pos([10.0, 10.0])
        .resizable(false)
        .show(ctx, |ui| {
            egui::ComboBox::from_label("G-buffer")
                .selected_text(settings.gbuffer_mode.label())
                .show_ui(ui, |ui| {
                    for mode in GBufferRenderMode::ALL {
                        ui.selectable_value(&mut settings.gbuffer_mode, mode, mode.label());
                    }
                });
            egui::ComboBox::from_label("Shading")
                .selected_text(settings.shading_mode.label())
                .show_ui(ui, |ui| {
                    for mode in DeferredShadingMode::ALL {
                        ui.selectable_value(&mut settings.shading_mode, mode, mode.label());
                    }
                });

            ui.separator();
            ui.label(format!("{:.1} ms ({:.0} fps)", stats.frame_ms, stats.fps()));
            ui.label(format!("{} lights, {} triangles", stats.lights, stats.triangles));
            ui.label(if settings.mouse_look {
                "Mouse look: on (1 to release)"
            } else {
                "Mouse look: off (2 to capture)"
            });
        });
}

/// Numbers shown in the settings window
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameStats {
    pub frame_ms: f32,
    pub lights: usize,
    pub triangles: u32,
}

impl FrameStats {
    pub fn fps(&self) -> f32 {
        if self.frame_ms > 0.0 {
            1000.0 / self.frame_ms
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fps_from_frame_time() {
        let stats = FrameStats {
            frame_ms: 20.0,
            ..Default::default()
        };
        assert_eq!(stats.fps(), 50.0);
        assert_eq!(FrameStats::default().fps(), 0.0);
    }

    #[test]
    fn settings_window_builds_without_touching_settings() {
        let ctx = egui::Context::default();
        let mut settings = RenderSettings::new(800, 600);
        let _ = ctx.run(egui::RawInput::default(), |ctx| {
            settings_window(ctx, &mut settings, &FrameStats::default());
        });
        assert_eq!(settings.gbuffer_mode, GBufferRenderMode::Texture);
        assert_eq!(settings.shading_mode, DeferredShadingMode::Lit);
    }
}
