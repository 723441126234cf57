//! Hybrid rendering demo
//!
//! Nine cubes on a floor lit by seeded point lights, each shadowed by a compute ray-traced
//! visibility pass.
//!
//! Run with:
//!   cargo run --example hybrid_rendering -- --lights 16
//!
//! Controls:
//!   WASD     - Move camera
//!   QE       - Move up/down
//!   Shift    - Sprint (2x speed)
//!   Arrows   - Look around
//!   2 / 1    - Enable / disable mouse look
//!   Escape   - Exit

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use glam::{Vec2, Vec3};
use hybrid_renderer::{
    backend::GraphicsBackend,
    egui_integration::{settings_window, FrameStats},
    scene::{Camera, CameraController, CameraInput, FreeFlyController, Scene},
    EngineConfig, RenderSettings, Renderer, SurfaceTextures, WgpuBackend, WgpuEguiIntegration,
};
use winit::{
    dpi::PhysicalSize,
    event::{ElementState, Event, MouseScrollDelta, WindowEvent},
    event_loop::{ControlFlow, EventLoop, EventLoopWindowTarget},
    keyboard::{KeyCode, PhysicalKey},
    window::{CursorGrabMode, Window, WindowBuilder},
};

/// Cursor pixels an arrow key adds per frame while held
const ARROW_LOOK_STEP: f32 = 0.4;

#[derive(Parser, Debug)]
#[command(about = "Deferred shading with compute ray-traced shadows")]
struct Args {
    /// Number of point lights
    #[arg(long, default_value_t = 32)]
    lights: usize,
    /// Seed for light placement and color
    #[arg(long, default_value_t = 13)]
    seed: u64,
    #[arg(long, default_value_t = 1920)]
    width: u32,
    #[arg(long, default_value_t = 1080)]
    height: u32,
    #[arg(long)]
    no_vsync: bool,
    /// Diffuse texture for the cubes
    #[arg(long)]
    object_diffuse: Option<PathBuf>,
    #[arg(long)]
    object_specular: Option<PathBuf>,
    /// Diffuse texture for the floor
    #[arg(long)]
    floor_diffuse: Option<PathBuf>,
    #[arg(long)]
    floor_specular: Option<PathBuf>,
}

impl Args {
    fn config(&self) -> EngineConfig {
        EngineConfig {
            width: self.width,
            height: self.height,
            light_count: self.lights,
            light_seed: self.seed,
            vsync: !self.no_vsync,
            textures: SurfaceTextures {
                object_diffuse: self.object_diffuse.clone(),
                object_specular: self.object_specular.clone(),
                floor_diffuse: self.floor_diffuse.clone(),
                floor_specular: self.floor_specular.clone(),
            },
            ..Default::default()
        }
    }
}

/// Keys held for arrow look
#[derive(Debug, Default)]
struct ArrowKeys {
    up: bool,
    down: bool,
    left: bool,
    right: bool,
}

impl ArrowKeys {
    fn look_delta(&self) -> Vec2 {
        let mut delta = Vec2::ZERO;
        if self.up {
            delta.y -= ARROW_LOOK_STEP;
        }
        if self.down {
            delta.y += ARROW_LOOK_STEP;
        }
        if self.left {
            delta.x -= ARROW_LOOK_STEP;
        }
        if self.right {
            delta.x += ARROW_LOOK_STEP;
        }
        delta
    }
}

struct AppState {
    camera: Camera,
    controller: FreeFlyController,
    camera_input: CameraInput,
    arrows: ArrowKeys,
    settings: RenderSettings,
    egui: WgpuEguiIntegration,
    last_frame: Instant,
    stats: FrameStats,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let config = args.config();

    let event_loop = match EventLoop::new() {
        Ok(event_loop) => event_loop,
        Err(e) => {
            log::error!("Failed to create event loop: {}", e);
            std::process::exit(1);
        }
    };

    let window = match WindowBuilder::new()
        .with_title(&config.title)
        .with_inner_size(PhysicalSize::new(config.width, config.height))
        .build(&event_loop)
    {
        Ok(window) => Arc::new(window),
        Err(e) => {
            log::error!("Failed to create window: {}", e);
            std::process::exit(1);
        }
    };

    let backend = match WgpuBackend::new(Arc::clone(&window), config.vsync) {
        Ok(backend) => backend,
        Err(e) => {
            log::error!("Failed to initialize wgpu: {}", e);
            std::process::exit(1);
        }
    };

    let scene = Scene::demo(config.light_count, config.light_seed);
    let mut renderer = match Renderer::new(backend, config, scene) {
        Ok(renderer) => renderer,
        Err(e) => {
            log::error!("Failed to create renderer: {}", e);
            std::process::exit(1);
        }
    };

    let (width, height) = renderer.dimensions();
    let mut camera = Camera::new(Vec3::new(0.0, 3.0, 9.0), Vec3::new(0.0, -0.5, 0.0));
    camera.set_aspect(width as f32, height as f32);
    let mut controller = FreeFlyController::new().with_speed(4.0);
    controller.sync_with_camera(&camera);

    let mut state = AppState {
        camera,
        controller,
        camera_input: CameraInput::new(),
        arrows: ArrowKeys::default(),
        settings: RenderSettings::new(width, height),
        egui: WgpuEguiIntegration::new(renderer.backend(), &window),
        last_frame: Instant::now(),
        stats: FrameStats {
            lights: renderer.scene().lights.len(),
            triangles: renderer.scene_buffer().triangle_count,
            ..Default::default()
        },
    };

    let window_clone = Arc::clone(&window);
    let result = event_loop.run(move |event, elwt: &EventLoopWindowTarget<()>| {
        elwt.set_control_flow(ControlFlow::Poll);

        match event {
            Event::WindowEvent { event, .. } => {
                let consumed = state.egui.on_window_event(&window_clone, &event);
                handle_window_event(&event, consumed, &mut state, &mut renderer, &window_clone, elwt);
            }
            Event::AboutToWait => {
                let now = Instant::now();
                let dt = (now - state.last_frame).as_secs_f32();
                state.last_frame = now;
                state.stats.frame_ms = dt * 1000.0;

                if !state.egui.wants_keyboard_input() {
                    state.camera_input.mouse_delta += state.arrows.look_delta();
                    state
                        .controller
                        .update(&mut state.camera, &state.camera_input, dt);
                }
                state.camera_input.reset_deltas();

                window_clone.request_redraw();
            }
            _ => {}
        }
    });

    if let Err(e) = result {
        log::error!("Event loop failed: {}", e);
    }
}

fn render_frame(state: &mut AppState, renderer: &mut Renderer<WgpuBackend>, window: &Window) {
    let AppState {
        egui,
        settings,
        stats,
        ..
    } = state;
    egui.run(window, |ctx| settings_window(ctx, settings, stats));

    if let Err(e) = renderer.render_scene(&state.camera, &state.settings) {
        log::error!("Render error: {}", e);
        return;
    }

    if renderer.frame_active() {
        let (width, height) = renderer.backend().surface_size();
        state.egui.render(renderer.backend_mut(), width, height);
    }

    if let Err(e) = renderer.end_frame() {
        log::error!("Present error: {}", e);
    }
}

fn set_mouse_look(state: &mut AppState, window: &Window, enabled: bool) {
    state.settings.set_mouse_look(enabled);
    let grab = if enabled {
        window
            .set_cursor_grab(CursorGrabMode::Confined)
            .or_else(|_| window.set_cursor_grab(CursorGrabMode::Locked))
    } else {
        window.set_cursor_grab(CursorGrabMode::None)
    };
    if let Err(e) = grab {
        log::warn!("Cursor grab failed: {}", e);
    }
    window.set_cursor_visible(!enabled);
}

fn handle_window_event(
    event: &WindowEvent,
    egui_consumed: bool,
    state: &mut AppState,
    renderer: &mut Renderer<WgpuBackend>,
    window: &Window,
    elwt: &EventLoopWindowTarget<()>,
) {
    match event {
        WindowEvent::CloseRequested => {
            log::info!("Close requested, shutting down...");
            elwt.exit();
        }
        WindowEvent::Resized(size) => {
            if let Err(e) = renderer.resize(size.width, size.height) {
                log::error!("Resize failed: {}", e);
                elwt.exit();
                return;
            }
            let (width, height) = renderer.dimensions();
            state.camera.set_aspect(width as f32, height as f32);
        }
        WindowEvent::RedrawRequested => {
            render_frame(state, renderer, window);
        }
        WindowEvent::KeyboardInput { event, .. } if !egui_consumed => {
            let pressed = event.state == ElementState::Pressed;
            let PhysicalKey::Code(key) = event.physical_key else {
                return;
            };
            match key {
                KeyCode::Escape => elwt.exit(),
                KeyCode::Digit1 if pressed => set_mouse_look(state, window, false),
                KeyCode::Digit2 if pressed => set_mouse_look(state, window, true),
                KeyCode::KeyW => state.camera_input.forward = pressed,
                KeyCode::KeyS => state.camera_input.backward = pressed,
                KeyCode::KeyA => state.camera_input.left = pressed,
                KeyCode::KeyD => state.camera_input.right = pressed,
                KeyCode::KeyQ => state.camera_input.down = pressed,
                KeyCode::KeyE => state.camera_input.up = pressed,
                KeyCode::ShiftLeft | KeyCode::ShiftRight => state.camera_input.sprint = pressed,
                KeyCode::ArrowUp => state.arrows.up = pressed,
                KeyCode::ArrowDown => state.arrows.down = pressed,
                KeyCode::ArrowLeft => state.arrows.left = pressed,
                KeyCode::ArrowRight => state.arrows.right = pressed,
                _ => {}
            }
        }
        WindowEvent::CursorMoved { position, .. } => {
            if egui_consumed && state.egui.wants_pointer_input() {
                return;
            }
            let delta = state
                .settings
                .cursor_moved(position.x as f32, position.y as f32);
            state.camera_input.mouse_delta += delta;
        }
        WindowEvent::MouseWheel { delta, .. } if !egui_consumed => {
            let scroll = match delta {
                MouseScrollDelta::LineDelta(_, y) => *y,
                MouseScrollDelta::PixelDelta(pos) => pos.y as f32 / 100.0,
            };
            state.camera_input.scroll_delta += scroll;
        }
        WindowEvent::Focused(false) => {
            // Release all keys when window loses focus
            state.camera_input = CameraInput::new();
            state.arrows = ArrowKeys::default();
        }
        _ => {}
    }
}
