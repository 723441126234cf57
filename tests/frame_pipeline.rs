//! End-to-end frame recording against the command-recording backend

use std::collections::HashSet;

use hybrid_renderer::backend::recording::{RecordedCommand, RecordingBackend};
use hybrid_renderer::backend::GraphicsBackend;
use hybrid_renderer::pipeline::gbuffer_pass::GeometryFrameUniform;
use hybrid_renderer::scene::{Camera, Scene, TriangleGpu, TriangleIdAllocator};
use hybrid_renderer::{EngineConfig, GBufferRenderMode, RenderSettings, Renderer};
use rstest::rstest;

fn renderer(width: u32, height: u32, lights: usize) -> Renderer<RecordingBackend> {
    let backend = RecordingBackend::headless(width, height);
    let config = EngineConfig {
        light_count: lights,
        ..Default::default()
    };
    let scene = Scene::demo(lights, config.light_seed);
    Renderer::new(backend, config, scene).unwrap()
}

fn render_one_frame(renderer: &mut Renderer<RecordingBackend>) {
    renderer.backend_mut().clear_commands();
    renderer
        .render(&Camera::default(), &RenderSettings::default())
        .unwrap();
}

#[test]
fn frame_runs_geometry_shadows_composite_markers() {
    let mut renderer = renderer(64, 48, 3);
    render_one_frame(&mut renderer);

    let backend = renderer.backend();
    assert_eq!(
        backend.compute_pass_labels(),
        ["shadow_pass_0", "shadow_pass_1", "shadow_pass_2"]
    );
    assert_eq!(
        backend.render_pass_labels(),
        ["Geometry Pass", "Deferred Lighting Pass", "Light Markers"]
    );
    assert_eq!(backend.frames_presented(), 1);

    // Geometry is recorded before the first dispatch, the composite after the last
    let commands = backend.commands();
    let first = |pred: &dyn Fn(&RecordedCommand) -> bool| commands.iter().position(pred).unwrap();
    let geometry_end = first(&|c| matches!(c, RecordedCommand::EndRenderPass));
    let first_dispatch = first(&|c| matches!(c, RecordedCommand::Dispatch { .. }));
    let last_dispatch = commands
        .iter()
        .rposition(|c| matches!(c, RecordedCommand::Dispatch { .. }))
        .unwrap();
    let composite_begin = commands
        .iter()
        .position(|c| {
            matches!(c, RecordedCommand::BeginRenderPass { label, .. }
                if label.as_deref() == Some("Deferred Lighting Pass"))
        })
        .unwrap();
    assert!(geometry_end < first_dispatch);
    assert!(last_dispatch < composite_begin);
}

/// Commands recorded inside the geometry render pass
fn geometry_pass_commands(backend: &RecordingBackend) -> &[RecordedCommand] {
    let commands = backend.commands();
    let begin = commands
        .iter()
        .position(|c| {
            matches!(c, RecordedCommand::BeginRenderPass { label, .. }
                if label.as_deref() == Some("Geometry Pass"))
        })
        .unwrap();
    let end = begin
        + commands[begin..]
            .iter()
            .position(|c| *c == RecordedCommand::EndRenderPass)
            .unwrap();
    &commands[begin + 1..end]
}

#[test]
fn geometry_pass_draws_each_object_then_the_floor() {
    let mut renderer = renderer(64, 48, 2);
    render_one_frame(&mut renderer);
    let objects = renderer.scene().objects.len();
    let commands = geometry_pass_commands(renderer.backend());

    let draws: Vec<usize> = commands
        .iter()
        .enumerate()
        .filter(|(_, c)| matches!(c, RecordedCommand::DrawIndexed { .. }))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(draws.len(), objects + 1);

    // Cube draws cover 36 indices, the floor quad 6
    for (n, &i) in draws.iter().enumerate() {
        let RecordedCommand::DrawIndexed { indices, .. } = &commands[i] else {
            unreachable!()
        };
        let expected = if n < objects { 36 } else { 6 };
        assert_eq!(indices.len(), expected);
    }

    let materials: Vec<(usize, _)> = commands
        .iter()
        .enumerate()
        .filter_map(|(i, c)| match c {
            RecordedCommand::SetBindGroup { index: 2, bind_group } => Some((i, *bind_group)),
            _ => None,
        })
        .collect();
    assert_eq!(materials.len(), 2);
    let (object_at, object_material) = materials[0];
    let (floor_at, floor_material) = materials[1];
    assert!(object_at < draws[0]);
    assert!(draws[objects - 1] < floor_at && floor_at < draws[objects]);
    assert_ne!(object_material, floor_material);

    // Every draw has its own instance uniforms
    let instances: Vec<_> = commands
        .iter()
        .filter_map(|c| match c {
            RecordedCommand::SetBindGroup { index: 1, bind_group } => Some(*bind_group),
            _ => None,
        })
        .collect();
    assert_eq!(instances.len(), objects + 1);
    let distinct: HashSet<_> = instances.iter().collect();
    assert_eq!(distinct.len(), objects + 1);
}

#[rstest]
#[case(GBufferRenderMode::Texture, 0)]
#[case(GBufferRenderMode::Position, 1)]
#[case(GBufferRenderMode::Normals, 2)]
#[case(GBufferRenderMode::Albedo, 3)]
#[case(GBufferRenderMode::Specular, 4)]
fn render_mode_reaches_geometry_uniforms(#[case] mode: GBufferRenderMode, #[case] index: u32) {
    let mut renderer = renderer(32, 32, 1);
    let settings = RenderSettings {
        gbuffer_mode: mode,
        ..Default::default()
    };
    renderer.backend_mut().clear_commands();
    renderer.render(&Camera::default(), &settings).unwrap();

    let uniform_size = std::mem::size_of::<GeometryFrameUniform>() as u64;
    let buffer = renderer
        .backend()
        .commands()
        .iter()
        .find_map(|c| match c {
            RecordedCommand::WriteBuffer { buffer, size, .. } if *size == uniform_size => {
                Some(*buffer)
            }
            _ => None,
        })
        .unwrap();
    let bytes = renderer.backend().buffer_data(buffer).unwrap();
    let uniform: GeometryFrameUniform =
        bytemuck::pod_read_unaligned(&bytes[..uniform_size as usize]);
    assert_eq!(uniform.render_mode, index);
    assert_eq!(uniform.camera.position, Camera::default().position.extend(1.0));
}

#[test]
fn barrier_separates_consecutive_shadow_dispatches() {
    let mut renderer = renderer(64, 48, 4);
    render_one_frame(&mut renderer);

    let commands = renderer.backend().commands();
    let dispatches: Vec<usize> = commands
        .iter()
        .enumerate()
        .filter(|(_, c)| matches!(c, RecordedCommand::Dispatch { .. }))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(dispatches.len(), 4);

    for pair in dispatches.windows(2) {
        let between = &commands[pair[0]..pair[1]];
        assert!(
            between.contains(&RecordedCommand::MemoryBarrier),
            "no barrier between dispatches at {} and {}",
            pair[0],
            pair[1]
        );
    }

    // The composite also waits for the last dispatch
    let last = *dispatches.last().unwrap();
    assert!(commands[last..].contains(&RecordedCommand::MemoryBarrier));
}

#[test]
fn zero_lights_issue_no_dispatches() {
    let mut renderer = renderer(64, 48, 0);
    render_one_frame(&mut renderer);

    let backend = renderer.backend();
    assert_eq!(backend.dispatch_count(), 0);
    assert!(backend.compute_pass_labels().is_empty());
    assert_eq!(
        backend.render_pass_labels(),
        ["Geometry Pass", "Deferred Lighting Pass"]
    );
    let shadows = renderer.shadow_array();
    assert!(shadows.layer_views.is_empty());
    assert_eq!(
        backend.texture_descriptor(shadows.texture).unwrap().array_layers,
        1
    );
}

#[rstest]
#[case(64, 48, (4, 3))]
#[case(100, 30, (7, 2))]
#[case(16, 16, (1, 1))]
fn dispatch_covers_every_pixel(
    #[case] width: u32,
    #[case] height: u32,
    #[case] groups: (u32, u32),
) {
    let mut renderer = renderer(width, height, 1);
    render_one_frame(&mut renderer);

    let dispatch = renderer
        .backend()
        .commands()
        .iter()
        .find_map(|c| match c {
            RecordedCommand::Dispatch { x, y, z } => Some((*x, *y, *z)),
            _ => None,
        })
        .unwrap();
    assert_eq!(dispatch, (groups.0, groups.1, 1));
}

#[test]
fn resize_changes_dispatch_extent() {
    let mut renderer = renderer(64, 48, 2);
    renderer.resize(130, 20).unwrap();
    render_one_frame(&mut renderer);

    let backend = renderer.backend();
    assert_eq!(backend.surface_size(), (130, 20));
    assert!(backend
        .commands()
        .iter()
        .filter(|c| matches!(c, RecordedCommand::Dispatch { .. }))
        .all(|c| *c == RecordedCommand::Dispatch { x: 9, y: 2, z: 1 }));
}

#[test]
fn resizing_releases_replaced_views_and_bind_groups() {
    let mut renderer = renderer(64, 48, 4);
    let live = |r: &Renderer<RecordingBackend>| {
        let backend = r.backend();
        (
            backend.live_texture_count(),
            backend.live_view_count(),
            backend.live_bind_group_count(),
        )
    };
    let before = live(&renderer);

    for step in 0..10 {
        let (width, height) = if step % 2 == 0 { (96, 80) } else { (64, 48) };
        renderer.resize(width, height).unwrap();
    }
    assert_eq!(renderer.dimensions(), (64, 48));
    assert_eq!(live(&renderer), before);

    render_one_frame(&mut renderer);
    assert_eq!(renderer.backend().dispatch_count(), 4);
}

#[test]
fn uploaded_triangles_read_back_byte_identical() {
    let mut renderer = renderer(32, 32, 2);
    let expected = renderer
        .scene()
        .build_triangles(&mut TriangleIdAllocator::new());
    assert_eq!(expected.len(), renderer.scene().triangle_count());

    let scene_buffer = *renderer.scene_buffer();
    let read_back = scene_buffer.read_back(renderer.backend_mut()).unwrap();
    assert_eq!(read_back, expected);

    let bytes = renderer.backend().buffer_data(scene_buffer.buffer).unwrap();
    assert_eq!(bytes, bytemuck::cast_slice::<TriangleGpu, u8>(&expected));
    for record in bytes.chunks_exact(std::mem::size_of::<TriangleGpu>()) {
        assert!(record[68..80].iter().all(|&b| b == 0));
    }
}

#[test]
fn extra_end_frame_does_not_present_again() {
    let mut renderer = renderer(32, 32, 1);
    render_one_frame(&mut renderer);
    render_one_frame(&mut renderer);
    renderer.end_frame().unwrap();
    assert_eq!(renderer.backend().frames_presented(), 2);
}
