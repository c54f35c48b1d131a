//! Renders a few frames of a small scene on the recording backend and
//! prints what the frame core did.
//!
//! ```text
//! RUST_LOG=debug cargo run --example headless_frame
//! ```

use std::time::Duration;

use glam::Vec3;

use myth_frame::gpu::{ProgramDesc, RecordingApi};
use myth_frame::scene::{Camera, Drawable, DrawableKind, Geometry, Material, RenderTargetDesc, Scene, TransparencyMode};
use myth_frame::{Engine, EngineSettings, FrameScheduler};

fn program(label: &str) -> ProgramDesc {
    ProgramDesc {
        label: label.to_string(),
        vertex_source: "void main() {}".to_string(),
        fragment_source: "void main() {}".to_string(),
        defines: Vec::new(),
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let settings = EngineSettings::from_json(r#"{ "lockstep": { "enabled": true, "max_sub_steps": 3 } }"#)?;
    let (api, probe) = RecordingApi::new();
    let mut engine = Engine::new(Box::new(api), settings);
    let mut scheduler = FrameScheduler::new(*engine.settings());
    let mut scene = Scene::new();

    // === Scene ===
    let quad = scene.add_geometry(
        Geometry::new(
            "quad",
            vec![
                Vec3::new(-0.5, -0.5, 0.0),
                Vec3::new(0.5, -0.5, 0.0),
                Vec3::new(0.5, 0.5, 0.0),
                Vec3::new(-0.5, 0.5, 0.0),
            ],
        )
        .with_indices(vec![0, 1, 2, 2, 3, 0]),
    );
    let opaque = scene.add_material(Material::new("opaque", program("opaque")));
    let mut glass = Material::new("glass", program("glass"));
    glass.transparency = TransparencyMode::AlphaBlend;
    let glass = scene.add_material(glass);

    for i in 0..8 {
        let mut mesh = Drawable::new(format!("quad{i}"), DrawableKind::mesh());
        mesh.geometry = Some(quad);
        mesh.material = Some(if i % 2 == 0 { opaque } else { glass });
        mesh.transform.position = Vec3::new(i as f32 - 4.0, 0.0, -(i as f32));
        mesh.rendering_group_id = if i == 7 { 1 } else { 0 };
        scene.add_mesh(mesh);
    }

    let mirror = engine.create_render_target(RenderTargetDesc::new("mirror", 256, 256))?;
    let mirror = scene.add_render_target(mirror);
    scene.custom_render_targets.push(mirror);
    scene.add_camera(Camera::new_perspective(60.0, 16.0 / 9.0, 0.1, 100.0));

    // === Frames ===
    for _ in 0..3 {
        let report = engine.advance_frame(&mut scheduler, &mut scene, Duration::from_millis(40))?;
        println!(
            "frame {}: {:?}, {} steps, {} drawn, {} skipped, {} targets, {} native calls issued / {} skipped",
            report.frame_id,
            report.outcome,
            report.animation_steps,
            report.drawn_entries,
            report.skipped_entries,
            report.targets_rendered,
            report.cache.issued,
            report.cache.skipped,
        );
        probe.clear();
    }

    println!("groups drawn: {:?}", scheduler.trace().group_sequence());
    println!("settings: {}", engine.settings().to_json()?);
    engine.dispose(&mut scene);
    Ok(())
}
