//! State cache and frame benchmarks on the recording backend.

use std::hint::black_box;
use std::time::Duration;

use criterion::{Criterion, criterion_group, criterion_main};
use glam::Vec3;
use slotmap::SlotMap;

use myth_frame::gpu::{
    BlendMode, DepthState, GpuStateCache, PixelViewport, ProgramDesc, RecordingApi, TextureKey,
    TextureUnitAllocator,
};
use myth_frame::scene::{Camera, Drawable, DrawableKind, Geometry, Material, Scene};
use myth_frame::{Engine, EngineSettings, FrameScheduler};

fn program(label: &str) -> ProgramDesc {
    ProgramDesc {
        label: label.to_string(),
        vertex_source: "void main() {}".to_string(),
        fragment_source: "void main() {}".to_string(),
        defines: Vec::new(),
    }
}

fn bench_redundant_state(c: &mut Criterion) {
    let _ = env_logger::builder().is_test(true).try_init();
    let (api, probe) = RecordingApi::new();
    let mut gpu = GpuStateCache::new(Box::new(api), None);
    let program = gpu.register_program(program("basic"));
    let viewport = PixelViewport::new(0, 0, 1280, 720);

    c.bench_function("redundant_state_calls", |b| {
        b.iter(|| {
            for _ in 0..64 {
                black_box(gpu.set_viewport(black_box(viewport), false));
                black_box(gpu.use_program(Some(program), false));
                black_box(gpu.set_depth_state(DepthState::default(), false));
                black_box(gpu.set_blend_mode(BlendMode::Disabled, false));
            }
        });
    });
    black_box(probe.calls().len());
}

fn bench_texture_unit_churn(c: &mut Criterion) {
    let mut arena: SlotMap<TextureKey, ()> = SlotMap::with_key();
    let textures: Vec<TextureKey> = (0..32).map(|_| arena.insert(())).collect();
    let mut allocator = TextureUnitAllocator::new(16);

    c.bench_function("texture_unit_churn", |b| {
        b.iter(|| {
            for (i, texture) in textures.iter().enumerate() {
                if i % 4 == 0 {
                    allocator.begin_draw();
                }
                black_box(allocator.acquire(black_box(*texture)).ok());
            }
        });
    });
}

fn bench_frame(c: &mut Criterion) {
    let (api, probe) = RecordingApi::new();
    let mut engine = Engine::new(Box::new(api), EngineSettings::default());
    let mut scheduler = FrameScheduler::new(*engine.settings());
    let mut scene = Scene::new();

    let geometry = scene.add_geometry(Geometry::new(
        "triangle",
        vec![Vec3::new(-0.5, -0.5, 0.0), Vec3::new(0.5, -0.5, 0.0), Vec3::new(0.0, 0.5, 0.0)],
    ));
    let materials: Vec<_> = (0..4)
        .map(|i| scene.add_material(Material::new(format!("m{i}"), program(&format!("m{i}")))))
        .collect();
    for i in 0..256_usize {
        let mut mesh = Drawable::new(format!("mesh{i}"), DrawableKind::mesh());
        mesh.geometry = Some(geometry);
        mesh.material = Some(materials[i % materials.len()]);
        mesh.transform.position = Vec3::new((i % 16) as f32 - 8.0, (i / 16) as f32 - 8.0, -20.0);
        scene.add_mesh(mesh);
    }
    scene.add_camera(Camera::new_perspective(60.0, 16.0 / 9.0, 0.1, 100.0));

    c.bench_function("frame_256_meshes", |b| {
        b.iter(|| {
            let report = engine
                .advance_frame(&mut scheduler, &mut scene, Duration::from_millis(16))
                .unwrap();
            black_box(report.drawn_entries);
            probe.clear();
        });
    });
}

criterion_group!(benches, bench_redundant_state, bench_texture_unit_churn, bench_frame);
criterion_main!(benches);
