//! Extension Stage Tests
//!
//! Tests for:
//! - Registration order execution
//! - Deferred removal requested from inside a running stage
//! - Error propagation leaving the registry intact
//! - Reductions: readiness (AND), rebind flags (OR), pointer picks (first)
//! - Pointer stages driven through `FrameScheduler::simulate_pointer`

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use myth_frame::gpu::{GpuStateCache, RecordingApi};
use myth_frame::render::{FrameInfo, FrameScheduler, PointerEvent, PointerKind, StageContext, StageRegistry, StepId};
use myth_frame::scene::{Camera, Drawable, DrawableKind, Scene};
use myth_frame::{EngineSettings, FrameError};

type Log = Rc<RefCell<Vec<&'static str>>>;

fn fixture() -> (Scene, GpuStateCache) {
    let (api, _probe) = RecordingApi::new();
    (Scene::new(), GpuStateCache::new(Box::new(api), None))
}

fn logging_step(log: &Log, name: &'static str) -> Box<dyn FnMut(&mut StageContext<'_>) -> myth_frame::Result<()>> {
    let log = Rc::clone(log);
    Box::new(move |_ctx| {
        log.borrow_mut().push(name);
        Ok(())
    })
}

// ============================================================================
// Ordering & Removal
// ============================================================================

#[test]
fn steps_run_in_registration_order() {
    let (mut scene, mut gpu) = fixture();
    let mut registry = StageRegistry::new();
    let log: Log = Rc::default();
    registry.before_clear.register("a", logging_step(&log, "a"));
    registry.before_clear.register("b", logging_step(&log, "b"));
    registry.before_clear.register("c", logging_step(&log, "c"));

    let mut ctx = StageContext::new(&mut scene, &mut gpu, FrameInfo::default());
    registry.run(&mut ctx, |stages, ctx| stages.before_clear.run(ctx)).unwrap();

    assert_eq!(*log.borrow(), vec!["a", "b", "c"]);
}

#[test]
fn self_removal_applies_after_the_stage() {
    let (mut scene, mut gpu) = fixture();
    let mut registry = StageRegistry::new();
    let log: Log = Rc::default();
    let own_id: Rc<Cell<Option<StepId>>> = Rc::default();

    let step_log = Rc::clone(&log);
    let step_id = Rc::clone(&own_id);
    let id = registry.after_render.register(
        "once",
        Box::new(move |ctx| {
            step_log.borrow_mut().push("a");
            if let Some(id) = step_id.get() {
                ctx.unregister(id);
            }
            Ok(())
        }),
    );
    own_id.set(Some(id));
    registry.after_render.register("b", logging_step(&log, "b"));

    for _ in 0..2 {
        let mut ctx = StageContext::new(&mut scene, &mut gpu, FrameInfo::default());
        registry.run(&mut ctx, |stages, ctx| stages.after_render.run(ctx)).unwrap();
    }

    assert_eq!(*log.borrow(), vec!["a", "b", "b"]);
    assert_eq!(registry.after_render.len(), 1);
}

#[test]
fn removing_a_later_step_still_runs_it_this_time() {
    let (mut scene, mut gpu) = fixture();
    let mut registry = StageRegistry::new();
    let log: Log = Rc::default();
    let victim: Rc<Cell<Option<StepId>>> = Rc::default();

    let step_log = Rc::clone(&log);
    let target = Rc::clone(&victim);
    registry.before_camera_update.register(
        "remover",
        Box::new(move |ctx| {
            step_log.borrow_mut().push("remover");
            if let Some(id) = target.take() {
                ctx.unregister(id);
            }
            Ok(())
        }),
    );
    victim.set(Some(registry.before_camera_update.register("victim", logging_step(&log, "victim"))));

    for _ in 0..2 {
        let mut ctx = StageContext::new(&mut scene, &mut gpu, FrameInfo::default());
        registry.run(&mut ctx, |stages, ctx| stages.before_camera_update.run(ctx)).unwrap();
    }

    assert_eq!(*log.borrow(), vec!["remover", "victim", "remover"]);
}

// ============================================================================
// Errors
// ============================================================================

#[test]
fn error_stops_the_stage_and_propagates() {
    let (mut scene, mut gpu) = fixture();
    let mut registry = StageRegistry::new();
    let log: Log = Rc::default();
    registry.after_render.register("ok", logging_step(&log, "ok"));
    registry
        .after_render
        .register("failing", Box::new(|_ctx| Err(FrameError::collaborator("post-process failed"))));
    registry.after_render.register("never", logging_step(&log, "never"));

    let mut ctx = StageContext::new(&mut scene, &mut gpu, FrameInfo::default());
    let result = registry.run(&mut ctx, |stages, ctx| stages.after_render.run(ctx));

    assert!(matches!(result, Err(FrameError::Collaborator(ref message)) if message == "post-process failed"));
    assert_eq!(*log.borrow(), vec!["ok"]);
    assert_eq!(registry.after_render.len(), 3);
    assert_eq!(registry.after_render.components().collect::<Vec<_>>(), vec!["ok", "failing", "never"]);
}

#[test]
fn removals_apply_even_when_the_stage_fails() {
    let (mut scene, mut gpu) = fixture();
    let mut registry = StageRegistry::new();
    let own_id: Rc<Cell<Option<StepId>>> = Rc::default();

    let step_id = Rc::clone(&own_id);
    let id = registry.before_clear.register(
        "fragile",
        Box::new(move |ctx| {
            if let Some(id) = step_id.get() {
                ctx.unregister(id);
            }
            Err(FrameError::collaborator("gone"))
        }),
    );
    own_id.set(Some(id));

    let mut ctx = StageContext::new(&mut scene, &mut gpu, FrameInfo::default());
    assert!(registry.run(&mut ctx, |stages, ctx| stages.before_clear.run(ctx)).is_err());
    assert!(registry.before_clear.is_empty());
}

// ============================================================================
// Reductions
// ============================================================================

#[test]
fn readiness_is_the_and_of_all_steps() {
    let (mut scene, mut gpu) = fixture();
    let mesh = scene.add_mesh(Drawable::new("m", DrawableKind::mesh()));
    let mut registry = StageRegistry::new();
    let calls = Rc::new(Cell::new(0));

    registry.is_ready_for_mesh.register("ready", Box::new(|_ctx, _mesh, _instanced| Ok(true)));
    let counter = Rc::clone(&calls);
    registry.is_ready_for_mesh.register(
        "loading",
        Box::new(move |_ctx, _mesh, _instanced| {
            counter.set(counter.get() + 1);
            Ok(false)
        }),
    );

    let mut ctx = StageContext::new(&mut scene, &mut gpu, FrameInfo::default());
    let ready = registry
        .run(&mut ctx, |stages, ctx| stages.is_ready_for_mesh.run(ctx, mesh, false))
        .unwrap();
    assert!(!ready);
    assert_eq!(calls.get(), 1);
}

#[test]
fn rebind_flag_is_the_or_of_all_steps() {
    let (mut scene, mut gpu) = fixture();
    let camera = scene.add_camera(Camera::new_perspective(60.0, 1.0, 0.1, 100.0));
    let mut registry = StageRegistry::new();
    registry.before_camera_draw.register("quiet", Box::new(|_ctx, _camera| Ok(false)));
    registry.before_camera_draw.register("rebinds", Box::new(|_ctx, _camera| Ok(true)));
    registry.before_camera_draw.register("quiet2", Box::new(|_ctx, _camera| Ok(false)));

    let mut ctx = StageContext::new(&mut scene, &mut gpu, FrameInfo::default());
    let rebind = registry
        .run(&mut ctx, |stages, ctx| stages.before_camera_draw.run(ctx, camera))
        .unwrap();
    assert!(rebind);
}

#[test]
fn first_pointer_pick_wins_and_every_step_runs() {
    let (mut scene, mut gpu) = fixture();
    let first = scene.add_mesh(Drawable::new("first", DrawableKind::mesh()));
    let second = scene.add_mesh(Drawable::new("second", DrawableKind::mesh()));

    let mut scheduler = FrameScheduler::new(EngineSettings::default());
    let calls = Rc::new(Cell::new(0));
    let stages = scheduler.stages_mut();
    stages.pointer_down.register("miss", Box::new(|_ctx, _event| Ok(None)));
    let counter = Rc::clone(&calls);
    stages.pointer_down.register(
        "hit-first",
        Box::new(move |_ctx, _event| {
            counter.set(counter.get() + 1);
            Ok(Some(first))
        }),
    );
    let counter = Rc::clone(&calls);
    stages.pointer_down.register(
        "hit-second",
        Box::new(move |_ctx, _event| {
            counter.set(counter.get() + 1);
            Ok(Some(second))
        }),
    );

    let event = PointerEvent {
        kind: PointerKind::Down,
        x: 10.0,
        y: 20.0,
        button: 0,
    };
    let picked = scheduler.simulate_pointer(&mut gpu, &mut scene, &event).unwrap();
    assert_eq!(picked, Some(first));
    assert_eq!(calls.get(), 2);

    let moved = PointerEvent {
        kind: PointerKind::Move,
        ..event
    };
    assert_eq!(scheduler.simulate_pointer(&mut gpu, &mut scene, &moved).unwrap(), None);
}

#[test]
fn components_register_once() {
    let mut registry = StageRegistry::new();
    let log: Log = Rc::default();
    for _ in 0..3 {
        let log = Rc::clone(&log);
        registry.ensure_component("octree", move |registry| {
            registry.before_clear.register("octree", logging_step(&log, "octree"));
        });
    }
    assert!(registry.has_component("octree"));
    assert_eq!(registry.before_clear.len(), 1);
}
