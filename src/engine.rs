//! Engine Core Module
//!
//! This module contains [`Engine`], the context object shared by every scene
//! rendered on one graphics context. There are no process-wide engine or
//! scene registries: everything that needs the GPU receives the engine (or
//! its [`GpuStateCache`]) explicitly.
//!
//! # Architecture
//!
//! - **`GpuStateCache`**: sole writer of GPU state, owns every GPU resource
//! - **Settings**: lockstep and rendering options
//! - **Timer**: wall-clock frame deltas fed to the scheduler
//!
//! Scenes and their [`FrameScheduler`]s live outside the engine; several
//! scenes may share one engine but must render one after the other.
//!
//! # Example
//!
//! ```rust,ignore
//! use myth_frame::{Engine, EngineSettings, FrameScheduler, Scene};
//! use myth_frame::gpu::RecordingApi;
//!
//! let (api, _probe) = RecordingApi::new();
//! let mut engine = Engine::new(Box::new(api), EngineSettings::default());
//! let mut scheduler = FrameScheduler::new(*engine.settings());
//! let mut scene = Scene::new();
//!
//! loop {
//!     let report = engine.run_frame(&mut scheduler, &mut scene)?;
//!     // ... present ...
//! }
//! ```

use std::time::Duration;

use crate::errors::Result;
use crate::gpu::{GpuStateCache, GraphicsApi};
use crate::render::scheduler::{FrameReport, FrameScheduler};
use crate::scene::{RenderTarget, RenderTargetDesc, Scene};
use crate::settings::EngineSettings;
use crate::utils::Timer;

/// Surface size used until the first [`Engine::resize`].
pub const DEFAULT_SURFACE_SIZE: (u32, u32) = (1280, 720);

/// The context object owning the graphics state of one context.
///
/// # Lifecycle
///
/// 1. Create with [`Engine::new`] around a [`GraphicsApi`]
/// 2. Render with [`Engine::run_frame`] (or [`Engine::advance_frame`] for a
///    fixed delta)
/// 3. Tear down with [`Engine::dispose`]
pub struct Engine {
    pub(crate) gpu: GpuStateCache,
    settings: EngineSettings,
    timer: Timer,
    surface: (u32, u32),
}

impl Engine {
    /// Wraps a graphics context. Capabilities are probed immediately.
    #[must_use]
    pub fn new(api: Box<dyn GraphicsApi>, mut settings: EngineSettings) -> Self {
        settings.sanitize();
        let gpu = GpuStateCache::new(api, settings.rendering.texture_unit_limit);
        log::info!(
            "Engine created ({} texture units, instancing: {})",
            gpu.capabilities().max_texture_units,
            gpu.capabilities().instanced_arrays
        );
        Self {
            gpu,
            settings,
            timer: Timer::new(),
            surface: DEFAULT_SURFACE_SIZE,
        }
    }

    #[inline]
    #[must_use]
    pub fn gpu(&self) -> &GpuStateCache {
        &self.gpu
    }

    #[inline]
    pub fn gpu_mut(&mut self) -> &mut GpuStateCache {
        &mut self.gpu
    }

    #[inline]
    #[must_use]
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    #[inline]
    #[must_use]
    pub fn timer(&self) -> &Timer {
        &self.timer
    }

    /// Returns the current surface size in pixels as `(width, height)`.
    #[inline]
    #[must_use]
    pub fn surface_size(&self) -> (u32, u32) {
        self.surface
    }

    /// Handles surface resize events. Zero sizes are clamped to one pixel.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.surface = (width.max(1), height.max(1));
    }

    /// Matches the aspect ratio of the scene's active cameras to the surface.
    pub fn fit_cameras(&self, scene: &mut Scene) {
        let aspect = self.surface.0 as f32 / self.surface.1 as f32;
        let cameras: Vec<_> = scene.active_camera.into_iter().chain(scene.active_cameras.iter().copied()).collect();
        for key in cameras {
            if let Some(camera) = scene.camera_mut(key) {
                camera.set_aspect(aspect);
            }
        }
    }

    /// Creates an offscreen render target.
    ///
    /// Fails with `CapabilityMissing` when the target needs a depth texture
    /// the device cannot provide.
    pub fn create_render_target(&mut self, desc: RenderTargetDesc) -> Result<RenderTarget> {
        RenderTarget::create(&mut self.gpu, desc)
    }

    // ========================================================================
    // Frame
    // ========================================================================

    /// Measures the frame delta and renders one frame of `scene`.
    pub fn run_frame(&mut self, scheduler: &mut FrameScheduler, scene: &mut Scene) -> Result<FrameReport> {
        self.timer.tick();
        self.finish_frame(scheduler, scene)
    }

    /// Renders one frame as if `delta` had elapsed (replays, offline
    /// rendering, tests).
    pub fn advance_frame(
        &mut self,
        scheduler: &mut FrameScheduler,
        scene: &mut Scene,
        delta: Duration,
    ) -> Result<FrameReport> {
        self.timer.advance(delta);
        self.finish_frame(scheduler, scene)
    }

    fn finish_frame(&mut self, scheduler: &mut FrameScheduler, scene: &mut Scene) -> Result<FrameReport> {
        let report = scheduler.render(self, scene);
        if !self.settings.rendering.prevent_cache_wipe_between_frames {
            self.gpu.wipe_caches();
        }
        report
    }

    /// Releases every GPU object of `scene`, then every remaining native
    /// object of the context.
    pub fn dispose(mut self, scene: &mut Scene) {
        scene.release_gpu_resources(&mut self.gpu);
        self.gpu.dispose_all();
        log::info!("Engine disposed after {} frames", self.timer.frame_count);
    }
}
