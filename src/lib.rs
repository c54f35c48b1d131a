#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

//! Per-frame rendering core: frame scheduling, active mesh selection,
//! rendering groups and a redundancy-filtering GPU state cache.

pub mod engine;
pub mod errors;
pub mod gpu;
pub mod render;
pub mod scene;
pub mod settings;
pub mod utils;

pub use engine::Engine;
pub use errors::{FrameError, Result};
pub use gpu::{GpuStateCache, GraphicsApi, RecordingApi, TextureUnitAllocator};
pub use render::{
    ActiveObjectSelector, FrameReport, FrameScheduler, RenderingDispatcher, StageContext, StagePoint, StageRegistry,
};
pub use scene::{Camera, Drawable, Geometry, Material, RenderTarget, Scene};
pub use settings::{EngineSettings, LockstepSettings, RenderingSettings};
