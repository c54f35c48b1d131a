//! Per-Frame Rendering Core
//!
//! | Module | Role |
//! |--------|------|
//! | [`stage`] | Typed extension points collaborators hook into |
//! | [`selector`] | Per-camera culling, LOD and sub-mesh selection |
//! | [`dispatcher`] | Rendering groups, sorting and draw submission |
//! | [`scheduler`] | Frame phases, lockstep animation, camera and target passes |
//! | [`trace`] | Record of every draw issued during the last frame |
//!
//! Data flows one way per camera:
//!
//! ```text
//! FrameScheduler ─► ActiveObjectSelector ─► RenderingDispatcher ─► GpuStateCache
//!        │                  │                       │
//!        └──────────── StageRegistry callbacks ─────┘
//! ```

pub mod dispatcher;
pub mod scheduler;
pub mod selector;
pub mod stage;
pub mod trace;

pub use dispatcher::{
    AutoClearPolicy, DispatchStats, DrawPass, GroupOrder, MAX_RENDERING_GROUPS, RenderEntry, RenderingDispatcher,
    SortComparator, alpha_index_then_back_to_front, back_to_front, front_to_back, registration_order,
};
pub use scheduler::{
    Animator, AssetEvent, FrameInfo, FrameObservers, FrameOutcome, FramePhase, FrameReport, FrameScheduler,
    PhysicsStepper, SkipReason,
};
pub use selector::{ActiveObjectSelector, AllMeshes, CandidateProvider, SelectionPass, SelectionStats};
pub use stage::{PointerEvent, PointerKind, Stage, StageContext, StagePoint, StageRegistry, StepId};
pub use trace::{DrawRecord, FrameTrace, RenderClass};
