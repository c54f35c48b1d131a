//! Error Types
//!
//! This module defines the error types used throughout the frame core.
//!
//! # Overview
//!
//! The main error type [`FrameError`] covers the failure modes that must reach
//! the caller:
//! - Capability checks that fail while constructing a GPU resource
//! - Scene integrity violations (e.g. a sub-mesh range outside its geometry)
//! - Errors raised by collaborators from inside stage callbacks
//! - Settings parsing errors
//!
//! Configuration problems that only affect a single frame (no active camera,
//! lost graphics context) are *not* errors: they are logged and the frame is
//! skipped. Resources that are still loading are skipped silently.
//!
//! # Usage
//!
//! All fallible public APIs return [`Result<T>`], an alias for
//! `std::result::Result<T, FrameError>`.
//!
//! ```rust,ignore
//! use myth_frame::errors::{FrameError, Result};
//!
//! fn before_draw(ctx: &mut StageContext<'_>) -> Result<()> {
//!     Err(FrameError::collaborator("shadow generator not initialised"))
//! }
//! ```

use thiserror::Error;

use crate::gpu::api::ResourceKind;

/// The main error type for the frame core.
#[derive(Error, Debug)]
pub enum FrameError {
    // ========================================================================
    // Frame Lifecycle Errors
    // ========================================================================
    /// `render()` was invoked while another frame of the same scheduler was
    /// still running (e.g. from inside a stage callback).
    #[error("A frame is already in progress")]
    FrameInProgress,

    /// An operation that needs a camera was invoked while none is active.
    #[error("No active camera defined")]
    NoActiveCamera,

    // ========================================================================
    // GPU & Capability Errors
    // ========================================================================
    /// A resource needs a device capability that is not available.
    #[error("Missing device capability: {0}")]
    CapabilityMissing(&'static str),

    /// The graphics API refused to create a native object.
    #[error("Failed to create {kind}: {reason}")]
    ResourceCreationFailed {
        /// Kind of the resource that could not be created
        kind: ResourceKind,
        /// Human readable reason
        reason: String,
    },

    /// Every texture unit is pinned by the draw currently being prepared.
    #[error("All {units} texture units are locked by the current draw")]
    TextureUnitsExhausted {
        /// Hardware texture unit count
        units: u32,
    },

    /// A handle refers to a resource that was disposed.
    #[error("Unknown or disposed {0} handle")]
    UnknownHandle(&'static str),

    // ========================================================================
    // Scene Integrity Errors
    // ========================================================================
    /// A sub-mesh range does not fit its geometry.
    #[error("Sub-mesh range {start}..{end} exceeds geometry bounds ({len} elements)")]
    SubMeshOutOfBounds {
        /// First element of the range
        start: u32,
        /// One past the last element of the range
        end: u32,
        /// Number of indices (or vertices) in the geometry
        len: u32,
    },

    // ========================================================================
    // Collaborator Errors
    // ========================================================================
    /// Raised by a collaborator (stage callback, animator, physics stepper).
    #[error("Collaborator error: {0}")]
    Collaborator(String),

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Settings JSON could not be parsed.
    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl FrameError {
    /// Convenience constructor for collaborator failures.
    pub fn collaborator(message: impl Into<String>) -> Self {
        Self::Collaborator(message.into())
    }
}

/// Alias for `Result<T, FrameError>`.
pub type Result<T> = std::result::Result<T, FrameError>;
