//! Common error infrastructure for world-core.
//!
//! This module provides the shared classification used by every error type in
//! the workspace. Domain-specific errors live next to the operations they
//! guard; [`PlayfieldError`] is defined here because the playfield is the leaf
//! every other component mutates.
//!
//! # Severity classes
//!
//! - **Precondition**: invalid argument or wrong entity placement, raised at the call site
//! - **DomainRule**: the action is not currently possible (blocked move, wrong cell)
//! - **Cancellation**: cooperative shutdown, never logged as a failure
//! - **Defect**: a bug in a program body or an internal inconsistency

use crate::types::{EntityId, PlayfieldId, Position};

/// Severity level of an error, used for categorization and recovery strategies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ErrorSeverity {
    /// Invalid input or placement; the caller must change the request.
    Precondition,

    /// The world currently forbids the action; callers are expected to check
    /// first (`can_move`, `can_run_program_on`).
    DomainRule,

    /// Cooperative cancellation (interrupt, shutdown).
    Cancellation,

    /// Unexpected failure that indicates a bug.
    Defect,
}

impl ErrorSeverity {
    /// Returns a human-readable description of this severity level.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Precondition => "precondition",
            Self::DomainRule => "domain_rule",
            Self::Cancellation => "cancellation",
            Self::Defect => "defect",
        }
    }

    /// Returns true for cooperative cancellation.
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancellation)
    }
}

/// Common trait for all simulation errors.
///
/// - Use `#[derive(thiserror::Error)]` for Display/Error impl
/// - Classify severity by how the caller should react, not by impact
pub trait SimError: core::fmt::Display + core::fmt::Debug {
    /// Returns the severity level of this error.
    fn severity(&self) -> ErrorSeverity;

    /// Returns a static string identifier for this error variant.
    fn error_code(&self) -> &'static str;
}

/// Errors raised by [`crate::Playfield`] mutations and lookups.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PlayfieldError {
    #[error("entity {entity} is already placed on this playfield")]
    AlreadyPlaced { entity: EntityId },

    #[error("entity {entity} is already placed on {playfield}")]
    OnAnotherPlayfield {
        entity: EntityId,
        playfield: PlayfieldId,
    },

    #[error("entity {entity} is not placed on this playfield")]
    NotPlaced { entity: EntityId },

    #[error("supplied move action does not describe {entity} moving from {from} to {to}")]
    MoveActionMismatch {
        entity: EntityId,
        from: Position,
        to: Position,
    },
}

impl SimError for PlayfieldError {
    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::MoveActionMismatch { .. } => ErrorSeverity::Defect,
            _ => ErrorSeverity::Precondition,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::AlreadyPlaced { .. } => "PLAYFIELD_ALREADY_PLACED",
            Self::OnAnotherPlayfield { .. } => "PLAYFIELD_ON_ANOTHER_PLAYFIELD",
            Self::NotPlaced { .. } => "PLAYFIELD_NOT_PLACED",
            Self::MoveActionMismatch { .. } => "PLAYFIELD_MOVE_ACTION_MISMATCH",
        }
    }
}
