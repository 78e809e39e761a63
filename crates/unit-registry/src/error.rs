//! Error types for the unit registry

use crate::models::UnitStatus;
use thiserror::Error;

/// Unit registry error type
///
/// Errors are cheap to clone so that one failure can be handed to every
/// caller waiting on the same reroute.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Unit not found
    #[error("Unit not found: {0}")]
    UnitNotFound(String),

    /// Unit already registered
    #[error("Unit already registered: {0}")]
    UnitExists(String),

    /// Invalid unit name
    #[error("Invalid unit name: {0:?}")]
    InvalidName(String),

    /// Invalid status transition
    #[error("Invalid status transition for unit '{unit}': {from} -> {to}")]
    InvalidStatusTransition {
        /// Unit name
        unit: String,
        /// Current status
        from: UnitStatus,
        /// Attempted status
        to: UnitStatus,
    },

    /// Exports of a unit do not satisfy the lifecycle contract
    #[error("Unit '{unit}' has malformed exports: {reason}")]
    MalformedUnit {
        /// Unit name
        unit: String,
        /// What is missing or invalid
        reason: String,
    },
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
