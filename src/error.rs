//! Error types for Synheart Breath

use thiserror::Error;

/// Errors that can occur while configuring or persisting a breathing session.
///
/// The numeric core (signal generation, phase scheduling) is infallible; these
/// errors only surface at the configuration, pattern-loading and storage edges.
#[derive(Debug, Error)]
pub enum BreathError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid breathing pattern: {0}")]
    InvalidPattern(String),

    #[error("Unknown pattern: {0}")]
    UnknownPattern(String),

    #[error("Invalid timer: {0}")]
    InvalidTimer(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Failures reported by external collaborators (haptics, voice, audio).
///
/// These never stop a session; the effect dispatcher logs and drops them.
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("Capability not supported on this device: {0}")]
    Unsupported(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Collaborator failed: {0}")]
    Failed(String),
}
