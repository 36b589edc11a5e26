//! Error types for the audio device adapter
//!
//! Two families of errors live here:
//!
//! - [`AudioError`] is returned from control-context operations (backend
//!   construction, format negotiation, session requests). It may carry owned
//!   strings and is only ever built off the real-time thread.
//! - [`ConvertError`] and [`RenderError`] are `Copy`, allocation free status
//!   values used on the real-time render/capture path.

use thiserror::Error;

use crate::format::{AudioFormat, Direction};

/// Result type for audio device operations
pub type AudioResult<T> = std::result::Result<T, AudioError>;

/// Errors raised by the adapter, its backends and its collaborators
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AudioError {
    /// A preferred value was rejected by the session collaborator
    #[error("Audio session configuration rejected: {message}")]
    Configuration { message: String },

    /// The processing unit or graph could not be created or configured
    #[error("Hardware construction failed: {message}")]
    HardwareConstruction { message: String },

    /// Render resources could not be allocated
    #[error("Failed to allocate render resources: {message}")]
    ResourceAllocation { message: String },

    /// Hardware could not be started
    #[error("Failed to start audio hardware: {message}")]
    HardwareStart { message: String },

    /// Operation requires hardware to be stopped or in another state
    #[error("Invalid hardware state: {message}")]
    InvalidState { message: String },

    /// Conversion between the two formats is not a pure representation change
    #[error("Unsupported conversion from {from} to {to}: {reason}")]
    UnsupportedConversion {
        from: AudioFormat,
        to: AudioFormat,
        reason: &'static str,
    },

    /// A format is unusable (zero/NaN sample rate, zero channels)
    #[error("Invalid {direction} format: {format}")]
    InvalidFormat {
        direction: Direction,
        format: AudioFormat,
    },

    /// Microphone access denied; surfaced by the session collaborator only
    #[error("Microphone permission denied")]
    PermissionDenied,

    /// The platform does not offer this capability
    #[error("Not supported: {feature}")]
    Unsupported { feature: String },

    /// Any other platform error
    #[error("Platform audio error: {message}")]
    Platform { message: String },

    /// Real-time status surfaced on the control context
    #[error(transparent)]
    Convert(#[from] ConvertError),
}

impl AudioError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a hardware construction error
    pub fn hardware(message: impl Into<String>) -> Self {
        Self::HardwareConstruction {
            message: message.into(),
        }
    }

    /// Create a resource allocation error
    pub fn allocation(message: impl Into<String>) -> Self {
        Self::ResourceAllocation {
            message: message.into(),
        }
    }

    /// Create a hardware start error
    pub fn start(message: impl Into<String>) -> Self {
        Self::HardwareStart {
            message: message.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create an unsupported feature error
    pub fn unsupported(feature: impl Into<String>) -> Self {
        Self::Unsupported {
            feature: feature.into(),
        }
    }

    /// Create a platform error
    pub fn platform(message: impl Into<String>) -> Self {
        Self::Platform {
            message: message.into(),
        }
    }

    /// Whether a reconcile pass hitting this error leaves hardware quiesced
    /// (as opposed to merely "not running, retry later")
    pub fn quiesces_hardware(&self) -> bool {
        !matches!(
            self,
            AudioError::ResourceAllocation { .. } | AudioError::HardwareStart { .. }
        )
    }
}

/// Status returned by [`FormatConverter::convert`](crate::converter::FormatConverter::convert)
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvertError {
    /// Source buffer holds fewer samples than `frames` requires
    #[error("Source buffer too small: need {needed} samples, got {actual}")]
    SourceTooSmall { needed: usize, actual: usize },

    /// Destination buffer holds fewer samples than `frames` requires
    #[error("Destination buffer too small: need {needed} samples, got {actual}")]
    DestinationTooSmall { needed: usize, actual: usize },

    /// Frame count exceeds the converter's preallocated scratch
    #[error("Frame count {frames} exceeds converter capacity {capacity}")]
    CapacityExceeded { frames: usize, capacity: usize },

    /// Buffer sample representation does not match the converter's format
    #[error("Buffer sample representation does not match the converter format")]
    RepresentationMismatch,
}

/// Status returned by real-time capture/playout callbacks
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderError {
    /// Converter status, propagated unmodified
    #[error("Conversion failed: {0}")]
    Convert(#[from] ConvertError),

    /// Transport layer returned a non-zero status
    #[error("Delegate returned status {0}")]
    Delegate(i32),

    /// Hardware asked for more frames than the preallocated buffers hold
    #[error("Render request of {frames} frames exceeds capacity {capacity}")]
    TooManyFrames { frames: usize, capacity: usize },

    /// No callback could be reached without blocking
    #[error("Render callback unavailable")]
    Unavailable,
}
