//! Adapter configuration and presets
//!
//! [`AdapterConfig`] selects the hardware backend strategy and fixes the
//! pipeline-facing sample representation. Everything else (sample rate,
//! buffer duration, hardware channel counts) is negotiated at runtime with
//! the session collaborator.
//!
//! # Examples
//!
//! ```rust
//! use rtcaudio_device::config::{AdapterConfig, BackendKind, EchoCancellationPolicy};
//!
//! let config = AdapterConfig::new()
//!     .with_backend(BackendKind::Graph)
//!     .with_echo_cancellation(EchoCancellationPolicy::Auto)
//!     .with_max_input_channels(1);
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.max_input_channels, 1);
//! ```
//!
//! ## Loading from JSON
//!
//! ```rust
//! use rtcaudio_device::config::{AdapterConfig, BackendKind};
//!
//! let config = AdapterConfig::from_json_str(r#"{ "backend": "fused_unit" }"#).unwrap();
//! assert_eq!(config.backend, BackendKind::FusedUnit);
//! assert_eq!(config.maximum_frames_to_render, 1024);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{AudioError, AudioResult};
use crate::format::SampleFormat;

/// Hardware backend strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Single I/O unit with input/output enable flags and per-bus formats
    FusedUnit,
    /// Processing graph with attachable source (playout) and sink (capture) nodes
    Graph,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::FusedUnit => write!(f, "fused-unit"),
            BackendKind::Graph => write!(f, "graph"),
        }
    }
}

/// When hardware echo cancellation (voice processing) is used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EchoCancellationPolicy {
    /// Follow the session category/mode
    Auto,
    /// Always request voice processing
    Always,
    /// Never request voice processing
    Never,
}

impl EchoCancellationPolicy {
    /// Resolve against what the session currently implies
    pub fn resolve(self, session_supports_voice_processing: bool) -> bool {
        match self {
            EchoCancellationPolicy::Auto => session_supports_voice_processing,
            EchoCancellationPolicy::Always => true,
            EchoCancellationPolicy::Never => false,
        }
    }
}

/// Handling of the stereo input route selection made when hardware echo
/// cancellation is unavailable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StereoInputPolicy {
    /// Never touch the input route
    Disabled,
    /// Request a stereo route; failures are logged
    Preferred,
    /// Request a stereo route; failure is a host misconfiguration and stops
    /// the process
    Required,
}

/// Audio device adapter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Hardware backend strategy
    pub backend: BackendKind,
    /// Echo cancellation policy
    pub echo_cancellation: EchoCancellationPolicy,
    /// Sample representation handed to the media pipeline
    pub pipeline_sample_format: SampleFormat,
    /// Whether pipeline buffers are interleaved
    pub pipeline_interleaved: bool,
    /// Upper bound for negotiated capture channels
    pub max_input_channels: u16,
    /// Upper bound for negotiated playout channels
    pub max_output_channels: u16,
    /// Largest render request the real-time buffers are sized for
    pub maximum_frames_to_render: usize,
    /// Stereo input route handling
    pub stereo_input: StereoInputPolicy,
    /// Forward the delegate's preferred sample rate and IO buffer duration
    /// to the session collaborator
    pub apply_preferred_parameters: bool,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Graph,
            echo_cancellation: EchoCancellationPolicy::Auto,
            pipeline_sample_format: SampleFormat::I16,
            pipeline_interleaved: true,
            max_input_channels: 2,
            max_output_channels: 2,
            maximum_frames_to_render: 1024,
            stereo_input: StereoInputPolicy::Preferred,
            apply_preferred_parameters: true,
        }
    }
}

impl AdapterConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Mono voice call through a fused voice-processing unit
    pub fn voice_chat() -> Self {
        Self {
            backend: BackendKind::FusedUnit,
            echo_cancellation: EchoCancellationPolicy::Always,
            max_input_channels: 1,
            max_output_channels: 1,
            stereo_input: StereoInputPolicy::Disabled,
            ..Self::default()
        }
    }

    /// Stereo capture through the graph backend, without echo cancellation
    pub fn stereo_capture() -> Self {
        Self {
            backend: BackendKind::Graph,
            echo_cancellation: EchoCancellationPolicy::Never,
            max_input_channels: 2,
            max_output_channels: 2,
            stereo_input: StereoInputPolicy::Preferred,
            ..Self::default()
        }
    }

    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json_str(json: &str) -> AudioResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| AudioError::configuration(format!("invalid adapter config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_echo_cancellation(mut self, policy: EchoCancellationPolicy) -> Self {
        self.echo_cancellation = policy;
        self
    }

    pub fn with_pipeline_format(mut self, sample_format: SampleFormat, interleaved: bool) -> Self {
        self.pipeline_sample_format = sample_format;
        self.pipeline_interleaved = interleaved;
        self
    }

    pub fn with_max_input_channels(mut self, channels: u16) -> Self {
        self.max_input_channels = channels;
        self
    }

    pub fn with_max_output_channels(mut self, channels: u16) -> Self {
        self.max_output_channels = channels;
        self
    }

    pub fn with_maximum_frames_to_render(mut self, frames: usize) -> Self {
        self.maximum_frames_to_render = frames;
        self
    }

    pub fn with_stereo_input(mut self, policy: StereoInputPolicy) -> Self {
        self.stereo_input = policy;
        self
    }

    pub fn with_preferred_parameters(mut self, apply: bool) -> Self {
        self.apply_preferred_parameters = apply;
        self
    }

    /// Check the configuration for values the adapter cannot work with
    pub fn validate(&self) -> AudioResult<()> {
        if self.max_input_channels == 0 || self.max_output_channels == 0 {
            return Err(AudioError::configuration("channel limits must be at least 1"));
        }
        if self.maximum_frames_to_render == 0 {
            return Err(AudioError::configuration("maximum_frames_to_render must be positive"));
        }
        Ok(())
    }
}
