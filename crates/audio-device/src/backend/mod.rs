//! Hardware backends
//!
//! A [`HardwareBackend`] is the capability surface the adapter drives. Two
//! strategies implement it over any [`AudioDriver`]:
//!
//! - [`FusedUnitBackend`]: one I/O unit with input/output enable flags and a
//!   settable client format per bus. Capture and playout share a single
//!   running/stopped lifecycle; formats and flags only change while render
//!   resources are released.
//! - [`GraphBackend`]: a processing graph with a sink node (capture) and a
//!   source node (playout) attached on demand, a pass-through equalizer
//!   anchoring the input branch, and a mixer branch for background audio.
//!
//! Installed callbacks run on the hardware's real-time thread. They sit in a
//! [`CallbackSlot`] which the real-time side only ever `try_lock`s, so
//! installing or removing a callback never blocks audio and a callback is
//! never entered after `remove_*_callback` returns.

pub mod bridge;
pub mod fused;
pub mod graph;

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::BackendKind;
use crate::delegate::RenderContext;
use crate::error::{AudioError, AudioResult, RenderError};
use crate::format::{AudioFormat, Direction, SampleBuffer, SampleBufferMut};
use crate::platform::{AudioDriver, ConfigurationListener};

pub use bridge::{BridgeStats, BridgeStatsSnapshot, CaptureBridge, PlayoutBridge};
pub use fused::FusedUnitBackend;
pub use graph::{GraphBackend, TestTone};

/// Receives captured samples in the backend's capture client format
pub type CaptureCallback = Box<dyn FnMut(&RenderContext, SampleBuffer<'_>) -> Result<(), RenderError> + Send>;

/// Fills playout samples in the backend's playout client format and raises
/// the silence flag when there is no payload
pub type PlayoutCallback =
    Box<dyn FnMut(&RenderContext, SampleBufferMut<'_>, &mut bool) -> Result<(), RenderError> + Send>;

/// Shared slot holding a real-time callback
pub type CallbackSlot<T> = Arc<Mutex<Option<T>>>;

/// Options fixed at backend creation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackendOptions {
    /// Use the echo-cancelling voice-processing unit
    pub voice_processing: bool,
    /// Largest real-time cycle buffers are sized for
    pub maximum_frames_to_render: usize,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            voice_processing: false,
            maximum_frames_to_render: 1024,
        }
    }
}

/// Capability surface driven by the adapter
pub trait HardwareBackend: Send {
    fn kind(&self) -> BackendKind;

    fn is_input_enabled(&self) -> bool;

    /// Only allowed while render resources are released
    fn set_input_enabled(&mut self, enabled: bool) -> AudioResult<()>;

    fn is_output_enabled(&self) -> bool;

    /// Only allowed while render resources are released
    fn set_output_enabled(&mut self, enabled: bool) -> AudioResult<()>;

    fn is_running(&self) -> bool;

    fn render_resources_allocated(&self) -> bool;

    fn allocate_resources(&mut self) -> AudioResult<()>;

    /// Stops hardware first if needed
    fn release_resources(&mut self);

    /// Requires allocated render resources
    fn start(&mut self) -> AudioResult<()>;

    fn stop(&mut self);

    /// Format on the input side of `bus`; for [`INPUT_BUS`](crate::format::INPUT_BUS)
    /// this is the live hardware input format
    fn native_input_format(&self, bus: u32) -> AudioFormat;

    /// Format on the output side of `bus`; for [`OUTPUT_BUS`](crate::format::OUTPUT_BUS)
    /// this is the live hardware output format
    fn native_output_format(&self, bus: u32) -> AudioFormat;

    /// Hardware sample rate when the backend was created
    fn hardware_sample_rate(&self) -> f64;

    /// Whether the format callbacks see in `direction` can be chosen
    fn accepts_client_format(&self, direction: Direction) -> bool;

    /// Format installed callbacks see in `direction`
    fn client_format(&self, direction: Direction) -> AudioFormat;

    fn set_client_format(&mut self, direction: Direction, format: AudioFormat) -> AudioResult<()>;

    /// Hardware format the open stream was allocated with, if any
    ///
    /// Differs from the native format after a route change the stream has
    /// not been rebuilt for.
    fn allocated_hardware_format(&self, _direction: Direction) -> Option<AudioFormat> {
        None
    }

    fn install_capture_callback(&mut self, callback: CaptureCallback) -> AudioResult<()>;

    /// Returns whether a callback was installed
    fn remove_capture_callback(&mut self) -> bool;

    fn has_capture_callback(&self) -> bool;

    fn install_playout_callback(&mut self, callback: PlayoutCallback) -> AudioResult<()>;

    /// Returns whether a callback was installed
    fn remove_playout_callback(&mut self) -> bool;

    fn has_playout_callback(&self) -> bool;

    fn supports_builtin_echo_cancellation(&self) -> bool;

    /// Whether this instance runs through the voice-processing unit
    fn is_echo_cancellation_enabled(&self) -> bool;

    fn is_echo_cancellation_bypassed(&self) -> bool;

    fn set_echo_cancellation_bypassed(&mut self, bypassed: bool);

    /// Replace the hardware configuration-change listener
    fn set_configuration_change_listener(&mut self, listener: Option<ConfigurationListener>);

    /// (Re)start background audio; only the graph has any
    fn start_background_audio(&mut self) -> AudioResult<()> {
        Ok(())
    }

    /// Multi-line state dump for logs
    fn describe(&self) -> String;
}

impl fmt::Debug for dyn HardwareBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HardwareBackend")
            .field("kind", &self.kind())
            .field("running", &self.is_running())
            .finish()
    }
}

pub(crate) fn checked_format(direction: Direction, format: AudioFormat) -> AudioResult<AudioFormat> {
    if format.is_sample_rate_and_channel_count_valid() {
        Ok(format)
    } else {
        Err(AudioError::InvalidFormat { direction, format })
    }
}

pub(crate) fn start_error(error: AudioError) -> AudioError {
    match error {
        AudioError::HardwareStart { .. } => error,
        other => AudioError::start(other.to_string()),
    }
}

/// Creates backend instances for the adapter
pub trait BackendFactory: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Whether the hardware offers a voice-processing unit at all
    fn supports_voice_processing(&self) -> bool;

    fn create(&self, options: BackendOptions) -> AudioResult<Box<dyn HardwareBackend>>;
}

/// Factory building either backend strategy over an [`AudioDriver`]
pub struct DriverBackendFactory {
    kind: BackendKind,
    driver: Arc<dyn AudioDriver>,
    background_tone: Option<TestTone>,
}

impl fmt::Debug for DriverBackendFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverBackendFactory")
            .field("kind", &self.kind)
            .field("driver", &self.driver.name())
            .field("background_tone", &self.background_tone)
            .finish()
    }
}

impl DriverBackendFactory {
    pub fn new(kind: BackendKind, driver: Arc<dyn AudioDriver>) -> Self {
        Self {
            kind,
            driver,
            background_tone: None,
        }
    }

    /// Loop `tone` on the graph's mixer branch while playing
    pub fn with_background_tone(mut self, tone: TestTone) -> Self {
        self.background_tone = Some(tone);
        self
    }
}

impl BackendFactory for DriverBackendFactory {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn supports_voice_processing(&self) -> bool {
        self.driver.supports_voice_processing()
    }

    fn create(&self, options: BackendOptions) -> AudioResult<Box<dyn HardwareBackend>> {
        match self.kind {
            BackendKind::FusedUnit => Ok(Box::new(FusedUnitBackend::new(self.driver.clone(), options)?)),
            BackendKind::Graph => {
                let mut graph = GraphBackend::new(self.driver.clone(), options)?;
                if let Some(tone) = self.background_tone {
                    graph.set_background_tone(tone);
                }
                Ok(Box::new(graph))
            }
        }
    }
}
