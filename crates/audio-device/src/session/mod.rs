//! Audio session collaborator
//!
//! The audio session is the process-wide routing/category service of the
//! host. The adapter never reaches for it globally: an [`AudioSession`] is
//! injected at construction so tests can substitute
//! [`SimulatedSession`](simulated::SimulatedSession). Desktop hosts use
//! [`HostSession`](host::HostSession).

pub mod host;
pub mod simulated;

use std::fmt;

use crossbeam_channel::Receiver;
use serde::{Deserialize, Serialize};

use crate::error::AudioResult;

pub use host::HostSession;
pub use simulated::SimulatedSession;

/// Session category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionCategory {
    Ambient,
    SoloAmbient,
    Playback,
    Record,
    PlayAndRecord,
    MultiRoute,
}

/// Session mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    Default,
    VoiceChat,
    VideoChat,
    GameChat,
    Measurement,
}

/// Why an interruption began
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptionReason {
    /// Another session took over the hardware
    Default,
    /// The application was suspended; not a real interruption
    AppWasSuspended,
    /// The built-in microphone was muted
    BuiltInMicMuted,
    /// The route in use went away
    RouteDisconnected,
}

/// Options attached to the end of an interruption
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InterruptionOptions {
    pub should_resume: bool,
}

/// Why the audio route changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteChangeReason {
    Unknown,
    NewDeviceAvailable,
    OldDeviceUnavailable,
    CategoryChange,
    Override,
    WakeFromSleep,
    NoSuitableRouteForCategory,
    RouteConfigurationChange,
}

impl fmt::Display for RouteChangeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RouteChangeReason::Unknown => "unknown",
            RouteChangeReason::NewDeviceAvailable => "new device available",
            RouteChangeReason::OldDeviceUnavailable => "old device unavailable",
            RouteChangeReason::CategoryChange => "category change",
            RouteChangeReason::Override => "override",
            RouteChangeReason::WakeFromSleep => "wake from sleep",
            RouteChangeReason::NoSuitableRouteForCategory => "no suitable route for category",
            RouteChangeReason::RouteConfigurationChange => "route configuration change",
        };
        f.write_str(name)
    }
}

/// Process-wide lifecycle notification emitted by the session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionEvent {
    InterruptionBegan {
        reason: Option<InterruptionReason>,
        /// Legacy flag carried by older platforms instead of a reason
        was_suspended: bool,
    },
    InterruptionEnded {
        options: InterruptionOptions,
    },
    RouteChanged {
        reason: RouteChangeReason,
    },
    MediaServicesReset,
    MediaServicesLost,
}

/// Session configuration collaborator
///
/// Durations and latencies are in seconds. Preferred-value requests are best
/// effort; the session may grant something else.
pub trait AudioSession: Send + Sync {
    fn category(&self) -> SessionCategory;

    fn mode(&self) -> SessionMode;

    /// Whether the category/mode pair implies hardware voice processing
    fn supports_voice_processing(&self) -> bool {
        self.category() == SessionCategory::PlayAndRecord
            && matches!(self.mode(), SessionMode::VoiceChat | SessionMode::VideoChat)
    }

    /// Current hardware sample rate
    fn sample_rate(&self) -> f64;

    /// Current hardware IO buffer duration
    fn io_buffer_duration(&self) -> f64;

    fn input_channels(&self) -> u16;

    fn output_channels(&self) -> u16;

    fn max_input_channels(&self) -> u16;

    fn max_output_channels(&self) -> u16;

    fn input_latency(&self) -> f64;

    fn output_latency(&self) -> f64;

    fn is_input_available(&self) -> bool;

    fn set_preferred_sample_rate(&self, sample_rate: f64) -> AudioResult<()>;

    fn set_preferred_io_buffer_duration(&self, duration: f64) -> AudioResult<()>;

    /// Select a stereo-capable input route and polar pattern
    fn configure_stereo_input(&self) -> AudioResult<()>;

    /// New receiver of lifecycle events; dropping it unsubscribes
    fn subscribe_events(&self) -> Receiver<SessionEvent>;

    /// One-line dump of the session state for logs
    fn described_state(&self) -> String {
        format!(
            "category={:?} mode={:?} sampleRate={} ioBufferDuration={:.4} \
             inputChannels={}/{} outputChannels={}/{} inputLatency={:.4} \
             outputLatency={:.4} inputAvailable={}",
            self.category(),
            self.mode(),
            self.sample_rate(),
            self.io_buffer_duration(),
            self.input_channels(),
            self.max_input_channels(),
            self.output_channels(),
            self.max_output_channels(),
            self.input_latency(),
            self.output_latency(),
            self.is_input_available(),
        )
    }
}
