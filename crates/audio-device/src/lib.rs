//! # rtcaudio-device: Audio I/O Session Coordinator
//!
//! Bridges native audio hardware to a real-time media pipeline that consumes
//! and produces fixed-format PCM. The [`AudioDeviceAdapter`] reconciles a
//! desired state (play on/off, record on/off) against the hardware's actual
//! state and reacts to interruptions, route changes and media-services
//! resets.
//!
//! ## Layers
//!
//! - [`adapter`]: lifecycle and the reconcile state machine
//! - [`backend`]: the two hardware strategies (fused I/O unit and processing
//!   graph) plus the real-time bridges between them and the delegate
//! - [`platform`]: drivers that open actual streams (simulated, and cpal
//!   behind the `device-cpal` feature)
//! - [`session`] and [`events`]: the platform audio session and its event
//!   subscription
//! - [`delegate`]: what the transport layer implements, and a ready-made
//!   control queue
//! - [`converter`] and [`format`]: PCM formats and conversion
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rtcaudio_device::{AdapterConfig, AudioDeviceAdapter, AudioDeviceDelegate, SimulatedHardware};
//!
//! # fn run(delegate: Arc<dyn AudioDeviceDelegate>) -> Result<(), Box<dyn std::error::Error>> {
//! let hardware = SimulatedHardware::default();
//! let adapter = AudioDeviceAdapter::with_simulated_hardware(AdapterConfig::voice_chat(), &hardware)?;
//! adapter.initialize(&delegate);
//! adapter.start_playout();
//! adapter.start_recording();
//! hardware.render_cycle(480);
//! adapter.terminate();
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `device-cpal`: real audio devices through cpal

pub mod adapter;
pub mod backend;
pub mod config;
pub mod converter;
pub mod delegate;
pub mod error;
pub mod events;
pub mod format;
pub mod platform;
pub mod session;
pub mod utils;

pub use adapter::{AudioDeviceAdapter, DesiredState, Lifecycle, RuntimeState};
pub use backend::{
    BackendFactory, BackendOptions, BridgeStatsSnapshot, DriverBackendFactory, FusedUnitBackend, GraphBackend,
    HardwareBackend, TestTone,
};
pub use config::{AdapterConfig, BackendKind, EchoCancellationPolicy, StereoInputPolicy};
pub use converter::FormatConverter;
pub use delegate::{AudioDeviceDelegate, ControlQueue, ControlTask, PlayoutData, RecordedData, RenderContext};
pub use error::{AudioError, AudioResult, ConvertError, RenderError};
pub use events::{SessionEventBus, SessionEventHandler};
pub use format::{AudioFormat, Direction, SampleBuffer, SampleBufferMut, SampleFormat, INPUT_BUS, OUTPUT_BUS};
pub use platform::{AudioDriver, DriverStream, SimulatedHardware};
pub use session::{AudioSession, HostSession, RouteChangeReason, SessionCategory, SessionEvent, SessionMode, SimulatedSession};

#[cfg(feature = "device-cpal")]
pub use platform::CpalDriver;

/// Version of the crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
