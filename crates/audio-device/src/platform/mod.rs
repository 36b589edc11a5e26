//! Platform audio drivers
//!
//! An [`AudioDriver`] is the lowest layer: it reports the hardware formats
//! and opens duplex streams that call back into the backend on the
//! hardware's real-time thread. Backends in [`crate::backend`] are built on
//! top of any driver.
//!
//! - [`simulated::SimulatedHardware`] - deterministic in-process hardware for
//!   tests and the demo, always available
//! - `cpal_impl::CpalDriver` - real devices through cpal (feature
//!   `device-cpal`)

pub mod simulated;

#[cfg(feature = "device-cpal")]
pub mod cpal_impl;

use std::sync::Arc;

use crate::delegate::RenderContext;
use crate::error::{AudioResult, RenderError};
use crate::format::{AudioFormat, SampleBuffer, SampleBufferMut};

pub use simulated::SimulatedHardware;

#[cfg(feature = "device-cpal")]
pub use cpal_impl::CpalDriver;

/// Real-time input procedure: receives captured hardware samples
pub type InputProc = Box<dyn FnMut(&RenderContext, SampleBuffer<'_>) -> Result<(), RenderError> + Send>;

/// Real-time output procedure: fills the hardware output buffer
pub type OutputProc = Box<dyn FnMut(&RenderContext, SampleBufferMut<'_>) -> Result<(), RenderError> + Send>;

/// Called when the hardware configuration (route, format) changed
pub type ConfigurationListener = Arc<dyn Fn() + Send + Sync>;

/// Handle returned by listener registration
pub type ListenerId = u64;

/// Parameters for opening a duplex stream
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamRequest {
    /// Format the input procedure receives; `None` disables capture
    pub input: Option<AudioFormat>,
    /// Format the output procedure fills; `None` disables playout
    pub output: Option<AudioFormat>,
    /// Largest cycle the procedures must handle
    pub max_frames: usize,
    /// Route through the voice-processing (echo-cancelling) unit
    pub voice_processing: bool,
    /// Start with the echo canceller bypassed; ignored without voice processing
    pub voice_processing_bypassed: bool,
}

/// Hardware access primitive
pub trait AudioDriver: Send + Sync {
    fn name(&self) -> &str;

    /// Live hardware input format
    fn hardware_input_format(&self) -> AudioFormat;

    /// Live hardware output format
    fn hardware_output_format(&self) -> AudioFormat;

    fn supports_voice_processing(&self) -> bool;

    /// Open a stream; it stays stopped until [`DriverStream::start`]
    fn open(
        &self,
        request: StreamRequest,
        input: Option<InputProc>,
        output: Option<OutputProc>,
    ) -> AudioResult<Box<dyn DriverStream>>;

    fn add_configuration_listener(&self, listener: ConfigurationListener) -> ListenerId;

    fn remove_configuration_listener(&self, id: ListenerId);
}

/// An open hardware stream; dropping it closes the stream
pub trait DriverStream: Send {
    fn start(&mut self) -> AudioResult<()>;

    fn stop(&mut self) -> AudioResult<()>;

    fn is_running(&self) -> bool;

    /// Bypass or re-engage the echo canceller of a voice-processing stream
    /// while it is open. Drivers without a voice-processing unit ignore it.
    fn set_voice_processing_bypassed(&mut self, _bypassed: bool) -> AudioResult<()> {
        Ok(())
    }
}
