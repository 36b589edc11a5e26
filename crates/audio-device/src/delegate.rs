//! Transport-layer capability consumed by the adapter
//!
//! The media-transport layer implements [`AudioDeviceDelegate`] and hands it
//! to [`AudioDeviceAdapter::initialize`](crate::adapter::AudioDeviceAdapter::initialize).
//! The adapter only keeps a weak reference and stops calling into the
//! delegate once `terminate` returns.
//!
//! The delegate also owns the control context: every asynchronous adapter
//! action (event handling, coalesced reconciles) is scheduled through
//! [`AudioDeviceDelegate::dispatch_async`]. [`ControlQueue`] is a ready-made
//! serialized executor for delegates that don't bring their own.

use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::{AudioError, AudioResult, RenderError};
use crate::format::{AudioFormat, SampleBuffer, SampleBufferMut};

/// Unit of work scheduled onto the control context
pub type ControlTask = Box<dyn FnOnce() + Send + 'static>;

/// Timing information for one real-time cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderContext {
    /// Running sample counter of the hardware stream
    pub sample_time: u64,
    /// Frames in this cycle
    pub frames: usize,
    /// Bus the data belongs to ([`INPUT_BUS`](crate::format::INPUT_BUS) or
    /// [`OUTPUT_BUS`](crate::format::OUTPUT_BUS))
    pub bus: u32,
}

/// Captured samples in the negotiated pipeline input format
#[derive(Debug)]
pub struct RecordedData<'a> {
    pub context: &'a RenderContext,
    pub format: &'a AudioFormat,
    pub samples: SampleBuffer<'a>,
}

/// Buffer to fill with playout samples in the negotiated pipeline output
/// format
#[derive(Debug)]
pub struct PlayoutData<'a> {
    pub context: &'a RenderContext,
    pub format: &'a AudioFormat,
    pub samples: SampleBufferMut<'a>,
    /// Set when the buffer carries no useful payload
    pub silence: bool,
}

/// Hooks the transport layer exposes to the adapter
///
/// `deliver_recorded_data` and `get_playout_data` run on the hardware's
/// real-time thread and must neither block nor allocate. Everything else is
/// called on the control context.
pub trait AudioDeviceDelegate: Send + Sync {
    /// Push captured samples into the pipeline
    fn deliver_recorded_data(&self, data: &RecordedData<'_>) -> Result<(), RenderError>;

    /// Pull samples to play
    fn get_playout_data(&self, data: &mut PlayoutData<'_>) -> Result<(), RenderError>;

    /// The pipeline input format changed
    fn notify_input_parameters_changed(&self, format: &AudioFormat);

    /// The pipeline output format changed
    fn notify_output_parameters_changed(&self, format: &AudioFormat);

    /// Capture stopped delivering data
    fn notify_input_interrupted(&self);

    /// Playout stopped pulling data
    fn notify_output_interrupted(&self);

    /// Sample rate the pipeline would like to capture at
    fn preferred_input_sample_rate(&self) -> f64;

    /// IO buffer duration in seconds the pipeline would like for capture
    fn preferred_input_io_buffer_duration(&self) -> f64;

    fn preferred_output_sample_rate(&self) -> f64;

    fn preferred_output_io_buffer_duration(&self) -> f64;

    /// Run `task` on the control context, after everything scheduled before it
    fn dispatch_async(&self, task: ControlTask);
}

/// Serialized executor backing a control context
///
/// Tasks run one at a time, in submission order, on a dedicated thread.
pub struct ControlQueue {
    name: String,
    sender: Mutex<Option<mpsc::UnboundedSender<ControlTask>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
}

impl std::fmt::Debug for ControlQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlQueue")
            .field("name", &self.name)
            .field("running", &self.sender.lock().is_some())
            .finish()
    }
}

impl ControlQueue {
    /// Spawn the queue thread
    pub fn new(name: impl Into<String>) -> AudioResult<Arc<Self>> {
        let name = name.into();
        let (tx, mut rx) = mpsc::unbounded_channel::<ControlTask>();

        let handle = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                while let Some(task) = rx.blocking_recv() {
                    task();
                }
            })
            .map_err(|e| AudioError::platform(format!("failed to spawn control queue: {}", e)))?;

        debug!("Control queue '{}' started", name);
        Ok(Arc::new(Self {
            name,
            worker_id: handle.thread().id(),
            sender: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(handle)),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the calling thread is the queue thread
    pub fn is_current(&self) -> bool {
        std::thread::current().id() == self.worker_id
    }

    /// Schedule `task`; returns false once the queue is shut down
    pub fn dispatch(&self, task: ControlTask) -> bool {
        match self.sender.lock().as_ref() {
            Some(sender) => sender.send(task).is_ok(),
            None => {
                warn!("Control queue '{}' is shut down, dropping task", self.name);
                false
            }
        }
    }

    /// Run `f` on the queue and wait for its result
    ///
    /// Runs inline when already on the queue thread. Returns `None` if the
    /// queue is shut down. Must not be called from inside an async task.
    pub fn run_sync<R, F>(&self, f: F) -> Option<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        if self.is_current() {
            return Some(f());
        }
        let (tx, rx) = oneshot::channel();
        let task: ControlTask = Box::new(move || {
            let _ = tx.send(f());
        });
        if !self.dispatch(task) {
            return None;
        }
        rx.blocking_recv().ok()
    }

    /// Stop accepting tasks, drain the ones already queued and join the thread
    pub fn shutdown(&self) {
        let sender = self.sender.lock().take();
        if sender.is_none() {
            return;
        }
        drop(sender);

        if self.is_current() {
            // The thread exits on its own once the current task returns
            return;
        }
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                warn!("Control queue '{}' worker panicked", self.name);
            }
        }
        debug!("Control queue '{}' stopped", self.name);
    }
}

impl Drop for ControlQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}
