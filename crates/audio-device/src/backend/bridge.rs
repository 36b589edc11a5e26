//! Real-time bridges between a backend and the delegate
//!
//! A bridge is built on the control context with everything it needs
//! preallocated: an optional [`FormatConverter`] and a scratch buffer sized
//! for the largest render request. On the real-time thread it only converts
//! into that scratch and calls the delegate. Failures are counted in
//! [`BridgeStats`] instead of being logged.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::converter::{requires_conversion, FormatConverter};
use crate::delegate::{AudioDeviceDelegate, PlayoutData, RecordedData, RenderContext};
use crate::error::{AudioResult, RenderError};
use crate::format::{AudioFormat, SampleBuffer, SampleBufferMut, SampleStorage};

use super::{CaptureCallback, PlayoutCallback};

/// Counters updated from the real-time thread
#[derive(Debug, Default)]
pub struct BridgeStats {
    cycles: AtomicU64,
    frames: AtomicU64,
    failures: AtomicU64,
    silent_cycles: AtomicU64,
}

/// Point-in-time copy of [`BridgeStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStatsSnapshot {
    pub cycles: u64,
    pub frames: u64,
    pub failures: u64,
    pub silent_cycles: u64,
}

impl BridgeStats {
    pub fn snapshot(&self) -> BridgeStatsSnapshot {
        BridgeStatsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            frames: self.frames.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            silent_cycles: self.silent_cycles.load(Ordering::Relaxed),
        }
    }

    fn record(&self, frames: usize, result: &Result<(), RenderError>) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        match result {
            Ok(()) => {
                self.frames.fetch_add(frames as u64, Ordering::Relaxed);
            }
            Err(_) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Capture path: backend client format in, pipeline input format out
pub struct CaptureBridge {
    delegate: Weak<dyn AudioDeviceDelegate>,
    pipeline_format: AudioFormat,
    converter: Option<FormatConverter>,
    scratch: SampleStorage,
    max_frames: usize,
    stats: Arc<BridgeStats>,
}

impl CaptureBridge {
    /// `delivered` is the format the backend hands to the callback
    pub fn new(
        delegate: Weak<dyn AudioDeviceDelegate>,
        delivered: AudioFormat,
        pipeline_format: AudioFormat,
        max_frames: usize,
    ) -> AudioResult<Self> {
        let converter = if requires_conversion(&delivered, &pipeline_format) {
            Some(FormatConverter::new(delivered, pipeline_format)?)
        } else {
            None
        };
        let scratch_samples = if converter.is_some() {
            pipeline_format.samples_for(max_frames)
        } else {
            0
        };
        Ok(Self {
            delegate,
            pipeline_format,
            converter,
            scratch: SampleStorage::zeroed(pipeline_format.sample_format, scratch_samples),
            max_frames,
            stats: Arc::new(BridgeStats::default()),
        })
    }

    pub fn stats(&self) -> Arc<BridgeStats> {
        self.stats.clone()
    }

    pub fn converts(&self) -> bool {
        self.converter.is_some()
    }

    /// Forward one captured cycle to the delegate
    pub fn process(&mut self, context: &RenderContext, samples: SampleBuffer<'_>) -> Result<(), RenderError> {
        let result = self.forward(context, samples);
        self.stats.record(context.frames, &result);
        result
    }

    fn forward(&mut self, context: &RenderContext, samples: SampleBuffer<'_>) -> Result<(), RenderError> {
        let frames = context.frames;
        if frames > self.max_frames {
            return Err(RenderError::TooManyFrames {
                frames,
                capacity: self.max_frames,
            });
        }
        let Some(delegate) = self.delegate.upgrade() else {
            return Err(RenderError::Unavailable);
        };

        let len = self.pipeline_format.samples_for(frames);
        let samples = match &self.converter {
            Some(converter) => {
                converter.convert(frames, samples, self.scratch.slice_mut(len))?;
                self.scratch.slice(len)
            }
            None => samples.truncated(len),
        };

        delegate.deliver_recorded_data(&RecordedData {
            context,
            format: &self.pipeline_format,
            samples,
        })
    }

    pub fn into_callback(mut self) -> CaptureCallback {
        Box::new(move |context, samples| self.process(context, samples))
    }
}

/// Playout path: pipeline output format in, backend client format out
pub struct PlayoutBridge {
    delegate: Weak<dyn AudioDeviceDelegate>,
    pipeline_format: AudioFormat,
    converter: Option<FormatConverter>,
    scratch: SampleStorage,
    max_frames: usize,
    stats: Arc<BridgeStats>,
}

impl PlayoutBridge {
    /// `rendered` is the format the backend expects the callback to fill
    pub fn new(
        delegate: Weak<dyn AudioDeviceDelegate>,
        pipeline_format: AudioFormat,
        rendered: AudioFormat,
        max_frames: usize,
    ) -> AudioResult<Self> {
        let converter = if requires_conversion(&pipeline_format, &rendered) {
            Some(FormatConverter::new(pipeline_format, rendered)?)
        } else {
            None
        };
        let scratch_samples = if converter.is_some() {
            pipeline_format.samples_for(max_frames)
        } else {
            0
        };
        Ok(Self {
            delegate,
            pipeline_format,
            converter,
            scratch: SampleStorage::zeroed(pipeline_format.sample_format, scratch_samples),
            max_frames,
            stats: Arc::new(BridgeStats::default()),
        })
    }

    pub fn stats(&self) -> Arc<BridgeStats> {
        self.stats.clone()
    }

    pub fn converts(&self) -> bool {
        self.converter.is_some()
    }

    /// Pull one cycle from the delegate into `out`
    ///
    /// On failure `out` holds silence and the silence flag is raised.
    pub fn process(
        &mut self,
        context: &RenderContext,
        mut out: SampleBufferMut<'_>,
        silence: &mut bool,
    ) -> Result<(), RenderError> {
        let result = self.pull(context, out.reborrow(), silence);
        if result.is_err() {
            out.fill_silence();
            *silence = true;
        }
        if *silence {
            self.stats.silent_cycles.fetch_add(1, Ordering::Relaxed);
        }
        self.stats.record(context.frames, &result);
        result
    }

    fn pull(&mut self, context: &RenderContext, out: SampleBufferMut<'_>, silence: &mut bool) -> Result<(), RenderError> {
        let frames = context.frames;
        if frames > self.max_frames {
            return Err(RenderError::TooManyFrames {
                frames,
                capacity: self.max_frames,
            });
        }
        let Some(delegate) = self.delegate.upgrade() else {
            return Err(RenderError::Unavailable);
        };

        let len = self.pipeline_format.samples_for(frames);
        match &self.converter {
            Some(converter) => {
                let mut data = PlayoutData {
                    context,
                    format: &self.pipeline_format,
                    samples: self.scratch.slice_mut(len),
                    silence: false,
                };
                delegate.get_playout_data(&mut data)?;
                *silence = data.silence;
                converter.convert(frames, self.scratch.slice(len), out)?;
            }
            None => {
                let mut data = PlayoutData {
                    context,
                    format: &self.pipeline_format,
                    samples: out.truncated(len),
                    silence: false,
                };
                delegate.get_playout_data(&mut data)?;
                *silence = data.silence;
            }
        }
        Ok(())
    }

    pub fn into_callback(mut self) -> PlayoutCallback {
        Box::new(move |context, out, silence| self.process(context, out, silence))
    }
}
