//! Delegate that plays captured audio back out
//!
//! Channel 0 of every captured cycle goes into a lock-free ring; playout
//! pops from it and writes each sample to every output channel. The ring
//! halves sit behind mutexes only to satisfy `&self`; the real-time side
//! never waits on them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rtcaudio_device::{
    AudioDeviceDelegate, AudioFormat, ControlQueue, ControlTask, PlayoutData, RecordedData, RenderError,
    SampleBuffer, SampleBufferMut,
};
use rtrb::{Consumer, Producer, RingBuffer};
use tracing::info;

const I16_SCALE: f32 = 32768.0;

/// Counters for the summary line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopbackStats {
    pub captured_frames: u64,
    pub played_frames: u64,
    pub overruns: u64,
    pub underruns: u64,
    pub input_changes: u64,
    pub output_changes: u64,
    pub interruptions: u64,
}

#[derive(Default)]
struct Counters {
    captured_frames: AtomicU64,
    played_frames: AtomicU64,
    overruns: AtomicU64,
    underruns: AtomicU64,
    input_changes: AtomicU64,
    output_changes: AtomicU64,
    interruptions: AtomicU64,
}

pub struct LoopbackDelegate {
    queue: Arc<ControlQueue>,
    producer: Mutex<Producer<f32>>,
    consumer: Mutex<Consumer<f32>>,
    counters: Counters,
    preferred_sample_rate: f64,
    preferred_io_buffer_duration: f64,
}

impl LoopbackDelegate {
    /// `capacity` is the ring size in mono frames
    pub fn new(queue: Arc<ControlQueue>, capacity: usize, preferred_sample_rate: f64) -> Self {
        let (producer, consumer) = RingBuffer::new(capacity);
        Self {
            queue,
            producer: Mutex::new(producer),
            consumer: Mutex::new(consumer),
            counters: Counters::default(),
            preferred_sample_rate,
            preferred_io_buffer_duration: 0.01,
        }
    }

    pub fn stats(&self) -> LoopbackStats {
        let c = &self.counters;
        LoopbackStats {
            captured_frames: c.captured_frames.load(Ordering::Relaxed),
            played_frames: c.played_frames.load(Ordering::Relaxed),
            overruns: c.overruns.load(Ordering::Relaxed),
            underruns: c.underruns.load(Ordering::Relaxed),
            input_changes: c.input_changes.load(Ordering::Relaxed),
            output_changes: c.output_changes.load(Ordering::Relaxed),
            interruptions: c.interruptions.load(Ordering::Relaxed),
        }
    }
}

fn sample_at(samples: &SampleBuffer<'_>, index: usize) -> f32 {
    match samples {
        SampleBuffer::I16(s) => f32::from(s[index]) / I16_SCALE,
        SampleBuffer::F32(s) => s[index],
    }
}

fn write_at(samples: &mut SampleBufferMut<'_>, index: usize, value: f32) {
    match samples {
        SampleBufferMut::I16(s) => s[index] = (value * I16_SCALE).round().clamp(-32768.0, 32767.0) as i16,
        SampleBufferMut::F32(s) => s[index] = value,
    }
}

impl AudioDeviceDelegate for LoopbackDelegate {
    fn deliver_recorded_data(&self, data: &RecordedData<'_>) -> Result<(), RenderError> {
        let Some(mut producer) = self.producer.try_lock() else {
            return Err(RenderError::Unavailable);
        };
        let frames = data.context.frames;
        for frame in 0..frames {
            let value = sample_at(&data.samples, data.format.sample_index(frames, frame, 0));
            if producer.push(value).is_err() {
                self.counters.overruns.fetch_add(1, Ordering::Relaxed);
                break;
            }
        }
        self.counters.captured_frames.fetch_add(frames as u64, Ordering::Relaxed);
        Ok(())
    }

    fn get_playout_data(&self, data: &mut PlayoutData<'_>) -> Result<(), RenderError> {
        let Some(mut consumer) = self.consumer.try_lock() else {
            return Err(RenderError::Unavailable);
        };
        let frames = data.context.frames;
        let channels = data.format.channels as usize;
        let mut played = 0;
        for frame in 0..frames {
            let value = match consumer.pop() {
                Ok(value) => {
                    played += 1;
                    value
                }
                Err(_) => 0.0,
            };
            for channel in 0..channels {
                write_at(&mut data.samples, data.format.sample_index(frames, frame, channel), value);
            }
        }
        if played < frames {
            self.counters.underruns.fetch_add(1, Ordering::Relaxed);
        }
        data.silence = played == 0;
        self.counters.played_frames.fetch_add(played as u64, Ordering::Relaxed);
        Ok(())
    }

    fn notify_input_parameters_changed(&self, format: &AudioFormat) {
        self.counters.input_changes.fetch_add(1, Ordering::Relaxed);
        info!("Capture format is now {}", format);
    }

    fn notify_output_parameters_changed(&self, format: &AudioFormat) {
        self.counters.output_changes.fetch_add(1, Ordering::Relaxed);
        info!("Playout format is now {}", format);
    }

    fn notify_input_interrupted(&self) {
        self.counters.interruptions.fetch_add(1, Ordering::Relaxed);
        info!("Capture interrupted");
    }

    fn notify_output_interrupted(&self) {
        self.counters.interruptions.fetch_add(1, Ordering::Relaxed);
        info!("Playout interrupted");
    }

    fn preferred_input_sample_rate(&self) -> f64 {
        self.preferred_sample_rate
    }

    fn preferred_input_io_buffer_duration(&self) -> f64 {
        self.preferred_io_buffer_duration
    }

    fn preferred_output_sample_rate(&self) -> f64 {
        self.preferred_sample_rate
    }

    fn preferred_output_io_buffer_duration(&self) -> f64 {
        self.preferred_io_buffer_duration
    }

    fn dispatch_async(&self, task: ControlTask) {
        self.queue.dispatch(task);
    }
}
