//! Linear PCM formats and real-time buffer views
//!
//! All sample data handed across the hardware boundary is described by an
//! [`AudioFormat`] and carried in a single contiguous slice. Interleaved data
//! is stored frame after frame (`L R L R ...`); non-interleaved data is stored
//! plane after plane (`L L L ... R R R ...`), each plane `frames` samples long.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Bus carrying playout data towards the speaker (output element)
pub const OUTPUT_BUS: u32 = 0;

/// Bus carrying captured data from the microphone (input element)
pub const INPUT_BUS: u32 = 1;

/// Audio direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Capture (microphone)
    Input,
    /// Playout (speaker)
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Input => write!(f, "input"),
            Direction::Output => write!(f, "output"),
        }
    }
}

/// Sample representation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleFormat {
    /// 16-bit signed integer
    I16,
    /// 32-bit float, nominal range [-1.0, 1.0]
    F32,
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleFormat::I16 => write!(f, "int16"),
            SampleFormat::F32 => write!(f, "float32"),
        }
    }
}

/// Linear PCM stream description
///
/// Equality is by value: two formats are interchangeable only if every field
/// matches.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Sample rate in Hz
    pub sample_rate: f64,
    /// Number of channels
    pub channels: u16,
    /// Whether channels are interleaved in a single buffer
    pub interleaved: bool,
    /// Sample representation
    pub sample_format: SampleFormat,
}

impl AudioFormat {
    /// Create a new audio format
    pub fn new(sample_rate: f64, channels: u16, interleaved: bool, sample_format: SampleFormat) -> Self {
        Self {
            sample_rate,
            channels,
            interleaved,
            sample_format,
        }
    }

    /// 16-bit integer format as consumed by the media pipeline
    pub fn pcm_i16(sample_rate: f64, channels: u16, interleaved: bool) -> Self {
        Self::new(sample_rate, channels, interleaved, SampleFormat::I16)
    }

    /// Non-interleaved float format as typically exposed by hardware
    pub fn hardware_f32(sample_rate: f64, channels: u16) -> Self {
        Self::new(sample_rate, channels, false, SampleFormat::F32)
    }

    /// Check that the sample rate is a positive finite number and there is
    /// at least one channel
    pub fn is_sample_rate_and_channel_count_valid(&self) -> bool {
        self.sample_rate > 0.0 && self.sample_rate.is_finite() && self.channels > 0
    }

    /// Total samples needed for `frames` frames across all channels
    pub fn samples_for(&self, frames: usize) -> usize {
        frames * self.channels as usize
    }

    /// Samples in one contiguous plane: the whole buffer when interleaved,
    /// one channel otherwise
    pub fn plane_len(&self, frames: usize) -> usize {
        if self.interleaved {
            self.samples_for(frames)
        } else {
            frames
        }
    }

    /// Index of `(frame, channel)` in a buffer holding `frames` frames
    #[inline]
    pub fn sample_index(&self, frames: usize, frame: usize, channel: usize) -> usize {
        if self.interleaved {
            frame * self.channels as usize + channel
        } else {
            channel * frames + frame
        }
    }

    /// Same format with a different channel count
    pub fn with_channels(self, channels: u16) -> Self {
        Self { channels, ..self }
    }

    /// Same format with a different sample representation
    pub fn with_sample_format(self, sample_format: SampleFormat) -> Self {
        Self { sample_format, ..self }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz, {} ch, {}, {}",
            self.sample_rate,
            self.channels,
            self.sample_format,
            if self.interleaved { "interleaved" } else { "non-interleaved" }
        )
    }
}

/// Read-only view over sample data
#[derive(Debug, Clone, Copy)]
pub enum SampleBuffer<'a> {
    I16(&'a [i16]),
    F32(&'a [f32]),
}

impl<'a> SampleBuffer<'a> {
    /// Number of samples (all channels)
    pub fn len(&self) -> usize {
        match self {
            SampleBuffer::I16(s) => s.len(),
            SampleBuffer::F32(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Representation of the underlying samples
    pub fn sample_format(&self) -> SampleFormat {
        match self {
            SampleBuffer::I16(_) => SampleFormat::I16,
            SampleBuffer::F32(_) => SampleFormat::F32,
        }
    }

    /// View limited to the first `len` samples
    pub fn truncated(self, len: usize) -> SampleBuffer<'a> {
        match self {
            SampleBuffer::I16(s) => SampleBuffer::I16(&s[..len.min(s.len())]),
            SampleBuffer::F32(s) => SampleBuffer::F32(&s[..len.min(s.len())]),
        }
    }
}

/// Mutable view over sample data
#[derive(Debug)]
pub enum SampleBufferMut<'a> {
    I16(&'a mut [i16]),
    F32(&'a mut [f32]),
}

impl<'a> SampleBufferMut<'a> {
    /// Number of samples (all channels)
    pub fn len(&self) -> usize {
        match self {
            SampleBufferMut::I16(s) => s.len(),
            SampleBufferMut::F32(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Representation of the underlying samples
    pub fn sample_format(&self) -> SampleFormat {
        match self {
            SampleBufferMut::I16(_) => SampleFormat::I16,
            SampleBufferMut::F32(_) => SampleFormat::F32,
        }
    }

    /// Reborrow as a shorter-lived mutable view
    pub fn reborrow(&mut self) -> SampleBufferMut<'_> {
        match self {
            SampleBufferMut::I16(s) => SampleBufferMut::I16(s),
            SampleBufferMut::F32(s) => SampleBufferMut::F32(s),
        }
    }

    /// Read-only view of the same samples
    pub fn as_buffer(&self) -> SampleBuffer<'_> {
        match self {
            SampleBufferMut::I16(s) => SampleBuffer::I16(s),
            SampleBufferMut::F32(s) => SampleBuffer::F32(s),
        }
    }

    /// Mutable view limited to the first `len` samples
    pub fn truncated(self, len: usize) -> SampleBufferMut<'a> {
        match self {
            SampleBufferMut::I16(s) => {
                let len = len.min(s.len());
                SampleBufferMut::I16(&mut s[..len])
            }
            SampleBufferMut::F32(s) => {
                let len = len.min(s.len());
                SampleBufferMut::F32(&mut s[..len])
            }
        }
    }

    /// Write digital silence
    pub fn fill_silence(&mut self) {
        match self {
            SampleBufferMut::I16(s) => s.fill(0),
            SampleBufferMut::F32(s) => s.fill(0.0),
        }
    }
}

/// Owned, preallocated sample storage
///
/// Allocated on the control context and handed to the real-time thread,
/// which only ever borrows slices of it.
#[derive(Debug, Clone)]
pub enum SampleStorage {
    I16(Vec<i16>),
    F32(Vec<f32>),
}

impl SampleStorage {
    /// Zeroed storage holding `samples` samples of the given representation
    pub fn zeroed(sample_format: SampleFormat, samples: usize) -> Self {
        match sample_format {
            SampleFormat::I16 => SampleStorage::I16(vec![0; samples]),
            SampleFormat::F32 => SampleStorage::F32(vec![0.0; samples]),
        }
    }

    /// Capacity in samples
    pub fn len(&self) -> usize {
        match self {
            SampleStorage::I16(v) => v.len(),
            SampleStorage::F32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrow the first `len` samples
    pub fn slice(&self, len: usize) -> SampleBuffer<'_> {
        match self {
            SampleStorage::I16(v) => SampleBuffer::I16(&v[..len.min(v.len())]),
            SampleStorage::F32(v) => SampleBuffer::F32(&v[..len.min(v.len())]),
        }
    }

    /// Mutably borrow the first `len` samples
    pub fn slice_mut(&mut self, len: usize) -> SampleBufferMut<'_> {
        match self {
            SampleStorage::I16(v) => {
                let len = len.min(v.len());
                SampleBufferMut::I16(&mut v[..len])
            }
            SampleStorage::F32(v) => {
                let len = len.min(v.len());
                SampleBufferMut::F32(&mut v[..len])
            }
        }
    }
}
