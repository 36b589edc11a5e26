//! Bit-exact linear PCM representation changes
//!
//! [`FormatConverter`] transcodes between two fixed formats that share a
//! sample rate: float32 ↔ int16, interleaved ↔ non-interleaved and
//! channel-count narrowing (the first `to.channels` channels are kept).
//! Resampling is the hardware's job and is rejected at construction.
//!
//! Conversion never allocates and never blocks, so a converter can be moved
//! into a real-time callback and reused for every buffer.

use crate::error::{AudioError, AudioResult, ConvertError};
use crate::format::{AudioFormat, Direction, SampleBuffer, SampleBufferMut, SampleStorage};

const I16_SCALE: f32 = 32768.0;

#[inline]
fn f32_to_i16(sample: f32) -> i16 {
    // NaN saturates to 0 through the cast
    (sample * I16_SCALE).round().clamp(-32768.0, 32767.0) as i16
}

#[inline]
fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / I16_SCALE
}

/// Sample-format transcoder for one fixed `(from, to)` pair
#[derive(Debug)]
pub struct FormatConverter {
    from: AudioFormat,
    to: AudioFormat,
    scratch: Option<SampleStorage>,
    capacity_frames: usize,
}

impl FormatConverter {
    /// Create a converter without in-place scratch space
    pub fn new(from: AudioFormat, to: AudioFormat) -> AudioResult<Self> {
        Self::validate(&from, &to)?;
        Ok(Self {
            from,
            to,
            scratch: None,
            capacity_frames: 0,
        })
    }

    /// Create a converter whose scratch space supports
    /// [`convert_in_place`](Self::convert_in_place) for up to `max_frames`
    pub fn with_capacity(from: AudioFormat, to: AudioFormat, max_frames: usize) -> AudioResult<Self> {
        Self::validate(&from, &to)?;
        Ok(Self {
            from,
            to,
            scratch: Some(SampleStorage::zeroed(from.sample_format, from.samples_for(max_frames))),
            capacity_frames: max_frames,
        })
    }

    fn validate(from: &AudioFormat, to: &AudioFormat) -> AudioResult<()> {
        if !from.is_sample_rate_and_channel_count_valid() {
            return Err(AudioError::InvalidFormat {
                direction: Direction::Input,
                format: *from,
            });
        }
        if !to.is_sample_rate_and_channel_count_valid() {
            return Err(AudioError::InvalidFormat {
                direction: Direction::Output,
                format: *to,
            });
        }
        if from.sample_rate != to.sample_rate {
            return Err(AudioError::UnsupportedConversion {
                from: *from,
                to: *to,
                reason: "sample rate conversion is not possible",
            });
        }
        if to.channels > from.channels {
            return Err(AudioError::UnsupportedConversion {
                from: *from,
                to: *to,
                reason: "channel count can only be narrowed",
            });
        }
        Ok(())
    }

    /// Source format
    pub fn from_format(&self) -> &AudioFormat {
        &self.from
    }

    /// Destination format
    pub fn to_format(&self) -> &AudioFormat {
        &self.to
    }

    /// Frames supported by [`convert_in_place`](Self::convert_in_place)
    pub fn capacity_frames(&self) -> usize {
        self.capacity_frames
    }

    /// Convert `frames` frames from `src` (in the source format) into `dst`
    /// (in the destination format)
    ///
    /// Zero frames is a successful no-op. Any failure status is returned as
    /// is and leaves `dst` untouched.
    pub fn convert(&self, frames: usize, src: SampleBuffer<'_>, dst: SampleBufferMut<'_>) -> Result<(), ConvertError> {
        convert_buffers(&self.from, &self.to, frames, src, dst)
    }

    /// Convert in place using the converter's scratch space
    ///
    /// Both formats must share a sample representation, and `buffer` must be
    /// large enough for both the source and destination layouts.
    pub fn convert_in_place(&mut self, frames: usize, mut buffer: SampleBufferMut<'_>) -> Result<(), ConvertError> {
        if frames == 0 {
            return Ok(());
        }
        if self.from.sample_format != self.to.sample_format {
            return Err(ConvertError::RepresentationMismatch);
        }
        if frames > self.capacity_frames {
            return Err(ConvertError::CapacityExceeded {
                frames,
                capacity: self.capacity_frames,
            });
        }
        let needed = self.from.samples_for(frames);
        if buffer.len() < needed {
            return Err(ConvertError::SourceTooSmall {
                needed,
                actual: buffer.len(),
            });
        }
        let (from, to) = (self.from, self.to);
        let Some(scratch) = self.scratch.as_mut() else {
            return Err(ConvertError::CapacityExceeded { frames, capacity: 0 });
        };

        match (&mut *scratch, buffer.reborrow()) {
            (SampleStorage::I16(tmp), SampleBufferMut::I16(b)) => tmp[..needed].copy_from_slice(&b[..needed]),
            (SampleStorage::F32(tmp), SampleBufferMut::F32(b)) => tmp[..needed].copy_from_slice(&b[..needed]),
            _ => return Err(ConvertError::RepresentationMismatch),
        }

        convert_buffers(&from, &to, frames, scratch.slice(needed), buffer)
    }
}

fn convert_buffers(
    from: &AudioFormat,
    to: &AudioFormat,
    frames: usize,
    src: SampleBuffer<'_>,
    dst: SampleBufferMut<'_>,
) -> Result<(), ConvertError> {
    if frames == 0 {
        return Ok(());
    }
    if src.sample_format() != from.sample_format || dst.sample_format() != to.sample_format {
        return Err(ConvertError::RepresentationMismatch);
    }
    let needed = from.samples_for(frames);
    if src.len() < needed {
        return Err(ConvertError::SourceTooSmall {
            needed,
            actual: src.len(),
        });
    }
    let needed = to.samples_for(frames);
    if dst.len() < needed {
        return Err(ConvertError::DestinationTooSmall {
            needed,
            actual: dst.len(),
        });
    }

    match (src, dst) {
        (SampleBuffer::I16(s), SampleBufferMut::I16(d)) => transcode(from, to, frames, s, d, |x| x),
        (SampleBuffer::F32(s), SampleBufferMut::F32(d)) => transcode(from, to, frames, s, d, |x| x),
        (SampleBuffer::I16(s), SampleBufferMut::F32(d)) => transcode(from, to, frames, s, d, i16_to_f32),
        (SampleBuffer::F32(s), SampleBufferMut::I16(d)) => transcode(from, to, frames, s, d, f32_to_i16),
    }
    Ok(())
}

fn transcode<S: Copy, D>(
    from: &AudioFormat,
    to: &AudioFormat,
    frames: usize,
    src: &[S],
    dst: &mut [D],
    map: impl Fn(S) -> D,
) {
    if from.interleaved == to.interleaved && (from.channels == to.channels || !from.interleaved) {
        // Kept channels line up one to one: whole planes, or the whole
        // interleaved block
        let len = to.samples_for(frames);
        for (d, s) in dst[..len].iter_mut().zip(&src[..len]) {
            *d = map(*s);
        }
        return;
    }

    for channel in 0..to.channels as usize {
        for frame in 0..frames {
            let s = src[from.sample_index(frames, frame, channel)];
            dst[to.sample_index(frames, frame, channel)] = map(s);
        }
    }
}

/// Whether moving data between the two formats needs a converter at all
pub fn requires_conversion(from: &AudioFormat, to: &AudioFormat) -> bool {
    from != to
}
