//! Single I/O unit backend
//!
//! Models a fused hardware I/O unit: one stream carries both directions,
//! input and output are switched with enable flags and each bus exposes a
//! client format the unit converts to and from internally. Flags and client
//! formats are latched when render resources are allocated, so changing them
//! requires the unit to be stopped and its resources released.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{
    checked_format, start_error, BackendOptions, CallbackSlot, CaptureCallback, HardwareBackend, PlayoutCallback,
};
use crate::config::BackendKind;
use crate::converter::{requires_conversion, FormatConverter};
use crate::error::{AudioError, AudioResult, RenderError};
use crate::format::{AudioFormat, Direction, SampleStorage, INPUT_BUS, OUTPUT_BUS};
use crate::platform::{AudioDriver, ConfigurationListener, DriverStream, InputProc, ListenerId, OutputProc, StreamRequest};
use crate::utils::measure_time;

/// Fused I/O unit over an [`AudioDriver`]
pub struct FusedUnitBackend {
    driver: Arc<dyn AudioDriver>,
    options: BackendOptions,
    hardware_sample_rate: f64,
    input_enabled: bool,
    output_enabled: bool,
    input_client_format: AudioFormat,
    output_client_format: AudioFormat,
    capture: CallbackSlot<CaptureCallback>,
    playout: CallbackSlot<PlayoutCallback>,
    stream: Option<Box<dyn DriverStream>>,
    // Hardware formats at allocation, before output narrowing
    allocated_input: Option<AudioFormat>,
    allocated_output: Option<AudioFormat>,
    echo_cancellation_bypassed: bool,
    listener: Option<ListenerId>,
}

impl FusedUnitBackend {
    /// Create the unit; fails if voice processing is requested but the
    /// hardware has no such unit
    pub fn new(driver: Arc<dyn AudioDriver>, options: BackendOptions) -> AudioResult<Self> {
        if options.voice_processing && !driver.supports_voice_processing() {
            return Err(AudioError::hardware("voice processing I/O unit is not available"));
        }
        let input_format = driver.hardware_input_format();
        let output_format = driver.hardware_output_format();
        debug!(
            "Created fused I/O unit on '{}' (voice processing: {})",
            driver.name(),
            options.voice_processing
        );

        Ok(Self {
            hardware_sample_rate: output_format.sample_rate,
            driver,
            options,
            // Output enabled, input disabled: the usual I/O unit defaults
            input_enabled: false,
            output_enabled: true,
            input_client_format: input_format,
            output_client_format: output_format,
            capture: Arc::new(Mutex::new(None)),
            playout: Arc::new(Mutex::new(None)),
            stream: None,
            allocated_input: None,
            allocated_output: None,
            echo_cancellation_bypassed: false,
            listener: None,
        })
    }

    fn ensure_released(&self, what: &str) -> AudioResult<()> {
        if self.stream.is_some() {
            return Err(AudioError::invalid_state(format!(
                "{} requires render resources to be released",
                what
            )));
        }
        Ok(())
    }

    fn input_proc(&self, hardware: AudioFormat) -> AudioResult<InputProc> {
        let client = self.input_client_format;
        let max_frames = self.options.maximum_frames_to_render;
        let converter = if requires_conversion(&hardware, &client) {
            Some(FormatConverter::new(hardware, client)?)
        } else {
            None
        };
        let mut scratch = SampleStorage::zeroed(client.sample_format, client.samples_for(max_frames));
        let slot = self.capture.clone();

        let capture: InputProc = Box::new(move |context, samples| {
            if context.frames > max_frames {
                return Err(RenderError::TooManyFrames {
                    frames: context.frames,
                    capacity: max_frames,
                });
            }
            let Some(mut guard) = slot.try_lock() else {
                return Err(RenderError::Unavailable);
            };
            let Some(callback) = guard.as_mut() else {
                return Ok(());
            };
            match &converter {
                Some(converter) => {
                    let len = client.samples_for(context.frames);
                    converter.convert(context.frames, samples, scratch.slice_mut(len))?;
                    callback(context, scratch.slice(len))
                }
                None => callback(context, samples),
            }
        });
        Ok(capture)
    }

    fn output_proc(&self, hardware: AudioFormat) -> AudioResult<OutputProc> {
        let client = self.output_client_format;
        let max_frames = self.options.maximum_frames_to_render;
        let converter = if requires_conversion(&client, &hardware) {
            Some(FormatConverter::new(client, hardware)?)
        } else {
            None
        };
        let mut scratch = SampleStorage::zeroed(client.sample_format, client.samples_for(max_frames));
        let slot = self.playout.clone();

        let render: OutputProc = Box::new(move |context, mut out| {
            if context.frames > max_frames {
                out.fill_silence();
                return Err(RenderError::TooManyFrames {
                    frames: context.frames,
                    capacity: max_frames,
                });
            }
            let Some(mut guard) = slot.try_lock() else {
                out.fill_silence();
                return Err(RenderError::Unavailable);
            };
            let Some(callback) = guard.as_mut() else {
                out.fill_silence();
                return Ok(());
            };

            let mut silence = false;
            let result = match &converter {
                Some(converter) => {
                    let len = client.samples_for(context.frames);
                    callback(context, scratch.slice_mut(len), &mut silence).and_then(|()| {
                        converter
                            .convert(context.frames, scratch.slice(len), out.reborrow())
                            .map_err(RenderError::from)
                    })
                }
                None => callback(context, out.reborrow(), &mut silence),
            };
            if result.is_err() || silence {
                out.fill_silence();
            }
            result
        });
        Ok(render)
    }
}

impl HardwareBackend for FusedUnitBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::FusedUnit
    }

    fn is_input_enabled(&self) -> bool {
        self.input_enabled
    }

    fn set_input_enabled(&mut self, enabled: bool) -> AudioResult<()> {
        if self.input_enabled != enabled {
            self.ensure_released("changing the input enable flag")?;
            self.input_enabled = enabled;
        }
        Ok(())
    }

    fn is_output_enabled(&self) -> bool {
        self.output_enabled
    }

    fn set_output_enabled(&mut self, enabled: bool) -> AudioResult<()> {
        if self.output_enabled != enabled {
            self.ensure_released("changing the output enable flag")?;
            self.output_enabled = enabled;
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.stream.as_ref().map_or(false, |s| s.is_running())
    }

    fn render_resources_allocated(&self) -> bool {
        self.stream.is_some()
    }

    fn allocate_resources(&mut self) -> AudioResult<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let mut request = StreamRequest {
            input: None,
            output: None,
            max_frames: self.options.maximum_frames_to_render,
            voice_processing: self.options.voice_processing,
            voice_processing_bypassed: self.echo_cancellation_bypassed,
        };
        let mut allocated_output = None;
        let mut input = None;
        let mut output = None;

        if self.input_enabled {
            let hardware = checked_format(Direction::Input, self.driver.hardware_input_format())?;
            input = Some(self.input_proc(hardware)?);
            request.input = Some(hardware);
        }
        if self.output_enabled {
            let hardware = checked_format(Direction::Output, self.driver.hardware_output_format())?;
            if self.output_client_format.channels > hardware.channels {
                return Err(AudioError::UnsupportedConversion {
                    from: self.output_client_format,
                    to: hardware,
                    reason: "channel count can only be narrowed",
                });
            }
            allocated_output = Some(hardware);
            // The unit maps client channels onto the first hardware channels
            let hardware = hardware.with_channels(self.output_client_format.channels);
            output = Some(self.output_proc(hardware)?);
            request.output = Some(hardware);
        }

        let stream = measure_time("Fused unit allocate render resources", || {
            self.driver.open(request, input, output)
        })
        .map_err(|e| AudioError::allocation(e.to_string()))?;
        self.stream = Some(stream);
        self.allocated_input = request.input;
        self.allocated_output = allocated_output;
        Ok(())
    }

    fn release_resources(&mut self) {
        if self.stream.is_none() {
            return;
        }
        self.stop();
        measure_time("Fused unit release render resources", || {
            self.stream = None;
        });
        self.allocated_input = None;
        self.allocated_output = None;
    }

    fn start(&mut self) -> AudioResult<()> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(AudioError::invalid_state("render resources are not allocated"));
        };
        measure_time("Fused unit start", || stream.start()).map_err(start_error)
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.as_mut() {
            if stream.is_running() {
                if let Err(e) = measure_time("Fused unit stop", || stream.stop()) {
                    warn!("Failed to stop fused unit: {}", e);
                }
            }
        }
    }

    fn native_input_format(&self, bus: u32) -> AudioFormat {
        if bus == INPUT_BUS {
            self.driver.hardware_input_format()
        } else {
            self.output_client_format
        }
    }

    fn native_output_format(&self, bus: u32) -> AudioFormat {
        if bus == OUTPUT_BUS {
            self.driver.hardware_output_format()
        } else {
            self.input_client_format
        }
    }

    fn hardware_sample_rate(&self) -> f64 {
        self.hardware_sample_rate
    }

    fn accepts_client_format(&self, _direction: Direction) -> bool {
        true
    }

    fn client_format(&self, direction: Direction) -> AudioFormat {
        match direction {
            Direction::Input => self.input_client_format,
            Direction::Output => self.output_client_format,
        }
    }

    fn allocated_hardware_format(&self, direction: Direction) -> Option<AudioFormat> {
        match direction {
            Direction::Input => self.allocated_input,
            Direction::Output => self.allocated_output,
        }
    }

    fn set_client_format(&mut self, direction: Direction, format: AudioFormat) -> AudioResult<()> {
        if self.client_format(direction) == format {
            return Ok(());
        }
        self.ensure_released("changing a bus format")?;
        let format = checked_format(direction, format)?;
        match direction {
            Direction::Input => self.input_client_format = format,
            Direction::Output => self.output_client_format = format,
        }
        Ok(())
    }

    fn install_capture_callback(&mut self, callback: CaptureCallback) -> AudioResult<()> {
        *self.capture.lock() = Some(callback);
        Ok(())
    }

    fn remove_capture_callback(&mut self) -> bool {
        self.capture.lock().take().is_some()
    }

    fn has_capture_callback(&self) -> bool {
        self.capture.lock().is_some()
    }

    fn install_playout_callback(&mut self, callback: PlayoutCallback) -> AudioResult<()> {
        *self.playout.lock() = Some(callback);
        Ok(())
    }

    fn remove_playout_callback(&mut self) -> bool {
        self.playout.lock().take().is_some()
    }

    fn has_playout_callback(&self) -> bool {
        self.playout.lock().is_some()
    }

    fn supports_builtin_echo_cancellation(&self) -> bool {
        self.driver.supports_voice_processing()
    }

    fn is_echo_cancellation_enabled(&self) -> bool {
        self.options.voice_processing
    }

    fn is_echo_cancellation_bypassed(&self) -> bool {
        self.echo_cancellation_bypassed
    }

    fn set_echo_cancellation_bypassed(&mut self, bypassed: bool) {
        if !self.options.voice_processing || self.echo_cancellation_bypassed == bypassed {
            return;
        }
        self.echo_cancellation_bypassed = bypassed;
        if let Some(stream) = self.stream.as_mut() {
            if let Err(e) = stream.set_voice_processing_bypassed(bypassed) {
                warn!("Failed to apply echo canceller bypass: {}", e);
            }
        }
    }

    fn set_configuration_change_listener(&mut self, listener: Option<ConfigurationListener>) {
        if let Some(id) = self.listener.take() {
            self.driver.remove_configuration_listener(id);
        }
        self.listener = listener.map(|l| self.driver.add_configuration_listener(l));
    }

    fn describe(&self) -> String {
        format!(
            "fused unit on '{}'\n  running={} allocated={} voiceProcessing={} bypassed={}\n  \
             input: enabled={} hardware=[{}] client=[{}] callback={}\n  \
             output: enabled={} hardware=[{}] client=[{}] callback={}",
            self.driver.name(),
            self.is_running(),
            self.render_resources_allocated(),
            self.options.voice_processing,
            self.echo_cancellation_bypassed,
            self.input_enabled,
            self.driver.hardware_input_format(),
            self.input_client_format,
            self.has_capture_callback(),
            self.output_enabled,
            self.driver.hardware_output_format(),
            self.output_client_format,
            self.has_playout_callback(),
        )
    }
}

impl Drop for FusedUnitBackend {
    fn drop(&mut self) {
        self.set_configuration_change_listener(None);
        self.release_resources();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{SampleBuffer, SampleBufferMut};
    use crate::platform::SimulatedHardware;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn backend(hw: &SimulatedHardware, voice_processing: bool) -> FusedUnitBackend {
        FusedUnitBackend::new(
            Arc::new(hw.clone()),
            BackendOptions {
                voice_processing,
                maximum_frames_to_render: 256,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_requires_voice_processing_support() {
        let hw = SimulatedHardware::default();
        hw.set_voice_processing_supported(false);
        let result = FusedUnitBackend::new(Arc::new(hw.clone()), BackendOptions {
            voice_processing: true,
            ..BackendOptions::default()
        });
        assert!(matches!(result, Err(AudioError::HardwareConstruction { .. })));
    }

    #[test]
    fn test_flags_and_formats_require_released_resources() {
        let hw = SimulatedHardware::default();
        let mut unit = backend(&hw, false);
        unit.allocate_resources().unwrap();

        assert!(matches!(unit.set_input_enabled(true), Err(AudioError::InvalidState { .. })));
        let pipeline = AudioFormat::pcm_i16(48000.0, 1, true);
        assert!(matches!(
            unit.set_client_format(Direction::Input, pipeline),
            Err(AudioError::InvalidState { .. })
        ));
        // Setting the current value is not a change
        unit.set_output_enabled(true).unwrap();

        unit.release_resources();
        unit.set_input_enabled(true).unwrap();
        unit.set_client_format(Direction::Input, pipeline).unwrap();
        assert_eq!(unit.client_format(Direction::Input), pipeline);
        assert_eq!(unit.native_output_format(INPUT_BUS), pipeline);
    }

    #[test]
    fn test_start_requires_allocation() {
        let hw = SimulatedHardware::default();
        let mut unit = backend(&hw, false);
        assert!(matches!(unit.start(), Err(AudioError::InvalidState { .. })));
        unit.allocate_resources().unwrap();
        unit.start().unwrap();
        assert!(unit.is_running());
        unit.release_resources();
        assert!(!unit.is_running());
        assert_eq!(hw.counters().closes, 1);
    }

    #[test]
    fn test_capture_is_converted_to_client_format() {
        let hw = SimulatedHardware::default();
        let mut unit = backend(&hw, true);
        unit.set_output_enabled(false).unwrap();
        unit.set_input_enabled(true).unwrap();
        unit.set_client_format(Direction::Input, AudioFormat::pcm_i16(48000.0, 1, true))
            .unwrap();

        let frames = Arc::new(AtomicUsize::new(0));
        let seen = frames.clone();
        unit.install_capture_callback(Box::new(move |context, samples| {
            assert!(matches!(samples, SampleBuffer::I16(_)));
            assert_eq!(samples.len(), context.frames);
            seen.fetch_add(context.frames, Ordering::SeqCst);
            Ok(())
        }))
        .unwrap();

        unit.allocate_resources().unwrap();
        unit.start().unwrap();
        hw.render_cycle(128);
        assert_eq!(frames.load(Ordering::SeqCst), 128);

        assert!(unit.remove_capture_callback());
        assert!(!unit.remove_capture_callback());
        hw.render_cycle(128);
        assert_eq!(frames.load(Ordering::SeqCst), 128);
    }

    #[test]
    fn test_playout_is_converted_to_hardware_format() {
        let hw = SimulatedHardware::default();
        let mut unit = backend(&hw, false);
        unit.set_client_format(Direction::Output, AudioFormat::pcm_i16(48000.0, 1, true))
            .unwrap();
        unit.install_playout_callback(Box::new(|_, samples, _| {
            if let SampleBufferMut::I16(out) = samples {
                out.fill(-16384);
            }
            Ok(())
        }))
        .unwrap();

        unit.allocate_resources().unwrap();
        unit.start().unwrap();
        hw.render_cycle(64);
        let played = hw.recorded_output();
        assert_eq!(played.len(), 64);
        assert!(played.iter().all(|s| *s == -0.5));
    }

    #[test]
    fn test_silence_flag_mutes_output() {
        let hw = SimulatedHardware::default();
        let mut unit = backend(&hw, false);
        unit.install_playout_callback(Box::new(|_, mut samples, silence| {
            if let SampleBufferMut::F32(out) = &mut samples {
                out.fill(0.9);
            }
            *silence = true;
            Ok(())
        }))
        .unwrap();
        unit.allocate_resources().unwrap();
        unit.start().unwrap();
        hw.render_cycle(32);
        assert!(hw.recorded_output().iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_echo_bypass_only_with_voice_processing() {
        let hw = SimulatedHardware::default();
        let mut plain = backend(&hw, false);
        plain.set_echo_cancellation_bypassed(true);
        assert!(!plain.is_echo_cancellation_bypassed());

        let mut vp = backend(&hw, true);
        assert!(vp.is_echo_cancellation_enabled());
        vp.set_echo_cancellation_bypassed(true);
        assert!(vp.is_echo_cancellation_bypassed());
    }

    #[test]
    fn test_allocation_records_unnarrowed_hardware_format() {
        let hw = SimulatedHardware::default();
        let mut unit = backend(&hw, false);
        unit.set_client_format(Direction::Output, AudioFormat::pcm_i16(48000.0, 1, true))
            .unwrap();
        assert_eq!(unit.allocated_hardware_format(Direction::Output), None);
        unit.allocate_resources().unwrap();
        assert_eq!(
            unit.allocated_hardware_format(Direction::Output),
            Some(AudioFormat::hardware_f32(48000.0, 2))
        );
        assert_eq!(unit.allocated_hardware_format(Direction::Input), None);
        unit.release_resources();
        assert_eq!(unit.allocated_hardware_format(Direction::Output), None);
    }

    #[test]
    fn test_bypass_change_reaches_open_stream() {
        let hw = SimulatedHardware::default();
        let mut vp = backend(&hw, true);
        vp.allocate_resources().unwrap();
        assert!(!hw.is_voice_processing_bypassed());
        vp.set_echo_cancellation_bypassed(true);
        assert!(hw.is_voice_processing_bypassed());
        vp.release_resources();
        vp.allocate_resources().unwrap();
        assert!(hw.is_voice_processing_bypassed());
    }

    #[test]
    fn test_invalid_hardware_format_fails_allocation() {
        let hw = SimulatedHardware::default();
        let mut unit = backend(&hw, false);
        unit.set_input_enabled(true).unwrap();
        hw.set_input_available(false);
        assert!(matches!(
            unit.allocate_resources(),
            Err(AudioError::InvalidFormat {
                direction: Direction::Input,
                ..
            })
        ));
    }
}
