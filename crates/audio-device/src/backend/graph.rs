//! Processing graph backend
//!
//! ```text
//! hardware in ──▶ equalizer (pass-through) ──▶ sink node ──▶ capture callback
//!
//! playout callback ──▶ source node ──┐
//!                                    ├──▶ mixer ──▶ hardware out
//! background player (test tone) ─────┘
//! ```
//!
//! The sink delivers hardware-format samples; the source node renders in a
//! client format of its own which the mixer converts to the hardware format.
//! Voice processing is a graph-wide property that can only be toggled before
//! any node is attached, so it is applied right after the graph is created
//! and changing it afterwards means building a new graph.

use std::f64::consts::TAU;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{
    checked_format, start_error, BackendOptions, CallbackSlot, CaptureCallback, HardwareBackend, PlayoutCallback,
};
use crate::config::BackendKind;
use crate::converter::{requires_conversion, FormatConverter};
use crate::delegate::RenderContext;
use crate::error::{AudioError, AudioResult, ConvertError, RenderError};
use crate::format::{AudioFormat, Direction, SampleBufferMut, SampleStorage, INPUT_BUS, OUTPUT_BUS};
use crate::platform::{AudioDriver, ConfigurationListener, DriverStream, InputProc, ListenerId, OutputProc, StreamRequest};
use crate::utils::measure_time;

/// Looping in-memory tone for the background player
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TestTone {
    pub frequency: f64,
    pub amplitude: f32,
}

impl TestTone {
    pub fn sine(frequency: f64, amplitude: f32) -> Self {
        Self { frequency, amplitude }
    }

    /// One second of the tone at `sample_rate`
    pub fn render_loop(&self, sample_rate: f64) -> Vec<f32> {
        let len = (sample_rate.round() as usize).max(1);
        let step = TAU * self.frequency / sample_rate;
        (0..len).map(|i| (step * i as f64).sin() as f32 * self.amplitude).collect()
    }
}

/// One band of the anchor equalizer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EqBand {
    pub frequency: f64,
    pub gain_db: f32,
    pub bypass: bool,
}

/// Two-band equalizer anchoring the input branch; every band is bypassed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Equalizer {
    pub bands: [EqBand; 2],
}

impl Equalizer {
    pub fn pass_through() -> Self {
        let band = |frequency| EqBand {
            frequency,
            gain_db: 0.0,
            bypass: true,
        };
        Self {
            bands: [band(100.0), band(4000.0)],
        }
    }

    pub fn is_pass_through(&self) -> bool {
        self.bands.iter().all(|b| b.bypass || b.gain_db == 0.0)
    }
}

struct BackgroundPlayer {
    samples: Vec<f32>,
    position: usize,
    playing: bool,
}

impl BackgroundPlayer {
    fn mix_into(&mut self, out: &mut [f32], hardware: &AudioFormat, frames: usize) {
        if !self.playing || self.samples.is_empty() {
            return;
        }
        for frame in 0..frames {
            let value = self.samples[self.position];
            self.position = (self.position + 1) % self.samples.len();
            for channel in 0..hardware.channels as usize {
                out[hardware.sample_index(frames, frame, channel)] += value;
            }
        }
    }
}

struct SourceNode {
    callback: PlayoutCallback,
    format: AudioFormat,
    converter: Option<FormatConverter>,
    scratch: SampleStorage,
    mix: Vec<f32>,
    max_frames: usize,
}

impl SourceNode {
    fn new(callback: PlayoutCallback, format: AudioFormat, max_frames: usize) -> AudioResult<Self> {
        let mix_format = AudioFormat::hardware_f32(format.sample_rate, format.channels);
        let converter = if requires_conversion(&format, &mix_format) {
            Some(FormatConverter::new(format, mix_format)?)
        } else {
            None
        };
        Ok(Self {
            callback,
            format,
            scratch: SampleStorage::zeroed(format.sample_format, format.samples_for(max_frames)),
            mix: vec![0.0; mix_format.samples_for(max_frames)],
            converter,
            max_frames,
        })
    }

    /// Render one cycle and add it to `out`, mapping source channels onto
    /// hardware channels
    fn render_into(&mut self, context: &RenderContext, out: &mut [f32], hardware: &AudioFormat) -> Result<(), RenderError> {
        let frames = context.frames;
        if frames > self.max_frames {
            return Err(RenderError::TooManyFrames {
                frames,
                capacity: self.max_frames,
            });
        }
        let channels = self.format.channels as usize;
        let planar_len = frames * channels;
        let mut silence = false;

        match &self.converter {
            Some(converter) => {
                let len = self.format.samples_for(frames);
                (self.callback)(context, self.scratch.slice_mut(len), &mut silence)?;
                converter.convert(frames, self.scratch.slice(len), SampleBufferMut::F32(&mut self.mix[..planar_len]))?;
            }
            None => {
                (self.callback)(context, SampleBufferMut::F32(&mut self.mix[..planar_len]), &mut silence)?;
            }
        }
        if silence {
            return Ok(());
        }

        for channel in 0..hardware.channels as usize {
            let source = channel.min(channels - 1);
            for frame in 0..frames {
                out[hardware.sample_index(frames, frame, channel)] += self.mix[source * frames + frame];
            }
        }
        Ok(())
    }
}

/// Processing graph over an [`AudioDriver`]
pub struct GraphBackend {
    driver: Arc<dyn AudioDriver>,
    options: BackendOptions,
    hardware_sample_rate: f64,
    voice_processing: bool,
    echo_cancellation_bypassed: bool,
    input_enabled: bool,
    output_enabled: bool,
    equalizer: Option<Equalizer>,
    player_attached: bool,
    sink: CallbackSlot<CaptureCallback>,
    source: Arc<Mutex<Option<SourceNode>>>,
    source_format: AudioFormat,
    background: Arc<Mutex<Option<BackgroundPlayer>>>,
    background_tone: Option<TestTone>,
    stream: Option<Box<dyn DriverStream>>,
    // Hardware formats the open stream runs with
    allocated_input: Option<AudioFormat>,
    allocated_output: Option<AudioFormat>,
    listener: Option<ListenerId>,
}

impl GraphBackend {
    /// Create the graph, apply the voice-processing mode, then attach the
    /// equalizer and background player nodes
    pub fn new(driver: Arc<dyn AudioDriver>, options: BackendOptions) -> AudioResult<Self> {
        let output_format = driver.hardware_output_format();
        let mut graph = Self {
            hardware_sample_rate: output_format.sample_rate,
            driver,
            options,
            voice_processing: false,
            echo_cancellation_bypassed: false,
            input_enabled: false,
            output_enabled: true,
            equalizer: None,
            player_attached: false,
            sink: Arc::new(Mutex::new(None)),
            source: Arc::new(Mutex::new(None)),
            source_format: output_format,
            background: Arc::new(Mutex::new(None)),
            background_tone: None,
            stream: None,
            allocated_input: None,
            allocated_output: None,
            listener: None,
        };

        graph.set_voice_processing_enabled(options.voice_processing)?;
        graph.equalizer = Some(Equalizer::pass_through());
        graph.player_attached = true;
        debug!(
            "Created processing graph on '{}' (voice processing: {})",
            graph.driver.name(),
            graph.voice_processing
        );
        Ok(graph)
    }

    /// Toggle voice processing on the output node
    ///
    /// Only possible while no node is attached.
    pub fn set_voice_processing_enabled(&mut self, enabled: bool) -> AudioResult<()> {
        if self.voice_processing == enabled {
            return Ok(());
        }
        if self.has_attached_nodes() {
            return Err(AudioError::invalid_state(
                "voice processing can only change before any node is attached",
            ));
        }
        if enabled && !self.driver.supports_voice_processing() {
            return Err(AudioError::hardware("voice processing I/O unit is not available"));
        }
        self.voice_processing = enabled;
        Ok(())
    }

    pub fn has_attached_nodes(&self) -> bool {
        self.equalizer.is_some() || self.player_attached || self.has_sink() || self.has_source()
    }

    pub fn set_background_tone(&mut self, tone: TestTone) {
        self.background_tone = Some(tone);
    }

    pub fn is_background_playing(&self) -> bool {
        self.background.lock().as_ref().map_or(false, |p| p.playing)
    }

    fn has_sink(&self) -> bool {
        self.sink.lock().is_some()
    }

    fn has_source(&self) -> bool {
        self.source.lock().is_some()
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

    fn input_proc(&self) -> InputProc {
        let sink = self.sink.clone();
        // The equalizer is bypassed, so the sink sees the hardware samples
        let capture: InputProc = Box::new(move |context, samples| {
            let Some(mut guard) = sink.try_lock() else {
                return Err(RenderError::Unavailable);
            };
            match guard.as_mut() {
                Some(callback) => callback(context, samples),
                None => Ok(()),
            }
        });
        capture
    }

    fn output_proc(&self, hardware: AudioFormat) -> OutputProc {
        let source = self.source.clone();
        let background = self.background.clone();
        let render: OutputProc = Box::new(move |context, out| {
            let SampleBufferMut::F32(out) = out else {
                return Err(ConvertError::RepresentationMismatch.into());
            };
            out.fill(0.0);

            let result = match source.try_lock() {
                Some(mut guard) => match guard.as_mut() {
                    Some(node) => node.render_into(context, out, &hardware),
                    None => Ok(()),
                },
                None => Err(RenderError::Unavailable),
            };
            if result.is_err() {
                out.fill(0.0);
            }
            if let Some(mut guard) = background.try_lock() {
                if let Some(player) = guard.as_mut() {
                    player.mix_into(out, &hardware, context.frames);
                }
            }
            result
        });
        render
    }
}

impl HardwareBackend for GraphBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Graph
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
            voice_processing: self.voice_processing,
            voice_processing_bypassed: self.echo_cancellation_bypassed,
        };
        let mut input = None;
        let mut output = None;

        if self.input_enabled {
            request.input = Some(checked_format(Direction::Input, self.driver.hardware_input_format())?);
            input = Some(self.input_proc());
        }
        if self.output_enabled {
            let hardware = checked_format(Direction::Output, self.driver.hardware_output_format())?;
            request.output = Some(hardware);
            output = Some(self.output_proc(hardware));
        }

        let stream = measure_time("Graph prepare", || self.driver.open(request, input, output))
            .map_err(|e| AudioError::allocation(e.to_string()))?;
        self.stream = Some(stream);
        self.allocated_input = request.input;
        self.allocated_output = request.output;
        Ok(())
    }

    fn release_resources(&mut self) {
        if self.stream.is_none() {
            return;
        }
        self.stop();
        measure_time("Graph reset", || {
            self.stream = None;
        });
        self.allocated_input = None;
        self.allocated_output = None;
    }

    fn start(&mut self) -> AudioResult<()> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(AudioError::invalid_state("graph is not prepared"));
        };
        measure_time("Graph start", || stream.start()).map_err(start_error)
    }

    fn stop(&mut self) {
        if let Some(player) = self.background.lock().as_mut() {
            player.playing = false;
        }
        if let Some(stream) = self.stream.as_mut() {
            if stream.is_running() {
                if let Err(e) = measure_time("Graph stop", || stream.stop()) {
                    warn!("Failed to stop graph: {}", e);
                }
            }
        }
    }

    fn native_input_format(&self, bus: u32) -> AudioFormat {
        if bus == INPUT_BUS {
            self.driver.hardware_input_format()
        } else {
            self.source_format
        }
    }

    fn native_output_format(&self, bus: u32) -> AudioFormat {
        if bus == OUTPUT_BUS {
            self.driver.hardware_output_format()
        } else {
            self.driver.hardware_input_format()
        }
    }

    fn hardware_sample_rate(&self) -> f64 {
        self.hardware_sample_rate
    }

    fn accepts_client_format(&self, direction: Direction) -> bool {
        // The sink always delivers the hardware format
        direction == Direction::Output
    }

    fn client_format(&self, direction: Direction) -> AudioFormat {
        match direction {
            // The sink sees what the open stream delivers, not the live route
            Direction::Input => self
                .allocated_input
                .unwrap_or_else(|| self.driver.hardware_input_format()),
            Direction::Output => self.source_format,
        }
    }

    fn allocated_hardware_format(&self, direction: Direction) -> Option<AudioFormat> {
        match direction {
            Direction::Input => self.allocated_input,
            Direction::Output => self.allocated_output,
        }
    }

    fn set_client_format(&mut self, direction: Direction, format: AudioFormat) -> AudioResult<()> {
        match direction {
            Direction::Input => {
                if format == self.client_format(Direction::Input) {
                    Ok(())
                } else {
                    Err(AudioError::unsupported("sink node format is fixed to the hardware format"))
                }
            }
            Direction::Output => {
                if format == self.source_format {
                    return Ok(());
                }
                if self.has_source() {
                    return Err(AudioError::invalid_state("source node must be detached to change its format"));
                }
                self.source_format = checked_format(Direction::Output, format)?;
                Ok(())
            }
        }
    }

    fn install_capture_callback(&mut self, callback: CaptureCallback) -> AudioResult<()> {
        checked_format(Direction::Input, self.driver.hardware_input_format())?;
        measure_time("Attach sink node", || {
            *self.sink.lock() = Some(callback);
        });
        Ok(())
    }

    fn remove_capture_callback(&mut self) -> bool {
        measure_time("Detach sink node", || self.sink.lock().take().is_some())
    }

    fn has_capture_callback(&self) -> bool {
        self.has_sink()
    }

    fn install_playout_callback(&mut self, callback: PlayoutCallback) -> AudioResult<()> {
        let node = SourceNode::new(callback, self.source_format, self.options.maximum_frames_to_render)?;
        measure_time("Attach source node", || {
            *self.source.lock() = Some(node);
        });
        Ok(())
    }

    fn remove_playout_callback(&mut self) -> bool {
        measure_time("Detach source node", || self.source.lock().take().is_some())
    }

    fn has_playout_callback(&self) -> bool {
        self.has_source()
    }

    fn supports_builtin_echo_cancellation(&self) -> bool {
        self.driver.supports_voice_processing()
    }

    fn is_echo_cancellation_enabled(&self) -> bool {
        self.voice_processing
    }

    fn is_echo_cancellation_bypassed(&self) -> bool {
        self.echo_cancellation_bypassed
    }

    fn set_echo_cancellation_bypassed(&mut self, bypassed: bool) {
        if !self.voice_processing || self.echo_cancellation_bypassed == bypassed {
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

    fn start_background_audio(&mut self) -> AudioResult<()> {
        let Some(tone) = self.background_tone else {
            return Ok(());
        };
        if !self.output_enabled {
            return Ok(());
        }
        let hardware = checked_format(Direction::Output, self.driver.hardware_output_format())?;
        let player = BackgroundPlayer {
            samples: tone.render_loop(hardware.sample_rate),
            position: 0,
            playing: true,
        };
        *self.background.lock() = Some(player);
        info!("Background tone playing at {} Hz", tone.frequency);
        Ok(())
    }

    fn describe(&self) -> String {
        format!(
            "graph on '{}'\n  running={} prepared={} voiceProcessing={} bypassed={}\n  \
             input: enabled={} hardware=[{}] equalizer={} sink={}\n  \
             output: enabled={} hardware=[{}] source={} sourceFormat=[{}] background={}",
            self.driver.name(),
            self.is_running(),
            self.render_resources_allocated(),
            self.voice_processing,
            self.echo_cancellation_bypassed,
            self.input_enabled,
            self.driver.hardware_input_format(),
            self.equalizer.is_some(),
            self.has_sink(),
            self.output_enabled,
            self.driver.hardware_output_format(),
            self.has_source(),
            self.source_format,
            self.is_background_playing(),
        )
    }
}

impl Drop for GraphBackend {
    fn drop(&mut self) {
        self.set_configuration_change_listener(None);
        self.release_resources();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::SampleBuffer;
    use crate::platform::SimulatedHardware;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn graph(hw: &SimulatedHardware, voice_processing: bool) -> GraphBackend {
        GraphBackend::new(
            Arc::new(hw.clone()),
            BackendOptions {
                voice_processing,
                maximum_frames_to_render: 256,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_voice_processing_is_fixed_once_nodes_are_attached() {
        let hw = SimulatedHardware::default();
        let mut g = graph(&hw, true);
        assert!(g.is_echo_cancellation_enabled());
        assert!(g.has_attached_nodes());
        assert!(matches!(
            g.set_voice_processing_enabled(false),
            Err(AudioError::InvalidState { .. })
        ));
        // Unchanged value is fine
        g.set_voice_processing_enabled(true).unwrap();
    }

    #[test]
    fn test_voice_processing_requires_support() {
        let hw = SimulatedHardware::default();
        hw.set_voice_processing_supported(false);
        let result = GraphBackend::new(Arc::new(hw.clone()), BackendOptions {
            voice_processing: true,
            ..BackendOptions::default()
        });
        assert!(matches!(result, Err(AudioError::HardwareConstruction { .. })));
    }

    #[test]
    fn test_sink_receives_hardware_format() {
        let hw = SimulatedHardware::default();
        let mut g = graph(&hw, false);
        assert!(!g.accepts_client_format(Direction::Input));
        assert_eq!(g.client_format(Direction::Input), AudioFormat::hardware_f32(48000.0, 1));

        let frames = Arc::new(AtomicUsize::new(0));
        let seen = frames.clone();
        g.install_capture_callback(Box::new(move |context, samples| {
            assert!(matches!(samples, SampleBuffer::F32(_)));
            seen.fetch_add(context.frames, Ordering::SeqCst);
            Ok(())
        }))
        .unwrap();
        g.set_output_enabled(false).unwrap();
        g.set_input_enabled(true).unwrap();
        g.allocate_resources().unwrap();
        g.start().unwrap();
        hw.render_cycle(100);
        assert_eq!(frames.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn test_source_format_needs_detached_node() {
        let hw = SimulatedHardware::default();
        let mut g = graph(&hw, false);
        let pipeline = AudioFormat::pcm_i16(48000.0, 1, true);
        g.set_client_format(Direction::Output, pipeline).unwrap();
        g.install_playout_callback(Box::new(|_, _, _| Ok(()))).unwrap();
        assert!(matches!(
            g.set_client_format(Direction::Output, AudioFormat::pcm_i16(48000.0, 2, true)),
            Err(AudioError::InvalidState { .. })
        ));
        assert!(g.remove_playout_callback());
        assert!(!g.remove_playout_callback());
        g.set_client_format(Direction::Output, AudioFormat::pcm_i16(48000.0, 2, true))
            .unwrap();
    }

    #[test]
    fn test_mixer_maps_mono_source_to_all_channels() {
        let hw = SimulatedHardware::default();
        let mut g = graph(&hw, false);
        g.set_client_format(Direction::Output, AudioFormat::pcm_i16(48000.0, 1, true))
            .unwrap();
        g.install_playout_callback(Box::new(|_, samples, _| {
            if let SampleBufferMut::I16(out) = samples {
                out.fill(8192);
            }
            Ok(())
        }))
        .unwrap();
        g.allocate_resources().unwrap();
        g.start().unwrap();
        hw.render_cycle(64);
        let played = hw.recorded_output();
        assert_eq!(played.len(), 64);
        assert!(played.iter().all(|s| *s == 0.25));
    }

    #[test]
    fn test_background_tone_restarts_with_hardware() {
        let hw = SimulatedHardware::default();
        let mut g = graph(&hw, false);
        g.set_background_tone(TestTone::sine(1000.0, 0.5));
        g.allocate_resources().unwrap();
        g.start().unwrap();
        assert!(!g.is_background_playing());

        g.start_background_audio().unwrap();
        assert!(g.is_background_playing());
        hw.render_cycle(48);
        assert!(hw.recorded_output().iter().any(|s| *s != 0.0));

        g.stop();
        assert!(!g.is_background_playing());
        g.start().unwrap();
        g.start_background_audio().unwrap();
        assert!(g.is_background_playing());
    }

    #[test]
    fn test_sink_format_follows_open_stream() {
        let hw = SimulatedHardware::default();
        let mut g = graph(&hw, false);
        g.set_output_enabled(false).unwrap();
        g.set_input_enabled(true).unwrap();
        g.allocate_resources().unwrap();
        let mono = AudioFormat::hardware_f32(48000.0, 1);
        assert_eq!(g.allocated_hardware_format(Direction::Input), Some(mono));

        hw.set_input_channels(2);
        assert_eq!(g.native_input_format(INPUT_BUS).channels, 2);
        assert_eq!(g.client_format(Direction::Input), mono);

        g.release_resources();
        assert_eq!(g.allocated_hardware_format(Direction::Input), None);
        assert_eq!(g.client_format(Direction::Input), AudioFormat::hardware_f32(48000.0, 2));
    }

    #[test]
    fn test_bypass_reaches_open_stream() {
        let hw = SimulatedHardware::default();
        let mut g = graph(&hw, true);
        g.set_echo_cancellation_bypassed(true);
        g.allocate_resources().unwrap();
        assert!(hw.is_voice_processing_bypassed());

        g.set_echo_cancellation_bypassed(false);
        assert!(!hw.is_voice_processing_bypassed());
        g.set_echo_cancellation_bypassed(true);
        assert!(hw.is_voice_processing_bypassed());
    }

    #[test]
    fn test_equalizer_is_pass_through() {
        let eq = Equalizer::pass_through();
        assert!(eq.is_pass_through());
        assert_eq!(eq.bands.len(), 2);
    }

    #[test]
    fn test_tone_loop_length() {
        let samples = TestTone::sine(440.0, 0.1).render_loop(16000.0);
        assert_eq!(samples.len(), 16000);
        assert!(samples.iter().all(|s| s.abs() <= 0.1));
    }
}
