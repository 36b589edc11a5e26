//! Loopback harness for the rtcaudio device adapter
//!
//! Captures audio, pushes it through a ring buffer and plays it back out.
//! Runs against simulated hardware by default; with the `device-cpal`
//! feature and `--cpal` it opens the system's default devices instead.

mod delegate;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use rtcaudio_device::session::InterruptionReason;
use rtcaudio_device::utils::frames_for_duration;
use rtcaudio_device::{
    AdapterConfig, AudioDeviceAdapter, AudioDeviceDelegate, BackendKind, ControlQueue, EchoCancellationPolicy,
    RouteChangeReason, SimulatedHardware, SimulatedSession,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::delegate::LoopbackDelegate;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Profile {
    /// Library defaults
    Default,
    /// Mono through voice processing
    VoiceChat,
    /// Stereo capture without echo cancellation
    StereoCapture,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Backend {
    Fused,
    Graph,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EchoCancellation {
    Auto,
    Always,
    Never,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Starting configuration
    #[arg(long, value_enum, default_value_t = Profile::Default)]
    profile: Profile,

    /// JSON adapter configuration; overrides --profile
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Hardware strategy
    #[arg(short, long, value_enum)]
    backend: Option<Backend>,

    /// Echo cancellation policy
    #[arg(short, long, value_enum)]
    echo_cancellation: Option<EchoCancellation>,

    /// How long to run, in seconds
    #[arg(short, long, default_value_t = 3)]
    seconds: u64,

    /// Frames per simulated render cycle; defaults to one I/O buffer
    #[arg(short, long)]
    frames: Option<usize>,

    /// Interrupt and reroute the session halfway through
    #[arg(long)]
    scenario: bool,

    /// Use the system's default devices
    #[cfg(feature = "device-cpal")]
    #[arg(long)]
    cpal: bool,
}

impl Args {
    fn adapter_config(&self) -> Result<AdapterConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                AdapterConfig::from_json_str(&json)?
            }
            None => match self.profile {
                Profile::Default => AdapterConfig::default(),
                Profile::VoiceChat => AdapterConfig::voice_chat(),
                Profile::StereoCapture => AdapterConfig::stereo_capture(),
            },
        };
        if let Some(backend) = self.backend {
            config = config.with_backend(match backend {
                Backend::Fused => BackendKind::FusedUnit,
                Backend::Graph => BackendKind::Graph,
            });
        }
        if let Some(policy) = self.echo_cancellation {
            config = config.with_echo_cancellation(match policy {
                EchoCancellation::Auto => EchoCancellationPolicy::Auto,
                EchoCancellation::Always => EchoCancellationPolicy::Always,
                EchoCancellation::Never => EchoCancellationPolicy::Never,
            });
        }
        config.validate()?;
        Ok(config)
    }
}

/// Where the samples come from
enum Host {
    Simulated {
        hardware: SimulatedHardware,
        session: SimulatedSession,
    },
    #[cfg(feature = "device-cpal")]
    Cpal {
        session: Arc<rtcaudio_device::HostSession>,
    },
}

impl Host {
    fn start(&self, frames: usize) -> Result<()> {
        if let Host::Simulated { hardware, .. } = self {
            hardware.start_clock(frames)?;
        }
        Ok(())
    }

    fn stop(&self) {
        if let Host::Simulated { hardware, .. } = self {
            hardware.stop_clock();
        }
    }

    fn begin_interruption(&self) {
        match self {
            Host::Simulated { session, .. } => session.begin_interruption(InterruptionReason::Default),
            #[cfg(feature = "device-cpal")]
            Host::Cpal { session } => session.emit(rtcaudio_device::SessionEvent::InterruptionBegan {
                reason: Some(InterruptionReason::Default),
                was_suspended: false,
            }),
        }
    }

    fn end_interruption(&self) {
        match self {
            Host::Simulated { session, .. } => session.end_interruption(true),
            #[cfg(feature = "device-cpal")]
            Host::Cpal { session } => session.emit(rtcaudio_device::SessionEvent::InterruptionEnded {
                options: rtcaudio_device::session::InterruptionOptions { should_resume: true },
            }),
        }
    }

    fn change_route(&self) {
        match self {
            Host::Simulated { session, .. } => session.change_route(RouteChangeReason::NewDeviceAvailable),
            #[cfg(feature = "device-cpal")]
            Host::Cpal { session } => session.emit(rtcaudio_device::SessionEvent::RouteChanged {
                reason: RouteChangeReason::NewDeviceAvailable,
            }),
        }
    }
}

fn build(args: &Args, config: AdapterConfig) -> Result<(AudioDeviceAdapter, Host)> {
    #[cfg(feature = "device-cpal")]
    if args.cpal {
        let driver = Arc::new(rtcaudio_device::CpalDriver::new());
        info!("{}", driver.describe_devices());
        let session = Arc::new(rtcaudio_device::HostSession::new(driver.clone()));
        let adapter = AudioDeviceAdapter::with_driver(config, session.clone(), driver)?;
        return Ok((adapter, Host::Cpal { session }));
    }
    let _ = args;

    let hardware = SimulatedHardware::default();
    let adapter = AudioDeviceAdapter::with_simulated_hardware(config, &hardware)?;
    let session = SimulatedSession::new(&hardware);
    Ok((adapter, Host::Simulated { hardware, session }))
}

/// Run `f` on the control queue without blocking the runtime
async fn on_queue<R, F>(queue: &Arc<ControlQueue>, f: F) -> Result<R>
where
    R: Send + 'static,
    F: FnOnce() -> R + Send + 'static,
{
    let queue = queue.clone();
    tokio::task::spawn_blocking(move || queue.run_sync(f))
        .await?
        .context("control queue is shut down")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = args.adapter_config()?;
    info!(
        "Starting loopback: backend={}, echo cancellation={:?}, {} s",
        config.backend, config.echo_cancellation, args.seconds
    );

    let (adapter, host) = build(&args, config)?;
    let frames = args
        .frames
        .unwrap_or_else(|| frames_for_duration(adapter.output_sample_rate(), adapter.output_io_buffer_duration()))
        .max(1);
    let queue = ControlQueue::new("loopback-control")?;
    let capacity = frames * 16;
    let delegate = Arc::new(LoopbackDelegate::new(queue.clone(), capacity, 48000.0));
    let as_delegate: Arc<dyn AudioDeviceDelegate> = delegate.clone();

    let started = {
        let adapter = adapter.clone();
        on_queue(&queue, move || {
            adapter.initialize(&as_delegate) && adapter.start_recording() && adapter.start_playout()
        })
        .await?
    };
    if !started {
        warn!("Adapter refused to start");
    }
    info!(
        "Input {} Hz x{}, output {} Hz x{}",
        adapter.input_sample_rate(),
        adapter.input_channels(),
        adapter.output_sample_rate(),
        adapter.output_channels()
    );

    info!("Rendering {} frames per cycle", frames);
    host.start(frames)?;

    let total = Duration::from_secs(args.seconds);
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    let begin = tokio::time::Instant::now();
    let mut scenario_done = !args.scenario;
    loop {
        interval.tick().await;
        let elapsed = begin.elapsed();
        if elapsed >= total {
            break;
        }

        let stats = delegate.stats();
        info!(
            "captured={} played={} underruns={} overruns={} running={}",
            stats.captured_frames,
            stats.played_frames,
            stats.underruns,
            stats.overruns,
            adapter.runtime_state().is_hardware_running
        );

        if !scenario_done && elapsed >= total / 2 {
            scenario_done = true;
            info!("Interrupting session");
            host.begin_interruption();
            tokio::time::sleep(Duration::from_millis(200)).await;
            info!("Ending interruption and rerouting");
            host.end_interruption();
            host.change_route();
        }
    }

    if let Some(capture) = adapter.capture_stats() {
        info!("Capture bridge: {:?}", capture);
    }
    if let Some(playout) = adapter.playout_stats() {
        info!("Playout bridge: {:?}", playout);
    }
    {
        let adapter = adapter.clone();
        on_queue(&queue, move || adapter.terminate()).await?;
    }
    host.stop();
    queue.shutdown();

    let stats = delegate.stats();
    println!(
        "captured {} frames, played {} frames, {} underruns, {} overruns, \
         {} input changes, {} output changes, {} interruptions",
        stats.captured_frames,
        stats.played_frames,
        stats.underruns,
        stats.overruns,
        stats.input_changes,
        stats.output_changes,
        stats.interruptions
    );
    Ok(())
}
