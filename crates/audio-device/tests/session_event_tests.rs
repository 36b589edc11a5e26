//! Session events driving the adapter through simulated hardware

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{wait_for, wait_for_tasks, DelegateEvent, TestDelegate};
use rtcaudio_device::session::InterruptionReason;
use rtcaudio_device::{
    AdapterConfig, AudioDeviceAdapter, BackendKind, RouteChangeReason, SimulatedHardware, SimulatedSession,
};
use tracing_test::traced_test;

struct Fixture {
    hardware: SimulatedHardware,
    session: SimulatedSession,
    adapter: AudioDeviceAdapter,
    delegate: Arc<TestDelegate>,
}

fn fixture(kind: BackendKind) -> Fixture {
    let hardware = SimulatedHardware::default();
    let session = SimulatedSession::new(&hardware);
    let adapter =
        AudioDeviceAdapter::with_simulated_hardware(AdapterConfig::default().with_backend(kind), &hardware).unwrap();
    let delegate = TestDelegate::manual();
    assert!(adapter.initialize(&delegate.as_delegate()));
    Fixture {
        hardware,
        session,
        adapter,
        delegate,
    }
}

/// Give the event thread time to deliver anything still in flight
fn settle() {
    std::thread::sleep(Duration::from_millis(100));
}

#[test]
fn test_interruption_quiesces_and_resumes() {
    for kind in [BackendKind::FusedUnit, BackendKind::Graph] {
        let f = fixture(kind);
        f.adapter.start_playout();
        f.adapter.start_recording();
        assert_eq!(f.hardware.running_streams(), 1);

        f.session.begin_interruption(InterruptionReason::Default);
        assert!(wait_for_tasks(&f.delegate, 1));
        assert!(f.adapter.is_interrupted());
        f.delegate.run_pending();

        assert!(f.adapter.is_playing());
        assert!(f.adapter.is_recording());
        assert!(!f.adapter.runtime_state().is_hardware_running);
        assert_eq!(f.hardware.open_streams(), 0);
        assert!(f.adapter.has_backend());
        assert!(f.delegate.events().contains(&DelegateEvent::OutputInterrupted));
        assert!(f.delegate.events().contains(&DelegateEvent::InputInterrupted));

        f.session.end_interruption(true);
        assert!(wait_for_tasks(&f.delegate, 1));
        f.delegate.run_pending();

        assert!(!f.adapter.is_interrupted());
        assert!(f.adapter.runtime_state().is_hardware_running);
        assert_eq!(f.hardware.running_streams(), 1);
        f.adapter.terminate();
    }
}

#[test]
fn test_interrupted_hardware_reports_session_format_before_reconcile() {
    for kind in [BackendKind::FusedUnit, BackendKind::Graph] {
        let f = fixture(kind);
        f.adapter.start_playout();
        f.hardware.set_output_channels(1);
        assert_eq!(f.adapter.output_channels(), 2, "{}", kind);

        f.session.begin_interruption(InterruptionReason::Default);
        assert!(f.adapter.runtime_state().is_hardware_running);
        assert_eq!(f.adapter.output_channels(), 1, "{}", kind);

        assert!(wait_for_tasks(&f.delegate, 1));
        f.delegate.run_pending();
        assert_eq!(f.adapter.output_channels(), 1);
        f.adapter.terminate();
    }
}

#[test]
fn test_app_suspension_is_not_an_interruption() {
    let f = fixture(BackendKind::FusedUnit);
    f.adapter.start_playout();

    f.session.begin_interruption(InterruptionReason::AppWasSuspended);
    f.session.begin_legacy_interruption(true);
    settle();

    assert_eq!(f.delegate.pending_tasks(), 0);
    assert!(!f.adapter.is_interrupted());
    assert_eq!(f.hardware.running_streams(), 1);
}

#[test]
fn test_legacy_interruption_without_suspension() {
    let f = fixture(BackendKind::FusedUnit);
    f.adapter.start_playout();

    f.session.begin_legacy_interruption(false);
    assert!(wait_for(Duration::from_secs(2), || f.adapter.is_interrupted()));
    assert!(wait_for_tasks(&f.delegate, 1));
    f.delegate.run_pending();
    assert!(!f.adapter.runtime_state().is_hardware_running);
}

#[test]
fn test_start_while_interrupted_waits() {
    let f = fixture(BackendKind::Graph);
    f.session.begin_interruption(InterruptionReason::RouteDisconnected);
    assert!(wait_for(Duration::from_secs(2), || f.adapter.is_interrupted()));

    assert!(f.adapter.start_playout());
    assert!(f.adapter.is_playing());
    assert_eq!(f.hardware.counters().opens, 0);

    f.session.end_interruption(false);
    assert!(wait_for_tasks(&f.delegate, 1));
    f.delegate.run_pending();
    assert_eq!(f.hardware.running_streams(), 1);
}

#[test]
fn test_route_change_while_inactive_starts_nothing() {
    let f = fixture(BackendKind::FusedUnit);
    f.session.change_route(RouteChangeReason::NewDeviceAvailable);
    assert!(wait_for_tasks(&f.delegate, 1));
    f.delegate.run_pending();
    assert_eq!(f.hardware.counters().opens, 0);
    assert!(!f.adapter.has_backend());

    f.adapter.start_playout();
    f.adapter.stop_playout();
    let counters = f.hardware.counters();
    f.session.change_route(RouteChangeReason::OldDeviceUnavailable);
    assert!(wait_for_tasks(&f.delegate, 1));
    f.delegate.run_pending();
    assert_eq!(f.hardware.counters().starts, counters.starts);
    assert_eq!(f.hardware.running_streams(), 0);
}

#[test]
fn test_event_reconciles_are_coalesced() {
    let f = fixture(BackendKind::Graph);
    f.adapter.start_playout();

    f.session.change_route(RouteChangeReason::CategoryChange);
    f.session.change_route(RouteChangeReason::Override);
    f.session.change_route(RouteChangeReason::RouteConfigurationChange);
    assert!(wait_for_tasks(&f.delegate, 1));
    settle();

    assert_eq!(f.delegate.pending_tasks(), 1);
    assert_eq!(f.delegate.run_pending(), 1);

    f.session.change_route(RouteChangeReason::Override);
    assert!(wait_for_tasks(&f.delegate, 1));
}

#[test]
fn test_route_change_to_new_sample_rate_recreates_backend() {
    for kind in [BackendKind::FusedUnit, BackendKind::Graph] {
        let f = fixture(kind);
        f.adapter.start_playout();
        assert_eq!(f.adapter.output_sample_rate(), 48000.0);

        f.hardware.set_sample_rate(16000.0);
        f.session.change_route(RouteChangeReason::NewDeviceAvailable);
        assert!(wait_for_tasks(&f.delegate, 1));
        f.delegate.run_pending();

        assert_eq!(f.hardware.counters().opens, 2);
        assert_eq!(f.hardware.running_streams(), 1);
        assert_eq!(f.adapter.output_sample_rate(), 16000.0);
        assert!(f.delegate.events().iter().any(
            |e| matches!(e, DelegateEvent::OutputChanged(format) if format.sample_rate == 16000.0)
        ));
    }
}

#[test]
#[traced_test]
fn test_media_services_reset_rebuilds_hardware() {
    let f = fixture(BackendKind::FusedUnit);
    f.adapter.start_playout();
    f.adapter.start_recording();
    assert_eq!(f.hardware.counters().opens, 1);

    f.session.reset_media_services();
    assert!(wait_for_tasks(&f.delegate, 1));
    f.delegate.run_pending();

    assert_eq!(f.hardware.counters().opens, 2);
    assert_eq!(f.hardware.running_streams(), 1);
    assert!(f.adapter.runtime_state().is_hardware_running);
    assert!(logs_contain("media services were reset"));
}

#[test]
fn test_media_services_lost_waits_for_reset() {
    let f = fixture(BackendKind::Graph);
    f.adapter.start_playout();

    f.session.lose_media_services();
    settle();
    assert_eq!(f.delegate.pending_tasks(), 0);
    assert_eq!(f.hardware.running_streams(), 0);

    f.session.reset_media_services();
    assert!(wait_for_tasks(&f.delegate, 1));
    f.delegate.run_pending();
    assert_eq!(f.hardware.running_streams(), 1);
    assert_eq!(f.hardware.counters().opens, 2);
}

#[test]
fn test_events_after_terminate_are_ignored() {
    let f = fixture(BackendKind::FusedUnit);
    f.adapter.start_playout();
    f.adapter.terminate();

    f.session.begin_interruption(InterruptionReason::Default);
    f.session.change_route(RouteChangeReason::Unknown);
    settle();

    assert_eq!(f.delegate.pending_tasks(), 0);
    assert!(!f.adapter.is_interrupted());
    assert_eq!(f.hardware.open_streams(), 0);
}

#[test]
fn test_scheduled_reconcile_after_terminate_is_harmless() {
    let f = fixture(BackendKind::FusedUnit);
    f.adapter.start_playout();
    f.session.change_route(RouteChangeReason::Override);
    assert!(wait_for_tasks(&f.delegate, 1));

    f.adapter.terminate();
    let events = f.delegate.events();
    f.delegate.run_pending();

    assert_eq!(f.delegate.events(), events);
    assert_eq!(f.hardware.open_streams(), 0);
}
