//! Small helpers shared by the adapter and backends

use std::time::Instant;

use tracing::debug;

/// Run `f` and log how long it took at debug level
///
/// Used around hardware operations (start, stop, allocation, node
/// attachment) which may take hundreds of milliseconds on real devices.
pub fn measure_time<T>(label: &str, f: impl FnOnce() -> T) -> T {
    let started = Instant::now();
    let result = f();
    debug!("{} took {:?}", label, started.elapsed());
    result
}

/// Convert a duration in seconds to a frame count at `sample_rate`
pub fn frames_for_duration(sample_rate: f64, seconds: f64) -> usize {
    if sample_rate <= 0.0 || !seconds.is_finite() || seconds <= 0.0 {
        return 0;
    }
    (sample_rate * seconds).round() as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn test_measure_time_returns_value_and_logs() {
        let value = measure_time("answer", || 42);
        assert_eq!(value, 42);
        assert!(logs_contain("answer took"));
    }

    #[test]
    fn test_frames_for_duration() {
        assert_eq!(frames_for_duration(48000.0, 0.01), 480);
        assert_eq!(frames_for_duration(16000.0, 0.02), 320);
        assert_eq!(frames_for_duration(0.0, 0.02), 0);
        assert_eq!(frames_for_duration(48000.0, f64::NAN), 0);
    }
}
