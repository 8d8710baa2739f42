//! Throughput reporting for raw memory transfers.

use std::time::{Duration, Instant};

use log::debug;

/// Largest binary unit `bytes` fills, and the count in that unit.
fn scaled_size(bytes: usize) -> (usize, &'static str) {
    if bytes >= 1 << 20 {
        (bytes >> 20, "Mi")
    } else if bytes >= 1 << 10 {
        (bytes >> 10, "Ki")
    } else {
        (bytes, "")
    }
}

/// Renders the throughput of moving `bytes` in `elapsed`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_throughput(bytes: usize, elapsed: Duration) -> String {
    let (amount, unit) = scaled_size(bytes);
    let sec = elapsed.as_secs_f64();
    let rate = bytes as f64 / sec;
    format!(
        "{amount} {unit}B / {:.3} msec ({:.1} MiB/s = {:.1} MB/s)",
        sec * 1000.0,
        rate / f64::from(1 << 20),
        rate / 1_000_000.0
    )
}

/// Wall-clock stopwatch around a transfer; inert when diagnostics are off.
#[derive(Debug)]
pub struct Stopwatch {
    start: Option<Instant>,
}

impl Stopwatch {
    /// Starts timing when `enabled`.
    #[must_use]
    pub fn start(enabled: bool) -> Self {
        Self {
            start: enabled.then(Instant::now),
        }
    }

    /// Logs the throughput of `bytes` moved since the stopwatch started.
    pub fn report(self, bytes: usize) {
        if let Some(start) = self.start {
            debug!("{}", format_throughput(bytes, start.elapsed()));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{format_throughput, scaled_size, Stopwatch};

    #[test]
    fn sizes_scale_to_largest_filled_unit() {
        assert_eq!(scaled_size(512), (512, ""));
        assert_eq!(scaled_size(4096), (4, "Ki"));
        assert_eq!(scaled_size(3 << 20), (3, "Mi"));
    }

    #[test]
    fn throughput_reports_both_unit_systems() {
        assert_eq!(
            format_throughput(1 << 20, Duration::from_millis(500)),
            "1 MiB / 500.000 msec (2.0 MiB/s = 2.1 MB/s)"
        );
    }

    #[test]
    fn disabled_stopwatch_is_inert() {
        let stopwatch = Stopwatch::start(false);
        assert!(stopwatch.start.is_none());
        stopwatch.report(10);
    }
}
