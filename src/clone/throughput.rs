//! Smoothed copy-rate estimation.

use std::{collections::VecDeque, time::Duration, time::Instant};

/// Minimum spacing between two recorded samples.
const SAMPLE_INTERVAL: Duration = Duration::from_millis(500);
/// No estimate is shown until the copy has been running for this long.
const SETTLE_TIME: Duration = Duration::from_secs(10);
/// Minimum spacing between two displayed estimates.
const UPDATE_INTERVAL: Duration = Duration::from_secs(2);
/// Samples older than this are evicted from the window.
const WINDOW: Duration = Duration::from_secs(60);

/// A source of monotonic timestamps, relative to an arbitrary origin.
pub trait Clock {
    fn now(&self) -> Duration;
}

/// Measures time elapsed since the clock was created.
#[derive(Debug)]
pub struct MonotonicClock(Instant);

impl Default for MonotonicClock {
    fn default() -> Self { MonotonicClock(Instant::now()) }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration { self.0.elapsed() }
}

/// A point in time paired with the cumulative number of bytes copied by then.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ThroughputSample {
    pub timestamp: Duration,
    pub copied:    u64,
}

/// A sliding window of throughput samples, used to estimate how long the
/// remainder of a copy will take.
///
/// Samples are non-decreasing in both time and bytes copied.
#[derive(Debug)]
pub struct Throughput {
    samples:     VecDeque<ThroughputSample>,
    settled:     bool,
    last_update: Duration,
}

impl Throughput {
    pub fn new(start: Duration) -> Self {
        let mut samples = VecDeque::with_capacity(128);
        samples.push_back(ThroughputSample { timestamp: start, copied: 0 });
        Throughput { samples, settled: false, last_update: start }
    }

    pub fn samples(&self) -> impl Iterator<Item = &ThroughputSample> { self.samples.iter() }

    /// Record the progress made as of `now`, returning the estimated time
    /// remaining whenever a new estimate is due to be displayed.
    pub fn record(&mut self, now: Duration, copied: u64, total: u64) -> Option<Duration> {
        let last = *self.samples.back()?;
        if now < last.timestamp || now - last.timestamp < SAMPLE_INTERVAL {
            return None;
        }

        let copied = copied.max(last.copied);
        self.samples.push_back(ThroughputSample { timestamp: now, copied });

        if !self.settled && now - self.samples[0].timestamp >= SETTLE_TIME {
            self.settled = true;
        }

        if !self.settled || now - self.last_update < UPDATE_INTERVAL {
            return None;
        }

        self.last_update = now;
        while self.samples.len() > 2
            && now - self.samples[0].timestamp > WINDOW
            && now - self.samples[1].timestamp >= WINDOW
        {
            self.samples.pop_front();
        }

        let first = self.samples[0];
        let elapsed = (now - first.timestamp).as_secs_f64();
        let rate = (copied - first.copied) as f64 / elapsed;
        if rate <= 0.0 || !rate.is_finite() {
            return None;
        }

        let remaining = total.saturating_sub(copied) as f64 / rate;
        Some(Duration::from_secs(remaining as u64))
    }
}
