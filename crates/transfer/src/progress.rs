use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

const DEFAULT_WINDOW: Duration = Duration::from_secs(10);
const DEFAULT_MAX_SAMPLES: usize = 256;

#[derive(Debug, Clone, Copy)]
struct Sample {
    bytes: u64,
    at: Instant,
}

/// Byte rate over a sliding time window.
///
/// Parts complete in bursts, so the rate runs from the start of the window
/// to now. Until a sample has aged out, the window starts at creation time.
pub struct Throughput {
    inner: Mutex<ThroughputInner>,
}

struct ThroughputInner {
    samples: VecDeque<Sample>,
    window: Duration,
    max_samples: usize,
    /// Start of the measured span.
    origin: Instant,
    total: u64,
}

impl Default for Throughput {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl Throughput {
    /// `window` defaults to 10 s and `max_samples` to 256.
    pub fn new(window: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self::starting_at(Instant::now(), window, max_samples)
    }

    fn starting_at(origin: Instant, window: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(ThroughputInner {
                samples: VecDeque::new(),
                window: window.unwrap_or(DEFAULT_WINDOW),
                max_samples: max_samples.unwrap_or(DEFAULT_MAX_SAMPLES).max(1),
                origin,
                total: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ThroughputInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records `bytes` finished now.
    pub fn record(&self, bytes: u64) {
        self.record_at(bytes, Instant::now());
    }

    fn record_at(&self, bytes: u64, at: Instant) {
        let mut s = self.lock();
        s.total += bytes;
        s.samples.push_back(Sample { bytes, at });

        let window = s.window;
        let max = s.max_samples;
        while let Some(first) = s.samples.front().copied() {
            if at.duration_since(first.at) <= window && s.samples.len() <= max {
                break;
            }
            s.samples.pop_front();
            s.origin = first.at;
        }
    }

    /// Total bytes recorded since creation.
    pub fn total_bytes(&self) -> u64 {
        self.lock().total
    }

    /// Average bytes/second within the window; 0.0 before any sample.
    pub fn bytes_per_second(&self) -> f64 {
        self.rate_at(Instant::now())
    }

    fn rate_at(&self, now: Instant) -> f64 {
        let s = self.lock();
        if s.samples.is_empty() {
            return 0.0;
        }
        let elapsed = now.saturating_duration_since(s.origin);
        if elapsed.is_zero() {
            return 0.0;
        }
        let bytes: u64 = s.samples.iter().map(|x| x.bytes).sum();
        bytes as f64 / elapsed.as_secs_f64()
    }

    /// Estimated time to move `remaining` bytes at the current rate.
    pub fn eta(&self, remaining: u64) -> Option<Duration> {
        let rate = self.bytes_per_second();
        if rate <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining as f64 / rate))
    }
}
