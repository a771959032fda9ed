use std::time::Duration;

use tick_api::{DecodeError, Event, SubscriberReport, now_ms, wire};

/// Frame kind as received, decoded only when sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Text,
    Binary,
}

pub fn decode(kind: FrameKind, frame: &[u8]) -> Result<Event, DecodeError> {
    match kind {
        FrameKind::Text => wire::decode_text(frame),
        FrameKind::Binary => wire::decode_binary(frame),
    }
}

/// Per-second throughput and sampled latency.
///
/// Every frame is counted; only every `sample_every`-th is decoded, which
/// keeps per-frame cost to a counter increment at high rates.
pub struct Meter {
    sample_every: u64,
    total: u64,
    window: u64,
    latencies: Vec<f64>,
    decode_errors: u64,
}

impl Meter {
    pub fn new(sample_every: u64) -> Self {
        Self {
            sample_every,
            total: 0,
            window: 0,
            latencies: Vec::new(),
            decode_errors: 0,
        }
    }

    /// Count one frame; decode it if it falls on the sampling stride.
    pub fn observe(&mut self, kind: FrameKind, frame: &[u8]) {
        let index = self.total;
        self.total += 1;
        self.window += 1;

        if self.sample_every == 0 || index % self.sample_every != 0 {
            return;
        }
        match decode(kind, frame) {
            Ok(event) => self.record_latency((now_ms() - event.timestamp).max(0) as f64),
            Err(e) => {
                self.decode_errors += 1;
                tracing::debug!(error = %e, len = frame.len(), "sampled frame did not decode");
            }
        }
    }

    pub fn record_latency(&mut self, ms: f64) {
        self.latencies.push(ms);
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn decode_errors(&self) -> u64 {
        self.decode_errors
    }

    /// Close the current window into a report and start a new one.
    pub fn roll(&mut self, subscriber_id: &str, elapsed: Duration) -> SubscriberReport {
        let secs = elapsed.as_secs_f64();
        let messages_per_second = if secs > 0.0 { self.window as f64 / secs } else { 0.0 };

        let mut latencies = std::mem::take(&mut self.latencies);
        latencies.sort_by(f64::total_cmp);
        let avg_latency_ms = if latencies.is_empty() {
            0.0
        } else {
            latencies.iter().sum::<f64>() / latencies.len() as f64
        };

        self.window = 0;
        SubscriberReport {
            subscriber_id: subscriber_id.to_string(),
            messages_per_second,
            total_messages: self.total,
            avg_latency_ms,
            p99_latency_ms: percentile(&latencies, 99.0),
        }
    }
}

/// Nearest-rank percentile of an ascending slice, 0 when empty.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (p / 100.0 * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
