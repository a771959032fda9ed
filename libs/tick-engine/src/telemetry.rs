use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use tick_api::{SubscriberReport, SubscriberStatsView, now_ms};

use crate::fanout::Fanout;
use crate::lock;

/// A record is reported as disconnected after this long without an update.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(5);

pub const SAMPLE_PERIOD: Duration = Duration::from_secs(1);

struct Record {
    report: SubscriberReport,
    last_update: i64,
    received_at: Instant,
}

/// Egress rate plus the latest self-reported stats per subscriber id.
///
/// Stale records are kept and flagged, never evicted; only
/// [`TelemetryAggregator::clear`] removes them.
pub struct TelemetryAggregator {
    records: Mutex<HashMap<String, Record>>,
    egress_rate: AtomicU64,
    stale_after: Duration,
}

impl Default for TelemetryAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_STALE_AFTER)
    }
}

impl TelemetryAggregator {
    pub fn new(stale_after: Duration) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            egress_rate: AtomicU64::new(0f64.to_bits()),
            stale_after,
        }
    }

    /// Insert or overwrite the record for `report.subscriber_id`.
    pub fn record(&self, report: SubscriberReport) {
        let record = Record {
            last_update: now_ms(),
            received_at: Instant::now(),
            report,
        };
        lock(&self.records).insert(record.report.subscriber_id.clone(), record);
    }

    pub fn clear(&self) {
        let mut records = lock(&self.records);
        let dropped = records.len();
        records.clear();
        tracing::info!(dropped, "subscriber stats cleared");
    }

    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Store `sent / elapsed` as the current egress rate and return it.
    pub fn sample(&self, sent: u64, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        let rate = if secs > 0.0 { sent as f64 / secs } else { 0.0 };
        self.egress_rate.store(rate.to_bits(), Ordering::Relaxed);
        rate
    }

    pub fn egress_rate(&self) -> f64 {
        f64::from_bits(self.egress_rate.load(Ordering::Relaxed))
    }

    /// All records keyed by subscriber id, each flagged by staleness.
    pub fn subscribers(&self) -> BTreeMap<String, SubscriberStatsView> {
        let now = Instant::now();
        lock(&self.records)
            .iter()
            .map(|(id, record)| {
                let age = now.duration_since(record.received_at);
                let view = SubscriberStatsView {
                    report: record.report.clone(),
                    last_update: record.last_update,
                    age_ms: age.as_millis() as u64,
                    connected: age <= self.stale_after,
                };
                (id.clone(), view)
            })
            .collect()
    }

    /// Sample `fanout`'s send counter every `period` until `shutdown` fires.
    pub fn spawn_sampler(
        self: Arc<Self>,
        fanout: Arc<Fanout>,
        period: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last = Instant::now();

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let now = Instant::now();
                        let sent = fanout.take_sent();
                        let rate = self.sample(sent, now.duration_since(last));
                        last = now;
                        tracing::debug!(sent, egress_rate = rate, "egress sampled");
                    }
                }
            }
            tracing::debug!("telemetry sampler stopped");
        })
    }
}
