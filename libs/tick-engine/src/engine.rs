use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use tick_api::{ClientMessage, Payload, RateConfig, RateConfigPatch, StatsSnapshot};

use crate::fanout::{ConnectionId, Fanout};
use crate::generator::EventGenerator;
use crate::lock;
use crate::ramp::{self, RampController, RampTarget};
use crate::scheduler::{GenerationToken, PacingMode, PacingScheduler, SchedulerState};
use crate::serializer::{DEFAULT_CACHE_TTL, Serializer};
use crate::telemetry::{DEFAULT_STALE_AFTER, SAMPLE_PERIOD, TelemetryAggregator};

// ═══════════════════════════════════════════════════════════════
//  EngineSettings
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub initial: RateConfig,
    pub stale_after: Duration,
    /// Lifetime of a cached encoding; `None` gives every message its own
    /// event and timestamp.
    pub encode_cache: Option<Duration>,
    pub sample_period: Duration,
    /// Fixed generator seed, entropy when `None`.
    pub seed: Option<u64>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            initial: RateConfig::default(),
            stale_after: DEFAULT_STALE_AFTER,
            encode_cache: Some(DEFAULT_CACHE_TTL),
            sample_period: SAMPLE_PERIOD,
            seed: None,
        }
    }
}

/// Receiving end of one data-channel connection.
pub struct Subscription {
    pub id: ConnectionId,
    pub rx: mpsc::UnboundedReceiver<Payload>,
}

// ═══════════════════════════════════════════════════════════════
//  Engine
// ═══════════════════════════════════════════════════════════════

/// Cloneable handle to one broadcast engine.
///
/// Configuration changes and subscriber-count transitions are serialized on
/// the config lock, and each one restarts the pacing scheduler under that
/// lock, so two strategies can never overlap.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

struct Inner {
    config: Mutex<RateConfig>,
    scheduler: PacingScheduler,
    fanout: Arc<Fanout>,
    telemetry: Arc<TelemetryAggregator>,
    shutdown: CancellationToken,
    sampler: Mutex<Option<JoinHandle<()>>>,
    weak: Weak<Inner>,
}

impl Engine {
    /// Build the engine and start its telemetry sampler. Pacing stays stopped
    /// until the first subscription. Must be called inside a tokio runtime.
    pub fn start(settings: EngineSettings) -> Self {
        let generator = match settings.seed {
            Some(seed) => EventGenerator::seeded(seed),
            None => EventGenerator::new(),
        };
        let serializer = Serializer::new(generator).with_ttl(settings.encode_cache);
        let fanout = Arc::new(Fanout::new());
        let telemetry = Arc::new(TelemetryAggregator::new(settings.stale_after));
        let shutdown = CancellationToken::new();

        let inner = Arc::new_cyclic(|weak| Inner {
            config: Mutex::new(settings.initial.clone()),
            scheduler: PacingScheduler::new(serializer, Arc::clone(&fanout)),
            fanout: Arc::clone(&fanout),
            telemetry: Arc::clone(&telemetry),
            shutdown: shutdown.clone(),
            sampler: Mutex::new(None),
            weak: weak.clone(),
        });

        let sampler = telemetry.spawn_sampler(fanout, settings.sample_period, shutdown);
        *lock(&inner.sampler) = Some(sampler);

        tracing::info!(
            target_rate = settings.initial.target_rate,
            format = %settings.initial.format,
            ramp_enabled = settings.initial.ramp_enabled,
            encode_cache_us = settings.encode_cache.map(|d| d.as_micros() as u64),
            "engine started"
        );
        Self { inner }
    }

    // ── control boundary ──────────────────────────────────────

    /// Merge `patch` into the live configuration and restart pacing. Always
    /// restarts, even for an empty patch.
    pub fn apply_config(&self, patch: &RateConfigPatch) -> RateConfig {
        let mut config = lock(&self.inner.config);
        config.merge(patch);
        let applied = config.clone();
        self.inner.restart(&applied);
        tracing::info!(
            target_rate = applied.target_rate,
            format = %applied.format,
            ramp_enabled = applied.ramp_enabled,
            ramp_percent = applied.ramp_percent,
            ramp_interval_seconds = applied.ramp_interval_seconds,
            "config applied"
        );
        applied
    }

    pub fn config(&self) -> RateConfig {
        lock(&self.inner.config).clone()
    }

    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            egress_rate: self.inner.telemetry.egress_rate(),
            target_rate: lock(&self.inner.config).target_rate,
            connections: self.inner.fanout.len(),
            subscribers: self.inner.telemetry.subscribers(),
        }
    }

    pub fn clear_stats(&self) {
        self.inner.telemetry.clear();
    }

    // ── transport hooks ───────────────────────────────────────

    /// Register a data-channel connection. The first one starts pacing.
    /// After shutdown the returned subscription is already closed.
    pub fn subscribe(&self) -> Subscription {
        let config = lock(&self.inner.config);
        if self.inner.shutdown.is_cancelled() {
            let (_, rx) = mpsc::unbounded_channel();
            tracing::debug!("subscribe after shutdown, returning closed stream");
            return Subscription { id: 0, rx };
        }
        let (id, rx) = self.inner.fanout.add();
        let connections = self.inner.fanout.len();
        if connections == 1 {
            self.inner.restart(&config);
        }
        tracing::info!(connection_id = id, connections, "subscriber connected");
        Subscription { id, rx }
    }

    /// Drop a connection. The last one out stops pacing.
    pub fn unsubscribe(&self, id: ConnectionId) {
        let _config = lock(&self.inner.config);
        let Some(member) = self.inner.fanout.remove(id) else {
            return;
        };
        let connections = self.inner.fanout.len();
        if connections == 0 {
            self.inner.scheduler.stop();
            tracing::info!("no subscribers left, pacing stopped");
        }
        tracing::info!(
            connection_id = id,
            subscriber = member.identity().as_deref().unwrap_or("-"),
            connections,
            "subscriber disconnected"
        );
    }

    /// Handle one back-channel text frame from connection `id`. Anything
    /// that does not parse is dropped.
    pub fn handle_client_message(&self, id: ConnectionId, text: &str) {
        match ClientMessage::parse(text) {
            Some(ClientMessage::Identify { subscriber_id }) => {
                if self.inner.fanout.set_identity(id, &subscriber_id) {
                    tracing::info!(connection_id = id, subscriber = %subscriber_id, "subscriber identified");
                }
            }
            Some(ClientMessage::Stats(report)) => {
                tracing::trace!(connection_id = id, subscriber = %report.subscriber_id, "stats report");
                self.inner.telemetry.record(report);
            }
            None => {
                tracing::trace!(connection_id = id, len = text.len(), "discarding back-channel frame");
            }
        }
    }

    // ── introspection ─────────────────────────────────────────

    pub fn mode(&self) -> PacingMode {
        self.inner.scheduler.mode()
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.inner.scheduler.state()
    }

    pub fn connections(&self) -> usize {
        self.inner.fanout.len()
    }

    pub fn identity(&self, id: ConnectionId) -> Option<String> {
        self.inner.fanout.identity(id)
    }

    /// Messages handed to fanout since start.
    pub fn total_sent(&self) -> u64 {
        self.inner.fanout.total_sent()
    }

    /// Stop pacing and telemetry and close every subscription; each
    /// receiver sees the end of its stream.
    pub fn shutdown(&self) {
        let _config = lock(&self.inner.config);
        self.inner.shutdown.cancel();
        self.inner.scheduler.stop();
        if let Some(sampler) = lock(&self.inner.sampler).take() {
            sampler.abort();
        }
        let closed = self.inner.fanout.clear();
        tracing::info!(closed, "engine shut down");
    }
}

impl Inner {
    /// Caller holds the config lock.
    fn restart(&self, config: &RateConfig) {
        let token = self.scheduler.stop();
        if self.shutdown.is_cancelled() || self.fanout.is_empty() {
            return;
        }

        let mode = self.scheduler.start(&token, config.target_rate, config.format);
        if mode == PacingMode::Stopped {
            tracing::info!(target_rate = config.target_rate, "pacing stopped by configuration");
            return;
        }

        if let Some(ramp) = RampController::from_config(config) {
            let handle = ramp::spawn(ramp, token.clone(), self.weak.clone());
            self.scheduler.track(handle);
        }
        tracing::info!(
            generation = token.generation(),
            target_rate = config.target_rate,
            %mode,
            "pacing restarted"
        );
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl RampTarget for Inner {
    fn ramp_step(&self, token: &GenerationToken, controller: &RampController) -> bool {
        let mut config = lock(&self.config);
        // A manual change may have landed between the tick and the lock.
        if !token.is_current() || self.fanout.is_empty() {
            return false;
        }
        let from = config.target_rate;
        config.target_rate = controller.next_rate(from);
        let applied = config.clone();
        tracing::info!(from, to = applied.target_rate, "ramp step");
        self.restart(&applied);
        true
    }
}

#[cfg(test)]
mod tests {
    use tick_api::{SubscriberReport, WireFormat};

    use super::*;

    fn settings(rate: i64) -> EngineSettings {
        EngineSettings {
            initial: RateConfig {
                target_rate: rate,
                ..RateConfig::default()
            },
            seed: Some(17),
            ..EngineSettings::default()
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Payload>) -> usize {
        let mut n = 0;
        while rx.try_recv().is_ok() {
            n += 1;
        }
        n
    }

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn idle_until_first_subscriber() {
        let engine = Engine::start(settings(100));
        assert_eq!(engine.mode(), PacingMode::Stopped);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(engine.total_sent(), 0);

        let mut sub = engine.subscribe();
        assert_eq!(engine.mode(), PacingMode::Interval);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(drain(&mut sub.rx) >= 50);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_last_subscriber_leaves_and_resumes() {
        let engine = Engine::start(settings(200));
        let a = engine.subscribe();
        let b = engine.subscribe();
        tokio::time::sleep(Duration::from_millis(100)).await;

        engine.unsubscribe(a.id);
        assert_eq!(engine.mode(), PacingMode::Interval);
        engine.unsubscribe(b.id);
        assert_eq!(engine.mode(), PacingMode::Stopped);

        let frozen = engine.total_sent();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(engine.total_sent(), frozen);

        let mut c = engine.subscribe();
        assert_eq!(engine.mode(), PacingMode::Interval);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(drain(&mut c.rx) > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn apply_config_switches_mode_and_bumps_generation() {
        let engine = Engine::start(settings(999));
        let _sub = engine.subscribe();
        let before = engine.scheduler_state();
        assert_eq!(before.mode, PacingMode::Interval);

        let applied = engine.apply_config(&RateConfigPatch::rate(1_001));
        assert_eq!(applied.target_rate, 1_001);
        let after = engine.scheduler_state();
        assert_eq!(after.mode, PacingMode::Batch);
        assert!(after.generation > before.generation);
    }

    #[tokio::test(start_paused = true)]
    async fn non_positive_rate_stops() {
        let engine = Engine::start(settings(100));
        let _sub = engine.subscribe();
        engine.apply_config(&RateConfigPatch::rate(0));
        assert_eq!(engine.mode(), PacingMode::Stopped);
        engine.apply_config(&RateConfigPatch::rate(-3));
        assert_eq!(engine.mode(), PacingMode::Stopped);
        engine.apply_config(&RateConfigPatch::rate(50));
        assert_eq!(engine.mode(), PacingMode::Interval);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_patch_still_restarts() {
        let engine = Engine::start(settings(100));
        let _sub = engine.subscribe();
        let before = engine.scheduler_state().generation;
        let applied = engine.apply_config(&RateConfigPatch::default());
        assert_eq!(applied, engine.config());
        assert!(engine.scheduler_state().generation > before);
    }

    #[tokio::test(start_paused = true)]
    async fn config_applies_do_not_add_messages() {
        let engine = Engine::start(settings(1));
        let mut sub = engine.subscribe();
        settle().await;
        assert_eq!(drain(&mut sub.rx), 1);

        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            engine.apply_config(&RateConfigPatch::default());
        }
        tokio::time::sleep(Duration::from_millis(650)).await;
        settle().await;
        assert_eq!(drain(&mut sub.rx), 0);

        tokio::time::sleep(Duration::from_millis(50)).await;
        settle().await;
        assert_eq!(drain(&mut sub.rx), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn format_change_reaches_subscribers() {
        let engine = Engine::start(settings(100));
        let mut sub = engine.subscribe();
        tokio::time::sleep(Duration::from_millis(50)).await;
        drain(&mut sub.rx);

        engine.apply_config(&RateConfigPatch {
            format: Some(WireFormat::Binary),
            ..Default::default()
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        let payload = sub.rx.try_recv().unwrap();
        assert_eq!(payload.format(), WireFormat::Binary);
        assert!(tick_api::wire::decode(&payload).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn ramp_compounds_three_ticks() {
        let engine = Engine::start(EngineSettings {
            initial: RateConfig {
                target_rate: 100,
                ramp_enabled: true,
                ramp_percent: 10.0,
                ramp_interval_seconds: 1,
                ..RateConfig::default()
            },
            ..EngineSettings::default()
        });
        let mut sub = engine.subscribe();

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert_eq!(engine.config().target_rate, 133);
        drain(&mut sub.rx);
    }

    #[tokio::test(start_paused = true)]
    async fn ramp_does_not_run_without_subscribers() {
        let engine = Engine::start(EngineSettings {
            initial: RateConfig {
                target_rate: 100,
                ramp_enabled: true,
                ramp_interval_seconds: 1,
                ..RateConfig::default()
            },
            ..EngineSettings::default()
        });
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(engine.config().target_rate, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_change_rebases_ramp() {
        let engine = Engine::start(EngineSettings {
            initial: RateConfig {
                target_rate: 100,
                ramp_enabled: true,
                ramp_percent: 10.0,
                ramp_interval_seconds: 1,
                ..RateConfig::default()
            },
            ..EngineSettings::default()
        });
        let _sub = engine.subscribe();
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(engine.config().target_rate, 110);

        engine.apply_config(&RateConfigPatch::rate(500));
        tokio::time::sleep(Duration::from_millis(1_200)).await;
        assert_eq!(engine.config().target_rate, 550);
    }

    #[tokio::test(start_paused = true)]
    async fn identify_and_stats_populate_one_record() {
        let engine = Engine::start(settings(100));
        let sub = engine.subscribe();

        engine.handle_client_message(sub.id, r#"{"type":"identify","subscriberId":"bench-1"}"#);
        assert_eq!(engine.identity(sub.id).as_deref(), Some("bench-1"));

        let report = SubscriberReport {
            subscriber_id: "bench-1".into(),
            messages_per_second: 90.0,
            total_messages: 900,
            avg_latency_ms: 1.0,
            p99_latency_ms: 3.0,
        };
        engine.handle_client_message(sub.id, &ClientMessage::Stats(report).to_json());
        engine.handle_client_message(sub.id, "garbage");
        engine.handle_client_message(sub.id, r#"{"type":"unknown"}"#);

        let stats = engine.stats();
        assert_eq!(stats.subscribers.len(), 1);
        assert_eq!(stats.subscribers["bench-1"].report.total_messages, 900);
        assert_eq!(stats.target_rate, 100);
        assert_eq!(stats.connections, 1);

        engine.clear_stats();
        engine.clear_stats();
        assert!(engine.stats().subscribers.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_everything() {
        let engine = Engine::start(settings(100));
        let mut sub = engine.subscribe();
        tokio::time::sleep(Duration::from_millis(100)).await;
        engine.shutdown();
        assert_eq!(engine.mode(), PacingMode::Stopped);
        assert_eq!(engine.connections(), 0);
        drain(&mut sub.rx);
        assert_eq!(sub.rx.recv().await, None);

        let mut late = engine.subscribe();
        assert_eq!(late.rx.recv().await, None);
        assert_eq!(engine.connections(), 0);

        let frozen = engine.total_sent();
        engine.apply_config(&RateConfigPatch::rate(200));
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(engine.total_sent(), frozen);
    }
}
