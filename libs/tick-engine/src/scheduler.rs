//! Rate-banded pacing.
//!
//! | Rate (msg/s)        | Mode     | Mechanism                                   |
//! |---------------------|----------|---------------------------------------------|
//! | `R <= 0`            | Stopped  | nothing runs                                |
//! | `R <= 1_000`        | Interval | one wake-up per message                     |
//! | `R <= 10_000`       | Batch    | 1ms wake-ups, `ceil(R / 1000)` per wake-up  |
//! | `R > 10_000`        | BusyLoop | clock-driven quota, `yield_now` per burst   |
//!
//! A restarted strategy picks up from the scheduled instant of the last send,
//! so a config change neither repeats nor skips the tick in progress.
//!
//! Every restart bumps a shared generation counter before the previous task is
//! aborted. Tasks carry the [`GenerationToken`] they were spawned with and
//! re-check it per message, so a task that is mid-burst when a restart lands
//! stops sending at the next message boundary.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use tick_api::WireFormat;

use crate::fanout::Fanout;
use crate::lock;
use crate::serializer::Serializer;

pub const INTERVAL_MAX_RATE: i64 = 1_000;
pub const BATCH_MAX_RATE: i64 = 10_000;

const BATCH_PERIOD: Duration = Duration::from_millis(1);

/// Upper bound on one BusyLoop burst, whatever the rate.
pub const MAX_BURST: u64 = 10_000;

// ═══════════════════════════════════════════════════════════════
//  PacingMode
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacingMode {
    Stopped,
    Interval,
    Batch,
    BusyLoop,
}

impl PacingMode {
    pub fn for_rate(rate: i64) -> Self {
        match rate {
            r if r <= 0 => PacingMode::Stopped,
            r if r <= INTERVAL_MAX_RATE => PacingMode::Interval,
            r if r <= BATCH_MAX_RATE => PacingMode::Batch,
            _ => PacingMode::BusyLoop,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PacingMode::Stopped => "stopped",
            PacingMode::Interval => "interval",
            PacingMode::Batch => "batch",
            PacingMode::BusyLoop => "busy_loop",
        }
    }
}

impl std::fmt::Display for PacingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Messages per batch wake-up.
pub fn batch_size(rate: i64) -> u64 {
    (rate.max(0) as u64).div_ceil(1_000)
}

// ═══════════════════════════════════════════════════════════════
//  GenerationToken
// ═══════════════════════════════════════════════════════════════

/// Proof that a task belongs to the current scheduler generation.
#[derive(Debug, Clone)]
pub struct GenerationToken {
    current: Arc<AtomicU64>,
    issued: u64,
}

impl GenerationToken {
    pub fn is_current(&self) -> bool {
        self.current.load(Ordering::Acquire) == self.issued
    }

    pub fn generation(&self) -> u64 {
        self.issued
    }
}

// ═══════════════════════════════════════════════════════════════
//  SchedulerState
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerState {
    pub mode: PacingMode,
    pub generation: u64,
    /// Scheduled instant of the most recent burst, `None` until something
    /// was sent.
    pub last_send: Option<Instant>,
}

struct Source {
    serializer: Serializer,
    last_send: Option<Instant>,
}

// ═══════════════════════════════════════════════════════════════
//  PacingScheduler
// ═══════════════════════════════════════════════════════════════

/// Single pacing authority. At most one strategy task runs at a time; any
/// companion tasks registered with [`PacingScheduler::track`] are torn down
/// with it.
pub struct PacingScheduler {
    generation: Arc<AtomicU64>,
    mode: Mutex<PacingMode>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    source: Arc<Mutex<Source>>,
    fanout: Arc<Fanout>,
}

impl PacingScheduler {
    pub fn new(serializer: Serializer, fanout: Arc<Fanout>) -> Self {
        Self {
            generation: Arc::new(AtomicU64::new(0)),
            mode: Mutex::new(PacingMode::Stopped),
            tasks: Mutex::new(Vec::new()),
            source: Arc::new(Mutex::new(Source {
                serializer,
                last_send: None,
            })),
            fanout,
        }
    }

    /// Invalidate every outstanding token, abort running tasks and return a
    /// token for the next generation.
    pub fn stop(&self) -> GenerationToken {
        let issued = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        *lock(&self.mode) = PacingMode::Stopped;
        for handle in lock(&self.tasks).drain(..) {
            handle.abort();
        }
        GenerationToken {
            current: Arc::clone(&self.generation),
            issued,
        }
    }

    /// Spawn the strategy for `rate` under `token`. Must run inside a tokio
    /// runtime. A stale token or a non-positive rate leaves the scheduler
    /// stopped.
    pub fn start(&self, token: &GenerationToken, rate: i64, format: WireFormat) -> PacingMode {
        if !token.is_current() {
            return PacingMode::Stopped;
        }
        let mode = PacingMode::for_rate(rate);

        let pacer = Pacer {
            token: token.clone(),
            rate,
            format,
            source: Arc::clone(&self.source),
            fanout: Arc::clone(&self.fanout),
        };
        let handle = match mode {
            PacingMode::Stopped => return PacingMode::Stopped,
            PacingMode::Interval => tokio::spawn(pacer.run_interval()),
            PacingMode::Batch => tokio::spawn(pacer.run_batch()),
            PacingMode::BusyLoop => tokio::spawn(pacer.run_busy_loop()),
        };

        self.track(handle);
        *lock(&self.mode) = mode;
        tracing::debug!(generation = token.generation(), rate, %format, %mode, "pacing started");
        mode
    }

    /// Tie a task's lifetime to the current generation.
    pub fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = lock(&self.tasks);
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
    }

    pub fn mode(&self) -> PacingMode {
        *lock(&self.mode)
    }

    pub fn state(&self) -> SchedulerState {
        SchedulerState {
            mode: self.mode(),
            generation: self.generation.load(Ordering::Acquire),
            last_send: lock(&self.source).last_send,
        }
    }
}

impl Drop for PacingScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

// ═══════════════════════════════════════════════════════════════
//  Pacer
// ═══════════════════════════════════════════════════════════════

struct Pacer {
    token: GenerationToken,
    rate: i64,
    format: WireFormat,
    source: Arc<Mutex<Source>>,
    fanout: Arc<Fanout>,
}

impl Pacer {
    /// Send `count` messages against one subscriber snapshot and record `at`
    /// as the send instant. `false` once the generation went stale.
    fn emit(&self, count: u64, at: Instant) -> bool {
        let mut source = lock(&self.source);
        let members = self.fanout.snapshot();
        for _ in 0..count {
            if !self.token.is_current() {
                return false;
            }
            let payload = source.serializer.get_cached(self.format);
            self.fanout.deliver_to(&members, payload);
        }
        source.last_send = Some(at);
        true
    }

    fn last_send(&self) -> Option<Instant> {
        lock(&self.source).last_send
    }

    fn period(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / self.rate as u64)
    }

    /// First tick of a strategy ticking every `period`: one period after the
    /// previous send, or right away when that is already due.
    fn first_tick(&self, period: Duration) -> Instant {
        let now = Instant::now();
        match self.last_send() {
            Some(last) => (last + period).max(now),
            None => now,
        }
    }

    async fn run_ticks(self, period: Duration, per_tick: u64) {
        let mut ticker = tokio::time::interval_at(self.first_tick(period), period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
        loop {
            let at = ticker.tick().await;
            if !self.emit(per_tick, at) {
                break;
            }
        }
    }

    async fn run_interval(self) {
        let generation = self.token.generation();
        let period = self.period();
        self.run_ticks(period, 1).await;
        tracing::trace!(generation, "interval pacer exited");
    }

    async fn run_batch(self) {
        let generation = self.token.generation();
        let per_tick = batch_size(self.rate);
        self.run_ticks(BATCH_PERIOD, per_tick).await;
        tracing::trace!(generation, "batch pacer exited");
    }

    async fn run_busy_loop(self) {
        let period_ns = 1e9 / self.rate as f64;
        // Roughly 10ms worth of messages.
        let max_burst = (self.rate as u64 / 100).clamp(1, MAX_BURST);
        let backlog = Duration::from_nanos((max_burst as f64 * period_ns) as u64);

        let now = Instant::now();
        let mut last_send = match self.last_send() {
            Some(last) if now.duration_since(last) <= backlog => last,
            _ => now,
        };

        while self.token.is_current() {
            let now = Instant::now();
            let elapsed_ns = now.duration_since(last_send).as_nanos() as f64;
            let quota = (elapsed_ns / period_ns).floor() as u64;

            if quota > 0 {
                let burst = quota.min(max_burst);
                let at = if quota > max_burst {
                    now
                } else {
                    // Keep the fractional remainder so the long-run rate holds.
                    last_send + Duration::from_nanos((quota as f64 * period_ns) as u64)
                };
                if !self.emit(burst, at) {
                    break;
                }
                last_send = at;
            }

            tokio::task::yield_now().await;
        }
        tracing::trace!(generation = self.token.generation(), "busy loop exited");
    }
}

#[cfg(test)]
mod tests {
    use crate::generator::EventGenerator;

    use super::*;

    fn scheduler() -> (PacingScheduler, Arc<Fanout>) {
        let fanout = Arc::new(Fanout::new());
        let serializer = Serializer::new(EventGenerator::seeded(5));
        (PacingScheduler::new(serializer, Arc::clone(&fanout)), fanout)
    }

    /// Let every task that is ready at the current instant run.
    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn mode_bands() {
        assert_eq!(PacingMode::for_rate(-5), PacingMode::Stopped);
        assert_eq!(PacingMode::for_rate(0), PacingMode::Stopped);
        assert_eq!(PacingMode::for_rate(1), PacingMode::Interval);
        assert_eq!(PacingMode::for_rate(999), PacingMode::Interval);
        assert_eq!(PacingMode::for_rate(1_000), PacingMode::Interval);
        assert_eq!(PacingMode::for_rate(1_001), PacingMode::Batch);
        assert_eq!(PacingMode::for_rate(9_999), PacingMode::Batch);
        assert_eq!(PacingMode::for_rate(10_000), PacingMode::Batch);
        assert_eq!(PacingMode::for_rate(10_001), PacingMode::BusyLoop);
    }

    #[test]
    fn batch_size_rounds_up() {
        assert_eq!(batch_size(1_001), 2);
        assert_eq!(batch_size(5_000), 5);
        assert_eq!(batch_size(9_999), 10);
        assert_eq!(batch_size(10_000), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_invalidates_previous_tokens() {
        let (scheduler, _fanout) = scheduler();
        let first = scheduler.stop();
        assert!(first.is_current());
        let second = scheduler.stop();
        assert!(!first.is_current());
        assert!(second.is_current());
        assert_eq!(second.generation(), first.generation() + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_token_does_not_start() {
        let (scheduler, _fanout) = scheduler();
        let stale = scheduler.stop();
        let _fresh = scheduler.stop();
        assert_eq!(scheduler.start(&stale, 100, WireFormat::Text), PacingMode::Stopped);
        assert_eq!(scheduler.mode(), PacingMode::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn interval_sends_one_per_period() {
        let (scheduler, fanout) = scheduler();
        let (_, mut rx) = fanout.add();
        let token = scheduler.stop();
        assert_eq!(scheduler.start(&token, 100, WireFormat::Text), PacingMode::Interval);

        tokio::time::sleep(Duration::from_millis(995)).await;
        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        // Ticks at 0, 10, .., 990ms.
        assert_eq!(received, 100);
        assert!(scheduler.state().last_send.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn batch_sends_ceil_per_millisecond() {
        let (scheduler, fanout) = scheduler();
        let token = scheduler.stop();
        assert_eq!(scheduler.start(&token, 5_000, WireFormat::Binary), PacingMode::Batch);

        tokio::time::sleep(Duration::from_millis(100)).await;
        settle().await;
        // Ticks at 0..=100ms, five each.
        assert_eq!(fanout.total_sent(), 505);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_halts_sending() {
        let (scheduler, fanout) = scheduler();
        let token = scheduler.stop();
        scheduler.start(&token, 500, WireFormat::Text);
        tokio::time::sleep(Duration::from_millis(50)).await;

        scheduler.stop();
        assert_eq!(scheduler.mode(), PacingMode::Stopped);
        let after_stop = fanout.total_sent();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fanout.total_sent(), after_stop);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_across_interval_batch_boundary_runs_one_strategy() {
        let (scheduler, fanout) = scheduler();
        let token = scheduler.stop();
        assert_eq!(scheduler.start(&token, 1_000, WireFormat::Text), PacingMode::Interval);
        tokio::time::sleep(Duration::from_millis(100)).await;
        settle().await;
        // Ticks at 0..=100ms.
        assert_eq!(fanout.total_sent(), 101);

        let token = scheduler.stop();
        assert_eq!(scheduler.start(&token, 1_001, WireFormat::Text), PacingMode::Batch);
        tokio::time::sleep(Duration::from_millis(100)).await;
        settle().await;

        // Batch resumes at 101ms with two per tick; nothing is repeated at 100ms.
        assert_eq!(fanout.total_sent() - 101, 200);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_restarts_keep_the_interval_phase() {
        let (scheduler, fanout) = scheduler();
        let token = scheduler.stop();
        scheduler.start(&token, 1, WireFormat::Text);
        settle().await;
        assert_eq!(fanout.total_sent(), 1);

        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let token = scheduler.stop();
            scheduler.start(&token, 1, WireFormat::Text);
            settle().await;
        }
        tokio::time::sleep(Duration::from_millis(650)).await;
        settle().await;
        assert_eq!(fanout.total_sent(), 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        settle().await;
        assert_eq!(fanout.total_sent(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_after_idle_sends_right_away() {
        let (scheduler, fanout) = scheduler();
        let token = scheduler.stop();
        scheduler.start(&token, 10, WireFormat::Text);
        settle().await;
        scheduler.stop();

        tokio::time::sleep(Duration::from_secs(2)).await;
        let token = scheduler.stop();
        scheduler.start(&token, 10, WireFormat::Text);
        settle().await;
        assert_eq!(fanout.total_sent(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn busy_loop_continues_from_last_batch_tick() {
        let (scheduler, fanout) = scheduler();
        let token = scheduler.stop();
        assert_eq!(scheduler.start(&token, 10_000, WireFormat::Binary), PacingMode::Batch);
        tokio::time::sleep(Duration::from_millis(10)).await;
        settle().await;
        // Ticks at 0..=10ms, ten each.
        assert_eq!(fanout.total_sent(), 110);

        let token = scheduler.stop();
        assert_eq!(scheduler.start(&token, 20_000, WireFormat::Binary), PacingMode::BusyLoop);
        settle().await;
        assert_eq!(fanout.total_sent(), 110);

        // The clock stays put while the loop spins, so each advance is one quota.
        tokio::time::advance(Duration::from_millis(5)).await;
        settle().await;
        assert_eq!(fanout.total_sent(), 210);
        scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn busy_loop_burst_is_capped() {
        let (scheduler, fanout) = scheduler();
        let token = scheduler.stop();
        assert_eq!(scheduler.start(&token, 1_000_000_000, WireFormat::Binary), PacingMode::BusyLoop);
        settle().await;

        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(fanout.total_sent(), MAX_BURST);

        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(fanout.total_sent(), 2 * MAX_BURST);
        scheduler.stop();
    }
}
