use std::sync::Weak;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use tick_api::RateConfig;

use crate::scheduler::GenerationToken;

/// `floor(current * (1 + percent / 100))`.
pub fn next_ramp_rate(current: i64, percent: f64) -> i64 {
    (current as f64 * (1.0 + percent / 100.0)).floor() as i64
}

/// Periodic rate increase, active only while ramping is enabled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RampController {
    pub percent: f64,
    pub interval: Duration,
}

impl RampController {
    /// `None` when ramping is off or could never fire.
    pub fn from_config(config: &RateConfig) -> Option<Self> {
        if !config.ramp_enabled || config.ramp_interval_seconds == 0 || config.target_rate <= 0 {
            return None;
        }
        Some(Self {
            percent: config.ramp_percent,
            interval: Duration::from_secs(config.ramp_interval_seconds),
        })
    }

    pub fn next_rate(&self, current: i64) -> i64 {
        next_ramp_rate(current, self.percent)
    }
}

/// Whatever owns the live configuration and can apply a ramp step.
pub trait RampTarget: Send + Sync + 'static {
    /// Apply one step issued under `token`. `false` ends the ramp task.
    fn ramp_step(&self, token: &GenerationToken, controller: &RampController) -> bool;
}

/// Spawn the ramp timer for one scheduler generation. The first step fires
/// one full interval after the spawn.
pub fn spawn<T: RampTarget>(
    controller: RampController,
    token: GenerationToken,
    target: Weak<T>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + controller.interval, controller.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if !token.is_current() {
                break;
            }
            let Some(owner) = target.upgrade() else {
                break;
            };
            if !owner.ramp_step(&token, &controller) {
                break;
            }
        }
        tracing::trace!(generation = token.generation(), "ramp task exited");
    })
}
