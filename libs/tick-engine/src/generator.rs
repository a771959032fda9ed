use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use tick_api::{Event, EventKey, now_ms};

/// Lowest value the random walk may reach.
pub const VALUE_FLOOR: f64 = 0.01;

/// Default relative step of the random walk (±0.2% per update).
pub const DEFAULT_STEP: f64 = 0.002;

/// Synthetic event source: one bounded random walk per key.
pub struct EventGenerator {
    values: [f64; EventKey::ALL.len()],
    step: f64,
    rng: SmallRng,
}

impl Default for EventGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl EventGenerator {
    pub fn new() -> Self {
        Self::with_rng(SmallRng::from_entropy())
    }

    /// Deterministic generator for reproducible runs.
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(SmallRng::seed_from_u64(seed))
    }

    fn with_rng(rng: SmallRng) -> Self {
        Self {
            values: EventKey::ALL.map(EventKey::seed_value),
            step: DEFAULT_STEP,
            rng,
        }
    }

    /// Override the relative step. Negative input is treated as its magnitude.
    pub fn with_step(mut self, step: f64) -> Self {
        self.step = step.abs();
        self
    }

    /// Produce the next event, stamped with the current wall-clock time.
    pub fn generate(&mut self) -> Event {
        let key = EventKey::ALL[self.rng.gen_range(0..EventKey::ALL.len())];
        let delta = self.rng.gen_range(-self.step..=self.step);

        let slot = &mut self.values[key.index() as usize];
        *slot = (*slot + *slot * delta).max(VALUE_FLOOR);

        Event {
            key,
            value: *slot,
            timestamp: now_ms(),
        }
    }

    pub fn last_value(&self, key: EventKey) -> f64 {
        self.values[key.index() as usize]
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn values_never_drop_below_floor() {
        // ±100% steps drive the walk into the floor quickly.
        let mut generator = EventGenerator::seeded(7).with_step(1.0);
        for _ in 0..10_000 {
            let event = generator.generate();
            assert!(event.value >= VALUE_FLOOR, "value {} below floor", event.value);
        }
    }

    #[test]
    fn walk_updates_only_the_picked_key() {
        let mut generator = EventGenerator::seeded(42);
        let before: Vec<f64> = EventKey::ALL.iter().map(|k| generator.last_value(*k)).collect();
        let event = generator.generate();
        for (i, key) in EventKey::ALL.iter().enumerate() {
            if *key == event.key {
                assert_eq!(generator.last_value(*key), event.value);
            } else {
                assert_eq!(generator.last_value(*key), before[i]);
            }
        }
    }

    #[test]
    fn step_bounds_relative_change() {
        let mut generator = EventGenerator::seeded(3);
        let mut previous: Vec<f64> = EventKey::ALL.iter().map(|k| k.seed_value()).collect();
        for _ in 0..1_000 {
            let event = generator.generate();
            let idx = event.key.index() as usize;
            let change = (event.value - previous[idx]).abs() / previous[idx];
            assert!(change <= DEFAULT_STEP + 1e-12);
            previous[idx] = event.value;
        }
    }

    #[test]
    fn every_key_is_eventually_picked() {
        let mut generator = EventGenerator::seeded(11);
        let seen: HashSet<EventKey> = (0..500).map(|_| generator.generate().key).collect();
        assert_eq!(seen.len(), EventKey::ALL.len());
    }
}
