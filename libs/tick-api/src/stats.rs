use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Consumption telemetry a subscriber reports about itself, roughly once a
/// second, over the back-channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriberReport {
    #[serde(alias = "clientId")]
    pub subscriber_id: String,
    #[serde(default, alias = "messagesPerSec")]
    pub messages_per_second: f64,
    #[serde(default)]
    pub total_messages: u64,
    #[serde(default)]
    pub avg_latency_ms: f64,
    #[serde(default)]
    pub p99_latency_ms: f64,
}

/// A stored [`SubscriberReport`] as exposed by `getStats`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriberStatsView {
    #[serde(flatten)]
    pub report: SubscriberReport,
    /// Wall-clock time of the last report, Unix ms.
    pub last_update: i64,
    /// Milliseconds since the last report was received.
    pub age_ms: u64,
    /// `false` once the record is older than the staleness window.
    pub connected: bool,
}

/// Result of `getStats`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    /// Events handed to fanout per second over the last sampling window.
    pub egress_rate: f64,
    pub target_rate: i64,
    /// Live data-channel connections, identified or not.
    pub connections: usize,
    pub subscribers: BTreeMap<String, SubscriberStatsView>,
}

impl StatsSnapshot {
    /// Records still inside the staleness window.
    pub fn connected(&self) -> impl Iterator<Item = &SubscriberStatsView> {
        self.subscribers.values().filter(|s| s.connected)
    }
}
