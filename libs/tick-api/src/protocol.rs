use serde::{Deserialize, Serialize};

use crate::stats::SubscriberReport;

/// Back-channel message, subscriber → engine, JSON text frame.
///
/// ```json
/// {"type":"identify","subscriberId":"bench-1"}
/// {"type":"stats","subscriberId":"bench-1","messagesPerSecond":9800,
///  "totalMessages":120000,"avgLatencyMs":1.5,"p99LatencyMs":4.0}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Identify {
        #[serde(rename = "subscriberId", alias = "clientId")]
        subscriber_id: String,
    },
    Stats(SubscriberReport),
}

impl ClientMessage {
    /// Parse a back-channel frame. Anything unparseable, including an unknown
    /// `type`, yields `None`: the back-channel is best-effort.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_identify() {
        let msg = ClientMessage::parse(r#"{"type":"identify","subscriberId":"a"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Identify {
                subscriber_id: "a".into()
            }
        );
    }

    #[test]
    fn parses_stats_with_legacy_field_names() {
        let msg = ClientMessage::parse(
            r#"{"type":"stats","clientId":"tauri-rust","messagesPerSec":1200,
                "totalMessages":5000,"avgLatencyMs":2.5,"p99LatencyMs":0.0}"#,
        )
        .unwrap();
        let ClientMessage::Stats(report) = msg else {
            panic!("expected stats");
        };
        assert_eq!(report.subscriber_id, "tauri-rust");
        assert_eq!(report.messages_per_second, 1200.0);
        assert_eq!(report.total_messages, 5000);
        assert_eq!(report.avg_latency_ms, 2.5);
    }

    #[test]
    fn rejects_unknown_type_and_garbage() {
        assert!(ClientMessage::parse(r#"{"type":"subscribe","subscriberId":"a"}"#).is_none());
        assert!(ClientMessage::parse("not json").is_none());
        assert!(ClientMessage::parse(r#"{"type":"stats"}"#).is_none());
    }

    #[test]
    fn serialized_form_round_trips() {
        let msg = ClientMessage::Stats(SubscriberReport {
            subscriber_id: "bench".into(),
            messages_per_second: 10.0,
            total_messages: 20,
            avg_latency_ms: 0.5,
            p99_latency_ms: 1.0,
        });
        let json = msg.to_json();
        assert!(json.contains(r#""type":"stats""#));
        assert!(json.contains(r#""subscriberId":"bench""#));
        assert_eq!(ClientMessage::parse(&json), Some(msg));
    }
}
