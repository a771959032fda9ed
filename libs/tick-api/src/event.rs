use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════════
//  EventKey
// ═══════════════════════════════════════════════════════════════

/// Closed set of keys an event can carry.
///
/// The declaration order is the wire order: the binary encoding writes
/// [`EventKey::index`] instead of the name, so reordering variants is a
/// protocol break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKey {
    Aapl,
    Googl,
    Msft,
    Amzn,
    Tsla,
    Meta,
    Nvda,
    Nflx,
}

impl EventKey {
    pub const ALL: [EventKey; 8] = [
        EventKey::Aapl,
        EventKey::Googl,
        EventKey::Msft,
        EventKey::Amzn,
        EventKey::Tsla,
        EventKey::Meta,
        EventKey::Nvda,
        EventKey::Nflx,
    ];

    pub fn index(self) -> u32 {
        self as u32
    }

    pub fn from_index(index: u32) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventKey::Aapl => "AAPL",
            EventKey::Googl => "GOOGL",
            EventKey::Msft => "MSFT",
            EventKey::Amzn => "AMZN",
            EventKey::Tsla => "TSLA",
            EventKey::Meta => "META",
            EventKey::Nvda => "NVDA",
            EventKey::Nflx => "NFLX",
        }
    }

    /// Starting value of the random walk for this key.
    pub fn seed_value(self) -> f64 {
        match self {
            EventKey::Aapl => 185.0,
            EventKey::Googl => 140.0,
            EventKey::Msft => 375.0,
            EventKey::Amzn => 150.0,
            EventKey::Tsla => 240.0,
            EventKey::Meta => 350.0,
            EventKey::Nvda => 480.0,
            EventKey::Nflx => 490.0,
        }
    }
}

impl std::fmt::Display for EventKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════
//  Event
// ═══════════════════════════════════════════════════════════════

/// One simulated data update.
///
/// `value` is always positive when produced by the engine; `timestamp` is
/// Unix milliseconds at generation time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub key: EventKey,
    pub value: f64,
    pub timestamp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_index_matches_table_order() {
        for (i, key) in EventKey::ALL.iter().enumerate() {
            assert_eq!(key.index(), i as u32);
            assert_eq!(EventKey::from_index(i as u32), Some(*key));
        }
        assert_eq!(EventKey::from_index(8), None);
    }

    #[test]
    fn key_serializes_as_ticker() {
        let json = serde_json::to_string(&EventKey::Googl).unwrap();
        assert_eq!(json, "\"GOOGL\"");
        let back: EventKey = serde_json::from_str("\"NFLX\"").unwrap();
        assert_eq!(back, EventKey::Nflx);
    }

    #[test]
    fn display_matches_wire_name() {
        for key in EventKey::ALL {
            let json = serde_json::to_string(&key).unwrap();
            assert_eq!(json, format!("\"{key}\""));
        }
    }
}
