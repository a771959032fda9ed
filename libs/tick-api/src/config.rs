use serde::{Deserialize, Serialize};

/// Encoding used on the data channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    /// Flat JSON object per event.
    #[default]
    #[serde(alias = "json")]
    Text,
    /// Fixed 20-byte little-endian record per event.
    Binary,
}

impl std::fmt::Display for WireFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireFormat::Text => f.write_str("text"),
            WireFormat::Binary => f.write_str("binary"),
        }
    }
}

/// Live broadcast configuration.
///
/// Only the control boundary mutates it; every mutation restarts the pacing
/// scheduler. A `target_rate` of zero or below means "stop broadcasting".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateConfig {
    pub target_rate: i64,
    pub ramp_enabled: bool,
    pub ramp_percent: f64,
    pub ramp_interval_seconds: u64,
    pub format: WireFormat,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            target_rate: 100,
            ramp_enabled: false,
            ramp_percent: 10.0,
            ramp_interval_seconds: 5,
            format: WireFormat::Text,
        }
    }
}

impl RateConfig {
    /// Overlay the fields present in `patch`.
    pub fn merge(&mut self, patch: &RateConfigPatch) {
        if let Some(rate) = patch.target_rate {
            self.target_rate = rate;
        }
        if let Some(enabled) = patch.ramp_enabled {
            self.ramp_enabled = enabled;
        }
        if let Some(percent) = patch.ramp_percent {
            self.ramp_percent = percent;
        }
        if let Some(secs) = patch.ramp_interval_seconds {
            self.ramp_interval_seconds = secs;
        }
        if let Some(format) = patch.format {
            self.format = format;
        }
    }
}

/// Partial [`RateConfig`] as accepted by `applyConfig`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateConfigPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_rate: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ramp_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ramp_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ramp_interval_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<WireFormat>,
}

impl RateConfigPatch {
    pub fn rate(target_rate: i64) -> Self {
        Self {
            target_rate: Some(target_rate),
            ..Default::default()
        }
    }
}
