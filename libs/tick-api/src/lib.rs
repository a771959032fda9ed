//! Shared data model and wire protocol for the tick broadcast engine.
//!
//! Everything a subscriber or the control adapter needs to talk to the engine
//! lives here: the event type, both data-channel encodings, the back-channel
//! messages, and the configuration/stats shapes exchanged over the control
//! boundary.

pub mod config;
pub mod error;
pub mod event;
pub mod protocol;
pub mod stats;
pub mod util;
pub mod wire;

pub use config::{RateConfig, RateConfigPatch, WireFormat};
pub use error::DecodeError;
pub use event::{Event, EventKey};
pub use protocol::ClientMessage;
pub use stats::{StatsSnapshot, SubscriberReport, SubscriberStatsView};
pub use util::now_ms;
pub use wire::Payload;
