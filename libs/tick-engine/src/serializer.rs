use std::time::Duration;

use tokio::time::Instant;

use tick_api::{Payload, WireFormat, wire};

use crate::generator::EventGenerator;

/// Default lifetime of a cached encoding.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_millis(1);

struct CachedPayload {
    payload: Payload,
    encoded_at: Instant,
}

/// Produces encoded payloads for the pacing scheduler.
///
/// Owns the generator so that a cache hit skips both generation and encoding.
/// Within one cache window every subscriber receives the same bytes, so the
/// embedded timestamp is shared by all messages of that window. A `None` TTL
/// turns the cache off and every call yields a fresh event.
pub struct Serializer {
    generator: EventGenerator,
    ttl: Option<Duration>,
    cache: Option<CachedPayload>,
}

impl Serializer {
    pub fn new(generator: EventGenerator) -> Self {
        Self {
            generator,
            ttl: Some(DEFAULT_CACHE_TTL),
            cache: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl.filter(|d| !d.is_zero());
        self.cache = None;
        self
    }

    pub fn encode(event: &tick_api::Event, format: WireFormat) -> Payload {
        wire::encode(event, format)
    }

    /// Last encoding if it is younger than the TTL and of `format`, else a
    /// freshly generated and encoded event.
    pub fn get_cached(&mut self, format: WireFormat) -> Payload {
        let now = Instant::now();

        if let (Some(ttl), Some(cached)) = (self.ttl, &self.cache) {
            if cached.payload.format() == format && now.duration_since(cached.encoded_at) < ttl {
                return cached.payload.clone();
            }
        }

        let event = self.generator.generate();
        let payload = Self::encode(&event, format);
        if self.ttl.is_some() {
            self.cache = Some(CachedPayload {
                payload: payload.clone(),
                encoded_at: now,
            });
        }
        payload
    }
}
