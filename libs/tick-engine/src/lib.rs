//! Rate-controlled broadcast core.
//!
//! An [`Engine`] generates synthetic events, encodes them, and pushes each
//! encoding to every connected subscriber at a configurable rate. The pacing
//! strategy is chosen by rate band (see [`scheduler`]), an optional ramp grows
//! the rate over time, and subscribers report their own consumption stats back
//! through [`Engine::handle_client_message`].
//!
//! The engine knows nothing about sockets: a transport calls
//! [`Engine::subscribe`] per connection, forwards the receiver's payloads, and
//! calls [`Engine::unsubscribe`] when the connection goes away.

pub mod engine;
pub mod fanout;
pub mod generator;
pub mod ramp;
pub mod scheduler;
pub mod serializer;
pub mod telemetry;

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub use engine::{Engine, EngineSettings, Subscription};
pub use fanout::ConnectionId;
pub use scheduler::{PacingMode, SchedulerState};

// Poisoned locks are recovered with a warning: guarded data has no invariants
// that span a panic.

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("engine mutex was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

pub(crate) fn read<T>(l: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match l.read() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("engine rwlock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

pub(crate) fn write<T>(l: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match l.write() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("engine rwlock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}
