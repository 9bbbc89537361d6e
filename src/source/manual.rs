use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use dashmap::DashMap;
use parking_lot::Mutex;

use super::{PeriodicCallback, PeriodicSource, RegistrationToken};

// -------------------------------------------------------------------------------------------------

/// A [`PeriodicSource`] which only fires when being triggered manually.
///
/// Useful to drive playhead subscriptions in tests or in custom players which already run
/// their own update loop: each call to [`trigger`](Self::trigger) synchronously invokes all
/// registered callbacks on the calling thread.
#[derive(Default)]
pub struct ManualSource {
    registrations: DashMap<RegistrationToken, PeriodicCallback>,
    register_count: AtomicUsize,
    unregister_count: AtomicUsize,
    last_interval: Mutex<Option<Duration>>,
}

impl ManualSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invoke all currently registered callbacks with the given position.
    pub fn trigger(&self, position: Duration) {
        // Snapshot the callbacks: they may register or unregister while being called.
        let callbacks = self
            .registrations
            .iter()
            .map(|entry| entry.value().clone())
            .collect::<Vec<_>>();
        for callback in callbacks {
            callback(position);
        }
    }

    /// Number of currently live registrations.
    pub fn registration_count(&self) -> usize {
        self.registrations.len()
    }

    /// Total number of `register` calls so far.
    pub fn register_count(&self) -> usize {
        self.register_count.load(Ordering::Acquire)
    }

    /// Total number of `unregister` calls with a live token so far.
    pub fn unregister_count(&self) -> usize {
        self.unregister_count.load(Ordering::Acquire)
    }

    /// Interval of the most recent registration, if any.
    pub fn last_interval(&self) -> Option<Duration> {
        *self.last_interval.lock()
    }
}

impl PeriodicSource for ManualSource {
    fn register(&self, interval: Duration, callback: PeriodicCallback) -> RegistrationToken {
        let token = RegistrationToken::new();
        *self.last_interval.lock() = Some(interval);
        self.registrations.insert(token, callback);
        self.register_count.fetch_add(1, Ordering::AcqRel);
        token
    }

    fn unregister(&self, token: RegistrationToken) {
        if self.registrations.remove(&token).is_some() {
            self.unregister_count.fetch_add(1, Ordering::AcqRel);
        } else {
            log::debug!("Ignoring unregister request for unknown token {token}");
        }
    }
}

// -------------------------------------------------------------------------------------------------
