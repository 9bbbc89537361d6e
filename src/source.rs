//! Periodic time sources, which the playhead subscriptions register their callbacks at.

pub mod manual;
pub mod timer;

use std::{fmt, sync::Arc, time::Duration};

use crate::utils::unique_usize_id;

// -------------------------------------------------------------------------------------------------

/// Callback invoked by a [`PeriodicSource`] with the current playhead position.
///
/// Callbacks may be called from any thread, so they must be `Send` and `Sync`.
pub type PeriodicCallback = Arc<dyn Fn(Duration) + Send + Sync>;

// -------------------------------------------------------------------------------------------------

/// Opaque handle of a live periodic callback registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationToken(usize);

impl RegistrationToken {
    /// Create a new, unique token. Intended for [`PeriodicSource`] impls.
    pub fn new() -> Self {
        Self(unique_usize_id())
    }

    /// The token's unique id.
    pub fn id(&self) -> usize {
        self.0
    }
}

impl Default for RegistrationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RegistrationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// -------------------------------------------------------------------------------------------------

/// A source of periodic playhead position updates, such as a media player's periodic time
/// observer mechanism.
///
/// While a callback is registered, the source invokes it each `interval` with a monotonically
/// non-decreasing position, from a thread of its choice. Sources must tolerate `unregister`
/// calls from within a callback, and must not block in `unregister` until in-flight callbacks
/// completed: callers may hold locks the callback is waiting on.
pub trait PeriodicSource: Send + Sync + 'static {
    /// Start invoking `callback` every `interval` until the returned token gets unregistered.
    fn register(&self, interval: Duration, callback: PeriodicCallback) -> RegistrationToken;

    /// Stop invoking the callback registered with the given token. Unknown or already
    /// unregistered tokens are ignored.
    fn unregister(&self, token: RegistrationToken);
}

// -------------------------------------------------------------------------------------------------

/// Provides the current playhead position to a [`TimerSource`](timer::TimerSource).
pub trait PlaybackClock: Send + Sync + 'static {
    fn current_position(&self) -> Duration;
}

impl<F> PlaybackClock for F
where
    F: Fn() -> Duration + Send + Sync + 'static,
{
    fn current_position(&self) -> Duration {
        self()
    }
}
