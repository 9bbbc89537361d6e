use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
    thread,
    time::Duration,
};

use crossbeam_channel::{bounded, select, tick, Receiver, Sender, TryRecvError};
use dashmap::DashMap;

use super::{PeriodicCallback, PeriodicSource, PlaybackClock, RegistrationToken};
use crate::error::Error;

// -------------------------------------------------------------------------------------------------

/// Messages sent to a running timer thread.
#[derive(Debug, Clone, Copy, PartialEq)]
enum TimerMessage {
    /// Stop the timer thread gracefully.
    Stop,
}

// -------------------------------------------------------------------------------------------------

/// A [`PeriodicSource`] which runs each registered callback in its own timer thread.
///
/// Each tick reads the current position from the source's [`PlaybackClock`] and passes it to
/// the callback. Unregistering a callback signals its thread to stop, but does not wait for
/// it: a tick which already is being processed will still complete.
pub struct TimerSource {
    clock: Arc<dyn PlaybackClock>,
    timers: Arc<DashMap<RegistrationToken, Sender<TimerMessage>>>,
}

impl TimerSource {
    /// Shortest supported timer interval. Shorter intervals get clamped.
    pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

    pub fn new<C: PlaybackClock>(clock: C) -> Self {
        Self {
            clock: Arc::new(clock),
            timers: Arc::new(DashMap::new()),
        }
    }

    /// Number of running timers.
    pub fn timer_count(&self) -> usize {
        self.timers.len()
    }

    /// Spawn a new timer thread for the given callback.
    ///
    /// Returns `Error::IoError` when the timer thread could not be spawned.
    pub fn try_register(
        &self,
        interval: Duration,
        callback: PeriodicCallback,
    ) -> Result<RegistrationToken, Error> {
        let interval = if interval < Self::MIN_INTERVAL {
            log::warn!(
                "Timer interval {interval:?} is too short, using {:?} instead",
                Self::MIN_INTERVAL
            );
            Self::MIN_INTERVAL
        } else {
            interval
        };

        let token = RegistrationToken::new();
        let (stop_sender, stop_receiver) = bounded(1);
        let clock = Arc::clone(&self.clock);
        let timers = Arc::clone(&self.timers);
        // insert before spawning: the thread removes its entry when it stops
        self.timers.insert(token, stop_sender);
        let spawned = thread::Builder::new()
            .name(format!("playhead-timer-{}", token.id()))
            .spawn(move || {
                Self::run(token, interval, clock, callback, stop_receiver);
                timers.remove(&token);
            });
        if let Err(err) = spawned {
            self.timers.remove(&token);
            return Err(err.into());
        }
        Ok(token)
    }

    fn run(
        token: RegistrationToken,
        interval: Duration,
        clock: Arc<dyn PlaybackClock>,
        callback: PeriodicCallback,
        stop_receiver: Receiver<TimerMessage>,
    ) {
        log::debug!("Timer {token} started with an interval of {interval:?}");
        let ticker = tick(interval);
        loop {
            let keep_running = select! {
                recv(stop_receiver) -> _ => false,
                recv(ticker) -> _ => Self::process_tick(token, &*clock, &callback, &stop_receiver),
            };
            if !keep_running {
                break;
            }
        }
        log::debug!("Timer {token} stopped");
    }

    /// Invoke the callback with the current position. Returns false when the timer should stop.
    fn process_tick(
        token: RegistrationToken,
        clock: &dyn PlaybackClock,
        callback: &PeriodicCallback,
        stop_receiver: &Receiver<TimerMessage>,
    ) -> bool {
        // a stop request may be pending when both channels got ready
        if !matches!(stop_receiver.try_recv(), Err(TryRecvError::Empty)) {
            return false;
        }
        match catch_unwind(AssertUnwindSafe(|| callback(clock.current_position()))) {
            Ok(()) => true,
            Err(payload) => {
                log::error!(
                    "Ouch. Timer {token} callback panicked: {}",
                    panic_message::panic_message(&payload)
                );
                false
            }
        }
    }
}

impl PeriodicSource for TimerSource {
    fn register(&self, interval: Duration, callback: PeriodicCallback) -> RegistrationToken {
        match self.try_register(interval, callback) {
            Ok(token) => token,
            Err(err) => {
                log::error!("Failed to spawn timer thread: {err}");
                // hand out a token which never fires
                RegistrationToken::new()
            }
        }
    }

    fn unregister(&self, token: RegistrationToken) {
        if let Some((_, sender)) = self.timers.remove(&token) {
            // ignore error: timer thread maybe already is gone
            let _ = sender.try_send(TimerMessage::Stop);
        } else {
            log::debug!("Ignoring unregister request for unknown timer {token}");
        }
    }
}

impl Drop for TimerSource {
    fn drop(&mut self) {
        for entry in self.timers.iter() {
            let _ = entry.value().try_send(TimerMessage::Stop);
        }
        self.timers.clear();
    }
}

// -------------------------------------------------------------------------------------------------
