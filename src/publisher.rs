use std::{sync::Arc, time::Duration};

use crate::{
    error::Error,
    source::PeriodicSource,
    subscriber::{Cancellable, Sink, Subscriber},
    subscription::Subscription,
};

// -------------------------------------------------------------------------------------------------

/// Options to configure a [`PlayheadProgressPublisher`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressOptions {
    /// By default 250ms. Interval at which the periodic source should report positions.
    pub interval: Duration,
}

impl Default for ProgressOptions {
    fn default() -> Self {
        Self {
            interval: PlayheadProgressPublisher::DEFAULT_INTERVAL,
        }
    }
}

impl ProgressOptions {
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Validate all parameters. Returns Error::ParameterError on errors.
    pub fn validate(&self) -> Result<(), Error> {
        if self.interval.is_zero() {
            return Err(Error::ParameterError(format!(
                "progress options 'interval' value is '{:?}'",
                self.interval
            )));
        }
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------

/// Publishes playhead positions of a [`PeriodicSource`] to demand driven [`Subscriber`]s.
///
/// The publisher itself is stateless: each call to [`subscribe`](Self::subscribe) creates a
/// new, independent [`Subscription`], which registers its own periodic callback at the source
/// as soon as its subscriber requests values.
#[derive(Clone)]
pub struct PlayheadProgressPublisher {
    source: Arc<dyn PeriodicSource>,
    interval: Duration,
}

impl PlayheadProgressPublisher {
    /// Default playhead position update interval.
    pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(250);

    /// Create a new publisher with default options.
    pub fn new(source: Arc<dyn PeriodicSource>) -> Self {
        Self {
            source,
            interval: Self::DEFAULT_INTERVAL,
        }
    }

    /// Create a new publisher with custom options.
    pub fn with_options(
        source: Arc<dyn PeriodicSource>,
        options: ProgressOptions,
    ) -> Result<Self, Error> {
        options.validate()?;
        Ok(Self {
            source,
            interval: options.interval,
        })
    }

    /// Position update interval of all subscriptions.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Attach a new subscriber. The subscriber receives its subscription handle right away,
    /// but the periodic source only gets involved once the subscriber requested values.
    ///
    /// Returns a handle to the new subscription.
    pub fn subscribe<S: Subscriber>(&self, subscriber: S) -> Subscription {
        let subscription =
            Subscription::new(Arc::clone(&self.source), self.interval, Box::new(subscriber));
        log::debug!(
            "New playhead progress subscription #{}",
            subscription.id()
        );
        subscription.attach();
        subscription
    }

    /// Attach a closure which receives all positions, with unlimited demand. The subscription
    /// gets cancelled when the returned [`Cancellable`] is dropped.
    pub fn sink<F>(&self, receive_value: F) -> Cancellable
    where
        F: FnMut(Duration) + Send + 'static,
    {
        Cancellable::new(self.subscribe(Sink::new(receive_value)))
    }
}

// -------------------------------------------------------------------------------------------------

/// Creates playhead progress publishers from shared [`PeriodicSource`]s.
pub trait PeriodicSourceExt: PeriodicSource + Sized {
    /// Publisher for playhead progress updates, reported every `interval`.
    ///
    /// Returns `Error::ParameterError` for a zero interval.
    fn playhead_progress(
        self: Arc<Self>,
        interval: Duration,
    ) -> Result<PlayheadProgressPublisher, Error> {
        PlayheadProgressPublisher::with_options(self, ProgressOptions::default().interval(interval))
    }
}

impl<S: PeriodicSource> PeriodicSourceExt for S {}

// -------------------------------------------------------------------------------------------------
