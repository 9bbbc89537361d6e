#[cfg(test)]
pub(crate) mod testing;

use std::time::Duration;

use crate::{demand::Demand, subscription::Subscription};

// -------------------------------------------------------------------------------------------------

/// Receives playhead positions from a [`PlayheadProgressPublisher`](crate::PlayheadProgressPublisher).
///
/// Subscribers get their [`Subscription`] handle once, right after subscribing, and then only
/// receive as many positions as they requested via the handle or returned as additional demand
/// from [`receive`](Self::receive). Positions which arrive while there is no demand are dropped.
///
/// Both functions are called while the subscription is locked, possibly from a periodic
/// source's thread, so they should return quickly. Calling `request` or `cancel` on the own
/// subscription handle from within them is fine.
pub trait Subscriber: Send + 'static {
    /// Called once when subscribing. Keep the handle to request values or to cancel.
    fn receive_subscription(&mut self, subscription: Subscription);

    /// Called with a new playhead position. Returns the demand which should be added to the
    /// subscription's outstanding demand, e.g. `Demand::max(1)` to keep values flowing.
    fn receive(&mut self, position: Duration) -> Demand;
}

// -------------------------------------------------------------------------------------------------

/// A [`Subscriber`] which requests unlimited demand and passes all positions to a closure.
pub struct Sink<F>
where
    F: FnMut(Duration) + Send + 'static,
{
    receive_value: F,
}

impl<F> Sink<F>
where
    F: FnMut(Duration) + Send + 'static,
{
    pub fn new(receive_value: F) -> Self {
        Self { receive_value }
    }
}

impl<F> Subscriber for Sink<F>
where
    F: FnMut(Duration) + Send + 'static,
{
    fn receive_subscription(&mut self, subscription: Subscription) {
        subscription.request(Demand::UNLIMITED);
    }

    fn receive(&mut self, position: Duration) -> Demand {
        (self.receive_value)(position);
        Demand::NONE
    }
}

// -------------------------------------------------------------------------------------------------

/// Cancels the wrapped [`Subscription`] when getting dropped.
///
/// A subscription which is never cancelled keeps its periodic source registration alive, so
/// wrap subscriptions into a `Cancellable` to tie their lifetime to some owner.
#[must_use = "dropping a Cancellable immediately cancels its subscription"]
pub struct Cancellable {
    subscription: Subscription,
}

impl Cancellable {
    pub fn new(subscription: Subscription) -> Self {
        Self { subscription }
    }

    /// Access to the wrapped subscription handle.
    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    /// Cancel the subscription right away.
    pub fn cancel(self) {
        drop(self);
    }

    /// Move this cancellable into the given collection, keeping it alive as long as the
    /// collection is alive.
    pub fn store(self, cancellables: &mut Vec<Cancellable>) {
        cancellables.push(self);
    }
}

impl From<Subscription> for Cancellable {
    fn from(subscription: Subscription) -> Self {
        Self::new(subscription)
    }
}

impl Drop for Cancellable {
    fn drop(&mut self) {
        self.subscription.cancel();
    }
}
