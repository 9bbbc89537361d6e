use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;

use super::Subscriber;
use crate::{demand::Demand, subscription::Subscription};

// -------------------------------------------------------------------------------------------------

/// Shared view on everything a [`RecordingSubscriber`] received.
#[derive(Clone, Default)]
pub(crate) struct Recording {
    values: Arc<Mutex<Vec<Duration>>>,
    subscription: Arc<Mutex<Option<Subscription>>>,
}

impl Recording {
    pub fn values(&self) -> Vec<Duration> {
        self.values.lock().clone()
    }

    pub fn subscription(&self) -> Subscription {
        self.subscription
            .lock()
            .clone()
            .expect("subscriber did not receive a subscription")
    }

    /// Request more values via the recorded subscription handle.
    pub fn request(&self, demand: Demand) {
        self.subscription().request(demand);
    }
}

// -------------------------------------------------------------------------------------------------

/// A [`Subscriber`] which records all received values, requests a fixed initial demand and
/// optionally re-grants demand or cancels after receiving a number of values.
pub(crate) struct RecordingSubscriber {
    recording: Recording,
    initial_demand: Demand,
    regranted_demand: Demand,
    cancel_after: Option<usize>,
}

impl RecordingSubscriber {
    pub fn new(initial_demand: Demand) -> (Self, Recording) {
        let recording = Recording::default();
        let subscriber = Self {
            recording: recording.clone(),
            initial_demand,
            regranted_demand: Demand::NONE,
            cancel_after: None,
        };
        (subscriber, recording)
    }

    /// Demand returned from each `receive` call.
    pub fn regrant(mut self, demand: Demand) -> Self {
        self.regranted_demand = demand;
        self
    }

    /// Cancel the subscription from within `receive` after receiving `count` values.
    pub fn cancel_after(mut self, count: usize) -> Self {
        self.cancel_after = Some(count);
        self
    }
}

impl Subscriber for RecordingSubscriber {
    fn receive_subscription(&mut self, subscription: Subscription) {
        *self.recording.subscription.lock() = Some(subscription.clone());
        subscription.request(self.initial_demand);
    }

    fn receive(&mut self, position: Duration) -> Demand {
        let received = {
            let mut values = self.recording.values.lock();
            values.push(position);
            values.len()
        };
        if self.cancel_after == Some(received) {
            self.recording.subscription().cancel();
        }
        self.regranted_demand
    }
}
