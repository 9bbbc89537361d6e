use std::{
    cell::RefCell,
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, Weak},
    thread,
    time::Duration,
};

use parking_lot::ReentrantMutex;

use crate::{
    demand::Demand,
    source::{PeriodicCallback, PeriodicSource, RegistrationToken},
    subscriber::Subscriber,
    utils::unique_usize_id,
};

// -------------------------------------------------------------------------------------------------

/// Unique id of a [`Subscription`].
pub type SubscriptionId = usize;

// -------------------------------------------------------------------------------------------------

/// Periodic source registration state of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
enum Registration {
    /// No positive demand was requested yet.
    Unregistered,
    /// The source's `register` call is in progress.
    Registering,
    /// Receiving periodic callbacks from the source.
    Registered(RegistrationToken),
    /// Torn down: will never register again.
    Cancelled,
}

// -------------------------------------------------------------------------------------------------

/// Mutable subscription state. Only accessed via the subscription's re-entrant lock.
struct SubscriptionState {
    /// Taken out while the subscriber is being called, cleared on cancel.
    subscriber: Option<Box<dyn Subscriber>>,
    requested: Demand,
    registration: Registration,
}

// -------------------------------------------------------------------------------------------------

struct SubscriptionInner {
    id: SubscriptionId,
    interval: Duration,
    source: Arc<dyn PeriodicSource>,
    state: ReentrantMutex<RefCell<SubscriptionState>>,
}

impl Drop for SubscriptionInner {
    fn drop(&mut self) {
        if let Registration::Registered(token) = self.state.get_mut().get_mut().registration {
            log::debug!(
                "Subscription #{} dropped without being cancelled, unregistering",
                self.id
            );
            self.source.unregister(token);
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Demand driven subscription to a periodic playhead position source.
///
/// Created by a [`PlayheadProgressPublisher`](crate::PlayheadProgressPublisher) for each
/// [`Subscriber`]. The subscription registers a callback at the periodic source as soon as
/// positive demand got requested, and forwards one position per unit of demand to its
/// subscriber. Positions arriving without demand are dropped, not buffered. The source
/// registration stays alive while there's no demand and only gets released on [`cancel`].
///
/// Handles are cheap to clone, `Send` and `Sync`: `request` and `cancel` may be called from
/// any thread, including the subscriber's own callbacks.
///
/// The subscription owns its subscriber until it gets cancelled. When the subscriber also
/// holds the subscription handle, nothing gets released before `cancel` is called, so use a
/// [`Cancellable`](crate::Cancellable) to tie the subscription's lifetime to some owner.
///
/// [`cancel`]: Self::cancel
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<SubscriptionInner>,
}

impl Subscription {
    pub(crate) fn new(
        source: Arc<dyn PeriodicSource>,
        interval: Duration,
        subscriber: Box<dyn Subscriber>,
    ) -> Self {
        let state = SubscriptionState {
            subscriber: Some(subscriber),
            requested: Demand::NONE,
            registration: Registration::Unregistered,
        };
        Self {
            inner: Arc::new(SubscriptionInner {
                id: unique_usize_id(),
                interval,
                source,
                state: ReentrantMutex::new(RefCell::new(state)),
            }),
        }
    }

    /// Hand out the subscription to the subscriber.
    pub(crate) fn attach(&self) {
        let guard = self.inner.state.lock();
        let subscriber = guard.borrow_mut().subscriber.take();
        let Some(mut subscriber) = subscriber else {
            return;
        };
        let handle = self.clone();
        let result = catch_unwind(AssertUnwindSafe(|| {
            subscriber.receive_subscription(handle);
        }));
        self.return_subscriber(&guard, subscriber, result.map(|_| Demand::NONE));
    }

    /// Unique id of this subscription.
    pub fn id(&self) -> SubscriptionId {
        self.inner.id
    }

    /// Interval at which the periodic source gets asked to report positions.
    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    /// Currently outstanding demand.
    pub fn requested(&self) -> Demand {
        self.inner.state.lock().borrow().requested
    }

    /// True while the subscription has a live periodic source registration.
    pub fn is_registered(&self) -> bool {
        matches!(
            self.inner.state.lock().borrow().registration,
            Registration::Registered(_)
        )
    }

    /// True once the subscription got cancelled. Cancelled subscriptions never deliver again.
    pub fn is_cancelled(&self) -> bool {
        self.inner.state.lock().borrow().registration == Registration::Cancelled
    }

    /// Add demand for more positions.
    ///
    /// Registers at the periodic source on the first positive demand. Zero demand is accepted
    /// and does nothing. Requests on a cancelled subscription are ignored.
    pub fn request(&self, demand: Demand) {
        let inner = &self.inner;
        let guard = inner.state.lock();
        {
            let mut state = guard.borrow_mut();
            if state.registration == Registration::Cancelled {
                log::debug!(
                    "Ignoring demand {demand} for cancelled subscription #{}",
                    inner.id
                );
                return;
            }
            state.requested += demand;
            if state.registration != Registration::Unregistered || state.requested.is_none() {
                return;
            }
            state.registration = Registration::Registering;
        }

        // sources may invoke the callback right away, so register without holding a borrow
        let token = inner
            .source
            .register(inner.interval, Self::source_callback(Arc::downgrade(inner)));

        let mut state = guard.borrow_mut();
        if state.registration == Registration::Cancelled {
            drop(state);
            log::debug!(
                "Subscription #{} got cancelled while registering, unregistering {token}",
                inner.id
            );
            inner.source.unregister(token);
        } else {
            state.registration = Registration::Registered(token);
            log::debug!(
                "Subscription #{} registered as {token} with an interval of {:?}",
                inner.id,
                inner.interval
            );
        }
    }

    /// Stop receiving positions and release the periodic source registration.
    ///
    /// Can be called multiple times and from any thread: only the first call has an effect.
    /// No new deliveries start after `cancel` returned.
    pub fn cancel(&self) {
        let inner = &self.inner;
        let guard = inner.state.lock();
        let (previous, subscriber) = {
            let mut state = guard.borrow_mut();
            let previous = state.registration;
            if previous == Registration::Cancelled {
                return;
            }
            state.registration = Registration::Cancelled;
            (previous, state.subscriber.take())
        };
        log::debug!("Subscription #{} cancelled while {previous}", inner.id);

        if let Registration::Registered(token) = previous {
            inner.source.unregister(token);
        }
        // the subscriber may hold handles to us, so drop it outside of the state borrow
        drop(subscriber);
    }

    fn source_callback(inner: Weak<SubscriptionInner>) -> PeriodicCallback {
        Arc::new(move |position: Duration| {
            if let Some(inner) = inner.upgrade() {
                Subscription { inner }.deliver(position);
            }
        })
    }

    /// Forward a position from the periodic source to the subscriber, if there's demand.
    fn deliver(&self, position: Duration) {
        let guard = self.inner.state.lock();
        let subscriber = {
            let mut state = guard.borrow_mut();
            if state.requested.is_none() {
                log::trace!(
                    "Subscription #{} dropped position {position:?}: no demand",
                    self.inner.id
                );
                return;
            }
            let Some(subscriber) = state.subscriber.take() else {
                log::trace!(
                    "Subscription #{} dropped position {position:?}: no subscriber",
                    self.inner.id
                );
                return;
            };
            state.requested.consume_one();
            subscriber
        };

        let mut subscriber = subscriber;
        let result = catch_unwind(AssertUnwindSafe(|| subscriber.receive(position)));
        self.return_subscriber(&guard, subscriber, result);
    }

    /// Put back a subscriber, which got taken out of the state to call it, and apply the
    /// additional demand it returned.
    fn return_subscriber(
        &self,
        state: &RefCell<SubscriptionState>,
        subscriber: Box<dyn Subscriber>,
        result: thread::Result<Demand>,
    ) {
        match result {
            Ok(demand) => {
                let mut state = state.borrow_mut();
                if state.registration == Registration::Cancelled {
                    // got cancelled while being called
                    drop(state);
                    drop(subscriber);
                } else {
                    state.requested += demand;
                    state.subscriber = Some(subscriber);
                }
            }
            Err(payload) => {
                log::error!(
                    "Ouch. Subscriber of subscription #{} panicked: {}",
                    self.inner.id,
                    panic_message::panic_message(&payload)
                );
                drop(subscriber);
                self.cancel();
            }
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.inner.id)
            .field("interval", &self.inner.interval)
            .finish_non_exhaustive()
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Barrier;

    use parking_lot::Mutex;

    use super::*;
    use crate::{
        publisher::{PlayheadProgressPublisher, ProgressOptions},
        source::{manual::ManualSource, timer::TimerSource},
        subscriber::testing::RecordingSubscriber,
    };

    fn seconds(values: &[u64]) -> Vec<Duration> {
        values.iter().copied().map(Duration::from_secs).collect()
    }

    fn trigger_seconds(source: &ManualSource, values: &[u64]) {
        for position in seconds(values) {
            source.trigger(position);
        }
    }

    fn publisher() -> (Arc<ManualSource>, PlayheadProgressPublisher) {
        let source = Arc::new(ManualSource::new());
        let publisher = PlayheadProgressPublisher::new(source.clone());
        (source, publisher)
    }

    #[test]
    fn no_demand_no_values() {
        let (source, publisher) = publisher();
        let (subscriber, recording) = RecordingSubscriber::new(Demand::NONE);
        let subscription = publisher.subscribe(subscriber);

        trigger_seconds(&source, &[1, 2, 3, 4, 5]);

        assert!(recording.values().is_empty());
        assert!(!subscription.is_registered());
        assert_eq!(source.register_count(), 0);
    }

    #[test]
    fn exact_demand() {
        for (demand, expected) in [(0, vec![]), (1, vec![1]), (2, vec![1, 2])] {
            let (source, publisher) = publisher();
            let (subscriber, recording) = RecordingSubscriber::new(Demand::max(demand));
            publisher.subscribe(subscriber);

            trigger_seconds(&source, &[1, 2, 3, 4, 5]);

            assert_eq!(recording.values(), seconds(&expected));
        }
    }

    #[test]
    fn request_after_subscribing() {
        let (source, publisher) = publisher();
        let (subscriber, recording) = RecordingSubscriber::new(Demand::NONE);
        publisher.subscribe(subscriber);

        trigger_seconds(&source, &[1, 2]);
        recording.request(Demand::max(5));
        trigger_seconds(&source, &[3, 4, 5, 6, 7, 8]);

        assert_eq!(recording.values(), seconds(&[3, 4, 5, 6, 7]));
    }

    #[test]
    fn regranted_demand_keeps_flowing() {
        let (source, publisher) = publisher();
        let (subscriber, recording) = RecordingSubscriber::new(Demand::max(1));
        let subscriber = subscriber.regrant(Demand::max(1));
        let subscription = publisher.subscribe(subscriber);

        let ticks = (1..=100).collect::<Vec<_>>();
        trigger_seconds(&source, &ticks);

        assert_eq!(recording.values(), seconds(&ticks));
        assert_eq!(subscription.requested(), Demand::max(1));
        assert_eq!(source.register_count(), 1);
    }

    #[test]
    fn unlimited_demand() {
        let (source, publisher) = publisher();
        let (subscriber, recording) = RecordingSubscriber::new(Demand::UNLIMITED);
        let subscription = publisher.subscribe(subscriber);

        trigger_seconds(&source, &[1, 2, 3]);

        assert_eq!(recording.values(), seconds(&[1, 2, 3]));
        assert_eq!(subscription.requested(), Demand::UNLIMITED);
    }

    #[test]
    fn registers_once() {
        let (source, publisher) = publisher();
        let (subscriber, recording) = RecordingSubscriber::new(Demand::NONE);
        let subscription = publisher.subscribe(subscriber);

        recording.request(Demand::NONE);
        assert_eq!(source.register_count(), 0);
        for _ in 0..10 {
            recording.request(Demand::max(1));
        }
        subscription.request(Demand::UNLIMITED);

        assert_eq!(source.register_count(), 1);
        assert_eq!(source.registration_count(), 1);
        assert_eq!(
            source.last_interval(),
            Some(PlayheadProgressPublisher::DEFAULT_INTERVAL)
        );
        assert!(subscription.is_registered());
    }

    #[test]
    fn stays_registered_without_demand() {
        let (source, publisher) = publisher();
        let (subscriber, recording) = RecordingSubscriber::new(Demand::max(1));
        let subscription = publisher.subscribe(subscriber);

        trigger_seconds(&source, &[1, 2, 3]);

        assert_eq!(recording.values(), seconds(&[1]));
        assert_eq!(subscription.requested(), Demand::NONE);
        assert!(subscription.is_registered());
        assert_eq!(source.unregister_count(), 0);

        recording.request(Demand::max(1));
        trigger_seconds(&source, &[4, 5]);
        assert_eq!(recording.values(), seconds(&[1, 4]));
        assert_eq!(source.register_count(), 1);
    }

    #[test]
    fn cancel_is_idempotent() {
        let (source, publisher) = publisher();
        let (subscriber, recording) = RecordingSubscriber::new(Demand::UNLIMITED);
        let subscription = publisher.subscribe(subscriber);

        trigger_seconds(&source, &[1]);
        subscription.cancel();
        subscription.cancel();
        trigger_seconds(&source, &[2, 3]);

        assert_eq!(recording.values(), seconds(&[1]));
        assert_eq!(source.unregister_count(), 1);
        assert!(subscription.is_cancelled());
        assert!(!subscription.is_registered());
    }

    #[test]
    fn cancel_from_multiple_threads() {
        let (source, publisher) = publisher();
        let (subscriber, _recording) = RecordingSubscriber::new(Demand::UNLIMITED);
        let subscription = publisher.subscribe(subscriber);

        let barrier = Arc::new(Barrier::new(4));
        let threads = (0..4)
            .map(|_| {
                let subscription = subscription.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    subscription.cancel();
                })
            })
            .collect::<Vec<_>>();
        for thread in threads {
            thread.join().unwrap();
        }

        assert_eq!(source.register_count(), 1);
        assert_eq!(source.unregister_count(), 1);
    }

    #[test]
    fn cancel_before_demand() {
        let (source, publisher) = publisher();
        let (subscriber, recording) = RecordingSubscriber::new(Demand::NONE);
        let subscription = publisher.subscribe(subscriber);

        subscription.cancel();
        recording.request(Demand::max(3));
        trigger_seconds(&source, &[1, 2]);

        assert!(recording.values().is_empty());
        assert_eq!(source.register_count(), 0);
        assert_eq!(source.unregister_count(), 0);
        assert_eq!(subscription.requested(), Demand::NONE);
    }

    #[test]
    fn request_after_cancel_never_registers_again() {
        let (source, publisher) = publisher();
        let (subscriber, recording) = RecordingSubscriber::new(Demand::max(1));
        let subscription = publisher.subscribe(subscriber);

        subscription.cancel();
        recording.request(Demand::max(1));
        recording.request(Demand::UNLIMITED);
        trigger_seconds(&source, &[1]);

        assert!(recording.values().is_empty());
        assert_eq!(source.register_count(), 1);
        assert_eq!(source.unregister_count(), 1);
        assert_eq!(source.registration_count(), 0);
    }

    #[test]
    fn cancel_from_within_receive() {
        let (source, publisher) = publisher();
        let (subscriber, recording) = RecordingSubscriber::new(Demand::UNLIMITED);
        let subscriber = subscriber.cancel_after(2);
        let subscription = publisher.subscribe(subscriber);

        trigger_seconds(&source, &[1, 2, 3, 4]);

        assert_eq!(recording.values(), seconds(&[1, 2]));
        assert!(subscription.is_cancelled());
        assert_eq!(source.unregister_count(), 1);
    }

    #[test]
    fn preserves_order() {
        let (source, publisher) = publisher();
        let (subscriber, recording) = RecordingSubscriber::new(Demand::max(3));
        publisher.subscribe(subscriber);

        let positions = [
            Duration::from_millis(250),
            Duration::from_millis(500),
            Duration::from_millis(750),
        ];
        for position in positions {
            source.trigger(position);
        }

        assert_eq!(recording.values(), positions.to_vec());
    }

    #[test]
    fn concurrent_ticks_respect_demand() {
        let (source, publisher) = publisher();
        let (subscriber, recording) = RecordingSubscriber::new(Demand::max(50));
        let subscription = publisher.subscribe(subscriber);

        let threads = (0..4)
            .map(|_| {
                let source = Arc::clone(&source);
                thread::spawn(move || {
                    for position in 0..100 {
                        source.trigger(Duration::from_millis(position));
                    }
                })
            })
            .collect::<Vec<_>>();
        for thread in threads {
            thread.join().unwrap();
        }

        assert_eq!(recording.values().len(), 50);
        assert_eq!(subscription.requested(), Demand::NONE);
    }

    #[test]
    fn panicking_subscriber_gets_cancelled() {
        struct PanickingSubscriber;

        impl Subscriber for PanickingSubscriber {
            fn receive_subscription(&mut self, subscription: Subscription) {
                subscription.request(Demand::UNLIMITED);
            }

            fn receive(&mut self, _position: Duration) -> Demand {
                panic!("failed to receive");
            }
        }

        let (source, publisher) = publisher();
        let subscription = publisher.subscribe(PanickingSubscriber);
        trigger_seconds(&source, &[1, 2]);

        assert!(subscription.is_cancelled());
        assert_eq!(source.unregister_count(), 1);
    }

    #[test]
    fn late_callback_after_release_is_dropped() {
        let source = Arc::new(ManualSource::new());
        let (subscriber, recording) = RecordingSubscriber::new(Demand::NONE);
        let subscription = Subscription::new(
            source.clone(),
            Duration::from_millis(100),
            Box::new(subscriber),
        );
        let callback = Subscription::source_callback(Arc::downgrade(&subscription.inner));

        // not attached: the subscriber never got a handle, so nothing keeps the state alive
        subscription.request(Demand::max(1));
        assert_eq!(source.registration_count(), 1);
        drop(subscription);

        assert_eq!(source.unregister_count(), 1);
        callback(Duration::from_secs(1));
        assert!(recording.values().is_empty());
    }

    #[test]
    fn cancel_while_timer_delivers() {
        let start = std::time::Instant::now();
        let source = Arc::new(TimerSource::new(move || start.elapsed()));
        let publisher = PlayheadProgressPublisher::with_options(
            source.clone(),
            ProgressOptions::default().interval(Duration::from_millis(1)),
        )
        .unwrap();

        let received = Arc::new(Mutex::new(Vec::new()));
        let cancellable = publisher.sink({
            let received = Arc::clone(&received);
            move |position| {
                received.lock().push(position);
                // keep the timer thread busy with the subscription locked
                thread::sleep(Duration::from_millis(2));
            }
        });
        assert_eq!(source.timer_count(), 1);

        let mut waited = Duration::ZERO;
        while received.lock().len() < 3 && waited < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(1));
            waited += Duration::from_millis(1);
        }
        assert!(received.lock().len() >= 3);

        cancellable.subscription().cancel();
        let received_on_cancel = received.lock().len();
        assert!(cancellable.subscription().is_cancelled());
        assert_eq!(source.timer_count(), 0);

        thread::sleep(Duration::from_millis(50));
        assert_eq!(received.lock().len(), received_on_cancel);
    }
}
