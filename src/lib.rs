#![doc = include_str!("../README.md")]

// private mods (will be partly re-exported)
mod demand;
mod error;
mod publisher;
mod source;
mod subscriber;
mod subscription;
mod utils;

// public, flat re-exports
pub use demand::Demand;
pub use error::Error;

pub use publisher::{PeriodicSourceExt, PlayheadProgressPublisher, ProgressOptions};
pub use subscriber::{Cancellable, Sink, Subscriber};
pub use subscription::{Subscription, SubscriptionId};

pub use source::{PeriodicCallback, PeriodicSource, PlaybackClock, RegistrationToken};

pub mod sources {
    //! Set of basic [`PeriodicSource`](super::PeriodicSource) implementations.

    pub use super::source::{manual::ManualSource, timer::TimerSource};
}
