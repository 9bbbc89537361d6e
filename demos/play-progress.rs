//! Prints playhead positions of a simulated player, using a demand driven subscriber which
//! requests one position at a time and cancels itself after receiving enough of them.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use arg::{parse_args, Args};

use playhead::{
    sources::TimerSource, Demand, Error, PlayheadProgressPublisher, ProgressOptions, Subscriber,
    Subscription,
};

// -------------------------------------------------------------------------------------------------

const DEFAULT_LOG_LEVEL: log::Level = if cfg!(debug_assertions) {
    log::Level::Debug
} else {
    log::Level::Warn
};

// -------------------------------------------------------------------------------------------------

#[derive(Args, Debug, Default)]
struct Arguments {
    #[arg(short = "i", long = "interval")]
    /// Playhead update interval in milliseconds. By default 250.
    interval: Option<u64>,
    #[arg(short = "c", long = "count")]
    /// Number of positions to print before cancelling. By default 10.
    count: Option<usize>,
    #[arg(short = "l", long = "log-level")]
    /// Set logging level to \"debug\", \"info\", \"warn\" or \"error\".
    /// By default \"debug\" in dev builds and \"warn\" in release builds.
    log_level: Option<log::Level>,
}

// -------------------------------------------------------------------------------------------------

/// Requests a single position at a time, until `remaining` positions got printed.
struct PrintingSubscriber {
    subscription: Option<Subscription>,
    remaining: usize,
    finished: Arc<AtomicBool>,
}

impl Subscriber for PrintingSubscriber {
    fn receive_subscription(&mut self, subscription: Subscription) {
        subscription.request(Demand::max(1));
        self.subscription = Some(subscription);
    }

    fn receive(&mut self, position: Duration) -> Demand {
        println!("Playhead at {:.3}s", position.as_secs_f64());
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            if let Some(subscription) = self.subscription.take() {
                subscription.cancel();
            }
            self.finished.store(true, Ordering::Release);
            Demand::NONE
        } else {
            Demand::max(1)
        }
    }
}

// -------------------------------------------------------------------------------------------------

fn main() -> Result<(), Error> {
    let args = parse_args::<Arguments>();

    simple_logger::SimpleLogger::new()
        .with_level(
            args.log_level
                .unwrap_or(DEFAULT_LOG_LEVEL)
                .to_level_filter(),
        )
        .init()
        .expect("Failed to set logger");

    // simulate a player which started playing right now
    let start = Instant::now();
    let source = Arc::new(TimerSource::new(move || start.elapsed()));

    let mut options = ProgressOptions::default();
    if let Some(interval) = args.interval {
        options = options.interval(Duration::from_millis(interval));
    }
    let publisher = PlayheadProgressPublisher::with_options(source.clone(), options)?;

    let finished = Arc::new(AtomicBool::new(false));
    let subscription = publisher.subscribe(PrintingSubscriber {
        subscription: None,
        remaining: args.count.unwrap_or(10).max(1),
        finished: Arc::clone(&finished),
    });

    while !finished.load(Ordering::Acquire) {
        thread::sleep(Duration::from_millis(10));
    }
    log::info!(
        "Subscription #{} finished: cancelled {}, running timers {}",
        subscription.id(),
        subscription.is_cancelled(),
        source.timer_count()
    );

    Ok(())
}
