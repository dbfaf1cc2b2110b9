//! Demo event generator.
//!
//! While no bridge is connected the counter would sit still, so a synthetic
//! source produces plausible traffic instead: every period it draws
//! `u ∈ [0, 1)` and emits `In` below 0.45, `Out` below 0.90, and nothing
//! otherwise. It parks as soon as the link reports `Connected` and resumes
//! with a fresh cadence when the link drops.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};

use crate::aggregator::{Event, EventSink};
use crate::link::LinkStatus;
use crate::protocol::Direction;

/// Upper bound (exclusive) of draws that become `In`.
pub const IN_THRESHOLD: f64 = 0.45;

/// Upper bound (exclusive) of draws that become `Out`.
pub const OUT_THRESHOLD: f64 = 0.90;

/// Map a uniform draw to a direction.
#[must_use]
pub fn classify(draw: f64) -> Option<Direction> {
    if draw < IN_THRESHOLD {
        Some(Direction::In)
    } else if draw < OUT_THRESHOLD {
        Some(Direction::Out)
    } else {
        None
    }
}

/// Random crossing generator.
#[derive(Debug)]
pub struct SyntheticEventSource {
    period: Duration,
    rng: StdRng,
}

impl SyntheticEventSource {
    /// A generator seeded from the operating system.
    #[must_use]
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            rng: StdRng::from_os_rng(),
        }
    }

    /// A reproducible generator.
    #[must_use]
    pub fn with_seed(period: Duration, seed: u64) -> Self {
        Self {
            period,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Time between ticks.
    #[must_use]
    pub const fn period(&self) -> Duration {
        self.period
    }

    /// Draw the outcome of one tick.
    pub fn sample(&mut self) -> Option<Direction> {
        classify(self.rng.random::<f64>())
    }

    /// Run on the current runtime, gated on `status`.
    ///
    /// The task ends when the status sender is dropped; abort the handle to
    /// stop it earlier.
    pub fn spawn(self, status: watch::Receiver<LinkStatus>, sink: Arc<dyn EventSink>) -> JoinHandle<()> {
        tokio::spawn(self.run(status, sink))
    }

    async fn run(mut self, mut status: watch::Receiver<LinkStatus>, sink: Arc<dyn EventSink>) {
        loop {
            if status
                .wait_for(|status| !status.state.is_connected())
                .await
                .is_err()
            {
                return;
            }
            debug!(period_ms = self.period.as_millis(), "Synthetic source active");

            let mut ticker = tokio::time::interval_at(Instant::now() + self.period, self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if status.borrow().state.is_connected() {
                            break;
                        }
                        self.tick(sink.as_ref());
                    }
                    changed = status.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        if status.borrow_and_update().state.is_connected() {
                            break;
                        }
                    }
                }
            }
            debug!("Synthetic source parked while the link is up");
        }
    }

    fn tick(&mut self, sink: &dyn EventSink) {
        match self.sample() {
            Some(direction) => {
                trace!(%direction, "Synthetic crossing");
                sink.ingest(Event::now(direction));
            }
            None => sink.unrecognized(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::link::LinkState;

    #[derive(Default)]
    struct TickCounter {
        ticks: AtomicUsize,
    }

    impl TickCounter {
        fn ticks(&self) -> usize {
            self.ticks.load(Ordering::SeqCst)
        }
    }

    impl EventSink for TickCounter {
        fn ingest(&self, _event: Event) {
            self.ticks.fetch_add(1, Ordering::SeqCst);
        }

        fn unrecognized(&self) {
            self.ticks.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn status(state: LinkState) -> LinkStatus {
        LinkStatus {
            state,
            ..LinkStatus::default()
        }
    }

    const PERIOD: Duration = Duration::from_secs(3);

    #[test]
    fn test_classify_boundaries() {
        assert_eq!(classify(0.0), Some(Direction::In));
        assert_eq!(classify(0.449_999), Some(Direction::In));
        assert_eq!(classify(0.45), Some(Direction::Out));
        assert_eq!(classify(0.899_999), Some(Direction::Out));
        assert_eq!(classify(0.90), None);
        assert_eq!(classify(0.999_999), None);
    }

    #[test]
    fn test_distribution_roughly_matches() {
        let mut source = SyntheticEventSource::with_seed(PERIOD, 42);
        let (mut ins, mut outs, mut none) = (0u32, 0u32, 0u32);
        for _ in 0..10_000 {
            match source.sample() {
                Some(Direction::In) => ins += 1,
                Some(Direction::Out) => outs += 1,
                None => none += 1,
            }
        }
        assert!((4_200..4_800).contains(&ins), "in: {ins}");
        assert!((4_200..4_800).contains(&outs), "out: {outs}");
        assert!((800..1_200).contains(&none), "none: {none}");
    }

    #[test]
    fn test_seeded_sources_agree() {
        let mut a = SyntheticEventSource::with_seed(PERIOD, 7);
        let mut b = SyntheticEventSource::with_seed(PERIOD, 7);
        for _ in 0..50 {
            assert_eq!(a.sample(), b.sample());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_once_per_period() {
        let (_tx, rx) = watch::channel(status(LinkState::Disconnected));
        let sink = Arc::new(TickCounter::default());
        let _task = SyntheticEventSource::with_seed(PERIOD, 1).spawn(rx, sink.clone());

        tokio::time::sleep(Duration::from_millis(2_900)).await;
        assert_eq!(sink.ticks(), 0, "first tick is one period after start");

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(sink.ticks(), 1);

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(sink.ticks(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parks_while_connected_and_resumes() {
        let (tx, rx) = watch::channel(status(LinkState::Disconnected));
        let sink = Arc::new(TickCounter::default());
        let _task = SyntheticEventSource::with_seed(PERIOD, 1).spawn(rx, sink.clone());

        tokio::time::sleep(Duration::from_millis(3_100)).await;
        assert_eq!(sink.ticks(), 1);

        tx.send_replace(status(LinkState::Connected));
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(sink.ticks(), 1, "no synthetic events while connected");

        tx.send_replace(status(LinkState::Disconnected));
        tokio::time::sleep(Duration::from_millis(2_900)).await;
        assert_eq!(sink.ticks(), 1, "cadence restarts from the disconnect");
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(sink.ticks(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keeps_running_while_connecting() {
        let (tx, rx) = watch::channel(status(LinkState::Disconnected));
        let sink = Arc::new(TickCounter::default());
        let _task = SyntheticEventSource::with_seed(PERIOD, 1).spawn(rx, sink.clone());

        tx.send_replace(status(LinkState::Connecting));
        tokio::time::sleep(Duration::from_millis(6_100)).await;

        assert_eq!(sink.ticks(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_when_status_sender_dropped() {
        let (tx, rx) = watch::channel(status(LinkState::Disconnected));
        let sink = Arc::new(TickCounter::default());
        let task = SyntheticEventSource::with_seed(PERIOD, 1).spawn(rx, sink);

        drop(tx);

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("task should end")
            .unwrap();
    }
}
