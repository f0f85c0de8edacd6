//! Billing Clock - one recurring timer task per active session.
//!
//! Each timer is a spawned task owning a child of the controller's
//! `CancellationToken`. Every [`BILLING_INTERVAL`] it computes the elapsed
//! time since the session's monotonic start and the accrued [`Amount`], then
//! awaits the `on_tick` callback. Timers are independent tasks, so a slow
//! callback for one session never delays another session's ticks.
//!
//! # Cancellation
//!
//! [`BillingClock::stop`] cancels the timer's token before returning. A timer
//! that has already computed a tick and is inside `on_tick` at that moment may
//! still complete delivery of that one tick; no further tick is produced. Each
//! tick carries the generation of the timer that produced it, so the consumer
//! can recognise such a late tick with [`BillingClock::is_current`] and drop it.

use super::rate::{Amount, BillingRate};

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Interval between billing ticks.
pub const BILLING_INTERVAL: Duration = Duration::from_secs(60);

/// How long a background reaper waits for a stopped timer task to exit.
const TIMER_REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// One billing computation for an active session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingTick {
    /// Session the tick belongs to.
    pub session_id: String,
    /// Generation of the timer that produced this tick.
    pub generation: u64,
    /// Whole seconds since the session started.
    pub elapsed_seconds: u64,
    /// Charge accrued so far.
    pub amount: Amount,
}

/// A running timer task and the token that stops it.
struct BillingTimer {
    generation: u64,
    cancel_token: CancellationToken,
    task_handle: JoinHandle<()>,
}

/// Owner of all outstanding billing timers, keyed by session id.
pub struct BillingClock {
    interval: Duration,
    parent_token: CancellationToken,
    timers: HashMap<String, BillingTimer>,
    next_generation: u64,
}

impl BillingClock {
    /// Create a clock ticking every [`BILLING_INTERVAL`].
    ///
    /// Every timer token is a child of `parent_token`, so cancelling the
    /// parent stops all timers.
    #[must_use]
    pub fn new(parent_token: CancellationToken) -> Self {
        Self::with_interval(parent_token, BILLING_INTERVAL)
    }

    /// Create a clock with a custom tick interval.
    #[must_use]
    pub fn with_interval(parent_token: CancellationToken, interval: Duration) -> Self {
        Self {
            interval,
            parent_token,
            timers: HashMap::new(),
            next_generation: 1,
        }
    }

    /// Start the recurring timer for `session_id`.
    ///
    /// Ticks fall on whole intervals after `started`. A timer started late
    /// (restarted for a session already running) skips the boundaries already
    /// past and stays on the session's schedule. Returns `false` without
    /// touching the running timer if one already exists for this id.
    pub fn start<F, Fut>(
        &mut self,
        session_id: &str,
        started: Instant,
        rate: BillingRate,
        on_tick: F,
    ) -> bool
    where
        F: Fn(BillingTick) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.timers.contains_key(session_id) {
            return false;
        }

        let generation = self.next_generation;
        self.next_generation += 1;

        let cancel_token = self.parent_token.child_token();
        let task_handle = tokio::spawn(run_timer(
            session_id.to_string(),
            generation,
            started,
            self.interval,
            rate,
            cancel_token.clone(),
            on_tick,
        ));

        self.timers.insert(
            session_id.to_string(),
            BillingTimer {
                generation,
                cancel_token,
                task_handle,
            },
        );

        debug!(
            target: "relay.billing",
            session_id = %session_id,
            generation,
            rate = %rate,
            "Billing timer started"
        );

        true
    }

    /// Stop the timer for `session_id`. Returns whether a timer was running.
    ///
    /// The timer's token is cancelled before this returns. The task itself is
    /// reaped in the background so the caller never waits on it.
    pub fn stop(&mut self, session_id: &str) -> bool {
        let Some(timer) = self.timers.remove(session_id) else {
            return false;
        };

        timer.cancel_token.cancel();

        let session_id = session_id.to_string();
        tokio::spawn(async move {
            match tokio::time::timeout(TIMER_REAP_TIMEOUT, timer.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "relay.billing",
                        session_id = %session_id,
                        "Billing timer task completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "relay.billing",
                        session_id = %session_id,
                        error = ?e,
                        "Billing timer task panicked before stop"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "relay.billing",
                        session_id = %session_id,
                        "Billing timer task cleanup timed out"
                    );
                }
            }
        });

        true
    }

    /// Cancel every timer and wait, up to `timeout` in total, for the tasks to exit.
    ///
    /// Returns the number of timers that were stopped.
    pub async fn stop_all(&mut self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let count = self.timers.len();

        for timer in self.timers.values() {
            timer.cancel_token.cancel();
        }

        for (session_id, timer) in self.timers.drain() {
            match tokio::time::timeout_at(deadline, timer.task_handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(
                        target: "relay.billing",
                        session_id = %session_id,
                        error = ?e,
                        "Billing timer task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "relay.billing",
                        session_id = %session_id,
                        "Billing timer shutdown timed out"
                    );
                }
            }
        }

        count
    }

    /// Whether a timer is running for `session_id`.
    #[must_use]
    pub fn is_running(&self, session_id: &str) -> bool {
        self.timers.contains_key(session_id)
    }

    /// Whether `tick` was produced by the timer currently registered for its session.
    #[must_use]
    pub fn is_current(&self, tick: &BillingTick) -> bool {
        self.timers
            .get(&tick.session_id)
            .is_some_and(|timer| timer.generation == tick.generation)
    }

    /// Number of registered timers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    /// Whether no timers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Remove timers whose task exited on its own and return their session ids.
    ///
    /// A timer only exits on cancellation, so a finished task that is still
    /// registered has panicked (or was cancelled through the parent token).
    pub async fn reap_finished(&mut self) -> Vec<ReapedTimer> {
        let finished: Vec<String> = self
            .timers
            .iter()
            .filter(|(_, timer)| timer.task_handle.is_finished())
            .map(|(id, _)| id.clone())
            .collect();

        let mut reaped = Vec::with_capacity(finished.len());
        for session_id in finished {
            if let Some(timer) = self.timers.remove(&session_id) {
                let panicked = match timer.task_handle.await {
                    Ok(()) => false,
                    Err(join_error) => {
                        if join_error.is_panic() {
                            error!(
                                target: "relay.billing",
                                session_id = %session_id,
                                error = ?join_error,
                                "Billing timer panicked"
                            );
                        }
                        join_error.is_panic()
                    }
                };
                reaped.push(ReapedTimer {
                    session_id,
                    panicked,
                });
            }
        }

        reaped
    }
}

/// A timer removed by [`BillingClock::reap_finished`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReapedTimer {
    pub session_id: String,
    pub panicked: bool,
}

async fn run_timer<F, Fut>(
    session_id: String,
    generation: u64,
    started: Instant,
    interval: Duration,
    rate: BillingRate,
    cancel_token: CancellationToken,
    on_tick: F,
) where
    F: Fn(BillingTick) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let first = next_boundary(started, interval, Instant::now());
    let mut ticker = tokio::time::interval_at(first, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            () = cancel_token.cancelled() => break,

            _ = ticker.tick() => {
                let elapsed_seconds = started.elapsed().as_secs();
                let tick = BillingTick {
                    session_id: session_id.clone(),
                    generation,
                    elapsed_seconds,
                    amount: rate.amount_for(elapsed_seconds),
                };

                tokio::select! {
                    biased;
                    () = cancel_token.cancelled() => break,
                    () = on_tick(tick) => {}
                }
            }
        }
    }

    debug!(
        target: "relay.billing",
        session_id = %session_id,
        generation,
        "Billing timer exited"
    );
}

/// The first whole interval after `started` that is not before `now`.
fn next_boundary(started: Instant, interval: Duration, now: Instant) -> Instant {
    let elapsed = now.saturating_duration_since(started).as_nanos();
    let Some(periods) = elapsed.checked_div(interval.as_nanos()) else {
        return now;
    };
    let periods = if periods * interval.as_nanos() < elapsed {
        periods + 1
    } else {
        periods
    };
    let periods = u32::try_from(periods.max(1)).unwrap_or(u32::MAX);
    started + interval.saturating_mul(periods)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn collector() -> (
        impl Fn(BillingTick) -> std::future::Ready<()> + Send + 'static,
        mpsc::UnboundedReceiver<BillingTick>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let on_tick = move |tick| {
            let _ = tx.send(tick);
            std::future::ready(())
        };
        (on_tick, rx)
    }

    /// Let spawned timer tasks run after the clock moved.
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_every_interval_with_accrued_amount() {
        let mut clock = BillingClock::new(CancellationToken::new());
        let (on_tick, mut rx) = collector();

        let registered = clock.start("s1", Instant::now(), BillingRate::from_cents(200), on_tick);
        assert!(registered);

        tokio::time::advance(Duration::from_secs(59)).await;
        settle().await;
        assert!(rx.try_recv().is_err(), "no tick before the first interval");

        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;
        let tick = rx.try_recv().unwrap();
        assert_eq!(tick.session_id, "s1");
        assert_eq!(tick.elapsed_seconds, 60);
        assert_eq!(tick.amount.to_string(), "2.00");

        tokio::time::advance(Duration::from_secs(60)).await;
        settle().await;
        let tick = rx.try_recv().unwrap();
        assert_eq!(tick.elapsed_seconds, 120);
        assert_eq!(tick.amount.to_string(), "4.00");
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_reports_elapsed_since_session_start() {
        let interval = Duration::from_secs(90);
        let mut clock = BillingClock::with_interval(CancellationToken::new(), interval);
        let (on_tick, mut rx) = collector();

        clock.start("s1", Instant::now(), BillingRate::from_cents(200), on_tick);

        tokio::time::advance(Duration::from_secs(90)).await;
        settle().await;
        let tick = rx.try_recv().unwrap();
        assert_eq!(tick.elapsed_seconds, 90);
        assert_eq!(tick.amount.to_string(), "3.00");
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_start_stays_on_session_schedule() {
        let mut clock = BillingClock::new(CancellationToken::new());
        let (on_tick, mut rx) = collector();
        let session_started = Instant::now();

        tokio::time::advance(Duration::from_secs(150)).await;
        clock.start("s1", session_started, BillingRate::from_cents(200), on_tick);

        tokio::time::advance(Duration::from_secs(29)).await;
        settle().await;
        assert!(rx.try_recv().is_err(), "no catch-up tick on a late start");

        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;
        let tick = rx.try_recv().unwrap();
        assert_eq!(tick.elapsed_seconds, 180);
        assert_eq!(tick.amount.to_string(), "6.00");

        tokio::time::advance(Duration::from_secs(60)).await;
        settle().await;
        let tick = rx.try_recv().unwrap();
        assert_eq!(tick.elapsed_seconds, 240);
        assert_eq!(tick.amount.to_string(), "8.00");
    }

    #[test]
    fn test_next_boundary() {
        let started = Instant::now();
        let interval = Duration::from_secs(60);
        let at = |secs| started + Duration::from_secs(secs);

        assert_eq!(next_boundary(started, interval, started), at(60));
        assert_eq!(next_boundary(started, interval, at(59)), at(60));
        assert_eq!(next_boundary(started, interval, at(150)), at(180));
        assert_eq!(next_boundary(started, interval, at(180)), at(180));
        assert_eq!(next_boundary(started, Duration::ZERO, at(5)), at(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_ticks_after_stop() {
        let mut clock = BillingClock::new(CancellationToken::new());
        let (on_tick, mut rx) = collector();

        clock.start("s1", Instant::now(), BillingRate::default(), on_tick);
        tokio::time::advance(Duration::from_secs(60)).await;
        settle().await;
        assert!(rx.try_recv().is_ok());

        assert!(clock.stop("s1"));
        assert!(!clock.is_running("s1"));

        tokio::time::advance(Duration::from_secs(600)).await;
        settle().await;
        assert!(rx.try_recv().is_err(), "stopped timer must not tick");
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_keeps_first_timer() {
        let mut clock = BillingClock::new(CancellationToken::new());
        let (first, mut first_rx) = collector();
        let (second, mut second_rx) = collector();

        let started = Instant::now();
        assert!(clock.start("s1", started, BillingRate::default(), first));
        assert!(!clock.start("s1", started, BillingRate::default(), second));
        assert_eq!(clock.len(), 1);

        tokio::time::advance(Duration::from_secs(60)).await;
        settle().await;
        assert!(first_rx.try_recv().is_ok());
        assert!(second_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_unknown_session_is_noop() {
        let mut clock = BillingClock::new(CancellationToken::new());
        assert!(!clock.stop("missing"));
        assert!(clock.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_handler_does_not_delay_other_sessions() {
        let mut clock = BillingClock::new(CancellationToken::new());

        // s1's handler never completes.
        clock.start("s1", Instant::now(), BillingRate::default(), |_tick| {
            std::future::pending::<()>()
        });
        let (on_tick, mut rx) = collector();
        clock.start("s2", Instant::now(), BillingRate::default(), on_tick);

        for expected in [60, 120, 180] {
            tokio::time::advance(Duration::from_secs(60)).await;
            settle().await;
            assert_eq!(rx.try_recv().unwrap().elapsed_seconds, expected);
        }

        // Stopping a timer that is blocked inside its handler still works.
        assert!(clock.stop("s1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_tick_is_not_current_after_restart() {
        let mut clock = BillingClock::new(CancellationToken::new());
        let (on_tick, mut rx) = collector();
        clock.start("s1", Instant::now(), BillingRate::default(), on_tick);

        tokio::time::advance(Duration::from_secs(60)).await;
        settle().await;
        let old_tick = rx.try_recv().unwrap();
        assert!(clock.is_current(&old_tick));

        clock.stop("s1");
        assert!(!clock.is_current(&old_tick));

        let (on_tick, _rx) = collector();
        clock.start("s1", Instant::now(), BillingRate::default(), on_tick);
        assert!(!clock.is_current(&old_tick));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_all_cancels_every_timer() {
        let mut clock = BillingClock::new(CancellationToken::new());
        let (tx, mut rx) = mpsc::unbounded_channel();

        for id in ["a", "b", "c"] {
            let tx = tx.clone();
            clock.start(id, Instant::now(), BillingRate::default(), move |tick| {
                let _ = tx.send(tick);
                std::future::ready(())
            });
        }
        assert_eq!(clock.len(), 3);

        let stopped = clock.stop_all(Duration::from_secs(5)).await;
        assert_eq!(stopped, 3);
        assert!(clock.is_empty());

        tokio::time::advance(Duration::from_secs(120)).await;
        settle().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_cancellation_stops_timers() {
        let parent = CancellationToken::new();
        let mut clock = BillingClock::new(parent.clone());
        let (on_tick, mut rx) = collector();
        clock.start("s1", Instant::now(), BillingRate::default(), on_tick);

        parent.cancel();
        tokio::time::advance(Duration::from_secs(60)).await;
        settle().await;
        assert!(rx.try_recv().is_err());

        let reaped = clock.reap_finished().await;
        assert_eq!(
            reaped,
            vec![ReapedTimer {
                session_id: "s1".to_string(),
                panicked: false
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reap_finished_detects_panicked_timer() {
        let mut clock = BillingClock::new(CancellationToken::new());
        clock.start("s1", Instant::now(), BillingRate::default(), |_tick| async {
            panic!("handler bug");
        });

        tokio::time::advance(Duration::from_secs(60)).await;
        settle().await;

        let reaped = clock.reap_finished().await;
        assert_eq!(reaped.len(), 1);
        assert!(reaped.first().unwrap().panicked);
        assert!(!clock.is_running("s1"));
    }
}
