use log::debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};

/// Event published by the countdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockEvent {
    /// One unit elapsed; `remaining` units are left
    Tick { remaining: u32 },
    /// Countdown reached zero. Sent exactly once, after the final tick.
    Expired,
}

/// Fixed-duration countdown driving the capture window.
///
/// Ticks are published on a channel consumed by the session control loop.
/// After [`SessionClock::cancel`] returns, no further event is delivered:
/// the timer task is aborted and [`SessionClock::is_cancelled`] lets the
/// consumer discard anything already queued.
pub struct SessionClock {
    cancelled: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl SessionClock {
    /// Start counting down `duration_ticks` units of `tick_interval` each.
    pub fn start(duration_ticks: u32, tick_interval: Duration) -> (Self, mpsc::Receiver<ClockEvent>) {
        let (tx, rx) = mpsc::channel(duration_ticks as usize + 1);
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + tick_interval, tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            for remaining in (0..duration_ticks).rev() {
                ticker.tick().await;
                if flag.load(Ordering::Acquire) {
                    return;
                }
                if tx.send(ClockEvent::Tick { remaining }).await.is_err() {
                    debug!("Clock receiver dropped with {} units left", remaining);
                    return;
                }
            }

            if !flag.load(Ordering::Acquire) {
                let _ = tx.send(ClockEvent::Expired).await;
            }
        });

        (SessionClock { cancelled, task }, rx)
    }

    /// Stop the countdown. Returns `true` only for the call that actually
    /// cancelled; repeated calls are no-ops.
    pub fn cancel(&self) -> bool {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.task.abort();
        debug!("Session clock cancelled");
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Drop for SessionClock {
    fn drop(&mut self) {
        self.cancel();
    }
}
