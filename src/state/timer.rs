use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};

use super::{
    clock::SharedClock,
    session::{SessionConfig, SessionStatus},
};

const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Seconds left on the countdown as an observer at `now` should display it.
pub fn displayed_remaining(config: &SessionConfig, now: SystemTime) -> u64 {
    if config.status != SessionStatus::Active {
        return 0;
    }

    if config.is_running {
        config
            .end_time
            .and_then(|end| end.duration_since(now).ok())
            .map(|left| left.as_secs())
            .unwrap_or(0)
    } else {
        config.remaining_seconds.unwrap_or(0)
    }
}

/// Per-observer countdown, ticking once per second while the session runs.
///
/// At most one ticker task exists at a time; it is replaced whenever the timer fields change
/// and aborted when the countdown is dropped.
pub struct Countdown {
    config: SessionConfig,
    clock: SharedClock,
    sender: Arc<watch::Sender<u64>>,
    receiver: watch::Receiver<u64>,
    ticker: Option<JoinHandle<()>>,
}

impl Countdown {
    /// Create a countdown for `config` and start ticking when it is running.
    pub fn new(config: SessionConfig, clock: SharedClock) -> Self {
        let initial = displayed_remaining(&config, clock.now());
        let (sender, receiver) = watch::channel(initial);
        let mut countdown = Self {
            config,
            clock,
            sender: Arc::new(sender),
            receiver,
            ticker: None,
        };
        countdown.restart();
        countdown
    }

    /// Latest displayed remaining value.
    pub fn remaining(&self) -> u64 {
        *self.receiver.borrow()
    }

    /// Whether a ticker task is currently alive.
    pub fn is_ticking(&self) -> bool {
        self.ticker
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Feed a fresh session snapshot; restarts the ticker when any timer field changed.
    ///
    /// Returns `true` when a restart happened.
    pub fn reconcile(&mut self, config: &SessionConfig) -> bool {
        if &self.config == config {
            return false;
        }

        self.config = config.clone();
        self.restart();
        true
    }

    /// Wait until the ticker publishes a new value.
    pub async fn changed(&mut self) {
        if self.receiver.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    fn restart(&mut self) {
        if let Some(handle) = self.ticker.take() {
            handle.abort();
        }

        let now = self.clock.now();
        let remaining = displayed_remaining(&self.config, now);
        self.sender.send_replace(remaining);
        self.receiver.borrow_and_update();

        let ticking = self.config.status == SessionStatus::Active && self.config.is_running;
        if !ticking || remaining == 0 {
            return;
        }

        let config = self.config.clone();
        let clock = self.clock.clone();
        let sender = self.sender.clone();
        self.ticker = Some(tokio::spawn(async move {
            let mut ticks = interval(TICK_PERIOD);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticks.tick().await;

            loop {
                ticks.tick().await;
                let remaining = displayed_remaining(&config, clock.now());
                sender.send_if_modified(|current| {
                    if *current == remaining {
                        false
                    } else {
                        *current = remaining;
                        true
                    }
                });

                if remaining == 0 {
                    break;
                }
            }
        }));
    }
}

impl Drop for Countdown {
    fn drop(&mut self) {
        if let Some(handle) = self.ticker.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::state::clock::ManualClock;

    fn epoch(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn running_until(end: SystemTime) -> SessionConfig {
        SessionConfig {
            status: SessionStatus::Active,
            is_running: true,
            end_time: Some(end),
            remaining_seconds: None,
        }
    }

    #[test]
    fn inactive_sessions_display_zero() {
        let mut config = running_until(epoch(5_000));
        config.status = SessionStatus::Revealed;
        assert_eq!(displayed_remaining(&config, epoch(1_000)), 0);

        assert_eq!(displayed_remaining(&SessionConfig::default(), epoch(0)), 0);
    }

    #[test]
    fn running_countdown_floors_and_clamps() {
        let config = running_until(epoch(1_000) + Duration::from_millis(10_900));
        assert_eq!(displayed_remaining(&config, epoch(1_000)), 10);
        assert_eq!(displayed_remaining(&config, epoch(2_000)), 0);
    }

    #[test]
    fn paused_countdown_is_static() {
        let config = SessionConfig {
            status: SessionStatus::Active,
            is_running: false,
            end_time: Some(epoch(10)),
            remaining_seconds: Some(321),
        };
        assert_eq!(displayed_remaining(&config, epoch(0)), 321);
        assert_eq!(displayed_remaining(&config, epoch(9_999)), 321);
    }

    #[test]
    fn late_observer_sees_time_elapsed_since_start() {
        let start = epoch(50_000);
        let config = running_until(start + Duration::from_secs(25 * 60));
        let late = start + Duration::from_secs(10 * 60);
        assert_eq!(displayed_remaining(&config, late), 900);
    }

    #[tokio::test]
    async fn reconcile_restarts_only_on_timer_changes() {
        let clock = ManualClock::new(epoch(100));
        let config = running_until(epoch(160));
        let mut countdown = Countdown::new(config.clone(), Arc::new(clock.clone()));

        assert_eq!(countdown.remaining(), 60);
        assert!(countdown.is_ticking());
        assert!(!countdown.reconcile(&config));

        let paused = SessionConfig {
            is_running: false,
            remaining_seconds: Some(42),
            ..config
        };
        assert!(countdown.reconcile(&paused));
        assert_eq!(countdown.remaining(), 42);
        assert!(!countdown.is_ticking());
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_publishes_every_second() {
        let clock = ManualClock::new(epoch(100));
        let mut countdown = Countdown::new(running_until(epoch(103)), Arc::new(clock.clone()));
        assert_eq!(countdown.remaining(), 3);

        clock.advance(Duration::from_secs(1));
        countdown.changed().await;
        assert_eq!(countdown.remaining(), 2);

        clock.advance(Duration::from_secs(2));
        countdown.changed().await;
        assert_eq!(countdown.remaining(), 0);
    }
}
