use chrono::{DateTime, Local};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info};

const MS_PER_SECOND: i64 = 1000;
const MS_PER_MINUTE: i64 = 60 * MS_PER_SECOND;
const MS_PER_HOUR: i64 = 60 * MS_PER_MINUTE;
const MS_PER_DAY: i64 = 24 * MS_PER_HOUR;

pub const TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GateState {
    Locked,
    Unlocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Countdown {
    pub days: i64,
    pub hours: i64,   // 0-23
    pub minutes: i64, // 0-59
    pub seconds: i64, // 0-59
}

impl Countdown {
    pub fn from_millis(remaining_ms: i64) -> Self {
        let ms = remaining_ms.max(0);
        Self {
            days: ms / MS_PER_DAY,
            hours: (ms % MS_PER_DAY) / MS_PER_HOUR,
            minutes: (ms % MS_PER_HOUR) / MS_PER_MINUTE,
            seconds: (ms % MS_PER_MINUTE) / MS_PER_SECOND,
        }
    }

    #[cfg(test)]
    pub fn total_seconds(&self) -> i64 {
        self.days * 86_400 + self.hours * 3_600 + self.minutes * 60 + self.seconds
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateTick {
    Remaining(Countdown),
    Unlocked,
}

pub struct UnlockGate {
    target: DateTime<Local>,
    state: GateState,
}

impl UnlockGate {
    // a session starting after the target never sees the countdown
    pub fn new(target: DateTime<Local>, now: DateTime<Local>) -> Self {
        let state = if now >= target {
            GateState::Unlocked
        } else {
            GateState::Locked
        };

        Self { target, state }
    }

    pub fn target(&self) -> DateTime<Local> {
        self.target
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    // unlocked is terminal, whatever `now` says
    pub fn tick(&mut self, now: DateTime<Local>) -> GateTick {
        if self.state == GateState::Unlocked {
            return GateTick::Unlocked;
        }

        let remaining_ms = (self.target - now).num_milliseconds();
        if remaining_ms <= 0 {
            self.state = GateState::Unlocked;
            return GateTick::Unlocked;
        }

        GateTick::Remaining(Countdown::from_millis(remaining_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GateSnapshot {
    pub state: GateState,
    pub remaining: Option<Countdown>,
    pub target: DateTime<Local>,
}

impl GateSnapshot {
    fn sample(gate: &mut UnlockGate, now: DateTime<Local>) -> Self {
        let remaining = match gate.tick(now) {
            GateTick::Remaining(countdown) => Some(countdown),
            GateTick::Unlocked => None,
        };

        Self {
            state: gate.state(),
            remaining,
            target: gate.target(),
        }
    }

    pub fn is_unlocked(&self) -> bool {
        self.state == GateState::Unlocked
    }

    // `preview` is the manual bypass. It only affects what is shown, never
    // the gate state.
    pub fn is_visible(&self, preview: bool) -> bool {
        self.is_unlocked() || preview
    }
}

pub type Clock = Arc<dyn Fn() -> DateTime<Local> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Local::now)
}

// Owns the 1s sampler; dropping it stops the tick
pub struct GateTimer {
    handle: Option<JoinHandle<()>>,
}

impl GateTimer {
    // no task when the gate is already unlocked
    pub fn spawn(mut gate: UnlockGate, clock: Clock) -> (Self, watch::Receiver<GateSnapshot>) {
        let initial = GateSnapshot::sample(&mut gate, clock());
        let unlocked = initial.is_unlocked();
        let (tx, rx) = watch::channel(initial);

        if unlocked {
            info!(target_instant = %gate.target(), "gate already unlocked");
            return (Self { handle: None }, rx);
        }

        let handle = tokio::spawn(async move {
            let mut interval = interval(TICK);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // first tick completes immediately and was covered by `initial`
            interval.tick().await;

            loop {
                interval.tick().await;

                let snapshot = GateSnapshot::sample(&mut gate, clock());
                let unlocked = snapshot.is_unlocked();

                if tx.send(snapshot).is_err() {
                    debug!("gate watchers gone, stopping timer");
                    return;
                }
                if unlocked {
                    info!(target_instant = %gate.target(), "gate unlocked");
                    return;
                }
            }
        });

        (
            Self {
                handle: Some(handle),
            },
            rx,
        )
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn cancel(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for GateTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn at(offset_ms: i64) -> DateTime<Local> {
        base() + TimeDelta::milliseconds(offset_ms)
    }

    fn base() -> DateTime<Local> {
        DateTime::parse_from_rfc3339("2025-12-04T12:00:00+00:00")
            .unwrap()
            .with_timezone(&Local)
    }

    // Wall clock that follows tokio's (pausable) clock from `start`.
    fn paused_clock(start: DateTime<Local>) -> Clock {
        let origin = tokio::time::Instant::now();
        Arc::new(move || start + TimeDelta::from_std(origin.elapsed()).unwrap())
    }

    #[test]
    fn countdown_decomposes_the_remaining_time() {
        let ms = 3 * MS_PER_DAY + 4 * MS_PER_HOUR + 5 * MS_PER_MINUTE + 6 * MS_PER_SECOND + 789;
        let countdown = Countdown::from_millis(ms);
        assert_eq!(
            countdown,
            Countdown {
                days: 3,
                hours: 4,
                minutes: 5,
                seconds: 6
            }
        );
        assert_eq!(countdown.total_seconds(), ms / 1000);
    }

    #[test]
    fn countdown_total_matches_whole_seconds_left() {
        let target = at(0);
        for remaining in [1, 999, 1_000, 59_999, 3_600_000, 86_399_999, 86_400_000, 987_654_321] {
            let mut gate = UnlockGate::new(target, at(-remaining));
            match gate.tick(at(-remaining)) {
                GateTick::Remaining(countdown) => {
                    assert_eq!(countdown.total_seconds(), remaining / 1000);
                    assert!((0..24).contains(&countdown.hours));
                    assert!((0..60).contains(&countdown.minutes));
                    assert!((0..60).contains(&countdown.seconds));
                }
                GateTick::Unlocked => panic!("unlocked {} ms early", remaining),
            }
            assert_eq!(gate.state(), GateState::Locked);
        }
    }

    #[test]
    fn unlocks_at_target_and_never_relocks() {
        let mut gate = UnlockGate::new(at(0), at(-1_500));
        assert_eq!(gate.state(), GateState::Locked);

        assert_eq!(gate.tick(at(0)), GateTick::Unlocked);
        assert_eq!(gate.state(), GateState::Unlocked);

        // a clock jumping backwards does not lock the gate again
        assert_eq!(gate.tick(at(-60_000)), GateTick::Unlocked);
        assert_eq!(gate.state(), GateState::Unlocked);
    }

    #[test]
    fn session_after_target_starts_unlocked() {
        let gate = UnlockGate::new(at(0), at(5));
        assert_eq!(gate.state(), GateState::Unlocked);
    }

    #[test]
    fn preview_only_changes_visibility() {
        let mut gate = UnlockGate::new(at(0), at(-10_000));
        let locked = GateSnapshot::sample(&mut gate, at(-10_000));

        assert!(!locked.is_visible(false));
        assert!(locked.is_visible(true));
        assert_eq!(locked.state, GateState::Locked);
        assert!(locked.remaining.is_some());

        // turning the bypass off again leaves the countdown where it was
        let still_locked = GateSnapshot::sample(&mut gate, at(-9_000));
        assert!(!still_locked.is_visible(false));
        assert_eq!(gate.state(), GateState::Locked);

        let unlocked = GateSnapshot::sample(&mut gate, at(1));
        assert!(unlocked.is_visible(false));
        assert!(unlocked.is_visible(true));
    }

    #[tokio::test(start_paused = true)]
    async fn timer_counts_down_then_stops_on_unlock() {
        let clock = paused_clock(at(-2_500));
        let gate = UnlockGate::new(at(0), clock());
        let (timer, mut rx) = GateTimer::spawn(gate, clock);

        let first = rx.borrow_and_update().clone();
        assert_eq!(first.state, GateState::Locked);
        assert_eq!(first.remaining.map(|c| c.seconds), Some(2));

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().remaining.map(|c| c.seconds), Some(1));

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().remaining.map(|c| c.seconds), Some(0));

        rx.changed().await.unwrap();
        let last = rx.borrow_and_update().clone();
        assert!(last.is_unlocked());
        assert_eq!(last.remaining, None);

        // sender is dropped once the task returns
        assert!(rx.changed().await.is_err());
        tokio::task::yield_now().await;
        assert!(!timer.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn timer_is_not_started_when_already_unlocked() {
        let clock = paused_clock(at(1_000));
        let gate = UnlockGate::new(at(0), clock());
        let (timer, rx) = GateTimer::spawn(gate, clock);

        assert!(!timer.is_running());
        let snapshot = rx.borrow().clone();
        assert!(snapshot.is_unlocked());
        assert_eq!(snapshot.remaining, None);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_ticking() {
        let clock = paused_clock(at(-3_600_000));
        let gate = UnlockGate::new(at(0), clock());
        let (timer, mut rx) = GateTimer::spawn(gate, clock);

        rx.changed().await.unwrap();
        timer.cancel();

        // the aborted task drops the sender instead of ticking again
        assert!(rx.changed().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_timer_tears_it_down() {
        let clock = paused_clock(at(-3_600_000));
        let gate = UnlockGate::new(at(0), clock());
        let (timer, mut rx) = GateTimer::spawn(gate, clock);
        drop(timer);

        assert!(rx.changed().await.is_err());
        assert!(rx.borrow().remaining.is_some());
    }
}
