//! Closed-loop trigger level convergence.
//!
//! A [`TriggerLevelController`] walks an oscilloscope's trigger level from a
//! start value towards a target in fixed steps, one step per tick, so the
//! operator can watch the display settle at each level. Progress and the
//! final outcome are published as [`TriggerEvent`]s.
//!
//! ```text
//!   start() ──► Active ──tick──► Active ──tick──► ... ──► Idle
//!                 │                                ▲
//!                 └──────── stop() / error ────────┘
//! ```
//!
//! Each tick moves the level by at most `step_scale`, waits for the scope to
//! settle, and finishes the session once the level is strictly within the
//! tolerance of the target. `stop()` prevents further ticks but lets a tick
//! that is already running finish. Restarting waits for that tick, and a
//! tick only ever writes into the session that spawned it.

use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use benchlib_core::capability::{Instrument, Oscilloscope};
use benchlib_core::config::Timings;
use benchlib_core::error::{Error, Result};
use benchlib_core::events::TriggerEvent;

/// Default convergence tolerance in volts.
pub const DEFAULT_TOLERANCE: f64 = 1.0;

const EVENT_CAPACITY: usize = 64;

/// Parameters of one convergence session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerSession {
    pub start_level: f64,
    pub target_level: f64,
    /// Largest change per tick; the sign is ignored.
    pub step_scale: f64,
}

#[derive(Debug, Clone, PartialEq)]
enum Finish {
    Reached,
    Stopped,
    Failed(String),
}

#[derive(Debug, Default)]
struct SessionState {
    /// Bumped by every `start()`.
    session: u64,
    target_level: f64,
    step_scale: f64,
    current_level: f64,
    step_count: u32,
    active: bool,
    finish: Option<Finish>,
}

struct Shared {
    state: Mutex<SessionState>,
    events: broadcast::Sender<TriggerEvent>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: TriggerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// End `session` with an error. A no-op once a newer session started.
    fn fail(&self, session: u64, message: String) {
        {
            let mut st = self.lock();
            if st.session != session {
                tracing::debug!(session, error = %message, "Stale trigger session failure dropped");
                return;
            }
            st.active = false;
            st.finish = Some(Finish::Failed(message.clone()));
        }
        tracing::error!(error = %message, "Trigger tracking failed");
        self.emit(TriggerEvent::Error { message });
    }
}

/// Walks an oscilloscope's trigger level towards a target.
pub struct TriggerLevelController {
    scope: Arc<dyn Oscilloscope>,
    shared: Arc<Shared>,
    cancel: Mutex<Option<CancellationToken>>,
    task: Mutex<Option<JoinHandle<()>>>,
    tick_interval: Duration,
    settle_delay: Duration,
    tolerance: f64,
}

impl TriggerLevelController {
    /// A controller with the default 800 ms tick and 300 ms settle delay.
    pub fn new(scope: Arc<dyn Oscilloscope>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let timings = Timings::default();
        Self {
            scope,
            shared: Arc::new(Shared {
                state: Mutex::new(SessionState::default()),
                events,
            }),
            cancel: Mutex::new(None),
            task: Mutex::new(None),
            tick_interval: timings.tick_interval(),
            settle_delay: timings.settle_delay(),
            tolerance: DEFAULT_TOLERANCE,
        }
    }

    /// Take tick interval and settle delay from `timings`.
    pub fn with_timings(mut self, timings: &Timings) -> Self {
        self.tick_interval = timings.tick_interval();
        self.settle_delay = timings.settle_delay();
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance.abs();
        self
    }

    /// Receive progress and outcome events.
    pub fn subscribe(&self) -> broadcast::Receiver<TriggerEvent> {
        self.shared.events.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.shared.lock().active
    }

    /// Trigger level most recently applied.
    pub fn current_level(&self) -> f64 {
        self.shared.lock().current_level
    }

    /// Steps applied in the current or last session.
    pub fn step_count(&self) -> u32 {
        self.shared.lock().step_count
    }

    pub fn target_level(&self) -> f64 {
        self.shared.lock().target_level
    }

    /// Change the target; takes effect on the next tick.
    pub fn set_target_level(&self, level: f64) {
        self.shared.lock().target_level = level;
        tracing::debug!(target_level = level, "Trigger target updated");
    }

    /// Change the step size; takes effect on the next tick.
    pub fn set_step_scale(&self, scale: f64) {
        self.shared.lock().step_scale = scale.abs();
        tracing::debug!(step_scale = scale.abs(), "Trigger step updated");
    }

    /// Begin a session.
    ///
    /// Puts the scope in normal trigger mode and applies the start level. If
    /// that is already within tolerance the session ends immediately;
    /// otherwise a background worker starts ticking. Any session still
    /// running is stopped first, and a tick it has in flight is allowed to
    /// finish before the new session's state is set up.
    pub async fn start(&self, session: TriggerSession) -> Result<()> {
        self.stop();
        let previous = lock(&self.task).take();
        if let Some(previous) = previous {
            if let Err(e) = previous.await {
                tracing::warn!(error = %e, "Previous trigger worker ended abnormally");
            }
        }

        let id = {
            let mut st = self.shared.lock();
            st.session += 1;
            st.session
        };

        if !self.scope.is_connected().await {
            self.shared.fail(id, "Instrument not connected".into());
            return Err(Error::NotConnected);
        }

        {
            let mut st = self.shared.lock();
            st.target_level = session.target_level;
            st.step_scale = session.step_scale.abs();
            st.current_level = session.start_level;
            st.step_count = 0;
            st.active = true;
            st.finish = None;
        }
        tracing::info!(
            model = %self.scope.model(),
            start = session.start_level,
            target = session.target_level,
            step = session.step_scale.abs(),
            "Starting trigger tracking"
        );

        if let Err(e) = self.scope.normal().await {
            self.shared.fail(id, format!("Failed to start tracking: {e}"));
            return Err(e);
        }
        if let Err(e) = self.scope.set_trigger_level(session.start_level).await {
            self.shared.fail(id, "Failed to set initial trigger level".into());
            return Err(e);
        }

        if (session.start_level - session.target_level).abs() < self.tolerance {
            {
                let mut st = self.shared.lock();
                st.active = false;
                st.finish = Some(Finish::Reached);
            }
            self.shared.emit(TriggerEvent::TargetReached {
                level: session.start_level,
            });
            self.shared.emit(TriggerEvent::Completed {
                success: true,
                message: "Already at target level".into(),
            });
            return Ok(());
        }

        let cancel = CancellationToken::new();
        let worker = tokio::spawn(run_worker(
            self.scope.clone(),
            self.shared.clone(),
            id,
            cancel.clone(),
            self.tick_interval,
            self.settle_delay,
            self.tolerance,
        ));
        let shared = self.shared.clone();
        let task = tokio::spawn(async move {
            match worker.await {
                Ok(()) => {}
                Err(e) if e.is_panic() => {
                    shared.fail(id, "Trigger tracking stopped unexpectedly".into());
                }
                Err(e) => tracing::debug!(error = %e, "Trigger worker aborted"),
            }
        });
        *lock(&self.cancel) = Some(cancel);
        *lock(&self.task) = Some(task);
        Ok(())
    }

    /// Stop ticking. Idempotent; a tick already in progress completes.
    pub fn stop(&self) {
        if let Some(cancel) = lock(&self.cancel).take() {
            cancel.cancel();
        }
        let was_active = {
            let mut st = self.shared.lock();
            let was_active = st.active;
            st.active = false;
            if was_active {
                st.finish = Some(Finish::Stopped);
            }
            was_active
        };
        if was_active {
            tracing::info!("Trigger tracking stopped");
            self.shared.emit(TriggerEvent::Completed {
                success: false,
                message: "Stopped before reaching target".into(),
            });
        }
    }

    /// Wait for the worker to finish and report the outcome.
    ///
    /// Returns the final level on convergence, [`Error::Cancelled`] if the
    /// session was stopped, or a transport error carrying the failure text.
    pub async fn wait(&self) -> Result<f64> {
        let task = lock(&self.task).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Trigger supervisor failed");
            }
        }
        let st = self.shared.lock();
        match &st.finish {
            Some(Finish::Reached) => Ok(st.current_level),
            Some(Finish::Stopped) => Err(Error::Cancelled),
            Some(Finish::Failed(message)) => Err(Error::Transport(message.clone())),
            None => Err(Error::InvalidParameter("no trigger session has run".into())),
        }
    }
}

impl Drop for TriggerLevelController {
    fn drop(&mut self) {
        if let Some(cancel) = lock(&self.cancel).take() {
            cancel.cancel();
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// The level one step from `current` towards `target`.
///
/// Lands exactly on `target` once it is within one step. A zero step jumps
/// straight to the target.
pub fn next_level(current: f64, target: f64, step_scale: f64) -> f64 {
    let difference = target - current;
    if step_scale <= 0.0 || difference.abs() <= step_scale {
        target
    } else {
        current + step_scale.copysign(difference)
    }
}

async fn run_worker(
    scope: Arc<dyn Oscilloscope>,
    shared: Arc<Shared>,
    session: u64,
    cancel: CancellationToken,
    interval: Duration,
    settle: Duration,
    tolerance: f64,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                tracing::debug!("Trigger worker cancelled");
                break;
            }

            _ = ticker.tick() => {
                if tick(&*scope, &shared, session, settle, tolerance).await.is_break() {
                    break;
                }
            }
        }
    }
}

async fn tick(
    scope: &dyn Oscilloscope,
    shared: &Shared,
    session: u64,
    settle: Duration,
    tolerance: f64,
) -> ControlFlow<()> {
    let (target, current, step, count) = {
        let st = shared.lock();
        if st.session != session || !st.active {
            return ControlFlow::Break(());
        }
        (st.target_level, st.current_level, st.step_scale, st.step_count)
    };

    if !scope.is_connected().await {
        shared.fail(session, "Instrument disconnected during adjustment".into());
        return ControlFlow::Break(());
    }

    let next = next_level(current, target, step);
    tracing::debug!(step = count + 1, current, target, next, "Trigger adjustment");

    if let Err(e) = scope.set_trigger_level(next).await {
        tracing::debug!(error = %e, "Trigger level write failed");
        shared.fail(session, format!("Failed to set trigger level to {next:.3}V"));
        return ControlFlow::Break(());
    }

    tokio::time::sleep(settle).await;

    let (step_count, reached, still_active) = {
        let mut st = shared.lock();
        if st.session != session {
            tracing::debug!(session, next, "Tick finished after a restart, result dropped");
            return ControlFlow::Break(());
        }
        st.current_level = next;
        st.step_count += 1;
        let reached = st.active && (next - st.target_level).abs() < tolerance;
        if reached {
            st.active = false;
            st.finish = Some(Finish::Reached);
        }
        (st.step_count, reached, st.active)
    };

    shared.emit(TriggerEvent::Progress {
        current_level: next,
        step_count,
    });

    if reached {
        tracing::info!(level = next, steps = step_count, "Trigger target reached");
        shared.emit(TriggerEvent::TargetReached { level: next });
        shared.emit(TriggerEvent::Completed {
            success: true,
            message: format!(
                "Successfully reached target level {next:.3}V in {step_count} steps"
            ),
        });
        return ControlFlow::Break(());
    }
    if still_active {
        ControlFlow::Continue(())
    } else {
        ControlFlow::Break(())
    }
}
