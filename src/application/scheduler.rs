//! Interval scheduler for the two check cadences
//!
//! Each cadence has its own timer task. A timer is reconfigured at runtime
//! through a `watch` channel; an interval of zero pauses it. Intervals
//! persisted in the settings table win over the configured defaults and are
//! re-read periodically so an operator can change them while the daemon runs.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::orchestrator::{Cadence, ChangeOrchestrator};
use crate::domain::errors::StoreResult;
use crate::domain::repositories::ProductStore;
use crate::infrastructure::config::ScheduleConfig;
use crate::infrastructure::config::defaults::MAX_INTERVAL_MINUTES;

/// Settings key holding the availability interval in minutes
pub const AVAILABILITY_INTERVAL_KEY: &str = "availability_interval_minutes";
/// Settings key holding the price interval in minutes
pub const PRICE_INTERVAL_KEY: &str = "price_interval_minutes";

impl Cadence {
    /// Settings key that persists this cadence's interval
    pub const fn setting_key(self) -> &'static str {
        match self {
            Self::Availability => AVAILABILITY_INTERVAL_KEY,
            Self::Price => PRICE_INTERVAL_KEY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Running,
    Paused,
}

/// Current configuration of one timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerSettings {
    pub interval: Duration,
    pub state: TimerState,
}

impl TimerSettings {
    /// Running at the given interval; zero minutes means paused
    pub const fn from_minutes(minutes: u64) -> Self {
        Self {
            interval: Duration::from_secs(minutes.saturating_mul(60)),
            state: if minutes == 0 {
                TimerState::Paused
            } else {
                TimerState::Running
            },
        }
    }

    pub const fn minutes(&self) -> u64 {
        self.interval.as_secs() / 60
    }

    pub fn is_running(&self) -> bool {
        self.state == TimerState::Running && !self.interval.is_zero()
    }
}

/// Parse a persisted interval, ignoring garbage and out-of-range values
fn parse_minutes(key: &str, raw: &str) -> Option<u64> {
    match raw.trim().parse::<u64>() {
        Ok(minutes) if minutes <= MAX_INTERVAL_MINUTES => Some(minutes),
        Ok(minutes) => {
            warn!(key, minutes, max = MAX_INTERVAL_MINUTES, "Ignoring oversized interval setting");
            None
        }
        Err(_) => {
            warn!(key, value = raw, "Ignoring invalid interval setting");
            None
        }
    }
}

struct Timer {
    cadence: Cadence,
    sender: watch::Sender<TimerSettings>,
    /// Last persisted value applied, so polling only reacts to changes
    persisted: Mutex<Option<u64>>,
}

impl Timer {
    fn new(cadence: Cadence, minutes: u64) -> Self {
        let (sender, _) = watch::channel(TimerSettings::from_minutes(minutes));
        Self {
            cadence,
            sender,
            persisted: Mutex::new(None),
        }
    }

    fn apply(&self, settings: TimerSettings) {
        self.sender.send_if_modified(|current| {
            if *current == settings {
                false
            } else {
                info!(
                    cadence = %self.cadence,
                    minutes = settings.minutes(),
                    state = ?settings.state,
                    "Timer reconfigured"
                );
                *current = settings;
                true
            }
        });
    }

    /// Apply a persisted value if it changed since the last poll
    fn apply_persisted(&self, minutes: u64) {
        let mut persisted = match self.persisted.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *persisted != Some(minutes) {
            *persisted = Some(minutes);
            self.apply(TimerSettings::from_minutes(minutes));
        }
    }
}

/// Owns the availability and price timers
pub struct CheckScheduler {
    orchestrator: Arc<ChangeOrchestrator>,
    store: Arc<dyn ProductStore>,
    availability: Arc<Timer>,
    price: Arc<Timer>,
    settings_poll: Duration,
    run_on_startup: bool,
    cancel: CancellationToken,
    tasks: tokio::sync::Mutex<JoinSet<()>>,
}

impl CheckScheduler {
    pub fn new(
        orchestrator: Arc<ChangeOrchestrator>,
        config: &ScheduleConfig,
        cancel: CancellationToken,
    ) -> Self {
        let store = Arc::clone(orchestrator.store());
        Self {
            orchestrator,
            store,
            availability: Arc::new(Timer::new(
                Cadence::Availability,
                config.availability_interval_minutes,
            )),
            price: Arc::new(Timer::new(Cadence::Price, config.price_interval_minutes)),
            settings_poll: config.settings_poll_interval(),
            run_on_startup: config.run_on_startup,
            cancel,
            tasks: tokio::sync::Mutex::new(JoinSet::new()),
        }
    }

    fn timer(&self, cadence: Cadence) -> &Arc<Timer> {
        match cadence {
            Cadence::Availability => &self.availability,
            Cadence::Price => &self.price,
        }
    }

    /// Current settings of one timer
    pub fn settings(&self, cadence: Cadence) -> TimerSettings {
        *self.timer(cadence).sender.borrow()
    }

    /// Change an interval and persist it. Zero pauses the cadence;
    /// values above the maximum are clamped.
    pub async fn set_interval(&self, cadence: Cadence, minutes: u64) -> StoreResult<()> {
        let minutes = minutes.min(MAX_INTERVAL_MINUTES);
        self.store
            .set_setting(cadence.setting_key(), &minutes.to_string())
            .await?;
        self.timer(cadence).apply_persisted(minutes);
        Ok(())
    }

    /// Stop a timer without touching its interval
    pub fn pause(&self, cadence: Cadence) {
        let timer = self.timer(cadence);
        let current = *timer.sender.borrow();
        timer.apply(TimerSettings {
            state: TimerState::Paused,
            ..current
        });
    }

    /// Restart a paused timer. A zero interval stays paused.
    pub fn resume(&self, cadence: Cadence) {
        let timer = self.timer(cadence);
        let current = *timer.sender.borrow();
        if current.interval.is_zero() {
            warn!(%cadence, "Cannot resume a timer with a zero interval");
            return;
        }
        timer.apply(TimerSettings {
            state: TimerState::Running,
            ..current
        });
    }

    /// Read persisted intervals from the store and apply any that changed
    pub async fn refresh_settings(&self) -> StoreResult<()> {
        for timer in [&self.availability, &self.price] {
            let key = timer.cadence.setting_key();
            if let Some(minutes) = self
                .store
                .get_setting(key)
                .await?
                .and_then(|raw| parse_minutes(key, &raw))
            {
                timer.apply_persisted(minutes);
            }
        }
        Ok(())
    }

    /// Spawn the timer tasks and the settings watcher
    pub async fn start(&self) -> StoreResult<()> {
        self.refresh_settings().await?;

        let mut tasks = self.tasks.lock().await;
        for (timer, run_first) in [
            (&self.availability, self.run_on_startup),
            (&self.price, false),
        ] {
            tasks.spawn(run_timer(
                Arc::clone(&self.orchestrator),
                timer.cadence,
                timer.sender.subscribe(),
                self.cancel.clone(),
                run_first,
            ));
        }

        tasks.spawn(watch_settings(
            Arc::clone(&self.store),
            [Arc::clone(&self.availability), Arc::clone(&self.price)],
            self.settings_poll,
            self.cancel.clone(),
        ));

        info!(
            availability = ?self.settings(Cadence::Availability),
            price = ?self.settings(Cadence::Price),
            "Scheduler started"
        );
        Ok(())
    }

    /// Cancel every task and wait for them to finish
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let mut tasks = self.tasks.lock().await;
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!("Scheduler task ended abnormally: {}", e);
            }
        }
        info!("Scheduler stopped");
    }
}

async fn run_cycle_logged(orchestrator: &ChangeOrchestrator, cadence: Cadence, cancel: &CancellationToken) {
    if let Err(e) = orchestrator.run_cycle(cadence, cancel).await {
        error!(%cadence, error = %e, "Check cycle failed");
    }
}

async fn run_timer(
    orchestrator: Arc<ChangeOrchestrator>,
    cadence: Cadence,
    mut settings: watch::Receiver<TimerSettings>,
    cancel: CancellationToken,
    run_first: bool,
) {
    if run_first && settings.borrow().is_running() {
        run_cycle_logged(&orchestrator, cadence, &cancel).await;
    }

    loop {
        let current = *settings.borrow_and_update();

        if !current.is_running() {
            debug!(%cadence, "Timer paused");
            tokio::select! {
                changed = settings.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                () = cancel.cancelled() => break,
            }
        }

        tokio::select! {
            () = tokio::time::sleep(current.interval) => {
                run_cycle_logged(&orchestrator, cadence, &cancel).await;
            }
            changed = settings.changed() => {
                // New settings restart the wait from zero
                if changed.is_err() {
                    break;
                }
            }
            () = cancel.cancelled() => break,
        }
    }

    debug!(%cadence, "Timer task exiting");
}

async fn watch_settings(
    store: Arc<dyn ProductStore>,
    timers: [Arc<Timer>; 2],
    poll: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(poll);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately and start() already refreshed
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            () = cancel.cancelled() => break,
        }

        for timer in &timers {
            let key = timer.cadence.setting_key();
            match store.get_setting(key).await {
                Ok(Some(raw)) => {
                    if let Some(minutes) = parse_minutes(key, &raw) {
                        timer.apply_persisted(minutes);
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(key, error = %e, "Failed to read interval setting"),
            }
        }
    }
}
