use std::sync::{Arc, Mutex, PoisonError};

use chrono::{Duration as ChronoDuration, NaiveDateTime};
use nightfall_core::{GovernorEventArgs, GovernorKind, SwitchEventArgs, SwitchSource, Theme};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{Governor, GovernorContext};
use crate::interfaces::NightLightSource;

struct TrackerState {
    tracked: Theme,
    last_query: NaiveDateTime,
    /// A flip arrived while a skip-next postpone was active. The next flip
    /// consumes the postpone instead of being held back.
    queue_postpone_remove: bool,
    init: bool,
}

/// Night light signal shared between the governor and its poll task.
struct Tracker {
    ctx: GovernorContext,
    source: Arc<dyn NightLightSource>,
    state: Mutex<TrackerState>,
}

impl Tracker {
    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reads the source and records a flip.
    ///
    /// While a skip-next-switch postpone is active the first flip is only
    /// remembered; the following flip removes the postpone and lets the
    /// governor fire.
    fn update(&self) {
        let enabled = match self.source.is_enabled() {
            Ok(enabled) => enabled,
            Err(e) => {
                tracing::error!("Could not read night light state: {e}");
                return;
            }
        };
        let theme = if enabled { Theme::Dark } else { Theme::Light };
        let postpone = self.ctx.state.postpone();

        let remove_skip = {
            let mut s = self.lock();
            if s.tracked == theme {
                return;
            }
            let now = self.ctx.clock.now();
            s.last_query = if s.init { now - ChronoDuration::hours(24) } else { now };
            s.tracked = theme;
            tracing::info!("Night light enabled changed to {enabled}");

            let skip_next = postpone.is_skip_next_switch();
            match (skip_next, s.queue_postpone_remove) {
                (true, false) => {
                    s.queue_postpone_remove = true;
                    self.ctx.state.set_governor_report(GovernorKind::NightLight, theme);
                    return;
                }
                (true, true) => {
                    s.queue_postpone_remove = false;
                    true
                }
                (false, true) => {
                    s.queue_postpone_remove = false;
                    false
                }
                (false, false) => false,
            }
        };

        if remove_skip {
            postpone.remove_skip_next_switch();
        }
        self.ctx.fire.fire();
    }
}

/// Follows the OS night light toggle.
pub struct NightLightGovernor {
    tracker: Arc<Tracker>,
    poll: Option<(CancellationToken, JoinHandle<()>)>,
}

impl NightLightGovernor {
    pub fn new(ctx: GovernorContext, source: Arc<dyn NightLightSource>) -> Self {
        let now = ctx.clock.now();
        Self {
            tracker: Arc::new(Tracker {
                ctx,
                source,
                state: Mutex::new(TrackerState {
                    tracked: Theme::Unknown,
                    last_query: now,
                    queue_postpone_remove: false,
                    init: true,
                }),
            }),
            poll: None,
        }
    }

    /// Polls the source once. The background task calls this every short
    /// timer interval.
    pub fn update_state(&self) {
        self.tracker.update();
    }

    fn start_polling(&mut self) {
        let token = CancellationToken::new();
        let tracker = self.tracker.clone();
        let child = token.clone();
        let interval = tracker.ctx.config.snapshot().timers.short();
        let join = tracker.ctx.handle.clone().spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => {
                        let t = tracker.clone();
                        if let Err(e) = tokio::task::spawn_blocking(move || t.update()).await {
                            tracing::error!("Night light poll panicked: {e}");
                        }
                    }
                }
            }
        });
        self.poll = Some((token, join));
    }
}

impl Governor for NightLightGovernor {
    fn kind(&self) -> GovernorKind {
        GovernorKind::NightLight
    }

    fn enable_hook(&mut self) {
        tracing::info!("Night light governor selected");
        self.tracker.update();
        if self.poll.is_none() {
            self.start_polling();
        }
    }

    fn disable_hook(&mut self) {
        if let Some((token, join)) = self.poll.take() {
            token.cancel();
            join.abort();
        }
    }

    fn run(&mut self) -> GovernorEventArgs {
        let ctx = &self.tracker.ctx;
        let config = ctx.config.snapshot();
        let now = ctx.clock.now();
        let mut s = self.tracker.lock();

        let offset = match s.tracked {
            Theme::Dark => config.location.sunset_offset_min,
            _ => config.location.sunrise_offset_min,
        };
        let adjusted = s.last_query + ChronoDuration::minutes(offset as i64);

        // A flip whose offset has not elapsed yet still reports the old side.
        let report = if adjusted > now && !s.init {
            s.tracked.opposite()
        } else {
            s.tracked
        };
        ctx.state.set_governor_report(GovernorKind::NightLight, report);

        let window = ChronoDuration::from_std(config.timers.main()).unwrap_or_default();
        let in_window = !s.init && (now - adjusted).abs() <= window;

        if in_window
            && report != ctx.state.requested_theme()
            && !ctx.state.theme_switch_approaching()
            && ctx.notify_switch_approaching(&config, report, Some(adjusted))
        {
            return GovernorEventArgs::window(true);
        }

        if ctx.state.postpone().is_postponed() && !s.init {
            return GovernorEventArgs::window(in_window);
        }
        s.init = false;
        GovernorEventArgs::with_event(
            in_window,
            SwitchEventArgs::new(SwitchSource::NightLightTrackerModule, report).with_switch_time(adjusted),
        )
    }
}

impl Drop for NightLightGovernor {
    fn drop(&mut self) {
        self.disable_hook();
    }
}
