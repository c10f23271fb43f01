use std::sync::{Arc, Mutex, PoisonError};

use nightfall_core::{GovernorEventArgs, GovernorKind, SwitchEventArgs, SwitchSource, Theme};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{Governor, GovernorContext};
use crate::interfaces::LightSensor;

struct PendingChange {
    theme: Theme,
    token: CancellationToken,
}

struct AmbientState {
    current: Theme,
    pending: Option<PendingChange>,
    /// Bumped whenever a pending change is replaced so a stale debounce
    /// task cannot commit.
    generation: u64,
}

impl AmbientState {
    fn cancel_pending(&mut self) -> Option<Theme> {
        let pending = self.pending.take()?;
        pending.token.cancel();
        self.generation += 1;
        Some(pending.theme)
    }
}

struct Shared {
    ctx: GovernorContext,
    sensor: Arc<dyn LightSensor>,
    state: Mutex<AmbientState>,
}

impl Shared {
    fn lock(&self) -> std::sync::MutexGuard<'_, AmbientState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Which side of the hysteresis band `lux` falls on, if any.
    fn side(&self, lux: f64) -> Option<Theme> {
        let config = self.ctx.config.snapshot();
        if lux <= config.ambient_light.dark_threshold {
            Some(Theme::Dark)
        } else if lux >= config.ambient_light.light_threshold {
            Some(Theme::Light)
        } else {
            None
        }
    }

    fn evaluate(self: &Arc<Self>, lux: f64) {
        self.ctx.state.set_last_lux(lux);
        let Some(side) = self.side(lux) else {
            return;
        };
        let mut state = self.lock();
        if side == state.current {
            if let Some(theme) = state.cancel_pending() {
                tracing::debug!("Ambient light back at {lux:.1} lux, dropping pending switch to {theme}");
            }
            return;
        }
        if state.pending.as_ref().is_some_and(|p| p.theme == side) {
            return;
        }
        state.cancel_pending();
        let token = CancellationToken::new();
        let generation = state.generation;
        state.pending = Some(PendingChange {
            theme: side,
            token: token.clone(),
        });
        drop(state);

        let debounce = self.ctx.config.snapshot().ambient_light.debounce();
        tracing::debug!("Ambient light at {lux:.1} lux, switching to {side} in {}s", debounce.as_secs());
        let shared = self.clone();
        self.ctx.handle.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(debounce) => shared.commit(side, generation),
            }
        });
    }

    fn commit(&self, theme: Theme, generation: u64) {
        {
            let mut state = self.lock();
            if state.generation != generation || state.pending.is_none() {
                return;
            }
            state.pending = None;
            state.current = theme;
        }
        self.ctx.state.set_governor_report(GovernorKind::AmbientLight, theme);
        tracing::info!("Ambient light settled, requesting {theme}");
        self.ctx.fire.fire();
    }

    fn read(&self) -> Option<f64> {
        match self.sensor.read_lux() {
            Ok(lux) => lux,
            Err(e) => {
                tracing::debug!("Could not read light sensor: {e}");
                None
            }
        }
    }
}

/// Maps illuminance to a theme with a hysteresis band and a debounce.
pub struct AmbientLightGovernor {
    shared: Arc<Shared>,
    poll: Option<(CancellationToken, JoinHandle<()>)>,
}

impl AmbientLightGovernor {
    pub fn new(ctx: GovernorContext, sensor: Arc<dyn LightSensor>) -> Self {
        Self {
            shared: Arc::new(Shared {
                ctx,
                sensor,
                state: Mutex::new(AmbientState {
                    current: Theme::Unknown,
                    pending: None,
                    generation: 0,
                }),
            }),
            poll: None,
        }
    }

    /// Feeds one sensor reading through the hysteresis and debounce logic.
    pub fn on_reading(&self, lux: f64) {
        self.shared.evaluate(lux);
    }

    pub fn current(&self) -> Theme {
        self.shared.lock().current
    }

    pub fn pending(&self) -> Option<Theme> {
        self.shared.lock().pending.as_ref().map(|p| p.theme)
    }

    fn start_polling(&mut self) {
        let shared = self.shared.clone();
        let token = CancellationToken::new();
        let child = token.clone();
        let interval = shared.ctx.config.snapshot().ambient_light.poll_interval();
        let join = shared.ctx.handle.clone().spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => {
                        let s = shared.clone();
                        let read = tokio::task::spawn_blocking(move || s.read()).await;
                        match read {
                            Ok(Some(lux)) => shared.evaluate(lux),
                            Ok(None) => {}
                            Err(e) => tracing::error!("Light sensor poll panicked: {e}"),
                        }
                    }
                }
            }
        });
        self.poll = Some((token, join));
    }
}

impl Governor for AmbientLightGovernor {
    fn kind(&self) -> GovernorKind {
        GovernorKind::AmbientLight
    }

    fn enable_hook(&mut self) {
        tracing::info!("Ambient light governor selected");
        if let Some(lux) = self.shared.read() {
            self.shared.ctx.state.set_last_lux(lux);
            // Inside the band there is no side yet; start light.
            let theme = self.shared.side(lux).unwrap_or(Theme::Light);
            self.shared.lock().current = theme;
            self.shared.ctx.state.set_governor_report(GovernorKind::AmbientLight, theme);
            tracing::info!("Light sensor reads {lux:.1} lux, starting with {theme}");
        } else {
            tracing::warn!("Light sensor has no initial reading");
        }
        if self.poll.is_none() {
            self.start_polling();
        }
    }

    fn disable_hook(&mut self) {
        self.shared.lock().cancel_pending();
        if let Some((token, join)) = self.poll.take() {
            token.cancel();
            join.abort();
        }
    }

    fn run(&mut self) -> GovernorEventArgs {
        let report = self.shared.ctx.state.governor_report(GovernorKind::AmbientLight);
        if self.shared.ctx.state.postpone().is_postponed() {
            return GovernorEventArgs::window(false);
        }
        GovernorEventArgs::with_event(
            false,
            SwitchEventArgs::new(SwitchSource::AmbientLightSensorModule, report),
        )
    }

    /// Applies the last reading under new thresholds without waiting for
    /// the debounce.
    fn reevaluate_with_current_config(&mut self) {
        let Some(lux) = self.shared.ctx.state.last_lux() else {
            return;
        };
        let side = self.shared.side(lux);
        let changed = {
            let mut state = self.shared.lock();
            state.cancel_pending();
            match side {
                Some(theme) if theme != state.current => {
                    state.current = theme;
                    Some(theme)
                }
                _ => None,
            }
        };
        if let Some(theme) = changed {
            self.shared.ctx.state.set_governor_report(GovernorKind::AmbientLight, theme);
            tracing::info!("Thresholds changed, {lux:.1} lux now means {theme}");
            self.shared.ctx.fire.fire();
        }
    }
}

impl Drop for AmbientLightGovernor {
    fn drop(&mut self) {
        self.disable_hook();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{GovernorHarness, ScriptedLightSensor};
    use nightfall_core::AppConfig;
    use std::time::Duration;

    struct Rig {
        h: GovernorHarness,
        sensor: Arc<ScriptedLightSensor>,
        gov: AmbientLightGovernor,
    }

    impl Rig {
        fn new(initial: f64) -> Self {
            let h = GovernorHarness::new(AppConfig::default());
            let sensor = Arc::new(ScriptedLightSensor::new(Some(initial)));
            let mut gov = AmbientLightGovernor::new(h.ctx.clone(), sensor.clone());
            gov.enable_hook();
            Self { h, sensor, gov }
        }

        /// The poll task keeps reading the sensor, so readings go through it.
        fn feed(&self, lux: f64) {
            self.sensor.set(Some(lux));
            self.gov.on_reading(lux);
        }

        fn fired(&mut self) -> usize {
            let mut n = 0;
            while self.h.fires.try_recv().is_ok() {
                n += 1;
            }
            n
        }
    }

    #[tokio::test(start_paused = true)]
    async fn initial_reading_sets_side() {
        let mut rig = Rig::new(5.0);
        assert_eq!(rig.gov.current(), Theme::Dark);
        let e = rig.gov.run().switch_event.unwrap();
        assert_eq!(e.requested_theme(), Theme::Dark);
        assert_eq!(rig.h.ctx.state.last_lux(), Some(5.0));

        assert_eq!(Rig::new(30.0).gov.current(), Theme::Light);
    }

    #[tokio::test(start_paused = true)]
    async fn crossing_commits_after_debounce() {
        let mut rig = Rig::new(100.0);
        rig.feed(3.0);
        assert_eq!(rig.gov.pending(), Some(Theme::Dark));
        assert_eq!(rig.gov.current(), Theme::Light);

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(rig.fired(), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(rig.gov.current(), Theme::Dark);
        assert_eq!(rig.gov.pending(), None);
        assert_eq!(
            rig.h.ctx.state.governor_report(GovernorKind::AmbientLight),
            Theme::Dark
        );
        assert_eq!(rig.fired(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn returning_reading_cancels_pending() {
        let mut rig = Rig::new(100.0);
        rig.feed(3.0);
        tokio::time::sleep(Duration::from_secs(4)).await;
        rig.feed(80.0);
        assert_eq!(rig.gov.pending(), None);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(rig.gov.current(), Theme::Light);
        assert_eq!(rig.fired(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn band_readings_change_nothing() {
        let mut rig = Rig::new(100.0);
        rig.feed(30.0);
        assert_eq!(rig.gov.pending(), None);

        rig.feed(3.0);
        rig.feed(30.0);
        assert_eq!(rig.gov.pending(), Some(Theme::Dark));
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(rig.gov.current(), Theme::Dark);
        assert_eq!(rig.fired(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn same_side_reschedule_keeps_original_deadline() {
        let mut rig = Rig::new(100.0);
        rig.feed(3.0);
        tokio::time::sleep(Duration::from_secs(6)).await;
        rig.feed(2.0);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(rig.gov.current(), Theme::Dark);
        assert_eq!(rig.fired(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn threshold_change_applies_immediately() {
        let mut rig = Rig::new(100.0);
        rig.feed(30.0);

        let mut cfg = AppConfig::default();
        cfg.ambient_light.dark_threshold = 40.0;
        cfg.ambient_light.light_threshold = 60.0;
        rig.h.ctx.config.replace(cfg);
        rig.gov.reevaluate_with_current_config();

        assert_eq!(rig.gov.current(), Theme::Dark);
        assert_eq!(rig.gov.pending(), None);
        assert_eq!(rig.fired(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn postponed_run_has_no_event() {
        let mut rig = Rig::new(100.0);
        rig.h.ctx.state.postpone().add("test", None);
        let result = rig.gov.run();
        assert!(result.switch_event.is_none());
        assert!(!result.in_switch_window);
    }
}
