use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use nightfall_core::GovernorKind;

use super::{Module, TimerName};
use crate::governor::{self, Governor, GovernorContext};
use crate::theme_manager::ThemeManager;

pub const GOVERNOR_MODULE: &str = "governor";

/// The configured governor kind and the governor actually running for it.
/// They differ when a governor fell back to the time governor.
type ActiveGovernor = Option<(GovernorKind, Box<dyn Governor>)>;

/// Owns the active governor and forwards its requests to the scheduler.
pub struct GovernorModule {
    ctx: GovernorContext,
    theme_manager: Arc<ThemeManager>,
    active: Mutex<ActiveGovernor>,
}

impl GovernorModule {
    pub fn new(ctx: GovernorContext, theme_manager: Arc<ThemeManager>) -> Self {
        Self {
            ctx,
            theme_manager,
            active: Mutex::new(None),
        }
    }

    /// Swaps the active governor if `kind` differs from the current one.
    pub fn auto_manage(&self, kind: GovernorKind) {
        let mut active = self.lock();
        self.ensure(&mut active, kind);
    }

    pub fn active_kind(&self) -> Option<GovernorKind> {
        self.lock().as_ref().map(|(kind, _)| *kind)
    }

    /// Lets the active governor re-apply its last reading, e.g. after
    /// thresholds changed.
    pub fn reevaluate(&self) {
        if let Some((_, governor)) = self.lock().as_mut() {
            governor.reevaluate_with_current_config();
        }
    }

    fn ensure<'a>(&self, active: &'a mut ActiveGovernor, kind: GovernorKind) -> &'a mut Box<dyn Governor> {
        if active.as_ref().is_some_and(|(current, _)| *current != kind) {
            if let Some((old, mut governor)) = active.take() {
                tracing::debug!("Disabling {old} governor");
                governor.disable_hook();
            }
        }
        let (_, governor) = active.get_or_insert_with(|| {
            self.ctx.state.set_theme_switch_approaching(false);
            let mut governor = governor::build(kind, &self.ctx);
            governor.enable_hook();
            (kind, governor)
        });
        governor
    }

    fn lock(&self) -> MutexGuard<'_, ActiveGovernor> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Module for GovernorModule {
    fn name(&self) -> &str {
        GOVERNOR_MODULE
    }

    fn timer_affinity(&self) -> TimerName {
        TimerName::Main
    }

    fn priority(&self) -> i32 {
        1
    }

    fn fire_on_registration(&self) -> bool {
        true
    }

    fn fire(&self) {
        let kind = self.ctx.config.snapshot().governor;
        let result = {
            let mut active = self.lock();
            self.ensure(&mut active, kind).run()
        };

        let state = &self.ctx.state;
        if result.in_switch_window && !state.theme_switch_approaching() {
            tracing::debug!("Theme switch window is approaching");
            state.set_theme_switch_approaching(true);
        } else if let Some(e) = result.switch_event {
            self.theme_manager.request_switch(e);
        }
        if !result.in_switch_window && state.theme_switch_approaching() {
            tracing::debug!("Theme switch window has passed");
            state.set_theme_switch_approaching(false);
        }
    }

    fn disable_hook(&self) {
        if let Some((kind, mut governor)) = self.lock().take() {
            tracing::debug!("Disabling {kind} governor");
            governor.disable_hook();
        }
        self.ctx.state.set_theme_switch_approaching(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentKind;
    use crate::mock::GovernorHarness;
    use chrono::{NaiveDate, NaiveDateTime};
    use nightfall_core::AppConfig;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn config() -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.components.apps.enabled = true;
        cfg.auto_switch_notify.enabled = true;
        cfg
    }

    #[tokio::test]
    async fn fire_builds_governor_and_switches() {
        let h = GovernorHarness::new(config());
        let (tm, doubles) = h.scheduler();
        let module = GovernorModule::new(h.ctx.clone(), tm);

        module.fire();
        assert_eq!(module.active_kind(), Some(GovernorKind::Default));
        assert_eq!(doubles.aspects.value(ComponentKind::Apps).as_deref(), Some("light"));
    }

    #[tokio::test]
    async fn window_holds_the_switch_once_then_clears() {
        let h = GovernorHarness::new(config());
        let (tm, doubles) = h.scheduler();
        let module = GovernorModule::new(h.ctx.clone(), tm);
        module.fire();

        h.clock.set(at(18, 59));
        module.fire();
        assert!(h.ctx.state.theme_switch_approaching());
        assert_eq!(h.notifier.notices().len(), 1);

        module.fire();
        assert!(h.ctx.state.theme_switch_approaching());
        assert_eq!(doubles.aspects.value(ComponentKind::Apps).as_deref(), Some("light"));

        h.clock.set(at(19, 0));
        module.fire();
        assert!(!h.ctx.state.theme_switch_approaching());
        assert_eq!(doubles.aspects.value(ComponentKind::Apps).as_deref(), Some("dark"));
    }

    #[tokio::test]
    async fn auto_manage_swaps_only_on_change() {
        let h = GovernorHarness::new(config());
        let (tm, _doubles) = h.scheduler();
        let module = GovernorModule::new(h.ctx.clone(), tm);

        module.auto_manage(GovernorKind::Default);
        h.ctx.state.set_theme_switch_approaching(true);
        module.auto_manage(GovernorKind::Default);
        assert!(h.ctx.state.theme_switch_approaching());

        // No sensor is wired, so the time governor stands in.
        module.auto_manage(GovernorKind::AmbientLight);
        assert_eq!(module.active_kind(), Some(GovernorKind::AmbientLight));
        assert!(!h.ctx.state.theme_switch_approaching());

        module.disable_hook();
        assert_eq!(module.active_kind(), None);
    }
}
