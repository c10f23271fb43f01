use chrono::Duration as ChronoDuration;
use nightfall_core::{GovernorEventArgs, GovernorKind, SwitchEventArgs, SwitchSource};

use super::{Governor, GovernorContext};
use crate::sun::TimedThemeState;

/// Switches at sunrise and sunset, configured or derived from a location.
pub struct TimeSwitchGovernor {
    ctx: GovernorContext,
    /// Cold-start guard: no switch window is reported until the first
    /// switch request went out.
    init: bool,
}

impl TimeSwitchGovernor {
    pub fn new(ctx: GovernorContext) -> Self {
        Self { ctx, init: true }
    }
}

impl Governor for TimeSwitchGovernor {
    fn kind(&self) -> GovernorKind {
        GovernorKind::Default
    }

    fn enable_hook(&mut self) {
        self.init = true;
        tracing::info!("Time switch governor selected");
    }

    fn disable_hook(&mut self) {}

    fn run(&mut self) -> GovernorEventArgs {
        let config = self.ctx.config.snapshot();
        let now = self.ctx.clock.now();
        let ts = TimedThemeState::compute(&config, now);

        let window_start = ts.next_switch - ChronoDuration::from_std(config.timers.main()).unwrap_or_default();
        let in_window = !self.init && window_start <= now && now < ts.next_switch;

        if in_window
            && !self.ctx.state.theme_switch_approaching()
            && self
                .ctx
                .notify_switch_approaching(&config, ts.target.opposite(), Some(ts.next_switch))
        {
            return GovernorEventArgs::window(true);
        }

        if self.ctx.state.postpone().is_postponed() {
            return GovernorEventArgs::window(in_window);
        }
        self.init = false;
        GovernorEventArgs::with_event(in_window, SwitchEventArgs::automatic(SwitchSource::TimeSwitchModule))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::GovernorHarness;
    use crate::postpone::{PostponeItem, SESSION_LOCK};
    use chrono::{NaiveDate, NaiveDateTime};
    use nightfall_core::{AppConfig, Theme};

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn notifying() -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.auto_switch_notify.enabled = true;
        cfg
    }

    #[tokio::test]
    async fn first_run_requests_without_window() {
        let h = GovernorHarness::new(notifying());
        h.clock.set(at(18, 59));
        let mut gov = TimeSwitchGovernor::new(h.ctx.clone());
        gov.enable_hook();

        let result = gov.run();
        assert!(!result.in_switch_window);
        let e = result.switch_event.unwrap();
        assert_eq!(e.source(), SwitchSource::TimeSwitchModule);
        assert_eq!(e.requested_theme(), Theme::Automatic);
        assert!(h.notifier.notices().is_empty());
    }

    #[tokio::test]
    async fn window_before_sunset_notifies_until_approaching() {
        let h = GovernorHarness::new(notifying());
        h.clock.set(at(12, 0));
        let mut gov = TimeSwitchGovernor::new(h.ctx.clone());
        gov.run();

        h.clock.set(at(18, 59));
        let result = gov.run();
        assert!(result.in_switch_window);
        assert!(result.switch_event.is_none());
        assert_eq!(h.notifier.notices(), vec![(Theme::Dark, Some(at(19, 0)))]);

        h.ctx.state.set_theme_switch_approaching(true);
        let result = gov.run();
        assert!(result.in_switch_window);
        assert!(result.switch_event.is_some());
        assert_eq!(h.notifier.notices().len(), 1);

        h.clock.set(at(19, 0));
        assert!(!gov.run().in_switch_window);
    }

    #[tokio::test]
    async fn postponed_run_reports_no_event() {
        let h = GovernorHarness::new(AppConfig::default());
        h.clock.set(at(12, 0));
        h.ctx.state.postpone().add("test", None);
        let mut gov = TimeSwitchGovernor::new(h.ctx.clone());
        let result = gov.run();
        assert!(result.switch_event.is_none());
        assert!(!result.in_switch_window);
    }

    #[tokio::test]
    async fn session_lock_suppresses_notification() {
        let h = GovernorHarness::new(notifying());
        h.clock.set(at(12, 0));
        let mut gov = TimeSwitchGovernor::new(h.ctx.clone());
        gov.run();

        h.ctx.state.postpone().add_item(PostponeItem::system(SESSION_LOCK));
        h.clock.set(at(18, 59));
        let result = gov.run();
        assert!(result.in_switch_window);
        assert!(result.switch_event.is_none());
        assert!(h.notifier.notices().is_empty());
    }
}
