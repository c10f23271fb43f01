//! Resolves switch requests to a theme and applies it.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{Duration as ChronoDuration, NaiveDateTime};
use nightfall_core::{AppConfig, Clock, GovernorKind, SwitchEventArgs, SwitchSource, Theme};

use crate::component::{ComponentManager, SwitchOutcome};
use crate::config_store::ConfigStore;
use crate::interfaces::{PowerBackend, StateStore, ThemeBackend};
use crate::postpone::SkipType;
use crate::state::GlobalState;
use crate::sun::{next_occurrence, TimedThemeState};

/// The top-level scheduler.
///
/// Every request goes through [`ThemeManager::request_switch`], which
/// applies the override order and hands one concrete theme to
/// [`ThemeManager::update_theme`]. Updates are serialized.
pub struct ThemeManager {
    state: Arc<GlobalState>,
    config: Arc<ConfigStore>,
    components: Arc<ComponentManager>,
    theme_backend: Arc<dyn ThemeBackend>,
    power: Arc<dyn PowerBackend>,
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    switch_lock: Mutex<()>,
}

impl ThemeManager {
    pub fn new(
        state: Arc<GlobalState>,
        config: Arc<ConfigStore>,
        components: Arc<ComponentManager>,
        theme_backend: Arc<dyn ThemeBackend>,
        power: Arc<dyn PowerBackend>,
        store: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            state,
            config,
            components,
            theme_backend,
            power,
            store,
            clock,
            switch_lock: Mutex::new(()),
        }
    }

    pub fn state(&self) -> &Arc<GlobalState> {
        &self.state
    }

    pub fn components(&self) -> &Arc<ComponentManager> {
        &self.components
    }

    /// Resolves `e` against the current configuration and applies the
    /// result. Returns the theme that was handed to `update_theme`, if any.
    pub fn request_switch(&self, e: SwitchEventArgs) -> Option<Theme> {
        let config = self.config.snapshot();
        let theme = self.resolve(&config, &e)?;
        let mut e = e.with_theme(theme);
        if config.auto_theme_switching_enabled
            && config.governor == GovernorKind::Default
            && e.switch_time().is_none()
        {
            let ts = TimedThemeState::compute(&config, self.clock.now());
            if ts.target == theme {
                e = e.with_switch_time(ts.current_switch);
            }
        }
        self.update_theme(&config, theme, &e);
        Some(theme)
    }

    /// Override order: forced theme, battery, user postpone, explicit
    /// theme in the request, the active governor, then the last request.
    fn resolve(&self, config: &AppConfig, e: &SwitchEventArgs) -> Option<Theme> {
        let forced = self.state.forced_theme();
        if forced.is_concrete() {
            return Some(forced);
        }

        if config.events.dark_theme_on_battery {
            match self.power.battery_discharging() {
                Ok(true) => return Some(Theme::Dark),
                Ok(false) if !config.auto_theme_switching_enabled => return Some(Theme::Light),
                Ok(false) => {}
                Err(err) => tracing::warn!("Could not read battery status: {err}"),
            }
        }

        let postpone = self.state.postpone();
        if postpone.is_user_delayed() || postpone.is_skip_next_switch() {
            return concrete(self.state.requested_theme());
        }

        let requested = e.requested_theme();
        if requested.is_concrete() && e.source() != SwitchSource::NightLightTrackerModule {
            return Some(requested);
        }

        if !config.auto_theme_switching_enabled {
            return concrete(self.state.requested_theme());
        }

        let timed = || TimedThemeState::compute(config, self.clock.now()).target;
        match config.governor {
            GovernorKind::Default => Some(timed()),
            kind => {
                if requested.is_concrete() {
                    return Some(requested);
                }
                // A governor without a report yet, or one that fell back to
                // the time governor, follows the sun.
                Some(concrete(self.state.governor_report(kind)).unwrap_or_else(timed))
            }
        }
    }

    /// Applies `theme`. Returns whether anything changed.
    ///
    /// Nothing is written or logged when neither the base theme nor any
    /// component needed an update, unless the request comes from an unlock.
    pub fn update_theme(&self, config: &AppConfig, theme: Theme, e: &SwitchEventArgs) -> bool {
        let _guard = self.switch_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.state.set_requested_theme(theme);

        let unlock = e.source() == SwitchSource::SystemUnlock;
        let mut base_applied = false;
        if config.theme_mode.enabled {
            match self.theme_backend.apply_theme(config, theme, unlock) {
                Ok(changed) => base_applied = changed,
                Err(err) => tracing::error!("Could not apply {theme} theme: {err}"),
            }
        }

        let kinds = self.components.get_components_to_update(theme);
        let mut energy_saver_disabled = false;
        if !kinds.is_empty() {
            if config.tunable.disable_energy_saver_on_switch {
                match self.power.disable_energy_saver() {
                    Ok(disabled) => energy_saver_disabled = disabled,
                    Err(err) => tracing::warn!("Could not disable energy saver: {err}"),
                }
            }
            let outcomes = self.components.run(&kinds, theme, e);
            let failed = outcomes
                .iter()
                .filter(|(_, outcome)| *outcome == SwitchOutcome::Failed)
                .count();
            if failed > 0 {
                tracing::warn!("{failed} of {} components failed to switch to {theme}", outcomes.len());
            }
            if !config.theme_mode.enabled {
                if let Err(err) = self.theme_backend.save_managed_theme(theme) {
                    tracing::error!("Could not save managed theme: {err}");
                }
            }
        }

        let changed = base_applied || !kinds.is_empty();
        if changed || unlock {
            log_switch(theme, e);
        }
        if base_applied {
            self.learn_theme_name(theme);
        }
        if energy_saver_disabled {
            if let Err(err) = self.power.restore_energy_saver() {
                tracing::warn!("Could not restore energy saver: {err}");
            }
        }
        changed
    }

    /// Switches manually and pauses automatic switching until the next
    /// natural transition if the manual theme contradicts the governor.
    ///
    /// With a non-concrete `target` the last requested theme is swapped.
    pub fn switch_theme_auto_pause(&self, target: Theme, source: SwitchSource) -> Theme {
        let config = self.config.snapshot();
        let theme = if target.is_concrete() {
            target
        } else if self.state.requested_theme() == Theme::Light {
            Theme::Dark
        } else {
            Theme::Light
        };
        self.state.set_requested_theme(theme);

        if config.auto_theme_switching_enabled {
            let postpone = self.state.postpone();
            let wanted = match config.governor {
                GovernorKind::Default => TimedThemeState::compute(&config, self.clock.now()).target,
                kind => self.state.governor_report(kind),
            };
            let delayed = postpone.is_user_delayed();
            if wanted == theme {
                // A user delay only outlives a matching manual switch on
                // signal driven governors.
                if config.governor == GovernorKind::Default || !delayed {
                    postpone.remove_user_clearable();
                }
            } else if !delayed {
                let (expiry, skip_type) = self.skip_next_switch_expiry(&config, theme);
                if postpone.is_skip_next_switch() {
                    postpone.update_skip_next_switch_expiry(expiry, skip_type);
                } else {
                    postpone.add_skip_next_switch(expiry, skip_type);
                }
            }
        }

        self.request_switch(SwitchEventArgs::new(source, theme));
        theme
    }

    /// When a skip-next-switch pause for `theme` should end.
    ///
    /// The time governor pauses until the next adjusted sun event plus one
    /// second. If `theme` already matches the schedule the pause runs
    /// through the following transition too. Other governors pause without
    /// an expiry until their signal flips.
    pub fn skip_next_switch_expiry(&self, config: &AppConfig, theme: Theme) -> (Option<NaiveDateTime>, SkipType) {
        if config.governor != GovernorKind::Default {
            let skip_type = match self.state.governor_report(config.governor) {
                Theme::Light => SkipType::UntilSunrise,
                _ => SkipType::UntilSunset,
            };
            return (None, skip_type);
        }

        let now = self.clock.now();
        let ts = TimedThemeState::compute(config, now);
        let (at, skip_type) = if ts.target == theme {
            match ts.target {
                Theme::Light => (next_occurrence(now, ts.sunrise), SkipType::UntilSunrise),
                _ => (next_occurrence(now, ts.sunset), SkipType::UntilSunset),
            }
        } else {
            let skip_type = match ts.target {
                Theme::Light => SkipType::UntilSunset,
                _ => SkipType::UntilSunrise,
            };
            (ts.next_switch, skip_type)
        };
        (Some(at + ChronoDuration::seconds(1)), skip_type)
    }

    /// Recomputes the expiry of an active skip item, e.g. after the sun
    /// times changed.
    pub fn refresh_skip_next_expiry(&self) {
        let postpone = self.state.postpone();
        let Some(item) = postpone.skip_next_switch_item() else {
            return;
        };
        let config = self.config.snapshot();
        let (expiry, skip_type) = self.skip_next_switch_expiry(&config, self.state.requested_theme());
        if config.governor == GovernorKind::Default || item.expiry.is_some() {
            postpone.update_skip_next_switch_expiry(expiry, skip_type);
        }
    }

    fn learn_theme_name(&self, theme: Theme) {
        let name = match self.theme_backend.current_theme_name() {
            Ok(name) => name,
            Err(err) => {
                tracing::warn!("Could not read current theme name: {err}");
                return;
            }
        };
        if self.state.learn_theme_name(theme, &name) {
            tracing::debug!("Learned {theme} theme name {name}");
            if let Err(err) = self.store.save_learned_names(&self.state.learned_theme_names()) {
                tracing::error!("Could not save learned theme names: {err}");
            }
        }
    }
}

fn concrete(theme: Theme) -> Option<Theme> {
    theme.is_concrete().then_some(theme)
}

fn log_switch(theme: Theme, e: &SwitchEventArgs) {
    let source = e.source();
    let edge = if theme == Theme::Light { "sunrise" } else { "sunset" };
    match (source, e.switch_time()) {
        (SwitchSource::SystemUnlock, _) => {
            tracing::info!("Refreshed {theme} theme, source: {source}");
        }
        (SwitchSource::TimeSwitchModule | SwitchSource::NightLightTrackerModule, Some(at)) => {
            tracing::info!("{theme} theme switch performed, source: {source}, {edge}: {at}");
        }
        _ => tracing::info!("{theme} theme switch performed, source: {source}"),
    }
}
