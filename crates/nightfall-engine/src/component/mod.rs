//! Switchable appearance aspects and the manager that applies them.

pub mod manager;
pub mod script;
pub mod switches;

use std::fmt;

use nightfall_core::{AppConfig, ScriptConfig, SwitchEventArgs, Theme};

pub use manager::ComponentManager;
pub use script::{ProcessScriptRunner, ScriptSwitch};
pub use switches::{ColorFilterSwitch, ModeSwitch, PairedSwitch, WallpaperSwitch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    Apps,
    System,
    Wallpaper,
    Office,
    ColorFilter,
    Colorization,
    Cursor,
    Script,
    TouchKeyboard,
}

impl ComponentKind {
    pub const ALL: [ComponentKind; 9] = [
        ComponentKind::Apps,
        ComponentKind::System,
        ComponentKind::Wallpaper,
        ComponentKind::Office,
        ComponentKind::ColorFilter,
        ComponentKind::Colorization,
        ComponentKind::Cursor,
        ComponentKind::Script,
        ComponentKind::TouchKeyboard,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ComponentKind::Apps => "apps",
            ComponentKind::System => "system",
            ComponentKind::Wallpaper => "wallpaper",
            ComponentKind::Office => "office",
            ComponentKind::ColorFilter => "color_filter",
            ComponentKind::Colorization => "colorization",
            ComponentKind::Cursor => "cursor",
            ComponentKind::Script => "script",
            ComponentKind::TouchKeyboard => "touch_keyboard",
        }
    }

    /// Whether the aspect can still be switched while managed theme mode
    /// applies whole theme files.
    pub fn theme_handler_compatible(self) -> bool {
        matches!(
            self,
            ComponentKind::System
                | ComponentKind::Office
                | ComponentKind::ColorFilter
                | ComponentKind::Script
                | ComponentKind::TouchKeyboard
        )
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Settings every component shares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BaseSettings {
    pub enabled: bool,
    pub priority_to_light: i32,
    pub priority_to_dark: i32,
}

/// Configuration pushed into components on reload.
#[derive(Debug, Clone, Copy)]
pub enum SettingsSource<'a> {
    App(&'a AppConfig),
    Scripts(&'a ScriptConfig),
}

/// Variant-specific behaviour of a switch component.
///
/// The shared enable/disable sequencing lives in [`Component`].
pub trait ComponentHandler: Send {
    fn kind(&self) -> ComponentKind;

    fn theme_handler_compatible(&self) -> bool {
        self.kind().theme_handler_compatible()
    }

    /// Takes the settings relevant to this variant. Returns `None` when the
    /// source does not carry them.
    fn configure(&mut self, source: SettingsSource<'_>) -> Option<BaseSettings>;

    fn needs_update(&self, theme: Theme) -> bool;

    fn handle_switch(&mut self, theme: Theme, e: &SwitchEventArgs) -> anyhow::Result<()>;

    fn enable_hook(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn disable_hook(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchOutcome {
    Switched,
    /// Nothing to do for this theme.
    Skipped,
    /// The component was disabled and cleaned up.
    Disabled,
    Failed,
}

/// A component with the shared Uninitialized/Initialized state machine.
pub struct Component {
    handler: Box<dyn ComponentHandler>,
    settings: BaseSettings,
    initialized: bool,
    force_switch: bool,
}

impl Component {
    pub fn new(handler: Box<dyn ComponentHandler>) -> Self {
        Self {
            handler,
            settings: BaseSettings::default(),
            initialized: false,
            force_switch: false,
        }
    }

    pub fn kind(&self) -> ComponentKind {
        self.handler.kind()
    }

    pub fn settings(&self) -> BaseSettings {
        self.settings
    }

    pub fn enabled(&self) -> bool {
        self.settings.enabled
    }

    pub fn initialized(&self) -> bool {
        self.initialized
    }

    pub fn theme_handler_compatible(&self) -> bool {
        self.handler.theme_handler_compatible()
    }

    pub fn force_pending(&self) -> bool {
        self.force_switch
    }

    pub fn set_force(&mut self) {
        self.force_switch = true;
    }

    /// Lower values run first.
    pub fn priority_for(&self, theme: Theme) -> i32 {
        match theme {
            Theme::Dark => self.settings.priority_to_dark,
            _ => self.settings.priority_to_light,
        }
    }

    pub fn configure(&mut self, source: SettingsSource<'_>) {
        if let Some(settings) = self.handler.configure(source) {
            self.settings = settings;
        }
    }

    pub fn needs_update(&self, theme: Theme) -> bool {
        self.handler.needs_update(theme)
    }

    /// Runs the enable hook if the component is enabled but not initialized.
    pub fn ensure_initialized(&mut self) {
        if !self.settings.enabled || self.initialized {
            return;
        }
        match self.handler.enable_hook() {
            Ok(()) => self.initialized = true,
            Err(e) => tracing::warn!("Enable hook of {} failed: {e}", self.kind()),
        }
    }

    /// Runs the disable hook if the component was initialized.
    pub fn disable(&mut self) {
        if !self.initialized {
            return;
        }
        if let Err(e) = self.handler.disable_hook() {
            tracing::warn!("Disable hook of {} failed: {e}", self.kind());
        }
        self.initialized = false;
    }

    /// Applies `theme`. Errors are logged and reported as [`SwitchOutcome::Failed`].
    pub fn switch(&mut self, theme: Theme, e: &SwitchEventArgs) -> SwitchOutcome {
        let outcome = if self.settings.enabled {
            self.ensure_initialized();
            if self.force_switch || self.handler.needs_update(theme) {
                match self.handler.handle_switch(theme, e) {
                    Ok(()) => SwitchOutcome::Switched,
                    Err(err) => {
                        tracing::error!(
                            "Could not switch {} to {theme} (source: {}): {err}",
                            self.kind(),
                            e.source()
                        );
                        SwitchOutcome::Failed
                    }
                }
            } else {
                SwitchOutcome::Skipped
            }
        } else if self.initialized {
            self.disable();
            SwitchOutcome::Disabled
        } else {
            SwitchOutcome::Skipped
        };
        self.force_switch = false;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ScriptedHandler;
    use nightfall_core::SwitchSource;

    fn event() -> SwitchEventArgs {
        SwitchEventArgs::new(SwitchSource::Manual, Theme::Dark)
    }

    #[test]
    fn first_switch_runs_enable_hook() {
        let handler = ScriptedHandler::new(ComponentKind::Apps);
        let probe = handler.probe();
        let mut c = Component::new(Box::new(handler));
        c.configure(SettingsSource::App(&AppConfig::default()));
        assert!(c.enabled());

        assert_eq!(c.switch(Theme::Dark, &event()), SwitchOutcome::Switched);
        assert!(c.initialized());
        assert_eq!(probe.enables(), 1);
        assert_eq!(probe.switches(), vec![Theme::Dark]);

        assert_eq!(c.switch(Theme::Dark, &event()), SwitchOutcome::Skipped);
        assert_eq!(probe.enables(), 1);
        assert_eq!(probe.switches().len(), 1);
    }

    #[test]
    fn disabled_component_cleans_up_once() {
        let handler = ScriptedHandler::new(ComponentKind::Cursor);
        let probe = handler.probe();
        let mut c = Component::new(Box::new(handler));
        c.configure(SettingsSource::App(&AppConfig::default()));
        c.switch(Theme::Dark, &event());

        probe.set_enabled(false);
        c.configure(SettingsSource::App(&AppConfig::default()));
        assert_eq!(c.switch(Theme::Light, &event()), SwitchOutcome::Disabled);
        assert!(!c.initialized());
        assert_eq!(probe.disables(), 1);
        assert_eq!(c.switch(Theme::Light, &event()), SwitchOutcome::Skipped);
        assert_eq!(probe.disables(), 1);
    }

    #[test]
    fn force_flag_bypasses_need_and_clears() {
        let handler = ScriptedHandler::new(ComponentKind::Office);
        let probe = handler.probe();
        let mut c = Component::new(Box::new(handler));
        c.configure(SettingsSource::App(&AppConfig::default()));
        c.switch(Theme::Dark, &event());

        c.set_force();
        assert_eq!(c.switch(Theme::Dark, &event()), SwitchOutcome::Switched);
        assert!(!c.force_pending());
        assert_eq!(probe.switches().len(), 2);
    }

    #[test]
    fn failures_are_reported_not_raised() {
        let handler = ScriptedHandler::new(ComponentKind::Wallpaper).failing();
        let mut c = Component::new(Box::new(handler));
        c.configure(SettingsSource::App(&AppConfig::default()));
        assert_eq!(c.switch(Theme::Light, &event()), SwitchOutcome::Failed);
        assert!(c.initialized());
    }

    #[test]
    fn compatibility_table() {
        assert!(ComponentKind::Script.theme_handler_compatible());
        assert!(ComponentKind::ColorFilter.theme_handler_compatible());
        assert!(!ComponentKind::Wallpaper.theme_handler_compatible());
        assert!(!ComponentKind::Apps.theme_handler_compatible());
    }
}
