use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Appearance requested for the desktop or one of its aspects.
///
/// `Automatic` defers the decision to the active governor and the override
/// chain of the theme manager. `Ignore` tells a component to leave its aspect
/// untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    #[default]
    Unknown,
    Dark,
    Light,
    Automatic,
    Ignore,
}

impl Theme {
    /// `Dark` and `Light` are the only values a component can apply.
    pub fn is_concrete(self) -> bool {
        matches!(self, Theme::Dark | Theme::Light)
    }

    /// Swaps `Dark` and `Light`; every other value is returned unchanged.
    pub fn opposite(self) -> Theme {
        match self {
            Theme::Dark => Theme::Light,
            Theme::Light => Theme::Dark,
            other => other,
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Theme::Unknown => "unknown",
            Theme::Dark => "dark",
            Theme::Light => "light",
            Theme::Automatic => "automatic",
            Theme::Ignore => "ignore",
        };
        f.write_str(s)
    }
}

/// Origin of a switch request.
///
/// `Any` never appears on a request. It only exists so that script entries
/// can allow every source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchSource {
    Any,
    TimeSwitchModule,
    NightLightTrackerModule,
    AmbientLightSensorModule,
    BatteryStatusChanged,
    SystemResume,
    Manual,
    ExternalThemeSwitch,
    Startup,
    SystemUnlock,
    Api,
    SystemTimeChanged,
}

impl fmt::Display for SwitchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SwitchSource::Any => "any",
            SwitchSource::TimeSwitchModule => "time_switch",
            SwitchSource::NightLightTrackerModule => "night_light",
            SwitchSource::AmbientLightSensorModule => "ambient_light",
            SwitchSource::BatteryStatusChanged => "battery_status",
            SwitchSource::SystemResume => "system_resume",
            SwitchSource::Manual => "manual",
            SwitchSource::ExternalThemeSwitch => "external_theme_switch",
            SwitchSource::Startup => "startup",
            SwitchSource::SystemUnlock => "system_unlock",
            SwitchSource::Api => "api",
            SwitchSource::SystemTimeChanged => "system_time_changed",
        };
        f.write_str(s)
    }
}

/// Which governor decides the automatic theme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GovernorKind {
    /// Sunrise/sunset, either configured or derived from a location.
    #[default]
    Default,
    NightLight,
    AmbientLight,
}

impl fmt::Display for GovernorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GovernorKind::Default => "time switch",
            GovernorKind::NightLight => "night light",
            GovernorKind::AmbientLight => "ambient light",
        };
        f.write_str(s)
    }
}

/// A single switch attempt, passed unchanged through the whole pipeline.
///
/// Overrides applied by the theme manager produce a new value through
/// [`SwitchEventArgs::with_theme`] instead of mutating the original.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchEventArgs {
    source: SwitchSource,
    requested_theme: Theme,
    switch_time: Option<NaiveDateTime>,
}

impl SwitchEventArgs {
    pub fn new(source: SwitchSource, requested_theme: Theme) -> Self {
        Self {
            source,
            requested_theme,
            switch_time: None,
        }
    }

    /// A request that lets the governor and override chain pick the theme.
    pub fn automatic(source: SwitchSource) -> Self {
        Self::new(source, Theme::Automatic)
    }

    pub fn with_switch_time(self, switch_time: NaiveDateTime) -> Self {
        Self {
            switch_time: Some(switch_time),
            ..self
        }
    }

    pub fn with_theme(&self, theme: Theme) -> Self {
        Self {
            requested_theme: theme,
            ..self.clone()
        }
    }

    pub fn source(&self) -> SwitchSource {
        self.source
    }

    pub fn requested_theme(&self) -> Theme {
        self.requested_theme
    }

    pub fn switch_time(&self) -> Option<NaiveDateTime> {
        self.switch_time
    }
}

/// Output of every governor run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GovernorEventArgs {
    pub in_switch_window: bool,
    pub switch_event: Option<SwitchEventArgs>,
}

impl GovernorEventArgs {
    /// Reports only the switch-window flag; nothing should be applied.
    pub fn window(in_switch_window: bool) -> Self {
        Self {
            in_switch_window,
            switch_event: None,
        }
    }

    pub fn with_event(in_switch_window: bool, switch_event: SwitchEventArgs) -> Self {
        Self {
            in_switch_window,
            switch_event: Some(switch_event),
        }
    }
}
