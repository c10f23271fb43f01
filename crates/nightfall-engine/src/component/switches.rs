//! Aspect switches backed by an [`AspectBackend`].
//!
//! Each switch maps the target theme to the value its aspect should hold
//! and only writes when the backend reports something different.

use std::sync::Arc;

use nightfall_core::config::{ComponentSettings, Mode, ModeSettings, PairedSettings};
use nightfall_core::{SwitchEventArgs, Theme};

use super::{BaseSettings, ComponentHandler, ComponentKind, SettingsSource};
use crate::interfaces::AspectBackend;

pub const LIGHT_VALUE: &str = "light";
pub const DARK_VALUE: &str = "dark";
pub const FILTER_ON: &str = "enabled";
pub const FILTER_OFF: &str = "disabled";

fn base<T>(settings: &ComponentSettings<T>) -> BaseSettings {
    BaseSettings {
        enabled: settings.enabled,
        priority_to_light: settings.priority_to_light,
        priority_to_dark: settings.priority_to_dark,
    }
}

/// True when the aspect must be written to hold `desired`.
///
/// A backend that cannot be read is treated as stale so the write is
/// attempted anyway.
fn differs(backend: &dyn AspectBackend, kind: ComponentKind, desired: &str) -> bool {
    match backend.current(kind) {
        Ok(current) => current.as_deref() != Some(desired),
        Err(e) => {
            tracing::warn!("Could not read current {kind} state: {e}");
            true
        }
    }
}

/// Apps, system, office and touch keyboard themes. All but the touch
/// keyboard can be pinned to one side.
pub struct ModeSwitch {
    kind: ComponentKind,
    mode: Mode,
    backend: Arc<dyn AspectBackend>,
}

impl ModeSwitch {
    pub fn new(kind: ComponentKind, backend: Arc<dyn AspectBackend>) -> Self {
        Self {
            kind,
            mode: Mode::Switch,
            backend,
        }
    }

    fn desired(&self, theme: Theme) -> Option<&'static str> {
        match (self.mode, theme) {
            (Mode::AlwaysLight, _) => Some(LIGHT_VALUE),
            (Mode::AlwaysDark, _) => Some(DARK_VALUE),
            (Mode::Switch, Theme::Light) => Some(LIGHT_VALUE),
            (Mode::Switch, Theme::Dark) => Some(DARK_VALUE),
            _ => None,
        }
    }

    fn settings<'a>(&self, source: SettingsSource<'a>) -> Option<&'a ComponentSettings<ModeSettings>> {
        let SettingsSource::App(config) = source else {
            return None;
        };
        match self.kind {
            ComponentKind::Apps => Some(&config.components.apps),
            ComponentKind::System => Some(&config.components.system),
            ComponentKind::Office => Some(&config.components.office),
            _ => None,
        }
    }
}

impl ComponentHandler for ModeSwitch {
    fn kind(&self) -> ComponentKind {
        self.kind
    }

    fn configure(&mut self, source: SettingsSource<'_>) -> Option<BaseSettings> {
        if self.kind == ComponentKind::TouchKeyboard {
            let SettingsSource::App(config) = source else {
                return None;
            };
            return Some(base(&config.components.touch_keyboard));
        }
        let settings = self.settings(source)?;
        self.mode = settings.component.mode;
        Some(base(settings))
    }

    fn needs_update(&self, theme: Theme) -> bool {
        self.desired(theme)
            .is_some_and(|want| differs(self.backend.as_ref(), self.kind, want))
    }

    fn handle_switch(&mut self, theme: Theme, _e: &SwitchEventArgs) -> anyhow::Result<()> {
        let Some(want) = self.desired(theme) else {
            return Ok(());
        };
        self.backend.apply(self.kind, want)?;
        tracing::debug!("{} set to {want}", self.kind);
        Ok(())
    }
}

/// Accent color and cursor scheme: a configured value per theme.
pub struct PairedSwitch {
    kind: ComponentKind,
    values: PairedSettings,
    backend: Arc<dyn AspectBackend>,
}

impl PairedSwitch {
    pub fn new(kind: ComponentKind, backend: Arc<dyn AspectBackend>) -> Self {
        Self {
            kind,
            values: PairedSettings::default(),
            backend,
        }
    }

    fn desired(&self, theme: Theme) -> Option<&str> {
        match theme {
            Theme::Light => self.values.light.as_deref(),
            Theme::Dark => self.values.dark.as_deref(),
            _ => None,
        }
    }
}

impl ComponentHandler for PairedSwitch {
    fn kind(&self) -> ComponentKind {
        self.kind
    }

    fn configure(&mut self, source: SettingsSource<'_>) -> Option<BaseSettings> {
        let SettingsSource::App(config) = source else {
            return None;
        };
        let settings = match self.kind {
            ComponentKind::Colorization => &config.components.colorization,
            ComponentKind::Cursor => &config.components.cursor,
            _ => return None,
        };
        self.values = settings.component.clone();
        Some(base(settings))
    }

    fn needs_update(&self, theme: Theme) -> bool {
        self.desired(theme)
            .is_some_and(|want| differs(self.backend.as_ref(), self.kind, want))
    }

    fn handle_switch(&mut self, theme: Theme, _e: &SwitchEventArgs) -> anyhow::Result<()> {
        if let Some(want) = self.desired(theme) {
            self.backend.apply(self.kind, want)?;
        }
        Ok(())
    }
}

pub struct WallpaperSwitch {
    light: Option<String>,
    dark: Option<String>,
    backend: Arc<dyn AspectBackend>,
}

impl WallpaperSwitch {
    pub fn new(backend: Arc<dyn AspectBackend>) -> Self {
        Self {
            light: None,
            dark: None,
            backend,
        }
    }

    fn desired(&self, theme: Theme) -> Option<&str> {
        match theme {
            Theme::Light => self.light.as_deref(),
            Theme::Dark => self.dark.as_deref(),
            _ => None,
        }
    }
}

impl ComponentHandler for WallpaperSwitch {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Wallpaper
    }

    fn configure(&mut self, source: SettingsSource<'_>) -> Option<BaseSettings> {
        let SettingsSource::App(config) = source else {
            return None;
        };
        let settings = &config.components.wallpaper;
        let path_string = |p: &Option<std::path::PathBuf>| p.as_ref().map(|p| p.display().to_string());
        self.light = path_string(&settings.component.light_path);
        self.dark = path_string(&settings.component.dark_path);
        Some(base(settings))
    }

    fn needs_update(&self, theme: Theme) -> bool {
        self.desired(theme)
            .is_some_and(|want| differs(self.backend.as_ref(), ComponentKind::Wallpaper, want))
    }

    fn handle_switch(&mut self, theme: Theme, _e: &SwitchEventArgs) -> anyhow::Result<()> {
        if let Some(path) = self.desired(theme) {
            self.backend.apply(ComponentKind::Wallpaper, path)?;
            tracing::debug!("Wallpaper set to {path}");
        }
        Ok(())
    }
}

/// Grayscale filter, on while dark.
pub struct ColorFilterSwitch {
    backend: Arc<dyn AspectBackend>,
}

impl ColorFilterSwitch {
    pub fn new(backend: Arc<dyn AspectBackend>) -> Self {
        Self { backend }
    }

    fn desired(theme: Theme) -> Option<&'static str> {
        match theme {
            Theme::Dark => Some(FILTER_ON),
            Theme::Light => Some(FILTER_OFF),
            _ => None,
        }
    }
}

impl ComponentHandler for ColorFilterSwitch {
    fn kind(&self) -> ComponentKind {
        ComponentKind::ColorFilter
    }

    fn configure(&mut self, source: SettingsSource<'_>) -> Option<BaseSettings> {
        let SettingsSource::App(config) = source else {
            return None;
        };
        Some(base(&config.components.color_filter))
    }

    fn needs_update(&self, theme: Theme) -> bool {
        Self::desired(theme)
            .is_some_and(|want| differs(self.backend.as_ref(), ComponentKind::ColorFilter, want))
    }

    fn handle_switch(&mut self, theme: Theme, _e: &SwitchEventArgs) -> anyhow::Result<()> {
        if let Some(want) = Self::desired(theme) {
            self.backend.apply(ComponentKind::ColorFilter, want)?;
        }
        Ok(())
    }

    fn disable_hook(&mut self) -> anyhow::Result<()> {
        if differs(self.backend.as_ref(), ComponentKind::ColorFilter, FILTER_OFF) {
            self.backend.apply(ComponentKind::ColorFilter, FILTER_OFF)?;
        }
        Ok(())
    }
}
