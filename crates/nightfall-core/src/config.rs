use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::theme::{GovernorKind, SwitchSource};

/// Shortest debounce accepted for ambient light changes.
pub const MIN_AMBIENT_DEBOUNCE_SECS: u64 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_true")]
    pub auto_theme_switching_enabled: bool,
    #[serde(default)]
    pub governor: GovernorKind,
    #[serde(default = "default_sunrise")]
    pub sunrise: NaiveTime,
    #[serde(default = "default_sunset")]
    pub sunset: NaiveTime,
    #[serde(default)]
    pub location: LocationConfig,
    #[serde(default)]
    pub hotkeys: HotkeyConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub auto_switch_notify: NotifyConfig,
    #[serde(default)]
    pub ambient_light: AmbientLightConfig,
    #[serde(default)]
    pub theme_mode: ThemeModeConfig,
    #[serde(default)]
    pub components: ComponentsConfig,
    #[serde(default)]
    pub tunable: TunableConfig,
    #[serde(default)]
    pub timers: TimerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

fn default_true() -> bool {
    true
}
fn default_sunrise() -> NaiveTime {
    NaiveTime::from_hms_opt(7, 0, 0).unwrap_or_default()
}
fn default_sunset() -> NaiveTime {
    NaiveTime::from_hms_opt(19, 0, 0).unwrap_or_default()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            auto_theme_switching_enabled: true,
            governor: GovernorKind::default(),
            sunrise: default_sunrise(),
            sunset: default_sunset(),
            location: LocationConfig::default(),
            hotkeys: HotkeyConfig::default(),
            events: EventsConfig::default(),
            auto_switch_notify: NotifyConfig::default(),
            ambient_light: AmbientLightConfig::default(),
            theme_mode: ThemeModeConfig::default(),
            components: ComponentsConfig::default(),
            tunable: TunableConfig::default(),
            timers: TimerConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

/// Geographic position used to derive sunrise and sunset.
///
/// Offsets are applied to the derived times and to night light transitions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
    #[serde(default)]
    pub sunrise_offset_min: i32,
    #[serde(default)]
    pub sunset_offset_min: i32,
}

impl LocationConfig {
    pub fn has_valid_coordinates(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Key bindings are carried for the front-end; the service never binds them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HotkeyConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub force_light: Option<String>,
    #[serde(default)]
    pub force_dark: Option<String>,
    #[serde(default)]
    pub no_force: Option<String>,
    #[serde(default)]
    pub toggle_theme: Option<String>,
    #[serde(default)]
    pub toggle_postpone: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventsConfig {
    #[serde(default)]
    pub dark_theme_on_battery: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmbientLightConfig {
    /// Lux at or below which the dark theme is wanted.
    #[serde(default = "default_dark_threshold")]
    pub dark_threshold: f64,
    /// Lux at or above which the light theme is wanted.
    #[serde(default = "default_light_threshold")]
    pub light_threshold: f64,
    #[serde(default = "default_debounce_secs")]
    pub debounce_secs: u64,
    #[serde(default = "default_poll_secs")]
    pub poll_secs: u64,
}

fn default_dark_threshold() -> f64 {
    10.0
}
fn default_light_threshold() -> f64 {
    50.0
}
fn default_debounce_secs() -> u64 {
    10
}
fn default_poll_secs() -> u64 {
    2
}

impl AmbientLightConfig {
    /// Debounce delay, clamped to [`MIN_AMBIENT_DEBOUNCE_SECS`].
    pub fn debounce(&self) -> Duration {
        Duration::from_secs(self.debounce_secs.max(MIN_AMBIENT_DEBOUNCE_SECS))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_secs.max(1))
    }
}

impl Default for AmbientLightConfig {
    fn default() -> Self {
        Self {
            dark_threshold: default_dark_threshold(),
            light_threshold: default_light_threshold(),
            debounce_secs: default_debounce_secs(),
            poll_secs: default_poll_secs(),
        }
    }
}

/// Managed theme mode: a single OS theme file is applied per switch
/// instead of mutating each aspect directly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThemeModeConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub light_theme_path: Option<PathBuf>,
    #[serde(default)]
    pub dark_theme_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TunableConfig {
    #[serde(default)]
    pub disable_energy_saver_on_switch: bool,
    #[serde(default)]
    pub debug_timer_message: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerConfig {
    #[serde(default = "default_main_secs")]
    pub main_secs: u64,
    #[serde(default = "default_short_secs")]
    pub short_secs: u64,
    #[serde(default = "default_io_secs")]
    pub io_secs: u64,
}

fn default_main_secs() -> u64 {
    60
}
fn default_short_secs() -> u64 {
    30
}
fn default_io_secs() -> u64 {
    7200
}

impl TimerConfig {
    pub fn main(&self) -> Duration {
        Duration::from_secs(self.main_secs.max(1))
    }
    pub fn short(&self) -> Duration {
        Duration::from_secs(self.short_secs.max(1))
    }
    pub fn io(&self) -> Duration {
        Duration::from_secs(self.io_secs.max(1))
    }
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            main_secs: default_main_secs(),
            short_secs: default_short_secs(),
            io_secs: default_io_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the postpone queue and learned theme names.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_scripts_file")]
    pub scripts_file: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_scripts_file() -> PathBuf {
    PathBuf::from("config/scripts.toml")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            scripts_file: default_scripts_file(),
        }
    }
}

/// Per-component priority defaults.
pub trait ComponentDefaults {
    const DEFAULT_PRIORITY: i32 = 0;
}

/// Settings shared by every switch component plus its own section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    default,
    bound(deserialize = "T: Deserialize<'de> + Default + ComponentDefaults")
)]
pub struct ComponentSettings<T> {
    pub enabled: bool,
    /// Lower values run first when switching to light.
    pub priority_to_light: i32,
    /// Lower values run first when switching to dark.
    pub priority_to_dark: i32,
    pub component: T,
}

impl<T: Default + ComponentDefaults> Default for ComponentSettings<T> {
    fn default() -> Self {
        Self {
            enabled: false,
            priority_to_light: T::DEFAULT_PRIORITY,
            priority_to_dark: T::DEFAULT_PRIORITY,
            component: T::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Switch,
    AlwaysLight,
    AlwaysDark,
}

/// Aspects that only follow the theme, or are pinned to one side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModeSettings {
    #[serde(default)]
    pub mode: Mode,
}

impl ComponentDefaults for ModeSettings {}

/// Aspects with a configured value per theme (accent color, cursor scheme).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PairedSettings {
    #[serde(default)]
    pub light: Option<String>,
    #[serde(default)]
    pub dark: Option<String>,
}

impl ComponentDefaults for PairedSettings {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WallpaperSettings {
    #[serde(default)]
    pub light_path: Option<PathBuf>,
    #[serde(default)]
    pub dark_path: Option<PathBuf>,
}

impl ComponentDefaults for WallpaperSettings {
    const DEFAULT_PRIORITY: i32 = 25;
}

/// Aspects without settings of their own.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToggleSettings {}

impl ComponentDefaults for ToggleSettings {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentsConfig {
    #[serde(default)]
    pub apps: ComponentSettings<ModeSettings>,
    #[serde(default)]
    pub system: ComponentSettings<ModeSettings>,
    #[serde(default)]
    pub wallpaper: ComponentSettings<WallpaperSettings>,
    #[serde(default)]
    pub office: ComponentSettings<ModeSettings>,
    #[serde(default)]
    pub color_filter: ComponentSettings<ToggleSettings>,
    #[serde(default)]
    pub colorization: ComponentSettings<PairedSettings>,
    #[serde(default)]
    pub cursor: ComponentSettings<PairedSettings>,
    #[serde(default)]
    pub touch_keyboard: ComponentSettings<ToggleSettings>,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load config with fallback chain: explicit path → ./config/nightfall.toml → hardcoded defaults.
    pub fn load_or_default(explicit_path: Option<&Path>) -> Self {
        if let Some(path) = explicit_path {
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {e}", path.display());
                }
            }
        }

        let default_path = Path::new("config/nightfall.toml");
        if default_path.exists() {
            match Self::load(default_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    tracing::warn!("Failed to load default config: {e}");
                }
            }
        }

        tracing::info!("Using hardcoded default configuration");
        Self::default()
    }
}

/// Scripts run on every switch, kept in their own file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_script_priority")]
    pub priority_to_light: i32,
    #[serde(default = "default_script_priority")]
    pub priority_to_dark: i32,
    #[serde(default)]
    pub scripts: Vec<ScriptEntry>,
}

fn default_script_priority() -> i32 {
    30
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            priority_to_light: default_script_priority(),
            priority_to_dark: default_script_priority(),
            scripts: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptEntry {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args_light: Vec<String>,
    #[serde(default)]
    pub args_dark: Vec<String>,
    #[serde(default = "default_allowed_sources")]
    pub allowed_sources: Vec<SwitchSource>,
    #[serde(default = "default_script_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

fn default_allowed_sources() -> Vec<SwitchSource> {
    vec![SwitchSource::Any]
}
fn default_script_timeout_secs() -> u64 {
    10
}

impl ScriptEntry {
    pub fn allows(&self, source: SwitchSource) -> bool {
        self.allowed_sources
            .iter()
            .any(|s| *s == SwitchSource::Any || *s == source)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl ScriptConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ScriptConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// A missing scripts file is normal and yields an empty, disabled config.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            tracing::debug!("No scripts file at {}", path.display());
            return Self::default();
        }
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::warn!("Failed to load scripts from {}: {e}", path.display());
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let cfg: AppConfig = toml::from_str("").unwrap();
        assert_eq!(cfg, AppConfig::default());
        assert!(cfg.auto_theme_switching_enabled);
        assert_eq!(cfg.governor, GovernorKind::Default);
        assert_eq!(cfg.timers.main(), Duration::from_secs(60));
    }

    #[test]
    fn wallpaper_defaults_to_priority_25() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [components.wallpaper]
            enabled = true
            "#,
        )
        .unwrap();
        assert!(cfg.components.wallpaper.enabled);
        assert_eq!(cfg.components.wallpaper.priority_to_dark, 25);
        assert_eq!(cfg.components.wallpaper.priority_to_light, 25);
        assert_eq!(cfg.components.apps.priority_to_dark, 0);
    }

    #[test]
    fn parses_full_config() {
        let cfg: AppConfig = toml::from_str(
            r#"
            auto_theme_switching_enabled = false
            governor = "ambient_light"
            sunrise = "06:30:00"
            sunset = "20:15:00"

            [location]
            enabled = true
            latitude = 47.37
            longitude = 8.54
            sunset_offset_min = -15

            [ambient_light]
            dark_threshold = 5.0
            light_threshold = 80.0
            debounce_secs = 1

            [components.apps]
            enabled = true
            priority_to_dark = 3
            [components.apps.component]
            mode = "always_dark"

            [components.cursor.component]
            light = "Aero"
            dark = "Aero Dark"
            "#,
        )
        .unwrap();

        assert!(!cfg.auto_theme_switching_enabled);
        assert_eq!(cfg.governor, GovernorKind::AmbientLight);
        assert_eq!(cfg.sunset, NaiveTime::from_hms_opt(20, 15, 0).unwrap());
        assert_eq!(cfg.location.sunset_offset_min, -15);
        assert_eq!(cfg.components.apps.priority_to_dark, 3);
        assert_eq!(cfg.components.apps.component.mode, Mode::AlwaysDark);
        assert_eq!(cfg.components.cursor.component.dark.as_deref(), Some("Aero Dark"));
        assert!(cfg.location.has_valid_coordinates());
    }

    #[test]
    fn ambient_debounce_is_clamped() {
        let cfg = AmbientLightConfig {
            debounce_secs: 1,
            ..AmbientLightConfig::default()
        };
        assert_eq!(cfg.debounce(), Duration::from_secs(MIN_AMBIENT_DEBOUNCE_SECS));

        let cfg = AmbientLightConfig {
            debounce_secs: 30,
            ..AmbientLightConfig::default()
        };
        assert_eq!(cfg.debounce(), Duration::from_secs(30));
    }

    #[test]
    fn script_entries_default_to_any_source() {
        let cfg: ScriptConfig = toml::from_str(
            r#"
            enabled = true

            [[scripts]]
            name = "terminal"
            command = "set-terminal-theme"
            args_dark = ["--dark"]

            [[scripts]]
            name = "api-only"
            command = "notify"
            allowed_sources = ["api"]
            "#,
        )
        .unwrap();

        assert_eq!(cfg.priority_to_dark, 30);
        assert_eq!(cfg.scripts.len(), 2);
        assert!(cfg.scripts[0].allows(SwitchSource::TimeSwitchModule));
        assert_eq!(cfg.scripts[0].timeout(), Duration::from_secs(10));
        assert!(cfg.scripts[1].allows(SwitchSource::Api));
        assert!(!cfg.scripts[1].allows(SwitchSource::Manual));
    }

    #[test]
    fn load_or_default_falls_back_on_bad_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "governor = [").unwrap();
        let cfg = AppConfig::load_or_default(Some(&path));
        assert_eq!(cfg.governor, GovernorKind::Default);
    }

    #[test]
    fn missing_scripts_file_is_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ScriptConfig::load_or_default(&dir.path().join("scripts.toml"));
        assert!(!cfg.enabled);
        assert!(cfg.scripts.is_empty());
    }
}
