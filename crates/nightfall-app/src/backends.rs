//! Desktop collaborators used by `nightfall run`.
//!
//! Appearance state lives in small JSON files under the data directory so
//! that external tools (or a desktop-specific wrapper script) can pick it up.
//! Power and light readings come from sysfs when it is available.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{bail, Context};
use chrono::NaiveDateTime;
use nightfall_core::{AppConfig, Theme};
use nightfall_engine::interfaces::{AspectBackend, LightSensor, Notifier, PowerBackend, ThemeBackend};
use nightfall_engine::ComponentKind;
use serde::{Deserialize, Serialize};

const ASPECTS_FILE: &str = "aspects.json";
const THEME_FILE: &str = "theme.json";

fn read_json<T: serde::de::DeserializeOwned + Default>(path: &Path) -> anyhow::Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    let content = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(value)?).with_context(|| format!("writing {}", path.display()))
}

/// Keeps one value per appearance aspect in `aspects.json`.
pub struct FileAspectBackend {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileAspectBackend {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(ASPECTS_FILE),
            lock: Mutex::new(()),
        }
    }
}

impl AspectBackend for FileAspectBackend {
    fn current(&self, kind: ComponentKind) -> anyhow::Result<Option<String>> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let values: HashMap<String, String> = read_json(&self.path)?;
        Ok(values.get(kind.name()).cloned())
    }

    fn apply(&self, kind: ComponentKind, value: &str) -> anyhow::Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut values: HashMap<String, String> = read_json(&self.path)?;
        values.insert(kind.name().to_string(), value.to_string());
        write_json(&self.path, &values)?;
        tracing::debug!("{kind} set to {value}");
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ThemeRecord {
    theme: Theme,
    #[serde(default)]
    path: Option<PathBuf>,
    #[serde(default)]
    name: String,
}

/// Records the applied theme file in `theme.json`.
pub struct FileThemeBackend {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileThemeBackend {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(THEME_FILE),
            lock: Mutex::new(()),
        }
    }
}

impl ThemeBackend for FileThemeBackend {
    fn apply_theme(&self, config: &AppConfig, theme: Theme, skip_check: bool) -> anyhow::Result<bool> {
        let theme_path = match theme {
            Theme::Light => config.theme_mode.light_theme_path.as_ref(),
            Theme::Dark => config.theme_mode.dark_theme_path.as_ref(),
            _ => None,
        };
        let Some(theme_path) = theme_path else {
            bail!("no {theme} theme file configured");
        };

        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let current: ThemeRecord = read_json(&self.path)?;
        if !skip_check && current.path.as_ref() == Some(theme_path) {
            return Ok(false);
        }
        let name = theme_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        write_json(
            &self.path,
            &ThemeRecord {
                theme,
                path: Some(theme_path.clone()),
                name,
            },
        )?;
        Ok(true)
    }

    fn current_theme_name(&self) -> anyhow::Result<String> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let current: ThemeRecord = read_json(&self.path)?;
        Ok(current.name)
    }

    fn save_managed_theme(&self, theme: Theme) -> anyhow::Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        write_json(
            &self.path,
            &ThemeRecord {
                theme,
                path: None,
                name: format!("nightfall {theme}"),
            },
        )
    }
}

const POWER_SUPPLY: &str = "/sys/class/power_supply";

/// Battery state from `/sys/class/power_supply`. Energy saver is not
/// exposed there, so it is never touched.
pub struct SysfsPower {
    root: PathBuf,
}

impl SysfsPower {
    pub fn new() -> Self {
        Self::with_root(POWER_SUPPLY)
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Default for SysfsPower {
    fn default() -> Self {
        Self::new()
    }
}

impl PowerBackend for SysfsPower {
    fn battery_discharging(&self) -> anyhow::Result<bool> {
        if !self.root.exists() {
            return Ok(false);
        }
        for entry in std::fs::read_dir(&self.root)? {
            let dir = entry?.path();
            let kind = std::fs::read_to_string(dir.join("type")).unwrap_or_default();
            if kind.trim() != "Battery" {
                continue;
            }
            let status = std::fs::read_to_string(dir.join("status")).unwrap_or_default();
            if status.trim() == "Discharging" {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn disable_energy_saver(&self) -> anyhow::Result<bool> {
        Ok(false)
    }

    fn restore_energy_saver(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

const IIO_DEVICES: &str = "/sys/bus/iio/devices";

/// Ambient light from an industrial I/O illuminance channel.
pub struct IioLightSensor {
    input: PathBuf,
}

impl IioLightSensor {
    /// First device exposing `in_illuminance_input` or `in_illuminance_raw`.
    pub fn discover() -> Option<Self> {
        Self::discover_in(Path::new(IIO_DEVICES))
    }

    pub fn discover_in(root: &Path) -> Option<Self> {
        let mut devices: Vec<PathBuf> = std::fs::read_dir(root).ok()?.flatten().map(|e| e.path()).collect();
        devices.sort();
        devices.into_iter().find_map(|dir| {
            ["in_illuminance_input", "in_illuminance_raw"]
                .iter()
                .map(|f| dir.join(f))
                .find(|p| p.exists())
                .map(|input| Self { input })
        })
    }
}

impl LightSensor for IioLightSensor {
    fn read_lux(&self) -> anyhow::Result<Option<f64>> {
        let raw = std::fs::read_to_string(&self.input).with_context(|| format!("reading {}", self.input.display()))?;
        let lux = raw
            .trim()
            .parse::<f64>()
            .with_context(|| format!("bad illuminance value {:?}", raw.trim()))?;
        Ok(Some(lux))
    }
}

/// Reports upcoming switches in the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn switch_approaching(&self, target: Theme, at: Option<NaiveDateTime>) {
        match at {
            Some(at) => tracing::info!("Switching to {target} theme at {}", at.format("%H:%M")),
            None => tracing::info!("Switching to {target} theme soon"),
        }
    }
}
