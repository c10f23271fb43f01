//! Live configuration with reload and change detection.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, SystemTime};

use nightfall_core::{AppConfig, GovernorKind, ScriptConfig};

use crate::error::{EngineError, EngineResult};

const RELOAD_ATTEMPTS: u32 = 3;
const RELOAD_BACKOFF: Duration = Duration::from_millis(100);

/// A difference between two configurations that some module reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigChange {
    AutoSwitchToggled(bool),
    GovernorChanged { from: GovernorKind, to: GovernorKind },
    ThemeModeToggled(bool),
    AmbientThresholdsChanged,
    SunTimesChanged,
    BatteryEventToggled(bool),
    HotkeysChanged,
}

/// Lists what changed between `old` and `new`.
pub fn diff_configs(old: &AppConfig, new: &AppConfig) -> Vec<ConfigChange> {
    let mut changes = Vec::new();
    if old.auto_theme_switching_enabled != new.auto_theme_switching_enabled {
        changes.push(ConfigChange::AutoSwitchToggled(new.auto_theme_switching_enabled));
    }
    if old.governor != new.governor {
        changes.push(ConfigChange::GovernorChanged {
            from: old.governor,
            to: new.governor,
        });
    }
    if old.theme_mode.enabled != new.theme_mode.enabled {
        changes.push(ConfigChange::ThemeModeToggled(new.theme_mode.enabled));
    }
    if old.ambient_light != new.ambient_light {
        changes.push(ConfigChange::AmbientThresholdsChanged);
    }
    if old.sunrise != new.sunrise || old.sunset != new.sunset || old.location != new.location {
        changes.push(ConfigChange::SunTimesChanged);
    }
    if old.events.dark_theme_on_battery != new.events.dark_theme_on_battery {
        changes.push(ConfigChange::BatteryEventToggled(new.events.dark_theme_on_battery));
    }
    if old.hotkeys != new.hotkeys {
        changes.push(ConfigChange::HotkeysChanged);
    }
    changes
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Stamps {
    config: Option<SystemTime>,
    scripts: Option<SystemTime>,
}

/// Holds the active [`AppConfig`] and [`ScriptConfig`].
///
/// Readers take cheap `Arc` snapshots. A store created with
/// [`ConfigStore::new`] has no backing files and only changes through
/// [`ConfigStore::replace`].
pub struct ConfigStore {
    path: Option<PathBuf>,
    scripts_path: Option<PathBuf>,
    current: RwLock<Arc<AppConfig>>,
    scripts: RwLock<Arc<ScriptConfig>>,
    stamps: Mutex<Stamps>,
}

impl ConfigStore {
    pub fn new(config: AppConfig) -> Self {
        Self {
            path: None,
            scripts_path: None,
            current: RwLock::new(Arc::new(config)),
            scripts: RwLock::new(Arc::new(ScriptConfig::default())),
            stamps: Mutex::new(Stamps::default()),
        }
    }

    /// Loads both files, falling back to defaults for missing ones.
    ///
    /// A relative scripts path is looked up by file name next to the config
    /// file.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let config = AppConfig::load_or_default(Some(&path));
        let scripts_path = resolve_scripts_path(&path, &config.storage.scripts_file);
        let scripts = ScriptConfig::load_or_default(&scripts_path);
        let store = Self {
            path: Some(path),
            scripts_path: Some(scripts_path),
            current: RwLock::new(Arc::new(config)),
            scripts: RwLock::new(Arc::new(scripts)),
            stamps: Mutex::new(Stamps::default()),
        };
        *store.lock_stamps() = store.read_stamps();
        store
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn snapshot(&self) -> Arc<AppConfig> {
        self.current.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn scripts(&self) -> Arc<ScriptConfig> {
        self.scripts.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Swaps in `config` and returns the previous one.
    pub fn replace(&self, config: AppConfig) -> Arc<AppConfig> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *current, Arc::new(config))
    }

    pub fn replace_scripts(&self, scripts: ScriptConfig) -> Arc<ScriptConfig> {
        let mut current = self.scripts.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *current, Arc::new(scripts))
    }

    /// Whether the config file changed on disk since the last load.
    pub fn config_modified(&self) -> bool {
        let now = self.read_stamps();
        now.config != self.lock_stamps().config
    }

    pub fn scripts_modified(&self) -> bool {
        let now = self.read_stamps();
        now.scripts != self.lock_stamps().scripts
    }

    /// Re-reads the config file.
    ///
    /// Returns the old and new configuration, or `None` when the store has
    /// no backing file. Parse and I/O failures are retried with a doubling
    /// backoff.
    pub fn reload(&self) -> EngineResult<Option<(Arc<AppConfig>, Arc<AppConfig>)>> {
        let Some(path) = &self.path else {
            return Ok(None);
        };
        let config = retry(|| AppConfig::load(path))?;
        self.lock_stamps().config = self.read_stamps().config;
        let new = Arc::new(config);
        let old = {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *current, new.clone())
        };
        tracing::info!("Reloaded configuration from {}", path.display());
        Ok(Some((old, new)))
    }

    pub fn reload_scripts(&self) -> EngineResult<Option<Arc<ScriptConfig>>> {
        let Some(path) = &self.scripts_path else {
            return Ok(None);
        };
        let scripts = if path.exists() {
            retry(|| ScriptConfig::load(path))?
        } else {
            ScriptConfig::default()
        };
        self.lock_stamps().scripts = self.read_stamps().scripts;
        let scripts = Arc::new(scripts);
        *self.scripts.write().unwrap_or_else(PoisonError::into_inner) = scripts.clone();
        tracing::info!("Reloaded scripts from {}", path.display());
        Ok(Some(scripts))
    }

    fn read_stamps(&self) -> Stamps {
        let modified = |p: &Option<PathBuf>| {
            p.as_ref()
                .and_then(|p| std::fs::metadata(p).ok())
                .and_then(|m| m.modified().ok())
        };
        Stamps {
            config: modified(&self.path),
            scripts: modified(&self.scripts_path),
        }
    }

    fn lock_stamps(&self) -> std::sync::MutexGuard<'_, Stamps> {
        self.stamps.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn resolve_scripts_path(config_path: &Path, scripts: &Path) -> PathBuf {
    if scripts.is_absolute() {
        return scripts.to_path_buf();
    }
    match config_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join(scripts.file_name().unwrap_or(scripts.as_os_str())),
        _ => scripts.to_path_buf(),
    }
}

fn retry<T>(mut load: impl FnMut() -> anyhow::Result<T>) -> EngineResult<T> {
    let mut backoff = RELOAD_BACKOFF;
    for attempt in 1..=RELOAD_ATTEMPTS {
        match load() {
            Ok(value) => return Ok(value),
            Err(e) if attempt < RELOAD_ATTEMPTS => {
                tracing::warn!("Config load attempt {attempt} failed: {e}");
                std::thread::sleep(backoff);
                backoff *= 2;
            }
            Err(e) => {
                tracing::error!("Giving up on config load: {e}");
            }
        }
    }
    Err(EngineError::ConfigTimeout {
        attempts: RELOAD_ATTEMPTS,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nightfall_core::config::Mode;

    #[test]
    fn diff_reports_relevant_changes() {
        let old = AppConfig::default();
        let mut new = AppConfig::default();
        new.auto_theme_switching_enabled = false;
        new.governor = GovernorKind::AmbientLight;
        new.ambient_light.dark_threshold = 3.0;
        new.events.dark_theme_on_battery = true;
        new.components.apps.component.mode = Mode::AlwaysDark;

        assert_eq!(
            diff_configs(&old, &new),
            vec![
                ConfigChange::AutoSwitchToggled(false),
                ConfigChange::GovernorChanged {
                    from: GovernorKind::Default,
                    to: GovernorKind::AmbientLight,
                },
                ConfigChange::AmbientThresholdsChanged,
                ConfigChange::BatteryEventToggled(true),
            ]
        );
    }

    #[test]
    fn identical_configs_have_no_changes() {
        assert!(diff_configs(&AppConfig::default(), &AppConfig::default()).is_empty());
    }

    #[test]
    fn replace_returns_previous() {
        let store = ConfigStore::new(AppConfig::default());
        let mut cfg = AppConfig::default();
        cfg.theme_mode.enabled = true;
        let old = store.replace(cfg);
        assert!(!old.theme_mode.enabled);
        assert!(store.snapshot().theme_mode.enabled);
    }

    #[test]
    fn in_memory_store_does_not_reload() {
        let store = ConfigStore::new(AppConfig::default());
        assert!(store.reload().unwrap().is_none());
        assert!(!store.config_modified());
    }

    #[test]
    fn reload_reads_file_and_returns_both_versions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nightfall.toml");
        std::fs::write(&path, "auto_theme_switching_enabled = true\n").unwrap();
        let store = ConfigStore::from_path(&path);
        assert!(store.snapshot().auto_theme_switching_enabled);

        std::fs::write(&path, "auto_theme_switching_enabled = false\n").unwrap();
        let (old, new) = store.reload().unwrap().unwrap();
        assert!(old.auto_theme_switching_enabled);
        assert!(!new.auto_theme_switching_enabled);
        assert!(!store.snapshot().auto_theme_switching_enabled);
    }

    #[test]
    fn broken_file_times_out_after_retries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nightfall.toml");
        std::fs::write(&path, "sunrise = 12\n").unwrap();
        let store = ConfigStore::from_path(&path);
        assert!(matches!(
            store.reload(),
            Err(EngineError::ConfigTimeout { attempts: 3 })
        ));
    }

    #[test]
    fn scripts_resolve_next_to_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nightfall.toml");
        std::fs::write(dir.path().join("scripts.toml"), "enabled = true\n").unwrap();
        let store = ConfigStore::from_path(&path);
        assert!(store.scripts().enabled);
    }
}
