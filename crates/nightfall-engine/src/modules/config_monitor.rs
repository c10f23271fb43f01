use std::sync::Arc;

use nightfall_core::{AppConfig, SwitchEventArgs, SwitchSource};

use super::{GovernorModule, Module, TimerName};
use crate::component::ComponentManager;
use crate::config_store::{diff_configs, ConfigChange, ConfigStore};
use crate::state::GlobalState;
use crate::theme_manager::ThemeManager;

pub const CONFIG_MONITOR_MODULE: &str = "config_monitor";

/// Reloads the configuration when its files change and routes each
/// [`ConfigChange`] to the subsystem that owns it.
pub struct ConfigMonitorModule {
    config: Arc<ConfigStore>,
    state: Arc<GlobalState>,
    components: Arc<ComponentManager>,
    theme_manager: Arc<ThemeManager>,
    governor: Arc<GovernorModule>,
    warden: Arc<dyn Module>,
}

impl ConfigMonitorModule {
    pub fn new(
        config: Arc<ConfigStore>,
        state: Arc<GlobalState>,
        components: Arc<ComponentManager>,
        theme_manager: Arc<ThemeManager>,
        governor: Arc<GovernorModule>,
        warden: Arc<dyn Module>,
    ) -> Self {
        Self {
            config,
            state,
            components,
            theme_manager,
            governor,
            warden,
        }
    }

    /// Reloads whatever changed on disk. Settings reach the components
    /// before the gate opens again.
    fn reload(&self) -> Option<(Arc<AppConfig>, Arc<AppConfig>)> {
        let config_modified = self.config.config_modified();
        let scripts_modified = self.config.scripts_modified();
        if !config_modified && !scripts_modified {
            return None;
        }

        let _guard = self.state.config_gate().begin_update();
        let mut reloaded = None;
        if config_modified {
            match self.config.reload() {
                Ok(Some((old, new))) => {
                    self.components.update_settings(&new);
                    reloaded = Some((old, new));
                }
                Ok(None) => {}
                Err(e) => tracing::error!("Keeping last good configuration: {e}"),
            }
        }
        if scripts_modified {
            match self.config.reload_scripts() {
                Ok(Some(scripts)) => self.components.update_script_settings(&scripts),
                Ok(None) => {}
                Err(e) => tracing::error!("Keeping last good scripts: {e}"),
            }
        }
        reloaded
    }

    pub fn apply_changes(&self, changes: &[ConfigChange]) {
        let mut refresh_modules = false;
        for change in changes {
            match change {
                ConfigChange::AutoSwitchToggled(enabled) => {
                    tracing::info!("Automatic switching {}", if *enabled { "enabled" } else { "disabled" });
                    if *enabled {
                        self.components.force_all();
                    }
                    refresh_modules = true;
                }
                ConfigChange::GovernorChanged { from, to } => {
                    tracing::info!("Governor changed from {from} to {to}");
                    refresh_modules = true;
                }
                ConfigChange::BatteryEventToggled(enabled) => {
                    tracing::info!("Dark theme on battery {}", if *enabled { "enabled" } else { "disabled" });
                    refresh_modules = true;
                }
                ConfigChange::ThemeModeToggled(enabled) => {
                    tracing::info!("Managed theme mode {}", if *enabled { "enabled" } else { "disabled" });
                    if *enabled {
                        self.components.invoke_disable_incompatible();
                    } else {
                        self.components.force_all();
                    }
                }
                ConfigChange::AmbientThresholdsChanged => self.governor.reevaluate(),
                ConfigChange::SunTimesChanged => self.theme_manager.refresh_skip_next_expiry(),
                ConfigChange::HotkeysChanged => {
                    tracing::info!("Hotkey configuration changed, hotkeys are not bound by this service");
                }
            }
        }
        if refresh_modules {
            self.warden.fire();
        }
    }
}

impl Module for ConfigMonitorModule {
    fn name(&self) -> &str {
        CONFIG_MONITOR_MODULE
    }

    fn timer_affinity(&self) -> TimerName {
        TimerName::Short
    }

    fn priority(&self) -> i32 {
        10
    }

    fn fire(&self) {
        let Some((old, new)) = self.reload() else {
            return;
        };
        let changes = diff_configs(&old, &new);
        self.apply_changes(&changes);
        // Component settings may have changed without any tracked change.
        self.theme_manager
            .request_switch(SwitchEventArgs::automatic(SwitchSource::ExternalThemeSwitch));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentKind;
    use crate::mock::{GovernorHarness, RecordingModule};
    use std::sync::Mutex;

    struct Rig {
        h: GovernorHarness,
        _dir: tempfile::TempDir,
        path: std::path::PathBuf,
        monitor: ConfigMonitorModule,
        log: Arc<Mutex<Vec<String>>>,
        aspects: Arc<crate::mock::MemoryAspectBackend>,
    }

    fn write(path: &std::path::Path, body: &str) {
        std::fs::write(path, body).unwrap();
        // Make sure the modification time moves even on coarse filesystems.
        let later = std::time::SystemTime::now() + std::time::Duration::from_secs(5);
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(later).unwrap();
    }

    impl Rig {
        fn new(body: &str) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("nightfall.toml");
            std::fs::write(&path, body).unwrap();
            let mut h = GovernorHarness::new(AppConfig::default());
            h.ctx.config = Arc::new(ConfigStore::from_path(&path));
            let (tm, doubles) = h.scheduler();
            let log = Arc::new(Mutex::new(Vec::new()));
            let governor = Arc::new(GovernorModule::new(h.ctx.clone(), tm.clone()));
            let monitor = ConfigMonitorModule::new(
                h.ctx.config.clone(),
                h.ctx.state.clone(),
                tm.components().clone(),
                tm,
                governor,
                Arc::new(RecordingModule::new("warden", log.clone())),
            );
            Self {
                h,
                _dir: dir,
                path,
                monitor,
                log,
                aspects: doubles.aspects,
            }
        }
    }

    #[tokio::test]
    async fn unchanged_files_do_nothing() {
        let rig = Rig::new("");
        rig.monitor.fire();
        assert!(rig.log.lock().unwrap().is_empty());
        assert!(!rig.h.ctx.state.config_gate().is_updating());
    }

    #[tokio::test]
    async fn reload_updates_components_and_refreshes_modules() {
        let rig = Rig::new("");
        write(
            &rig.path,
            "auto_theme_switching_enabled = false\n[components.apps]\nenabled = true\n",
        );
        rig.monitor.fire();

        assert!(!rig.h.ctx.config.snapshot().auto_theme_switching_enabled);
        assert_eq!(rig.log.lock().unwrap().len(), 1);
        assert!(!rig.h.ctx.state.config_gate().is_updating());
        assert_eq!(rig.aspects.value(ComponentKind::Apps), None);
    }

    #[tokio::test]
    async fn broken_file_keeps_last_good_config() {
        let rig = Rig::new("governor = \"night_light\"\n");
        write(&rig.path, "governor = [");
        rig.monitor.fire();
        assert_eq!(
            rig.h.ctx.config.snapshot().governor,
            nightfall_core::GovernorKind::NightLight
        );
        assert!(rig.log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn component_only_change_applies_immediately() {
        let rig = Rig::new("");
        write(&rig.path, "[components.apps]\nenabled = true\n");
        rig.monitor.fire();
        assert!(rig.log.lock().unwrap().is_empty());
        assert_eq!(rig.aspects.value(ComponentKind::Apps).as_deref(), Some("light"));
    }
}
