use std::sync::Arc;

use super::{BatteryMonitorModule, GovernorModule, Module, ModuleTimer, TimerName};
use crate::config_store::ConfigStore;
use crate::postpone::PostponeManager;

pub const WARDEN_MODULE: &str = "warden";

/// Registers and deregisters modules to match the configuration.
///
/// The governor module is also a postpone callback, so clearing the last
/// postpone reason re-evaluates the governor immediately.
pub struct WardenModule {
    config: Arc<ConfigStore>,
    postpone: Arc<PostponeManager>,
    timers: Vec<Arc<ModuleTimer>>,
    governor: Arc<GovernorModule>,
    battery: Arc<BatteryMonitorModule>,
}

impl WardenModule {
    pub fn new(
        config: Arc<ConfigStore>,
        postpone: Arc<PostponeManager>,
        timers: Vec<Arc<ModuleTimer>>,
        governor: Arc<GovernorModule>,
        battery: Arc<BatteryMonitorModule>,
    ) -> Self {
        Self {
            config,
            postpone,
            timers,
            governor,
            battery,
        }
    }

    fn timer(&self, name: TimerName) -> Option<&Arc<ModuleTimer>> {
        self.timers.iter().find(|t| t.name() == name)
    }

    fn manage(&self, module: Arc<dyn Module>, condition: bool) {
        if !condition {
            for timer in &self.timers {
                timer.deregister(module.name());
            }
            return;
        }
        match self.timer(module.timer_affinity()) {
            Some(timer) => {
                timer.register(module);
            }
            None => tracing::warn!("No {} timer for {}", module.timer_affinity(), module.name()),
        }
    }
}

impl Module for WardenModule {
    fn name(&self) -> &str {
        WARDEN_MODULE
    }

    fn timer_affinity(&self) -> TimerName {
        TimerName::Main
    }

    fn priority(&self) -> i32 {
        2
    }

    fn fire_on_registration(&self) -> bool {
        true
    }

    fn fire(&self) {
        let config = self.config.snapshot();
        let auto = config.auto_theme_switching_enabled;

        if auto {
            self.postpone.register_callback(self.governor.clone());
        } else {
            self.postpone.deregister_callback(self.governor.name());
        }
        self.manage(self.governor.clone(), auto);
        if auto {
            self.governor.auto_manage(config.governor);
        }

        self.manage(self.battery.clone(), config.events.dark_theme_on_battery);
    }
}
