use std::sync::{Arc, Mutex, PoisonError};

use nightfall_core::{SwitchEventArgs, SwitchSource};

use super::{Module, TimerName};
use crate::interfaces::PowerBackend;
use crate::theme_manager::ThemeManager;

pub const BATTERY_MODULE: &str = "battery_monitor";

/// Requests a switch when the machine goes on or off battery.
pub struct BatteryMonitorModule {
    power: Arc<dyn PowerBackend>,
    theme_manager: Arc<ThemeManager>,
    discharging: Mutex<Option<bool>>,
}

impl BatteryMonitorModule {
    pub fn new(power: Arc<dyn PowerBackend>, theme_manager: Arc<ThemeManager>) -> Self {
        Self {
            power,
            theme_manager,
            discharging: Mutex::new(None),
        }
    }

    fn read(&self) -> Option<bool> {
        match self.power.battery_discharging() {
            Ok(discharging) => Some(discharging),
            Err(e) => {
                tracing::warn!("Could not read battery status: {e}");
                None
            }
        }
    }
}

impl Module for BatteryMonitorModule {
    fn name(&self) -> &str {
        BATTERY_MODULE
    }

    fn timer_affinity(&self) -> TimerName {
        TimerName::Short
    }

    fn enable_hook(&self) {
        let now = self.read();
        *self.discharging.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    fn fire(&self) {
        let Some(now) = self.read() else {
            return;
        };
        let previous = self
            .discharging
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(now);
        if previous == Some(now) {
            return;
        }
        tracing::info!("Power source changed, discharging: {now}");
        self.theme_manager
            .request_switch(SwitchEventArgs::automatic(SwitchSource::BatteryStatusChanged));
    }

    fn disable_hook(&self) {
        *self.discharging.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}
