//! Collaborators the engine calls into.
//!
//! Everything that touches the operating system sits behind one of these
//! traits. The binary wires real implementations; tests use the doubles in
//! [`crate::mock`].

use std::collections::HashMap;

use chrono::NaiveDateTime;
use nightfall_core::{AppConfig, ScriptEntry, Theme};

use crate::component::ComponentKind;
use crate::postpone::PostponeSnapshot;

/// Applies whole OS theme files in managed theme mode.
pub trait ThemeBackend: Send + Sync {
    /// Returns whether anything changed. With `skip_check` the theme is
    /// applied even if it already looks active.
    fn apply_theme(&self, config: &AppConfig, theme: Theme, skip_check: bool) -> anyhow::Result<bool>;

    fn current_theme_name(&self) -> anyhow::Result<String>;

    /// Persists the composed theme after components ran in classic mode.
    fn save_managed_theme(&self, theme: Theme) -> anyhow::Result<()>;
}

/// Reads and writes a single appearance aspect.
pub trait AspectBackend: Send + Sync {
    /// `None` when the aspect has never been set or cannot be read back.
    fn current(&self, kind: ComponentKind) -> anyhow::Result<Option<String>>;

    fn apply(&self, kind: ComponentKind, value: &str) -> anyhow::Result<()>;
}

pub trait ScriptRunner: Send + Sync {
    fn run(&self, script: &ScriptEntry, args: &[String]) -> anyhow::Result<()>;
}

pub trait PowerBackend: Send + Sync {
    fn battery_discharging(&self) -> anyhow::Result<bool>;

    /// Returns whether energy saver was active and got disabled.
    fn disable_energy_saver(&self) -> anyhow::Result<bool>;

    fn restore_energy_saver(&self) -> anyhow::Result<()>;
}

/// Toast sink for imminent automatic switches.
pub trait Notifier: Send + Sync {
    fn switch_approaching(&self, target: Theme, at: Option<NaiveDateTime>);
}

pub trait LightSensor: Send + Sync {
    /// Current illuminance in lux, `None` if the sensor has no reading yet.
    fn read_lux(&self) -> anyhow::Result<Option<f64>>;
}

/// Watches the OS night light toggle.
pub trait NightLightSource: Send + Sync {
    fn is_enabled(&self) -> anyhow::Result<bool>;
}

/// Durable storage for postpones and learned theme names.
pub trait StateStore: Send + Sync {
    fn load_postpones(&self) -> anyhow::Result<Option<PostponeSnapshot>>;
    fn save_postpones(&self, snapshot: &PostponeSnapshot) -> anyhow::Result<()>;
    fn load_learned_names(&self) -> anyhow::Result<HashMap<Theme, String>>;
    fn save_learned_names(&self, names: &HashMap<Theme, String>) -> anyhow::Result<()>;
}
