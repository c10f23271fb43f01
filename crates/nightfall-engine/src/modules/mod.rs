//! Periodic drivers and the modules they fire.

pub mod battery;
pub mod config_monitor;
pub mod governor;
pub mod timer;
pub mod warden;

use std::fmt;

pub use battery::BatteryMonitorModule;
pub use config_monitor::ConfigMonitorModule;
pub use governor::GovernorModule;
pub use timer::ModuleTimer;
pub use warden::WardenModule;

/// Which timer drives a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerName {
    Main,
    Short,
    Io,
}

impl fmt::Display for TimerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TimerName::Main => "main",
            TimerName::Short => "short",
            TimerName::Io => "io",
        };
        f.write_str(s)
    }
}

/// Unit of periodic work.
///
/// `fire` runs on the blocking pool and may call into the scheduler
/// synchronously.
pub trait Module: Send + Sync {
    /// Unique name; timers and callback lists deduplicate by it.
    fn name(&self) -> &str;

    fn timer_affinity(&self) -> TimerName;

    /// Higher priorities fire first within one tick.
    fn priority(&self) -> i32 {
        0
    }

    fn fire_on_registration(&self) -> bool {
        false
    }

    fn fire(&self);

    fn enable_hook(&self) {}

    fn disable_hook(&self) {}
}
