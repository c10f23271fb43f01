pub mod clock;
pub mod config;
pub mod lifecycle;
pub mod theme;

pub use clock::{Clock, SystemClock};
pub use config::{AppConfig, ScriptConfig, ScriptEntry};
pub use theme::{GovernorEventArgs, GovernorKind, SwitchEventArgs, SwitchSource, Theme};
