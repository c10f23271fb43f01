//! Governors decide which theme should be active from one signal source.
//!
//! Exactly one governor is active at a time. The [`GovernorModule`] owns it
//! and calls [`Governor::run`] on every main timer tick. Governors with
//! background work (sensor polling, debounce expiry) request an extra
//! evaluation through their [`FireHandle`] instead of calling back into the
//! module directly.
//!
//! [`GovernorModule`]: crate::modules::GovernorModule

pub mod ambient_light;
pub mod night_light;
pub mod time_switch;

use std::sync::Arc;

use chrono::NaiveDateTime;
use nightfall_core::{AppConfig, Clock, GovernorEventArgs, GovernorKind, Theme};
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::config_store::ConfigStore;
use crate::interfaces::{LightSensor, NightLightSource, Notifier};
use crate::postpone::SESSION_LOCK;
use crate::state::GlobalState;

pub use ambient_light::AmbientLightGovernor;
pub use night_light::NightLightGovernor;
pub use time_switch::TimeSwitchGovernor;

pub trait Governor: Send {
    fn kind(&self) -> GovernorKind;

    /// Establishes event sources and reads the initial state.
    fn enable_hook(&mut self);

    /// Tears down what `enable_hook` started. Safe to call twice.
    fn disable_hook(&mut self);

    fn run(&mut self) -> GovernorEventArgs;

    /// Re-applies the last reading under the current configuration.
    fn reevaluate_with_current_config(&mut self) {}
}

/// Requests an out-of-band governor evaluation.
#[derive(Debug, Clone)]
pub struct FireHandle {
    tx: mpsc::UnboundedSender<()>,
}

impl FireHandle {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn fire(&self) {
        if self.tx.send(()).is_err() {
            tracing::debug!("Governor fire requested after the pump stopped");
        }
    }
}

/// Everything a governor may read or call.
#[derive(Clone)]
pub struct GovernorContext {
    pub state: Arc<GlobalState>,
    pub config: Arc<ConfigStore>,
    pub clock: Arc<dyn Clock>,
    pub notifier: Arc<dyn Notifier>,
    pub light_sensor: Option<Arc<dyn LightSensor>>,
    pub night_light: Option<Arc<dyn NightLightSource>>,
    pub fire: FireHandle,
    pub handle: Handle,
}

impl GovernorContext {
    /// Notifies about an upcoming switch unless the user cannot see it or
    /// asked for quiet.
    fn notify_switch_approaching(&self, config: &AppConfig, target: Theme, at: Option<NaiveDateTime>) -> bool {
        let postpone = self.state.postpone();
        if !config.auto_switch_notify.enabled
            || postpone.get(SESSION_LOCK).is_some()
            || postpone.is_grace_period()
        {
            return false;
        }
        self.notifier.switch_approaching(target, at);
        true
    }
}

/// Builds the governor for `kind`.
///
/// Falls back to the time governor when the signal source it needs is not
/// available on this machine.
pub fn build(kind: GovernorKind, ctx: &GovernorContext) -> Box<dyn Governor> {
    match kind {
        GovernorKind::Default => Box::new(TimeSwitchGovernor::new(ctx.clone())),
        GovernorKind::NightLight => match &ctx.night_light {
            Some(source) => Box::new(NightLightGovernor::new(ctx.clone(), source.clone())),
            None => {
                tracing::warn!("No night light source available, using the time governor");
                Box::new(TimeSwitchGovernor::new(ctx.clone()))
            }
        },
        GovernorKind::AmbientLight => match &ctx.light_sensor {
            Some(sensor) => Box::new(AmbientLightGovernor::new(ctx.clone(), sensor.clone())),
            None => {
                tracing::warn!("No ambient light sensor available, using the time governor");
                Box::new(TimeSwitchGovernor::new(ctx.clone()))
            }
        },
    }
}
