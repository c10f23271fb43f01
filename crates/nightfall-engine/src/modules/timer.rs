use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{Module, TimerName};

/// Fires its registered modules at a fixed interval.
pub struct ModuleTimer {
    name: TimerName,
    interval: Duration,
    modules: Mutex<Vec<Arc<dyn Module>>>,
    token: CancellationToken,
    debug_ticks: bool,
}

impl ModuleTimer {
    pub fn new(name: TimerName, interval: Duration, debug_ticks: bool) -> Self {
        Self {
            name,
            interval,
            modules: Mutex::new(Vec::new()),
            token: CancellationToken::new(),
            debug_ticks,
        }
    }

    pub fn name(&self) -> TimerName {
        self.name
    }

    /// Adds `module`, runs its enable hook and, if requested, fires it once.
    /// Returns `false` if a module with the same name is already registered.
    pub fn register(&self, module: Arc<dyn Module>) -> bool {
        {
            let mut modules = self.lock_modules();
            if modules.iter().any(|m| m.name() == module.name()) {
                return false;
            }
            modules.push(module.clone());
            modules.sort_by_key(|m| std::cmp::Reverse(m.priority()));
        }
        tracing::debug!("Registered {} on {} timer", module.name(), self.name);
        module.enable_hook();
        if module.fire_on_registration() {
            module.fire();
        }
        true
    }

    /// Removes the module and runs its disable hook.
    pub fn deregister(&self, name: &str) -> bool {
        let removed = {
            let mut modules = self.lock_modules();
            let Some(pos) = modules.iter().position(|m| m.name() == name) else {
                return false;
            };
            modules.remove(pos)
        };
        removed.disable_hook();
        tracing::debug!("Deregistered {name} from {} timer", self.name);
        true
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.lock_modules().iter().any(|m| m.name() == name)
    }

    pub fn module_names(&self) -> Vec<String> {
        self.lock_modules().iter().map(|m| m.name().to_string()).collect()
    }

    /// Fires every registered module once, highest priority first.
    pub fn tick(&self) {
        let modules = self.lock_modules().clone();
        if self.debug_ticks {
            tracing::debug!("{} timer tick: {} modules", self.name, modules.len());
        }
        for module in modules {
            module.fire();
        }
    }

    /// Starts the periodic loop. Each tick runs on the blocking pool.
    pub fn start(self: &Arc<Self>, handle: &Handle) -> JoinHandle<()> {
        let timer = self.clone();
        handle.spawn(async move {
            let mut interval = tokio::time::interval(timer.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; registration already fired.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = timer.token.cancelled() => break,
                    _ = interval.tick() => {
                        let t = timer.clone();
                        if let Err(e) = tokio::task::spawn_blocking(move || t.tick()).await {
                            tracing::error!("{} timer tick panicked: {e}", timer.name);
                        }
                    }
                }
            }
            tracing::debug!("{} timer stopped", timer.name);
        })
    }

    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Deregisters every module, running their disable hooks.
    pub fn dispose(&self) {
        self.stop();
        let modules: Vec<Arc<dyn Module>> = self.lock_modules().drain(..).collect();
        for module in modules {
            module.disable_hook();
        }
    }

    fn lock_modules(&self) -> std::sync::MutexGuard<'_, Vec<Arc<dyn Module>>> {
        self.modules.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
