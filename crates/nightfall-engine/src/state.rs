use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock};
use std::time::Duration;

use nightfall_core::{GovernorKind, Theme};

use crate::postpone::PostponeManager;

type FlagListener = Box<dyn Fn(bool) + Send + Sync>;

/// Boolean that notifies listeners only when its value actually changes.
///
/// Listeners run under the same lock that performs the write, so they
/// observe changes in order. They must not touch the flag themselves.
pub struct WatchedFlag {
    inner: Mutex<WatchedInner>,
}

struct WatchedInner {
    value: bool,
    listeners: Vec<FlagListener>,
}

impl WatchedFlag {
    pub fn new(value: bool) -> Self {
        Self {
            inner: Mutex::new(WatchedInner {
                value,
                listeners: Vec::new(),
            }),
        }
    }

    pub fn get(&self) -> bool {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).value
    }

    /// Returns whether the value changed.
    pub fn set(&self, value: bool) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.value == value {
            return false;
        }
        inner.value = value;
        for listener in &inner.listeners {
            listener(value);
        }
        true
    }

    pub fn subscribe(&self, listener: impl Fn(bool) + Send + Sync + 'static) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .listeners
            .push(Box::new(listener));
    }
}

impl Default for WatchedFlag {
    fn default() -> Self {
        Self::new(false)
    }
}

/// Closed while a configuration reload is in progress.
pub struct ConfigGate {
    updating: Mutex<bool>,
    ready: Condvar,
}

impl ConfigGate {
    pub fn new() -> Self {
        Self {
            updating: Mutex::new(false),
            ready: Condvar::new(),
        }
    }

    /// Closes the gate until the returned guard is dropped.
    pub fn begin_update(&self) -> ConfigUpdateGuard<'_> {
        *self.updating.lock().unwrap_or_else(PoisonError::into_inner) = true;
        ConfigUpdateGuard { gate: self }
    }

    pub fn is_updating(&self) -> bool {
        *self.updating.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks until no reload is running. Returns `false` on timeout.
    pub fn wait_ready(&self, timeout: Duration) -> bool {
        let guard = self.updating.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = self
            .ready
            .wait_timeout_while(guard, timeout, |updating| *updating)
            .unwrap_or_else(PoisonError::into_inner);
        !*guard
    }

    fn finish(&self) {
        *self.updating.lock().unwrap_or_else(PoisonError::into_inner) = false;
        self.ready.notify_all();
    }
}

impl Default for ConfigGate {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ConfigUpdateGuard<'a> {
    gate: &'a ConfigGate,
}

impl Drop for ConfigUpdateGuard<'_> {
    fn drop(&mut self) {
        self.gate.finish();
    }
}

/// Process-wide scheduler state, constructed once and shared by `Arc`.
pub struct GlobalState {
    requested_theme: RwLock<Theme>,
    forced_theme: RwLock<Theme>,
    governor_reports: RwLock<HashMap<GovernorKind, Theme>>,
    last_lux: Mutex<Option<f64>>,
    theme_switch_approaching: AtomicBool,
    learned_theme_names: RwLock<HashMap<Theme, String>>,
    config_gate: ConfigGate,
    postpone: Arc<PostponeManager>,
}

impl GlobalState {
    pub fn new(postpone: Arc<PostponeManager>) -> Self {
        Self {
            requested_theme: RwLock::new(Theme::Unknown),
            forced_theme: RwLock::new(Theme::Unknown),
            governor_reports: RwLock::new(HashMap::new()),
            last_lux: Mutex::new(None),
            theme_switch_approaching: AtomicBool::new(false),
            learned_theme_names: RwLock::new(HashMap::new()),
            config_gate: ConfigGate::new(),
            postpone,
        }
    }

    pub fn postpone(&self) -> &Arc<PostponeManager> {
        &self.postpone
    }

    /// The theme most recently handed to the theme manager.
    pub fn requested_theme(&self) -> Theme {
        *self.requested_theme.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_requested_theme(&self, theme: Theme) {
        *self.requested_theme.write().unwrap_or_else(PoisonError::into_inner) = theme;
    }

    /// `Unknown` means no override.
    pub fn forced_theme(&self) -> Theme {
        *self.forced_theme.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_forced_theme(&self, theme: Theme) {
        *self.forced_theme.write().unwrap_or_else(PoisonError::into_inner) = theme;
    }

    pub fn governor_report(&self, kind: GovernorKind) -> Theme {
        self.governor_reports
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .copied()
            .unwrap_or_default()
    }

    pub fn set_governor_report(&self, kind: GovernorKind, theme: Theme) {
        self.governor_reports
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind, theme);
    }

    pub fn last_lux(&self) -> Option<f64> {
        *self.last_lux.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_last_lux(&self, lux: f64) {
        *self.last_lux.lock().unwrap_or_else(PoisonError::into_inner) = Some(lux);
    }

    pub fn theme_switch_approaching(&self) -> bool {
        self.theme_switch_approaching.load(Ordering::SeqCst)
    }

    pub fn set_theme_switch_approaching(&self, approaching: bool) {
        self.theme_switch_approaching.store(approaching, Ordering::SeqCst);
    }

    pub fn learned_theme_names(&self) -> HashMap<Theme, String> {
        self.learned_theme_names
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns whether the name was new for that theme.
    pub fn learn_theme_name(&self, theme: Theme, name: &str) -> bool {
        let mut names = self
            .learned_theme_names
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if names.get(&theme).map(String::as_str) == Some(name) {
            return false;
        }
        names.insert(theme, name.to_string());
        true
    }

    pub fn restore_learned_theme_names(&self, names: HashMap<Theme, String>) {
        *self
            .learned_theme_names
            .write()
            .unwrap_or_else(PoisonError::into_inner) = names;
    }

    pub fn config_gate(&self) -> &ConfigGate {
        &self.config_gate
    }

    /// Subscribes to transitions of the "switching is postponed" flag.
    pub fn on_postponed_changed(&self, listener: impl Fn(bool) + Send + Sync + 'static) {
        self.postpone.postponed_flag().subscribe(listener);
    }
}
