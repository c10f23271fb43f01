//! In-memory doubles for every collaborator trait, for unit and
//! integration tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::bail;
use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime};
use nightfall_core::{AppConfig, Clock, ScriptEntry, SwitchEventArgs, Theme};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::component::{BaseSettings, ComponentHandler, ComponentKind, ComponentManager, SettingsSource};
use crate::config_store::ConfigStore;
use crate::governor::{FireHandle, GovernorContext};
use crate::interfaces::{
    AspectBackend, LightSensor, NightLightSource, Notifier, PowerBackend, ScriptRunner, StateStore, ThemeBackend,
};
use crate::modules::{Module, TimerName};
use crate::postpone::{PostponeManager, PostponeSnapshot};
use crate::state::GlobalState;
use crate::theme_manager::ThemeManager;

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<NaiveDateTime>,
}

impl ManualClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock().unwrap() = now;
    }

    pub fn advance(&self, by: ChronoDuration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(
            NaiveDate::from_ymd_opt(2024, 6, 1)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap(),
        )
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap()
    }
}

#[derive(Default)]
pub struct MemoryStore {
    postpones: Mutex<Option<PostponeSnapshot>>,
    learned: Mutex<HashMap<Theme, String>>,
}

impl MemoryStore {
    pub fn postpones(&self) -> Option<PostponeSnapshot> {
        self.postpones.lock().unwrap().clone()
    }

    pub fn learned(&self) -> HashMap<Theme, String> {
        self.learned.lock().unwrap().clone()
    }
}

impl StateStore for MemoryStore {
    fn load_postpones(&self) -> anyhow::Result<Option<PostponeSnapshot>> {
        Ok(self.postpones())
    }

    fn save_postpones(&self, snapshot: &PostponeSnapshot) -> anyhow::Result<()> {
        *self.postpones.lock().unwrap() = Some(snapshot.clone());
        Ok(())
    }

    fn load_learned_names(&self) -> anyhow::Result<HashMap<Theme, String>> {
        Ok(self.learned())
    }

    fn save_learned_names(&self, names: &HashMap<Theme, String>) -> anyhow::Result<()> {
        *self.learned.lock().unwrap() = names.clone();
        Ok(())
    }
}

/// Module that appends its name to a shared log when fired.
pub struct RecordingModule {
    name: String,
    log: Arc<Mutex<Vec<String>>>,
    priority: i32,
    fire_on_registration: bool,
}

impl RecordingModule {
    pub fn new(name: &str, log: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            name: name.to_string(),
            log,
            priority: 0,
            fire_on_registration: false,
        }
    }

    pub fn with_priority(self, priority: i32) -> Self {
        Self { priority, ..self }
    }

    pub fn firing_on_registration(self) -> Self {
        Self {
            fire_on_registration: true,
            ..self
        }
    }
}

impl Module for RecordingModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn timer_affinity(&self) -> TimerName {
        TimerName::Main
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn fire_on_registration(&self) -> bool {
        self.fire_on_registration
    }

    fn fire(&self) {
        self.log.lock().unwrap().push(self.name.clone());
    }
}

struct ProbeState {
    enabled: bool,
    enables: usize,
    disables: usize,
    switches: Vec<Theme>,
}

/// Observes a [`ScriptedHandler`] after it was boxed into a component.
#[derive(Clone)]
pub struct HandlerProbe {
    state: Arc<Mutex<ProbeState>>,
}

impl HandlerProbe {
    pub fn enables(&self) -> usize {
        self.state.lock().unwrap().enables
    }

    pub fn disables(&self) -> usize {
        self.state.lock().unwrap().disables
    }

    pub fn switches(&self) -> Vec<Theme> {
        self.state.lock().unwrap().switches.clone()
    }

    /// Takes effect on the next `configure`.
    pub fn set_enabled(&self, enabled: bool) {
        self.state.lock().unwrap().enabled = enabled;
    }
}

/// Component handler that needs an update whenever the theme differs from
/// the last one it applied.
pub struct ScriptedHandler {
    kind: ComponentKind,
    priority: i32,
    failing: bool,
    last: Theme,
    probe: HandlerProbe,
}

impl ScriptedHandler {
    pub fn new(kind: ComponentKind) -> Self {
        Self {
            kind,
            priority: 0,
            failing: false,
            last: Theme::Unknown,
            probe: HandlerProbe {
                state: Arc::new(Mutex::new(ProbeState {
                    enabled: true,
                    enables: 0,
                    disables: 0,
                    switches: Vec::new(),
                })),
            },
        }
    }

    pub fn with_priority(self, priority: i32) -> Self {
        Self { priority, ..self }
    }

    pub fn failing(self) -> Self {
        Self { failing: true, ..self }
    }

    pub fn probe(&self) -> HandlerProbe {
        self.probe.clone()
    }
}

impl ComponentHandler for ScriptedHandler {
    fn kind(&self) -> ComponentKind {
        self.kind
    }

    fn configure(&mut self, source: SettingsSource<'_>) -> Option<BaseSettings> {
        match source {
            SettingsSource::App(_) => Some(BaseSettings {
                enabled: self.probe.state.lock().unwrap().enabled,
                priority_to_light: self.priority,
                priority_to_dark: self.priority,
            }),
            SettingsSource::Scripts(_) => None,
        }
    }

    fn needs_update(&self, theme: Theme) -> bool {
        self.last != theme
    }

    fn handle_switch(&mut self, theme: Theme, _e: &SwitchEventArgs) -> anyhow::Result<()> {
        self.probe.state.lock().unwrap().switches.push(theme);
        if self.failing {
            bail!("{} refused to switch", self.kind);
        }
        self.last = theme;
        Ok(())
    }

    fn enable_hook(&mut self) -> anyhow::Result<()> {
        self.probe.state.lock().unwrap().enables += 1;
        Ok(())
    }

    fn disable_hook(&mut self) -> anyhow::Result<()> {
        self.probe.state.lock().unwrap().disables += 1;
        self.last = Theme::Unknown;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryAspectBackend {
    values: Mutex<HashMap<ComponentKind, String>>,
    fail_reads: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryAspectBackend {
    pub fn value(&self, kind: ComponentKind) -> Option<String> {
        self.values.lock().unwrap().get(&kind).cloned()
    }

    pub fn set(&self, kind: ComponentKind, value: &str) {
        self.values.lock().unwrap().insert(kind, value.to_string());
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl AspectBackend for MemoryAspectBackend {
    fn current(&self, kind: ComponentKind) -> anyhow::Result<Option<String>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            bail!("{kind} cannot be read");
        }
        Ok(self.value(kind))
    }

    fn apply(&self, kind: ComponentKind, value: &str) -> anyhow::Result<()> {
        self.set(kind, value);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Theme backend that names themes after their variant.
#[derive(Default)]
pub struct MockThemeBackend {
    active: Mutex<Theme>,
    applied: Mutex<Vec<(Theme, bool)>>,
    saved: Mutex<Vec<Theme>>,
}

impl MockThemeBackend {
    /// Every `apply_theme` call with its `skip_check` flag.
    pub fn applied(&self) -> Vec<(Theme, bool)> {
        self.applied.lock().unwrap().clone()
    }

    pub fn saved(&self) -> Vec<Theme> {
        self.saved.lock().unwrap().clone()
    }
}

impl ThemeBackend for MockThemeBackend {
    fn apply_theme(&self, _config: &AppConfig, theme: Theme, skip_check: bool) -> anyhow::Result<bool> {
        self.applied.lock().unwrap().push((theme, skip_check));
        let mut active = self.active.lock().unwrap();
        let changed = skip_check || *active != theme;
        *active = theme;
        Ok(changed)
    }

    fn current_theme_name(&self) -> anyhow::Result<String> {
        Ok(format!("Mock {}", *self.active.lock().unwrap()))
    }

    fn save_managed_theme(&self, theme: Theme) -> anyhow::Result<()> {
        self.saved.lock().unwrap().push(theme);
        *self.active.lock().unwrap() = theme;
        Ok(())
    }
}

#[derive(Default)]
pub struct MockPower {
    discharging: AtomicBool,
    energy_saver: AtomicBool,
    restores: AtomicUsize,
}

impl MockPower {
    pub fn set_discharging(&self, discharging: bool) {
        self.discharging.store(discharging, Ordering::SeqCst);
    }

    pub fn set_energy_saver(&self, on: bool) {
        self.energy_saver.store(on, Ordering::SeqCst);
    }

    pub fn energy_saver(&self) -> bool {
        self.energy_saver.load(Ordering::SeqCst)
    }

    pub fn restores(&self) -> usize {
        self.restores.load(Ordering::SeqCst)
    }
}

impl PowerBackend for MockPower {
    fn battery_discharging(&self) -> anyhow::Result<bool> {
        Ok(self.discharging.load(Ordering::SeqCst))
    }

    fn disable_energy_saver(&self) -> anyhow::Result<bool> {
        Ok(self.energy_saver.swap(false, Ordering::SeqCst))
    }

    fn restore_energy_saver(&self) -> anyhow::Result<()> {
        self.energy_saver.store(true, Ordering::SeqCst);
        self.restores.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct ScriptedLightSensor {
    lux: Mutex<Option<f64>>,
}

impl ScriptedLightSensor {
    pub fn new(lux: Option<f64>) -> Self {
        Self { lux: Mutex::new(lux) }
    }

    pub fn set(&self, lux: Option<f64>) {
        *self.lux.lock().unwrap() = lux;
    }
}

impl LightSensor for ScriptedLightSensor {
    fn read_lux(&self) -> anyhow::Result<Option<f64>> {
        Ok(*self.lux.lock().unwrap())
    }
}

pub struct ScriptedNightLight {
    enabled: AtomicBool,
    fail: AtomicBool,
}

impl ScriptedNightLight {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            fail: AtomicBool::new(false),
        }
    }

    pub fn set(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl NightLightSource for ScriptedNightLight {
    fn is_enabled(&self) -> anyhow::Result<bool> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("night light state unavailable");
        }
        Ok(self.enabled.load(Ordering::SeqCst))
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<(Theme, Option<NaiveDateTime>)>>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<(Theme, Option<NaiveDateTime>)> {
        self.notices.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn switch_approaching(&self, target: Theme, at: Option<NaiveDateTime>) {
        self.notices.lock().unwrap().push((target, at));
    }
}

#[derive(Default)]
pub struct RecordingScriptRunner {
    calls: Mutex<Vec<(String, Vec<String>)>>,
    fail_on: Option<String>,
}

impl RecordingScriptRunner {
    /// Records every call but fails the script named `name`.
    pub fn failing_on(name: &str) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_on: Some(name.to_string()),
        }
    }

    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().unwrap().clone()
    }
}

impl ScriptRunner for RecordingScriptRunner {
    fn run(&self, script: &ScriptEntry, args: &[String]) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push((script.name.clone(), args.to_vec()));
        if self.fail_on.as_deref() == Some(script.name.as_str()) {
            bail!("{} exited with 1", script.name);
        }
        Ok(())
    }
}

/// A governor context over doubles. Must be created inside a tokio runtime.
pub struct GovernorHarness {
    pub ctx: GovernorContext,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<RecordingNotifier>,
    /// Receives one message per out-of-band fire request.
    pub fires: UnboundedReceiver<()>,
}

impl GovernorHarness {
    pub fn new(config: AppConfig) -> Self {
        let clock = Arc::new(ManualClock::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let postpone = Arc::new(PostponeManager::new(clock.clone()));
        let (fire, fires) = FireHandle::channel();
        let ctx = GovernorContext {
            state: Arc::new(GlobalState::new(postpone)),
            config: Arc::new(ConfigStore::new(config)),
            clock: clock.clone(),
            notifier: notifier.clone(),
            light_sensor: None,
            night_light: None,
            fire,
            handle: tokio::runtime::Handle::current(),
        };
        Self {
            ctx,
            clock,
            notifier,
            fires,
        }
    }
}

/// Doubles behind a [`ThemeManager`] built by [`GovernorHarness::scheduler`].
pub struct SchedulerDoubles {
    pub aspects: Arc<MemoryAspectBackend>,
    pub power: Arc<MockPower>,
    pub themes: Arc<MockThemeBackend>,
    pub store: Arc<MemoryStore>,
}

impl GovernorHarness {
    /// A theme manager over the harness state, config and clock, with the
    /// default component set configured from the current config.
    pub fn scheduler(&self) -> (Arc<ThemeManager>, SchedulerDoubles) {
        let doubles = SchedulerDoubles {
            aspects: Arc::new(MemoryAspectBackend::default()),
            power: Arc::new(MockPower::default()),
            themes: Arc::new(MockThemeBackend::default()),
            store: Arc::new(MemoryStore::default()),
        };
        let components = Arc::new(ComponentManager::with_defaults(
            doubles.aspects.clone(),
            Arc::new(RecordingScriptRunner::default()),
        ));
        components.update_settings(&self.ctx.config.snapshot());
        let tm = ThemeManager::new(
            self.ctx.state.clone(),
            self.ctx.config.clone(),
            components,
            doubles.themes.clone(),
            doubles.power.clone(),
            doubles.store.clone(),
            self.clock.clone(),
        );
        (Arc::new(tm), doubles)
    }
}
