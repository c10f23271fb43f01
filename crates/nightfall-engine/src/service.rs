//! Wires the engine together and drives it.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use nightfall_core::{Clock, SwitchEventArgs, SwitchSource};
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::component::ComponentManager;
use crate::config_store::ConfigStore;
use crate::governor::{FireHandle, GovernorContext};
use crate::interfaces::{
    AspectBackend, LightSensor, NightLightSource, Notifier, PowerBackend, ScriptRunner, StateStore, ThemeBackend,
};
use crate::modules::governor::GOVERNOR_MODULE;
use crate::modules::{
    BatteryMonitorModule, ConfigMonitorModule, GovernorModule, Module, ModuleTimer, TimerName, WardenModule,
};
use crate::postpone::{PostponeItem, PostponeManager, SESSION_LOCK};
use crate::state::GlobalState;
use crate::theme_manager::ThemeManager;

/// Everything the engine needs from the outside world.
pub struct Backends {
    pub theme: Arc<dyn ThemeBackend>,
    pub aspects: Arc<dyn AspectBackend>,
    pub scripts: Arc<dyn ScriptRunner>,
    pub power: Arc<dyn PowerBackend>,
    pub notifier: Arc<dyn Notifier>,
    pub store: Arc<dyn StateStore>,
    pub light_sensor: Option<Arc<dyn LightSensor>>,
    pub night_light: Option<Arc<dyn NightLightSource>>,
    pub clock: Arc<dyn Clock>,
}

/// The running scheduler: timers, modules, governors and the theme manager.
pub struct Service {
    config: Arc<ConfigStore>,
    state: Arc<GlobalState>,
    components: Arc<ComponentManager>,
    theme_manager: Arc<ThemeManager>,
    governor: Arc<GovernorModule>,
    warden: Arc<WardenModule>,
    config_monitor: Arc<ConfigMonitorModule>,
    timers: Vec<Arc<ModuleTimer>>,
    clock: Arc<dyn Clock>,
    config_wait: Duration,
    handle: Handle,
    shutdown: CancellationToken,
    fire_rx: Mutex<Option<UnboundedReceiver<()>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Service {
    /// Builds the engine. Must be called inside a tokio runtime.
    pub fn new(config: Arc<ConfigStore>, backends: Backends) -> Self {
        let handle = Handle::current();
        let snapshot = config.snapshot();

        let postpone = Arc::new(PostponeManager::with_store(
            backends.clock.clone(),
            backends.store.clone(),
        ));
        let state = Arc::new(GlobalState::new(postpone.clone()));
        match backends.store.load_learned_names() {
            Ok(names) => state.restore_learned_theme_names(names),
            Err(e) => tracing::warn!("Could not load learned theme names: {e}"),
        }

        let components = Arc::new(ComponentManager::with_defaults(backends.aspects, backends.scripts));
        components.update_settings(&snapshot);
        components.update_script_settings(&config.scripts());

        let theme_manager = Arc::new(ThemeManager::new(
            state.clone(),
            config.clone(),
            components.clone(),
            backends.theme,
            backends.power.clone(),
            backends.store,
            backends.clock.clone(),
        ));

        let (fire, fire_rx) = FireHandle::channel();
        let ctx = GovernorContext {
            state: state.clone(),
            config: config.clone(),
            clock: backends.clock.clone(),
            notifier: backends.notifier,
            light_sensor: backends.light_sensor,
            night_light: backends.night_light,
            fire,
            handle: handle.clone(),
        };

        let debug_ticks = snapshot.tunable.debug_timer_message;
        let timers = vec![
            Arc::new(ModuleTimer::new(TimerName::Main, snapshot.timers.main(), debug_ticks)),
            Arc::new(ModuleTimer::new(TimerName::Short, snapshot.timers.short(), debug_ticks)),
            Arc::new(ModuleTimer::new(TimerName::Io, snapshot.timers.io(), debug_ticks)),
        ];

        let governor = Arc::new(GovernorModule::new(ctx, theme_manager.clone()));
        let battery = Arc::new(BatteryMonitorModule::new(backends.power, theme_manager.clone()));
        let warden = Arc::new(WardenModule::new(
            config.clone(),
            postpone,
            timers.clone(),
            governor.clone(),
            battery,
        ));
        let config_monitor = Arc::new(ConfigMonitorModule::new(
            config.clone(),
            state.clone(),
            components.clone(),
            theme_manager.clone(),
            governor.clone(),
            warden.clone(),
        ));

        Self {
            config,
            state,
            components,
            theme_manager,
            governor,
            warden,
            config_monitor,
            timers,
            clock: backends.clock,
            config_wait: crate::api::CONFIG_WAIT,
            handle,
            shutdown: CancellationToken::new(),
            fire_rx: Mutex::new(Some(fire_rx)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// How long commands wait for a running configuration reload.
    pub fn with_config_wait(self, config_wait: Duration) -> Self {
        Self { config_wait, ..self }
    }

    pub fn config_wait(&self) -> Duration {
        self.config_wait
    }

    pub fn config(&self) -> &Arc<ConfigStore> {
        &self.config
    }

    pub fn state(&self) -> &Arc<GlobalState> {
        &self.state
    }

    pub fn theme_manager(&self) -> &Arc<ThemeManager> {
        &self.theme_manager
    }

    pub fn components(&self) -> &Arc<ComponentManager> {
        &self.components
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn timer(&self, name: TimerName) -> Option<&Arc<ModuleTimer>> {
        self.timers.iter().find(|t| t.name() == name)
    }

    /// Restores persisted state, registers the modules and performs the
    /// startup switch. Blocks while the first switch runs.
    pub fn start(&self) {
        let theme_at_exit = self.state.postpone().restore();
        if theme_at_exit.is_concrete() {
            tracing::info!("Theme at last exit was {theme_at_exit}");
            self.state.set_requested_theme(theme_at_exit);
        }
        self.components.run_enable_hooks();

        self.spawn_fire_pump();
        if let Some(main) = self.timer(TimerName::Main) {
            main.register(self.warden.clone());
        }
        if let Some(short) = self.timer(TimerName::Short) {
            short.register(self.config_monitor.clone());
        }
        self.theme_manager
            .request_switch(SwitchEventArgs::automatic(SwitchSource::Startup));

        let mut tasks = self.lock_tasks();
        for timer in &self.timers {
            tasks.push(timer.start(&self.handle));
        }
        tracing::info!("Scheduler started");
    }

    /// Drains out-of-band governor requests. Bursts collapse into one fire.
    fn spawn_fire_pump(&self) {
        let Some(mut rx) = self.fire_rx.lock().unwrap_or_else(PoisonError::into_inner).take() else {
            return;
        };
        let governor = self.governor.clone();
        let main = self.timer(TimerName::Main).cloned();
        let token = self.shutdown.clone();
        let join = self.handle.spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    msg = rx.recv() => {
                        if msg.is_none() {
                            break;
                        }
                        while rx.try_recv().is_ok() {}
                        if !main.as_ref().is_some_and(|t| t.is_registered(GOVERNOR_MODULE)) {
                            continue;
                        }
                        let g = governor.clone();
                        if let Err(e) = tokio::task::spawn_blocking(move || g.fire()).await {
                            tracing::error!("Governor fire panicked: {e}");
                        }
                    }
                }
            }
        });
        self.lock_tasks().push(join);
    }

    pub fn on_session_lock(&self) {
        tracing::info!("Session locked");
        self.state.postpone().add_item(PostponeItem::system(SESSION_LOCK));
    }

    pub fn on_session_unlock(&self) {
        tracing::info!("Session unlocked");
        self.state.postpone().remove(SESSION_LOCK);
        self.theme_manager
            .request_switch(SwitchEventArgs::automatic(SwitchSource::SystemUnlock));
    }

    pub fn on_system_resume(&self) {
        tracing::info!("System resumed");
        self.theme_manager
            .request_switch(SwitchEventArgs::automatic(SwitchSource::SystemResume));
    }

    pub fn on_time_changed(&self) {
        tracing::info!("System time changed");
        self.theme_manager.refresh_skip_next_expiry();
        self.theme_manager
            .request_switch(SwitchEventArgs::automatic(SwitchSource::SystemTimeChanged));
    }

    /// Cancelled when a client asked the service to exit.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn request_shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Stops every timer, runs module disable hooks and persists state.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        for timer in &self.timers {
            timer.dispose();
        }
        self.governor.disable_hook();
        for task in self.lock_tasks().drain(..) {
            task.abort();
        }
        self.state.postpone().flush_on_exit(self.state.requested_theme());
        tracing::info!("Scheduler stopped");
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiCommand, StatusCode};
    use crate::component::ComponentKind;
    use crate::mock::{
        ManualClock, MemoryAspectBackend, MemoryStore, MockPower, MockThemeBackend, RecordingNotifier,
        RecordingScriptRunner,
    };
    use crate::postpone::{SKIP_NEXT_SWITCH, DELAY_AUTO_SWITCH};
    use chrono::{NaiveDate, NaiveDateTime};
    use nightfall_core::{AppConfig, Theme};

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    struct Rig {
        service: Service,
        clock: Arc<ManualClock>,
        aspects: Arc<MemoryAspectBackend>,
        store: Arc<MemoryStore>,
    }

    fn rig(cfg: AppConfig) -> Rig {
        let clock = Arc::new(ManualClock::new(at(12, 0)));
        let aspects = Arc::new(MemoryAspectBackend::default());
        let store = Arc::new(MemoryStore::default());
        let backends = Backends {
            theme: Arc::new(MockThemeBackend::default()),
            aspects: aspects.clone(),
            scripts: Arc::new(RecordingScriptRunner::default()),
            power: Arc::new(MockPower::default()),
            notifier: Arc::new(RecordingNotifier::default()),
            store: store.clone(),
            light_sensor: None,
            night_light: None,
            clock: clock.clone(),
        };
        let service = Service::new(Arc::new(ConfigStore::new(cfg)), backends);
        Rig {
            service,
            clock,
            aspects,
            store,
        }
    }

    fn apps_enabled() -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.components.apps.enabled = true;
        cfg
    }

    impl Rig {
        fn apps(&self) -> Option<String> {
            self.aspects.value(ComponentKind::Apps)
        }
    }

    #[tokio::test]
    async fn start_registers_modules_and_switches() {
        let rig = rig(apps_enabled());
        rig.service.start();

        let main = rig.service.timer(TimerName::Main).unwrap();
        assert_eq!(main.module_names(), vec!["warden".to_string(), GOVERNOR_MODULE.to_string()]);
        assert!(rig
            .service
            .timer(TimerName::Short)
            .unwrap()
            .is_registered("config_monitor"));
        assert_eq!(rig.apps().as_deref(), Some("light"));
        rig.service.shutdown();
    }

    #[tokio::test]
    async fn manual_dark_survives_ticks_until_sunset() {
        let rig = rig(apps_enabled());
        rig.service.start();
        let main = rig.service.timer(TimerName::Main).unwrap().clone();

        assert_eq!(rig.service.handle(ApiCommand::Dark).status, StatusCode::Ok);
        assert_eq!(rig.apps().as_deref(), Some("dark"));

        rig.clock.set(at(15, 0));
        main.tick();
        assert_eq!(rig.apps().as_deref(), Some("dark"));

        // Skip expires one second after sunset; then dark is simply on schedule.
        rig.clock.set(at(19, 0));
        main.tick();
        assert_eq!(rig.apps().as_deref(), Some("dark"));
        rig.clock.set(at(19, 1));
        main.tick();
        assert!(!rig.service.state().postpone().is_skip_next_switch());
        rig.service.shutdown();
    }

    #[tokio::test]
    async fn forced_theme_and_release() {
        let rig = rig(apps_enabled());
        rig.service.start();

        rig.service.handle(ApiCommand::ForceDark);
        assert_eq!(rig.apps().as_deref(), Some("dark"));
        rig.service.timer(TimerName::Main).unwrap().tick();
        assert_eq!(rig.apps().as_deref(), Some("dark"));

        rig.service.handle(ApiCommand::NoForce);
        assert_eq!(rig.apps().as_deref(), Some("light"));
        rig.service.shutdown();
    }

    #[tokio::test]
    async fn delay_and_clear() {
        let rig = rig(apps_enabled());
        rig.service.start();

        rig.service.handle(ApiCommand::DelayBy(30));
        let item = rig.service.state().postpone().get(DELAY_AUTO_SWITCH).unwrap();
        assert_eq!(item.expiry, Some(at(12, 30)));

        let status = rig.service.handle(ApiCommand::PostponeStatus);
        assert_eq!(status.message.as_deref(), Some("true"));
        assert!(status.details.unwrap().contains(DELAY_AUTO_SWITCH));

        rig.service.handle(ApiCommand::ClearPostpone);
        assert!(!rig.service.state().postpone().is_postponed());
        rig.service.shutdown();
    }

    #[tokio::test]
    async fn extending_a_delay_never_switches_in_between() {
        let rig = rig(apps_enabled());
        rig.service.start();
        let main = rig.service.timer(TimerName::Main).unwrap().clone();

        rig.clock.set(at(18, 50));
        assert_eq!(rig.service.handle(ApiCommand::DelayBy(30)).status, StatusCode::Ok);
        rig.clock.set(at(19, 5));
        main.tick();
        assert_eq!(rig.apps().as_deref(), Some("light"));

        assert_eq!(rig.service.handle(ApiCommand::DelayBy(60)).status, StatusCode::Ok);
        assert_eq!(rig.apps().as_deref(), Some("light"));
        let item = rig.service.state().postpone().get(DELAY_AUTO_SWITCH).unwrap();
        assert_eq!(item.expiry, Some(at(20, 5)));
        rig.service.shutdown();
    }

    #[tokio::test]
    async fn oversized_delay_is_rejected() {
        let rig = rig(apps_enabled());
        rig.service.start();

        let response = rig.service.handle_message(&format!("/delayBy {}", i64::MAX));
        assert_eq!(response.status, StatusCode::Err);
        assert!(!rig.service.state().postpone().is_user_delayed());
        rig.service.shutdown();
    }

    #[tokio::test]
    async fn toggle_skip_next_flips() {
        let rig = rig(apps_enabled());
        rig.service.start();

        let on = rig.service.handle(ApiCommand::ToggleSkipNext);
        assert_eq!(on.message.as_deref(), Some("true"));
        assert!(rig.service.state().postpone().get(SKIP_NEXT_SWITCH).is_some());

        let off = rig.service.handle(ApiCommand::ToggleSkipNext);
        assert_eq!(off.message.as_deref(), Some("false"));
        rig.service.shutdown();
    }

    #[tokio::test]
    async fn session_lock_blocks_until_unlock() {
        let rig = rig(apps_enabled());
        rig.service.start();
        rig.service.on_session_lock();

        rig.clock.set(at(20, 0));
        rig.service.timer(TimerName::Main).unwrap().tick();
        assert_eq!(rig.apps().as_deref(), Some("light"));

        rig.service.on_session_unlock();
        assert_eq!(rig.apps().as_deref(), Some("dark"));
        rig.service.shutdown();
    }

    #[tokio::test]
    async fn shutdown_persists_user_postpones_and_theme() {
        let rig = rig(apps_enabled());
        rig.service.start();
        rig.service.handle(ApiCommand::Dark);
        rig.service.on_session_lock();
        rig.service.shutdown();

        let saved = rig.store.postpones().unwrap();
        assert_eq!(saved.theme_at_exit, Theme::Dark);
        assert_eq!(saved.items.len(), 1);
        assert_eq!(saved.items[0].reason, SKIP_NEXT_SWITCH);
    }

    #[tokio::test]
    async fn exit_command_cancels_token() {
        let rig = rig(AppConfig::default());
        let token = rig.service.shutdown_token();
        assert_eq!(rig.service.handle_message("/exit").status, StatusCode::Ok);
        assert!(token.is_cancelled());
        assert_eq!(rig.service.handle_message("/bogus").status, StatusCode::Err);
    }

    #[tokio::test]
    async fn blocked_gate_times_out_commands() {
        let rig = rig(AppConfig::default());
        let service = rig.service.with_config_wait(Duration::from_millis(20));
        let state = service.state().clone();
        let guard = state.config_gate().begin_update();
        assert_eq!(service.handle(ApiCommand::Alive).status, StatusCode::Timeout);

        drop(guard);
        assert_eq!(service.handle(ApiCommand::Alive).status, StatusCode::Ok);
    }
}
