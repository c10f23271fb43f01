//! Drives a complete engine through governors, timers, persistence and
//! commands, with in-memory desktop doubles.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{NaiveDate, NaiveDateTime};
use nightfall_core::{AppConfig, GovernorKind, Theme};
use nightfall_engine::interfaces::{LightSensor, NightLightSource, StateStore};
use nightfall_engine::mock::{
    ManualClock, MemoryAspectBackend, MockPower, MockThemeBackend, RecordingNotifier, RecordingScriptRunner,
    ScriptedLightSensor, ScriptedNightLight,
};
use nightfall_engine::modules::TimerName;
use nightfall_engine::store::JsonFileStore;
use nightfall_engine::{ApiCommand, Backends, ComponentKind, ConfigStore, Service, StatusCode};

fn at(h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 6, 1)
        .unwrap()
        .and_hms_opt(h, m, 0)
        .unwrap()
}

struct Desktop {
    clock: Arc<ManualClock>,
    aspects: Arc<MemoryAspectBackend>,
    power: Arc<MockPower>,
    light_sensor: Option<Arc<dyn LightSensor>>,
    night_light: Option<Arc<dyn NightLightSource>>,
    store: Arc<dyn StateStore>,
}

impl Desktop {
    fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            clock: Arc::new(ManualClock::new(at(12, 0))),
            aspects: Arc::new(MemoryAspectBackend::default()),
            power: Arc::new(MockPower::default()),
            light_sensor: None,
            night_light: None,
            store,
        }
    }

    fn service(&self, config: ConfigStore) -> Service {
        let backends = Backends {
            theme: Arc::new(MockThemeBackend::default()),
            aspects: self.aspects.clone(),
            scripts: Arc::new(RecordingScriptRunner::default()),
            power: self.power.clone(),
            notifier: Arc::new(RecordingNotifier::default()),
            store: self.store.clone(),
            light_sensor: self.light_sensor.clone(),
            night_light: self.night_light.clone(),
            clock: self.clock.clone(),
        };
        Service::new(Arc::new(config), backends)
    }

    fn apps(&self) -> Option<String> {
        self.aspects.value(ComponentKind::Apps)
    }
}

fn apps_enabled() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.components.apps.enabled = true;
    cfg
}

async fn eventually(check: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    check()
}

fn rewrite(path: &Path, body: &str) {
    std::fs::write(path, body).unwrap();
    let later = SystemTime::now() + Duration::from_secs(5);
    let file = std::fs::File::options().write(true).open(path).unwrap();
    file.set_modified(later).unwrap();
}

#[tokio::test]
async fn manual_theme_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let desktop = Desktop::new(Arc::new(JsonFileStore::new(dir.path())));

    let first = desktop.service(ConfigStore::new(apps_enabled()));
    first.start();
    assert_eq!(desktop.apps().as_deref(), Some("light"));
    assert_eq!(first.handle(ApiCommand::Dark).status, StatusCode::Ok);
    first.shutdown();

    let restarted = Desktop::new(Arc::new(JsonFileStore::new(dir.path())));
    restarted.clock.set(at(13, 0));
    let second = restarted.service(ConfigStore::new(apps_enabled()));
    second.start();
    assert_eq!(restarted.apps().as_deref(), Some("dark"));
    assert!(second.state().postpone().is_skip_next_switch());
    assert_eq!(second.handle_message("/requestedTheme").message.as_deref(), Some("dark"));
    second.shutdown();
}

#[tokio::test]
async fn battery_drain_forces_dark() {
    let desktop = Desktop::new(Arc::new(nightfall_engine::mock::MemoryStore::default()));
    let mut cfg = apps_enabled();
    cfg.events.dark_theme_on_battery = true;
    let service = desktop.service(ConfigStore::new(cfg));
    service.start();
    assert_eq!(desktop.apps().as_deref(), Some("light"));

    let short = service.timer(TimerName::Short).unwrap().clone();
    desktop.power.set_discharging(true);
    short.tick();
    assert_eq!(desktop.apps().as_deref(), Some("dark"));

    desktop.power.set_discharging(false);
    short.tick();
    assert_eq!(desktop.apps().as_deref(), Some("light"));
    service.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn night_light_flip_switches_after_the_window_opens() {
    let night_light = Arc::new(ScriptedNightLight::new(false));
    let mut desktop = Desktop::new(Arc::new(nightfall_engine::mock::MemoryStore::default()));
    desktop.night_light = Some(night_light.clone());
    let mut cfg = apps_enabled();
    cfg.governor = GovernorKind::NightLight;
    cfg.timers.short_secs = 1;
    let service = desktop.service(ConfigStore::new(cfg));
    service.start();
    assert_eq!(desktop.apps().as_deref(), Some("light"));

    night_light.set(true);
    let state = service.state().clone();
    assert!(eventually(|| state.theme_switch_approaching()).await);
    assert_eq!(state.governor_report(GovernorKind::NightLight), Theme::Dark);

    service.timer(TimerName::Main).unwrap().tick();
    assert_eq!(desktop.apps().as_deref(), Some("dark"));
    service.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn threshold_change_reaches_the_ambient_governor() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nightfall.toml");
    let base = "governor = \"ambient_light\"\n[components.apps]\nenabled = true\n";
    std::fs::write(&path, base).unwrap();

    let mut desktop = Desktop::new(Arc::new(JsonFileStore::new(dir.path().join("data"))));
    desktop.light_sensor = Some(Arc::new(ScriptedLightSensor::new(Some(20.0))));
    let service = desktop.service(ConfigStore::from_path(&path));
    service.start();
    assert_eq!(desktop.apps().as_deref(), Some("light"));

    rewrite(&path, &format!("{base}[ambient_light]\ndark_threshold = 30.0\n"));
    service.timer(TimerName::Short).unwrap().tick();

    assert!(eventually(|| desktop.apps().as_deref() == Some("dark")).await);
    assert_eq!(service.state().last_lux(), Some(20.0));
    service.shutdown();
}

#[tokio::test]
async fn commands_round_trip_as_messages() {
    let desktop = Desktop::new(Arc::new(nightfall_engine::mock::MemoryStore::default()));
    let service = desktop.service(ConfigStore::new(apps_enabled()));
    service.start();

    assert_eq!(service.handle_message("/forceDark").status, StatusCode::Ok);
    assert_eq!(desktop.apps().as_deref(), Some("dark"));
    assert_eq!(service.handle_message("/noForce").status, StatusCode::Ok);
    assert_eq!(desktop.apps().as_deref(), Some("light"));

    assert_eq!(service.handle_message("/delayBy 15").status, StatusCode::Ok);
    let status = service.handle_message("/postponeStatus");
    assert_eq!(status.message.as_deref(), Some("true"));
    assert_eq!(service.handle_message("/clearPostpone").status, StatusCode::Ok);
    assert_eq!(
        service.handle_message("/postponeStatus").message.as_deref(),
        Some("false")
    );

    assert_eq!(service.handle_message("/locationAccess").status, StatusCode::NoLocAccess);
    assert_eq!(service.handle_message("/delayBy").status, StatusCode::Err);
    service.shutdown();
}
