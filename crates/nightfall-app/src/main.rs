mod backends;
mod cli;
mod transport;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use nightfall_core::{lifecycle, AppConfig, Clock, SystemClock};
use nightfall_engine::component::ProcessScriptRunner;
use nightfall_engine::interfaces::LightSensor;
use nightfall_engine::store::JsonFileStore;
use nightfall_engine::sun::TimedThemeState;
use nightfall_engine::{ApiCommand, Backends, ConfigStore, Service};

use backends::{FileAspectBackend, FileThemeBackend, IioLightSensor, LogNotifier, SysfsPower};
use cli::{Cli, Commands};
use transport::{CommandTransport, StdioTransport};

const DEFAULT_CONFIG_PATH: &str = "config/nightfall.toml";

fn backends_for(data_dir: &Path) -> Backends {
    let light_sensor = IioLightSensor::discover().map(|s| Arc::new(s) as Arc<dyn LightSensor>);
    if light_sensor.is_none() {
        tracing::debug!("No ambient light sensor found");
    }
    Backends {
        theme: Arc::new(FileThemeBackend::new(data_dir)),
        aspects: Arc::new(FileAspectBackend::new(data_dir)),
        scripts: Arc::new(ProcessScriptRunner),
        power: Arc::new(SysfsPower::new()),
        notifier: Arc::new(LogNotifier),
        store: Arc::new(JsonFileStore::new(data_dir)),
        light_sensor,
        night_light: None,
        clock: Arc::new(SystemClock),
    }
}

async fn run(config_path: PathBuf, data_dir: Option<PathBuf>) -> Result<()> {
    lifecycle::log_startup();
    let config = Arc::new(ConfigStore::from_path(config_path));
    let data_dir = data_dir.unwrap_or_else(|| config.snapshot().storage.data_dir.clone());
    tracing::info!("Keeping state in {}", data_dir.display());

    let service = Arc::new(Service::new(config, backends_for(&data_dir)));
    let svc = service.clone();
    tokio::task::spawn_blocking(move || svc.start()).await?;

    let signal_service = service.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted");
            signal_service.request_shutdown();
        }
    });

    let mut transport = StdioTransport::stdio();
    let served = transport.serve(service.clone()).await;

    let svc = service.clone();
    tokio::task::spawn_blocking(move || svc.shutdown()).await?;
    lifecycle::log_shutdown();
    served
}

fn check_config(config: &AppConfig) -> Result<()> {
    println!("{}", toml::to_string_pretty(config)?);

    let now = SystemClock.now();
    let state = TimedThemeState::compute(config, now);
    println!("# sunrise: {}", state.sunrise.format("%H:%M"));
    println!("# sunset: {}", state.sunset.format("%H:%M"));
    println!("# theme now: {}", state.target);
    println!("# next switch: {}", state.next_switch.format("%Y-%m-%d %H:%M"));
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    lifecycle::init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { data_dir } => {
            let config_path = cli.config.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
            run(config_path, data_dir).await?;
            // A pending stdin read cannot be cancelled and would keep the
            // runtime from shutting down.
            std::process::exit(0);
        }
        Commands::CheckConfig => {
            let config = AppConfig::load_or_default(cli.config.as_deref());
            check_config(&config)?;
        }
        Commands::ParseCommand { message } => {
            let command = ApiCommand::parse(&message)?;
            println!("{command:?}");
        }
    }

    Ok(())
}
