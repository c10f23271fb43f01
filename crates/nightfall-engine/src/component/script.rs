use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use nightfall_core::{ScriptEntry, SwitchEventArgs, Theme};

use super::{BaseSettings, ComponentHandler, ComponentKind, SettingsSource};
use crate::interfaces::ScriptRunner;

/// Runs user scripts after a switch.
///
/// Remembers the last theme it ran for so a tick with an unchanged theme
/// does not spawn anything. The memory resets on enable, disable and
/// reloads that change the script list.
pub struct ScriptSwitch {
    runner: Arc<dyn ScriptRunner>,
    scripts: Vec<ScriptEntry>,
    last_theme: Theme,
}

impl ScriptSwitch {
    pub fn new(runner: Arc<dyn ScriptRunner>) -> Self {
        Self {
            runner,
            scripts: Vec::new(),
            last_theme: Theme::Unknown,
        }
    }
}

impl ComponentHandler for ScriptSwitch {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Script
    }

    fn configure(&mut self, source: SettingsSource<'_>) -> Option<BaseSettings> {
        let SettingsSource::Scripts(config) = source else {
            return None;
        };
        if self.scripts != config.scripts {
            self.scripts = config.scripts.clone();
            self.last_theme = Theme::Unknown;
        }
        Some(BaseSettings {
            enabled: config.enabled,
            priority_to_light: config.priority_to_light,
            priority_to_dark: config.priority_to_dark,
        })
    }

    fn needs_update(&self, theme: Theme) -> bool {
        theme.is_concrete() && self.last_theme != theme
    }

    fn handle_switch(&mut self, theme: Theme, e: &SwitchEventArgs) -> anyhow::Result<()> {
        for script in self.scripts.iter().filter(|s| s.allows(e.source())) {
            let args = match theme {
                Theme::Dark => &script.args_dark,
                _ => &script.args_light,
            };
            match self.runner.run(script, args) {
                Ok(()) => tracing::info!("Script {} ran for {theme}", script.name),
                Err(err) => tracing::warn!("Script {} failed: {err}", script.name),
            }
        }
        self.last_theme = theme;
        Ok(())
    }

    fn enable_hook(&mut self) -> anyhow::Result<()> {
        self.last_theme = Theme::Unknown;
        Ok(())
    }

    fn disable_hook(&mut self) -> anyhow::Result<()> {
        self.last_theme = Theme::Unknown;
        Ok(())
    }
}

/// Spawns scripts as child processes and kills them after their timeout.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessScriptRunner;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

impl ScriptRunner for ProcessScriptRunner {
    fn run(&self, script: &ScriptEntry, args: &[String]) -> anyhow::Result<()> {
        let mut cmd = Command::new(&script.command);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(dir) = &script.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to start {}", script.command))?;
        let deadline = Instant::now() + script.timeout();
        loop {
            if let Some(status) = child.try_wait()? {
                if status.success() {
                    return Ok(());
                }
                bail!("{} exited with {status}", script.command);
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                bail!("{} timed out after {}s", script.command, script.timeout().as_secs());
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}
