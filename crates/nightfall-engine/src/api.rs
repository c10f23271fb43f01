//! Transport-independent command surface.
//!
//! Commands arrive as short tokens (`/switch`, `/dark`, `/delayBy 30`) and
//! every one of them gets exactly one [`ApiResponse`].

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use nightfall_core::{SwitchEventArgs, SwitchSource, Theme};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::postpone::{PostponeItem, DELAY_AUTO_SWITCH};
use crate::service::Service;

/// Default wait for a running configuration reload.
pub const CONFIG_WAIT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCommand {
    /// Re-evaluate and apply whatever the scheduler resolves.
    Switch,
    /// Flip the theme and pause automatic switching if needed.
    Swap,
    Light,
    Dark,
    ForceLight,
    ForceDark,
    NoForce,
    /// Delay automatic switching by this many minutes.
    DelayBy(i64),
    ToggleSkipNext,
    ClearPostpone,
    PostponeStatus,
    RequestedTheme,
    LearnedThemeNames,
    LocationAccess,
    Alive,
    Exit,
}

impl ApiCommand {
    pub fn parse(message: &str) -> EngineResult<Self> {
        message.parse()
    }
}

impl FromStr for ApiCommand {
    type Err = EngineError;

    fn from_str(message: &str) -> Result<Self, Self::Err> {
        let message = message.trim();
        let (token, arg) = match message.split_once(char::is_whitespace) {
            Some((token, arg)) => (token, arg.trim()),
            None => (message, ""),
        };
        let command = match token {
            "/switch" => ApiCommand::Switch,
            "/swap" => ApiCommand::Swap,
            "/light" => ApiCommand::Light,
            "/dark" => ApiCommand::Dark,
            "/forceLight" => ApiCommand::ForceLight,
            "/forceDark" => ApiCommand::ForceDark,
            "/noForce" => ApiCommand::NoForce,
            "/delayBy" => {
                let minutes = arg.parse::<i64>().map_err(|_| EngineError::InvalidArgument {
                    command: token.to_string(),
                    reason: format!("expected minutes, got {arg:?}"),
                })?;
                if minutes <= 0 {
                    return Err(EngineError::InvalidArgument {
                        command: token.to_string(),
                        reason: "minutes must be positive".to_string(),
                    });
                }
                ApiCommand::DelayBy(minutes)
            }
            "/toggleSkipNext" => ApiCommand::ToggleSkipNext,
            "/clearPostpone" => ApiCommand::ClearPostpone,
            "/postponeStatus" => ApiCommand::PostponeStatus,
            "/requestedTheme" => ApiCommand::RequestedTheme,
            "/learnedThemeNames" => ApiCommand::LearnedThemeNames,
            "/locationAccess" => ApiCommand::LocationAccess,
            "/alive" => ApiCommand::Alive,
            "/exit" => ApiCommand::Exit,
            _ => return Err(EngineError::UnknownCommand(message.to_string())),
        };
        if !arg.is_empty() && !matches!(command, ApiCommand::DelayBy(_)) {
            return Err(EngineError::InvalidArgument {
                command: token.to_string(),
                reason: "takes no argument".to_string(),
            });
        }
        Ok(command)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusCode {
    Ok,
    Err,
    Timeout,
    NoLocAccess,
    InProgress,
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StatusCode::Ok => "Ok",
            StatusCode::Err => "Err",
            StatusCode::Timeout => "Timeout",
            StatusCode::NoLocAccess => "NoLocAccess",
            StatusCode::InProgress => "InProgress",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub status: StatusCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiResponse {
    pub fn ok() -> Self {
        Self::new(StatusCode::Ok)
    }

    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            message: None,
            details: None,
        }
    }

    pub fn with_message(self, message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..self
        }
    }

    pub fn with_details(self, details: impl Into<String>) -> Self {
        Self {
            details: Some(details.into()),
            ..self
        }
    }

    pub fn error(e: &EngineError) -> Self {
        Self::new(StatusCode::Err).with_message(e.to_string())
    }
}

/// One line of JSON.
impl fmt::Display for ApiResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => f.write_str(&json),
            Err(_) => write!(f, "{{\"status\":\"{}\"}}", self.status),
        }
    }
}

impl Service {
    /// Parses and runs one command message.
    pub fn handle_message(&self, message: &str) -> ApiResponse {
        match ApiCommand::parse(message) {
            Ok(command) => self.handle(command),
            Err(e) => {
                tracing::debug!("Rejected command {message:?}: {e}");
                ApiResponse::error(&e)
            }
        }
    }

    /// Runs `command` once no configuration reload is in progress.
    ///
    /// Blocks while the scheduler applies a theme.
    pub fn handle(&self, command: ApiCommand) -> ApiResponse {
        if !self.state().config_gate().wait_ready(self.config_wait()) {
            tracing::warn!("Configuration reload still running, dropping {command:?}");
            return ApiResponse::new(StatusCode::Timeout).with_message("configuration update in progress");
        }

        let state = self.state();
        let tm = self.theme_manager();
        let postpone = state.postpone();
        match command {
            ApiCommand::Switch => {
                tracing::info!("Signal received: switch request");
                tm.request_switch(SwitchEventArgs::automatic(SwitchSource::Manual));
                ApiResponse::ok()
            }
            ApiCommand::Swap => {
                tracing::info!("Signal received: swap theme");
                let theme = tm.switch_theme_auto_pause(Theme::Unknown, SwitchSource::Api);
                ApiResponse::ok().with_message(theme.to_string())
            }
            ApiCommand::Light | ApiCommand::Dark => {
                let theme = if command == ApiCommand::Light { Theme::Light } else { Theme::Dark };
                tracing::info!("Signal received: switch to {theme}");
                tm.switch_theme_auto_pause(theme, SwitchSource::Api);
                ApiResponse::ok()
            }
            ApiCommand::ForceLight | ApiCommand::ForceDark => {
                let theme = if command == ApiCommand::ForceLight { Theme::Light } else { Theme::Dark };
                tracing::info!("Signal received: force {theme}");
                state.set_forced_theme(theme);
                tm.request_switch(SwitchEventArgs::new(SwitchSource::Api, theme));
                ApiResponse::ok()
            }
            ApiCommand::NoForce => {
                tracing::info!("Signal received: remove forced theme");
                state.set_forced_theme(Theme::Unknown);
                tm.request_switch(SwitchEventArgs::automatic(SwitchSource::Api));
                ApiResponse::ok()
            }
            ApiCommand::DelayBy(minutes) => {
                tracing::info!("Signal received: delay automatic switching by {minutes} minutes");
                let Some(expiry) = ChronoDuration::try_minutes(minutes)
                    .and_then(|delay| self.clock().now().checked_add_signed(delay))
                else {
                    return ApiResponse::error(&EngineError::InvalidArgument {
                        command: "/delayBy".to_string(),
                        reason: format!("{minutes} minutes is out of range"),
                    });
                };
                postpone.replace_item(PostponeItem::new(DELAY_AUTO_SWITCH).with_expiry(expiry));
                ApiResponse::ok()
            }
            ApiCommand::ToggleSkipNext => {
                let config = self.config().snapshot();
                let (expiry, skip_type) = tm.skip_next_switch_expiry(&config, state.requested_theme());
                let enabled = postpone.toggle_skip_next_switch(expiry, skip_type);
                tracing::info!("Signal received: skip next switch {}", if enabled { "on" } else { "off" });
                ApiResponse::ok().with_message(enabled.to_string())
            }
            ApiCommand::ClearPostpone => {
                tracing::info!("Signal received: clear postpone queue");
                postpone.remove_user_clearable();
                ApiResponse::ok()
            }
            ApiCommand::PostponeStatus => {
                let items = postpone.snapshot();
                match serde_json::to_string(&items) {
                    Ok(details) => ApiResponse::ok()
                        .with_message(postpone.is_postponed().to_string())
                        .with_details(details),
                    Err(e) => ApiResponse::error(&e.into()),
                }
            }
            ApiCommand::RequestedTheme => ApiResponse::ok().with_message(state.requested_theme().to_string()),
            ApiCommand::LearnedThemeNames => match serde_json::to_string(&state.learned_theme_names()) {
                Ok(details) => ApiResponse::ok().with_details(details),
                Err(e) => ApiResponse::error(&e.into()),
            },
            ApiCommand::LocationAccess => {
                let location = &self.config().snapshot().location;
                if location.enabled && location.has_valid_coordinates() {
                    ApiResponse::ok()
                } else {
                    ApiResponse::new(StatusCode::NoLocAccess).with_message("no usable location configured")
                }
            }
            ApiCommand::Alive => ApiResponse::ok(),
            ApiCommand::Exit => {
                tracing::info!("Signal received: exit");
                self.request_shutdown();
                ApiResponse::ok()
            }
        }
    }
}
