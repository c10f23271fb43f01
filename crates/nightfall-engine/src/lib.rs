pub mod api;
pub mod component;
pub mod config_store;
pub mod error;
pub mod governor;
pub mod interfaces;
pub mod modules;
pub mod postpone;
pub mod service;
pub mod state;
pub mod store;
pub mod sun;
pub mod theme_manager;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use api::{ApiCommand, ApiResponse, StatusCode};
pub use component::{ComponentKind, ComponentManager};
pub use config_store::{ConfigChange, ConfigStore};
pub use error::{EngineError, EngineResult};
pub use postpone::{PostponeItem, PostponeManager, SkipType};
pub use service::{Backends, Service};
pub use state::GlobalState;
pub use theme_manager::ThemeManager;
