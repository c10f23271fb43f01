use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use nightfall_core::{AppConfig, ScriptConfig, SwitchEventArgs, Theme};

use super::{
    ColorFilterSwitch, Component, ComponentKind, ModeSwitch, PairedSwitch, ScriptSwitch, SettingsSource,
    SwitchOutcome, WallpaperSwitch,
};
use crate::interfaces::{AspectBackend, ScriptRunner};

struct Inner {
    components: Vec<Component>,
    /// Indices into `components`, sorted for `last_sorting`.
    order: Vec<usize>,
    last_sorting: Option<Theme>,
    theme_mode: bool,
}

impl Inner {
    fn sort_for(&mut self, theme: Theme) {
        if self.last_sorting == Some(theme) && self.order.len() == self.components.len() {
            return;
        }
        let mut order: Vec<usize> = (0..self.components.len()).collect();
        order.sort_by_key(|&i| self.components[i].priority_for(theme));
        self.order = order;
        self.last_sorting = Some(theme);
    }

    fn position(&self, kind: ComponentKind) -> Option<usize> {
        self.components.iter().position(|c| c.kind() == kind)
    }
}

/// Owns every switch component and decides which of them a switch touches.
///
/// All operations take one lock, so component runs never overlap.
pub struct ComponentManager {
    inner: Mutex<Inner>,
}

impl ComponentManager {
    pub fn new(components: Vec<Component>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                components,
                order: Vec::new(),
                last_sorting: None,
                theme_mode: false,
            }),
        }
    }

    /// One component per [`ComponentKind`], backed by the given backends.
    pub fn with_defaults(aspects: Arc<dyn AspectBackend>, runner: Arc<dyn ScriptRunner>) -> Self {
        let components = ComponentKind::ALL
            .into_iter()
            .map(|kind| {
                let handler: Box<dyn super::ComponentHandler> = match kind {
                    ComponentKind::Apps
                    | ComponentKind::System
                    | ComponentKind::Office
                    | ComponentKind::TouchKeyboard => Box::new(ModeSwitch::new(kind, aspects.clone())),
                    ComponentKind::Colorization | ComponentKind::Cursor => {
                        Box::new(PairedSwitch::new(kind, aspects.clone()))
                    }
                    ComponentKind::Wallpaper => Box::new(WallpaperSwitch::new(aspects.clone())),
                    ComponentKind::ColorFilter => Box::new(ColorFilterSwitch::new(aspects.clone())),
                    ComponentKind::Script => Box::new(ScriptSwitch::new(runner.clone())),
                };
                Component::new(handler)
            })
            .collect();
        Self::new(components)
    }

    pub fn update_settings(&self, config: &AppConfig) {
        let mut inner = self.lock();
        inner.theme_mode = config.theme_mode.enabled;
        for c in &mut inner.components {
            c.configure(SettingsSource::App(config));
        }
        inner.last_sorting = None;
    }

    pub fn update_script_settings(&self, scripts: &ScriptConfig) {
        let mut inner = self.lock();
        for c in &mut inner.components {
            c.configure(SettingsSource::Scripts(scripts));
        }
        inner.last_sorting = None;
    }

    /// Components that must run for `theme`, in declaration order.
    ///
    /// Enabled components are initialized on the way, which is why this
    /// needs exclusive access.
    pub fn get_components_to_update(&self, theme: Theme) -> Vec<ComponentKind> {
        let mut inner = self.lock();
        let theme_mode = inner.theme_mode;
        let mut selected = Vec::new();
        for c in &mut inner.components {
            let blocked = theme_mode && !c.theme_handler_compatible();
            if c.force_pending() && !blocked {
                selected.push(c.kind());
            } else if c.enabled() {
                c.ensure_initialized();
                if !blocked && c.needs_update(theme) {
                    selected.push(c.kind());
                }
            } else if c.initialized() {
                selected.push(c.kind());
            }
        }
        selected
    }

    /// Runs the given components in priority order for `theme`.
    ///
    /// A failing component is logged and does not stop the others. While
    /// theme mode is on, enabled components the theme file owns are left
    /// alone even if asked for.
    pub fn run(
        &self,
        kinds: &[ComponentKind],
        theme: Theme,
        e: &SwitchEventArgs,
    ) -> Vec<(ComponentKind, SwitchOutcome)> {
        let mut inner = self.lock();
        inner.sort_for(theme);
        let order = inner.order.clone();
        let theme_mode = inner.theme_mode;
        let mut outcomes = Vec::with_capacity(kinds.len());
        for i in order {
            let component = &mut inner.components[i];
            if !kinds.contains(&component.kind()) {
                continue;
            }
            if theme_mode && component.enabled() && !component.theme_handler_compatible() {
                tracing::debug!("Skipping {} while theme mode is active", component.kind());
                continue;
            }
            outcomes.push((component.kind(), component.switch(theme, e)));
        }
        outcomes
    }

    /// Marks every enabled component to switch on the next run regardless
    /// of its current state.
    pub fn force_all(&self) {
        let mut inner = self.lock();
        for c in inner.components.iter_mut().filter(|c| c.enabled()) {
            c.set_force();
        }
    }

    /// Cleans up components that managed theme mode takes over.
    pub fn invoke_disable_incompatible(&self) {
        let mut inner = self.lock();
        if !inner.theme_mode {
            return;
        }
        for c in inner.components.iter_mut().filter(|c| !c.theme_handler_compatible()) {
            if c.initialized() {
                tracing::info!("Disabling {} while theme mode is active", c.kind());
                c.disable();
            }
        }
    }

    /// Initializes every enabled component.
    pub fn run_enable_hooks(&self) {
        let mut inner = self.lock();
        for c in &mut inner.components {
            c.ensure_initialized();
        }
    }

    pub fn settings_of(&self, kind: ComponentKind) -> Option<super::BaseSettings> {
        let inner = self.lock();
        inner.position(kind).map(|i| inner.components[i].settings())
    }

    pub fn is_initialized(&self, kind: ComponentKind) -> bool {
        let inner = self.lock();
        inner
            .position(kind)
            .is_some_and(|i| inner.components[i].initialized())
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MemoryAspectBackend, RecordingScriptRunner, ScriptedHandler};
    use nightfall_core::SwitchSource;

    fn event() -> SwitchEventArgs {
        SwitchEventArgs::new(SwitchSource::Manual, Theme::Dark)
    }

    fn scripted(kinds: &[(ComponentKind, i32)]) -> (ComponentManager, Vec<crate::mock::HandlerProbe>) {
        let mut probes = Vec::new();
        let components = kinds
            .iter()
            .map(|&(kind, priority)| {
                let handler = ScriptedHandler::new(kind).with_priority(priority);
                probes.push(handler.probe());
                Component::new(Box::new(handler))
            })
            .collect();
        let manager = ComponentManager::new(components);
        manager.update_settings(&AppConfig::default());
        (manager, probes)
    }

    #[test]
    fn runs_in_ascending_priority() {
        let (manager, _) = scripted(&[
            (ComponentKind::Apps, 5),
            (ComponentKind::System, 1),
            (ComponentKind::Cursor, 3),
        ]);
        let kinds = manager.get_components_to_update(Theme::Dark);
        assert_eq!(kinds.len(), 3);

        let order: Vec<ComponentKind> = manager
            .run(&kinds, Theme::Dark, &event())
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(
            order,
            vec![ComponentKind::System, ComponentKind::Cursor, ComponentKind::Apps]
        );
    }

    #[test]
    fn failing_component_does_not_block_the_rest() {
        let components = vec![
            Component::new(Box::new(ScriptedHandler::new(ComponentKind::Apps).with_priority(1))),
            Component::new(Box::new(
                ScriptedHandler::new(ComponentKind::Wallpaper).with_priority(2).failing(),
            )),
            Component::new(Box::new(ScriptedHandler::new(ComponentKind::Cursor).with_priority(3))),
        ];
        let manager = ComponentManager::new(components);
        manager.update_settings(&AppConfig::default());

        let kinds = manager.get_components_to_update(Theme::Light);
        let outcomes = manager.run(&kinds, Theme::Light, &event());
        assert_eq!(
            outcomes,
            vec![
                (ComponentKind::Apps, SwitchOutcome::Switched),
                (ComponentKind::Wallpaper, SwitchOutcome::Failed),
                (ComponentKind::Cursor, SwitchOutcome::Switched),
            ]
        );
    }

    #[test]
    fn theme_mode_skips_incompatible_components() {
        let (manager, _) = scripted(&[(ComponentKind::Apps, 0), (ComponentKind::System, 0)]);
        let mut cfg = AppConfig::default();
        cfg.theme_mode.enabled = true;
        manager.update_settings(&cfg);

        assert_eq!(manager.get_components_to_update(Theme::Dark), vec![ComponentKind::System]);
    }

    #[test]
    fn disabled_but_initialized_components_are_selected_once() {
        let (manager, probes) = scripted(&[(ComponentKind::Cursor, 0)]);
        let kinds = manager.get_components_to_update(Theme::Dark);
        manager.run(&kinds, Theme::Dark, &event());

        probes[0].set_enabled(false);
        manager.update_settings(&AppConfig::default());
        let kinds = manager.get_components_to_update(Theme::Light);
        assert_eq!(kinds, vec![ComponentKind::Cursor]);
        assert_eq!(
            manager.run(&kinds, Theme::Light, &event()),
            vec![(ComponentKind::Cursor, SwitchOutcome::Disabled)]
        );
        assert!(manager.get_components_to_update(Theme::Light).is_empty());
    }

    #[test]
    fn force_all_reselects_up_to_date_components() {
        let (manager, probes) = scripted(&[(ComponentKind::Apps, 0)]);
        let kinds = manager.get_components_to_update(Theme::Dark);
        manager.run(&kinds, Theme::Dark, &event());
        assert!(manager.get_components_to_update(Theme::Dark).is_empty());

        manager.force_all();
        let kinds = manager.get_components_to_update(Theme::Dark);
        manager.run(&kinds, Theme::Dark, &event());
        assert_eq!(probes[0].switches(), vec![Theme::Dark, Theme::Dark]);
    }

    #[test]
    fn forcing_in_theme_mode_leaves_incompatible_components_alone() {
        let (manager, probes) = scripted(&[(ComponentKind::Apps, 0), (ComponentKind::System, 1)]);
        let kinds = manager.get_components_to_update(Theme::Dark);
        manager.run(&kinds, Theme::Dark, &event());

        let mut cfg = AppConfig::default();
        cfg.theme_mode.enabled = true;
        manager.update_settings(&cfg);
        manager.force_all();

        let kinds = manager.get_components_to_update(Theme::Dark);
        assert_eq!(kinds, vec![ComponentKind::System]);
        manager.run(&[ComponentKind::Apps, ComponentKind::System], Theme::Dark, &event());
        assert_eq!(probes[0].switches(), vec![Theme::Dark]);
        assert_eq!(probes[1].switches(), vec![Theme::Dark, Theme::Dark]);
    }

    #[test]
    fn enabling_theme_mode_disables_incompatible() {
        let (manager, probes) = scripted(&[(ComponentKind::Wallpaper, 0), (ComponentKind::Office, 0)]);
        manager.run_enable_hooks();
        let mut cfg = AppConfig::default();
        cfg.theme_mode.enabled = true;
        manager.update_settings(&cfg);
        manager.invoke_disable_incompatible();

        assert_eq!(probes[0].disables(), 1);
        assert_eq!(probes[1].disables(), 0);
        assert!(!manager.is_initialized(ComponentKind::Wallpaper));
    }

    #[test]
    fn default_set_switches_configured_aspects() {
        let aspects = Arc::new(MemoryAspectBackend::default());
        let manager =
            ComponentManager::with_defaults(aspects.clone(), Arc::new(RecordingScriptRunner::default()));
        let mut cfg = AppConfig::default();
        cfg.components.system.enabled = true;
        cfg.components.apps.enabled = true;
        manager.update_settings(&cfg);

        let kinds = manager.get_components_to_update(Theme::Dark);
        assert_eq!(kinds, vec![ComponentKind::Apps, ComponentKind::System]);
        manager.run(&kinds, Theme::Dark, &event());
        assert_eq!(aspects.value(ComponentKind::Apps).as_deref(), Some("dark"));
        assert_eq!(aspects.value(ComponentKind::System).as_deref(), Some("dark"));
    }
}
