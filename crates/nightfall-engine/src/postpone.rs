use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{Duration as ChronoDuration, NaiveDateTime};
use nightfall_core::{Clock, Theme};
use serde::{Deserialize, Serialize};

use crate::interfaces::StateStore;
use crate::modules::Module;
use crate::state::WatchedFlag;

/// Manual switch that should hold until the next natural transition.
pub const SKIP_NEXT_SWITCH: &str = "skip_next_switch";
/// User asked to delay automatic switching for a while.
pub const DELAY_AUTO_SWITCH: &str = "delay_auto_switch";
pub const GRACE_PERIOD: &str = "grace_period";
pub const SESSION_LOCK: &str = "session_lock";

/// Non-expiring skip items older than this are dropped when restored.
const STALE_SKIP_HOURS: i64 = 24;
/// Items expiring sooner than this after start are not restored.
const RESTORE_MIN_REMAINING_SECS: i64 = 5;

/// Which natural transition a skip item waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipType {
    #[default]
    Unspecified,
    UntilSunrise,
    UntilSunset,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostponeItem {
    pub reason: String,
    #[serde(default)]
    pub expiry: Option<NaiveDateTime>,
    #[serde(default)]
    pub skip_type: SkipType,
    #[serde(default = "default_user_clearable")]
    pub user_clearable: bool,
}

fn default_user_clearable() -> bool {
    true
}

impl PostponeItem {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            expiry: None,
            skip_type: SkipType::Unspecified,
            user_clearable: true,
        }
    }

    /// An item the user cannot clear, e.g. a locked session.
    pub fn system(reason: impl Into<String>) -> Self {
        Self {
            user_clearable: false,
            ..Self::new(reason)
        }
    }

    pub fn with_expiry(self, expiry: NaiveDateTime) -> Self {
        Self {
            expiry: Some(expiry),
            ..self
        }
    }

    pub fn with_skip_type(self, skip_type: SkipType) -> Self {
        Self { skip_type, ..self }
    }

    pub fn is_expired(&self, now: NaiveDateTime) -> bool {
        self.expiry.is_some_and(|expiry| expiry <= now)
    }
}

impl fmt::Display for PostponeItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.expiry {
            Some(expiry) => write!(f, "{} (until {})", self.reason, expiry.format("%Y-%m-%d %H:%M:%S")),
            None => f.write_str(&self.reason),
        }
    }
}

/// What gets written to the state store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostponeSnapshot {
    #[serde(default)]
    pub items: Vec<PostponeItem>,
    #[serde(default)]
    pub theme_at_exit: Theme,
    #[serde(default)]
    pub last_modified: Option<NaiveDateTime>,
}

/// Named reasons that suppress automatic switching while any is present.
///
/// Expired items are pruned whenever the queue is read, so a missed timer
/// can never block switching forever. Callback modules fire when the last
/// item is removed explicitly; expiry pruning is silent.
pub struct PostponeManager {
    queue: Mutex<Vec<PostponeItem>>,
    callbacks: Mutex<Vec<Arc<dyn Module>>>,
    postponed: WatchedFlag,
    store: Option<Arc<dyn StateStore>>,
    clock: Arc<dyn Clock>,
}

impl PostponeManager {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            queue: Mutex::new(Vec::new()),
            callbacks: Mutex::new(Vec::new()),
            postponed: WatchedFlag::new(false),
            store: None,
            clock,
        }
    }

    pub fn with_store(clock: Arc<dyn Clock>, store: Arc<dyn StateStore>) -> Self {
        Self {
            store: Some(store),
            ..Self::new(clock)
        }
    }

    pub fn postponed_flag(&self) -> &WatchedFlag {
        &self.postponed
    }

    /// Inserts `reason`. Returns `false` if it is already queued.
    pub fn add(&self, reason: impl Into<String>, expiry: Option<NaiveDateTime>) -> bool {
        let mut item = PostponeItem::new(reason);
        item.expiry = expiry;
        self.add_item(item)
    }

    pub fn add_item(&self, item: PostponeItem) -> bool {
        let mut queue = self.lock_queue();
        self.prune(&mut queue);
        if queue.iter().any(|i| i.reason == item.reason) {
            return false;
        }
        tracing::debug!("Postponing automatic switching: {item}");
        queue.push(item);
        self.after_mutation(&queue);
        true
    }

    /// Inserts `item`, replacing a queued item with the same reason in
    /// place. The queue never goes empty on the way, so no callback fires.
    pub fn replace_item(&self, item: PostponeItem) {
        let mut queue = self.lock_queue();
        self.prune(&mut queue);
        match queue.iter_mut().find(|i| i.reason == item.reason) {
            Some(existing) => {
                tracing::debug!("Replacing postpone item {existing} with {item}");
                *existing = item;
            }
            None => {
                tracing::debug!("Postponing automatic switching: {item}");
                queue.push(item);
            }
        }
        self.after_mutation(&queue);
    }

    /// Removes `reason`. When this empties the queue every registered
    /// callback fires once, in registration order, before returning.
    pub fn remove(&self, reason: &str) -> bool {
        let emptied = {
            let mut queue = self.lock_queue();
            self.prune(&mut queue);
            let Some(pos) = queue.iter().position(|i| i.reason == reason) else {
                return false;
            };
            queue.remove(pos);
            tracing::debug!("Removed {reason} from postpone queue: {}", format_queue(&queue));
            self.after_mutation(&queue);
            queue.is_empty()
        };

        if emptied {
            tracing::info!("Postpone queue cleared");
            let callbacks = self
                .callbacks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            for module in callbacks {
                module.fire();
            }
        }
        true
    }

    pub fn is_postponed(&self) -> bool {
        let mut queue = self.lock_queue();
        self.prune(&mut queue);
        let postponed = !queue.is_empty();
        self.postponed.set(postponed);
        postponed
    }

    /// Looks up a live item without touching the queue.
    pub fn get(&self, reason: &str) -> Option<PostponeItem> {
        let now = self.clock.now();
        self.lock_queue()
            .iter()
            .find(|i| i.reason == reason && !i.is_expired(now))
            .cloned()
    }

    pub fn count(&self) -> usize {
        let now = self.clock.now();
        self.lock_queue().iter().filter(|i| !i.is_expired(now)).count()
    }

    pub fn count_user_clearable(&self) -> usize {
        let now = self.clock.now();
        self.lock_queue()
            .iter()
            .filter(|i| i.user_clearable && !i.is_expired(now))
            .count()
    }

    pub fn is_skip_next_switch(&self) -> bool {
        self.get(SKIP_NEXT_SWITCH).is_some()
    }

    pub fn is_user_delayed(&self) -> bool {
        self.get(DELAY_AUTO_SWITCH).is_some()
    }

    pub fn is_grace_period(&self) -> bool {
        self.get(GRACE_PERIOD).is_some()
    }

    pub fn skip_next_switch_item(&self) -> Option<PostponeItem> {
        self.get(SKIP_NEXT_SWITCH)
    }

    /// Live items in queue order.
    pub fn snapshot(&self) -> Vec<PostponeItem> {
        let now = self.clock.now();
        self.lock_queue()
            .iter()
            .filter(|i| !i.is_expired(now))
            .cloned()
            .collect()
    }

    pub fn clear_queue(&self) {
        for item in self.snapshot() {
            self.remove(&item.reason);
        }
    }

    pub fn remove_user_clearable(&self) {
        for item in self.snapshot().into_iter().filter(|i| i.user_clearable) {
            self.remove(&item.reason);
        }
    }

    pub fn add_skip_next_switch(&self, expiry: Option<NaiveDateTime>, skip_type: SkipType) -> bool {
        let mut item = PostponeItem::new(SKIP_NEXT_SWITCH).with_skip_type(skip_type);
        item.expiry = expiry;
        self.add_item(item)
    }

    /// Moves the expiry of a queued skip item. Returns `false` if none is queued.
    pub fn update_skip_next_switch_expiry(
        &self,
        expiry: Option<NaiveDateTime>,
        skip_type: SkipType,
    ) -> bool {
        let mut queue = self.lock_queue();
        let Some(item) = queue.iter_mut().find(|i| i.reason == SKIP_NEXT_SWITCH) else {
            return false;
        };
        if item.expiry == expiry && item.skip_type == skip_type {
            return true;
        }
        tracing::info!(
            "Updating skip expiry from {} to {}",
            format_expiry(item.expiry),
            format_expiry(expiry)
        );
        item.expiry = expiry;
        item.skip_type = skip_type;
        self.after_mutation(&queue);
        true
    }

    pub fn remove_skip_next_switch(&self) -> bool {
        self.remove(SKIP_NEXT_SWITCH)
    }

    /// Clears any user pause if one is active, otherwise adds a skip item.
    /// Returns whether switching is skipped afterwards.
    pub fn toggle_skip_next_switch(&self, expiry: Option<NaiveDateTime>, skip_type: SkipType) -> bool {
        if self.is_skip_next_switch() || self.is_user_delayed() {
            self.remove(SKIP_NEXT_SWITCH);
            self.remove(DELAY_AUTO_SWITCH);
            return false;
        }
        self.add_skip_next_switch(expiry, skip_type)
    }

    /// Returns `false` if a module with the same name is registered.
    pub fn register_callback(&self, module: Arc<dyn Module>) -> bool {
        let mut callbacks = self.callbacks.lock().unwrap_or_else(PoisonError::into_inner);
        if callbacks.iter().any(|m| m.name() == module.name()) {
            return false;
        }
        tracing::debug!("Registering {} for postpone callbacks", module.name());
        callbacks.push(module);
        true
    }

    pub fn deregister_callback(&self, name: &str) -> bool {
        let mut callbacks = self.callbacks.lock().unwrap_or_else(PoisonError::into_inner);
        let before = callbacks.len();
        callbacks.retain(|m| m.name() != name);
        callbacks.len() != before
    }

    /// Restores persisted items and returns the theme that was active at exit.
    pub fn restore(&self) -> Theme {
        let Some(store) = &self.store else {
            return Theme::Unknown;
        };
        let snapshot = match store.load_postpones() {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return Theme::Unknown,
            Err(e) => {
                tracing::error!("Failed to load postpone data: {e}");
                return Theme::Unknown;
            }
        };

        let now = self.clock.now();
        let fresh = snapshot
            .last_modified
            .is_some_and(|modified| modified > now - ChronoDuration::hours(STALE_SKIP_HOURS));
        let restored: Vec<PostponeItem> = snapshot
            .items
            .into_iter()
            .filter(|item| match item.expiry {
                Some(expiry) => expiry > now + ChronoDuration::seconds(RESTORE_MIN_REMAINING_SECS),
                None => item.skip_type != SkipType::Unspecified && fresh,
            })
            .collect();

        if !restored.is_empty() {
            tracing::info!("Restoring postpone queue from disk: {}", format_queue(&restored));
        }
        for item in restored {
            self.add_item(item);
        }
        snapshot.theme_at_exit
    }

    /// Persists user-clearable items together with the active theme.
    pub fn flush_on_exit(&self, theme_at_exit: Theme) {
        let mut queue = self.lock_queue();
        self.prune(&mut queue);
        self.persist(&queue, theme_at_exit);
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, Vec<PostponeItem>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn prune(&self, queue: &mut Vec<PostponeItem>) {
        let now = self.clock.now();
        queue.retain(|item| {
            let expired = item.is_expired(now);
            if expired {
                tracing::debug!("Postpone item {} expired", item.reason);
            }
            !expired
        });
    }

    /// Called with the queue lock held, so the flag and the saved copy
    /// follow mutations in the order they happened. Flag listeners must not
    /// call back into the manager.
    fn after_mutation(&self, queue: &[PostponeItem]) {
        self.postponed.set(!queue.is_empty());
        self.persist(queue, Theme::Unknown);
    }

    fn persist(&self, queue: &[PostponeItem], theme_at_exit: Theme) {
        let Some(store) = &self.store else {
            return;
        };
        let snapshot = PostponeSnapshot {
            items: queue.iter().filter(|i| i.user_clearable).cloned().collect(),
            theme_at_exit,
            last_modified: Some(self.clock.now()),
        };
        if let Err(e) = store.save_postpones(&snapshot) {
            tracing::warn!("Could not save postpone data: {e}");
        }
    }
}

impl fmt::Display for PostponeManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_queue(&self.snapshot()))
    }
}

fn format_queue(items: &[PostponeItem]) -> String {
    let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
    format!("[{}]", parts.join(", "))
}

fn format_expiry(expiry: Option<NaiveDateTime>) -> String {
    expiry.map_or_else(|| "none".to_string(), |e| e.format("%Y-%m-%d %H:%M:%S").to_string())
}
