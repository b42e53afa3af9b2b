//! UI slot registry fed by the `render-ui` effect
//!
//! Each slot has at most one owner. Writes are arbitrated by priority:
//! content is replaced unless the current owner has strictly higher
//! priority. Outgoing content fires its dismiss hook exactly once, whether
//! it was overridden, cleared or timed out.

use crate::scheduler::{Scheduler, TaskId};
use crate::Value;
use indexmap::IndexMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

/// Content currently owning a slot
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotContent {
    pub id: String,
    pub pattern: String,
    #[serde(with = "crate::value::json")]
    pub props: Value,
    pub priority: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub animation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_trait: Option<String>,
    /// Epoch milliseconds at which the content is cleared automatically
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_dismiss_at: Option<i64>,
    /// Event emitted when the content leaves the slot
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_dismiss: Option<String>,
}

/// A `render-ui` request
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RenderRequest {
    pub target: String,
    /// Pattern to render; `None` clears the slot
    pub pattern: Option<String>,
    pub props: Value,
    pub priority: i64,
    pub animation: Option<String>,
    pub id: Option<String>,
    pub source_trait: Option<String>,
    pub auto_dismiss_ms: Option<u64>,
    pub on_dismiss: Option<String>,
}

impl RenderRequest {
    pub fn new(target: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            pattern: Some(pattern.into()),
            props: Value::object(),
            ..Default::default()
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_props(mut self, props: impl Into<Value>) -> Self {
        self.props = props.into();
        self
    }

    pub fn with_on_dismiss(mut self, event: impl Into<String>) -> Self {
        self.on_dismiss = Some(event.into());
        self
    }

    pub fn with_auto_dismiss(mut self, ms: u64) -> Self {
        self.auto_dismiss_ms = Some(ms);
        self
    }
}

/// Result of a render call
#[derive(Debug, Clone, PartialEq)]
pub enum RenderOutcome {
    /// Content committed to the slot
    Rendered { id: String },
    /// Slot cleared by a render with no pattern
    Cleared,
    /// Existing content has higher priority; slot unchanged
    Rejected { existing_priority: i64 },
}

/// Change listener: `(slot, new content or None when cleared)`
pub type SlotListener = Arc<dyn Fn(&str, Option<&SlotContent>) + Send + Sync>;

/// Hook invoked once for every piece of content that leaves a slot
pub type DismissHook = Arc<dyn Fn(&str, &SlotContent) + Send + Sync>;

struct SlotEntry {
    content: SlotContent,
    timer: Option<TaskId>,
}

struct SlotInner {
    slots: Mutex<IndexMap<String, SlotEntry>>,
    listeners: Mutex<Vec<(u64, SlotListener)>>,
    dismiss: Mutex<Option<DismissHook>>,
    scheduler: Option<Arc<dyn Scheduler>>,
    next_id: AtomicU64,
}

/// Priority-arbitrated slot registry
#[derive(Clone)]
pub struct SlotManager {
    inner: Arc<SlotInner>,
}

impl Default for SlotManager {
    fn default() -> Self {
        Self::new(None)
    }
}

impl SlotManager {
    /// Create a manager; auto-dismiss needs a scheduler
    pub fn new(scheduler: Option<Arc<dyn Scheduler>>) -> Self {
        Self {
            inner: Arc::new(SlotInner {
                slots: Mutex::new(IndexMap::new()),
                listeners: Mutex::new(Vec::new()),
                dismiss: Mutex::new(None),
                scheduler,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Install the hook fired when content leaves a slot
    pub fn set_dismiss_hook(&self, hook: DismissHook) {
        if let Ok(mut slot) = self.inner.dismiss.lock() {
            *slot = Some(hook);
        }
    }

    /// Subscribe to committed changes; returns an id for [`Self::unsubscribe`]
    pub fn subscribe(&self, listener: SlotListener) -> u64 {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut listeners) = self.inner.listeners.lock() {
            listeners.push((id, listener));
        }
        id
    }

    pub fn unsubscribe(&self, id: u64) -> bool {
        match self.inner.listeners.lock() {
            Ok(mut listeners) => {
                let before = listeners.len();
                listeners.retain(|(lid, _)| *lid != id);
                listeners.len() != before
            }
            Err(_) => false,
        }
    }

    /// Write content into `request.target`
    ///
    /// A request without a pattern clears the slot. Both writes and clears are
    /// refused while the slot holds strictly higher priority content.
    pub fn render(&self, request: RenderRequest) -> RenderOutcome {
        let (content, outgoing) = {
            let Ok(mut slots) = self.inner.slots.lock() else {
                return RenderOutcome::Rejected {
                    existing_priority: i64::MAX,
                };
            };
            if let Some(existing) = slots.get(&request.target) {
                if existing.content.priority > request.priority {
                    tracing::warn!(
                        slot = %request.target,
                        existing = existing.content.priority,
                        incoming = request.priority,
                        "Slot write rejected by higher priority content"
                    );
                    return RenderOutcome::Rejected {
                        existing_priority: existing.content.priority,
                    };
                }
            }

            let Some(pattern) = request.pattern.clone() else {
                let removed = slots.shift_remove(&request.target);
                drop(slots);
                if let Some(old) = removed {
                    self.cancel_timer(old.timer);
                    self.fire_dismiss(&request.target, &old.content);
                    self.notify(&request.target, None);
                }
                return RenderOutcome::Cleared;
            };

            let id = request.id.clone().unwrap_or_else(|| {
                format!(
                    "{}-{}",
                    request.target,
                    self.inner.next_id.fetch_add(1, Ordering::Relaxed)
                )
            });
            let auto_dismiss_at = request
                .auto_dismiss_ms
                .map(|ms| chrono::Utc::now().timestamp_millis() + ms as i64);
            let content = SlotContent {
                id: id.clone(),
                pattern,
                props: request.props.clone(),
                priority: request.priority,
                animation: request.animation.clone(),
                source_trait: request.source_trait.clone(),
                auto_dismiss_at,
                on_dismiss: request.on_dismiss.clone(),
            };
            let timer = request
                .auto_dismiss_ms
                .and_then(|ms| self.schedule_dismiss(&id, ms));
            let outgoing = slots.insert(
                request.target.clone(),
                SlotEntry {
                    content: content.clone(),
                    timer,
                },
            );
            (content, outgoing)
        };

        if let Some(old) = outgoing {
            self.cancel_timer(old.timer);
            self.fire_dismiss(&request.target, &old.content);
        }
        self.notify(&request.target, Some(&content));
        RenderOutcome::Rendered { id: content.id }
    }

    /// Clear a slot; returns the content that was removed
    pub fn clear(&self, slot: &str) -> Option<SlotContent> {
        let removed = self
            .inner
            .slots
            .lock()
            .ok()
            .and_then(|mut slots| slots.shift_remove(slot))?;
        self.cancel_timer(removed.timer);
        self.fire_dismiss(slot, &removed.content);
        self.notify(slot, None);
        Some(removed.content)
    }

    /// Clear whichever slot holds content with this id
    pub fn clear_by_id(&self, id: &str) -> bool {
        let slot = self.inner.slots.lock().ok().and_then(|slots| {
            slots
                .iter()
                .find(|(_, entry)| entry.content.id == id)
                .map(|(name, _)| name.clone())
        });
        match slot {
            Some(slot) => self.clear(&slot).is_some(),
            None => false,
        }
    }

    /// Clear every slot; returns how many were cleared
    pub fn clear_all(&self) -> usize {
        let names: Vec<String> = self
            .inner
            .slots
            .lock()
            .map(|slots| slots.keys().cloned().collect())
            .unwrap_or_default();
        names
            .iter()
            .filter(|name| self.clear(name).is_some())
            .count()
    }

    /// Current content of a slot
    pub fn get(&self, slot: &str) -> Option<SlotContent> {
        self.inner
            .slots
            .lock()
            .ok()
            .and_then(|slots| slots.get(slot).map(|e| e.content.clone()))
    }

    /// Copy of every occupied slot
    pub fn snapshot(&self) -> IndexMap<String, SlotContent> {
        self.inner
            .slots
            .lock()
            .map(|slots| {
                slots
                    .iter()
                    .map(|(k, e)| (k.clone(), e.content.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn schedule_dismiss(&self, id: &str, ms: u64) -> Option<TaskId> {
        let scheduler = self.inner.scheduler.as_ref()?;
        let weak: Weak<SlotInner> = Arc::downgrade(&self.inner);
        let id = id.to_string();
        Some(scheduler.schedule(
            Duration::from_millis(ms),
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    SlotManager { inner }.clear_by_id(&id);
                }
            }),
        ))
    }

    fn cancel_timer(&self, timer: Option<TaskId>) {
        if let (Some(id), Some(scheduler)) = (timer, self.inner.scheduler.as_ref()) {
            scheduler.cancel(id);
        }
    }

    fn fire_dismiss(&self, slot: &str, content: &SlotContent) {
        let hook = self.inner.dismiss.lock().ok().and_then(|h| h.clone());
        if let Some(hook) = hook {
            hook(slot, content);
        }
    }

    fn notify(&self, slot: &str, content: Option<&SlotContent>) {
        let listeners: Vec<SlotListener> = self
            .inner
            .listeners
            .lock()
            .map(|l| l.iter().map(|(_, f)| f.clone()).collect())
            .unwrap_or_default();
        for listener in listeners {
            listener(slot, content);
        }
    }
}
