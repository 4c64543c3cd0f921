use std::sync::Arc;

use derive_new::new;

use crate::event::{EventSink, ReminderEvent};
use crate::time::Clock;
use notification::NotificationSink;
use queue::DeferredActionScheduler;

pub mod chain;
pub mod notification;
pub mod queue;
pub mod recurrence;
pub mod reminder;
pub mod timing_map;

/// The outside world the reminder services talk to.
#[derive(Clone, new)]
pub struct Collaborators {
    pub queue: Arc<dyn DeferredActionScheduler>,
    pub notifications: Arc<dyn NotificationSink>,
    pub clock: Arc<dyn Clock>,
    #[new(default)]
    pub events: Option<Arc<dyn EventSink>>,
}

impl Collaborators {
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    pub(crate) fn emit(&self, event: ReminderEvent) {
        if let Some(events) = &self.events {
            events.emit(&event);
        }
    }
}
