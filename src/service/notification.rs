use std::sync::{Mutex, PoisonError};

use dashmap::DashMap;

use crate::model::Notice;

/// Where rendered notices end up. Delivering a notice with an id that is
/// already shown replaces it.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notice: &Notice);
    fn cancel(&self, id: i64);
}

/// Prints notices to stdout.
#[derive(Debug, Default)]
pub struct ConsoleSink {
    shown: DashMap<i64, Notice>,
}

impl ConsoleSink {
    pub fn is_shown(&self, id: i64) -> bool {
        self.shown.contains_key(&id)
    }
}

impl NotificationSink for ConsoleSink {
    fn notify(&self, notice: &Notice) {
        tracing::info!(notice_id = notice.id, title = %notice.title, "show notification");
        println!("\n🔔 {}\n   {}", notice.title, notice.body);
        self.shown.insert(notice.id, notice.clone());
    }

    fn cancel(&self, id: i64) {
        if let Some((_, notice)) = self.shown.remove(&id) {
            tracing::info!(notice_id = id, title = %notice.title, "dismiss notification");
        }
    }
}

/// Keeps delivered notices and dismissed ids in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    delivered: Mutex<Vec<Notice>>,
    cancelled: Mutex<Vec<i64>>,
}

impl MemorySink {
    pub fn delivered(&self) -> Vec<Notice> {
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn cancelled(&self) -> Vec<i64> {
        self.cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl NotificationSink for MemorySink {
    fn notify(&self, notice: &Notice) {
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notice.clone());
    }

    fn cancel(&self, id: i64) {
        self.cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(id);
    }
}
