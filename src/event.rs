//! Structured events emitted at every scheduling decision point.

use std::sync::{Mutex, PoisonError};

use serde::Serialize;

use crate::service::queue::JobKey;
use crate::time::Timestamp;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ReminderEvent {
    Armed {
        key: JobKey,
        fire_at: Timestamp,
        token: u64,
    },
    Fired {
        key: JobKey,
        notice_id: i64,
    },
    Skipped {
        key: JobKey,
        reason: SkipReason,
    },
    Cancelled {
        key: JobKey,
    },
    /// A firing whose reminder was re-armed after it was queued.
    Superseded {
        key: JobKey,
        token: u64,
    },
    ChainBroken {
        key: JobKey,
        reason: String,
    },
    Reconciled {
        lecture_id: i64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AlreadyPassed,
    MissingDate,
    MissingLeadTime,
    ChainCancelled,
    ReminderCancelled,
    NonPositiveDelay,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            SkipReason::AlreadyPassed => "reminder time has already passed",
            SkipReason::MissingDate => "one-time entity has no date",
            SkipReason::MissingLeadTime => "reminder has no lead time",
            SkipReason::ChainCancelled => "chain was cancelled",
            SkipReason::ReminderCancelled => "reminder was cancelled",
            SkipReason::NonPositiveDelay => "computed delay is not positive",
        };
        f.write_str(text)
    }
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: &ReminderEvent);
}

/// Forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEvents;

impl EventSink for TracingEvents {
    fn emit(&self, event: &ReminderEvent) {
        match event {
            ReminderEvent::Armed {
                key,
                fire_at,
                token,
            } => tracing::info!(%key, %fire_at, token, "reminder armed"),
            ReminderEvent::Fired { key, notice_id } => {
                tracing::info!(%key, notice_id, "reminder fired")
            }
            ReminderEvent::Skipped { key, reason } => {
                tracing::warn!(%key, %reason, "reminder skipped")
            }
            ReminderEvent::Cancelled { key } => tracing::info!(%key, "reminder cancelled"),
            ReminderEvent::Superseded { key, token } => {
                tracing::debug!(%key, token, "stale firing dropped")
            }
            ReminderEvent::ChainBroken { key, reason } => {
                tracing::error!(%key, %reason, "weekly reminder chain stopped")
            }
            ReminderEvent::Reconciled { lecture_id } => {
                tracing::warn!(lecture_id, "re-armed a weekly reminder that had no pending firing")
            }
        }
    }
}

/// Keeps every event in memory, in order.
#[derive(Debug, Default)]
pub struct RecordingEvents(Mutex<Vec<ReminderEvent>>);

impl RecordingEvents {
    pub fn events(&self) -> Vec<ReminderEvent> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl EventSink for RecordingEvents {
    fn emit(&self, event: &ReminderEvent) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}
