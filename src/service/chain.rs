//! The self-renewing weekly reminder: every firing delivers its notice and arms the next one.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Duration;
use dashmap::DashMap;
use derive_new::new;
use itertools::Itertools;
use snafu::{OptionExt as _, ResultExt as _, Snafu};
use tracing::instrument;

use super::queue::{DueJob, Job, JobKey, QueueError, ReminderPayload};
use super::recurrence::next_fire_instant;
use super::Collaborators;
use crate::event::{ReminderEvent, SkipReason};
use crate::model::{Notice, ParseDayOfWeek, WeeklyRecurrence};
use crate::time::{self, Timestamp};

/// How long after its due time a firing counts as still being delivered.
const IN_FLIGHT_MINUTES: i64 = 5;

#[derive(Debug, Clone, PartialEq, Eq, new)]
pub struct ReminderChainState {
    pub entity_id: i64,
    #[new(default)]
    pub last_armed_instant: Option<Timestamp>,
    #[new(default)]
    pub token: u64,
}

/// What became of a firing handed to [ReminderChain::on_fire].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Firing {
    /// Delivered, and the next firing is armed for this instant.
    Rearmed(Timestamp),
    /// Delivered, but the chain could not continue.
    Broken,
    /// Not delivered: cancelled, superseded or not a chain firing at all.
    Dropped,
}

pub struct ReminderChain {
    deps: Collaborators,
    states: DashMap<i64, ReminderChainState>,
    tokens: AtomicU64,
}

impl ReminderChain {
    pub fn new(deps: Collaborators) -> Self {
        Self {
            deps,
            states: DashMap::new(),
            tokens: AtomicU64::new(0),
        }
    }

    /// Arm the next firing of `recurrence` for `lecture_id`, replacing any armed one.
    #[instrument(skip(self, notice), fields(notice_id = notice.id))]
    pub fn arm(
        &self, recurrence: &WeeklyRecurrence, lecture_id: i64, notice: Notice,
    ) -> Result<Timestamp, ChainError> {
        let mut state = self
            .states
            .entry(lecture_id)
            .or_insert_with(|| ReminderChainState::new(lecture_id));

        let result = self.arm_with(&mut state, recurrence, notice);
        let never_armed = state.last_armed_instant.is_none();
        drop(state);

        if result.is_err() && never_armed {
            self.states
                .remove_if(&lecture_id, |_, state| state.last_armed_instant.is_none());
        }
        result
    }

    /// Handle a due chain firing.
    ///
    /// The chain state stays locked while the notice is delivered and the next
    /// firing is armed, so a concurrent [ReminderChain::cancel] either prevents
    /// the delivery or cancels the freshly armed firing.
    #[instrument(skip_all, fields(key = %due.key, token = due.job.token))]
    pub fn on_fire(&self, due: &DueJob) -> Firing {
        let key = due.key;
        let ReminderPayload::Recurring {
            lecture_id,
            notice,
            recurrence,
        } = &due.job.payload
        else {
            tracing::warn!(payload = ?due.job.payload, "not a weekly reminder, ignoring it");
            return Firing::Dropped;
        };

        let Some(mut state) = self.states.get_mut(lecture_id) else {
            self.deps.emit(ReminderEvent::Skipped {
                key,
                reason: SkipReason::ChainCancelled,
            });
            return Firing::Dropped;
        };

        if state.token != due.job.token {
            self.deps.emit(ReminderEvent::Superseded {
                key,
                token: due.job.token,
            });
            return Firing::Dropped;
        }

        self.deps.notifications.notify(notice);
        self.deps.emit(ReminderEvent::Fired {
            key,
            notice_id: notice.id,
        });

        let rearmed = WeeklyRecurrence::try_from(recurrence)
            .context(InvalidRecurrenceSnafu {
                lecture_id: *lecture_id,
            })
            .and_then(|recurrence| self.arm_with(&mut state, &recurrence, notice.clone()));
        // released only here: cancel must not slip in between delivery and re-arm
        drop(state);

        match rearmed {
            Ok(fire_at) => Firing::Rearmed(fire_at),
            Err(error) => {
                self.break_chain(key, *lecture_id, &error);
                Firing::Broken
            }
        }
    }

    /// Stop the chain of `lecture_id`. Returns whether anything was armed.
    #[instrument(skip(self))]
    pub fn cancel(&self, lecture_id: i64) -> Result<bool, ChainError> {
        let key = JobKey::RecurringLecture(lecture_id);

        let had_state = self.states.remove(&lecture_id).is_some();
        let was_pending = self.deps.queue.cancel(&key)?;

        let cancelled = had_state || was_pending;
        if cancelled {
            self.deps.emit(ReminderEvent::Cancelled { key });
        }
        Ok(cancelled)
    }

    /// Rebuild chain states from what the queue still holds. Returns the number of chains found.
    #[instrument(skip(self))]
    pub fn restore(&self) -> usize {
        let mut restored = 0;

        for pending in self.deps.queue.pending() {
            self.tokens.fetch_max(pending.job.token, Ordering::SeqCst);

            if let JobKey::RecurringLecture(lecture_id) = pending.key {
                let state = ReminderChainState {
                    entity_id: lecture_id,
                    last_armed_instant: Some(pending.job.fire_at),
                    token: pending.job.token,
                };
                self.states.insert(lecture_id, state);
                restored += 1;
            }
        }

        tracing::info!(restored, "restored weekly reminder chains");
        restored
    }

    pub fn armed_instant(&self, lecture_id: i64) -> Option<Timestamp> {
        self.states
            .get(&lecture_id)
            .and_then(|state| state.last_armed_instant)
    }

    pub fn armed_ids(&self) -> Vec<i64> {
        self.states.iter().map(|state| *state.key()).sorted().collect_vec()
    }

    pub fn state(&self, lecture_id: i64) -> Option<ReminderChainState> {
        self.states.get(&lecture_id).map(|state| state.clone())
    }

    /// Whether a firing for `lecture_id` is queued or was just taken off the queue.
    pub fn is_armed(&self, lecture_id: i64) -> bool {
        if self.deps.queue.is_pending(&JobKey::RecurringLecture(lecture_id)) {
            return true;
        }

        let now = self.deps.clock.now();
        let in_flight_since = now - Duration::minutes(IN_FLIGHT_MINUTES);
        self.armed_instant(lecture_id)
            .is_some_and(|armed| in_flight_since <= armed && armed <= now)
    }

    /// The next arm sequence number. Shared with one-time reminders.
    pub fn next_token(&self) -> u64 {
        self.tokens.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn arm_with(
        &self, state: &mut ReminderChainState, recurrence: &WeeklyRecurrence, notice: Notice,
    ) -> Result<Timestamp, ChainError> {
        let lecture_id = state.entity_id;
        let key = JobKey::RecurringLecture(lecture_id);

        let now = self.deps.clock.now();
        let fire_at = next_fire_instant(recurrence, &now);
        let delay = time::duration_until(&fire_at, &now).context(NonPositiveDelaySnafu {
            lecture_id,
            fire_at,
            now,
        })?;

        let token = self.next_token();
        let payload = ReminderPayload::Recurring {
            lecture_id,
            notice,
            recurrence: recurrence.into(),
        };
        self.deps
            .queue
            .enqueue_once(key, delay, Job::new(token, fire_at, payload))?;

        state.token = token;
        state.last_armed_instant = Some(fire_at);
        self.deps.emit(ReminderEvent::Armed {
            key,
            fire_at,
            token,
        });

        Ok(fire_at)
    }

    fn break_chain(&self, key: JobKey, lecture_id: i64, error: &ChainError) {
        tracing::error!(%key, %error, "weekly reminder for lecture `{}` cannot continue", lecture_id);
        self.states.remove(&lecture_id);
        self.deps.emit(ReminderEvent::ChainBroken {
            key,
            reason: error.to_string(),
        });
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ChainError {
    #[snafu(display("reminder for lecture `{lecture_id}` would fire at {fire_at}, which is not after {now}"))]
    NonPositiveDelay {
        lecture_id: i64,
        fire_at: Timestamp,
        now: Timestamp,
    },

    #[snafu(display("lecture `{lecture_id}` has an invalid weekly schedule: {source}"))]
    InvalidRecurrence {
        lecture_id: i64,
        source: ParseDayOfWeek,
    },

    #[snafu(transparent)]
    Queue { source: QueueError },
}
