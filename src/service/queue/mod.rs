//! The durable deferred-action collaborator: arm exactly one future firing per key.

use std::str::FromStr;
use std::time::Duration;

use derive_new::new;
use serde::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay};
use snafu::Snafu;

use crate::model::{EntityKey, Notice, RecurrenceRecord};
use crate::persist::PersistError;
use crate::time::Timestamp;

pub use timer::*;

mod timer;

/// Identity of a queued reminder. Arming under an existing key replaces the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, SerializeDisplay, DeserializeFromStr)]
pub enum JobKey {
    Task(i64),
    Lecture(i64),
    RecurringLecture(i64),
}

const TASK_PREFIX: &str = "task_reminder_";
const LECTURE_PREFIX: &str = "lecture_reminder_";
const RECURRING_LECTURE_PREFIX: &str = "recurring_lecture_reminder_";

impl JobKey {
    pub fn one_shot(entity: EntityKey) -> Self {
        match entity {
            EntityKey::Task(id) => JobKey::Task(id),
            EntityKey::Lecture(id) => JobKey::Lecture(id),
        }
    }
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKey::Task(id) => write!(f, "{TASK_PREFIX}{id}"),
            JobKey::Lecture(id) => write!(f, "{LECTURE_PREFIX}{id}"),
            JobKey::RecurringLecture(id) => write!(f, "{RECURRING_LECTURE_PREFIX}{id}"),
        }
    }
}

impl FromStr for JobKey {
    type Err = ParseJobKey;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let kinds: [(&str, fn(i64) -> JobKey); 3] = [
            (RECURRING_LECTURE_PREFIX, JobKey::RecurringLecture),
            (LECTURE_PREFIX, JobKey::Lecture),
            (TASK_PREFIX, JobKey::Task),
        ];

        kinds
            .into_iter()
            .find_map(|(prefix, kind)| {
                let id = input.strip_prefix(prefix)?.parse().ok()?;
                Some(kind(id))
            })
            .ok_or_else(|| ParseJobKey::new(input.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Snafu, new)]
#[snafu(display("invalid reminder key: `{}`", text))]
pub struct ParseJobKey {
    pub text: String,
}

/// What a firing has to do. A recurring payload carries everything needed to re-arm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReminderPayload {
    OneShot {
        entity: EntityKey,
        notice: Notice,
    },
    Recurring {
        lecture_id: i64,
        notice: Notice,
        recurrence: RecurrenceRecord,
    },
}

impl ReminderPayload {
    pub fn notice(&self) -> &Notice {
        match self {
            ReminderPayload::OneShot { notice, .. } | ReminderPayload::Recurring { notice, .. } => notice,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, new)]
pub struct Job {
    /// Arm sequence number, used to recognise superseded firings.
    pub token: u64,
    pub fire_at: Timestamp,
    pub payload: ReminderPayload,
}

/// A job that came due and was taken off the queue.
#[derive(Debug, Clone, PartialEq, new)]
pub struct DueJob {
    pub key: JobKey,
    pub job: Job,
}

#[derive(Debug, Clone, PartialEq, new)]
pub struct PendingJob {
    pub key: JobKey,
    pub due: Timestamp,
    pub job: Job,
}

pub trait DeferredActionScheduler: Send + Sync {
    /// Arm `job` to come due after `delay`, replacing anything queued under `key`.
    fn enqueue_once(&self, key: JobKey, delay: Duration, job: Job) -> Result<(), QueueError>;

    /// Drop whatever is queued under `key`. Returns whether something was pending.
    fn cancel(&self, key: &JobKey) -> Result<bool, QueueError>;

    fn is_pending(&self, key: &JobKey) -> bool;

    /// Everything still waiting, earliest first.
    fn pending(&self) -> Vec<PendingJob>;
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum QueueError {
    #[snafu(display("could not journal reminder `{key}`: {source}"))]
    Journal { key: String, source: PersistError },

    #[snafu(display("could not open the reminder journal: {source}"))]
    OpenJournal { source: PersistError },

    #[snafu(display("delay of {delay:?} for `{key}` is out of range"))]
    DelayOutOfRange {
        key: JobKey,
        delay: Duration,
        source: chrono::OutOfRangeError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_use_their_work_names() {
        assert_eq!(JobKey::Task(3).to_string(), "task_reminder_3");
        assert_eq!(JobKey::Lecture(3).to_string(), "lecture_reminder_3");
        assert_eq!(JobKey::RecurringLecture(3).to_string(), "recurring_lecture_reminder_3");
    }

    #[test]
    fn keys_parse_back() {
        for key in [JobKey::Task(12), JobKey::Lecture(-1), JobKey::RecurringLecture(40)] {
            assert_eq!(key.to_string().parse::<JobKey>(), Ok(key));
        }

        assert!("reminder_3".parse::<JobKey>().is_err());
        assert!("task_reminder_x".parse::<JobKey>().is_err());
    }

    #[test]
    fn payload_is_tagged_by_kind() {
        let payload = ReminderPayload::Recurring {
            lecture_id: 2,
            notice: Notice::new(10_002, "Lecture: Compilers".to_string(), "Starts at 09:00 in A1".to_string()),
            recurrence: RecurrenceRecord::new("MONDAY".to_string(), "09:00".to_string(), 15),
        };

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "recurring");
        assert_eq!(json["recurrence"]["day_of_week"], "MONDAY");

        let back: ReminderPayload = serde_json::from_value(json).unwrap();
        assert_eq!(back, payload);
    }
}
