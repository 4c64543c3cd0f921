use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use snafu::ResultExt as _;
use tokio::sync::{mpsc::UnboundedSender, Notify};
use tracing::instrument;

use super::*;
use crate::persist;
use crate::service::timing_map::TimingMap;
use crate::time::{self, Clock};

type Jobs = TimingMap<JobKey, Job, Timestamp>;

/// A deferred-action queue driven by tokio timers.
///
/// With a journal path every change is written to disk before the call
/// returns, and [TimerQueue::open] picks the jobs up again after a restart.
/// Jobs that came due while the process was down fire on the first drain.
pub struct TimerQueue {
    jobs: Mutex<Jobs>,
    journal: Option<PathBuf>,
    clock: Arc<dyn Clock>,
    wake: Notify,
}

impl TimerQueue {
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self {
            jobs: Mutex::new(Jobs::default()),
            journal: None,
            clock,
            wake: Notify::new(),
        }
    }

    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<std::path::Path>, clock: Arc<dyn Clock>) -> Result<Self, QueueError> {
        let path = path.as_ref().to_path_buf();
        let jobs: Jobs = persist::load(&path)
            .context(OpenJournalSnafu)?
            .unwrap_or_default();

        tracing::info!(pending = jobs.len(), "opened reminder journal");

        Ok(Self {
            jobs: Mutex::new(jobs),
            journal: Some(path),
            clock,
            wake: Notify::new(),
        })
    }

    /// Take every job due at the clock's current time off the queue, earliest first.
    ///
    /// When the journal cannot be written the jobs stay queued.
    pub fn drain_due(&self) -> Result<Vec<DueJob>, QueueError> {
        let now = self.clock.now();
        let mut jobs = self.lock();

        if jobs.next_expiry().map_or(true, |due| *due > now) {
            return Ok(Vec::new());
        }

        let mut remaining = jobs.clone();
        let due: Vec<DueJob> = remaining
            .drain_expired(&now)
            .into_iter()
            .map(|(key, job, _)| DueJob::new(key, job))
            .collect();
        let keys = due.iter().map(|due| due.key.to_string()).collect::<Vec<_>>();
        self.commit(&mut jobs, remaining, keys.join(","))?;

        Ok(due)
    }

    pub fn next_due(&self) -> Option<Timestamp> {
        self.lock().next_expiry().copied()
    }

    /// Forward due jobs to `sender` until the receiving side goes away.
    ///
    /// Sleeps until the earliest due job, waking early whenever a job is armed
    /// or cancelled, and never longer than `max_poll`.
    pub async fn run(self: Arc<Self>, sender: UnboundedSender<DueJob>, max_poll: std::time::Duration) {
        tracing::info!(?max_poll, "start the reminder queue");

        loop {
            let (due, failed) = match self.drain_due() {
                Ok(due) => (due, false),
                Err(error) => {
                    tracing::error!(%error, retry_in = ?max_poll, "could not take due reminders off the queue");
                    (Vec::new(), true)
                }
            };

            for job in due {
                tracing::debug!(key = %job.key, fire_at = %job.job.fire_at, "reminder came due");
                if sender.send(job).is_err() {
                    tracing::info!("reminder dispatcher is gone, stopping the queue");
                    return;
                }
            }

            let wait = match self.next_due() {
                Some(due) if !failed => time::duration_until(&due, &self.clock.now())
                    .unwrap_or_default()
                    .min(max_poll),
                _ => max_poll,
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {},
                _ = self.wake.notified() => {},
                _ = sender.closed() => {
                    tracing::info!("reminder dispatcher is gone, stopping the queue");
                    return;
                }
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Jobs> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace `jobs` with `next` once the journal holds it.
    fn commit(&self, jobs: &mut Jobs, next: Jobs, key: String) -> Result<(), QueueError> {
        if let Some(path) = &self.journal {
            persist::store(path, &next).context(JournalSnafu { key })?;
        }
        *jobs = next;
        Ok(())
    }
}

impl DeferredActionScheduler for TimerQueue {
    fn enqueue_once(&self, key: JobKey, delay: std::time::Duration, job: Job) -> Result<(), QueueError> {
        let delay_span = chrono::Duration::from_std(delay).context(DelayOutOfRangeSnafu { key, delay })?;
        let due = self.clock.now() + delay_span;

        {
            let mut jobs = self.lock();
            let mut next = jobs.clone();
            if next.refresh_and_insert(key, job, due).is_some() {
                tracing::debug!(%key, "replaced the reminder queued under the same key");
            }
            self.commit(&mut jobs, next, key.to_string())?;
        }

        self.wake.notify_one();
        Ok(())
    }

    fn cancel(&self, key: &JobKey) -> Result<bool, QueueError> {
        let removed = {
            let mut jobs = self.lock();
            let mut next = jobs.clone();
            let removed = next.remove(key).is_some();
            if removed {
                self.commit(&mut jobs, next, key.to_string())?;
            }
            removed
        };

        if removed {
            self.wake.notify_one();
        }
        Ok(removed)
    }

    fn is_pending(&self, key: &JobKey) -> bool {
        self.lock().is_scheduled(key)
    }

    fn pending(&self) -> Vec<PendingJob> {
        let jobs = self.lock();
        let mut pending: Vec<PendingJob> = jobs
            .iter()
            .map(|(key, job, due)| PendingJob::new(*key, *due, job.clone()))
            .collect();
        pending.sort_by(|a, b| a.due.cmp(&b.due).then(a.key.cmp(&b.key)));
        pending
    }
}
