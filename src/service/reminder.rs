use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use snafu::Snafu;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::instrument;

use super::chain::{ChainError, Firing, ReminderChain};
use super::queue::{DueJob, Job, JobKey, PendingJob, QueueError, ReminderPayload};
use super::recurrence::{one_shot_delay, one_shot_fire_instant};
use super::Collaborators;
use crate::event::{ReminderEvent, SkipReason};
use crate::model::{Entity, EntityKey, Lecture, Notice, Task};
use crate::store::EntityStore;
use crate::time::Timestamp;

/// The outcome of [ReminderService::schedule_reminder].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheduled {
    Armed(Timestamp),
    Skipped(SkipReason),
    Cancelled,
}

pub struct ReminderService {
    deps: Collaborators,
    chain: ReminderChain,
    /// Token of the one-time reminder currently armed under each key.
    one_shots: DashMap<JobKey, u64>,
    store: Arc<dyn EntityStore>,
    lecture_offset: i64,
}

impl ReminderService {
    pub fn new(deps: Collaborators, store: Arc<dyn EntityStore>, lecture_offset: i64) -> Self {
        Self {
            chain: ReminderChain::new(deps.clone()),
            one_shots: DashMap::new(),
            deps,
            store,
            lecture_offset,
        }
    }

    pub fn chain(&self) -> &ReminderChain {
        &self.chain
    }

    /// Arm the reminder `entity` asks for, or cancel it when its reminder is off.
    #[instrument(skip_all, fields(entity = %entity.key()))]
    pub fn schedule_reminder(&self, entity: &Entity) -> Result<Scheduled, ReminderError> {
        match entity {
            Entity::Task(task) => self.schedule_task(task),
            Entity::Lecture(lecture) => self.schedule_lecture(lecture),
        }
    }

    /// Drop every queued reminder of `entity`. Cancelling twice is harmless.
    #[instrument(skip(self))]
    pub fn cancel_reminder(&self, entity: EntityKey) -> Result<(), ReminderError> {
        self.cancel_one_shot(JobKey::one_shot(entity))?;

        if let EntityKey::Lecture(id) = entity {
            self.chain.cancel(id)?;
        }
        Ok(())
    }

    /// Remove the notification of `entity` if it is still shown.
    pub fn dismiss(&self, entity: EntityKey) {
        let id = match entity {
            EntityKey::Task(id) => id,
            EntityKey::Lecture(id) => id + self.lecture_offset,
        };
        self.deps.notifications.cancel(id);
    }

    /// Carry out a job that came due.
    #[instrument(skip_all, fields(key = %due.key))]
    pub fn dispatch(&self, due: DueJob) {
        match &due.job.payload {
            ReminderPayload::OneShot { notice, .. } => self.fire_one_shot(&due, notice),
            ReminderPayload::Recurring { .. } => {
                if let Firing::Rearmed(next) = self.chain.on_fire(&due) {
                    tracing::debug!(%next, "next weekly reminder armed");
                }
            }
        }
    }

    /// Dispatch due jobs as they arrive until the queue driver stops.
    pub async fn dispatch_all(self: Arc<Self>, mut due_jobs: UnboundedReceiver<DueJob>) {
        tracing::info!("start dispatching reminders");

        while let Some(due) = due_jobs.recv().await {
            self.dispatch(due);
        }

        tracing::info!("reminder queue closed, stop dispatching");
    }

    /// Pick up the reminders the queue still holds from a previous run.
    /// Returns the number of chains found.
    pub fn restore(&self) -> usize {
        for pending in self.deps.queue.pending() {
            if let ReminderPayload::OneShot { .. } = pending.job.payload {
                self.one_shots.insert(pending.key, pending.job.token);
            }
        }
        self.chain.restore()
    }

    pub fn pending(&self) -> Vec<PendingJob> {
        self.deps.queue.pending()
    }

    /// Lectures that want a weekly reminder but have nothing armed.
    pub fn unarmed_lectures(&self) -> Vec<Lecture> {
        self.store
            .recurring_lectures()
            .into_iter()
            .filter(|lecture| lecture.wants_weekly_reminder() && !self.chain.is_armed(lecture.id))
            .collect()
    }

    /// Re-arm every lecture reported by [ReminderService::unarmed_lectures]. Returns their ids.
    #[instrument(skip(self))]
    pub fn reconcile(&self) -> Vec<i64> {
        let mut rearmed = Vec::new();

        for lecture in self.unarmed_lectures() {
            let notice = lecture.notice(self.lecture_offset);
            match self.chain.arm(&lecture.recurrence(), lecture.id, notice) {
                Ok(_) => {
                    self.deps.emit(ReminderEvent::Reconciled {
                        lecture_id: lecture.id,
                    });
                    rearmed.push(lecture.id);
                }
                Err(error) => {
                    tracing::error!(%error, "could not re-arm the reminder of lecture `{}`", lecture.id);
                }
            }
        }

        rearmed
    }

    fn schedule_task(&self, task: &Task) -> Result<Scheduled, ReminderError> {
        let entity = EntityKey::Task(task.id);

        if !task.reminder_enabled {
            self.cancel_reminder(entity)?;
            return Ok(Scheduled::Cancelled);
        }

        let Some(lead_minutes) = task.reminder_minutes else {
            return self.skip(JobKey::one_shot(entity), SkipReason::MissingLeadTime);
        };

        self.schedule_one_shot(entity, task.due_date, lead_minutes, task.notice())
    }

    fn schedule_lecture(&self, lecture: &Lecture) -> Result<Scheduled, ReminderError> {
        let entity = EntityKey::Lecture(lecture.id);

        if !lecture.reminder_enabled {
            self.cancel_reminder(entity)?;
            return Ok(Scheduled::Cancelled);
        }

        let notice = lecture.notice(self.lecture_offset);

        if lecture.is_recurring {
            self.cancel_one_shot(JobKey::one_shot(entity))?;
            let fire_at = self.chain.arm(&lecture.recurrence(), lecture.id, notice)?;
            return Ok(Scheduled::Armed(fire_at));
        }

        self.chain.cancel(lecture.id)?;
        match lecture.specific_date {
            Some(target) => {
                self.schedule_one_shot(entity, target, lecture.reminder_minutes_before, notice)
            }
            None => self.skip(JobKey::one_shot(entity), SkipReason::MissingDate),
        }
    }

    fn schedule_one_shot(
        &self, entity: EntityKey, target: Timestamp, lead_minutes: u32, notice: Notice,
    ) -> Result<Scheduled, ReminderError> {
        let key = JobKey::one_shot(entity);
        let now = self.deps.clock.now();

        let Some(delay) = one_shot_delay(&target, lead_minutes, &now) else {
            return self.skip(key, SkipReason::AlreadyPassed);
        };

        let fire_at = one_shot_fire_instant(&target, lead_minutes);
        let token = self.chain.next_token();
        let payload = ReminderPayload::OneShot { entity, notice };

        let slot = self.one_shots.entry(key);
        self.deps
            .queue
            .enqueue_once(key, delay, Job::new(token, fire_at, payload))?;
        slot.insert(token);

        self.deps.emit(ReminderEvent::Armed {
            key,
            fire_at,
            token,
        });
        Ok(Scheduled::Armed(fire_at))
    }

    /// Nothing gets armed; an older job under the same key must not fire either.
    fn skip(&self, key: JobKey, reason: SkipReason) -> Result<Scheduled, ReminderError> {
        self.one_shots.remove(&key);
        self.deps.queue.cancel(&key)?;
        self.deps.emit(ReminderEvent::Skipped { key, reason });
        Ok(Scheduled::Skipped(reason))
    }

    fn cancel_one_shot(&self, key: JobKey) -> Result<(), ReminderError> {
        let had_token = self.one_shots.remove(&key).is_some();
        if self.deps.queue.cancel(&key)? || had_token {
            self.deps.emit(ReminderEvent::Cancelled { key });
        }
        Ok(())
    }

    /// Deliver a one-time reminder unless it was cancelled or re-armed after it was queued.
    fn fire_one_shot(&self, due: &DueJob, notice: &Notice) {
        let key = due.key;
        let token = due.job.token;

        // the entry stays locked until the notice is out, so cancelling waits for it
        let Entry::Occupied(current) = self.one_shots.entry(key) else {
            self.deps.emit(ReminderEvent::Skipped {
                key,
                reason: SkipReason::ReminderCancelled,
            });
            return;
        };

        if *current.get() != token {
            self.deps.emit(ReminderEvent::Superseded { key, token });
            return;
        }

        self.deps.notifications.notify(notice);
        self.deps.emit(ReminderEvent::Fired {
            key,
            notice_id: notice.id,
        });
        current.remove();
    }
}

#[derive(Debug, Snafu)]
pub enum ReminderError {
    #[snafu(transparent)]
    Chain { source: ChainError },

    #[snafu(transparent)]
    Queue { source: QueueError },
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::model::{DayOfWeek, LECTURE_NOTIFICATION_OFFSET};
    use crate::service::queue::DeferredActionScheduler;
    use crate::service::testing::{at, Harness};
    use crate::store::PlannerStore;

    struct Fixture {
        harness: Harness,
        store: Arc<PlannerStore>,
        service: ReminderService,
    }

    fn fixture(now: Timestamp) -> Fixture {
        let harness = Harness::starting_at(now);
        let store = Arc::new(PlannerStore::in_memory());
        let service = ReminderService::new(harness.collaborators(), store.clone(), LECTURE_NOTIFICATION_OFFSET);
        Fixture {
            harness,
            store,
            service,
        }
    }

    fn task(due: Timestamp, lead: Option<u32>) -> Task {
        let mut task = Task::new("Essay".to_string(), due);
        task.id = 7;
        task.reminder_enabled = true;
        task.reminder_minutes = lead;
        task
    }

    fn weekly_lecture(id: i64) -> Lecture {
        let mut lecture = Lecture::new("Compilers".to_string(), DayOfWeek::Wednesday, "09:00".to_string());
        lecture.id = id;
        lecture.room = "A1".to_string();
        lecture.reminder_enabled = true;
        lecture
    }

    #[test]
    fn task_reminder_fires_once() {
        let fixture = fixture(at(15, 8, 0));
        let scheduled = fixture
            .service
            .schedule_reminder(&Entity::Task(task(at(16, 9, 0), Some(60))))
            .unwrap();
        assert_eq!(scheduled, Scheduled::Armed(at(16, 8, 0)));

        fixture.harness.clock.set(at(16, 8, 0));
        for due in fixture.harness.queue.drain_due().unwrap() {
            fixture.service.dispatch(due);
        }

        let delivered = fixture.harness.sink.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].id, 7);
        assert_eq!(delivered[0].title, "Task Reminder: Essay");
        assert!(fixture.harness.queue.pending().is_empty());
    }

    #[test]
    fn past_task_reminder_is_skipped() {
        let fixture = fixture(at(16, 8, 30));
        let scheduled = fixture
            .service
            .schedule_reminder(&Entity::Task(task(at(16, 9, 0), Some(60))))
            .unwrap();

        assert_eq!(scheduled, Scheduled::Skipped(SkipReason::AlreadyPassed));
        assert!(fixture.harness.queue.pending().is_empty());
        assert!(fixture.harness.events.events().contains(&ReminderEvent::Skipped {
            key: JobKey::Task(7),
            reason: SkipReason::AlreadyPassed,
        }));
    }

    #[test]
    fn reminder_for_yesterday_is_dropped() {
        let fixture = fixture(at(10, 12, 0));
        let scheduled = fixture
            .service
            .schedule_reminder(&Entity::Task(task(at(9, 9, 0), Some(60))))
            .unwrap();

        assert_eq!(scheduled, Scheduled::Skipped(SkipReason::AlreadyPassed));
        assert!(fixture.harness.queue.pending().is_empty());
    }

    #[test]
    fn moving_a_task_into_the_past_drops_its_old_reminder() {
        let fixture = fixture(at(15, 8, 0));
        fixture
            .service
            .schedule_reminder(&Entity::Task(task(at(20, 9, 0), Some(30))))
            .unwrap();

        let moved = task(at(15, 8, 10), Some(30));
        fixture.service.schedule_reminder(&Entity::Task(moved)).unwrap();
        assert!(!fixture.harness.queue.is_pending(&JobKey::Task(7)));
    }

    #[test]
    fn reminder_cancelled_while_in_flight_is_not_delivered() {
        let fixture = fixture(at(15, 8, 0));
        fixture
            .service
            .schedule_reminder(&Entity::Task(task(at(16, 9, 0), Some(60))))
            .unwrap();

        fixture.harness.clock.set(at(16, 8, 0));
        let in_flight = fixture.harness.queue.drain_due().unwrap();
        fixture.service.cancel_reminder(EntityKey::Task(7)).unwrap();
        for due in in_flight {
            fixture.service.dispatch(due);
        }

        assert!(fixture.harness.sink.delivered().is_empty());
        assert!(fixture.harness.events.events().contains(&ReminderEvent::Skipped {
            key: JobKey::Task(7),
            reason: SkipReason::ReminderCancelled,
        }));
    }

    #[test]
    fn rescheduled_reminder_drops_the_stale_firing() {
        let fixture = fixture(at(15, 8, 0));
        fixture
            .service
            .schedule_reminder(&Entity::Task(task(at(16, 9, 0), Some(60))))
            .unwrap();

        fixture.harness.clock.set(at(16, 8, 0));
        let in_flight = fixture.harness.queue.drain_due().unwrap();
        let stale_token = in_flight[0].job.token;
        fixture
            .service
            .schedule_reminder(&Entity::Task(task(at(17, 9, 0), Some(60))))
            .unwrap();
        for due in in_flight {
            fixture.service.dispatch(due);
        }

        assert!(fixture.harness.sink.delivered().is_empty());
        assert!(fixture.harness.events.events().contains(&ReminderEvent::Superseded {
            key: JobKey::Task(7),
            token: stale_token,
        }));

        fixture.harness.clock.set(at(17, 8, 0));
        for due in fixture.harness.queue.drain_due().unwrap() {
            fixture.service.dispatch(due);
        }
        assert_eq!(fixture.harness.sink.delivered().len(), 1);
    }

    #[test]
    fn restore_lets_queued_one_time_reminders_fire() {
        let fixture = fixture(at(15, 8, 0));
        fixture
            .service
            .schedule_reminder(&Entity::Task(task(at(16, 9, 0), Some(60))))
            .unwrap();

        let restarted = ReminderService::new(
            fixture.harness.collaborators(),
            fixture.store.clone(),
            LECTURE_NOTIFICATION_OFFSET,
        );
        restarted.restore();

        fixture.harness.clock.set(at(16, 8, 0));
        for due in fixture.harness.queue.drain_due().unwrap() {
            restarted.dispatch(due);
        }
        assert_eq!(fixture.harness.sink.delivered().len(), 1);
    }

    #[test]
    fn task_without_lead_time_is_skipped() {
        let fixture = fixture(at(15, 8, 0));
        let scheduled = fixture
            .service
            .schedule_reminder(&Entity::Task(task(at(20, 9, 0), None)))
            .unwrap();
        assert_eq!(scheduled, Scheduled::Skipped(SkipReason::MissingLeadTime));
    }

    #[test]
    fn disabling_a_reminder_cancels_it() {
        let fixture = fixture(at(15, 8, 0));
        let mut task = task(at(20, 9, 0), Some(30));
        fixture.service.schedule_reminder(&Entity::Task(task.clone())).unwrap();

        task.reminder_enabled = false;
        let scheduled = fixture.service.schedule_reminder(&Entity::Task(task)).unwrap();

        assert_eq!(scheduled, Scheduled::Cancelled);
        assert!(fixture.harness.queue.pending().is_empty());
    }

    #[test]
    fn weekly_lecture_uses_its_chain() {
        let fixture = fixture(at(15, 8, 0));
        let scheduled = fixture
            .service
            .schedule_reminder(&Entity::Lecture(weekly_lecture(3)))
            .unwrap();

        assert_eq!(scheduled, Scheduled::Armed(at(17, 8, 45)));
        assert!(fixture.harness.queue.is_pending(&JobKey::RecurringLecture(3)));

        fixture.harness.clock.set(at(17, 8, 45));
        for due in fixture.harness.queue.drain_due().unwrap() {
            fixture.service.dispatch(due);
        }

        let delivered = fixture.harness.sink.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].id, 10_003);
        assert_eq!(delivered[0].body, "Starts at 09:00 in A1");
        assert_eq!(fixture.service.chain().armed_instant(3), Some(at(24, 8, 45)));
    }

    #[test]
    fn one_off_lecture_fires_before_its_date() {
        let fixture = fixture(at(15, 8, 0));
        let mut lecture = weekly_lecture(4);
        lecture.is_recurring = false;
        lecture.specific_date = Some(at(19, 14, 0));

        let scheduled = fixture.service.schedule_reminder(&Entity::Lecture(lecture.clone())).unwrap();
        assert_eq!(scheduled, Scheduled::Armed(at(19, 13, 45)));
        assert!(fixture.harness.queue.is_pending(&JobKey::Lecture(4)));

        lecture.specific_date = None;
        let scheduled = fixture.service.schedule_reminder(&Entity::Lecture(lecture)).unwrap();
        assert_eq!(scheduled, Scheduled::Skipped(SkipReason::MissingDate));
        assert!(fixture.harness.queue.pending().is_empty());
    }

    #[test]
    fn switching_a_lecture_to_weekly_drops_the_one_off_reminder() {
        let fixture = fixture(at(15, 8, 0));
        let mut lecture = weekly_lecture(5);
        lecture.is_recurring = false;
        lecture.specific_date = Some(at(19, 14, 0));
        fixture.service.schedule_reminder(&Entity::Lecture(lecture.clone())).unwrap();

        lecture.is_recurring = true;
        fixture.service.schedule_reminder(&Entity::Lecture(lecture)).unwrap();

        let keys: Vec<JobKey> = fixture.harness.queue.pending().iter().map(|job| job.key).collect();
        assert_eq!(keys, vec![JobKey::RecurringLecture(5)]);
    }

    #[test]
    fn cancelling_a_lecture_stops_everything() {
        let fixture = fixture(at(15, 8, 0));
        fixture
            .service
            .schedule_reminder(&Entity::Lecture(weekly_lecture(3)))
            .unwrap();

        fixture.service.cancel_reminder(EntityKey::Lecture(3)).unwrap();
        fixture.service.cancel_reminder(EntityKey::Lecture(3)).unwrap();

        assert!(fixture.harness.queue.pending().is_empty());
        assert!(fixture.service.chain().armed_ids().is_empty());
    }

    #[test]
    fn dismiss_uses_the_notification_identity() {
        let fixture = fixture(at(15, 8, 0));
        fixture.service.dismiss(EntityKey::Task(7));
        fixture.service.dismiss(EntityKey::Lecture(3));
        assert_eq!(fixture.harness.sink.cancelled(), vec![7, 10_003]);
    }

    #[test]
    fn reconcile_rearms_lost_chains() {
        let fixture = fixture(at(15, 8, 0));
        let lecture = fixture.store.insert_lecture(weekly_lecture(0)).unwrap();
        let mut quiet = weekly_lecture(0);
        quiet.reminder_enabled = false;
        fixture.store.insert_lecture(quiet).unwrap();

        let ids: Vec<i64> = fixture.service.unarmed_lectures().iter().map(|l| l.id).collect();
        assert_eq!(ids, vec![lecture.id]);

        assert_eq!(fixture.service.reconcile(), vec![lecture.id]);
        assert!(fixture.service.unarmed_lectures().is_empty());
        assert!(fixture.service.reconcile().is_empty());
        assert!(fixture.harness.events.events().contains(&ReminderEvent::Reconciled {
            lecture_id: lecture.id,
        }));
    }

    #[tokio::test]
    async fn dispatch_all_runs_until_the_channel_closes() {
        let fixture = fixture(at(15, 8, 0));
        let service = Arc::new(fixture.service);
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let dispatcher = tokio::spawn(service.clone().dispatch_all(rx));

        service
            .schedule_reminder(&Entity::Task(task(at(15, 9, 1), Some(60))))
            .unwrap();
        fixture.harness.clock.advance(Duration::minutes(1));
        for due in fixture.harness.queue.drain_due().unwrap() {
            tx.send(due).unwrap();
        }
        drop(tx);

        dispatcher.await.unwrap();
        assert_eq!(fixture.harness.sink.delivered().len(), 1);
    }
}
