use std::{ops::Deref, sync::Arc};

use derive_new::new;
use snafu::Snafu;
use tracing::instrument;

use crate::model::{Entity, EntityKey, Lecture, Task};
use crate::service::reminder::{ReminderError, ReminderService, Scheduled};
use crate::service::Collaborators;
use crate::store::{PlannerStore, StoreError};

/// The planner: every change to a task or lecture is saved first, then its reminder follows.
#[derive(Clone, new)]
pub struct App {
    pub store: Arc<PlannerStore>,
    pub reminders: Arc<ReminderService>,
}

impl Deref for App {
    type Target = ReminderService;

    fn deref(&self) -> &Self::Target {
        &self.reminders
    }
}

pub fn create_app(store: Arc<PlannerStore>, deps: Collaborators, lecture_offset: i64) -> App {
    let reminders = ReminderService::new(deps, store.clone(), lecture_offset);
    App::new(store, Arc::new(reminders))
}

impl App {
    #[instrument(skip_all, fields(title = %task.title))]
    pub fn add_task(&self, task: Task) -> Result<(Task, Scheduled), AppError> {
        let task = self.store.insert_task(task)?;
        tracing::info!(task_id = task.id, "added task `{}`", task.id);

        let scheduled = self.schedule_reminder(&Entity::Task(task.clone()))?;
        Ok((task, scheduled))
    }

    #[instrument(skip_all, fields(task_id = task.id))]
    pub fn update_task(&self, task: Task) -> Result<(Task, Scheduled), AppError> {
        let task = self.store.update_task(task)?;
        let scheduled = self.schedule_reminder(&Entity::Task(task.clone()))?;
        Ok((task, scheduled))
    }

    pub fn complete_task(&self, id: i64, completed: bool) -> Result<Task, AppError> {
        Ok(self.store.set_task_completed(id, completed)?)
    }

    #[instrument(skip(self))]
    pub fn delete_task(&self, id: i64) -> Result<Option<Task>, AppError> {
        let key = EntityKey::Task(id);
        self.cancel_reminder(key)?;
        self.dismiss(key);
        Ok(self.store.delete_task(id)?)
    }

    pub fn delete_completed_tasks(&self) -> Result<Vec<Task>, AppError> {
        let removed = self.store.delete_completed_tasks()?;
        for task in &removed {
            let key = EntityKey::Task(task.id);
            self.cancel_reminder(key)?;
            self.dismiss(key);
        }
        Ok(removed)
    }

    #[instrument(skip_all, fields(title = %lecture.title))]
    pub fn add_lecture(&self, lecture: Lecture) -> Result<(Lecture, Scheduled), AppError> {
        let lecture = self.store.insert_lecture(lecture)?;
        tracing::info!(lecture_id = lecture.id, "added lecture `{}`", lecture.id);

        let scheduled = self.schedule_reminder(&Entity::Lecture(lecture.clone()))?;
        Ok((lecture, scheduled))
    }

    #[instrument(skip_all, fields(lecture_id = lecture.id))]
    pub fn update_lecture(&self, lecture: Lecture) -> Result<(Lecture, Scheduled), AppError> {
        let lecture = self.store.update_lecture(lecture)?;
        let scheduled = self.schedule_reminder(&Entity::Lecture(lecture.clone()))?;
        Ok((lecture, scheduled))
    }

    #[instrument(skip(self))]
    pub fn delete_lecture(&self, id: i64) -> Result<Option<Lecture>, AppError> {
        let key = EntityKey::Lecture(id);
        self.cancel_reminder(key)?;
        self.dismiss(key);
        Ok(self.store.delete_lecture(id)?)
    }
}

#[derive(Debug, Snafu)]
pub enum AppError {
    #[snafu(transparent)]
    Store { source: StoreError },

    #[snafu(transparent)]
    Reminder { source: ReminderError },
}
