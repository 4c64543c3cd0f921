//! The planner's tasks and lectures, kept in memory and snapshotted to a JSON file.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, PoisonError};

use dashmap::DashMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use snafu::{ensure, Location, OptionExt as _, ResultExt as _, Snafu};
use tracing::instrument;

use crate::model::{DayOfWeek, EntityKey, Lecture, Task};
use crate::persist::{self, PersistError};
use crate::time::Timestamp;
use crate::Located;

/// What the reminder service needs to know about stored entities.
pub trait EntityStore: Send + Sync {
    /// Every lecture that repeats weekly, whether or not its reminder is on.
    fn recurring_lectures(&self) -> Vec<Lecture>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    tasks: Vec<Task>,
    #[serde(default)]
    lectures: Vec<Lecture>,
}

#[derive(Debug, Default)]
pub struct PlannerStore {
    tasks: DashMap<i64, Task>,
    lectures: DashMap<i64, Lecture>,
    last_task_id: AtomicI64,
    last_lecture_id: AtomicI64,
    path: Option<PathBuf>,
    saving: Mutex<()>,
}

impl PlannerStore {
    pub fn in_memory() -> Self {
        Self::default()
    }

    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let snapshot: Snapshot = persist::load(&path).context(LoadSnafu)?.unwrap_or_default();

        let store = Self {
            last_task_id: AtomicI64::new(snapshot.tasks.iter().map(|task| task.id).max().unwrap_or(0)),
            last_lecture_id: AtomicI64::new(
                snapshot.lectures.iter().map(|lecture| lecture.id).max().unwrap_or(0),
            ),
            tasks: snapshot.tasks.into_iter().map(|task| (task.id, task)).collect(),
            lectures: snapshot
                .lectures
                .into_iter()
                .map(|lecture| (lecture.id, lecture))
                .collect(),
            path: Some(path),
            saving: Mutex::new(()),
        };

        tracing::info!(
            tasks = store.tasks.len(),
            lectures = store.lectures.len(),
            "opened planner"
        );
        Ok(store)
    }

    pub fn insert_task(&self, mut task: Task) -> Result<Task, StoreError> {
        task.id = self.last_task_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.tasks.insert(task.id, task.clone());
        self.save()?;
        Ok(task)
    }

    pub fn update_task(&self, task: Task) -> Result<Task, StoreError> {
        let key = EntityKey::Task(task.id);
        ensure!(self.tasks.contains_key(&task.id), MissingEntitySnafu { key });

        self.tasks.insert(task.id, task.clone());
        self.save()?;
        Ok(task)
    }

    pub fn delete_task(&self, id: i64) -> Result<Option<Task>, StoreError> {
        let removed = self.tasks.remove(&id).map(|(_, task)| task);
        if removed.is_some() {
            self.save()?;
        }
        Ok(removed)
    }

    pub fn set_task_completed(&self, id: i64, completed: bool) -> Result<Task, StoreError> {
        let task = {
            let mut task = self
                .tasks
                .get_mut(&id)
                .context(MissingEntitySnafu { key: EntityKey::Task(id) })?;
            task.is_completed = completed;
            task.clone()
        };

        self.save()?;
        Ok(task)
    }

    /// Remove every completed task and return what was removed.
    pub fn delete_completed_tasks(&self) -> Result<Vec<Task>, StoreError> {
        let removed = self
            .tasks_by_completion(true)
            .into_iter()
            .filter_map(|task| self.tasks.remove(&task.id).map(|(_, task)| task))
            .collect_vec();

        if !removed.is_empty() {
            self.save()?;
        }
        Ok(removed)
    }

    pub fn task(&self, id: i64) -> Option<Task> {
        self.tasks.get(&id).map(|task| task.clone())
    }

    /// Every task, soonest due first.
    pub fn tasks(&self) -> Vec<Task> {
        self.select_tasks(|_| true)
    }

    /// Tasks due within `from..=to`, soonest due first.
    pub fn tasks_between(&self, from: Timestamp, to: Timestamp) -> Vec<Task> {
        self.select_tasks(|task| from <= task.due_date && task.due_date <= to)
    }

    /// Open tasks soonest due first, completed ones most recently due first.
    pub fn tasks_by_completion(&self, completed: bool) -> Vec<Task> {
        let mut tasks = self.select_tasks(|task| task.is_completed == completed);
        if completed {
            tasks.reverse();
        }
        tasks
    }

    pub fn search_tasks(&self, query: &str) -> Vec<Task> {
        self.select_tasks(|task| task.matches(query))
    }

    pub fn insert_lecture(&self, mut lecture: Lecture) -> Result<Lecture, StoreError> {
        lecture.id = self.last_lecture_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.lectures.insert(lecture.id, lecture.clone());
        self.save()?;
        Ok(lecture)
    }

    pub fn update_lecture(&self, lecture: Lecture) -> Result<Lecture, StoreError> {
        let key = EntityKey::Lecture(lecture.id);
        ensure!(self.lectures.contains_key(&lecture.id), MissingEntitySnafu { key });

        self.lectures.insert(lecture.id, lecture.clone());
        self.save()?;
        Ok(lecture)
    }

    pub fn delete_lecture(&self, id: i64) -> Result<Option<Lecture>, StoreError> {
        let removed = self.lectures.remove(&id).map(|(_, lecture)| lecture);
        if removed.is_some() {
            self.save()?;
        }
        Ok(removed)
    }

    pub fn lecture(&self, id: i64) -> Option<Lecture> {
        self.lectures.get(&id).map(|lecture| lecture.clone())
    }

    /// The weekly timetable, ordered by day and then start time.
    pub fn lectures(&self) -> Vec<Lecture> {
        self.lectures
            .iter()
            .map(|lecture| lecture.clone())
            .sorted_by_key(|lecture| (lecture.day_of_week.ordinal(), lecture.start(), lecture.id))
            .collect_vec()
    }

    pub fn lectures_on(&self, day: DayOfWeek) -> Vec<Lecture> {
        self.lectures
            .iter()
            .filter(|lecture| lecture.day_of_week == day)
            .map(|lecture| lecture.clone())
            .sorted_by_key(|lecture| (lecture.start(), lecture.id))
            .collect_vec()
    }

    fn select_tasks(&self, keep: impl Fn(&Task) -> bool) -> Vec<Task> {
        self.tasks
            .iter()
            .filter(|task| keep(task.value()))
            .map(|task| task.clone())
            .sorted_by_key(|task| (task.due_date, task.id))
            .collect_vec()
    }

    fn save(&self) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let _saving = self.saving.lock().unwrap_or_else(PoisonError::into_inner);
        let snapshot = Snapshot {
            tasks: self
                .tasks
                .iter()
                .map(|task| task.clone())
                .sorted_by_key(|task| task.id)
                .collect(),
            lectures: self
                .lectures
                .iter()
                .map(|lecture| lecture.clone())
                .sorted_by_key(|lecture| lecture.id)
                .collect(),
        };

        persist::store(path, &snapshot).context(SaveSnafu)
    }
}

impl EntityStore for PlannerStore {
    fn recurring_lectures(&self) -> Vec<Lecture> {
        self.lectures
            .iter()
            .filter(|lecture| lecture.is_recurring)
            .map(|lecture| lecture.clone())
            .sorted_by_key(|lecture| lecture.id)
            .collect_vec()
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StoreError {
    #[snafu(display("failed to load the planner at {location}: {source}"))]
    Load {
        source: PersistError,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("failed to save the planner at {location}: {source}"))]
    Save {
        source: PersistError,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("{key} does not exist (at {location})"))]
    MissingEntity {
        key: EntityKey,
        #[snafu(implicit)]
        location: Location,
    },
}

impl Located for StoreError {
    fn location(&self) -> Location {
        match self {
            StoreError::Load { location, .. }
            | StoreError::Save { location, .. }
            | StoreError::MissingEntity { location, .. } => *location,
        }
    }
}
