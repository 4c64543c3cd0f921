use chrono::Local;
use rustyline::{history::MemHistory, Editor};
use serde::{de::DeserializeOwned, Serialize};
use snafu::{OptionExt, ResultExt, Snafu};

use crate::{
    app::{App, AppError},
    model::{Lecture, Task},
    service::{recurrence::next_occurrence, reminder::Scheduled},
};

mod parse;

/// Fields to overwrite on an existing task or lecture.
pub type Patch = serde_json::Map<String, serde_json::Value>;

pub struct Repl {
    inner: Editor<(), MemHistory>,
    message: Option<String>,
}

impl Repl {
    pub fn new() -> Result<Self, ReplError> {
        let config = rustyline::Config::default();
        let inner =
            rustyline::Editor::with_history(config, MemHistory::new()).context(RustylineSnafu)?;

        let repl = Self {
            inner,
            message: None,
        };
        Ok(repl)
    }

    pub fn prompt(&mut self) -> Action {
        let message = self
            .message
            .as_ref()
            .map(|msg| format!("  {msg}\n"))
            .unwrap_or_default();
        let prompt = format!("{}planner> ", message);

        let Ok(input) = self.inner.readline(&prompt) else {
            return Action::Exit;
        };

        self.message = None;

        self.inner.add_history_entry(input.clone()).ok();

        match parse::parse(&input) {
            Ok(action) => action,
            Err(err) => {
                self.reply(err.to_string());
                Action::None
            }
        }
    }

    pub fn reply(&mut self, message: String) {
        if let Some(msg) = self.message.as_mut() {
            msg.push('\n');
            msg.push_str(&message);
        } else {
            self.message = Some(message);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Action {
    AddTask { task: Task },
    UpdateTask { id: i64, patch: Patch },
    CompleteTask { id: i64 },
    RemoveTask { id: i64 },
    AddLecture { lecture: Lecture },
    UpdateLecture { id: i64, patch: Patch },
    RemoveLecture { id: i64 },
    List,
    Pending,
    Health,
    Reconcile,
    Exit,
    None,
}

#[derive(Debug, Snafu)]
pub enum ReplError {
    #[snafu(transparent)]
    App { source: AppError },

    #[snafu(display("failed to initialize REPL: {}", source))]
    Rustyline {
        source: rustyline::error::ReadlineError,
    },

    #[snafu(display("invalid changes: {}", source))]
    Patch { source: serde_json::Error },

    #[snafu(display("{what} `{id}` does not exist"))]
    Unknown { what: &'static str, id: i64 },
}

/// Read and run commands until the user leaves. Blocks the calling thread.
pub fn start(repl: &mut Repl, app: &App) -> Result<(), ReplError> {
    tracing::info!("starting REPL");

    loop {
        match repl.prompt() {
            Action::Exit => break,
            Action::AddTask { task } => {
                if let Some((task, scheduled)) = capture_error(repl, app.add_task(task)) {
                    repl.reply(format!("created task `{}`, {}", task.id, describe(scheduled)));
                }
            }
            Action::UpdateTask { id, patch } => {
                let result = app
                    .store
                    .task(id)
                    .context(UnknownSnafu { what: "task", id })
                    .and_then(|task| patched(&task, patch))
                    .and_then(|task| Ok(app.update_task(task)?));

                if let Some((task, scheduled)) = capture_error(repl, result) {
                    repl.reply(format!("updated task `{}`, {}", task.id, describe(scheduled)));
                }
            }
            Action::CompleteTask { id } => {
                if let Some(task) = capture_error(repl, app.complete_task(id, true)) {
                    repl.reply(format!("completed task `{}`", task.id));
                }
            }
            Action::RemoveTask { id } => match capture_error(repl, app.delete_task(id)) {
                Some(Some(_)) => repl.reply(format!("removed task `{}`", id)),
                Some(None) => repl.reply(format!("task `{}` does not exist", id)),
                None => {}
            },
            Action::AddLecture { lecture } => {
                if let Some((lecture, scheduled)) = capture_error(repl, app.add_lecture(lecture)) {
                    repl.reply(format!("created lecture `{}`, {}", lecture.id, describe(scheduled)));
                }
            }
            Action::UpdateLecture { id, patch } => {
                let result = app
                    .store
                    .lecture(id)
                    .context(UnknownSnafu { what: "lecture", id })
                    .and_then(|lecture| patched(&lecture, patch))
                    .and_then(|lecture| Ok(app.update_lecture(lecture)?));

                if let Some((lecture, scheduled)) = capture_error(repl, result) {
                    repl.reply(format!("updated lecture `{}`, {}", lecture.id, describe(scheduled)));
                }
            }
            Action::RemoveLecture { id } => match capture_error(repl, app.delete_lecture(id)) {
                Some(Some(_)) => repl.reply(format!("removed lecture `{}`", id)),
                Some(None) => repl.reply(format!("lecture `{}` does not exist", id)),
                None => {}
            },
            Action::List => repl.reply(list(app)),
            Action::Pending => {
                let pending = app
                    .pending()
                    .iter()
                    .map(|job| format!("  {} at {} ({})", job.key, job.due, job.job.payload.notice().title))
                    .collect::<Vec<_>>();

                if pending.is_empty() {
                    repl.reply("no reminders are queued".to_string());
                } else {
                    repl.reply(pending.join("\n"));
                }
            }
            Action::Health => {
                let unarmed = app.unarmed_lectures();
                if unarmed.is_empty() {
                    repl.reply("every weekly reminder is armed".to_string());
                } else {
                    let lines = unarmed
                        .iter()
                        .map(|lecture| format!("  lecture `{}` ({}) has no reminder armed", lecture.id, lecture.title))
                        .collect::<Vec<_>>();
                    repl.reply(lines.join("\n"));
                }
            }
            Action::Reconcile => {
                let rearmed = app.reconcile();
                repl.reply(format!("re-armed {} weekly reminder(s)", rearmed.len()));
            }
            _ => continue,
        }
    }

    Ok(())
}

fn list(app: &App) -> String {
    let now = Local::now();

    let tasks = app.store.tasks().into_iter().map(|task| {
        let status = if task.is_completed { "x" } else { " " };
        format!(
            "  [{}] task `{}` {} due {}",
            status,
            task.id,
            task.title,
            task.due_date.format("%a %d %b %H:%M")
        )
    });

    let lectures = app.store.lectures().into_iter().map(|lecture| {
        let when = match (lecture.is_recurring, lecture.specific_date) {
            (true, _) => format!("next {}", next_occurrence(&lecture.recurrence(), &now).format("%a %d %b %H:%M")),
            (false, Some(date)) => format!("on {}", date.format("%a %d %b %H:%M")),
            (false, None) => "without a date".to_string(),
        };
        format!("  lecture `{}` {} in {}, {}", lecture.id, lecture.title, lecture.room, when)
    });

    let lines = tasks.chain(lectures).collect::<Vec<_>>();
    if lines.is_empty() {
        "the planner is empty".to_string()
    } else {
        lines.join("\n")
    }
}

fn describe(scheduled: Scheduled) -> String {
    match scheduled {
        Scheduled::Armed(at) => format!("reminder at {}", at.format("%a %d %b %H:%M")),
        Scheduled::Skipped(reason) => format!("no reminder ({})", reason),
        Scheduled::Cancelled => "reminder off".to_string(),
    }
}

/// Apply `patch` on top of `current`. The id never changes.
fn patched<T: Serialize + DeserializeOwned>(current: &T, mut patch: Patch) -> Result<T, ReplError> {
    patch.remove("id");

    let mut value = serde_json::to_value(current).context(PatchSnafu)?;
    if let Some(fields) = value.as_object_mut() {
        fields.extend(patch);
    }
    serde_json::from_value(value).context(PatchSnafu)
}

fn capture_error<T, E: Into<ReplError>>(repl: &mut Repl, result: Result<T, E>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            let err = err.into();
            tracing::error!("{}", err);
            repl.reply(err.to_string());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::model::DayOfWeek;

    #[test]
    fn patch_overwrites_only_given_fields() {
        let mut lecture = Lecture::new("Compilers".to_string(), DayOfWeek::Monday, "09:00".to_string());
        lecture.id = 4;
        lecture.room = "A1".to_string();

        let patch = json!({ "id": 99, "room": "B2", "reminder_enabled": true });
        let Some(patch) = patch.as_object().cloned() else {
            panic!("patch should be an object");
        };

        let updated = patched(&lecture, patch).unwrap();
        assert_eq!(updated.id, 4);
        assert_eq!(updated.room, "B2");
        assert!(updated.reminder_enabled);
        assert_eq!(updated.title, "Compilers");
    }

    #[test]
    fn invalid_patch_is_rejected() {
        let lecture = Lecture::new("Compilers".to_string(), DayOfWeek::Monday, "09:00".to_string());
        let Some(patch) = json!({ "day_of_week": "someday" }).as_object().cloned() else {
            panic!("patch should be an object");
        };

        assert!(matches!(patched(&lecture, patch), Err(ReplError::Patch { .. })));
    }
}
