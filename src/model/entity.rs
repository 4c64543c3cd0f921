use super::*;

/// Anything that can carry a reminder.
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Task(Task),
    Lecture(Lecture),
}

impl Entity {
    pub fn key(&self) -> EntityKey {
        match self {
            Entity::Task(task) => EntityKey::Task(task.id),
            Entity::Lecture(lecture) => EntityKey::Lecture(lecture.id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum EntityKey {
    Task(i64),
    Lecture(i64),
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKey::Task(id) => write!(f, "task `{id}`"),
            EntityKey::Lecture(id) => write!(f, "lecture `{id}`"),
        }
    }
}

/// A fully rendered notification. `id` doubles as the dismiss/replace key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, new)]
pub struct Notice {
    pub id: i64,
    pub title: String,
    pub body: String,
}
