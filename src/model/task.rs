use super::*;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

fn default_category() -> String {
    "General".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, new)]
pub struct Task {
    #[new(default)]
    #[serde(default)]
    pub id: i64,

    pub title: String,
    #[new(default)]
    #[serde(default)]
    pub description: String,
    pub due_date: Timestamp,
    #[new(default)]
    #[serde(default)]
    pub priority: Priority,
    #[new(default)]
    #[serde(default)]
    pub is_completed: bool,

    #[new(default)]
    #[serde(default)]
    pub reminder_enabled: bool,
    /// Minutes before `due_date`.
    #[new(default)]
    #[serde(default)]
    pub reminder_minutes: Option<u32>,

    #[new(value = "default_category()")]
    #[serde(default = "default_category")]
    pub category: String,
    #[new(value = "Local::now()")]
    #[serde(default = "Local::now")]
    pub created_at: Timestamp,
}

impl Task {
    pub fn notice(&self) -> Notice {
        let body = if self.description.trim().is_empty() {
            "Task is due soon!".to_string()
        } else {
            self.description.clone()
        };

        Notice::new(self.id, format!("Task Reminder: {}", self.title), body)
    }

    pub fn matches(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        self.title.to_lowercase().contains(&query)
            || self.description.to_lowercase().contains(&query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(description: &str) -> Task {
        let mut task = Task::new("Essay".to_string(), Local::now());
        task.id = 3;
        task.description = description.to_string();
        task
    }

    #[test]
    fn blank_description_gets_a_default_body() {
        let notice = task("   ").notice();
        assert_eq!(notice.id, 3);
        assert_eq!(notice.title, "Task Reminder: Essay");
        assert_eq!(notice.body, "Task is due soon!");

        assert_eq!(task("2000 words").notice().body, "2000 words");
    }

    #[test]
    fn free_text_match_is_case_insensitive() {
        let task = task("Draft the INTRODUCTION");
        assert!(task.matches("essay"));
        assert!(task.matches("introduction"));
        assert!(!task.matches("lab report"));
    }
}
