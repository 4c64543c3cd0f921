use super::*;

/// Offset added to lecture ids so their notifications never collide with task notifications.
pub const LECTURE_NOTIFICATION_OFFSET: i64 = 10_000;

fn default_recurring() -> bool {
    true
}

fn default_lead_minutes() -> u32 {
    15
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, new)]
pub struct Lecture {
    #[new(default)]
    #[serde(default)]
    pub id: i64,

    pub title: String,
    #[new(default)]
    #[serde(default)]
    pub instructor: String,
    #[new(default)]
    #[serde(default)]
    pub room: String,

    pub day_of_week: DayOfWeek,
    /// `HH:mm`, kept as entered
    pub start_time: String,
    #[new(default)]
    #[serde(default)]
    pub end_time: String,

    #[new(value = "true")]
    #[serde(default = "default_recurring")]
    pub is_recurring: bool,
    /// The date and start of a one-off lecture.
    #[new(default)]
    #[serde(default)]
    pub specific_date: Option<Timestamp>,

    #[new(default)]
    #[serde(default)]
    pub notes: String,

    #[new(default)]
    #[serde(default)]
    pub reminder_enabled: bool,
    #[new(value = "15")]
    #[serde(default = "default_lead_minutes")]
    pub reminder_minutes_before: u32,
}

impl Lecture {
    pub fn start(&self) -> ClockTime {
        ClockTime::parse_lenient(&self.start_time)
    }

    pub fn recurrence(&self) -> WeeklyRecurrence {
        WeeklyRecurrence::new(self.day_of_week, self.start(), self.reminder_minutes_before)
    }

    pub fn wants_weekly_reminder(&self) -> bool {
        self.reminder_enabled && self.is_recurring
    }

    pub fn notice(&self, offset: i64) -> Notice {
        Notice::new(
            self.id + offset,
            format!("Lecture: {}", self.title),
            format!("Starts at {} in {}", self.start_time, self.room),
        )
    }
}
