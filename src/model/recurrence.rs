use super::*;

/// The (day-of-week, time-of-day, lead-minutes) triple of a weekly event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, new)]
pub struct WeeklyRecurrence {
    pub day_of_week: DayOfWeek,
    pub start_time: ClockTime,
    pub lead_minutes: u32,
}

impl WeeklyRecurrence {
    pub fn lead(&self) -> Duration {
        Duration::minutes(i64::from(self.lead_minutes))
    }
}

/// The text form of a [WeeklyRecurrence] as it travels inside a queued reminder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, new)]
pub struct RecurrenceRecord {
    pub day_of_week: String,
    pub start_time: String,
    pub lead_minutes: u32,
}

impl From<&WeeklyRecurrence> for RecurrenceRecord {
    fn from(recurrence: &WeeklyRecurrence) -> Self {
        Self::new(
            recurrence.day_of_week.to_string(),
            recurrence.start_time.to_string(),
            recurrence.lead_minutes,
        )
    }
}

impl TryFrom<&RecurrenceRecord> for WeeklyRecurrence {
    type Error = ParseDayOfWeek;

    fn try_from(record: &RecurrenceRecord) -> Result<Self, Self::Error> {
        Ok(Self::new(
            record.day_of_week.parse()?,
            ClockTime::parse_lenient(&record.start_time),
            record.lead_minutes,
        ))
    }
}

/// A reminder for an explicit date and time. Fires once, never re-arms.
#[derive(Debug, Clone, PartialEq, Eq, new)]
pub struct OneTimeReminder {
    pub entity: EntityKey,
    pub target: Timestamp,
    pub lead_minutes: u32,
}

impl OneTimeReminder {
    pub fn fire_at(&self) -> Timestamp {
        self.target - Duration::minutes(i64::from(self.lead_minutes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_round_trips_the_recurrence() {
        let recurrence = WeeklyRecurrence::new(DayOfWeek::Thursday, ClockTime::new(13, 5).unwrap(), 30);
        let record = RecurrenceRecord::from(&recurrence);

        assert_eq!(record.day_of_week, "THURSDAY");
        assert_eq!(record.start_time, "13:05");
        assert_eq!(WeeklyRecurrence::try_from(&record), Ok(recurrence));
    }

    #[test]
    fn invalid_day_text_is_rejected() {
        let record = RecurrenceRecord::new("FUNDAY".to_string(), "10:00".to_string(), 15);
        assert_eq!(
            WeeklyRecurrence::try_from(&record),
            Err(ParseDayOfWeek::new("FUNDAY".to_string()))
        );
    }

    #[test]
    fn one_time_reminder_fires_lead_minutes_early() {
        let target = Local.with_ymd_and_hms(2024, 1, 9, 9, 0, 0).unwrap();
        let reminder = OneTimeReminder::new(EntityKey::Task(1), target, 60);
        assert_eq!(reminder.fire_at(), Local.with_ymd_and_hms(2024, 1, 9, 8, 0, 0).unwrap());
    }
}
