use super::*;

/// A wall-clock time of day with minute precision.
///
/// Parsing is lenient: every component that is missing, non-numeric or out of
/// range falls back on its own to [ClockTime::FALLBACK].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClockTime {
    hour: u32,
    minute: u32,
}

impl ClockTime {
    pub const FALLBACK: ClockTime = ClockTime { hour: 9, minute: 0 };

    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        (hour < 24 && minute < 60).then_some(Self { hour, minute })
    }

    pub fn parse_lenient(text: &str) -> Self {
        let mut parts = text.split(':').map(str::trim);

        let hour = parts
            .next()
            .and_then(|part| part.parse::<u32>().ok())
            .filter(|hour| *hour < 24)
            .unwrap_or(Self::FALLBACK.hour);
        let minute = parts
            .next()
            .and_then(|part| part.parse::<u32>().ok())
            .filter(|minute| *minute < 60)
            .unwrap_or(Self::FALLBACK.minute);

        Self { hour, minute }
    }

    pub fn hour(self) -> u32 {
        self.hour
    }

    pub fn minute(self) -> u32 {
        self.minute
    }

    pub fn to_naive(self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour, self.minute, 0).unwrap_or(NaiveTime::MIN)
    }
}

impl Default for ClockTime {
    fn default() -> Self {
        Self::FALLBACK
    }
}

impl From<&str> for ClockTime {
    fn from(text: &str) -> Self {
        Self::parse_lenient(text)
    }
}

impl std::fmt::Display for ClockTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}
