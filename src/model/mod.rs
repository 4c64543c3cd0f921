use chrono::{Datelike, Duration, Local, NaiveTime, TimeZone, Weekday};
use derive_new::new;
use serde::{Deserialize, Serialize};
use snafu::Snafu;

use crate::time::Timestamp;

pub use clock_time::*;
pub use day_of_week::*;
pub use entity::*;
pub use lecture::*;
pub use recurrence::*;
pub use task::*;

mod clock_time;
mod day_of_week;
mod entity;
mod lecture;
mod recurrence;
mod task;
