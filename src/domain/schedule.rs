use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone};
use chrono_tz::Tz;
use std::collections::HashSet;

const SCHEDULE_ROW_FIELDS: usize = 8;
const MINUTE_PRECISION_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScheduleBlock {
    pub title: String,
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
}

impl ScheduleBlock {
    pub fn new(
        title: impl Into<String>,
        start: DateTime<Tz>,
        end: DateTime<Tz>,
    ) -> Result<Self, String> {
        let title = title.into();
        if title.trim().is_empty() {
            return Err("block.title must not be empty".to_string());
        }
        if end <= start {
            return Err(format!("block '{title}' must end after it starts"));
        }
        Ok(Self { title, start, end })
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn date(&self) -> NaiveDate {
        self.start.date_naive()
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::exact(&self.title, &self.start, &self.end)
    }
}

/// `(title, start, end)` identity shared by a schedule block and the calendar
/// event created from it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub title: String,
    pub start: String,
    pub end: String,
}

impl Fingerprint {
    pub fn exact(title: &str, start: &DateTime<Tz>, end: &DateTime<Tz>) -> Self {
        Self {
            title: title.to_string(),
            start: start.to_rfc3339(),
            end: end.to_rfc3339(),
        }
    }

    /// Minute-truncated variant used to de-duplicate pushes; ignores seconds
    /// and offset formatting differences.
    pub fn minute(title: &str, start: &DateTime<Tz>, end: &DateTime<Tz>) -> Self {
        Self {
            title: title.to_string(),
            start: truncate_to_minute(start),
            end: truncate_to_minute(end),
        }
    }
}

fn truncate_to_minute(value: &DateTime<Tz>) -> String {
    let mut formatted = value.to_rfc3339();
    formatted.truncate(MINUTE_PRECISION_LEN);
    formatted
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleRow {
    pub title: String,
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub start_hour: u32,
    pub start_minute: u32,
    pub end_hour: u32,
    pub end_minute: u32,
}

impl ScheduleRow {
    pub fn from_value(index: usize, value: &serde_json::Value) -> Result<Self, String> {
        let Some(fields) = value.as_array() else {
            return Err(format!("schedule[{index}] must be an array"));
        };
        if fields.len() != SCHEDULE_ROW_FIELDS {
            return Err(format!(
                "schedule[{index}] must have exactly {SCHEDULE_ROW_FIELDS} fields, found {}",
                fields.len()
            ));
        }

        let title = fields[0]
            .as_str()
            .map(str::trim)
            .filter(|title| !title.is_empty())
            .ok_or_else(|| format!("schedule[{index}].title must be non-empty text"))?
            .to_string();

        let year = integer_field(&fields[1], index, "year")?;
        let year = i32::try_from(year)
            .map_err(|_| format!("schedule[{index}].year is out of range"))?;

        Ok(Self {
            title,
            year,
            month: unsigned_field(&fields[2], index, "month")?,
            day: unsigned_field(&fields[3], index, "day")?,
            start_hour: unsigned_field(&fields[4], index, "start_hour")?,
            start_minute: unsigned_field(&fields[5], index, "start_minute")?,
            end_hour: unsigned_field(&fields[6], index, "end_hour")?,
            end_minute: unsigned_field(&fields[7], index, "end_minute")?,
        })
    }

    pub fn into_block(self, index: usize, timezone: Tz) -> Result<ScheduleBlock, String> {
        let date = NaiveDate::from_ymd_opt(self.year, self.month, self.day).ok_or_else(|| {
            format!(
                "schedule[{index}] date {}-{}-{} is not a valid date",
                self.year, self.month, self.day
            )
        })?;
        let start_time = NaiveTime::from_hms_opt(self.start_hour, self.start_minute, 0)
            .ok_or_else(|| format!("schedule[{index}] start time is not a valid time of day"))?;
        let end_time = NaiveTime::from_hms_opt(self.end_hour, self.end_minute, 0)
            .ok_or_else(|| format!("schedule[{index}] end time is not a valid time of day"))?;
        if start_time >= end_time {
            return Err(format!(
                "schedule[{index}] '{}' must start before it ends ({start_time} >= {end_time})",
                self.title
            ));
        }

        let start = localize(timezone, date, start_time)
            .ok_or_else(|| format!("schedule[{index}] start does not exist in {timezone}"))?;
        let end = localize(timezone, date, end_time)
            .ok_or_else(|| format!("schedule[{index}] end does not exist in {timezone}"))?;
        ScheduleBlock::new(self.title, start, end)
            .map_err(|error| format!("schedule[{index}]: {error}"))
    }
}

/// Validates raw `[title, year, month, day, sh, sm, eh, em]` rows. Any bad row
/// rejects the whole schedule.
pub fn validate_schedule(
    rows: &[serde_json::Value],
    timezone: Tz,
) -> Result<Vec<ScheduleBlock>, String> {
    rows.iter()
        .enumerate()
        .map(|(index, value)| ScheduleRow::from_value(index, value)?.into_block(index, timezone))
        .collect()
}

pub fn schedule_titles(blocks: &[ScheduleBlock]) -> HashSet<&str> {
    blocks.iter().map(|block| block.title.as_str()).collect()
}

/// Local midnight of the earliest block date through 23:59:59 of the latest.
pub fn schedule_range(
    blocks: &[ScheduleBlock],
    timezone: Tz,
) -> Option<(DateTime<Tz>, DateTime<Tz>)> {
    let first = blocks.iter().map(ScheduleBlock::date).min()?;
    let last = blocks.iter().map(ScheduleBlock::date).max()?;
    let day_start = NaiveTime::from_hms_opt(0, 0, 0)?;
    let day_end = NaiveTime::from_hms_opt(23, 59, 59)?;
    Some((
        localize(timezone, first, day_start)?,
        localize(timezone, last, day_end)?,
    ))
}

pub fn localize(timezone: Tz, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Tz>> {
    timezone.from_local_datetime(&date.and_time(time)).earliest()
}

fn integer_field(value: &serde_json::Value, index: usize, name: &str) -> Result<i64, String> {
    value
        .as_i64()
        .ok_or_else(|| format!("schedule[{index}].{name} must be an integer"))
}

fn unsigned_field(value: &serde_json::Value, index: usize, name: &str) -> Result<u32, String> {
    let raw = integer_field(value, index, name)?;
    u32::try_from(raw).map_err(|_| format!("schedule[{index}].{name} must be >= 0"))
}
