use crate::domain::schedule::ScheduleBlock;
use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

pub const DEFAULT_COMPLETION_PREFIX: &str = "✓ ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarEntry {
    pub id: String,
    pub title: String,
    /// `None` for all-day entries.
    pub start: Option<DateTime<Tz>>,
    pub end: Option<DateTime<Tz>>,
}

impl CalendarEntry {
    pub fn timed(
        id: impl Into<String>,
        title: impl Into<String>,
        start: DateTime<Tz>,
        end: DateTime<Tz>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            start: Some(start),
            end: Some(end),
        }
    }

    pub fn all_day(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            start: None,
            end: None,
        }
    }

    pub fn timed_span(&self) -> Option<(DateTime<Tz>, DateTime<Tz>)> {
        match (self.start, self.end) {
            (Some(start), Some(end)) => Some((start, end)),
            _ => None,
        }
    }

    pub fn clean_title<'a>(&'a self, completion_prefix: &str) -> &'a str {
        strip_completion_marker(&self.title, completion_prefix)
    }
}

pub fn strip_completion_marker<'a>(title: &'a str, completion_prefix: &str) -> &'a str {
    if completion_prefix.is_empty() {
        return title;
    }
    title.strip_prefix(completion_prefix).unwrap_or(title)
}

/// A manual entry and the schedule block it collides with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictRecord {
    pub manual: CalendarEntry,
    pub block: ScheduleBlock,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelocationRecord {
    pub title: String,
    pub old_start: DateTime<Tz>,
    pub new_start: DateTime<Tz>,
    pub new_end: DateTime<Tz>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSlot {
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
}

/// Blocks whose title contains `keyword` may start before `morning_end` or at
/// or after `evening_start`, never in between.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowPreference {
    pub keyword: String,
    pub morning_end: NaiveTime,
    pub evening_start: NaiveTime,
}

impl WindowPreference {
    pub fn new(
        keyword: impl Into<String>,
        morning_end: NaiveTime,
        evening_start: NaiveTime,
    ) -> Result<Self, String> {
        let keyword = keyword.into();
        validate_non_empty(&keyword, "window_preference.keyword")?;
        if morning_end >= evening_start {
            return Err(format!(
                "window_preference '{keyword}' must have before < after"
            ));
        }
        Ok(Self {
            keyword,
            morning_end,
            evening_start,
        })
    }

    pub fn applies_to(&self, title: &str) -> bool {
        title
            .to_lowercase()
            .contains(&self.keyword.to_lowercase())
    }

    pub fn snap(&self, candidate: DateTime<Tz>) -> DateTime<Tz> {
        let time = candidate.time();
        if time < self.morning_end || time >= self.evening_start {
            return candidate;
        }
        let evening = candidate.date_naive().and_time(self.evening_start);
        candidate
            .timezone()
            .from_local_datetime(&evening)
            .earliest()
            .unwrap_or_else(|| candidate + (self.evening_start - time))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReschedulePolicy {
    pub buffer_minutes: u32,
    pub max_end_time: NaiveTime,
    pub min_overlap_minutes: i64,
    pub completion_prefix: String,
    pub window_preferences: Vec<WindowPreference>,
}

impl Default for ReschedulePolicy {
    fn default() -> Self {
        Self {
            buffer_minutes: 15,
            max_end_time: NaiveTime::from_hms_opt(23, 59, 0).unwrap_or_default(),
            min_overlap_minutes: 1,
            completion_prefix: DEFAULT_COMPLETION_PREFIX.to_string(),
            window_preferences: Vec::new(),
        }
    }
}

impl ReschedulePolicy {
    pub fn validate(&self) -> Result<(), String> {
        if self.min_overlap_minutes < 0 {
            return Err("policy.min_overlap_minutes must be >= 0".to_string());
        }
        for preference in &self.window_preferences {
            if preference.morning_end >= preference.evening_start {
                return Err(format!(
                    "window_preference '{}' must have before < after",
                    preference.keyword
                ));
            }
        }
        Ok(())
    }

    pub fn preferences_for<'a>(
        &'a self,
        title: &'a str,
    ) -> impl Iterator<Item = &'a WindowPreference> + 'a {
        self.window_preferences
            .iter()
            .filter(move |preference| preference.applies_to(title))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OAuthToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub token_type: String,
    pub scope: Option<String>,
}

impl OAuthToken {
    pub fn is_valid_at(&self, now: DateTime<Utc>, leeway_seconds: i64) -> bool {
        self.expires_at > now + chrono::Duration::seconds(leeway_seconds)
            && !self.access_token.trim().is_empty()
    }
}

pub fn parse_hhmm(value: &str, field_name: &str) -> Result<NaiveTime, String> {
    let mut split = value.trim().split(':');
    let (Some(hour_str), Some(minute_str), None) = (split.next(), split.next(), split.next())
    else {
        return Err(format!("{field_name} must be HH:MM"));
    };

    let hour = hour_str
        .parse::<u32>()
        .map_err(|_| format!("{field_name} must be HH:MM"))?;
    let minute = minute_str
        .parse::<u32>()
        .map_err(|_| format!("{field_name} must be HH:MM"))?;
    NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(|| format!("{field_name} must be HH:MM"))
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}
