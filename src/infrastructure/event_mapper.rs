use crate::domain::models::{CalendarEntry, TimeSlot};
use crate::domain::schedule::ScheduleBlock;
use crate::infrastructure::error::InfraError;
use chrono::DateTime;
use chrono_tz::Tz;
use tracing::warn;

const AUTOMATION_DESCRIPTION: &str = "Created by calendar automation";

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq, Default)]
pub struct CalendarEventDateTime {
    #[serde(rename = "dateTime", default, skip_serializing_if = "Option::is_none")]
    pub date_time: Option<String>,
    /// Set instead of `dateTime` on all-day events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(rename = "timeZone", default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct GoogleCalendarEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub start: CalendarEventDateTime,
    #[serde(default)]
    pub end: CalendarEventDateTime,
}

/// Body of the PATCH that moves an event; only the times change.
#[derive(Debug, Clone, serde::Serialize, PartialEq, Eq)]
pub struct EventTimesPatch {
    pub start: CalendarEventDateTime,
    pub end: CalendarEventDateTime,
}

pub fn encode_schedule_block(block: &ScheduleBlock, time_zone: &str) -> GoogleCalendarEvent {
    GoogleCalendarEvent {
        id: None,
        summary: Some(block.title.clone()),
        description: Some(format!(
            "{AUTOMATION_DESCRIPTION}\nCategory: {}",
            block.title
        )),
        status: None,
        start: timed(&block.start, time_zone),
        end: timed(&block.end, time_zone),
    }
}

pub fn encode_time_patch(slot: &TimeSlot, time_zone: &str) -> EventTimesPatch {
    EventTimesPatch {
        start: timed(&slot.start, time_zone),
        end: timed(&slot.end, time_zone),
    }
}

fn timed(value: &DateTime<Tz>, time_zone: &str) -> CalendarEventDateTime {
    CalendarEventDateTime {
        date_time: Some(value.to_rfc3339()),
        date: None,
        time_zone: Some(time_zone.to_string()),
    }
}

/// Cancelled, id-less and empty (`end <= start`) events decode to `None`.
/// Events without `dateTime` on both ends become all-day entries.
pub fn decode_calendar_entry(
    event: &GoogleCalendarEvent,
    timezone: Tz,
) -> Result<Option<CalendarEntry>, InfraError> {
    let Some(id) = event
        .id
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    else {
        return Ok(None);
    };

    let is_cancelled = event
        .status
        .as_deref()
        .map(|status| status.eq_ignore_ascii_case("cancelled"))
        .unwrap_or(false);
    if is_cancelled {
        return Ok(None);
    }

    let title = event.summary.clone().unwrap_or_default();
    let (Some(start), Some(end)) = (
        event.start.date_time.as_deref(),
        event.end.date_time.as_deref(),
    ) else {
        return Ok(Some(CalendarEntry::all_day(id, title)));
    };

    let start = parse_rfc3339(start, "start.dateTime", timezone)?;
    let end = parse_rfc3339(end, "end.dateTime", timezone)?;
    if end <= start {
        warn!(event_id = %id, title = %title, %start, %end, "skipping calendar event that ends before it starts");
        return Ok(None);
    }
    Ok(Some(CalendarEntry::timed(id, title, start, end)))
}

/// Decodes a page of events. An event that cannot be decoded is logged and
/// left out; it never fails the whole batch.
pub fn decode_calendar_entries(events: &[GoogleCalendarEvent], timezone: Tz) -> Vec<CalendarEntry> {
    let mut entries = Vec::with_capacity(events.len());
    for event in events {
        match decode_calendar_entry(event, timezone) {
            Ok(Some(entry)) => entries.push(entry),
            Ok(None) => {}
            Err(error) => {
                warn!(event_id = ?event.id, %error, "skipping undecodable calendar event");
            }
        }
    }
    entries
}

fn parse_rfc3339(value: &str, field_name: &str, timezone: Tz) -> Result<DateTime<Tz>, InfraError> {
    DateTime::parse_from_rfc3339(value)
        .map(|value| value.with_timezone(&timezone))
        .map_err(|error| {
            InfraError::Calendar(format!(
                "invalid calendar event {field_name} '{value}': {error}"
            ))
        })
}
