use crate::application::reconcile::RelocationWriter;
use crate::domain::models::{strip_completion_marker, CalendarEntry, RelocationRecord, TimeSlot};
use crate::domain::schedule::{localize, schedule_range, Fingerprint, ScheduleBlock};
use crate::infrastructure::config::RetryConfig;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::event_mapper::{
    decode_calendar_entries, encode_schedule_block, encode_time_patch, GoogleCalendarEvent,
};
use crate::infrastructure::google_calendar_client::{GoogleCalendarClient, ListEventsRequest};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tokio::time::{sleep, Duration as TokioDuration};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u8,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay_ms: config.base_delay_ms,
        }
    }
}

impl RetryPolicy {
    /// Runs `call` until it succeeds, fails with a non-transient error, or the
    /// attempt budget is spent. Delay doubles after every transient failure.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, InfraError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, InfraError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt: u8 = 0;

        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_transient() && attempt + 1 < max_attempts => {
                    let delay = self
                        .base_delay_ms
                        .saturating_mul(2u64.saturating_pow(attempt as u32));
                    warn!(
                        operation,
                        attempt = attempt + 1,
                        delay_ms = delay,
                        %error,
                        "transient calendar failure, retrying"
                    );
                    sleep(TokioDuration::from_millis(delay)).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(error) => return Err(error),
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct PushReport {
    pub dry_run: bool,
    pub planned: usize,
    pub created: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ClearReport {
    pub dry_run: bool,
    pub matched: usize,
    pub deleted: usize,
    pub failed: usize,
}

/// All calendar I/O for one run against one calendar. Calls are issued one at
/// a time.
pub struct CalendarSyncService<C>
where
    C: GoogleCalendarClient,
{
    calendar_client: Arc<C>,
    access_token: String,
    calendar_id: String,
    timezone: Tz,
    retry_policy: RetryPolicy,
}

impl<C> CalendarSyncService<C>
where
    C: GoogleCalendarClient,
{
    pub fn new(
        calendar_client: Arc<C>,
        access_token: impl Into<String>,
        calendar_id: impl Into<String>,
        timezone: Tz,
    ) -> Self {
        Self {
            calendar_client,
            access_token: access_token.into(),
            calendar_id: calendar_id.into(),
            timezone,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub async fn fetch_entries(
        &self,
        time_min: DateTime<Tz>,
        time_max: DateTime<Tz>,
    ) -> Result<Vec<CalendarEntry>, InfraError> {
        let events = self.list_events(time_min, time_max).await?;
        Ok(decode_calendar_entries(&events, self.timezone))
    }

    /// Entries for one local calendar day in the configured zone.
    pub async fn fetch_day(&self, date: NaiveDate) -> Result<Vec<CalendarEntry>, InfraError> {
        let midnight = NaiveTime::from_hms_opt(0, 0, 0).unwrap_or_default();
        let next_day = date + Duration::days(1);
        let (Some(time_min), Some(time_max)) = (
            localize(self.timezone, date, midnight),
            localize(self.timezone, next_day, midnight),
        ) else {
            return Err(InfraError::InvalidConfig(format!(
                "cannot resolve day boundaries for {date} in {}",
                self.timezone
            )));
        };
        self.fetch_entries(time_min, time_max).await
    }

    /// Creates every block not already on the calendar. Existing entries are
    /// matched on title (completion marker stripped) and minute-precision
    /// times.
    pub async fn push_schedule(
        &self,
        blocks: &[ScheduleBlock],
        completion_prefix: &str,
        batch_size: usize,
        dry_run: bool,
    ) -> Result<PushReport, InfraError> {
        let mut report = PushReport {
            dry_run,
            ..PushReport::default()
        };
        let Some((time_min, time_max)) = schedule_range(blocks, self.timezone) else {
            return Ok(report);
        };

        let existing = self
            .fetch_entries(time_min, time_max)
            .await?
            .iter()
            .filter_map(|entry| {
                let (start, end) = entry.timed_span()?;
                Some(Fingerprint::minute(
                    entry.clean_title(completion_prefix),
                    &start.with_timezone(&self.timezone),
                    &end.with_timezone(&self.timezone),
                ))
            })
            .collect::<HashSet<_>>();
        info!(existing = existing.len(), "existing events in schedule range");

        let pending = blocks
            .iter()
            .filter(|block| {
                !existing.contains(&Fingerprint::minute(&block.title, &block.start, &block.end))
            })
            .collect::<Vec<_>>();
        report.planned = pending.len();
        report.skipped = blocks.len() - pending.len();
        if dry_run || pending.is_empty() {
            return Ok(report);
        }

        let batches = pending.chunks(batch_size.max(1)).collect::<Vec<_>>();
        let batch_count = batches.len();
        for (index, batch) in batches.into_iter().enumerate() {
            let mut created_in_batch = 0;
            for block in batch {
                let event = encode_schedule_block(block, self.timezone.name());
                match self.create_event(&event).await {
                    Ok(event_id) => {
                        debug!(event_id = %event_id, title = %block.title, "created schedule event");
                        created_in_batch += 1;
                    }
                    Err(error) if error.is_fatal() => return Err(error),
                    Err(error) => {
                        warn!(title = %block.title, start = %block.start, %error, "failed to create schedule event");
                        report.failed += 1;
                    }
                }
            }
            report.created += created_in_batch;
            info!(
                batch = index + 1,
                batches = batch_count,
                created = created_in_batch,
                size = batch.len(),
                "schedule batch pushed"
            );
        }
        Ok(report)
    }

    /// Deletes every entry in the schedule range whose cleaned title belongs to
    /// the schedule.
    pub async fn clear_schedule(
        &self,
        blocks: &[ScheduleBlock],
        completion_prefix: &str,
        dry_run: bool,
    ) -> Result<ClearReport, InfraError> {
        let mut report = ClearReport {
            dry_run,
            ..ClearReport::default()
        };
        let Some((time_min, time_max)) = schedule_range(blocks, self.timezone) else {
            return Ok(report);
        };

        let titles = blocks
            .iter()
            .map(|block| block.title.as_str())
            .collect::<HashSet<_>>();
        let matched = self
            .fetch_entries(time_min, time_max)
            .await?
            .into_iter()
            .filter(|entry| titles.contains(strip_completion_marker(&entry.title, completion_prefix)))
            .collect::<Vec<_>>();
        report.matched = matched.len();
        if dry_run {
            return Ok(report);
        }

        for entry in &matched {
            match self.delete_event(&entry.id).await {
                Ok(()) => report.deleted += 1,
                Err(error) if error.is_fatal() => return Err(error),
                Err(error) => {
                    warn!(event_id = %entry.id, title = %entry.title, %error, "failed to delete schedule event");
                    report.failed += 1;
                }
            }
        }
        info!(deleted = report.deleted, failed = report.failed, "schedule cleared");
        Ok(report)
    }

    async fn list_events(
        &self,
        time_min: DateTime<Tz>,
        time_max: DateTime<Tz>,
    ) -> Result<Vec<GoogleCalendarEvent>, InfraError> {
        let client = &self.calendar_client;
        let access_token = self.access_token.as_str();
        let calendar_id = self.calendar_id.as_str();
        let request = ListEventsRequest {
            time_min: time_min.with_timezone(&Utc),
            time_max: time_max.with_timezone(&Utc),
        };
        self.retry_policy
            .run("list_events", move || {
                client.list_events(access_token, calendar_id, request.clone())
            })
            .await
    }

    async fn create_event(&self, event: &GoogleCalendarEvent) -> Result<String, InfraError> {
        let client = &self.calendar_client;
        let access_token = self.access_token.as_str();
        let calendar_id = self.calendar_id.as_str();
        self.retry_policy
            .run("create_event", move || {
                client.create_event(access_token, calendar_id, event)
            })
            .await
    }

    async fn delete_event(&self, event_id: &str) -> Result<(), InfraError> {
        let client = &self.calendar_client;
        let access_token = self.access_token.as_str();
        let calendar_id = self.calendar_id.as_str();
        self.retry_policy
            .run("delete_event", move || {
                client.delete_event(access_token, calendar_id, event_id)
            })
            .await
    }
}

#[async_trait]
impl<C> RelocationWriter for CalendarSyncService<C>
where
    C: GoogleCalendarClient,
{
    async fn write_relocation(
        &self,
        entry: &CalendarEntry,
        relocation: &RelocationRecord,
    ) -> Result<(), InfraError> {
        let slot = TimeSlot {
            start: relocation.new_start,
            end: relocation.new_end,
        };
        let patch = encode_time_patch(&slot, self.timezone.name());
        let patch = &patch;
        let client = &self.calendar_client;
        let access_token = self.access_token.as_str();
        let calendar_id = self.calendar_id.as_str();
        let event_id = entry.id.as_str();
        self.retry_policy
            .run("patch_event_times", move || {
                client.patch_event_times(access_token, calendar_id, event_id, patch)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::event_mapper::{CalendarEventDateTime, EventTimesPatch};
    use chrono::TimeZone;
    use chrono_tz::Europe::Tirane;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeGoogleCalendarClient {
        list_responses: Mutex<VecDeque<Result<Vec<GoogleCalendarEvent>, InfraError>>>,
        list_calls: AtomicUsize,
        create_failures: HashMap<String, u16>,
        created: Mutex<Vec<GoogleCalendarEvent>>,
        patched: Mutex<Vec<(String, EventTimesPatch)>>,
        patch_status: Option<u16>,
        deleted: Mutex<Vec<String>>,
    }

    impl FakeGoogleCalendarClient {
        fn with_list_responses(
            responses: Vec<Result<Vec<GoogleCalendarEvent>, InfraError>>,
        ) -> Self {
            Self {
                list_responses: Mutex::new(responses.into()),
                ..Self::default()
            }
        }

        fn with_events(events: Vec<GoogleCalendarEvent>) -> Self {
            Self::with_list_responses(vec![Ok(events)])
        }
    }

    fn http(status: u16) -> InfraError {
        InfraError::Http {
            status,
            body: String::new(),
        }
    }

    #[async_trait]
    impl GoogleCalendarClient for FakeGoogleCalendarClient {
        async fn list_events(
            &self,
            _access_token: &str,
            _calendar_id: &str,
            _request: ListEventsRequest,
        ) -> Result<Vec<GoogleCalendarEvent>, InfraError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            self.list_responses
                .lock()
                .expect("list response lock poisoned")
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }

        async fn create_event(
            &self,
            _access_token: &str,
            _calendar_id: &str,
            event: &GoogleCalendarEvent,
        ) -> Result<String, InfraError> {
            let title = event.summary.clone().unwrap_or_default();
            if let Some(status) = self.create_failures.get(&title) {
                return Err(http(*status));
            }
            let mut created = self.created.lock().expect("created lock poisoned");
            created.push(event.clone());
            Ok(format!("created-{}", created.len()))
        }

        async fn patch_event_times(
            &self,
            _access_token: &str,
            _calendar_id: &str,
            event_id: &str,
            patch: &EventTimesPatch,
        ) -> Result<(), InfraError> {
            if let Some(status) = self.patch_status {
                return Err(http(status));
            }
            self.patched
                .lock()
                .expect("patched lock poisoned")
                .push((event_id.to_string(), patch.clone()));
            Ok(())
        }

        async fn delete_event(
            &self,
            _access_token: &str,
            _calendar_id: &str,
            event_id: &str,
        ) -> Result<(), InfraError> {
            if event_id == "evt-locked" {
                return Err(http(404));
            }
            self.deleted
                .lock()
                .expect("deleted lock poisoned")
                .push(event_id.to_string());
            Ok(())
        }
    }

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Tz> {
        Tirane
            .with_ymd_and_hms(2025, 7, day, hour, minute, 0)
            .single()
            .expect("valid local time")
    }

    fn block(title: &str, start: DateTime<Tz>, end: DateTime<Tz>) -> ScheduleBlock {
        ScheduleBlock::new(title, start, end).expect("valid block")
    }

    fn remote_event(id: &str, summary: &str, start: &str, end: &str) -> GoogleCalendarEvent {
        GoogleCalendarEvent {
            id: Some(id.to_string()),
            summary: Some(summary.to_string()),
            description: None,
            status: Some("confirmed".to_string()),
            start: CalendarEventDateTime {
                date_time: Some(start.to_string()),
                ..CalendarEventDateTime::default()
            },
            end: CalendarEventDateTime {
                date_time: Some(end.to_string()),
                ..CalendarEventDateTime::default()
            },
        }
    }

    fn service(client: &Arc<FakeGoogleCalendarClient>) -> CalendarSyncService<FakeGoogleCalendarClient> {
        CalendarSyncService::new(Arc::clone(client), "access-token", "primary", Tirane)
            .with_retry_policy(RetryPolicy {
                max_attempts: 3,
                base_delay_ms: 1,
            })
    }

    fn monday_schedule() -> Vec<ScheduleBlock> {
        vec![
            block("Spanish video", at(7, 6, 45), at(7, 7, 15)),
            block("Deep Work", at(7, 9, 0), at(7, 11, 0)),
            block("Gym", at(7, 17, 45), at(7, 19, 15)),
        ]
    }

    #[tokio::test]
    async fn fetch_day_retries_on_network_error() {
        let client = Arc::new(FakeGoogleCalendarClient::with_list_responses(vec![
            Err(InfraError::Network("connection reset".to_string())),
            Ok(vec![remote_event(
                "evt-1",
                "Dentist",
                "2025-07-07T08:00:00Z",
                "2025-07-07T08:30:00Z",
            )]),
        ]));

        let entries = service(&client)
            .fetch_day(NaiveDate::from_ymd_opt(2025, 7, 7).expect("date"))
            .await
            .expect("fetch after retry");

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].start, Some(at(7, 10, 0)));
        assert_eq!(client.list_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_transient_errors_are_not_retried() {
        let client = Arc::new(FakeGoogleCalendarClient::with_list_responses(vec![
            Err(http(404)),
            Ok(Vec::new()),
        ]));

        let result = service(&client)
            .fetch_entries(at(7, 0, 0), at(8, 0, 0))
            .await;

        assert!(matches!(result, Err(InfraError::Http { status: 404, .. })));
        assert_eq!(client.list_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_gives_up_after_max_attempts() {
        let client = Arc::new(FakeGoogleCalendarClient::with_list_responses(vec![
            Err(http(503)),
            Err(http(503)),
            Err(http(503)),
            Ok(Vec::new()),
        ]));

        let result = service(&client)
            .fetch_entries(at(7, 0, 0), at(8, 0, 0))
            .await;

        assert!(matches!(result, Err(InfraError::Http { status: 503, .. })));
        assert_eq!(client.list_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn push_skips_blocks_already_on_calendar() {
        let client = Arc::new(FakeGoogleCalendarClient::with_events(vec![
            remote_event(
                "evt-video",
                "Spanish video",
                "2025-07-07T04:45:00Z",
                "2025-07-07T05:15:00Z",
            ),
            remote_event(
                "evt-done",
                "✓ Gym",
                "2025-07-07T17:45:30+02:00",
                "2025-07-07T19:15:00+02:00",
            ),
        ]));

        let report = service(&client)
            .push_schedule(&monday_schedule(), "✓ ", 50, false)
            .await
            .expect("push schedule");

        assert_eq!(report.skipped, 2);
        assert_eq!(report.planned, 1);
        assert_eq!(report.created, 1);
        assert_eq!(report.failed, 0);
        let created = client.created.lock().expect("created lock");
        assert_eq!(created[0].summary.as_deref(), Some("Deep Work"));
        assert_eq!(created[0].start.time_zone.as_deref(), Some("Europe/Tirane"));
    }

    #[tokio::test]
    async fn push_creates_in_batches_and_counts_failures() {
        let client = Arc::new(FakeGoogleCalendarClient {
            create_failures: HashMap::from([("Deep Work".to_string(), 400)]),
            ..FakeGoogleCalendarClient::default()
        });

        let report = service(&client)
            .push_schedule(&monday_schedule(), "✓ ", 2, false)
            .await
            .expect("push schedule");

        assert_eq!(report.planned, 3);
        assert_eq!(report.created, 2);
        assert_eq!(report.failed, 1);
        let titles = client
            .created
            .lock()
            .expect("created lock")
            .iter()
            .filter_map(|event| event.summary.clone())
            .collect::<Vec<_>>();
        assert_eq!(titles, vec!["Spanish video".to_string(), "Gym".to_string()]);
    }

    #[tokio::test]
    async fn push_aborts_on_authorization_failure() {
        let client = Arc::new(FakeGoogleCalendarClient {
            create_failures: HashMap::from([("Spanish video".to_string(), 401)]),
            ..FakeGoogleCalendarClient::default()
        });

        let result = service(&client)
            .push_schedule(&monday_schedule(), "✓ ", 50, false)
            .await;

        assert!(matches!(result, Err(InfraError::Http { status: 401, .. })));
        assert!(client.created.lock().expect("created lock").is_empty());
    }

    #[tokio::test]
    async fn push_counts_forbidden_event_and_continues() {
        let client = Arc::new(FakeGoogleCalendarClient {
            create_failures: HashMap::from([("Spanish video".to_string(), 403)]),
            ..FakeGoogleCalendarClient::default()
        });

        let report = service(&client)
            .push_schedule(&monday_schedule(), "✓ ", 50, false)
            .await
            .expect("push schedule");

        assert_eq!(report.created, 2);
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn push_dry_run_creates_nothing() {
        let client = Arc::new(FakeGoogleCalendarClient::default());

        let report = service(&client)
            .push_schedule(&monday_schedule(), "✓ ", 50, true)
            .await
            .expect("dry run");

        assert!(report.dry_run);
        assert_eq!(report.planned, 3);
        assert_eq!(report.created, 0);
        assert!(client.created.lock().expect("created lock").is_empty());
    }

    #[tokio::test]
    async fn clear_deletes_only_schedule_titled_entries() {
        let client = Arc::new(FakeGoogleCalendarClient::with_events(vec![
            remote_event("evt-video", "Spanish video", "2025-07-07T04:45:00Z", "2025-07-07T05:15:00Z"),
            remote_event("evt-gym", "✓ Gym", "2025-07-07T15:45:00Z", "2025-07-07T17:15:00Z"),
            remote_event("evt-dentist", "Dentist", "2025-07-07T08:00:00Z", "2025-07-07T08:30:00Z"),
            remote_event("evt-locked", "Deep Work", "2025-07-07T07:00:00Z", "2025-07-07T09:00:00Z"),
        ]));

        let report = service(&client)
            .clear_schedule(&monday_schedule(), "✓ ", false)
            .await
            .expect("clear schedule");

        assert_eq!(report.matched, 3);
        assert_eq!(report.deleted, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(
            *client.deleted.lock().expect("deleted lock"),
            vec!["evt-video".to_string(), "evt-gym".to_string()]
        );
    }

    #[tokio::test]
    async fn clear_dry_run_only_counts() {
        let client = Arc::new(FakeGoogleCalendarClient::with_events(vec![remote_event(
            "evt-video",
            "Spanish video",
            "2025-07-07T04:45:00Z",
            "2025-07-07T05:15:00Z",
        )]));

        let report = service(&client)
            .clear_schedule(&monday_schedule(), "✓ ", true)
            .await
            .expect("clear dry run");

        assert_eq!(report.matched, 1);
        assert_eq!(report.deleted, 0);
        assert!(client.deleted.lock().expect("deleted lock").is_empty());
    }

    #[tokio::test]
    async fn write_relocation_patches_event_times_in_configured_zone() {
        let client = Arc::new(FakeGoogleCalendarClient::default());
        let entry = CalendarEntry::timed("evt-deep", "Deep Work", at(7, 9, 0), at(7, 11, 0));
        let relocation = RelocationRecord {
            title: "Deep Work".to_string(),
            old_start: at(7, 9, 0),
            new_start: at(7, 11, 0),
            new_end: at(7, 13, 0),
        };

        service(&client)
            .write_relocation(&entry, &relocation)
            .await
            .expect("write relocation");

        let patched = client.patched.lock().expect("patched lock");
        assert_eq!(patched.len(), 1);
        assert_eq!(patched[0].0, "evt-deep");
        assert_eq!(
            patched[0].1.start.date_time.as_deref(),
            Some("2025-07-07T11:00:00+02:00")
        );
        assert_eq!(patched[0].1.end.time_zone.as_deref(), Some("Europe/Tirane"));
    }

    #[tokio::test]
    async fn write_relocation_surfaces_permission_errors() {
        let client = Arc::new(FakeGoogleCalendarClient {
            patch_status: Some(403),
            ..FakeGoogleCalendarClient::default()
        });
        let entry = CalendarEntry::timed("evt-deep", "Deep Work", at(7, 9, 0), at(7, 11, 0));
        let relocation = RelocationRecord {
            title: "Deep Work".to_string(),
            old_start: at(7, 9, 0),
            new_start: at(7, 11, 0),
            new_end: at(7, 13, 0),
        };

        let error = service(&client)
            .write_relocation(&entry, &relocation)
            .await
            .expect_err("forbidden");

        assert!(matches!(error, InfraError::Http { status: 403, .. }));
        assert!(!error.is_fatal());
    }
}
