use crate::domain::models::{CalendarEntry, ConflictRecord, ReschedulePolicy};
use crate::domain::overlap::overlaps;
use crate::domain::schedule::{Fingerprint, ScheduleBlock};
use chrono::NaiveDate;
use chrono_tz::Tz;
use std::collections::HashSet;

/// Pairs every manual timed entry with each of `target_date`'s schedule blocks
/// it overlaps. Entries whose fingerprint equals a schedule block are the
/// calendar copies of that block and never count as manual.
pub fn detect_conflicts(
    entries: &[CalendarEntry],
    blocks: &[ScheduleBlock],
    target_date: NaiveDate,
    timezone: Tz,
    policy: &ReschedulePolicy,
) -> Vec<ConflictRecord> {
    let own_fingerprints = blocks
        .iter()
        .map(|block| {
            Fingerprint::exact(
                &block.title,
                &block.start.with_timezone(&timezone),
                &block.end.with_timezone(&timezone),
            )
        })
        .collect::<HashSet<_>>();
    let todays_blocks = blocks
        .iter()
        .filter(|block| block.start.with_timezone(&timezone).date_naive() == target_date)
        .collect::<Vec<_>>();

    let mut conflicts = Vec::new();
    for entry in entries {
        let Some((start, end)) = entry.timed_span() else {
            continue;
        };
        let start = start.with_timezone(&timezone);
        let end = end.with_timezone(&timezone);
        let title = entry.clean_title(&policy.completion_prefix);
        if own_fingerprints.contains(&Fingerprint::exact(title, &start, &end)) {
            continue;
        }

        for block in &todays_blocks {
            if overlaps(
                &start,
                &end,
                &block.start,
                &block.end,
                policy.min_overlap_minutes,
            ) {
                conflicts.push(ConflictRecord {
                    manual: entry.clone(),
                    block: (*block).clone(),
                });
            }
        }
    }
    conflicts
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone};
    use chrono_tz::Europe::Tirane;
    use proptest::prelude::*;

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Tz> {
        Tirane
            .with_ymd_and_hms(2025, 7, day, hour, minute, 0)
            .single()
            .expect("valid local time")
    }

    fn block(title: &str, start: DateTime<Tz>, end: DateTime<Tz>) -> ScheduleBlock {
        ScheduleBlock::new(title, start, end).expect("valid block")
    }

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, 7).expect("valid date")
    }

    fn sample_schedule() -> Vec<ScheduleBlock> {
        vec![
            block("Deep Work", at(7, 9, 0), at(7, 11, 0)),
            block("Spanish writing", at(7, 11, 30), at(7, 12, 10)),
            block("Deep Work", at(8, 9, 0), at(8, 11, 0)),
        ]
    }

    #[test]
    fn manual_entry_overlapping_block_is_reported() {
        let entries = vec![CalendarEntry::timed(
            "evt-dentist",
            "Dentist",
            at(7, 10, 0),
            at(7, 10, 30),
        )];

        let conflicts = detect_conflicts(
            &entries,
            &sample_schedule(),
            monday(),
            Tirane,
            &ReschedulePolicy::default(),
        );

        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].manual.id, "evt-dentist");
        assert_eq!(conflicts[0].block.title, "Deep Work");
        assert_eq!(conflicts[0].block.start, at(7, 9, 0));
    }

    #[test]
    fn own_calendar_copies_are_not_conflicts() {
        let entries = vec![
            CalendarEntry::timed("evt-own", "Deep Work", at(7, 9, 0), at(7, 11, 0)),
            CalendarEntry::timed("evt-done", "✓ Spanish writing", at(7, 11, 30), at(7, 12, 10)),
        ];

        let conflicts = detect_conflicts(
            &entries,
            &sample_schedule(),
            monday(),
            Tirane,
            &ReschedulePolicy::default(),
        );

        assert!(conflicts.is_empty());
    }

    #[test]
    fn same_title_at_different_time_is_treated_as_manual() {
        let entries = vec![CalendarEntry::timed(
            "evt-moved",
            "Deep Work",
            at(7, 11, 0),
            at(7, 13, 0),
        )];

        let conflicts = detect_conflicts(
            &entries,
            &sample_schedule(),
            monday(),
            Tirane,
            &ReschedulePolicy::default(),
        );

        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].block.title, "Spanish writing");
    }

    #[test]
    fn all_day_entries_and_other_days_are_ignored() {
        let entries = vec![
            CalendarEntry::all_day("evt-holiday", "Holiday"),
            CalendarEntry::timed("evt-tuesday", "Standup", at(8, 9, 30), at(8, 10, 0)),
        ];

        let conflicts = detect_conflicts(
            &entries,
            &sample_schedule(),
            monday(),
            Tirane,
            &ReschedulePolicy::default(),
        );

        assert!(conflicts.is_empty());
    }

    #[test]
    fn one_entry_can_conflict_with_several_blocks() {
        let entries = vec![CalendarEntry::timed(
            "evt-offsite",
            "Offsite",
            at(7, 10, 0),
            at(7, 12, 0),
        )];

        let conflicts = detect_conflicts(
            &entries,
            &sample_schedule(),
            monday(),
            Tirane,
            &ReschedulePolicy::default(),
        );

        let titles = conflicts
            .iter()
            .map(|conflict| conflict.block.title.as_str())
            .collect::<Vec<_>>();
        assert_eq!(titles, vec!["Deep Work", "Spanish writing"]);
    }

    #[test]
    fn adjacent_and_sub_threshold_overlaps_are_noise() {
        let entries = vec![
            CalendarEntry::timed("evt-before", "Call", at(7, 8, 0), at(7, 9, 0)),
            CalendarEntry::timed("evt-after", "Call", at(7, 11, 0), at(7, 11, 30)),
        ];
        let mut policy = ReschedulePolicy::default();
        policy.min_overlap_minutes = 1;

        let conflicts = detect_conflicts(&entries, &sample_schedule(), monday(), Tirane, &policy);
        assert!(conflicts.is_empty());

        policy.min_overlap_minutes = 45;
        let entries = vec![CalendarEntry::timed(
            "evt-short",
            "Call",
            at(7, 10, 30),
            at(7, 11, 0),
        )];
        let conflicts = detect_conflicts(&entries, &sample_schedule(), monday(), Tirane, &policy);
        assert!(conflicts.is_empty());
    }

    #[test]
    fn utc_copy_of_block_is_still_recognized() {
        let utc_start = chrono::Utc
            .with_ymd_and_hms(2025, 7, 7, 7, 0, 0)
            .single()
            .expect("utc time");
        let entries = vec![CalendarEntry::timed(
            "evt-utc",
            "Deep Work",
            utc_start.with_timezone(&chrono_tz::UTC),
            (utc_start + chrono::Duration::hours(2)).with_timezone(&chrono_tz::UTC),
        )];

        let conflicts = detect_conflicts(
            &entries,
            &sample_schedule(),
            monday(),
            Tirane,
            &ReschedulePolicy::default(),
        );

        assert!(conflicts.is_empty());
    }

    // Feature: schedule-sync, Property 3: schedule copies never appear as manual entries
    proptest! {
        #[test]
        fn property3_self_identity_exclusion(
            start_minutes in 0i64..(20 * 60),
            length in 15i64..180,
            manual_offset in -120i64..240
        ) {
            let day_start = at(7, 0, 0);
            let own_start = day_start + chrono::Duration::minutes(start_minutes);
            let own_end = own_start + chrono::Duration::minutes(length);
            let schedule = vec![block("Focus", own_start, own_end)];
            let manual_start = own_start + chrono::Duration::minutes(manual_offset);
            let entries = vec![
                CalendarEntry::timed("evt-own", "Focus", own_start, own_end),
                CalendarEntry::timed("evt-manual", "Meeting", manual_start, manual_start + chrono::Duration::minutes(30)),
            ];

            let conflicts = detect_conflicts(&entries, &schedule, monday(), Tirane, &ReschedulePolicy::default());

            prop_assert!(conflicts.iter().all(|conflict| conflict.manual.id != "evt-own"));
        }
    }

    // Feature: schedule-sync, Property 4: detection is idempotent on an unchanged snapshot
    proptest! {
        #[test]
        fn property4_detection_is_idempotent(
            starts in proptest::collection::vec(0i64..(22 * 60), 1..12)
        ) {
            let day_start = at(7, 0, 0);
            let entries = starts
                .iter()
                .enumerate()
                .map(|(index, minutes)| {
                    let start = day_start + chrono::Duration::minutes(*minutes);
                    CalendarEntry::timed(format!("evt-{index}"), "Meeting", start, start + chrono::Duration::minutes(45))
                })
                .collect::<Vec<_>>();
            let schedule = sample_schedule();
            let policy = ReschedulePolicy::default();

            let first = detect_conflicts(&entries, &schedule, monday(), Tirane, &policy);
            let second = detect_conflicts(&entries, &schedule, monday(), Tirane, &policy);

            prop_assert_eq!(first, second);
        }
    }
}
