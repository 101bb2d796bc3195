use crate::domain::models::{
    CalendarEntry, ConflictRecord, RelocationRecord, ReschedulePolicy, TimeSlot,
};
use crate::domain::overlap::overlaps;
use crate::domain::schedule::{schedule_titles, ScheduleBlock};
use chrono::{DateTime, Duration};
use chrono_tz::Tz;
use std::collections::HashSet;

const OBSTACLE_MIN_OVERLAP_MINUTES: i64 = 1;

/// First-fit forward search for a new slot. Schedule-titled entries are
/// flexible and only obstruct a search once accepted as relocations.
pub struct SlotResolver<'a> {
    policy: &'a ReschedulePolicy,
    schedule_titles: HashSet<&'a str>,
}

impl<'a> SlotResolver<'a> {
    pub fn new(policy: &'a ReschedulePolicy, blocks: &'a [ScheduleBlock]) -> Self {
        Self {
            policy,
            schedule_titles: schedule_titles(blocks),
        }
    }

    pub fn resolve(
        &self,
        block: &ScheduleBlock,
        conflicts: &[ConflictRecord],
        entries: &[CalendarEntry],
        accepted: &[RelocationRecord],
    ) -> Option<TimeSlot> {
        let latest_manual_end = conflicts
            .iter()
            .filter_map(|conflict| conflict.manual.timed_span())
            .map(|(_, end)| end)
            .max()?;
        let duration = block.duration();
        let mut start = self.place(block, latest_manual_end + self.buffer());

        loop {
            let end = start + duration;
            if !self.fits_before_cutoff(block, start, end) {
                return None;
            }
            match self.latest_obstacle_end(start, end, entries, accepted) {
                None => return Some(TimeSlot { start, end }),
                Some(obstacle_end) => {
                    start = self.place(block, obstacle_end + self.buffer());
                }
            }
        }
    }

    fn buffer(&self) -> Duration {
        Duration::minutes(i64::from(self.policy.buffer_minutes))
    }

    /// Moves the candidate into the block's zone and out of every excluded
    /// window its title triggers. Snapping only moves forward, so the loop
    /// settles once no preference changes the start.
    fn place(&self, block: &ScheduleBlock, candidate: DateTime<Tz>) -> DateTime<Tz> {
        let mut start = candidate.with_timezone(&block.start.timezone());
        loop {
            let snapped = self
                .policy
                .preferences_for(&block.title)
                .fold(start, |current, preference| preference.snap(current));
            if snapped == start {
                return start;
            }
            start = snapped;
        }
    }

    /// The start must stay on the block's own day; the end may cross midnight
    /// as long as its clock time is still within the cutoff.
    fn fits_before_cutoff(
        &self,
        block: &ScheduleBlock,
        start: DateTime<Tz>,
        end: DateTime<Tz>,
    ) -> bool {
        start.date_naive() == block.date() && end.time() <= self.policy.max_end_time
    }

    fn latest_obstacle_end(
        &self,
        start: DateTime<Tz>,
        end: DateTime<Tz>,
        entries: &[CalendarEntry],
        accepted: &[RelocationRecord],
    ) -> Option<DateTime<Tz>> {
        let manual_ends = entries
            .iter()
            .filter(|entry| !self.is_flexible(entry))
            .filter_map(CalendarEntry::timed_span)
            .filter(|(entry_start, entry_end)| {
                overlaps(
                    entry_start,
                    entry_end,
                    &start,
                    &end,
                    OBSTACLE_MIN_OVERLAP_MINUTES,
                )
            })
            .map(|(_, entry_end)| entry_end);
        let relocated_ends = accepted
            .iter()
            .filter(|relocation| {
                overlaps(
                    &relocation.new_start,
                    &relocation.new_end,
                    &start,
                    &end,
                    OBSTACLE_MIN_OVERLAP_MINUTES,
                )
            })
            .map(|relocation| relocation.new_end);

        manual_ends.chain(relocated_ends).max()
    }

    fn is_flexible(&self, entry: &CalendarEntry) -> bool {
        self.schedule_titles
            .contains(entry.clean_title(&self.policy.completion_prefix))
    }
}
