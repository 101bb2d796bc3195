use crate::domain::models::{CalendarEntry, ConflictRecord, RelocationRecord, ReschedulePolicy};
use crate::domain::schedule::ScheduleBlock;
use crate::domain::slot_resolver::SlotResolver;
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use chrono_tz::Tz;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

/// Persists an accepted relocation onto the calendar entry that represents
/// the block.
#[async_trait]
pub trait RelocationWriter: Send + Sync {
    async fn write_relocation(
        &self,
        entry: &CalendarEntry,
        relocation: &RelocationRecord,
    ) -> Result<(), InfraError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistenceFailure {
    pub relocation: RelocationRecord,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub applied: bool,
    /// Every accepted relocation in processing order, persisted or not.
    pub relocations: Vec<RelocationRecord>,
    pub unresolved: Vec<ScheduleBlock>,
    pub failed: Vec<PersistenceFailure>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ResolvedBlock {
    pub title: String,
    pub old_start: String,
    pub new_start: String,
    pub new_end: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FailedBlock {
    pub title: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RunSummary {
    pub date: String,
    pub applied: bool,
    pub resolved: Vec<ResolvedBlock>,
    pub unresolved: Vec<String>,
    pub failed_to_persist: Vec<FailedBlock>,
}

impl ReconcileOutcome {
    pub fn summary(&self, date: NaiveDate) -> RunSummary {
        let resolved = self
            .relocations
            .iter()
            .filter(|relocation| {
                !self
                    .failed
                    .iter()
                    .any(|failure| failure.relocation == **relocation)
            })
            .map(|relocation| ResolvedBlock {
                title: relocation.title.clone(),
                old_start: relocation.old_start.to_rfc3339(),
                new_start: relocation.new_start.to_rfc3339(),
                new_end: relocation.new_end.to_rfc3339(),
            })
            .collect();

        RunSummary {
            date: date.to_string(),
            applied: self.applied,
            resolved,
            unresolved: self
                .unresolved
                .iter()
                .map(|block| block.title.clone())
                .collect(),
            failed_to_persist: self
                .failed
                .iter()
                .map(|failure| FailedBlock {
                    title: failure.relocation.title.clone(),
                    reason: failure.reason.clone(),
                })
                .collect(),
        }
    }
}

/// Relocates every conflicted block of the day, earliest block first, so each
/// later search sees the slots already claimed. A fatal writer error stops
/// further write-backs; the remaining relocations are still computed and
/// reported as not persisted.
pub async fn reconcile<W>(
    conflicts: &[ConflictRecord],
    entries: &[CalendarEntry],
    blocks: &[ScheduleBlock],
    policy: &ReschedulePolicy,
    timezone: Tz,
    apply_changes: bool,
    writer: &W,
) -> ReconcileOutcome
where
    W: RelocationWriter + ?Sized,
{
    let groups = group_conflicts(conflicts, &policy.completion_prefix);
    let resolver = SlotResolver::new(policy, blocks);
    let mut outcome = ReconcileOutcome {
        applied: apply_changes,
        ..ReconcileOutcome::default()
    };
    let mut halted: Option<String> = None;

    for ((_, title), group) in groups {
        let block = &group[0].block;
        debug!(title = %title, conflicts = group.len(), start = %block.start, "resolving block");

        let Some(slot) = resolver.resolve(block, &group, entries, &outcome.relocations) else {
            warn!(title = %title, start = %block.start, "no slot before cutoff; block left in place");
            outcome.unresolved.push(block.clone());
            continue;
        };

        let relocation = RelocationRecord {
            title: title.clone(),
            old_start: block.start.with_timezone(&timezone),
            new_start: slot.start.with_timezone(&timezone),
            new_end: slot.end.with_timezone(&timezone),
        };
        info!(
            title = %title,
            old_start = %relocation.old_start,
            new_start = %relocation.new_start,
            new_end = %relocation.new_end,
            "block relocated"
        );
        outcome.relocations.push(relocation.clone());

        if !apply_changes {
            continue;
        }
        if let Some(cause) = &halted {
            outcome.failed.push(PersistenceFailure {
                relocation,
                reason: format!("not attempted after earlier failure: {cause}"),
            });
            continue;
        }
        match persist(block, &relocation, entries, policy, writer).await {
            Ok(None) => {}
            Ok(Some(reason)) => {
                warn!(title = %title, reason = %reason, "relocation not persisted");
                outcome.failed.push(PersistenceFailure { relocation, reason });
            }
            Err(failure) => {
                error!(title = %title, error = %failure, "write-back rejected; skipping remaining write-backs");
                let reason = failure.to_string();
                halted = Some(reason.clone());
                outcome.failed.push(PersistenceFailure { relocation, reason });
            }
        }
    }

    outcome
}

type GroupKey = (DateTime<Tz>, String);

/// One group per scheduled block, ordered by the block's original start.
/// Records whose "manual" side is a copy of the block itself are dropped.
fn group_conflicts(
    conflicts: &[ConflictRecord],
    completion_prefix: &str,
) -> BTreeMap<GroupKey, Vec<ConflictRecord>> {
    let mut groups: BTreeMap<GroupKey, Vec<ConflictRecord>> = BTreeMap::new();
    for conflict in conflicts {
        if conflict.manual.clean_title(completion_prefix) == conflict.block.title {
            continue;
        }
        groups
            .entry((conflict.block.start, conflict.block.title.clone()))
            .or_default()
            .push(conflict.clone());
    }
    groups
}

/// `Ok(Some(reason))` records a per-block failure; `Err` stops later write-backs.
async fn persist<W>(
    block: &ScheduleBlock,
    relocation: &RelocationRecord,
    entries: &[CalendarEntry],
    policy: &ReschedulePolicy,
    writer: &W,
) -> Result<Option<String>, InfraError>
where
    W: RelocationWriter + ?Sized,
{
    let Some(target) = entries.iter().find(|entry| {
        entry.clean_title(&policy.completion_prefix) == block.title
            && entry.start == Some(block.start)
    }) else {
        return Ok(Some(format!(
            "no calendar event '{}' starting at {}",
            block.title,
            block.start.to_rfc3339()
        )));
    };

    match writer.write_relocation(target, relocation).await {
        Ok(()) => Ok(None),
        Err(error) if error.is_fatal() => Err(error),
        Err(error) => Ok(Some(error.to_string())),
    }
}
