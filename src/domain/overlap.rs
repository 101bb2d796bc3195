use chrono::{DateTime, Duration, TimeZone};

/// True when `[start1, end1)` and `[start2, end2)` share a positive span of at
/// least `min_minutes`. Touching endpoints never overlap.
pub fn overlaps<T: TimeZone>(
    start1: &DateTime<T>,
    end1: &DateTime<T>,
    start2: &DateTime<T>,
    end2: &DateTime<T>,
    min_minutes: i64,
) -> bool {
    let overlap = overlap_duration(start1, end1, start2, end2);
    overlap > Duration::zero() && overlap >= Duration::minutes(min_minutes)
}

pub fn overlap_duration<T: TimeZone>(
    start1: &DateTime<T>,
    end1: &DateTime<T>,
    start2: &DateTime<T>,
    end2: &DateTime<T>,
) -> Duration {
    let latest_start = if start1 >= start2 { start1 } else { start2 };
    let earliest_end = if end1 <= end2 { end1 } else { end2 };
    earliest_end.clone().signed_duration_since(latest_start)
}
