//! Throttle planning: fold a batch of pending items into a
//! monotonically increasing sequence of dispatch timestamps that
//! respects the pipeline's posting hours, posting days, and minimum
//! spacing.

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Timelike, Utc};
use talentforge_core::{PipelineItem, PipelineSettings, Result, TalentError};
use uuid::Uuid;

/// Upper bound on day advances while hunting for an allowed window.
const SNAP_DAY_CAP: u32 = 14;

/// Assign a dispatch time to every item.
///
/// Items are ordered priority descending, then enqueue time ascending.
/// The cursor starts at `now`, is snapped into the allowed window, and
/// advances by `min_interval_minutes` per assignment with the window
/// re-applied each step. Assigned timestamps never decrease.
pub fn plan_dispatch_times(
    items: &[PipelineItem],
    settings: &PipelineSettings,
    now: DateTime<Utc>,
) -> Result<Vec<(Uuid, DateTime<Utc>)>> {
    validate(settings)?;

    let mut ordered: Vec<&PipelineItem> = items.iter().collect();
    ordered.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.created_at.cmp(&b.created_at))
    });

    let mut plan = Vec::with_capacity(ordered.len());
    let mut cursor = snap_to_window(now, settings)?;
    for item in ordered {
        plan.push((item.id, cursor));
        let advanced = cursor + Duration::minutes(i64::from(settings.min_interval_minutes));
        cursor = snap_to_window(advanced, settings)?;
    }
    Ok(plan)
}

fn validate(settings: &PipelineSettings) -> Result<()> {
    if let Some(hours) = &settings.posting_hours {
        if hours.is_empty() {
            return Err(TalentError::Config("postingHours is empty".to_string()));
        }
        if let Some(bad) = hours.iter().find(|&&h| h > 23) {
            return Err(TalentError::Config(format!(
                "postingHours contains invalid hour {bad}"
            )));
        }
    }
    if let Some(days) = &settings.posting_days {
        if days.is_empty() {
            return Err(TalentError::Config("postingDays is empty".to_string()));
        }
        if let Some(bad) = days.iter().find(|&&d| d > 6) {
            return Err(TalentError::Config(format!(
                "postingDays contains invalid day {bad}"
            )));
        }
    }
    Ok(())
}

/// Move `cursor` forward to the nearest instant inside the allowed
/// hours/days window. A cursor already inside is returned unchanged.
fn snap_to_window(
    mut cursor: DateTime<Utc>,
    settings: &PipelineSettings,
) -> Result<DateTime<Utc>> {
    for _ in 0..SNAP_DAY_CAP {
        if let Some(hours) = &settings.posting_hours {
            cursor = snap_hour(cursor, hours)?;
        }
        match &settings.posting_days {
            Some(days) if !days.contains(&cursor.weekday().num_days_from_sunday()) => {
                cursor = start_of_next_day(cursor)?;
            }
            _ => return Ok(cursor),
        }
    }
    Err(TalentError::Config(format!(
        "no allowed dispatch window within {SNAP_DAY_CAP} days"
    )))
}

fn snap_hour(cursor: DateTime<Utc>, hours: &[u32]) -> Result<DateTime<Utc>> {
    if hours.contains(&cursor.hour()) {
        return Ok(cursor);
    }
    let mut sorted = hours.to_vec();
    sorted.sort_unstable();
    match sorted.iter().find(|&&h| h > cursor.hour()) {
        Some(&h) => at_hour(cursor, h),
        None => at_hour(start_of_next_day(cursor)?, sorted[0]),
    }
}

fn at_hour(cursor: DateTime<Utc>, hour: u32) -> Result<DateTime<Utc>> {
    let time = NaiveTime::from_hms_opt(hour, 0, 0)
        .ok_or_else(|| TalentError::Recurrence(format!("invalid hour {hour}")))?;
    Ok(Utc.from_utc_datetime(&cursor.date_naive().and_time(time)))
}

fn start_of_next_day(cursor: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let next = cursor
        .date_naive()
        .succ_opt()
        .ok_or_else(|| TalentError::Recurrence("date overflow".to_string()))?;
    Ok(Utc.from_utc_datetime(&next.and_time(NaiveTime::MIN)))
}
