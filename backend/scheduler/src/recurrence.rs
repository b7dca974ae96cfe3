//! Next-occurrence calculation for recurrence specs.
//!
//! Pure calendar arithmetic, no I/O. The scheduler calls this on every
//! completion or failure of a recurring task to re-arm `next_run`.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};

use talentforge_core::{CustomSchedule, IntervalKind, RecurrenceSpec, Result, TalentError};

/// Upper bound on exclude-date slides. One step always advances at
/// least a day, so a full leap year of exclusions exhausts the cap.
pub const EXCLUSION_STEP_CAP: usize = 366;

/// Bump applied when the computed next time is not strictly in the
/// future, so a re-armed task does not fire again in the same tick.
pub const GRACE_MINUTES: i64 = 5;

/// Compute when `spec` should fire next, starting from `base` (the last
/// run, or the originally scheduled time for a first fire).
///
/// Returns `Ok(None)` for one-shot specs. Monthly strides are 30 days,
/// not calendar months.
pub fn next_occurrence(
    spec: &RecurrenceSpec,
    base: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>> {
    let next = match spec.interval {
        IntervalKind::Once => return Ok(None),
        IntervalKind::Hourly => slide_excluded(
            base + Duration::hours(multiplier(spec.every)?),
            spec.schedule.as_ref(),
        )?,
        IntervalKind::Daily => slide_excluded(
            base + Duration::days(multiplier(spec.every)?),
            spec.schedule.as_ref(),
        )?,
        IntervalKind::Weekly => slide_excluded(
            base + Duration::weeks(multiplier(spec.every)?),
            spec.schedule.as_ref(),
        )?,
        IntervalKind::Monthly => slide_excluded(
            base + Duration::days(30 * multiplier(spec.every)?),
            spec.schedule.as_ref(),
        )?,
        IntervalKind::Custom => {
            let schedule = spec.schedule.as_ref().ok_or_else(|| {
                TalentError::Recurrence("custom interval without a schedule".into())
            })?;
            custom_next(schedule, base, now)?
        }
    };

    if next <= now {
        Ok(Some(now + Duration::minutes(GRACE_MINUTES)))
    } else {
        Ok(Some(next))
    }
}

fn multiplier(every: u32) -> Result<i64> {
    if every == 0 {
        return Err(TalentError::Recurrence(
            "interval multiplier must be positive".into(),
        ));
    }
    Ok(every as i64)
}

fn validate(schedule: &CustomSchedule) -> Result<()> {
    if let Some(h) = schedule.hours.iter().find(|h| **h > 23) {
        return Err(TalentError::Recurrence(format!("hour {h} out of range")));
    }
    if let Some(d) = schedule.days.iter().find(|d| **d > 6) {
        return Err(TalentError::Recurrence(format!(
            "day-of-week {d} out of range"
        )));
    }
    Ok(())
}

fn is_excluded(schedule: &CustomSchedule, day: NaiveDate) -> bool {
    schedule.exclude_dates.contains(&day)
}

/// Interval kinds honor only `exclude_dates`: a hit slides the
/// candidate forward one day at a time, keeping its time of day.
fn slide_excluded(
    mut candidate: DateTime<Utc>,
    schedule: Option<&CustomSchedule>,
) -> Result<DateTime<Utc>> {
    let Some(schedule) = schedule else {
        return Ok(candidate);
    };
    validate(schedule)?;
    for _ in 0..EXCLUSION_STEP_CAP {
        if !is_excluded(schedule, candidate.date_naive()) {
            return Ok(candidate);
        }
        candidate += Duration::days(1);
    }
    Err(TalentError::Recurrence(format!(
        "no non-excluded day within {EXCLUSION_STEP_CAP} steps"
    )))
}

fn at_hour(day: NaiveDate, hour: u32) -> Result<DateTime<Utc>> {
    let naive = day
        .and_hms_opt(hour, 0, 0)
        .ok_or_else(|| TalentError::Recurrence(format!("hour {hour} out of range")))?;
    Ok(Utc.from_utc_datetime(&naive))
}

fn custom_next(
    schedule: &CustomSchedule,
    base: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>> {
    validate(schedule)?;

    // A future specific date overrides the hour/day walk entirely.
    if !schedule.specific_dates.is_empty() {
        let mut future: Vec<DateTime<Utc>> = schedule
            .specific_dates
            .iter()
            .copied()
            .filter(|d| *d > now)
            .collect();
        future.sort();
        if !future.is_empty() {
            for candidate in future {
                if !is_excluded(schedule, candidate.date_naive()) {
                    return Ok(candidate);
                }
            }
            return Err(TalentError::Recurrence(
                "all future specific dates are excluded".into(),
            ));
        }
    }

    let mut hours = schedule.hours.clone();
    hours.sort_unstable();
    hours.dedup();

    let mut candidate = if hours.is_empty() {
        base + Duration::days(1)
    } else {
        match hours.iter().copied().find(|h| *h > base.hour()) {
            Some(h) => at_hour(base.date_naive(), h)?,
            None => at_hour(base.date_naive() + Duration::days(1), hours[0])?,
        }
    };
    candidate = snap_day(candidate, &schedule.days, &hours)?;

    for _ in 0..EXCLUSION_STEP_CAP {
        if !is_excluded(schedule, candidate.date_naive()) {
            return Ok(candidate);
        }
        let next_day = candidate.date_naive() + Duration::days(1);
        candidate = if hours.is_empty() {
            Utc.from_utc_datetime(&next_day.and_time(candidate.time()))
        } else {
            at_hour(next_day, hours[0])?
        };
        candidate = snap_day(candidate, &schedule.days, &hours)?;
    }
    Err(TalentError::Recurrence(format!(
        "no non-excluded occurrence within {EXCLUSION_STEP_CAP} steps"
    )))
}

/// Advance to the nearest following allowed weekday. When the candidate
/// moves, the time re-snaps to the first listed hour.
fn snap_day(
    mut candidate: DateTime<Utc>,
    days: &[u32],
    sorted_hours: &[u32],
) -> Result<DateTime<Utc>> {
    if days.is_empty() {
        return Ok(candidate);
    }
    let mut moved = false;
    // days is validated to hold values in 0..=6, so this terminates
    // within seven steps.
    while !days.contains(&candidate.weekday().num_days_from_sunday()) {
        candidate += Duration::days(1);
        moved = true;
    }
    if moved {
        if let Some(first) = sorted_hours.first() {
            candidate = at_hour(candidate.date_naive(), *first)?;
        }
    }
    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn dt(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn date(y: i32, mo: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, mo, d).unwrap()
    }

    #[test]
    fn once_has_no_next() {
        let base = dt(2025, 1, 1, 9, 0);
        let next = next_occurrence(&RecurrenceSpec::once(), base, base).unwrap();
        assert_eq!(next, None);
    }

    #[test]
    fn daily_advances_from_base() {
        // First completion at 09:05 re-arms a day later from that time,
        // not from the original 09:00 schedule.
        let base = dt(2025, 1, 1, 9, 5);
        let next = next_occurrence(&RecurrenceSpec::daily(1), base, base)
            .unwrap()
            .unwrap();
        assert_eq!(next, dt(2025, 1, 2, 9, 5));
    }

    #[test]
    fn hourly_and_weekly_multipliers() {
        let base = dt(2025, 1, 1, 9, 0);
        let next = next_occurrence(&RecurrenceSpec::hourly(6), base, base)
            .unwrap()
            .unwrap();
        assert_eq!(next, dt(2025, 1, 1, 15, 0));

        let next = next_occurrence(&RecurrenceSpec::weekly(2), base, base)
            .unwrap()
            .unwrap();
        assert_eq!(next, dt(2025, 1, 15, 9, 0));
    }

    #[test]
    fn monthly_is_thirty_day_stride() {
        let base = dt(2025, 1, 1, 9, 0);
        let next = next_occurrence(&RecurrenceSpec::monthly(1), base, base)
            .unwrap()
            .unwrap();
        assert_eq!(next, dt(2025, 1, 31, 9, 0));
    }

    #[test]
    fn stale_base_gets_grace_bump() {
        let base = dt(2025, 1, 1, 9, 0);
        let now = dt(2025, 1, 5, 12, 0);
        let next = next_occurrence(&RecurrenceSpec::daily(1), base, now)
            .unwrap()
            .unwrap();
        assert_eq!(next, now + Duration::minutes(GRACE_MINUTES));
    }

    #[test]
    fn zero_multiplier_fails_closed() {
        let base = dt(2025, 1, 1, 9, 0);
        assert!(next_occurrence(&RecurrenceSpec::daily(0), base, base).is_err());
    }

    #[test]
    fn custom_snaps_to_next_listed_hour_same_day() {
        let spec = RecurrenceSpec::custom(CustomSchedule {
            hours: vec![9, 14],
            ..Default::default()
        });
        let base = dt(2025, 1, 1, 10, 0);
        let next = next_occurrence(&spec, base, base).unwrap().unwrap();
        assert_eq!(next, dt(2025, 1, 1, 14, 0));
    }

    #[test]
    fn custom_rolls_to_first_hour_next_day() {
        let spec = RecurrenceSpec::custom(CustomSchedule {
            hours: vec![9, 14],
            ..Default::default()
        });
        let base = dt(2025, 1, 1, 15, 0);
        let next = next_occurrence(&spec, base, base).unwrap().unwrap();
        assert_eq!(next, dt(2025, 1, 2, 9, 0));
    }

    #[test]
    fn custom_advances_to_allowed_weekday() {
        // 2025-01-01 is a Wednesday; Mondays only at 09:00.
        let spec = RecurrenceSpec::custom(CustomSchedule {
            hours: vec![9],
            days: vec![1],
            ..Default::default()
        });
        let base = dt(2025, 1, 1, 10, 0);
        let next = next_occurrence(&spec, base, base).unwrap().unwrap();
        assert_eq!(next, dt(2025, 1, 6, 9, 0));
    }

    #[test]
    fn specific_dates_override_walk() {
        let spec = RecurrenceSpec::custom(CustomSchedule {
            hours: vec![9],
            days: vec![1],
            specific_dates: vec![dt(2025, 1, 3, 16, 30), dt(2025, 1, 2, 8, 0)],
            ..Default::default()
        });
        let now = dt(2025, 1, 1, 10, 0);
        let next = next_occurrence(&spec, now, now).unwrap().unwrap();
        assert_eq!(next, dt(2025, 1, 2, 8, 0));
    }

    #[test]
    fn excluded_specific_date_falls_to_next_listed() {
        let spec = RecurrenceSpec::custom(CustomSchedule {
            specific_dates: vec![dt(2025, 1, 2, 8, 0), dt(2025, 1, 3, 16, 30)],
            exclude_dates: vec![date(2025, 1, 2)],
            ..Default::default()
        });
        let now = dt(2025, 1, 1, 10, 0);
        let next = next_occurrence(&spec, now, now).unwrap().unwrap();
        assert_eq!(next, dt(2025, 1, 3, 16, 30));

        let all_excluded = RecurrenceSpec::custom(CustomSchedule {
            specific_dates: vec![dt(2025, 1, 2, 8, 0)],
            exclude_dates: vec![date(2025, 1, 2)],
            ..Default::default()
        });
        assert!(next_occurrence(&all_excluded, now, now).is_err());
    }

    #[test]
    fn weekly_slides_past_excluded_day() {
        // 2025-03-03 is a Monday. A weekly re-arm landing on an
        // excluded 03-10 slides to 03-11.
        let spec = RecurrenceSpec::weekly(1).with_schedule(CustomSchedule {
            exclude_dates: vec![date(2025, 3, 10)],
            ..Default::default()
        });
        let base = dt(2025, 3, 3, 8, 0);
        let next = next_occurrence(&spec, base, base).unwrap().unwrap();
        assert_eq!(next, dt(2025, 3, 11, 8, 0));
    }

    #[test]
    fn custom_exclusion_returns_different_day() {
        let spec = RecurrenceSpec::custom(CustomSchedule {
            hours: vec![9],
            exclude_dates: vec![date(2025, 1, 2)],
            ..Default::default()
        });
        let base = dt(2025, 1, 1, 15, 0);
        let next = next_occurrence(&spec, base, base).unwrap().unwrap();
        assert_eq!(next, dt(2025, 1, 3, 9, 0));
    }

    #[test]
    fn exclusion_cap_fails_closed() {
        // Every day of 2025 and beyond the naive candidate excluded.
        let exclude: Vec<NaiveDate> = (0..400)
            .map(|i| date(2025, 1, 1) + Duration::days(i))
            .collect();
        let spec = RecurrenceSpec::custom(CustomSchedule {
            exclude_dates: exclude,
            ..Default::default()
        });
        let base = dt(2025, 1, 1, 9, 0);
        assert!(next_occurrence(&spec, base, base).is_err());
    }

    #[test]
    fn malformed_schedule_fails_closed() {
        let bad_hour = RecurrenceSpec::custom(CustomSchedule {
            hours: vec![24],
            ..Default::default()
        });
        let base = dt(2025, 1, 1, 9, 0);
        assert!(next_occurrence(&bad_hour, base, base).is_err());

        let bad_day = RecurrenceSpec::custom(CustomSchedule {
            days: vec![7],
            ..Default::default()
        });
        assert!(next_occurrence(&bad_day, base, base).is_err());
    }
}
