// Cron window evaluation

use crate::errors::ScheduleError;
use chrono::DateTime;
use cron::Schedule as CronSchedule;
use std::borrow::Cow;
use std::str::FromStr;

/// Parse and validate a cron expression.
///
/// Expressions use seconds resolution (six fields, optional seventh year
/// field). Classic five-field expressions are accepted and evaluated with a
/// seconds field of `0`.
pub fn parse_cron_expression(expression: &str) -> Result<CronSchedule, ScheduleError> {
    let normalized: Cow<'_, str> = if expression.split_whitespace().count() == 5 {
        Cow::Owned(format!("0 {}", expression.trim()))
    } else {
        Cow::Borrowed(expression)
    };

    CronSchedule::from_str(&normalized).map_err(|e| ScheduleError::InvalidCronExpression {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

/// Decide whether a schedule fires for the window ending at `window_end_ms`.
///
/// The schedule's most recent firing instant strictly before `window_end_ms`
/// must be at or after `window_start_ms`; equivalently, some firing instant
/// lies in `[window_start_ms, window_end_ms)`. An instant exactly at
/// `window_end_ms` does not fire on this tick; the next tick's window starts
/// there and owns it. Each instant therefore fires in exactly one of a chain
/// of adjacent windows.
///
/// Timestamps are epoch milliseconds; evaluation is in UTC.
pub fn should_fire(
    expression: &str,
    window_start_ms: i64,
    window_end_ms: i64,
) -> Result<bool, ScheduleError> {
    let schedule = parse_cron_expression(expression)?;

    if window_start_ms >= window_end_ms {
        return Ok(false);
    }

    // Occurrences land on whole seconds, so probing 1ms before the window
    // start makes the iterator's strictly-after semantics inclusive of it.
    let Some(probe) = DateTime::from_timestamp_millis(window_start_ms - 1) else {
        return Ok(false);
    };

    match schedule.after(&probe).next() {
        Some(occurrence) => Ok(occurrence.timestamp_millis() < window_end_ms),
        None => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Timestamp (ms) walkthrough for a check every 10 seconds against a
    // schedule firing every 30 seconds (*/30 * * * * ?):
    //
    // - 1000 --- 1701305990000
    // -  1   --- 1701305999999
    //    0   --- 1701306000000   <- firing instant
    // +  1   --- 1701306000001
    // + 1000 --- 1701306010000

    #[test]
    fn does_not_fire_just_before_an_exact_clock_hit() {
        let result = should_fire("*/30 * * * * ?", 1_701_305_990_000, 1_701_305_999_999);
        assert!(!result.unwrap());
    }

    #[test]
    fn does_not_fire_when_the_window_ends_on_the_clock_hit() {
        let result = should_fire("*/30 * * * * ?", 1_701_305_990_000, 1_701_306_000_000);
        assert!(!result.unwrap());
    }

    #[test]
    fn fires_on_the_pass_after_an_exact_clock_hit() {
        let result = should_fire("*/30 * * * * ?", 1_701_306_000_000, 1_701_306_010_000);
        assert!(result.unwrap());
    }

    #[test]
    fn fires_when_the_window_end_passes_the_clock_hit_by_1ms() {
        let result = should_fire("*/30 * * * * ?", 1_701_305_990_000, 1_701_306_000_001);
        assert!(result.unwrap());
    }

    #[test]
    fn consecutive_windows_fire_an_instant_exactly_once() {
        // The instant at 1701306000000 belongs to the second window only.
        let first = should_fire("*/30 * * * * ?", 1_701_305_990_000, 1_701_306_000_000).unwrap();
        let second = should_fire("*/30 * * * * ?", 1_701_306_000_000, 1_701_306_010_000).unwrap();
        assert!(!first);
        assert!(second);
    }

    #[test]
    fn empty_or_inverted_windows_never_fire() {
        assert!(!should_fire("* * * * * ?", 1_701_306_000_000, 1_701_306_000_000).unwrap());
        assert!(!should_fire("* * * * * ?", 1_701_306_010_000, 1_701_306_000_000).unwrap());
    }

    #[test]
    fn five_field_expressions_are_normalized_to_second_zero() {
        // Daily at midnight; 1701302400000 is 2023-11-30T00:00:00Z.
        let midnight_ms = 1_701_302_400_000;
        let five_field =
            should_fire("0 0 * * *", midnight_ms - 1_000, midnight_ms + 1_000).unwrap();
        let six_field =
            should_fire("0 0 0 * * *", midnight_ms - 1_000, midnight_ms + 1_000).unwrap();

        assert!(five_field);
        assert_eq!(five_field, six_field);
    }

    #[test]
    fn daily_schedule_fires_once_per_day_boundary() {
        let midnight_ms = 1_701_302_400_000;
        let t0 = midnight_ms + 3_600_000; // 01:00, not a firing instant

        assert!(should_fire("0 0 * * *", t0, t0 + 86_400_000).unwrap());
        assert!(!should_fire("0 0 * * *", t0 + 86_400_000, t0 + 86_400_000 + 10_000).unwrap());
    }

    #[test]
    fn malformed_expressions_are_rejected() {
        let result = should_fire("not a cron", 0, 1_000);
        assert!(matches!(
            result,
            Err(ScheduleError::InvalidCronExpression { .. })
        ));

        assert!(parse_cron_expression("61 * * * * ?").is_err());
    }

    #[test]
    fn parse_accepts_quartz_style_day_of_week_placeholder() {
        assert!(parse_cron_expression("*/30 * * * * ?").is_ok());
        assert!(parse_cron_expression("0 0 4 * * 1").is_ok());
    }
}
