//! Time/Cron Evaluator — relative/absolute one-shot timestamps and a
//! timezone-aware 5-field cron evaluator for recurring tasks.

use chrono::{DateTime, Datelike, Timelike, Utc};
use tam_domain::Error;

/// Parse a timezone string into a `chrono_tz::Tz`, falling back to UTC.
pub fn parse_tz(tz: &str) -> chrono_tz::Tz {
    tz.parse::<chrono_tz::Tz>().unwrap_or(chrono_tz::UTC)
}

fn cron_field_matches(field: &str, value: u32) -> bool {
    if field == "*" {
        return true;
    }
    if let Some(step) = field.strip_prefix("*/") {
        if let Ok(n) = step.parse::<u32>() {
            return n > 0 && value % n == 0;
        }
    }
    for part in field.split(',') {
        let (range_part, step) = match part.split_once('/') {
            Some((r, s)) => (r, s.parse::<u32>().ok()),
            None => (part, None),
        };
        if let Some((start_s, end_s)) = range_part.split_once('-') {
            if let (Ok(start), Ok(end)) = (start_s.parse::<u32>(), end_s.parse::<u32>()) {
                if value >= start && value <= end {
                    let on_step = match step {
                        Some(n) if n > 0 => (value - start) % n == 0,
                        _ => true,
                    };
                    if on_step {
                        return true;
                    }
                }
            }
        } else if let Ok(n) = range_part.parse::<u32>() {
            if value == n {
                return true;
            }
        }
    }
    false
}

fn cron_matches_naive(cron: &str, dt: &chrono::NaiveDateTime) -> bool {
    let fields: Vec<&str> = cron.split_whitespace().collect();
    if fields.len() != 5 {
        return false;
    }
    cron_field_matches(fields[0], dt.minute())
        && cron_field_matches(fields[1], dt.hour())
        && cron_field_matches(fields[2], dt.day())
        && cron_field_matches(fields[3], dt.month())
        && cron_field_matches(fields[4], dt.weekday().num_days_from_sunday())
}

pub fn cron_matches(cron: &str, dt: &DateTime<Utc>) -> bool {
    cron_matches_naive(cron, &dt.naive_utc())
}

const MAX_CHECKS: i64 = 366 * 24 * 60; // one year of minutes

/// `next_after(cron, tz, t)` — the smallest instant strictly greater
/// than `t` that matches `cron`, evaluated in `tz`. `None` if the
/// expression does not match within one year (infeasible input, e.g.
/// `30 * * * 2` combined with a day-of-month that month never has).
///
/// Handles DST: spring-forward gaps are skipped, fall-back overlaps
/// resolve to the earliest (pre-transition) mapping.
pub fn next_after(cron: &str, tz: chrono_tz::Tz, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
    use chrono::TimeZone;

    let local_after = after.with_timezone(&tz).naive_local();
    let next_min_secs = 60 - (local_after.second() as i64);
    let mut candidate = local_after + chrono::Duration::seconds(next_min_secs);
    candidate = candidate.with_second(0).unwrap_or(candidate);

    for _ in 0..MAX_CHECKS {
        if cron_matches_naive(cron, &candidate) {
            match tz.from_local_datetime(&candidate) {
                chrono::LocalResult::Single(dt) => return Some(dt.with_timezone(&Utc)),
                chrono::LocalResult::Ambiguous(earliest, _) => {
                    return Some(earliest.with_timezone(&Utc));
                }
                chrono::LocalResult::None => {}
            }
        }
        candidate += chrono::Duration::minutes(1);
    }
    None
}

/// `upcoming(cron, tz, n)` — a convenience producing the next `n` matches.
pub fn upcoming(cron: &str, tz: chrono_tz::Tz, after: &DateTime<Utc>, n: usize) -> Vec<DateTime<Utc>> {
    let mut results = Vec::with_capacity(n);
    let mut cursor = *after;
    for _ in 0..n {
        match next_after(cron, tz, &cursor) {
            Some(next) => {
                results.push(next);
                cursor = next;
            }
            None => break,
        }
    }
    results
}

/// `describe(cron)` — best-effort human-readable summary. Falls back
/// to echoing the raw expression when no friendly form is recognized.
pub fn describe(cron: &str) -> String {
    let fields: Vec<&str> = cron.split_whitespace().collect();
    if fields.len() != 5 {
        return cron.to_string();
    }
    let (min, hour, dom, month, dow) = (fields[0], fields[1], fields[2], fields[3], fields[4]);

    if dom == "*" && month == "*" && dow == "*" {
        if let (Some(h), Some(m)) = (parse_exact(hour), parse_exact(min)) {
            return format!("every day at {:02}:{:02} UTC", h, m);
        }
        if min.starts_with("*/") && hour == "*" {
            return format!("every {} minutes", &min[2..]);
        }
        if min == "0" && hour == "*" {
            return "every hour".to_string();
        }
    }
    cron.to_string()
}

fn parse_exact(field: &str) -> Option<u32> {
    field.parse::<u32>().ok()
}

/// Parse a one-shot scheduling input: either an absolute ISO-8601
/// timestamp or a relative duration `<integer><unit>`, unit in
/// `{ms, s, m, h, d, w}`. Rejects instants strictly in the past.
pub fn resolve_fire_at(input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, Error> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(input) {
        let ts = ts.with_timezone(&Utc);
        if ts < now {
            return Err(Error::InvalidTime(format!("{input} is strictly in the past")));
        }
        return Ok(ts);
    }

    let duration = parse_relative_duration(input)
        .ok_or_else(|| Error::InvalidTime(format!("unrecognized time input: {input}")))?;
    Ok(now + duration)
}

fn parse_relative_duration(input: &str) -> Option<chrono::Duration> {
    let input = input.trim();
    let split_at = input.find(|c: char| !c.is_ascii_digit())?;
    let (num_s, unit) = input.split_at(split_at);
    let n: i64 = num_s.parse().ok()?;
    match unit {
        "ms" => Some(chrono::Duration::milliseconds(n)),
        "s" => Some(chrono::Duration::seconds(n)),
        "m" => Some(chrono::Duration::minutes(n)),
        "h" => Some(chrono::Duration::hours(n)),
        "d" => Some(chrono::Duration::days(n)),
        "w" => Some(chrono::Duration::weeks(n)),
        _ => None,
    }
}

/// Checks whether a cron expression can ever match within one year —
/// used by validation to reject infeasible combinations like a
/// day-of-month no month ever has.
pub fn is_feasible(cron: &str, tz: chrono_tz::Tz, from: &DateTime<Utc>) -> bool {
    next_after(cron, tz, from).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn cron_every_5_minutes() {
        let dt = Utc.with_ymd_and_hms(2024, 6, 15, 10, 0, 0).unwrap();
        assert!(cron_matches("*/5 * * * *", &dt));
        let dt2 = Utc.with_ymd_and_hms(2024, 6, 15, 10, 3, 0).unwrap();
        assert!(!cron_matches("*/5 * * * *", &dt2));
    }

    #[test]
    fn cron_step_over_range() {
        let dt9 = Utc.with_ymd_and_hms(2024, 6, 15, 9, 0, 0).unwrap();
        assert!(cron_matches("0 9-17/2 * * *", &dt9));
        let dt10 = Utc.with_ymd_and_hms(2024, 6, 15, 10, 0, 0).unwrap();
        assert!(!cron_matches("0 9-17/2 * * *", &dt10));
        let dt11 = Utc.with_ymd_and_hms(2024, 6, 15, 11, 0, 0).unwrap();
        assert!(cron_matches("0 9-17/2 * * *", &dt11));
    }

    #[test]
    fn next_after_basic() {
        let after = Utc.with_ymd_and_hms(2024, 6, 15, 10, 0, 0).unwrap();
        let next = next_after("30 * * * *", chrono_tz::UTC, &after).unwrap();
        assert_eq!(next.minute(), 30);
    }

    #[test]
    fn next_after_tz_basic() {
        let after = Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap();
        let tz = parse_tz("US/Eastern");
        let next = next_after("0 9 * * *", tz, &after).unwrap();
        assert_eq!(next.hour(), 13); // 9 ET = 13 UTC in EDT
    }

    #[test]
    fn next_after_spring_forward_skips_gap() {
        let after = Utc.with_ymd_and_hms(2024, 3, 10, 6, 0, 0).unwrap();
        let tz = parse_tz("US/Eastern");
        let next = next_after("30 2 * * *", tz, &after).unwrap();
        assert_eq!(next.day(), 11);
    }

    #[test]
    fn infeasible_expression_returns_none() {
        // Feb 30th never exists.
        let after = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert!(next_after("0 0 30 2 *", chrono_tz::UTC, &after).is_none());
        assert!(!is_feasible("0 0 30 2 *", chrono_tz::UTC, &after));
    }

    #[test]
    fn upcoming_returns_n_results() {
        let after = Utc.with_ymd_and_hms(2024, 6, 15, 10, 0, 0).unwrap();
        let results = upcoming("0 * * * *", chrono_tz::UTC, &after, 5);
        assert_eq!(results.len(), 5);
    }

    #[test]
    fn describe_daily_time() {
        assert_eq!(describe("30 9 * * *"), "every day at 09:30 UTC");
    }

    #[test]
    fn describe_falls_back_to_raw() {
        assert_eq!(describe("*/5 9-17 * * 1-5"), "*/5 9-17 * * 1-5");
    }

    #[test]
    fn resolve_fire_at_relative_duration() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let resolved = resolve_fire_at("90s", now).unwrap();
        assert_eq!(resolved, now + chrono::Duration::seconds(90));
    }

    #[test]
    fn resolve_fire_at_rejects_past_absolute() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let past = "2020-01-01T00:00:00Z";
        assert!(resolve_fire_at(past, now).is_err());
    }

    #[test]
    fn resolve_fire_at_accepts_future_absolute() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let future = "2030-01-01T00:00:00Z";
        assert!(resolve_fire_at(future, now).is_ok());
    }
}
