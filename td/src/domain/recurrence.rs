//! Cron recurrence rules
//!
//! Tasks carry standard 5-field Unix cron expressions (minute, hour,
//! day-of-month, month, day-of-week). The `cron` crate wants a leading
//! seconds field, so rules are normalized to run at second 0.
//!
//! Two Unix behaviors the crate does not share are handled here. Numeric
//! day-of-week items (0-7, Sunday = 0 or 7) are expanded to day names, and
//! when both day fields are restricted a time matches if either one does.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::error::TaskError;

/// A parsed recurrence rule
#[derive(Debug, Clone)]
pub struct Recurrence {
    expr: String,
    /// One schedule, or two when day-of-month and day-of-week are both restricted
    schedules: Vec<Schedule>,
}

const WEEKDAYS: [&str; 8] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT", "SUN"];

fn invalid(expr: &str, detail: impl std::fmt::Display) -> TaskError {
    TaskError::Validation(format!("Invalid recurrence rule '{}': {}", expr, detail))
}

/// Days covered by one numeric item (`n`, `a-b`, `a/s`, `a-b/s`, `*/s`);
/// `None` if the item is not numeric
fn expand_day_item(item: &str) -> Option<Result<Vec<usize>, String>> {
    let (range, step) = match item.split_once('/') {
        Some((range, step)) => (range, Some(step)),
        None => (item, None),
    };
    let step = match step.map(str::parse::<usize>) {
        None => 1,
        Some(Ok(step)) if step > 0 => step,
        Some(_) => return Some(Err(format!("bad step in '{}'", item))),
    };
    let (start, end) = if range == "*" {
        (0, 6)
    } else if let Some((a, b)) = range.split_once('-') {
        (a.parse::<usize>().ok()?, b.parse::<usize>().ok()?)
    } else {
        let start = range.parse::<usize>().ok()?;
        // `a/s` runs to the end of the week
        (start, if item.contains('/') { start.max(6) } else { start })
    };
    if end >= WEEKDAYS.len() || start > end {
        return Some(Err(format!("day-of-week '{}' out of range 0-7", item)));
    }
    Some(Ok((start..=end).step_by(step).collect()))
}

/// Rewrite numeric day-of-week items as day names; the `cron` crate numbers
/// days 1-7 from Sunday and rejects wrap-around names like `FRI-SUN`
fn normalize_day_of_week(field: &str) -> Result<String, String> {
    if field == "*" || field == "?" {
        return Ok(field.to_string());
    }
    let mut items: Vec<String> = Vec::new();
    for item in field.split(',') {
        match expand_day_item(item) {
            Some(days) => {
                for day in days? {
                    let name = WEEKDAYS[day].to_string();
                    if !items.contains(&name) {
                        items.push(name);
                    }
                }
            }
            None => items.push(item.to_string()),
        }
    }
    Ok(items.join(","))
}

/// Restricted in the Unix sense: a day field that does not start with `*`
fn is_restricted(field: &str) -> bool {
    !field.starts_with('*') && field != "?"
}

/// 6-field expressions for the `cron` crate; two when both day fields are restricted
fn normalize_cron_expr(expr: &str) -> Result<Vec<String>, TaskError> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(invalid(expr, format!("expected 5 cron fields, found {}", fields.len())));
    }
    let [minute, hour, dom, month, dow] = [fields[0], fields[1], fields[2], fields[3], fields[4]];
    let dow = normalize_day_of_week(dow).map_err(|e| invalid(expr, e))?;

    if is_restricted(dom) && is_restricted(fields[4]) {
        Ok(vec![
            format!("0 {} {} {} {} *", minute, hour, dom, month),
            format!("0 {} {} * {} {}", minute, hour, month, dow),
        ])
    } else {
        Ok(vec![format!("0 {} {} {} {} {}", minute, hour, dom, month, dow)])
    }
}

impl Recurrence {
    pub fn parse(expr: &str) -> Result<Self, TaskError> {
        let schedules = normalize_cron_expr(expr)?
            .iter()
            .map(|normalized| Schedule::from_str(normalized).map_err(|e| invalid(expr, e)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            expr: expr.to_string(),
            schedules,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.expr
    }

    /// First occurrence strictly after `after`
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedules
            .iter()
            .filter_map(|schedule| schedule.after(&after).next())
            .min()
    }
}

/// Validate a rule without keeping the parsed schedule
pub fn validate_rule(expr: &str) -> Result<(), TaskError> {
    Recurrence::parse(expr).map(|_| ())
}

/// Next occurrence of `expr` after `after`
pub fn next_run(expr: &str, after: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, TaskError> {
    Ok(Recurrence::parse(expr)?.next_after(after))
}


#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize_cron_expr("* * * * *").unwrap(), vec!["0 * * * * *"]);
        assert_eq!(normalize_cron_expr(" 0  2 * * * ").unwrap(), vec!["0 0 2 * * *"]);
        assert!(normalize_cron_expr("0 0 2 * * *").is_err());
    }

    #[test]
    fn test_unix_day_of_week() {
        assert_eq!(normalize_day_of_week("1-5").unwrap(), "MON,TUE,WED,THU,FRI");
        assert_eq!(normalize_day_of_week("0,6").unwrap(), "SUN,SAT");
        assert_eq!(normalize_day_of_week("7").unwrap(), "SUN");
        assert_eq!(normalize_day_of_week("0,7").unwrap(), "SUN");
        assert_eq!(normalize_day_of_week("*/2").unwrap(), "SUN,TUE,THU,SAT");
        assert_eq!(normalize_day_of_week("MON").unwrap(), "MON");
        assert_eq!(normalize_day_of_week("*").unwrap(), "*");
        assert!(normalize_day_of_week("8").is_err());
        assert!(normalize_day_of_week("5-2").is_err());
        assert!(normalize_day_of_week("1/0").is_err());

        // 2026-03-06 is a Friday; weekdays-only rule skips to Monday
        let rule = Recurrence::parse("0 9 * * 1-5").unwrap();
        assert_eq!(rule.next_after(at(2026, 3, 6, 10, 0)).unwrap(), at(2026, 3, 9, 9, 0));
    }

    #[test]
    fn test_day_of_week_ranges_and_steps() {
        assert_eq!(normalize_day_of_week("5-7").unwrap(), "FRI,SAT,SUN");
        assert_eq!(normalize_day_of_week("1/2").unwrap(), "MON,WED,FRI");
        assert_eq!(normalize_day_of_week("1-5/2").unwrap(), "MON,WED,FRI");

        // Friday through Sunday: from Monday 2026-03-09 the next run is Friday
        let weekend = Recurrence::parse("0 9 * * 5-7").unwrap();
        assert_eq!(weekend.next_after(at(2026, 3, 9, 10, 0)).unwrap(), at(2026, 3, 13, 9, 0));
        assert_eq!(weekend.next_after(at(2026, 3, 14, 10, 0)).unwrap(), at(2026, 3, 15, 9, 0));

        for rule in ["0 0 * * 1/2", "0 0 * * 1-5/2"] {
            let rule = Recurrence::parse(rule).unwrap();
            // Thursday 2026-03-05 -> Friday
            assert_eq!(rule.next_after(at(2026, 3, 5, 1, 0)).unwrap(), at(2026, 3, 6, 0, 0));
            // Friday 2026-03-06 -> Monday
            assert_eq!(rule.next_after(at(2026, 3, 6, 1, 0)).unwrap(), at(2026, 3, 9, 0, 0));
        }
    }

    #[test]
    fn test_day_fields_match_either() {
        // 1st of the month or any Monday; 2026-03-01 is a Sunday
        let rule = Recurrence::parse("0 0 1 * 1").unwrap();
        assert_eq!(rule.next_after(at(2026, 3, 1, 1, 0)).unwrap(), at(2026, 3, 2, 0, 0));
        // Monday 2026-03-30 -> Wednesday 2026-04-01 via day-of-month
        assert_eq!(rule.next_after(at(2026, 3, 30, 1, 0)).unwrap(), at(2026, 4, 1, 0, 0));

        // A wildcard day-of-month keeps the day-of-week restriction alone
        assert_eq!(normalize_cron_expr("0 0 * * 1").unwrap().len(), 1);
        assert_eq!(normalize_cron_expr("0 0 */2 * 1").unwrap().len(), 1);
        assert_eq!(
            normalize_cron_expr("0 0 1 * 1").unwrap(),
            vec!["0 0 0 1 * *", "0 0 0 * * MON"]
        );
    }

    #[test]
    fn test_invalid_rules() {
        assert!(matches!(validate_rule("not-a-cron"), Err(TaskError::Validation(_))));
        assert!(validate_rule("").is_err());
        assert!(validate_rule("61 * * * *").is_err());
        assert!(matches!(validate_rule("0 0 * * 9"), Err(TaskError::Validation(_))));
    }

    #[test]
    fn test_next_after() {
        let rule = Recurrence::parse("30 2 * * *").unwrap();
        let next = rule.next_after(at(2026, 3, 1, 1, 0)).unwrap();
        assert_eq!(next, at(2026, 3, 1, 2, 30));

        let again = rule.next_after(next).unwrap();
        assert_eq!(again, at(2026, 3, 2, 2, 30));
    }

    #[test]
    fn test_every_minute_is_in_future() {
        let now = Utc::now();
        let next = next_run("* * * * *", now).unwrap().unwrap();
        assert!(next > now);
        assert_eq!(next.second(), 0);
    }
}
