//! Calendar periods walked by the year/month and year/month/day strategies.

use chrono::{Datelike, Days, Months, NaiveDate};

/// First day of every calendar month intersecting `[start, end)`, oldest
/// first.
pub fn months_in_range(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut out = Vec::new();
    let Some(mut cur) = start.with_day(1) else {
        return out;
    };
    while cur < end {
        out.push(cur);
        match cur.checked_add_months(Months::new(1)) {
            Some(next) => cur = next,
            None => break,
        }
    }
    out
}

/// Every day in `[start, end)`, oldest first.
pub fn days_in_range(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut out = Vec::new();
    let mut cur = start;
    while cur < end {
        out.push(cur);
        match cur.checked_add_days(Days::new(1)) {
            Some(next) => cur = next,
            None => break,
        }
    }
    out
}
