//! Day selection and the pending/completed split.
//!
//! Days are calendar days in the time zone handed in by the caller; the
//! application passes `chrono::Local`.

use crate::model::{Task, TaskStore};
use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use std::collections::HashMap;

pub const DAY_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M";

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Section {
    Pending,
    Completed,
}

/// One day's tasks, split by completion flag. Both lists keep store order.
#[derive(Debug, Clone)]
pub struct DayBuckets<'a> {
    pub day: NaiveDate,
    pub pending: Vec<&'a Task>,
    pub completed: Vec<&'a Task>,
}

impl Section {
    pub fn label(&self) -> &'static str {
        match self {
            Section::Pending => "Pending",
            Section::Completed => "Completed",
        }
    }

    pub fn of(task: &Task) -> Self {
        if task.is_completed {
            Section::Completed
        } else {
            Section::Pending
        }
    }
}

impl<'a> DayBuckets<'a> {
    pub fn section(&self, section: Section) -> &[&'a Task] {
        match section {
            Section::Pending => &self.pending,
            Section::Completed => &self.completed,
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len() + self.completed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.completed.is_empty()
    }

    /// Where a task sits in the buckets, if it is on this day at all.
    pub fn locate(&self, id: &str) -> Option<(Section, usize)> {
        if let Some(idx) = self.pending.iter().position(|t| t.id == id) {
            return Some((Section::Pending, idx));
        }
        self.completed
            .iter()
            .position(|t| t.id == id)
            .map(|idx| (Section::Completed, idx))
    }
}

pub fn local_day<Tz: TimeZone>(ts: &DateTime<Utc>, tz: &Tz) -> NaiveDate {
    ts.with_timezone(tz).date_naive()
}

pub fn local_time<Tz: TimeZone>(ts: &DateTime<Utc>, tz: &Tz) -> NaiveTime {
    ts.with_timezone(tz).time()
}

/// Combines a local day and time of day into a UTC instant.
///
/// Returns `None` for times skipped by a DST transition; repeated times
/// resolve to their earliest occurrence.
pub fn resolve_local<Tz: TimeZone>(tz: &Tz, day: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&day.and_time(time))
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

pub fn tasks_on<'a, Tz: TimeZone>(store: &'a TaskStore, day: NaiveDate, tz: &Tz) -> Vec<&'a Task> {
    store
        .iter()
        .filter(|task| local_day(&task.date, tz) == day)
        .collect()
}

pub fn partition_day<'a, Tz: TimeZone>(store: &'a TaskStore, day: NaiveDate, tz: &Tz) -> DayBuckets<'a> {
    let (completed, pending): (Vec<&Task>, Vec<&Task>) = tasks_on(store, day, tz)
        .into_iter()
        .partition(|task| task.is_completed);
    DayBuckets {
        day,
        pending,
        completed,
    }
}

pub fn day_counts<Tz: TimeZone>(store: &TaskStore, tz: &Tz) -> HashMap<NaiveDate, usize> {
    let mut counts = HashMap::new();
    for task in store.iter() {
        *counts.entry(local_day(&task.date, tz)).or_insert(0) += 1;
    }
    counts
}

pub fn parse_day(input: &str) -> Result<NaiveDate> {
    let trimmed = input.trim();
    NaiveDate::parse_from_str(trimmed, DAY_FORMAT)
        .map_err(|_| anyhow!("invalid date (use YYYY-MM-DD): {}", trimmed))
}

pub fn parse_time(input: &str) -> Result<NaiveTime> {
    let trimmed = input.trim();
    NaiveTime::parse_from_str(trimmed, TIME_FORMAT)
        .map_err(|_| anyhow!("invalid time (use HH:MM): {}", trimmed))
}

pub fn format_time<Tz: TimeZone>(ts: &DateTime<Utc>, tz: &Tz) -> String {
    local_time(ts, tz).format(TIME_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    fn ts(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, hour, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    fn task(id: &str, date: DateTime<Utc>, done: bool) -> Task {
        let mut task = Task::new(id.into(), date);
        task.title = id.to_uppercase();
        task.is_completed = done;
        task
    }

    fn may_8() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 8).expect("valid day")
    }

    fn ids(tasks: &[&Task]) -> Vec<String> {
        tasks.iter().map(|t| t.id.clone()).collect()
    }

    #[test]
    fn worked_example_partitions_one_day() {
        let mut store = TaskStore::new();
        store.insert(task("a", ts(8, 9), false));
        store.insert(task("b", ts(8, 18), true));
        store.insert(task("c", ts(9, 9), false));

        let buckets = partition_day(&store, may_8(), &Utc);
        assert_eq!(ids(&buckets.pending), vec!["a"]);
        assert_eq!(ids(&buckets.completed), vec!["b"]);
        assert_eq!(buckets.locate("c"), None);
        assert_eq!(buckets.len(), 2);
    }

    #[test]
    fn every_task_on_the_day_lands_in_exactly_one_bucket() {
        let mut store = TaskStore::new();
        for hour in 0..24 {
            store.insert(task(&format!("t{hour}"), ts(8, hour), hour % 3 == 0));
        }
        let buckets = partition_day(&store, may_8(), &Utc);
        assert_eq!(buckets.len(), 24);
        for t in store.iter() {
            let (section, _) = buckets.locate(&t.id).expect("task is on the day");
            assert_eq!(section, Section::of(t));
        }
    }

    #[test]
    fn day_boundaries_follow_the_time_zone() {
        let mut store = TaskStore::new();
        // 23:30 UTC on May 7 is 01:30 on May 8 at UTC+2.
        let late = Utc
            .with_ymd_and_hms(2024, 5, 7, 23, 30, 0)
            .single()
            .expect("valid timestamp");
        store.insert(task("late", late, false));

        let plus_two = FixedOffset::east_opt(2 * 3600).expect("valid offset");
        assert_eq!(ids(&tasks_on(&store, may_8(), &plus_two)), vec!["late"]);
        assert!(tasks_on(&store, may_8(), &Utc).is_empty());
    }

    #[test]
    fn buckets_keep_store_order() {
        let mut store = TaskStore::new();
        store.insert(task("late", ts(8, 20), false));
        store.insert(task("early", ts(8, 6), false));
        let buckets = partition_day(&store, may_8(), &Utc);
        assert_eq!(ids(&buckets.pending), vec!["late", "early"]);
    }

    #[test]
    fn counts_group_by_day() {
        let mut store = TaskStore::new();
        store.insert(task("a", ts(8, 9), false));
        store.insert(task("b", ts(8, 10), true));
        store.insert(task("c", ts(9, 9), false));
        let counts = day_counts(&store, &Utc);
        assert_eq!(counts.get(&may_8()), Some(&2));
        assert_eq!(counts.len(), 2);
    }

    #[test]
    fn resolve_local_applies_offset() {
        let plus_two = FixedOffset::east_opt(2 * 3600).expect("valid offset");
        let time = NaiveTime::from_hms_opt(9, 0, 0).expect("valid time");
        let resolved = resolve_local(&plus_two, may_8(), time).expect("fixed offsets have no gaps");
        assert_eq!(resolved, ts(8, 7));
        assert_eq!(format_time(&resolved, &plus_two), "09:00");
    }

    #[test]
    fn parse_helpers_report_expected_format() {
        assert_eq!(parse_day(" 2024-05-08 ").expect("valid day"), may_8());
        assert_eq!(
            parse_time("18:05").expect("valid time"),
            NaiveTime::from_hms_opt(18, 5, 0).expect("valid time")
        );
        let err = parse_time("6pm").expect_err("not HH:MM");
        assert!(err.to_string().contains("HH:MM"));
        let err = parse_day("08/05/2024").expect_err("not ISO");
        assert!(err.to_string().contains("YYYY-MM-DD"));
    }
}
