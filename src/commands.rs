use crate::filter::{self, DayBuckets, Section, DAY_FORMAT};
use crate::model::{Task, TaskChanges, TaskId};
use crate::service::{TodoService, UpdateOutcome};
use crate::storage::TaskRepository;
use anyhow::{anyhow, bail, Context, Result};
use chrono::{NaiveDate, TimeZone};
use std::io::Write;

pub fn list<R, Tz, W>(service: &TodoService<R, Tz>, date: Option<&str>, out: &mut W) -> Result<()>
where
    R: TaskRepository,
    Tz: TimeZone,
    W: Write,
{
    let day = day_or_today(service, date)?;
    writeln!(out, "{} ({})", day.format(DAY_FORMAT), service.repository().describe())?;
    write!(out, "{}", render_day(&service.day(day), service.time_zone()))?;
    Ok(())
}

pub fn add<R, Tz, W>(
    service: &mut TodoService<R, Tz>,
    title: &str,
    date: Option<&str>,
    time: Option<&str>,
    out: &mut W,
) -> Result<TaskId>
where
    R: TaskRepository,
    Tz: TimeZone,
    W: Write,
{
    let title = title.trim();
    if title.is_empty() {
        bail!("title cannot be empty");
    }
    let day = day_or_today(service, date)?;
    let when = match time {
        Some(raw) => {
            let time = filter::parse_time(raw)?;
            let resolved = filter::resolve_local(service.time_zone(), day, time)
                .ok_or_else(|| anyhow!("{} does not exist on {} in the local time zone", time, day))?;
            Some(resolved)
        }
        None => None,
    };

    let id = service.create_task(day)?;
    let mut changes = TaskChanges::default().title(title).ending_edit();
    if let Some(date) = when {
        changes = changes.date(date);
    }
    service
        .update_task(&id, changes)
        .with_context(|| format!("naming task {}", id))?;
    writeln!(out, "Added task {} on {}", id, day.format(DAY_FORMAT))?;
    Ok(id)
}

pub fn rename<R, Tz, W>(service: &mut TodoService<R, Tz>, task_id: &str, title: &str, out: &mut W) -> Result<()>
where
    R: TaskRepository,
    Tz: TimeZone,
    W: Write,
{
    let changes = TaskChanges::default().title(title).ending_edit();
    match service.update_task(task_id, changes)? {
        UpdateOutcome::Updated => writeln!(out, "Renamed task {}", task_id)?,
        UpdateOutcome::Deleted => writeln!(out, "Deleted task {} (empty title)", task_id)?,
    }
    Ok(())
}

pub fn toggle<R, Tz, W>(service: &mut TodoService<R, Tz>, task_id: &str, out: &mut W) -> Result<()>
where
    R: TaskRepository,
    Tz: TimeZone,
    W: Write,
{
    let done = service.toggle_completion(task_id)?;
    let state = if done { "completed" } else { "pending" };
    writeln!(out, "Task {} is {}", task_id, state)?;
    Ok(())
}

pub fn set_time<R, Tz, W>(service: &mut TodoService<R, Tz>, task_id: &str, time: &str, out: &mut W) -> Result<()>
where
    R: TaskRepository,
    Tz: TimeZone,
    W: Write,
{
    let time = filter::parse_time(time)?;
    service.set_time(task_id, time)?;
    writeln!(out, "Task {} now at {}", task_id, time.format(filter::TIME_FORMAT))?;
    Ok(())
}

pub fn move_task<R, Tz, W>(service: &mut TodoService<R, Tz>, task_id: &str, date: &str, out: &mut W) -> Result<()>
where
    R: TaskRepository,
    Tz: TimeZone,
    W: Write,
{
    let day = filter::parse_day(date)?;
    service.reschedule(task_id, day)?;
    writeln!(out, "Moved task {} to {}", task_id, day.format(DAY_FORMAT))?;
    Ok(())
}

pub fn delete<R, Tz, W>(service: &mut TodoService<R, Tz>, task_id: &str, out: &mut W) -> Result<()>
where
    R: TaskRepository,
    Tz: TimeZone,
    W: Write,
{
    let removed = service.delete(task_id)?;
    writeln!(out, "Deleted task {}: {}", removed.id, display_title(&removed))?;
    Ok(())
}

pub fn cleanup<R, Tz, W>(service: &mut TodoService<R, Tz>, out: &mut W) -> Result<usize>
where
    R: TaskRepository,
    Tz: TimeZone,
    W: Write,
{
    let removed = service.end_session();
    writeln!(out, "Removed {} untitled task(s)", removed)?;
    Ok(removed)
}

/// Plain-text rendering of a day: both sections with counts.
pub fn render_day<Tz: TimeZone>(buckets: &DayBuckets<'_>, tz: &Tz) -> String {
    let mut text = String::new();
    for section in [Section::Pending, Section::Completed] {
        let tasks = buckets.section(section);
        if tasks.is_empty() {
            text.push_str(&format!("{}\n  (no tasks)\n", section.label()));
            continue;
        }
        text.push_str(&format!("{} ({})\n", section.label(), tasks.len()));
        for task in tasks {
            let mark = if task.is_completed { "x" } else { " " };
            text.push_str(&format!(
                "  [{}] {}  {}  {}\n",
                mark,
                task.id,
                filter::format_time(&task.date, tz),
                display_title(task)
            ));
        }
    }
    text
}

fn display_title(task: &Task) -> &str {
    if task.has_blank_title() {
        "(untitled)"
    } else {
        task.title.as_str()
    }
}

fn day_or_today<R, Tz>(service: &TodoService<R, Tz>, date: Option<&str>) -> Result<NaiveDate>
where
    R: TaskRepository,
    Tz: TimeZone,
{
    match date {
        Some(raw) => filter::parse_day(raw),
        None => Ok(service.today()),
    }
}
