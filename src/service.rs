//! Mutation entry points for the task list.
//!
//! Every operation applies its change to the in-memory store and commits it
//! through the repository before returning. Commit failures are logged and
//! recorded in `last_save_failed`; they never reach the caller. The only
//! errors returned are semantic ones (`TaskError`).

use crate::filter::{self, DayBuckets};
use crate::model::{Task, TaskChanges, TaskError, TaskId, TaskStore};
use crate::storage::TaskRepository;
use anyhow::Result;
use chrono::{Duration as ChronoDuration, NaiveDate, NaiveTime, TimeZone, Utc};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, error, info};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated,
    /// The edit session ended with a blank title and the task was removed.
    Deleted,
}

pub struct TodoService<R, Tz>
where
    Tz: TimeZone,
{
    repo: R,
    tz: Tz,
    store: TaskStore,
    last_saved: Option<Instant>,
    last_save_failed: bool,
}

impl<R: TaskRepository, Tz: TimeZone> TodoService<R, Tz> {
    #[tracing::instrument(skip_all, fields(repo = %repo.describe()))]
    pub fn open(repo: R, tz: Tz) -> Result<Self> {
        let store = repo.load()?;
        info!(count = store.len(), "task store opened");
        Ok(TodoService {
            repo,
            tz,
            store,
            last_saved: None,
            last_save_failed: false,
        })
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub fn time_zone(&self) -> &Tz {
        &self.tz
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.store.get(id)
    }

    pub fn today(&self) -> NaiveDate {
        filter::local_day(&Utc::now(), &self.tz)
    }

    pub fn day(&self, day: NaiveDate) -> DayBuckets<'_> {
        filter::partition_day(&self.store, day, &self.tz)
    }

    pub fn day_counts(&self) -> HashMap<NaiveDate, usize> {
        filter::day_counts(&self.store, &self.tz)
    }

    pub fn last_saved(&self) -> Option<Instant> {
        self.last_saved
    }

    pub fn last_save_failed(&self) -> bool {
        self.last_save_failed
    }

    /// Seeds a blank, incomplete task on `day` at the current local time.
    #[tracing::instrument(skip(self))]
    pub fn create_task(&mut self, day: NaiveDate) -> Result<TaskId, TaskError> {
        let time = filter::local_time(&Utc::now(), &self.tz);
        let date = filter::resolve_local(&self.tz, day, time)
            // Inside a DST gap the wall clock jumps forward; land after it.
            .or_else(|| filter::resolve_local(&self.tz, day, time + ChronoDuration::hours(1)))
            .filter(|date| filter::local_day(date, &self.tz) == day)
            .ok_or(TaskError::InvalidLocalTime { day, time })?;

        let id = self.store.generate_id();
        self.store.insert(Task::new(id.clone(), date));
        self.commit("create");
        Ok(id)
    }

    /// Applies `changes` to a task and persists it.
    ///
    /// When `changes.ends_edit` is set and the resulting title is blank, the
    /// task is deleted instead of saved.
    #[tracing::instrument(skip(self, changes), fields(ends_edit = changes.ends_edit))]
    pub fn update_task(&mut self, id: &str, changes: TaskChanges) -> Result<UpdateOutcome, TaskError> {
        let blank = self.store.apply(id, &changes)?.has_blank_title();
        if changes.ends_edit && blank {
            self.store.remove(id);
            self.commit("discard-blank");
            info!("removed task left without a title");
            return Ok(UpdateOutcome::Deleted);
        }
        self.commit("update");
        Ok(UpdateOutcome::Updated)
    }

    /// Flips the completion flag and returns the new value.
    pub fn toggle_completion(&mut self, id: &str) -> Result<bool, TaskError> {
        let done = !self.require(id)?.is_completed;
        self.update_task(id, TaskChanges::default().completed(done))?;
        Ok(done)
    }

    /// Sets the title without ending the edit session.
    pub fn rename(&mut self, id: &str, title: &str) -> Result<UpdateOutcome, TaskError> {
        self.update_task(id, TaskChanges::default().title(title))
    }

    /// Moves a task to another time of day on the same local day.
    pub fn set_time(&mut self, id: &str, time: NaiveTime) -> Result<UpdateOutcome, TaskError> {
        let day = filter::local_day(&self.require(id)?.date, &self.tz);
        let date = filter::resolve_local(&self.tz, day, time)
            .ok_or(TaskError::InvalidLocalTime { day, time })?;
        self.update_task(id, TaskChanges::default().date(date))
    }

    /// Moves a task to another day, keeping its local time of day.
    pub fn reschedule(&mut self, id: &str, day: NaiveDate) -> Result<UpdateOutcome, TaskError> {
        let time = filter::local_time(&self.require(id)?.date, &self.tz);
        let date = filter::resolve_local(&self.tz, day, time)
            .ok_or(TaskError::InvalidLocalTime { day, time })?;
        self.update_task(id, TaskChanges::default().date(date))
    }

    /// Closes the edit session of one task: blank titles are deleted.
    pub fn end_edit(&mut self, id: &str) -> Result<UpdateOutcome, TaskError> {
        self.update_task(id, TaskChanges::default().ending_edit())
    }

    /// Closes every edit session at once, as when the app goes to the
    /// background. Returns how many blank tasks were removed.
    #[tracing::instrument(skip(self))]
    pub fn end_session(&mut self) -> usize {
        let blank = self.store.blank_titled();
        for id in &blank {
            self.store.remove(id);
        }
        if !blank.is_empty() {
            self.commit("end-session");
            info!(removed = blank.len(), "removed tasks left without a title");
        }
        blank.len()
    }

    /// Explicit delete; the title does not matter.
    #[tracing::instrument(skip(self))]
    pub fn delete(&mut self, id: &str) -> Result<Task, TaskError> {
        let removed = self
            .store
            .remove(id)
            .ok_or_else(|| TaskError::NotFound(id.to_string()))?;
        self.commit("delete");
        Ok(removed)
    }

    fn require(&self, id: &str) -> Result<&Task, TaskError> {
        self.store
            .get(id)
            .ok_or_else(|| TaskError::NotFound(id.to_string()))
    }

    fn commit(&mut self, action: &'static str) {
        match self.repo.save(&self.store) {
            Ok(()) => {
                self.last_saved = Some(Instant::now());
                self.last_save_failed = false;
                debug!(action, count = self.store.len(), "committed");
            }
            Err(err) => {
                self.last_save_failed = true;
                error!(action, error = ?err, "failed to persist tasks");
            }
        }
    }
}
