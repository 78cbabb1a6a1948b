use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

pub type TaskId = String;

/// Schema marker written into every store document.
pub const STORE_VERSION: u32 = 1;

const ID_LEN: usize = 6;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub date: DateTime<Utc>,
    pub is_completed: bool,
}

/// Partial update applied through `TodoService::update_task`.
///
/// `ends_edit` marks the change as the last one of an edit session, which
/// runs the empty-title cleanup after the fields are applied.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TaskChanges {
    pub title: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub is_completed: Option<bool>,
    pub ends_edit: bool,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("task not found: {0}")]
    NotFound(TaskId),
    #[error("{time} does not exist on {day} in the local time zone")]
    InvalidLocalTime { day: NaiveDate, time: NaiveTime },
}

/// Every task record, keyed by id, plus the order they were created in.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TaskStore {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    tasks: BTreeMap<TaskId, Task>,
    #[serde(default)]
    order: Vec<TaskId>,
}

fn default_version() -> u32 {
    STORE_VERSION
}

impl Task {
    /// A blank, incomplete task as seeded by the "new task" action.
    pub fn new(id: TaskId, date: DateTime<Utc>) -> Self {
        Task {
            id,
            title: String::new(),
            date,
            is_completed: false,
        }
    }

    pub fn has_blank_title(&self) -> bool {
        self.title.trim().is_empty()
    }
}

impl TaskChanges {
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn date(mut self, date: DateTime<Utc>) -> Self {
        self.date = Some(date);
        self
    }

    pub fn completed(mut self, is_completed: bool) -> Self {
        self.is_completed = Some(is_completed);
        self
    }

    pub fn ending_edit(mut self) -> Self {
        self.ends_edit = true;
        self
    }

    fn apply_to(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title = title.clone();
        }
        if let Some(date) = self.date {
            task.date = date;
        }
        if let Some(done) = self.is_completed {
            task.is_completed = done;
        }
    }
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskStore {
    pub fn new() -> Self {
        TaskStore {
            version: STORE_VERSION,
            tasks: BTreeMap::new(),
            order: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tasks.contains_key(id)
    }

    /// Tasks in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &Task> + '_ {
        self.order.iter().filter_map(|id| self.tasks.get(id))
    }

    /// Inserts a task at the end of the order, or replaces it in place when
    /// the id already exists.
    pub fn insert(&mut self, task: Task) {
        if !self.tasks.contains_key(&task.id) {
            self.order.push(task.id.clone());
        }
        self.tasks.insert(task.id.clone(), task);
    }

    pub fn remove(&mut self, id: &str) -> Option<Task> {
        let removed = self.tasks.remove(id)?;
        self.order.retain(|existing| existing != id);
        Some(removed)
    }

    pub fn update_task<F>(&mut self, id: &str, f: F) -> Result<&Task, TaskError>
    where
        F: FnOnce(&mut Task),
    {
        let task = self
            .tasks
            .get_mut(id)
            .ok_or_else(|| TaskError::NotFound(id.to_string()))?;
        f(&mut *task);
        Ok(task)
    }

    pub fn apply(&mut self, id: &str, changes: &TaskChanges) -> Result<&Task, TaskError> {
        self.update_task(id, |task| changes.apply_to(task))
    }

    /// Ids of tasks whose title is empty after trimming, in creation order.
    pub fn blank_titled(&self) -> Vec<TaskId> {
        self.iter()
            .filter(|task| task.has_blank_title())
            .map(|task| task.id.clone())
            .collect()
    }

    /// Draws a random id that is not used by any task in the store.
    pub fn generate_id(&self) -> TaskId {
        let mut rng = rand::thread_rng();
        loop {
            let id: TaskId = (&mut rng)
                .sample_iter(&Alphanumeric)
                .take(ID_LEN)
                .map(char::from)
                .collect();
            if !self.tasks.contains_key(&id) {
                return id;
            }
        }
    }

    /// Brings `order` back in line with `tasks` after loading a hand-edited
    /// document. Returns true when anything changed.
    pub fn repair(&mut self) -> bool {
        let mut changed = false;
        for (key, task) in self.tasks.iter_mut() {
            if &task.id != key {
                task.id = key.clone();
                changed = true;
            }
        }

        let before = self.order.len();
        let mut seen = HashSet::new();
        let tasks = &self.tasks;
        self.order
            .retain(|id| tasks.contains_key(id) && seen.insert(id.clone()));
        changed |= before != self.order.len();

        let mut orphans: Vec<&Task> = self
            .tasks
            .values()
            .filter(|task| !seen.contains(&task.id))
            .collect();
        orphans.sort_by_key(|task| task.date);
        let orphan_ids: Vec<TaskId> = orphans.into_iter().map(|task| task.id.clone()).collect();
        if !orphan_ids.is_empty() {
            changed = true;
            self.order.extend(orphan_ids);
        }
        changed
    }
}
