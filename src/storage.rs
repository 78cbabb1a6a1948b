use crate::model::{TaskStore, STORE_VERSION};
use anyhow::{anyhow, bail, Context, Result};
use directories::ProjectDirs;
use std::cell::{Cell, RefCell};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

const STORE_FILE: &str = "tasks.yml";
const LOG_FILE: &str = "daylist.log";
const CONFIG_FILE: &str = "config.toml";

/// Where the task store lives and how it is written.
pub trait TaskRepository {
    fn load(&self) -> Result<TaskStore>;
    fn save(&self, store: &TaskStore) -> Result<()>;
    /// Human-readable location, for headers and log lines.
    fn describe(&self) -> String;
}

#[derive(Debug, Clone)]
pub struct YamlRepository {
    path: PathBuf,
}

impl YamlRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        YamlRepository { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TaskRepository for YamlRepository {
    #[tracing::instrument(skip(self), fields(path = %self.path.display()))]
    fn load(&self) -> Result<TaskStore> {
        if !self.path.exists() {
            info!("no task store yet; starting empty");
            return Ok(TaskStore::new());
        }
        let data = fs::read_to_string(&self.path)
            .with_context(|| format!("reading {:?}", self.path))?;
        let mut store: TaskStore = if data.trim().is_empty() {
            TaskStore::new()
        } else {
            serde_yaml::from_str(&data).context("parsing task store")?
        };
        if store.version > STORE_VERSION {
            bail!(
                "task store {:?} has version {}, this build understands up to {}",
                self.path,
                store.version,
                STORE_VERSION
            );
        }
        if store.repair() {
            warn!("task store order was inconsistent; repaired in memory");
        }
        debug!(count = store.len(), "loaded task store");
        Ok(store)
    }

    #[tracing::instrument(skip(self, store), fields(path = %self.path.display(), count = store.len()))]
    fn save(&self, store: &TaskStore) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).with_context(|| format!("creating {:?}", dir))?;
        let serialized = serde_yaml::to_string(store).context("serializing task store")?;

        let mut temp = NamedTempFile::new_in(&dir)
            .with_context(|| format!("creating temp file in {:?}", dir))?;
        temp.write_all(serialized.as_bytes())
            .with_context(|| format!("writing {:?}", temp.path()))?;
        temp.flush()?;
        temp.persist(&self.path)
            .map_err(|err| anyhow!("failed to persist {:?}: {}", self.path, err))?;
        debug!("task store written");
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Keeps the store in memory. Saves can be made to fail on demand.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    stored: RefCell<TaskStore>,
    fail_saves: Cell<bool>,
    saves: Cell<usize>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(store: TaskStore) -> Self {
        MemoryRepository {
            stored: RefCell::new(store),
            ..Self::default()
        }
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.set(fail);
    }

    /// Number of successful saves so far.
    pub fn saves(&self) -> usize {
        self.saves.get()
    }

    /// The last successfully saved store.
    pub fn snapshot(&self) -> TaskStore {
        self.stored.borrow().clone()
    }
}

impl TaskRepository for MemoryRepository {
    fn load(&self) -> Result<TaskStore> {
        Ok(self.stored.borrow().clone())
    }

    fn save(&self, store: &TaskStore) -> Result<()> {
        if self.fail_saves.get() {
            bail!("memory store is read-only");
        }
        *self.stored.borrow_mut() = store.clone();
        self.saves.set(self.saves.get() + 1);
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("", "", "daylist").context("locating data directory")
}

pub fn default_store_path() -> Result<PathBuf> {
    Ok(project_dirs()?.data_dir().join(STORE_FILE))
}

pub fn default_log_path() -> Result<PathBuf> {
    Ok(project_dirs()?.data_dir().join(LOG_FILE))
}

pub fn default_config_path() -> Result<PathBuf> {
    Ok(project_dirs()?.config_dir().join(CONFIG_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Task;
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    fn sample_store() -> TaskStore {
        let mut store = TaskStore::new();
        let date = Utc
            .with_ymd_and_hms(2024, 5, 8, 9, 0, 0)
            .single()
            .expect("valid timestamp");
        let mut task = Task::new("abc123".into(), date);
        task.title = "Water plants".into();
        store.insert(task);
        store
    }

    #[test]
    fn missing_file_loads_empty_store() {
        let temp = tempdir().expect("tempdir");
        let repo = YamlRepository::new(temp.path().join("nested/tasks.yml"));
        let store = repo.load().expect("load");
        assert!(store.is_empty());
        assert!(!repo.path().exists());
    }

    #[test]
    fn save_creates_directories_and_reloads() {
        let temp = tempdir().expect("tempdir");
        let repo = YamlRepository::new(temp.path().join("nested/tasks.yml"));
        let store = sample_store();
        repo.save(&store).expect("save");
        let loaded = repo.load().expect("reload");
        assert_eq!(loaded, store);
        let leftovers: Vec<_> = fs::read_dir(temp.path().join("nested"))
            .expect("read dir")
            .collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn newer_schema_is_rejected() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("tasks.yml");
        fs::write(&path, "version: 99\ntasks: {}\norder: []\n").expect("write");
        let err = YamlRepository::new(&path).load().expect_err("future version");
        assert!(err.to_string().contains("version 99"));
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("tasks.yml");
        fs::write(&path, "tasks: [not, a, map").expect("write");
        let err = YamlRepository::new(&path).load().expect_err("bad yaml");
        assert!(format!("{err:#}").contains("parsing task store"));
    }

    #[test]
    fn memory_repository_can_refuse_saves() {
        let repo = MemoryRepository::new();
        repo.save(&sample_store()).expect("first save");
        repo.set_fail_saves(true);
        assert!(repo.save(&TaskStore::new()).is_err());
        assert_eq!(repo.saves(), 1);
        assert_eq!(repo.snapshot().len(), 1);
    }
}
