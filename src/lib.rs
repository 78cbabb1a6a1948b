pub mod cli;
pub mod commands;
pub mod config;
pub mod filter;
pub mod logging;
pub mod model;
pub mod service;
pub mod storage;
pub mod ui;

pub use config::Config;
pub use model::{Task, TaskChanges, TaskError, TaskId, TaskStore};
pub use service::{TodoService, UpdateOutcome};
pub use storage::{MemoryRepository, TaskRepository, YamlRepository};

use anyhow::Result;
use chrono::Local;
use cli::{Cli, Command};
use logging::LogSink;
use std::env;
use std::io::{self, Write};
use std::path::PathBuf;
use tracing::{debug, info};

/// Entry point shared by the binary: config, logging, store, then dispatch.
pub fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    let command = cli.command.unwrap_or(Command::Tui);

    let sink = if command.is_interactive() {
        match storage::default_log_path() {
            Ok(path) => LogSink::File(path),
            Err(_) => LogSink::Stderr,
        }
    } else {
        LogSink::Stderr
    };
    logging::init_tracing(cli.verbose, cli.quiet, config.log_level.as_deref(), sink)?;

    let env_store = env::var_os(config::STORE_ENV).map(PathBuf::from);
    let store_path = config.resolve_store_path(cli.store.as_deref(), env_store)?;
    info!(path = %store_path.display(), "using task store");
    let mut service = TodoService::open(YamlRepository::new(store_path), Local)?;

    // A previous interactive session may have been killed mid-edit.
    if !command.is_interactive() && !matches!(command, Command::Cleanup) {
        let removed = service.end_session();
        if removed > 0 {
            debug!(removed, "swept untitled tasks left by an earlier session");
        }
    }

    let mut out = io::stdout();
    match command {
        Command::Tui => ui::run(service, &config)?,
        Command::List { date } => commands::list(&service, date.as_deref(), &mut out)?,
        Command::Add { title, date, time } => {
            commands::add(&mut service, &title, date.as_deref(), time.as_deref(), &mut out)?;
        }
        Command::Rename { task_id, title } => commands::rename(&mut service, &task_id, &title, &mut out)?,
        Command::Toggle { task_id } => commands::toggle(&mut service, &task_id, &mut out)?,
        Command::Time { task_id, time } => commands::set_time(&mut service, &task_id, &time, &mut out)?,
        Command::Move { task_id, date } => commands::move_task(&mut service, &task_id, &date, &mut out)?,
        Command::Delete { task_id } => commands::delete(&mut service, &task_id, &mut out)?,
        Command::Cleanup => {
            commands::cleanup(&mut service, &mut out)?;
        }
    }
    out.flush()?;
    Ok(())
}
