use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "daylist", version, about = "Day-by-day to-do list for the terminal")]
pub struct Cli {
    /// Task store file (overrides DAYLIST_STORE and the config file)
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,
    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// More log output (repeatable)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
    /// Less log output (repeatable)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub quiet: u8,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the pending and completed tasks of a day
    List {
        /// Day in YYYY-MM-DD format (defaults to today)
        #[arg(long)]
        date: Option<String>,
    },
    /// Add a task
    Add {
        /// Title of the task
        title: String,
        /// Day in YYYY-MM-DD format (defaults to today)
        #[arg(long)]
        date: Option<String>,
        /// Time of day in HH:MM format (defaults to now)
        #[arg(long)]
        time: Option<String>,
    },
    /// Change a task's title; an empty title deletes the task
    Rename {
        /// Task id
        task_id: String,
        /// New title
        title: String,
    },
    /// Mark a task completed, or pending again
    Toggle {
        /// Task id
        task_id: String,
    },
    /// Change the time of day of a task
    Time {
        /// Task id
        task_id: String,
        /// Time of day in HH:MM format
        time: String,
    },
    /// Move a task to another day, keeping its time
    Move {
        /// Task id
        task_id: String,
        /// Day in YYYY-MM-DD format
        date: String,
    },
    /// Delete a task
    Delete {
        /// Task id
        task_id: String,
    },
    /// Remove tasks that were left without a title
    Cleanup,
    /// Launch the interactive day view
    Tui,
}

impl Command {
    pub fn is_interactive(&self) -> bool {
        matches!(self, Command::Tui)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_tui() {
        let cli = Cli::try_parse_from(["daylist"]).expect("parse");
        assert!(cli.command.is_none());
    }

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::try_parse_from(["daylist", "add", "Buy milk", "--time", "09:30", "-vv", "--store", "/tmp/t.yml"])
            .expect("parse");
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.store, Some(PathBuf::from("/tmp/t.yml")));
        match cli.command {
            Some(Command::Add { title, time, date }) => {
                assert_eq!(title, "Buy milk");
                assert_eq!(time.as_deref(), Some("09:30"));
                assert!(date.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn rename_accepts_empty_title() {
        let cli = Cli::try_parse_from(["daylist", "rename", "abc123", ""]).expect("parse");
        assert!(matches!(cli.command, Some(Command::Rename { ref title, .. }) if title.is_empty()));
    }
}
