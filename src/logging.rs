use anyhow::{anyhow, Context, Result};
use std::fs::{self, OpenOptions};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Where log lines go. The TUI owns the terminal, so it logs to a file.
#[derive(Debug, Clone)]
pub enum LogSink {
    Stderr,
    File(PathBuf),
}

/// Picks the default filter from `-v`/`-q` counts, falling back to the
/// configured level and then `warn`.
pub fn level_for(verbose: u8, quiet: u8, configured: Option<&str>) -> String {
    let level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        return configured
            .map(|l| l.trim().to_ascii_lowercase())
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| "warn".to_string());
    };
    level.to_string()
}

/// Installs the global subscriber. `RUST_LOG` wins over the computed level.
/// A second call is a no-op.
pub fn init_tracing(verbose: u8, quiet: u8, configured: Option<&str>, sink: LogSink) -> Result<()> {
    let default_level = level_for(verbose, quiet, configured);
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = match sink {
        LogSink::Stderr => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_level(true)
            .with_writer(std::io::stderr)
            .with_ansi(std::io::stderr().is_terminal())
            .try_init(),
        LogSink::File(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).with_context(|| format!("creating {:?}", parent))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("opening log file {:?}", path))?;
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .with_level(true)
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .try_init()
        }
    };

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::level_for;

    #[test]
    fn flags_pick_the_level() {
        assert_eq!(level_for(0, 0, None), "warn");
        assert_eq!(level_for(1, 0, None), "info");
        assert_eq!(level_for(2, 0, None), "debug");
        assert_eq!(level_for(5, 0, None), "trace");
        assert_eq!(level_for(3, 1, None), "warn");
        assert_eq!(level_for(0, 2, Some("debug")), "error");
    }

    #[test]
    fn configured_level_applies_without_flags() {
        assert_eq!(level_for(0, 0, Some(" INFO ")), "info");
        assert_eq!(level_for(0, 0, Some("")), "warn");
        assert_eq!(level_for(1, 0, Some("trace")), "info");
    }
}
