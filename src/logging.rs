use std::fs::{self, OpenOptions};
use std::path::PathBuf;

use anyhow::{Context, Result};
use env_logger::{Builder, Env, Target};

pub enum LogTarget {
    Stderr,
    /// Append to a file. Used while the TUI owns the terminal.
    File(PathBuf),
}

/// Install the global logger. `RUST_LOG` wins over `default_level`.
pub fn init(default_level: &str, target: LogTarget) -> Result<()> {
    let mut builder = Builder::from_env(Env::default().default_filter_or(default_level));
    builder.format_timestamp_millis();

    match target {
        LogTarget::Stderr => {
            builder.target(Target::Stderr);
        }
        LogTarget::File(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            builder.target(Target::Pipe(Box::new(file)));
        }
    }

    builder.try_init().context("installing logger")?;
    Ok(())
}
