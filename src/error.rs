use std::fmt;

use camino::Utf8PathBuf;
use thiserror::Error;

/// Errors raised while loading and validating the configuration file. Any of
/// these aborts the process before a single task runs.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Couldn't read config file '{0}'.\n{1}")]
    Read(Utf8PathBuf, std::io::Error),

    #[error("Couldn't parse config file '{0}'.\n{1}")]
    Parse(Utf8PathBuf, Box<toml::de::Error>),

    #[error("Invalid glob pattern '{pattern}' in '{category}'.\n{source}")]
    Glob {
        category: String,
        pattern: String,
        source: globset::Error,
    },

    #[error("Category '{0}' has no input globs")]
    EmptyInput(String),

    #[error("Task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: String, dependency: String },

    #[error("Cycle detected in task graph at '{0}'")]
    Cycle(String),

    #[error("Invalid browserslist query for '{0}'.\n{1}")]
    Browsers(String, String),
}

/// A single task's pipeline failed. The cause is whatever the failing
/// transformer reported.
#[derive(Debug, Error)]
#[error("Task '{category}': {cause:#}")]
pub struct TransformError {
    pub category: String,
    pub cause: anyhow::Error,
}

impl TransformError {
    pub fn new(category: impl Into<String>, cause: impl Into<anyhow::Error>) -> Self {
        Self {
            category: category.into(),
            cause: cause.into(),
        }
    }
}

/// Errors from the `clean` phase.
#[derive(Debug, Error)]
#[error("Couldn't remove '{0}'.\n{1}")]
pub struct CleanError(pub Utf8PathBuf, pub std::io::Error);

/// A collection of task failures from a one-shot build.
#[derive(Debug)]
pub struct TaskFailures(pub Vec<TransformError>);

impl fmt::Display for TaskFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} task(s) failed", self.0.len())?;
        for error in &self.0 {
            write!(f, "\n  {error}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Error while cleaning output directories:\n{0}")]
    Clean(#[from] CleanError),

    #[error("{0}")]
    Tasks(TaskFailures),

    #[error("Task '{0}' is not configured")]
    Missing(String),
}

#[cfg(feature = "live")]
#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Notify(#[from] notify::Error),

    #[error("Invalid watch pattern.\n{0}")]
    Glob(#[from] globset::Error),
}

#[derive(Debug, Error)]
pub enum TsumikiError {
    #[error("Invalid configuration:\n{0}")]
    Config(#[from] ConfigError),

    #[error("Error while building assets.\n{0}")]
    Build(#[from] BuildError),

    #[error("Error while archiving:\n{0}")]
    Archive(TransformError),

    #[cfg(feature = "live")]
    #[error("Error while watching for file changes:\n{0}")]
    Watch(#[from] WatchError),

    #[error("Error while serving files:\n{0}")]
    Serve(anyhow::Error),
}
