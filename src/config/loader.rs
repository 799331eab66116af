use std::collections::HashSet;
use std::fs;

use camino::Utf8Path;
use tracing::debug;

use crate::config::Config;
use crate::error::ConfigError;
use crate::loader::GlobInput;

impl Config {
    /// Read, parse and validate a configuration file.
    pub fn load(path: impl AsRef<Utf8Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_owned(), e))?;
        let config = Self::parse(&text).map_err(|e| match e {
            ParseFailure::Toml(e) => ConfigError::Parse(path.to_owned(), e),
            ParseFailure::Invalid(e) => e,
        })?;

        debug!(path = %path, categories = config.categories().len(), "loaded config");
        Ok(config)
    }

    /// Parse and validate configuration from a string.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Self::parse(text).map_err(|e| match e {
            ParseFailure::Toml(e) => ConfigError::Parse("<inline>".into(), e),
            ParseFailure::Invalid(e) => e,
        })
    }

    fn parse(text: &str) -> Result<Self, ParseFailure> {
        let config: Config = toml::from_str(text).map_err(|e| ParseFailure::Toml(Box::new(e)))?;
        config.validate().map_err(ParseFailure::Invalid)?;
        Ok(config)
    }

    /// Check everything that serde can't: glob syntax, non-empty inputs and
    /// dependency names. Cycles are detected when the task graph is built.
    fn validate(&self) -> Result<(), ConfigError> {
        let categories = self.categories();
        let names: HashSet<&str> = categories.iter().map(|c| c.name.as_str()).collect();

        for category in &categories {
            if category.input.is_empty() {
                return Err(ConfigError::EmptyInput(category.name.clone()));
            }

            for pattern in category.input.iter().chain(&category.watch) {
                check_glob(&category.name, pattern)?;
            }

            for dependency in &category.depends_on {
                if !names.contains(dependency.as_str()) {
                    return Err(ConfigError::UnknownDependency {
                        task: category.name.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }
        }

        if let Some(archive) = &self.archive {
            if archive.input.is_empty() {
                return Err(ConfigError::EmptyInput("archive".into()));
            }
            for pattern in &archive.input {
                check_glob("archive", pattern)?;
            }
        }

        Ok(())
    }
}

enum ParseFailure {
    Toml(Box<toml::de::Error>),
    Invalid(ConfigError),
}

fn check_glob(category: &str, pattern: &str) -> Result<(), ConfigError> {
    GlobInput::new(pattern)
        .map(|_| ())
        .map_err(|source| ConfigError::Glob {
            category: category.to_string(),
            pattern: pattern.to_string(),
            source,
        })
}
