#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod banner;
pub mod config;
mod core;
mod engine;
mod error;
mod io;
pub mod loader;
pub mod output;
mod task;
pub mod transform;
mod utils;

use std::sync::Arc;
use std::time::Instant;

use camino::Utf8Path;
use tracing::info;

pub use crate::banner::Banner;
pub use crate::config::{Category, Config, DEFAULT_CONFIG, Package};
pub use crate::core::{Environment, Mode, Profile};
pub use crate::engine::{BuildSummary, Diagnostics, TaskExecution, TaskGraph};
pub use crate::error::*;
pub use crate::io::clean_dirs;
pub use crate::task::{PipelineTask, Task, TaskReport, archive_task, tasks_from_config};
pub use crate::utils::{LOG_ENV, as_overhead, init_logging};

/// A loaded configuration together with the task graph built from it.
///
/// The configuration is immutable once loaded; every command works off the
/// same `Pipeline`:
///
/// - [`Pipeline::clean`] removes the configured directories.
/// - [`Pipeline::build`] runs every task once.
/// - [`Pipeline::archive`] packages the output tree.
/// - [`Pipeline::watch`] builds, then reruns tasks as their sources change.
/// - [`Pipeline::serve`] serves the output directory over HTTP.
pub struct Pipeline {
    config: Arc<Config>,
    graph: Arc<TaskGraph>,
}

impl Pipeline {
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        let tasks = tasks_from_config(&config)?;
        let graph = TaskGraph::new(tasks)?;

        Ok(Self {
            config: Arc::new(config),
            graph: Arc::new(graph),
        })
    }

    /// Load the configuration file at `path` and build the task graph.
    pub fn load(path: impl AsRef<Utf8Path>) -> Result<Self, ConfigError> {
        Self::new(Config::load(path)?)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    /// A one-shot build environment for the given profile.
    pub fn environment(&self, profile: Profile) -> Environment {
        Environment::new(Mode::Build, profile, Banner::new(&self.config.package))
    }

    pub fn clean(&self) -> Result<(), CleanError> {
        clean_dirs(&self.config.clean)
    }

    /// Run every task once. With `clean`, the configured directories are
    /// removed before any task starts.
    pub fn build(&self, env: &Environment, clean: bool) -> Result<BuildSummary, BuildError> {
        let s = Instant::now();

        if clean {
            self.clean()?;
        }

        let summary = engine::run_once_parallel(&self.graph, env)?;
        summary.diagnostics.log_summary();

        info!(tasks = summary.reports.len(), "built assets {}", as_overhead(s));
        Ok(summary)
    }

    /// Package the current output tree into a timestamped archive.
    pub fn archive(&self, env: &Environment) -> Result<TaskReport, TsumikiError> {
        let task = archive_task(&self.config)?
            .ok_or_else(|| BuildError::Missing("archive".into()))?;

        let report = task.run(env).map_err(TsumikiError::Archive)?;
        info!(files = report.inputs, "archive created");

        Ok(report)
    }

    /// Clean, build, then watch the sources forever. Task failures are logged
    /// and never stop the watcher. With `serve`, the output directory is
    /// served over HTTP and pages reload themselves after each successful
    /// rerun.
    #[cfg(feature = "live")]
    pub fn watch(&self, env: Environment, serve: bool) -> Result<(), TsumikiError> {
        let (env, tcp) = self.watch_environment(env, serve)?;

        info!("running initial build...");
        if let Err(error) = self.build(&env, true) {
            tracing::error!("{error}");
        }

        let reload = tcp.map(engine::watch::start_reload_server);

        #[cfg(feature = "server")]
        let _server = serve.then(|| {
            engine::http::start(self.config.server.root.clone(), self.config.server.port)
        });

        #[cfg(not(feature = "server"))]
        if serve {
            tracing::warn!("built without the `server` feature, not serving files");
        }

        engine::watch::watch(self.graph.clone(), Arc::new(env), reload)?;

        Ok(())
    }

    /// Switch `env` to watch mode. The live-reload socket is only reserved
    /// when serving, so templates carry the reload script only then.
    #[cfg(feature = "live")]
    fn watch_environment(
        &self,
        mut env: Environment,
        serve: bool,
    ) -> Result<(Environment, Option<std::net::TcpListener>), WatchError> {
        env.mode = Mode::Watch;

        if !serve {
            return Ok((env, None));
        }

        let (tcp, port) = engine::watch::reserve_port(self.config.server.reload_port)?;
        env.port = Some(port);

        Ok((env, Some(tcp)))
    }

    /// Serve the output directory until the server stops.
    #[cfg(feature = "server")]
    pub fn serve(&self) -> Result<(), TsumikiError> {
        let server = &self.config.server;

        engine::http::start(server.root.clone(), server.port)
            .join()
            .map_err(|_| TsumikiError::Serve(anyhow::anyhow!("server thread panicked")))?
            .map_err(TsumikiError::Serve)
    }
}
