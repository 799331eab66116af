//! The task graph and the machinery that executes it.

mod runner;

use std::collections::HashMap;
use std::sync::Arc;

use petgraph::Graph;
use petgraph::graph::NodeIndex;

use crate::error::ConfigError;
use crate::task::Task;

pub use runner::{BuildSummary, Diagnostics, TaskExecution};
pub(crate) use runner::run_once_parallel;

#[cfg(feature = "server")]
pub(crate) use runner::http;
#[cfg(feature = "live")]
pub(crate) use runner::watch;

/// Directed acyclic graph of tasks. An edge points from a dependency to the
/// task that depends on it.
pub struct TaskGraph {
    pub(crate) graph: Graph<Arc<dyn Task>, ()>,
    index: HashMap<String, NodeIndex>,
}

impl TaskGraph {
    pub fn new(tasks: Vec<Arc<dyn Task>>) -> Result<Self, ConfigError> {
        let mut graph: Graph<Arc<dyn Task>, ()> = Graph::new();
        let mut index = HashMap::new();

        for task in tasks {
            let name = task.name().to_string();
            let node = graph.add_node(task);
            index.insert(name, node);
        }

        let mut edges = Vec::new();
        for node in graph.node_indices() {
            let task = &graph[node];
            for dependency in task.dependencies() {
                let Some(&source) = index.get(dependency) else {
                    return Err(ConfigError::UnknownDependency {
                        task: task.name().to_string(),
                        dependency: dependency.clone(),
                    });
                };
                edges.push((source, node));
            }
        }

        for (source, target) in edges {
            graph.add_edge(source, target, ());
        }

        petgraph::algo::toposort(&graph, None)
            .map_err(|cycle| ConfigError::Cycle(graph[cycle.node_id()].name().to_string()))?;

        Ok(Self { graph, index })
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub(crate) fn find(&self, name: &str) -> Option<NodeIndex> {
        self.index.get(name).copied()
    }

    pub fn task(&self, name: &str) -> Option<&Arc<dyn Task>> {
        self.find(name).map(|index| &self.graph[index])
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Arc<dyn Task>> {
        self.graph.node_weights()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::core::Environment;
    use crate::error::TransformError;
    use crate::output::WriteStats;
    use crate::task::TaskReport;

    /// A task that records its runs and can be told to fail.
    pub struct Recorder {
        pub name: String,
        pub deps: Vec<String>,
        pub watch: Vec<String>,
        pub fail: bool,
        pub delay: Duration,
        pub log: Arc<Mutex<Vec<String>>>,
    }

    impl Recorder {
        pub fn new(name: &str, deps: &[&str], log: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                name: name.into(),
                deps: deps.iter().map(|d| d.to_string()).collect(),
                watch: Vec::new(),
                fail: false,
                delay: Duration::ZERO,
                log: log.clone(),
            }
        }

        pub fn failing(mut self) -> Self {
            self.fail = true;
            self
        }
    }

    impl Task for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn dependencies(&self) -> &[String] {
            &self.deps
        }

        fn watched(&self) -> &[String] {
            &self.watch
        }

        fn run(&self, _: &Environment) -> Result<TaskReport, TransformError> {
            std::thread::sleep(self.delay);
            self.log.lock().unwrap().push(self.name.clone());

            if self.fail {
                return Err(TransformError::new(&self.name, anyhow::anyhow!("task failed")));
            }

            Ok(TaskReport {
                name: self.name.clone(),
                inputs: 0,
                outputs: WriteStats::default(),
            })
        }
    }
}
