mod diagnostics;
pub(crate) mod flight;
#[cfg(feature = "server")]
pub(crate) mod http;
#[cfg(feature = "live")]
pub(crate) mod watch;

use std::collections::{HashMap, HashSet};
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError, channel};
use std::time::{Duration, Instant};

use petgraph::graph::NodeIndex;
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::core::Environment;
use crate::engine::TaskGraph;
use crate::error::{BuildError, TaskFailures, TransformError};
use crate::task::{Task, TaskReport};

pub use diagnostics::{Diagnostics, TaskExecution};

/// Everything that happened during one pass over the task graph.
#[derive(Debug, Default)]
pub struct BuildSummary {
    pub reports: Vec<TaskReport>,
    pub failures: Vec<TransformError>,
    /// Tasks that never ran because a dependency failed.
    pub skipped: Vec<String>,
    pub diagnostics: Diagnostics,
}

/// Run every task in the graph once. Fails when any task failed, after all
/// tasks that could run have finished.
pub(crate) fn run_once_parallel(
    graph: &TaskGraph,
    env: &Environment,
) -> Result<BuildSummary, BuildError> {
    let nodes = graph.graph.node_indices().collect();
    let mut summary = run_tasks_parallel(graph, env, &nodes);

    if summary.failures.is_empty() {
        Ok(summary)
    } else {
        if !summary.skipped.is_empty() {
            tracing::warn!(skipped = ?summary.skipped, "skipped tasks with failed dependencies");
        }
        Err(BuildError::Tasks(TaskFailures(std::mem::take(
            &mut summary.failures,
        ))))
    }
}

/// Run a single task, turning a panic into a [`TransformError`].
pub(crate) fn run_guarded(task: &dyn Task, env: &Environment) -> Result<TaskReport, TransformError> {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| task.run(env))) {
        Ok(result) => result,
        Err(panic) => {
            let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                format!("Task panicked: {s}")
            } else if let Some(s) = panic.downcast_ref::<String>() {
                format!("Task panicked: {s}")
            } else {
                String::from("Task panicked with unknown payload")
            };

            Err(TransformError::new(task.name(), anyhow::anyhow!(msg)))
        }
    }
}

type TaskResult = (
    NodeIndex,
    Result<TaskReport, TransformError>,
    Instant,
    Duration,
);

/// Wait for the next finished task without starving the pool. When called
/// from a rayon worker, queued jobs are run on this thread in the meantime,
/// otherwise a pool with a single thread would never get to them.
fn next_result(receiver: &Receiver<TaskResult>) -> Option<TaskResult> {
    loop {
        match receiver.try_recv() {
            Ok(result) => return Some(result),
            Err(TryRecvError::Disconnected) => return None,
            Err(TryRecvError::Empty) => {}
        }

        match rayon::yield_now() {
            Some(rayon::Yield::Executed) => continue,
            Some(rayon::Yield::Idle) => match receiver.recv_timeout(Duration::from_millis(1)) {
                Ok(result) => return Some(result),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return None,
            },
            None => return receiver.recv().ok(),
        }
    }
}

/// Execute a subset of the task graph on the rayon pool. A task is started as
/// soon as all of its dependencies inside the subset have succeeded.
///
/// 1. Tasks without pending dependencies are spawned right away.
/// 2. The calling thread collects results from a channel.
/// 3. A success decrements the dependency count of every dependent, spawning
///    those that reach zero.
/// 4. A failure is recorded and all transitive dependents are skipped. Tasks
///    that already started are allowed to finish.
pub(crate) fn run_tasks_parallel(
    graph: &TaskGraph,
    env: &Environment,
    nodes_to_run: &HashSet<NodeIndex>,
) -> BuildSummary {
    let mut dependents: HashMap<NodeIndex, Vec<NodeIndex>> = HashMap::new();
    for edge in graph.graph.raw_edges() {
        dependents
            .entry(edge.source())
            .or_default()
            .push(edge.target());
    }

    // A dependency only counts if it's also in the set of nodes to run.
    let mut dependency_counts: HashMap<NodeIndex, usize> = nodes_to_run
        .iter()
        .map(|&i| {
            (
                i,
                graph
                    .graph
                    .neighbors_directed(i, petgraph::Direction::Incoming)
                    .filter(|dep| nodes_to_run.contains(dep))
                    .count(),
            )
        })
        .collect();

    let total_tasks = nodes_to_run.len();
    let mut summary = BuildSummary::default();

    if total_tasks == 0 {
        return summary;
    }

    let root_span = tracing::span!(Level::INFO, "building_tasks");
    root_span.pb_set_length(total_tasks as u64);
    if let Ok(style) = crate::utils::get_style_build() {
        root_span.pb_set_style(&style);
    }
    root_span.pb_set_message("Building tasks...");
    let _enter = root_span.enter();

    let pb_style = crate::utils::get_style_task().ok();
    let mut skipped = HashSet::new();

    rayon::in_place_scope(|s| {
        let (result_sender, result_receiver) = channel::<TaskResult>();

        let spawn_task = |index: NodeIndex| {
            let task = graph.graph[index].clone();
            let sender = result_sender.clone();
            let pb_style = pb_style.clone();

            s.spawn(move |_| {
                let span = tracing::span!(Level::INFO, "task", name = task.name());
                if let Some(style) = &pb_style {
                    span.pb_set_style(style);
                }
                span.pb_set_message(&format!("Running {}", task.name()));
                let _enter = span.enter();

                let start = Instant::now();
                let result = run_guarded(task.as_ref(), env);
                let elapsed = start.elapsed();

                // The receiver outlives the scope.
                let _ = sender.send((index, result, start, elapsed));
            });
        };

        for &node_index in nodes_to_run {
            if dependency_counts.get(&node_index).copied().unwrap_or(0) == 0 {
                spawn_task(node_index);
            }
        }

        let mut completed_tasks = 0;

        while completed_tasks < total_tasks {
            let Some((index, result, start, duration)) = next_result(&result_receiver) else {
                break;
            };

            completed_tasks += 1;
            root_span.pb_inc(1);

            let name = graph.graph[index].name().to_string();
            summary
                .diagnostics
                .execution_times
                .insert(name.clone(), TaskExecution { start, duration });

            match result {
                Ok(report) => {
                    tracing::debug!(
                        task = %name,
                        inputs = report.inputs,
                        written = report.outputs.written,
                        unchanged = report.outputs.unchanged,
                        "task finished"
                    );
                    summary.reports.push(report);

                    for &next in dependents.get(&index).into_iter().flatten() {
                        if let Some(count) = dependency_counts.get_mut(&next) {
                            *count -= 1;
                            if *count == 0 && !skipped.contains(&next) {
                                spawn_task(next);
                            }
                        }
                    }
                }
                Err(error) => {
                    tracing::error!("{error}");
                    summary.failures.push(error);

                    let mut stack: Vec<NodeIndex> =
                        dependents.get(&index).cloned().unwrap_or_default();

                    while let Some(next) = stack.pop() {
                        if nodes_to_run.contains(&next) && skipped.insert(next) {
                            completed_tasks += 1;
                            root_span.pb_inc(1);
                            summary.skipped.push(graph.graph[next].name().to_string());
                            stack.extend(dependents.get(&next).into_iter().flatten());
                        }
                    }
                }
            }
        }
    });

    if summary.failures.is_empty() {
        tracing::info!("Build complete!");
    }

    summary
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::engine::testing::Recorder;
    use crate::transform::testing;

    fn graph(tasks: Vec<Recorder>) -> TaskGraph {
        TaskGraph::new(
            tasks
                .into_iter()
                .map(|t| Arc::new(t) as Arc<dyn Task>)
                .collect(),
        )
        .unwrap()
    }

    fn position(log: &[String], name: &str) -> usize {
        log.iter().position(|n| n == name).unwrap()
    }

    #[test]
    fn test_dependencies_run_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let graph = graph(vec![
            Recorder::new("images", &["sprites"], &log),
            Recorder::new("sprites", &[], &log),
            Recorder::new("styles", &[], &log),
        ]);

        let summary = run_once_parallel(&graph, &testing::env()).unwrap();
        assert_eq!(summary.reports.len(), 3);

        let log = log.lock().unwrap();
        assert!(position(&log, "sprites") < position(&log, "images"));
    }

    #[test]
    fn test_failure_skips_dependents_only() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let graph = graph(vec![
            Recorder::new("sprites", &[], &log).failing(),
            Recorder::new("images", &["sprites"], &log),
            Recorder::new("styles", &[], &log),
            Recorder::new("scripts", &[], &log),
        ]);

        let nodes = graph.graph.node_indices().collect();
        let summary = run_tasks_parallel(&graph, &testing::env(), &nodes);

        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].category, "sprites");
        assert_eq!(summary.skipped, vec!["images"]);
        assert_eq!(summary.reports.len(), 2);

        let log = log.lock().unwrap();
        assert!(!log.contains(&"images".to_string()));
        assert!(log.contains(&"styles".to_string()));
        assert!(log.contains(&"scripts".to_string()));
    }

    #[test]
    fn test_run_once_reports_failures() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let graph = graph(vec![
            Recorder::new("a", &[], &log).failing(),
            Recorder::new("b", &[], &log).failing(),
            Recorder::new("c", &[], &log),
        ]);

        let err = run_once_parallel(&graph, &testing::env()).unwrap_err();
        match err {
            BuildError::Tasks(failures) => assert_eq!(failures.0.len(), 2),
            other => panic!("unexpected error: {other}"),
        }

        // The healthy task still ran.
        assert!(log.lock().unwrap().contains(&"c".to_string()));
    }

    #[test]
    fn test_subset() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let graph = graph(vec![
            Recorder::new("a", &[], &log),
            Recorder::new("b", &["a"], &log),
        ]);

        let only_b = [graph.find("b").unwrap()].into_iter().collect();
        let summary = run_tasks_parallel(&graph, &testing::env(), &only_b);

        assert_eq!(summary.reports.len(), 1);
        assert_eq!(*log.lock().unwrap(), vec!["b"]);
    }

    #[test]
    fn test_single_thread_pool() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let graph = graph(vec![
            Recorder::new("images", &["sprites"], &log),
            Recorder::new("sprites", &[], &log),
            Recorder::new("styles", &[], &log),
        ]);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(1)
            .build()
            .unwrap();

        let summary = pool
            .install(|| run_once_parallel(&graph, &testing::env()))
            .unwrap();
        assert_eq!(summary.reports.len(), 3);

        let log = log.lock().unwrap();
        assert!(position(&log, "sprites") < position(&log, "images"));
    }

    #[test]
    fn test_single_thread_pool_with_failure() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let graph = graph(vec![
            Recorder::new("sprites", &[], &log).failing(),
            Recorder::new("images", &["sprites"], &log),
        ]);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(1)
            .build()
            .unwrap();

        let err = pool
            .install(|| run_once_parallel(&graph, &testing::env()))
            .unwrap_err();
        assert!(matches!(err, BuildError::Tasks(ref f) if f.0.len() == 1));
    }

    #[test]
    fn test_empty_graph() {
        let graph = graph(vec![]);
        let summary = run_once_parallel(&graph, &testing::env()).unwrap();
        assert!(summary.reports.is_empty());
    }
}
