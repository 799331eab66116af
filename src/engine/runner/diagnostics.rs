use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct TaskExecution {
    pub start: Instant,
    pub duration: Duration,
}

/// Build diagnostics and performance metrics.
#[derive(Debug, Default)]
pub struct Diagnostics {
    /// Execution metrics of every task that ran, keyed by task name.
    pub execution_times: HashMap<String, TaskExecution>,
}

impl Diagnostics {
    /// Time between the first task starting and the last one finishing.
    pub fn wall_time(&self) -> Duration {
        let times = self.execution_times.values();
        let start = times.clone().map(|t| t.start).min();
        let end = times.map(|t| t.start + t.duration).max();

        match (start, end) {
            (Some(start), Some(end)) => end.duration_since(start),
            _ => Duration::ZERO,
        }
    }

    /// Tasks ordered from slowest to fastest, ties broken by name.
    pub fn slowest(&self) -> Vec<(&str, Duration)> {
        let mut list: Vec<_> = self
            .execution_times
            .iter()
            .map(|(name, exec)| (name.as_str(), exec.duration))
            .collect();

        list.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        list
    }

    /// A plain text table of task durations, in start order.
    pub fn render_table(&self) -> String {
        let mut rows: Vec<_> = self.execution_times.iter().collect();
        rows.sort_by(|a, b| a.1.start.cmp(&b.1.start).then_with(|| a.0.cmp(b.0)));

        let width = rows.iter().map(|(name, _)| name.len()).max().unwrap_or(0);
        let mut out = String::new();

        for (name, exec) in rows {
            out.push_str(&format!("{name:<width$}  {:>10.2?}\n", exec.duration));
        }

        out.push_str(&format!("{:<width$}  {:>10.2?}", "total", self.wall_time()));
        out
    }

    pub(crate) fn log_summary(&self) {
        if let Some((name, duration)) = self.slowest().first() {
            tracing::info!(task = %name, "slowest task took {duration:.2?}");
        }
        tracing::debug!("task timings:\n{}", self.render_table());
    }
}
