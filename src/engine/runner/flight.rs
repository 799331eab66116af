//! Single-flight execution of watch-triggered tasks.
//!
//! A task never runs concurrently with itself. A trigger that arrives while
//! the task is running marks it as pending, and the running thread performs
//! one more run when it is done. Any number of triggers during a run collapse
//! into that single rerun. Different tasks run independently.

use std::collections::HashMap;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::core::Environment;
use crate::engine::TaskGraph;
use crate::engine::runner::run_guarded;
use crate::utils::as_overhead;

#[derive(Debug, Default, Clone, Copy)]
struct Slot {
    running: bool,
    pending: bool,
}

/// In-flight and pending-rerun flags, per task name.
#[derive(Debug, Default)]
pub(crate) struct FlightTable {
    slots: Mutex<HashMap<String, Slot>>,
}

impl FlightTable {
    /// Returns `true` when the caller should start a run now. Otherwise the
    /// task is already running and a rerun has been scheduled.
    pub fn begin(&self, name: &str) -> bool {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = slots.entry(name.to_string()).or_default();

        if slot.running {
            slot.pending = true;
            false
        } else {
            slot.running = true;
            true
        }
    }

    /// Called by the running thread after each run. Returns `true` when a
    /// rerun was requested in the meantime, in which case the task stays
    /// marked as running.
    pub fn finish(&self, name: &str) -> bool {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = slots.entry(name.to_string()).or_default();

        if slot.pending {
            slot.pending = false;
            true
        } else {
            slot.running = false;
            false
        }
    }
}

/// Runs tasks in response to file changes and announces successful runs on
/// the reload channel.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    graph: Arc<TaskGraph>,
    env: Arc<Environment>,
    flights: Arc<FlightTable>,
    reload: Option<Sender<()>>,
}

impl Dispatcher {
    pub fn new(graph: Arc<TaskGraph>, env: Arc<Environment>, reload: Option<Sender<()>>) -> Self {
        Self {
            graph,
            env,
            flights: Arc::default(),
            reload,
        }
    }

    /// Run the named task on a background thread. Returns `None` when the
    /// task is unknown or already running, in which case a rerun is queued.
    pub fn trigger(&self, name: &str) -> Option<JoinHandle<()>> {
        let task = self.graph.task(name)?.clone();

        if !self.flights.begin(name) {
            tracing::debug!(task = %name, "already running, rerun queued");
            return None;
        }

        let this = self.clone();
        let name = name.to_string();

        Some(thread::spawn(move || {
            loop {
                let s = Instant::now();
                tracing::info!(task = %name, "change detected, running");

                match run_guarded(task.as_ref(), &this.env) {
                    Ok(report) => {
                        tracing::info!(
                            task = %name,
                            written = report.outputs.written,
                            "rebuilt {}",
                            as_overhead(s)
                        );

                        if let Some(reload) = &this.reload
                            && reload.send(()).is_err()
                        {
                            tracing::warn!("reload notifier is gone");
                        }
                    }
                    Err(error) => tracing::error!("{error}"),
                }

                if !this.flights.finish(&name) {
                    break;
                }
            }
        }))
    }
}
