mod diagnostics;
#[cfg(feature = "server")]
pub mod http;
#[cfg(feature = "live")]
pub mod watch;

use std::collections::{HashMap, HashSet};
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError, channel};
use std::time::{Duration, Instant};

use petgraph::graph::NodeIndex;
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::core::{Environment, TaskContext};
use crate::engine::Pipeline;
use crate::error::BuildError;

pub use diagnostics::{Diagnostics, TaskExecution};

/// This function executes a set of tasks on the rayon thread pool. Tasks are
/// started as soon as all of their dependencies inside the set completed.
///
/// The algorithm works as follows:
/// 1. Dependency counts are computed for every task in the set, counting only
///    dependencies which are also in the set.
/// 2. Tasks with no pending dependencies are spawned.
/// 3. The calling thread waits on a channel for results, running queued
///    jobs itself when it is a pool worker. When a task completes, the counts of its dependents are decremented and those
///    reaching zero are spawned.
/// 4. After the first failure nothing new is spawned; tasks already running
///    are awaited and the first error is returned.
pub(crate) fn run_tasks_parallel(
    site: &Pipeline,
    env: &Environment,
    nodes_to_run: &HashSet<NodeIndex>,
) -> Result<Diagnostics, BuildError> {
    // Build a map from a dependency to the nodes that depend on it.
    let mut dependents: HashMap<NodeIndex, Vec<NodeIndex>> = HashMap::new();
    for edge in site.graph.raw_edges() {
        dependents
            .entry(edge.source())
            .or_default()
            .push(edge.target());
    }

    let mut dependency_counts: HashMap<NodeIndex, usize> = nodes_to_run
        .iter()
        .map(|&i| {
            (
                i,
                site.graph
                    .neighbors_directed(i, petgraph::Direction::Incoming)
                    .filter(|dep| nodes_to_run.contains(dep))
                    .count(),
            )
        })
        .collect();

    let total_tasks = nodes_to_run.len() as u64;
    if total_tasks == 0 {
        return Ok(Diagnostics::default());
    }

    let root_span = tracing::span!(Level::INFO, "running_tasks");
    root_span.pb_set_length(total_tasks);
    root_span.pb_set_style(&crate::utils::STYLE_ROOT);
    root_span.pb_set_message("Running tasks...");
    let _enter = root_span.enter();

    let mut execution_times = HashMap::new();
    let mut failure = None;

    rayon::in_place_scope(|s| {
        let (result_sender, result_receiver) =
            channel::<(NodeIndex, anyhow::Result<()>, Instant, Duration)>();

        let spawn_task = |index: NodeIndex| {
            let task = &site.graph[index];
            let name = task.name.clone();
            let action = task.action.clone();
            let sender = result_sender.clone();

            s.spawn(move |_| {
                let span = tracing::span!(Level::INFO, "task", name = %name);
                span.pb_set_style(&crate::utils::STYLE_TASK);
                span.pb_set_message(&name);
                let _enter = span.enter();

                let context = TaskContext {
                    env,
                    name: &name,
                    span: span.clone(),
                };

                let start_time = Instant::now();

                // The task only shares immutable data with other threads, a
                // panic inside it cannot leave anything half-updated in memory.
                let output = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    match &action {
                        Some(action) => action(&context),
                        None => Ok(()),
                    }
                })) {
                    Ok(result) => result,
                    Err(panic) => {
                        let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                            format!("Task panicked: {s}")
                        } else if let Some(s) = panic.downcast_ref::<String>() {
                            format!("Task panicked: {s}")
                        } else {
                            String::from("Task panicked with unknown payload")
                        };

                        Err(anyhow::anyhow!(msg))
                    }
                };

                let elapsed = start_time.elapsed();

                // The receiver outlives every spawned task.
                let _ = sender.send((index, output, start_time, elapsed));
            });
        };

        let mut in_flight = 0;

        // Seed initial tasks
        for &index in nodes_to_run {
            if dependency_counts.get(&index).copied().unwrap_or(0) == 0 {
                spawn_task(index);
                in_flight += 1;
            }
        }

        // Scheduler loop
        while in_flight > 0 {
            let Some((index, output, start, duration)) = next_result(&result_receiver) else {
                break;
            };

            in_flight -= 1;
            root_span.pb_inc(1);
            execution_times.insert(
                site.name(index).to_string(),
                TaskExecution { start, duration },
            );

            if let Err(e) = output {
                let name = site.name(index).to_string();
                tracing::error!("task '{name}' failed");
                failure.get_or_insert(BuildError::Task(name, e));
                continue;
            }

            tracing::debug!("task '{}' finished in {:.2?}", site.name(index), duration);

            if failure.is_some() {
                continue;
            }

            if let Some(dependents_of_completed) = dependents.get(&index) {
                for dependent in dependents_of_completed {
                    if let Some(count) = dependency_counts.get_mut(dependent) {
                        *count -= 1;
                        if *count == 0 {
                            spawn_task(*dependent);
                            in_flight += 1;
                        }
                    }
                }
            }
        }
    });

    if let Some(e) = failure {
        return Err(e);
    }

    Ok(Diagnostics { execution_times })
}

/// Waits for the next message without parking a pool worker. Inside a pool
/// the spawned jobs may sit in this thread's own queue, so they are run here
/// until a result shows up.
fn next_result<T>(receiver: &Receiver<T>) -> Option<T> {
    loop {
        match receiver.try_recv() {
            Ok(message) => return Some(message),
            Err(TryRecvError::Disconnected) => return None,
            Err(TryRecvError::Empty) => {}
        }

        match rayon::yield_now() {
            Some(rayon::Yield::Executed) => {}
            Some(rayon::Yield::Idle) => match receiver.recv_timeout(Duration::from_millis(1)) {
                Ok(message) => return Some(message),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return None,
            },
            None => return receiver.recv().ok(),
        }
    }
}
