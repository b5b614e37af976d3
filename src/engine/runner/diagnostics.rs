use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct TaskExecution {
    pub start: Instant,
    pub duration: Duration,
}

/// Execution metrics of a single run, keyed by task name.
#[derive(Debug, Default)]
pub struct Diagnostics {
    pub execution_times: HashMap<String, TaskExecution>,
}

impl Diagnostics {
    /// Sum of the durations of every executed task.
    pub fn busy(&self) -> Duration {
        self.execution_times.values().map(|t| t.duration).sum()
    }
}

impl Display for Diagnostics {
    /// One line per task, in the order the tasks were started.
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut rows: Vec<_> = self.execution_times.iter().collect();
        rows.sort_by(|a, b| (a.1.start, a.0).cmp(&(b.1.start, b.0)));

        let width = rows.iter().map(|(name, _)| name.len()).max().unwrap_or(0);

        for (name, exec) in rows {
            writeln!(f, "{name:<width$}  {:.2?}", exec.duration)?;
        }

        Ok(())
    }
}
