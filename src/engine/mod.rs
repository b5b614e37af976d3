//! The task graph.
//!
//! Tasks are declared on a [`Blueprint`] by name, each with the names of the
//! tasks that must complete before it, an optional list of watch globs and
//! an action. [`Blueprint::finish`] resolves the names into a `petgraph`
//! graph, rejecting duplicates, dangling names and cycles, and returns a
//! [`Pipeline`] that can run any task together with its dependencies.
//!
//! Tasks never hand data to each other in memory: a task writes files, and
//! the tasks that depend on it read them.

mod runner;

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use camino::Utf8Path;
use glob::Pattern;
use petgraph::Graph;
use petgraph::graph::NodeIndex;
use petgraph::visit::{Dfs, Reversed};

use crate::core::{Environment, TaskContext};
use crate::error::{BuildError, GraphError};

#[cfg(feature = "server")]
pub use runner::http;
#[cfg(feature = "live")]
pub use runner::watch;
pub use runner::{Diagnostics, TaskExecution};

pub(crate) type TaskFn = dyn Fn(&TaskContext<'_>) -> anyhow::Result<()> + Send + Sync;

pub(crate) struct TaskNode {
    pub name: Cow<'static, str>,
    pub after: Vec<Cow<'static, str>>,
    /// Globs relative to the project root.
    pub watch: Vec<String>,
    /// Compiled `watch` globs, filled in by [`Blueprint::finish`].
    pub patterns: Vec<Pattern>,
    /// `None` for groups, which only order their dependencies.
    pub action: Option<Arc<TaskFn>>,
}

/// Declarative description of the task graph.
///
/// # Example
///
/// ```rust
/// use slidedeck::Blueprint;
///
/// let mut blueprint = Blueprint::new();
/// blueprint.task("hello").run(|_| Ok(()));
/// blueprint.task("default").after(["hello"]).group();
///
/// let pipeline = blueprint.finish().unwrap();
/// assert_eq!(pipeline.plan("default").unwrap(), ["hello", "default"]);
/// ```
#[derive(Default)]
pub struct Blueprint {
    tasks: Vec<TaskNode>,
}

impl Blueprint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts the declaration of a task.
    pub fn task(&mut self, name: impl Into<Cow<'static, str>>) -> TaskDef<'_> {
        TaskDef {
            blueprint: self,
            name: name.into(),
            after: Vec::new(),
            watch: Vec::new(),
        }
    }

    /// Resolves task names into graph edges.
    pub fn finish(self) -> Result<Pipeline, GraphError> {
        let mut graph = Graph::new();
        let mut names = HashMap::new();

        for mut task in self.tasks {
            let name = task.name.to_string();
            if names.contains_key(&name) {
                return Err(GraphError::Duplicate(name));
            }

            for glob in &task.watch {
                let pattern = Pattern::new(glob)
                    .map_err(|e| GraphError::Glob(name.clone(), format!("{glob}: {e}")))?;
                task.patterns.push(pattern);
            }

            let index = graph.add_node(task);
            names.insert(name, index);
        }

        for index in graph.node_indices() {
            let task = &graph[index];
            let mut edges = Vec::with_capacity(task.after.len());

            for dependency in &task.after {
                match names.get(dependency.as_ref()) {
                    Some(&source) => edges.push(source),
                    None => {
                        return Err(GraphError::UnknownDependency(
                            task.name.to_string(),
                            dependency.to_string(),
                        ));
                    }
                }
            }

            for source in edges {
                graph.add_edge(source, index, ());
            }
        }

        if let Err(cycle) = petgraph::algo::toposort(&graph, None) {
            return Err(GraphError::Cycle(graph[cycle.node_id()].name.to_string()));
        }

        Ok(Pipeline { graph, names })
    }
}

pub struct TaskDef<'a> {
    blueprint: &'a mut Blueprint,
    name: Cow<'static, str>,
    after: Vec<Cow<'static, str>>,
    watch: Vec<String>,
}

impl TaskDef<'_> {
    /// Names of the tasks which must complete before this one.
    pub fn after<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Cow<'static, str>>,
    {
        self.after.extend(names.into_iter().map(Into::into));
        self
    }

    /// Glob, relative to the project root, whose changes re-run this task in
    /// watch mode.
    pub fn watch(mut self, glob: impl Into<String>) -> Self {
        self.watch.push(glob.into());
        self
    }

    pub fn run<F>(self, action: F)
    where
        F: Fn(&TaskContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.push(Some(Arc::new(action)));
    }

    /// Declares a task without an action.
    pub fn group(self) {
        self.push(None);
    }

    fn push(self, action: Option<Arc<TaskFn>>) {
        self.blueprint.tasks.push(TaskNode {
            name: self.name,
            after: self.after,
            watch: self.watch,
            patterns: Vec::new(),
            action,
        });
    }
}

/// A validated task graph, ready to run.
pub struct Pipeline {
    pub(crate) graph: Graph<TaskNode, ()>,
    names: HashMap<String, NodeIndex>,
}

impl Pipeline {
    pub(crate) fn index(&self, name: &str) -> Result<NodeIndex, GraphError> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| GraphError::Unknown(name.to_string()))
    }

    /// The task and everything it transitively depends on.
    pub(crate) fn closure(&self, name: &str) -> Result<HashSet<NodeIndex>, GraphError> {
        let start = self.index(name)?;
        let graph = Reversed(&self.graph);

        let mut nodes = HashSet::new();
        let mut dfs = Dfs::new(graph, start);
        while let Some(index) = dfs.next(graph) {
            nodes.insert(index);
        }

        Ok(nodes)
    }

    /// The given tasks and everything that transitively depends on them.
    pub(crate) fn descendants(&self, start: &HashSet<NodeIndex>) -> HashSet<NodeIndex> {
        let mut nodes = HashSet::new();

        for &index in start {
            let mut dfs = Dfs::new(&self.graph, index);
            while let Some(index) = dfs.next(&self.graph) {
                nodes.insert(index);
            }
        }

        nodes
    }

    /// Tasks with a watch glob matching `path`, relative to the project root.
    pub(crate) fn matching(&self, path: &Utf8Path) -> HashSet<NodeIndex> {
        self.graph
            .node_indices()
            .filter(|&index| {
                self.graph[index]
                    .patterns
                    .iter()
                    .any(|pattern| pattern.matches_path(path.as_std_path()))
            })
            .collect()
    }

    /// Every watch glob declared in the graph.
    pub(crate) fn watched(&self) -> impl Iterator<Item = &str> {
        self.graph
            .node_weights()
            .flat_map(|task| task.watch.iter().map(String::as_str))
    }

    /// Names of the tasks `run(target)` would execute, in an order that
    /// respects every dependency.
    pub fn plan(&self, target: &str) -> Result<Vec<&str>, GraphError> {
        let closure = self.closure(target)?;
        Ok(self.order(&closure))
    }

    pub(crate) fn order(&self, nodes: &HashSet<NodeIndex>) -> Vec<&str> {
        // The graph was checked for cycles in `Blueprint::finish`.
        petgraph::algo::toposort(&self.graph, None)
            .unwrap_or_default()
            .into_iter()
            .filter(|index| nodes.contains(index))
            .map(|index| self.graph[index].name.as_ref())
            .collect()
    }

    /// Runs `target` and all of its dependencies, each exactly once.
    pub fn run(&self, env: &Environment, target: &str) -> Result<Diagnostics, BuildError> {
        let nodes = self.closure(target)?;
        tracing::debug!("plan for {target}: {:?}", self.order(&nodes));
        runner::run_tasks_parallel(self, env, &nodes)
    }

    /// Runs exactly the given tasks. Dependencies outside of the set are
    /// assumed to be satisfied already.
    pub(crate) fn run_subset(
        &self,
        env: &Environment,
        nodes: &HashSet<NodeIndex>,
    ) -> Result<Diagnostics, BuildError> {
        runner::run_tasks_parallel(self, env, nodes)
    }

    pub(crate) fn name(&self, index: NodeIndex) -> &str {
        &self.graph[index].name
    }
}

impl std::fmt::Display for Pipeline {
    /// Renders the graph as a Mermaid diagram.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "graph LR")?;

        for index in self.graph.node_indices() {
            let task = &self.graph[index];
            let name = task.name.replace('"', "\\\"");

            if task.action.is_some() {
                writeln!(f, "    {}[\"{}\"]", index.index(), name)?;
            } else {
                writeln!(f, "    {}([\"{}\"])", index.index(), name)?;
            }
        }

        for edge in self.graph.raw_edges() {
            writeln!(
                f,
                "    {} --> {}",
                edge.source().index(),
                edge.target().index()
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::config::Config;

    fn diamond() -> Blueprint {
        let mut blueprint = Blueprint::new();
        blueprint.task("clean").run(|_| Ok(()));
        blueprint.task("left").after(["clean"]).run(|_| Ok(()));
        blueprint.task("right").after(["clean"]).run(|_| Ok(()));
        blueprint.task("post").after(["left", "right"]).run(|_| Ok(()));
        blueprint.task("all").after(["post"]).group();
        blueprint.task("lonely").run(|_| Ok(()));
        blueprint
    }

    #[test]
    fn test_plan_respects_edges() {
        let pipeline = diamond().finish().unwrap();
        let plan = pipeline.plan("all").unwrap();

        assert_eq!(plan.len(), 5);
        assert!(!plan.contains(&"lonely"));

        let pos = |name| plan.iter().position(|n| *n == name).unwrap();
        assert!(pos("clean") < pos("left"));
        assert!(pos("clean") < pos("right"));
        assert!(pos("left") < pos("post"));
        assert!(pos("right") < pos("post"));
        assert!(pos("post") < pos("all"));
    }

    #[test]
    fn test_plan_of_leaf_is_itself() {
        let pipeline = diamond().finish().unwrap();
        assert_eq!(pipeline.plan("clean").unwrap(), ["clean"]);
    }

    #[test]
    fn test_unknown_target() {
        let pipeline = diamond().finish().unwrap();
        assert_eq!(
            pipeline.plan("nope").unwrap_err(),
            GraphError::Unknown("nope".into())
        );
    }

    #[test]
    fn test_duplicate_name() {
        let mut blueprint = diamond();
        blueprint.task("left").run(|_| Ok(()));

        assert_eq!(
            blueprint.finish().err(),
            Some(GraphError::Duplicate("left".into()))
        );
    }

    #[test]
    fn test_unknown_dependency() {
        let mut blueprint = Blueprint::new();
        blueprint.task("a").after(["b"]).run(|_| Ok(()));

        assert_eq!(
            blueprint.finish().err(),
            Some(GraphError::UnknownDependency("a".into(), "b".into()))
        );
    }

    #[test]
    fn test_cycle() {
        let mut blueprint = Blueprint::new();
        blueprint.task("a").after(["c"]).run(|_| Ok(()));
        blueprint.task("b").after(["a"]).run(|_| Ok(()));
        blueprint.task("c").after(["b"]).run(|_| Ok(()));

        assert!(matches!(blueprint.finish(), Err(GraphError::Cycle(_))));
    }

    #[test]
    fn test_descendants() {
        let pipeline = diamond().finish().unwrap();
        let start = HashSet::from([pipeline.index("left").unwrap()]);

        let mut names: Vec<_> = pipeline
            .descendants(&start)
            .into_iter()
            .map(|i| pipeline.name(i))
            .collect();
        names.sort();

        assert_eq!(names, ["all", "left", "post"]);
    }

    #[test]
    fn test_run_executes_each_task_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut blueprint = Blueprint::new();

        for (name, after) in [
            ("clean", vec![]),
            ("left", vec!["clean"]),
            ("right", vec!["clean"]),
            ("post", vec!["left", "right"]),
        ] {
            let log = log.clone();
            blueprint.task(name).after(after).run(move |ctx| {
                log.lock().unwrap().push(ctx.name.to_string());
                Ok(())
            });
        }

        let pipeline = blueprint.finish().unwrap();
        let env = Environment::build(Config::new("."));
        let diagnostics = pipeline.run(&env, "post").unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 4);
        assert_eq!(log.first().map(String::as_str), Some("clean"));
        assert_eq!(log.last().map(String::as_str), Some("post"));
        assert_eq!(diagnostics.execution_times.len(), 4);
    }

    #[test]
    fn test_run_on_single_thread_pool() {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(1)
            .build()
            .unwrap();
        let pipeline = diamond().finish().unwrap();
        let env = Environment::build(Config::new("."));

        let diagnostics = pool.install(|| pipeline.run(&env, "all")).unwrap();

        assert_eq!(diagnostics.execution_times.len(), 5);
    }

    #[test]
    fn test_failure_stops_dependents() {
        let ran = Arc::new(Mutex::new(false));
        let mut blueprint = Blueprint::new();
        blueprint
            .task("broken")
            .run(|_| Err(anyhow::anyhow!("malformed input")));
        {
            let ran = ran.clone();
            blueprint.task("after").after(["broken"]).run(move |_| {
                *ran.lock().unwrap() = true;
                Ok(())
            });
        }

        let pipeline = blueprint.finish().unwrap();
        let env = Environment::build(Config::new("."));
        let err = pipeline.run(&env, "after").unwrap_err();

        assert!(matches!(err, BuildError::Task(ref name, _) if name == "broken"));
        assert!(err.to_string().contains("malformed input"));
        assert!(!*ran.lock().unwrap());
    }

    #[test]
    fn test_panic_is_reported_as_failure() {
        let mut blueprint = Blueprint::new();
        blueprint.task("boom").run(|_| panic!("kaboom"));

        let pipeline = blueprint.finish().unwrap();
        let env = Environment::build(Config::new("."));
        let err = pipeline.run(&env, "boom").unwrap_err();

        assert!(err.to_string().contains("kaboom"));
    }

    #[test]
    fn test_invalid_watch_glob() {
        let mut blueprint = Blueprint::new();
        blueprint.task("a").watch("src/[").run(|_| Ok(()));

        assert!(matches!(blueprint.finish(), Err(GraphError::Glob(ref name, _)) if name == "a"));
    }

    #[test]
    fn test_matching_watch_globs() {
        let mut blueprint = Blueprint::new();
        blueprint.task("styles").watch("src/scss/**/*.scss").run(|_| Ok(()));
        blueprint.task("vendor").watch("src/vendor/zenburn.css").run(|_| Ok(()));
        blueprint.task("group").after(["styles", "vendor"]).group();

        let pipeline = blueprint.finish().unwrap();
        let names = |path: &str| {
            let mut names: Vec<_> = pipeline
                .matching(Utf8Path::new(path))
                .into_iter()
                .map(|i| pipeline.name(i))
                .collect();
            names.sort();
            names
        };

        assert_eq!(names("src/scss/partials/_base.scss"), ["styles"]);
        assert_eq!(names("src/vendor/zenburn.css"), ["vendor"]);
        assert!(names("src/views/index.jinja").is_empty());
        assert_eq!(pipeline.watched().count(), 2);
    }

    #[test]
    fn test_mermaid() {
        let pipeline = diamond().finish().unwrap();
        let text = pipeline.to_string();

        assert!(text.starts_with("graph LR\n"));
        assert!(text.contains("[\"clean\"]"));
        assert!(text.contains("([\"all\"])"));
        assert!(text.contains(" --> "));
    }
}
