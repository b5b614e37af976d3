#[cfg(feature = "live")]
use std::sync::mpsc::RecvError;

use camino::Utf8PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SlidedeckError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Error while assembling the task graph:\n{0}")]
    Graph(#[from] GraphError),

    #[error("Error while building the slide deck.\n{0}")]
    Build(#[from] BuildError),

    #[error("Error while publishing:\n{0}")]
    Publish(#[from] PublishError),

    #[cfg(feature = "live")]
    #[error("Error while watching for file changes:\n{0}")]
    Watch(#[from] WatchError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Couldn't read config file '{0}'.\n{1}")]
    Read(Utf8PathBuf, #[source] std::io::Error),

    #[error("Couldn't parse config file '{0}'.\n{1}")]
    Parse(Utf8PathBuf, #[source] toml::de::Error),

    #[error("Path '{0}' is not valid UTF-8.")]
    Root(String),

    #[error("Server base '{0}' can't contain '{1}'.")]
    Base(String, char),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("Task '{0}' is defined more than once")]
    Duplicate(String),

    #[error("Task '{0}' is not defined")]
    Unknown(String),

    #[error("Task '{0}' depends on undefined task '{1}'")]
    UnknownDependency(String, String),

    #[error("Cycle detected in task graph at '{0}'")]
    Cycle(String),

    #[error("Task '{0}' has an invalid watch glob {1}")]
    Glob(String, String),
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("Task '{0}':\n{1:#}")]
    Task(String, anyhow::Error),
}

/// Errors raised by the publisher.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Couldn't run git.\n{0}")]
    Io(#[from] std::io::Error),

    #[error("Build directory '{0}' does not exist, run the build first")]
    MissingBuild(Utf8PathBuf),

    #[error("Build directory '{0}' is outside of the git repository '{1}'")]
    OutsideRepository(Utf8PathBuf, Utf8PathBuf),

    #[error("`git {0}` exited with {1}:\n{2}")]
    Git(String, std::process::ExitStatus, String),
}

#[cfg(feature = "live")]
#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Notify(#[from] notify::Error),

    #[error(transparent)]
    Recv(#[from] RecvError),
}
