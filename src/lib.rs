#![forbid(unsafe_code)]
//! Build pipeline for a slide-deck presentation.
//!
//! The build is a graph of named tasks ([`Blueprint`], [`Pipeline`]) wired up
//! in [`deck`]: templates are rendered with `minijinja`, stylesheets are
//! compiled with `grass` and minified with `lightningcss`, scripts are bundled
//! and piped through an external minifier, and fonts and images are copied
//! verbatim. [`Deck`] adds the one-shot build, the watch loop with
//! live-reload, the dev server and publishing on top.

pub mod config;
mod core;
pub mod deck;
mod engine;
mod error;
mod io;
pub mod loader;
mod publish;
mod utils;

use std::time::Instant;

use console::style;

pub use crate::config::{CONFIG_FILE, Config};
pub use crate::core::{Environment, Hash32, Mode, TaskContext};
pub use crate::engine::{Blueprint, Diagnostics, Pipeline, TaskDef, TaskExecution};
pub use crate::error::*;
pub use crate::io::fingerprint_tree;
#[cfg(feature = "logging")]
pub use crate::utils::init_logging;

/// A presentation project: its configuration and the task graph built from
/// it.
pub struct Deck {
    config: Config,
    pipeline: Pipeline,
}

impl Deck {
    pub fn new(config: Config) -> Result<Self, SlidedeckError> {
        let config = config.validate()?;
        let pipeline = deck::pipeline(&config)?;
        Ok(Self { config, pipeline })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Runs `target` and everything it depends on once.
    pub fn build(&self, target: &str) -> Result<Diagnostics, SlidedeckError> {
        eprintln!(
            "Running {} in {} mode.",
            style("slidedeck").red(),
            style("build").blue()
        );

        let start = Instant::now();
        let env = Environment::build(self.config.clone());
        let diagnostics = self.pipeline.run(&env, target)?;

        tracing::info!("built {target} {}", crate::io::as_overhead(start));
        tracing::debug!("task timings:\n{diagnostics}");

        Ok(diagnostics)
    }

    /// Builds `target`, then serves the build directory and rebuilds on
    /// change with live-reload. Only returns on error.
    #[cfg(feature = "live")]
    pub fn watch(&self, target: &str) -> Result<(), SlidedeckError> {
        eprintln!(
            "Running {} in {} mode.",
            style("slidedeck").red(),
            style("watch").blue()
        );

        engine::watch::watch(&self.pipeline, self.config.clone(), target)?;
        Ok(())
    }

    /// Serves the current build directory without building.
    #[cfg(feature = "server")]
    pub fn serve(&self) -> Result<(), SlidedeckError> {
        engine::http::serve_blocking(&self.config)?;
        Ok(())
    }

    /// Builds the default task, then splits the build directory into the
    /// publishing branch.
    pub fn publish(&self) -> Result<(), SlidedeckError> {
        self.build(deck::DEFAULT_TASK)?;
        publish::publish(&self.config)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_target() {
        let deck = Deck::new(Config::new("/deck")).unwrap();
        let err = deck.build("slides").unwrap_err();

        assert!(matches!(
            err,
            SlidedeckError::Build(BuildError::Graph(GraphError::Unknown(ref name))) if name == "slides"
        ));
    }

    #[test]
    fn test_invalid_base_is_rejected() {
        let mut config = Config::new("/deck");
        config.server.base = "/{deck}".into();

        let err = Deck::new(config).err().unwrap();
        assert!(matches!(err, SlidedeckError::Config(ConfigError::Base(..))));
    }
}
