use std::path::PathBuf;

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use slidedeck::deck::DEFAULT_TASK;
use slidedeck::{Config, ConfigError, Deck};

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Project root containing the `src` directory.
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Configuration file, defaults to `Slidedeck.toml` in the project root.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Run a task and its dependencies.
    Build {
        #[arg(default_value = DEFAULT_TASK)]
        task: String,
    },
    /// Serve the build directory.
    #[cfg(feature = "server")]
    Serve,
    /// Build, serve and rebuild on change with live-reload.
    #[cfg(feature = "live")]
    Watch,
    /// Build, then split the build directory into the publishing branch.
    Publish,
    /// Print the task graph as a Mermaid diagram.
    Graph,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    #[cfg(feature = "logging")]
    slidedeck::init_logging()?;

    let root = Utf8PathBuf::try_from(args.root)
        .map_err(|e| ConfigError::Root(e.into_path_buf().display().to_string()))?;

    let config = match args.config {
        Some(path) => {
            let path = Utf8PathBuf::try_from(path)
                .map_err(|e| ConfigError::Root(e.into_path_buf().display().to_string()))?;
            Config::load_file(root, path)?
        }
        None => Config::load(root)?,
    };

    let deck = Deck::new(config)?;

    match args.command.unwrap_or(Command::Build {
        task: DEFAULT_TASK.into(),
    }) {
        Command::Build { task } => {
            deck.build(&task)?;
        }
        #[cfg(feature = "server")]
        Command::Serve => deck.serve()?,
        #[cfg(feature = "live")]
        Command::Watch => deck.watch(DEFAULT_TASK)?,
        Command::Publish => deck.publish()?,
        Command::Graph => print!("{}", deck.pipeline()),
    }

    Ok(())
}
