use std::fs;
use std::io::Write;
use std::process::{Command, Stdio};
use std::thread;

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::core::TaskContext;

/// Name of the concatenated bundle inside the temp directory.
const BUNDLE: &str = "app.js";

/// Errors that can occur when bundling JavaScript files.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// A bundle member could not be read or the bundle could not be written.
    #[error("IO error on '{0}': {1}")]
    Io(Utf8PathBuf, #[source] std::io::Error),

    /// The minifier process could not be started.
    #[error("Couldn't run minifier `{0}`: {1}")]
    Spawn(String, #[source] std::io::Error),

    /// The minifier returned a non-zero exit code.
    #[error("Minifier `{0}` failed with {1}:\n{2}")]
    Minifier(String, std::process::ExitStatus, String),
}

/// Concatenates the configured scripts, in order, into the temp directory.
pub fn concat(ctx: &TaskContext) -> anyhow::Result<()> {
    let config = ctx.config();
    let mut parts = Vec::with_capacity(config.scripts.sources.len());

    for source in &config.scripts.sources {
        let path = config.source(source);
        ctx.progress(&path);

        let data = fs::read_to_string(&path).map_err(|e| ScriptError::Io(path.clone(), e))?;
        parts.push(data);
    }

    let target = config.temp_dir().join(BUNDLE);
    crate::io::write(&target, parts.join("\n")).map_err(|e| ScriptError::Io(target, e))?;

    Ok(())
}

/// Minifies the bundle from the temp directory into the script output path.
pub fn minify(ctx: &TaskContext) -> anyhow::Result<()> {
    let config = ctx.config();
    let source = config.temp_dir().join(BUNDLE);
    let target = config.build(&config.scripts.output);
    ctx.progress(&source);

    let data = fs::read(&source).map_err(|e| ScriptError::Io(source.clone(), e))?;
    let data = run_minifier(&config.scripts.minifier, data)?;

    crate::io::write(&target, data).map_err(|e| ScriptError::Io(target, e))?;

    Ok(())
}

/// Pipes `input` through `command`. An empty command returns the input.
pub(crate) fn run_minifier(command: &[String], input: Vec<u8>) -> Result<Vec<u8>, ScriptError> {
    let Some((program, args)) = command.split_first() else {
        return Ok(input);
    };

    let display = command.join(" ");

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| ScriptError::Spawn(display.clone(), e))?;

    // stdin is fed from a separate thread while stdout is drained here.
    let stdin = child.stdin.take();
    let writer = thread::spawn(move || -> std::io::Result<()> {
        if let Some(mut stdin) = stdin {
            stdin.write_all(&input)?;
        }
        Ok(())
    });

    let output = child
        .wait_with_output()
        .map_err(|e| ScriptError::Spawn(display.clone(), e))?;

    if !output.status.success() {
        return Err(ScriptError::Minifier(
            display,
            output.status,
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ));
    }

    match writer.join() {
        Ok(Ok(())) => Ok(output.stdout),
        Ok(Err(e)) => Err(ScriptError::Spawn(display, e)),
        Err(_) => Err(ScriptError::Spawn(
            display,
            std::io::Error::other("stdin writer panicked"),
        )),
    }
}
