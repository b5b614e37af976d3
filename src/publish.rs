//! Publishing the build directory to a hosting branch with `git subtree`.

use std::process::{Command, Stdio};

use camino::{Utf8Path, Utf8PathBuf};
use console::style;

use crate::config::Config;
use crate::error::PublishError;

/// Splits the history of the build directory into `publish.branch`.
///
/// The build directory has to be tracked by the repository containing the
/// project root; git's own output is forwarded to the terminal.
pub fn publish(config: &Config) -> Result<(), PublishError> {
    let build = config.build_dir();
    if !build.is_dir() {
        return Err(PublishError::MissingBuild(build));
    }

    let toplevel = git_output(&config.root, &["rev-parse", "--show-toplevel"])?;
    let toplevel = Utf8PathBuf::from(toplevel.trim()).canonicalize_utf8()?;
    let prefix = subtree_prefix(&build.canonicalize_utf8()?, &toplevel)?;

    tracing::info!(
        "publishing {} to branch {}",
        prefix,
        style(&config.publish.branch).yellow()
    );

    let args = [
        "subtree",
        "split",
        "--branch",
        config.publish.branch.as_str(),
        "--prefix",
        prefix.as_str(),
    ];

    let status = Command::new("git")
        .args(args)
        .current_dir(&toplevel)
        .stdin(Stdio::null())
        .status()?;

    if !status.success() {
        return Err(PublishError::Git(args.join(" "), status, String::new()));
    }

    Ok(())
}

/// Runs git in `dir` and returns its stdout.
fn git_output(dir: &Utf8Path, args: &[&str]) -> Result<String, PublishError> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .output()?;

    if !output.status.success() {
        return Err(PublishError::Git(
            args.join(" "),
            output.status,
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Path of `build` relative to the repository root, with `/` separators as
/// git expects them.
fn subtree_prefix(build: &Utf8Path, toplevel: &Utf8Path) -> Result<String, PublishError> {
    let relative = build
        .strip_prefix(toplevel)
        .map_err(|_| PublishError::OutsideRepository(build.to_owned(), toplevel.to_owned()))?;

    if relative.as_str().is_empty() {
        return Err(PublishError::OutsideRepository(
            build.to_owned(),
            toplevel.to_owned(),
        ));
    }

    Ok(relative
        .components()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join("/"))
}
