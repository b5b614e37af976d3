use std::collections::BTreeMap;
use std::fmt::Display;
use std::fs;
use std::io;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use console::Style;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

use crate::core::Hash32;

const ANSI_BLUE: Style = Style::new().blue();

pub fn as_overhead(s: Instant) -> impl Display {
    let e = Instant::now();
    let f = format!("(+{}ms)", e.duration_since(s).as_millis());
    ANSI_BLUE.apply_to(f)
}

/// Delete a directory tree if it exists.
pub fn remove_dir(path: &Utf8Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Write a file, creating its parent directories.
pub fn write(path: &Utf8Path, data: impl AsRef<[u8]>) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    fs::write(path, data)
}

/// Lists every regular file below `root`, sorted, as paths relative to `root`.
pub fn list_files(root: &Utf8Path) -> anyhow::Result<Vec<Utf8PathBuf>> {
    let pattern = format!("{}/**/*", glob::Pattern::escape(root.as_str()));

    let mut files = Vec::new();
    for entry in glob::glob(&pattern)? {
        let path = Utf8PathBuf::try_from(entry?)?;
        if path.is_file() {
            files.push(path.strip_prefix(root)?.to_path_buf());
        }
    }

    files.sort();
    Ok(files)
}

/// Copy every file below `src` into `dst`, keeping relative paths. Returns the
/// number of copied files.
pub fn copy_tree(src: &Utf8Path, dst: &Utf8Path) -> anyhow::Result<usize> {
    let files = list_files(src)?;

    files.par_iter().try_for_each(|file| -> io::Result<()> {
        let target = dst.join(file);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::copy(src.join(file), target)?;
        Ok(())
    })?;

    Ok(files.len())
}

/// Content fingerprint of every file below `root`, keyed by relative path.
pub fn fingerprint_tree(root: &Utf8Path) -> anyhow::Result<BTreeMap<Utf8PathBuf, Hash32>> {
    let files = list_files(root)?;

    files
        .par_iter()
        .map(|file| -> anyhow::Result<_> {
            Ok((file.clone(), Hash32::hash(fs::read(root.join(file))?)))
        })
        .collect()
}
