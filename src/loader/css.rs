use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use thiserror::Error;

use crate::core::TaskContext;

/// Errors that can occur when compiling Stylesheets.
#[derive(Debug, Error)]
pub enum StyleError {
    /// An I/O error occurred.
    #[error("IO error on '{0}': {1}")]
    Io(Utf8PathBuf, #[source] std::io::Error),

    /// A Sass compilation error occurred.
    #[error("Sass compilation error: {0}")]
    Sass(#[from] Box<grass::Error>),

    /// The stylesheet could not be parsed or printed for minification.
    #[error("Minification of '{0}' failed: {1}")]
    Minify(Utf8PathBuf, String),
}

fn read(path: &Utf8Path) -> Result<String, StyleError> {
    fs::read_to_string(path).map_err(|e| StyleError::Io(path.to_owned(), e))
}

fn write(path: &Utf8Path, data: &str) -> Result<(), StyleError> {
    crate::io::write(path, data).map_err(|e| StyleError::Io(path.to_owned(), e))
}

/// Compiles every entry stylesheet into the temp directory as `<stem>.css`.
pub fn compile(ctx: &TaskContext) -> anyhow::Result<()> {
    let config = ctx.config();
    let dir = config.styles_dir();
    let temp = config.temp_dir();

    for entry in &config.styles.entries {
        let path = dir.join(entry);
        ctx.progress(&path);

        if !path.is_file() {
            return Err(StyleError::Io(path, std::io::ErrorKind::NotFound.into()).into());
        }

        let opts = grass::Options::default().load_path(dir.as_std_path());
        let data = grass::from_path(&path, &opts).map_err(StyleError::Sass)?;

        let name = path.file_stem().unwrap_or("style");
        write(&temp.join(name).with_extension("css"), &data)?;

        tracing::debug!("compiled {path}");
    }

    Ok(())
}

/// Places the configured vendor stylesheets in front of compiled outputs.
pub fn concat(ctx: &TaskContext) -> anyhow::Result<()> {
    let config = ctx.config();
    let temp = config.temp_dir();

    for (name, vendors) in &config.styles.prepend {
        let target = temp.join(name);
        let mut parts = Vec::with_capacity(vendors.len() + 1);

        for vendor in vendors {
            let path = config.source(vendor);
            ctx.progress(&path);
            parts.push(read(&path)?);
        }

        parts.push(read(&target)?);
        write(&target, &parts.join("\n"))?;
    }

    Ok(())
}

/// Minifies every CSS file in the temp directory into the CSS output
/// directory.
pub fn minify(ctx: &TaskContext) -> anyhow::Result<()> {
    let config = ctx.config();
    let temp = config.temp_dir();
    let output = config.build(&config.styles.output);

    let pattern = format!("{}/*.css", glob::Pattern::escape(temp.as_str()));
    let mut files = Vec::new();
    for entry in glob::glob(&pattern)? {
        files.push(Utf8PathBuf::try_from(entry?)?);
    }
    files.sort();

    for path in files {
        ctx.progress(&path);

        let data = minify_css(&path, &read(&path)?)?;
        let name = path.file_name().unwrap_or("style.css");
        write(&output.join(name), &data)?;
    }

    Ok(())
}

pub(crate) fn minify_css(path: &Utf8Path, code: &str) -> Result<String, StyleError> {
    let options = ParserOptions {
        filename: path.to_string(),
        ..ParserOptions::default()
    };

    let mut sheet = StyleSheet::parse(code, options)
        .map_err(|e| StyleError::Minify(path.to_owned(), e.to_string()))?;

    sheet
        .minify(MinifyOptions::default())
        .map_err(|e| StyleError::Minify(path.to_owned(), e.to_string()))?;

    let result = sheet
        .to_css(PrinterOptions {
            minify: true,
            ..PrinterOptions::default()
        })
        .map_err(|e| StyleError::Minify(path.to_owned(), e.to_string()))?;

    Ok(result.code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minify_css() {
        let css = "body {\n  color: #ff0000;\n  margin: 0px;\n}\n\n/* note */\n";
        let out = minify_css(Utf8Path::new("a.css"), css).unwrap();

        assert_eq!(out, "body{color:red;margin:0}");
    }

    #[test]
    fn test_minify_is_stable() {
        let css = ".a { padding: 1px 2px 1px 2px } .b { color: rgb(0, 0, 255) }";
        let once = minify_css(Utf8Path::new("a.css"), css).unwrap();
        let twice = minify_css(Utf8Path::new("a.css"), &once).unwrap();

        assert_eq!(once, twice);
    }
}
