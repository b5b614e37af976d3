use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use minijinja::{AutoEscape, Environment, Value};
use thiserror::Error;

use crate::config::Config;
use crate::core::TaskContext;

/// Errors that can occur when rendering templates.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("IO error on '{0}': {1}")]
    Io(Utf8PathBuf, #[source] std::io::Error),

    #[error("Template '{0}': {1}")]
    Template(String, #[source] minijinja::Error),
}

impl TemplateError {
    fn template(name: &str, error: minijinja::Error) -> Self {
        tracing::debug!("{}", error.display_debug_info());
        Self::Template(name.to_string(), error)
    }
}

/// A template source file.
struct Source {
    /// Name under which the loader knows the template.
    name: String,
    /// Partials and layouts are only included by other templates.
    partial: bool,
    /// Path of the rendered page relative to the build directory.
    output: Utf8PathBuf,
}

fn discover(config: &Config) -> anyhow::Result<Vec<Source>> {
    let dir = config.templates_dir();
    let pattern = format!(
        "{}/**/*.{}",
        glob::Pattern::escape(dir.as_str()),
        config.templates.extension
    );

    let mut sources = Vec::new();
    for entry in glob::glob(&pattern)? {
        let path = Utf8PathBuf::try_from(entry?)?;
        if !path.is_file() {
            continue;
        }

        let relative = path.strip_prefix(&dir)?;
        sources.push(Source {
            name: template_name(relative),
            partial: relative.file_name().is_some_and(|n| n.starts_with('_')),
            output: relative.with_extension("html"),
        });
    }

    sources.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(sources)
}

fn template_name(relative: &Utf8Path) -> String {
    relative
        .components()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join("/")
}

fn environment(config: &Config) -> Environment<'static> {
    let mut env = Environment::new();
    env.set_loader(minijinja::path_loader(config.templates_dir()));
    env.set_auto_escape_callback(|_| AutoEscape::Html);
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    env.set_keep_trailing_newline(true);
    env
}

/// Parses every template, including partials, then renders every page in
/// memory without writing anything. Errors minijinja only raises while
/// rendering, such as an unknown filter or a missing parent template, fail
/// here before the build directory is cleaned.
pub fn check(ctx: &TaskContext) -> anyhow::Result<()> {
    let config = ctx.config();
    let env = environment(config);
    let sources = discover(config)?;

    for source in &sources {
        ctx.progress(Utf8Path::new(&source.name));
        env.get_template(&source.name)
            .map_err(|e| TemplateError::template(&source.name, e))?;
    }

    let pages = render_pages(ctx, &env, &sources)?;

    tracing::debug!("checked {} templates, {} pages", sources.len(), pages.len());
    Ok(())
}

/// Renders every page template into the build directory.
///
/// Pages are rendered in memory first and only written once all of them
/// succeeded, so a broken template leaves the previous output in place.
/// Pages whose template no longer exists are removed afterwards.
pub fn render(ctx: &TaskContext) -> anyhow::Result<()> {
    let config = ctx.config();
    let env = environment(config);
    let sources = discover(config)?;

    let pages = render_pages(ctx, &env, &sources)?;

    for (output, html) in &pages {
        let path = config.build(output);
        crate::io::write(&path, html).map_err(|e| TemplateError::Io(path.clone(), e))?;
    }

    let produced: HashSet<_> = pages.iter().map(|(output, _)| config.build(output)).collect();
    for path in stale_pages(config, &produced) {
        tracing::debug!("removing stale page {path}");
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(TemplateError::Io(path, e).into()),
        }
    }

    tracing::debug!("rendered {} pages", pages.len());
    Ok(())
}

/// Renders the non-partial `sources`, returning each page's path relative to
/// the build directory with its HTML.
fn render_pages(
    ctx: &TaskContext,
    env: &Environment<'_>,
    sources: &[Source],
) -> anyhow::Result<Vec<(Utf8PathBuf, String)>> {
    let config = ctx.config();

    let mut globals: BTreeMap<String, Value> = config
        .templates
        .data
        .iter()
        .map(|(key, value)| (key.clone(), Value::from_serialize(value)))
        .collect();
    // URLs, HTML escaping would mangle the slashes.
    globals.insert("base".into(), Value::from_safe_string(config.url_base().into()));
    globals.insert("livereload".into(), Value::from(ctx.env.get_refresh_script()));

    let mut pages = Vec::new();
    for source in sources.iter().filter(|s| !s.partial) {
        ctx.progress(Utf8Path::new(&source.name));

        globals.insert("page".into(), Value::from_safe_string(source.output.to_string()));

        let html = env
            .get_template(&source.name)
            .and_then(|template| template.render(&globals))
            .map_err(|e| TemplateError::template(&source.name, e))?;

        pages.push((source.output.clone(), html));
    }

    Ok(pages)
}

/// HTML files in the build directory that were not produced by this render.
/// Copied asset trees and the temp directory are left alone.
fn stale_pages(config: &Config, produced: &HashSet<Utf8PathBuf>) -> Vec<Utf8PathBuf> {
    let build = config.build_dir();
    let skip = [
        config.build(&config.assets.fonts_output),
        config.build(&config.assets.images_output),
        config.temp_dir(),
    ];

    let pattern = format!("{}/**/*.html", glob::Pattern::escape(build.as_str()));
    let Ok(entries) = glob::glob(&pattern) else {
        return Vec::new();
    };

    // Other tasks write into the build directory concurrently, entries that
    // vanish while walking are ignored.
    entries
        .flatten()
        .filter_map(|path| Utf8PathBuf::try_from(path).ok())
        .filter(|path| path.is_file())
        .filter(|path| !skip.iter().any(|dir| path.starts_with(dir)))
        .filter(|path| !produced.contains(path))
        .collect()
}
