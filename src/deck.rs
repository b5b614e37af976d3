//! The presentation build, expressed as a task graph.
//!
//! ```text
//! check:templates -> clean -> styles -> concat:css -> cssmin ----+
//!                          -> concat:js -> uglify ---------------+
//!                          -> templates -------------------------+-> clean:temp -> assemble -> default
//!                          -> copy:fonts, copy:assets -> copy ---+
//! ```
//!
//! Watch globs are only attached to the leaf transforms, so the watcher never
//! re-runs `clean` or the template preflight.

use camino::Utf8Path;

use crate::config::Config;
use crate::engine::{Blueprint, Pipeline};
use crate::error::GraphError;
use crate::loader::{assets, css, html, js};

/// Task built when none is named.
pub const DEFAULT_TASK: &str = "assemble";

/// Declares every task of the presentation build.
pub fn blueprint(config: &Config) -> Blueprint {
    let mut blueprint = Blueprint::new();

    blueprint.task("check:templates").run(html::check);

    blueprint
        .task("clean")
        .after(["check:templates"])
        .run(|ctx| {
            let build = ctx.config().build_dir();
            ctx.progress(&build);
            crate::io::remove_dir(&build)?;
            Ok(())
        });

    // styles
    let mut styles = blueprint
        .task("styles")
        .after(["clean"])
        .watch(config.rel_glob(&config.styles.dir, "**/*.scss"));
    for vendor in config.styles.prepend.values().flatten() {
        styles = styles.watch(source_file(config, vendor));
    }
    styles.run(css::compile);

    blueprint.task("concat:css").after(["styles"]).run(css::concat);
    blueprint.task("cssmin").after(["concat:css"]).run(css::minify);

    // scripts
    let mut scripts = blueprint.task("concat:js").after(["clean"]);
    for source in &config.scripts.sources {
        scripts = scripts.watch(source_file(config, source));
    }
    scripts.run(js::concat);

    blueprint.task("uglify").after(["concat:js"]).run(js::minify);

    // templates
    blueprint
        .task("templates")
        .after(["clean"])
        .watch(config.rel_glob(&config.templates.dir, "**/*"))
        .run(html::render);

    // assets
    let mut fonts = blueprint.task("copy:fonts").after(["clean"]);
    for dir in &config.assets.fonts {
        fonts = fonts.watch(config.rel_glob(dir, "**/*"));
    }
    fonts.run(assets::fonts);

    blueprint
        .task("copy:assets")
        .after(["clean"])
        .watch(config.rel_glob(&config.assets.images, "**/*"))
        .run(assets::images);

    blueprint
        .task("copy")
        .after(["copy:fonts", "copy:assets"])
        .group();

    blueprint
        .task("clean:temp")
        .after(["cssmin", "uglify", "templates", "copy"])
        .run(|ctx| {
            let temp = ctx.config().temp_dir();
            ctx.progress(&temp);
            crate::io::remove_dir(&temp)?;
            Ok(())
        });

    blueprint.task(DEFAULT_TASK).after(["clean:temp"]).group();
    blueprint.task("default").after([DEFAULT_TASK]).group();

    blueprint
}

/// The validated presentation task graph.
pub fn pipeline(config: &Config) -> Result<Pipeline, GraphError> {
    blueprint(config).finish()
}

fn source_file(config: &Config, path: &Utf8Path) -> String {
    config.paths.source.join(path).into_string()
}
