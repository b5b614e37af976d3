use camino::Utf8Path;

use crate::core::TaskContext;

/// Copies every configured font directory into the font output directory,
/// replacing whatever an earlier run left there.
pub fn fonts(ctx: &TaskContext) -> anyhow::Result<()> {
    let config = ctx.config();
    let target = config.build(&config.assets.fonts_output);
    clear_output(ctx, &target)?;

    for dir in &config.assets.fonts {
        copy_dir(ctx, &config.source(dir), &target)?;
    }

    Ok(())
}

/// Copies the image directory into the image output directory, replacing
/// whatever an earlier run left there.
pub fn images(ctx: &TaskContext) -> anyhow::Result<()> {
    let config = ctx.config();
    let source = config.source(&config.assets.images);
    let target = config.build(&config.assets.images_output);
    clear_output(ctx, &target)?;

    copy_dir(ctx, &source, &target)
}

/// Removes an output tree so files deleted from the source do not linger.
/// The build directory itself is never removed here.
fn clear_output(ctx: &TaskContext, target: &Utf8Path) -> anyhow::Result<()> {
    let build = ctx.config().build_dir();
    if target == build.as_path() || !target.starts_with(&build) {
        return Ok(());
    }

    crate::io::remove_dir(target)?;
    Ok(())
}

fn copy_dir(ctx: &TaskContext, source: &Utf8Path, target: &Utf8Path) -> anyhow::Result<()> {
    if !source.is_dir() {
        tracing::warn!("skipping missing directory {source}");
        return Ok(());
    }

    ctx.progress(source);
    let count = crate::io::copy_tree(source, target)?;
    tracing::debug!("copied {count} files from {source}");

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use camino::Utf8PathBuf;

    use super::*;
    use crate::config::Config;
    use crate::core::Environment;

    fn project() -> (tempfile::TempDir, Environment) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();

        let mut config = Config::new(&root);
        config.assets.fonts = vec!["fonts/a".into(), "fonts/b".into()];

        (dir, Environment::build(config))
    }

    fn context<'a>(env: &'a Environment, name: &'a str) -> TaskContext<'a> {
        TaskContext {
            env,
            name,
            span: tracing::Span::none(),
        }
    }

    #[test]
    fn test_fonts_merge_into_one_directory() {
        let (_dir, env) = project();
        let config = &env.config;
        crate::io::write(&config.source("fonts/a/league.woff"), [1u8, 2]).unwrap();
        crate::io::write(&config.source("fonts/b/awesome.ttf"), [3u8]).unwrap();

        fonts(&context(&env, "copy:fonts")).unwrap();

        let out = config.build(&config.assets.fonts_output);
        assert_eq!(fs::read(out.join("league.woff")).unwrap(), [1u8, 2]);
        assert_eq!(fs::read(out.join("awesome.ttf")).unwrap(), [3u8]);
    }

    #[test]
    fn test_missing_directories_are_skipped() {
        let (_dir, env) = project();

        fonts(&context(&env, "copy:fonts")).unwrap();
        images(&context(&env, "copy:assets")).unwrap();

        assert!(!env.config.build_dir().exists());
    }

    #[test]
    fn test_removed_sources_leave_no_copies() {
        let (_dir, env) = project();
        let config = &env.config;
        crate::io::write(&config.source("fonts/a/league.woff"), [1u8]).unwrap();
        crate::io::write(&config.source("fonts/b/old.ttf"), [2u8]).unwrap();
        crate::io::write(&config.source("assets/img/a.png"), [3u8]).unwrap();
        crate::io::write(&config.source("assets/img/b.png"), [4u8]).unwrap();

        fonts(&context(&env, "copy:fonts")).unwrap();
        images(&context(&env, "copy:assets")).unwrap();

        fs::remove_file(config.source("fonts/b/old.ttf")).unwrap();
        fs::remove_file(config.source("assets/img/b.png")).unwrap();

        fonts(&context(&env, "copy:fonts")).unwrap();
        images(&context(&env, "copy:assets")).unwrap();

        let fonts_out = config.build(&config.assets.fonts_output);
        assert!(fonts_out.join("league.woff").is_file());
        assert!(!fonts_out.join("old.ttf").exists());
        assert!(config.build("assets/img/a.png").is_file());
        assert!(!config.build("assets/img/b.png").exists());
    }

    #[test]
    fn test_output_at_build_root_is_not_cleared() {
        let (_dir, mut env) = project();
        env.config.assets.images_output = "".into();
        crate::io::write(&env.config.build("index.html"), "<h1>deck</h1>").unwrap();

        images(&context(&env, "copy:assets")).unwrap();

        assert!(env.config.build("index.html").is_file());
    }

    #[test]
    fn test_images_keep_nested_paths() {
        let (_dir, env) = project();
        let config = &env.config;
        crate::io::write(&config.source("assets/img/speakers/ann.png"), [0u8; 4]).unwrap();

        images(&context(&env, "copy:assets")).unwrap();

        let out = config.build("assets/img/speakers/ann.png");
        assert_eq!(fs::read(out).unwrap(), [0u8; 4]);
    }
}
