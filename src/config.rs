//! Project configuration.
//!
//! Every field has a default that reproduces the stock presentation layout, so
//! a project without a `Slidedeck.toml` builds out of the box. Paths in the
//! `templates`, `styles`, `scripts` and `assets` sections are relative to
//! `paths.source` (inputs) or `paths.build` (outputs); `paths` itself is
//! relative to the project root.

use std::collections::BTreeMap;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use crate::error::ConfigError;

/// Name of the configuration file looked up in the project root.
pub const CONFIG_FILE: &str = "Slidedeck.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Project root, every other path is resolved against it.
    #[serde(skip)]
    pub root: Utf8PathBuf,
    pub paths: Paths,
    pub templates: Templates,
    pub styles: Styles,
    pub scripts: Scripts,
    pub assets: Assets,
    pub server: Server,
    pub live: Live,
    pub publish: Publish,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Paths {
    pub source: Utf8PathBuf,
    pub build: Utf8PathBuf,
    /// Scratch space for intermediate files, removed after every build.
    pub temp: Utf8PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            source: "src".into(),
            build: "dist".into(),
            temp: "dist/temp".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Templates {
    pub dir: Utf8PathBuf,
    /// File extension of template sources, without the dot.
    pub extension: String,
    /// Extra variables available in every template.
    pub data: toml::Table,
}

impl Default for Templates {
    fn default() -> Self {
        let mut data = toml::Table::new();
        data.insert("debug".into(), toml::Value::Boolean(true));

        Self {
            dir: "views".into(),
            extension: "jinja".into(),
            data,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Styles {
    pub dir: Utf8PathBuf,
    /// Entry stylesheets relative to `dir`, each compiles to `<stem>.css`.
    pub entries: Vec<Utf8PathBuf>,
    pub output: Utf8PathBuf,
    /// Vendor stylesheets placed in front of a compiled output, keyed by the
    /// output file name.
    pub prepend: BTreeMap<String, Vec<Utf8PathBuf>>,
}

impl Default for Styles {
    fn default() -> Self {
        Self {
            dir: "assets/scss".into(),
            entries: vec!["style.scss".into(), "pdf.scss".into()],
            output: "assets/css".into(),
            prepend: BTreeMap::from([(
                "style.css".into(),
                vec!["assets/js/components/highlight.js/styles/zenburn.css".into()],
            )]),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Scripts {
    /// Bundle members, in bundle order.
    pub sources: Vec<Utf8PathBuf>,
    pub output: Utf8PathBuf,
    /// Command reading JavaScript on stdin and writing the minified result to
    /// stdout. An empty command leaves the bundle as is.
    pub minifier: Vec<String>,
}

impl Default for Scripts {
    fn default() -> Self {
        Self {
            sources: vec![
                // reveal.js
                "assets/js/components/headjs/dist/head.js".into(),
                "assets/js/components/reveal.js/js/reveal.js".into(),
                "assets/js/components/reveal.js/lib/js/classList.js".into(),
                // reveal.js plugins
                "assets/js/components/reveal.js/plugin/markdown/marked.js".into(),
                "assets/js/components/reveal.js/plugin/markdown/markdown.js".into(),
                "assets/js/components/highlight.js/highlight.pack.js".into(),
                "assets/js/components/reveal.js/plugin/zoom-js/zoom.js".into(),
                // presentation init
                "js/reveal.init.js".into(),
            ],
            output: "assets/js/app.js".into(),
            minifier: ["esbuild", "--minify", "--loader=js", "--log-level=warning"]
                .map(String::from)
                .to_vec(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Assets {
    pub fonts: Vec<Utf8PathBuf>,
    pub fonts_output: Utf8PathBuf,
    pub images: Utf8PathBuf,
    pub images_output: Utf8PathBuf,
}

impl Default for Assets {
    fn default() -> Self {
        Self {
            fonts: vec![
                "assets/js/components/reveal.js/lib/font".into(),
                "assets/js/components/font-awesome/fonts".into(),
            ],
            fonts_output: "assets/font".into(),
            images: "assets/img".into(),
            images_output: "assets/img".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Server {
    pub host: String,
    pub port: u16,
    /// URL prefix the build directory is mounted under; `/` redirects here.
    pub base: String,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8001,
            base: "/react-workshop".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Live {
    pub port: u16,
}

impl Default for Live {
    fn default() -> Self {
        Self { port: 35729 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Publish {
    pub branch: String,
}

impl Default for Publish {
    fn default() -> Self {
        Self {
            branch: "gh-pages".into(),
        }
    }
}

impl Config {
    /// Defaults rooted at `root`.
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Loads `Slidedeck.toml` from `root`, falling back to defaults when the
    /// file does not exist.
    pub fn load(root: impl Into<Utf8PathBuf>) -> Result<Self, ConfigError> {
        let root = root.into();
        let path = root.join(CONFIG_FILE);

        if !path.exists() {
            tracing::debug!("no {CONFIG_FILE} in {root}, using defaults");
            return Ok(Self::new(root));
        }

        Self::load_file(root, path)
    }

    /// Loads the configuration from an explicit file.
    pub fn load_file(
        root: impl Into<Utf8PathBuf>,
        path: impl AsRef<Utf8Path>,
    ) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_owned(), e))?;

        let mut config = Self::parse(&text).map_err(|e| ConfigError::Parse(path.to_owned(), e))?;
        config.root = root.into();

        config.validate()
    }

    /// Checks the values serde can't, bringing `server.base` to the form
    /// `/a/b`, or `/` for the site root.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        let base = &self.server.base;
        if let Some(c) = base.chars().find(|c| matches!(c, '{' | '}' | '*' | '?' | '#')) {
            return Err(ConfigError::Base(base.clone(), c));
        }

        let segments: Vec<_> = base.split('/').filter(|s| !s.is_empty()).collect();
        self.server.base = format!("/{}", segments.join("/"));

        Ok(self)
    }

    fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn source_dir(&self) -> Utf8PathBuf {
        self.root.join(&self.paths.source)
    }

    pub fn build_dir(&self) -> Utf8PathBuf {
        self.root.join(&self.paths.build)
    }

    pub fn temp_dir(&self) -> Utf8PathBuf {
        self.root.join(&self.paths.temp)
    }

    /// Resolves a path relative to the source root.
    pub fn source(&self, path: impl AsRef<Utf8Path>) -> Utf8PathBuf {
        self.source_dir().join(path)
    }

    /// Resolves a path relative to the build root.
    pub fn build(&self, path: impl AsRef<Utf8Path>) -> Utf8PathBuf {
        self.build_dir().join(path)
    }

    pub fn templates_dir(&self) -> Utf8PathBuf {
        self.source(&self.templates.dir)
    }

    pub fn styles_dir(&self) -> Utf8PathBuf {
        self.source(&self.styles.dir)
    }

    /// Prefix for links in templates, empty when serving from the site root.
    pub fn url_base(&self) -> &str {
        self.server.base.trim_end_matches('/')
    }

    /// Glob relative to the project root, as used for watch patterns.
    pub(crate) fn rel_glob(&self, dir: impl AsRef<Utf8Path>, suffix: &str) -> String {
        self.paths.source.join(dir).join(suffix).into_string()
    }
}
