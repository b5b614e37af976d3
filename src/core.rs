use camino::Utf8Path;

use crate::config::Config;

/// A 32-byte BLAKE3 hash used as a content fingerprint.
///
/// The watcher uses it to ignore file events that did not change any bytes,
/// and [`fingerprint_tree`](crate::io::fingerprint_tree) uses it to compare
/// whole output trees.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Hash32([u8; 32]);

impl<T> From<T> for Hash32
where
    T: Into<[u8; 32]>,
{
    fn from(value: T) -> Self {
        Hash32(value.into())
    }
}

impl Hash32 {
    pub fn hash(buffer: impl AsRef<[u8]>) -> Self {
        blake3::Hasher::new()
            .update(buffer.as_ref())
            .finalize()
            .into()
    }

    pub fn hash_file(path: impl AsRef<std::path::Path>) -> std::io::Result<Self> {
        Ok(blake3::Hasher::new().update_mmap(path)?.finalize().into())
    }

    pub fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = String::with_capacity(64);

        for byte in self.0 {
            acc.push(HEX[(byte >> 4) as usize] as char);
            acc.push(HEX[(byte & 0xF) as usize] as char);
        }

        acc
    }
}

impl std::fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

/// The mode in which the pipeline is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// A one-time build.
    Build,
    /// A continuous watch mode for development.
    Watch,
}

/// State shared by every task of a run.
#[derive(Debug, Clone)]
pub struct Environment {
    /// The current mode (Build or Watch).
    pub mode: Mode,
    /// Port of the live-reload socket, only set in watch mode.
    pub port: Option<u16>,
    /// Project configuration.
    pub config: Config,
}

impl Environment {
    pub fn build(config: Config) -> Self {
        Self {
            mode: Mode::Build,
            port: None,
            config,
        }
    }

    pub fn watch(config: Config, port: u16) -> Self {
        Self {
            mode: Mode::Watch,
            port: Some(port),
            config,
        }
    }

    /// Returns a JavaScript snippet which reloads the page when the watcher
    /// finishes a rebuild, or `None` outside of watch mode.
    pub fn get_refresh_script(&self) -> Option<String> {
        self.port.map(|port| {
            format!(
                r#"
const socket = new WebSocket("ws://localhost:{port}");
socket.addEventListener("message", event => {{
    window.location.reload();
}});
"#
            )
        })
    }
}

/// The context passed to every task action.
pub struct TaskContext<'a> {
    pub env: &'a Environment,
    /// Name of the running task.
    pub name: &'a str,
    /// Tracing span assigned to this task.
    pub span: tracing::Span,
}

impl TaskContext<'_> {
    pub fn config(&self) -> &Config {
        &self.env.config
    }

    /// Sets the progress message shown next to this task.
    pub(crate) fn progress(&self, path: &Utf8Path) {
        use tracing_indicatif::span_ext::IndicatifSpanExt;
        self.span.pb_set_message(&format!("{}: {path}", self.name));
    }
}
