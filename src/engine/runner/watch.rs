//! Watch mode is implemented as a three-part system:
//!
//! 1. **File watcher**: Uses the `notify` crate to monitor the static roots
//!    of every task's watch globs, with debouncing to collapse the bursts of
//!    events a single save produces.
//! 2. **WebSocket server**: Spawns a dedicated thread using `tungstenite`
//!    to keep connections with open browser tabs.
//! 3. **Client script**: The [`Environment`] hands a short JavaScript
//!    snippet to the templates as `livereload`. It connects to the WebSocket
//!    server and reloads the page on any message.
//!
//! ## The Loop
//!
//! When a batch of file events arrives:
//! 1. Paths whose content hash did not change are dropped.
//! 2. Tasks whose watch globs match the remaining paths are dirty; they and
//!    all of their dependents are re-run.
//! 3. After a successful rebuild every connected client receives `"reload"`.
//!    A failed rebuild is logged and its tasks are carried over into the next
//!    rebuild, since some of them may never have run.

use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use console::style;
use notify::RecursiveMode;
use notify_debouncer_full::new_debouncer;
use petgraph::graph::NodeIndex;
use tungstenite::WebSocket;

use crate::config::Config;
use crate::core::{Environment, Hash32};
use crate::engine::Pipeline;
use crate::error::{BuildError, WatchError};
use crate::io::as_overhead;

type Clients = Arc<Mutex<Vec<WebSocket<TcpStream>>>>;

/// Builds `target`, then keeps rebuilding on change until the process is
/// killed.
pub fn watch(pipeline: &Pipeline, config: Config, target: &str) -> Result<(), WatchError> {
    let (tcp, port) = reserve_port(config.live.port)?;
    let env = Environment::watch(config, port);
    let root = env.config.root.canonicalize_utf8()?;

    tracing::info!("running initial build...");
    let start = Instant::now();
    let initial = pipeline.run(&env, target);
    match &initial {
        Ok(_) => tracing::info!("initial build completed {}", as_overhead(start)),
        Err(e) => tracing::error!("initial build failed: {e}"),
    }

    let clients = Arc::new(Mutex::new(vec![]));
    let _thread_i = new_thread_ws_incoming(tcp, clients.clone());
    let (tx_reload, _thread_o) = new_thread_ws_reload(clients);
    tracing::info!("live-reload listening on port {}", style(port).yellow());

    let (tx, rx) = std::sync::mpsc::channel();
    let mut debouncer = new_debouncer(Duration::from_millis(250), None, tx)?;

    let mut watched = HashSet::new();
    for glob in pipeline.watched() {
        match resolve_watch_path(&root, glob) {
            Ok(path) => {
                watched.insert(path);
            }
            Err(e) => tracing::warn!("not watching {glob}: {e}"),
        }
    }

    let mut changes = Changes::new(&root, pipeline);
    if initial.is_err() {
        // The whole target reruns with the first change.
        changes.failed(pipeline.closure(target).map_err(BuildError::from)?);
    }

    for path in collapse_watch_paths(watched) {
        tracing::info!("watching {}", path);
        debouncer.watch(path.as_std_path(), RecursiveMode::Recursive)?;
    }

    #[cfg(feature = "server")]
    let _thread_http = super::http::start(&env.config);

    loop {
        let events = match rx.recv()? {
            Ok(events) => events,
            Err(errors) => {
                for e in errors {
                    tracing::error!("watch error: {e}");
                }
                continue;
            }
        };

        let paths = events
            .iter()
            .flat_map(|event| &event.event.paths)
            .filter_map(|path| Utf8Path::from_path(path));

        let dirty_nodes = changes.dirty(pipeline, paths);
        if dirty_nodes.is_empty() {
            continue;
        }

        let to_rerun = pipeline.descendants(&dirty_nodes);
        tracing::info!(
            "change detected, re-running {}",
            pipeline.order(&to_rerun).join(", ")
        );

        let start = Instant::now();
        match pipeline.run_subset(&env, &to_rerun) {
            Ok(_) => {
                tracing::info!("rebuild complete {}", as_overhead(start));
                changes.rebuilt();
                // The reload thread only exits when this sender is dropped.
                let _ = tx_reload.send(());
            }
            Err(e) => {
                tracing::error!("rebuild failed: {e}");
                changes.failed(to_rerun);
            }
        }
    }
}

/// Tracks what the watched files contained at the last look, and which tasks
/// still owe a rerun after a failed rebuild.
struct Changes {
    root: Utf8PathBuf,
    hashes: HashMap<Utf8PathBuf, Hash32>,
    pending: HashSet<NodeIndex>,
}

impl Changes {
    fn new(root: &Utf8Path, pipeline: &Pipeline) -> Self {
        Self {
            root: root.to_owned(),
            hashes: snapshot(root, pipeline.watched()),
            pending: HashSet::new(),
        }
    }

    /// Tasks whose watched files changed content among `paths`, together with
    /// the tasks left over from a failed rebuild. Empty when nothing changed.
    fn dirty<'a>(
        &mut self,
        pipeline: &Pipeline,
        paths: impl IntoIterator<Item = &'a Utf8Path>,
    ) -> HashSet<NodeIndex> {
        let mut dirty = HashSet::new();

        for path in paths {
            let Ok(relative) = path.strip_prefix(&self.root) else {
                continue;
            };

            let current = Hash32::hash_file(path).ok();
            if self.hashes.get(relative) == current.as_ref() {
                continue;
            }

            tracing::debug!("changed: {relative}");
            match current {
                Some(hash) => self.hashes.insert(relative.to_owned(), hash),
                None => self.hashes.remove(relative),
            };

            dirty.extend(pipeline.matching(relative));
        }

        if !dirty.is_empty() {
            dirty.extend(self.pending.iter().copied());
        }

        dirty
    }

    fn rebuilt(&mut self) {
        self.pending.clear();
    }

    fn failed(&mut self, nodes: HashSet<NodeIndex>) {
        self.pending.extend(nodes);
    }
}

/// Binds the live-reload socket on `port`, or on any free port if it is taken.
fn reserve_port(port: u16) -> std::io::Result<(TcpListener, u16)> {
    let listener = match TcpListener::bind(("127.0.0.1", port)) {
        Ok(sock) => sock,
        Err(e) => {
            tracing::warn!("port {port} unavailable ({e}), using a random one");
            TcpListener::bind("127.0.0.1:0")?
        }
    };

    let port = listener.local_addr()?.port();
    Ok((listener, port))
}

fn new_thread_ws_incoming(server: TcpListener, clients: Clients) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for stream in server.incoming() {
            let socket = match stream {
                Ok(stream) => tungstenite::accept(stream).map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };

            match socket {
                Ok(socket) => match clients.lock() {
                    Ok(mut clients) => clients.push(socket),
                    Err(_) => return,
                },
                Err(e) => tracing::debug!("rejected live-reload client: {e}"),
            }
        }
    })
}

fn new_thread_ws_reload(clients: Clients) -> (Sender<()>, JoinHandle<()>) {
    let (tx, rx) = std::sync::mpsc::channel();

    let thread = std::thread::spawn(move || {
        while rx.recv().is_ok() {
            let Ok(mut clients) = clients.lock() else {
                return;
            };
            let mut broken = vec![];

            for (i, socket) in clients.iter_mut().enumerate() {
                match socket.send("reload".into()) {
                    Ok(_) => {}
                    Err(tungstenite::error::Error::Io(e)) => {
                        if matches!(
                            e.kind(),
                            ErrorKind::BrokenPipe
                                | ErrorKind::ConnectionReset
                                | ErrorKind::ConnectionAborted
                        ) {
                            broken.push(i);
                        }
                    }
                    Err(
                        tungstenite::error::Error::ConnectionClosed
                        | tungstenite::error::Error::AlreadyClosed,
                    ) => broken.push(i),
                    Err(e) => {
                        tracing::error!("live-reload error: {e:?}");
                    }
                }
            }

            for i in broken.into_iter().rev() {
                clients.remove(i);
            }

            // At most 10 open tabs are kept.
            let len = clients.len();
            if len > 10 {
                for mut socket in clients.drain(0..len - 10) {
                    socket.close(None).ok();
                }
            }
        }
    });

    (tx, thread)
}

/// Content hashes of every file currently matched by `globs`, keyed by path
/// relative to `root`.
fn snapshot<'a>(
    root: &Utf8Path,
    globs: impl Iterator<Item = &'a str>,
) -> HashMap<Utf8PathBuf, Hash32> {
    let mut hashes = HashMap::new();

    for glob in globs {
        let pattern = format!("{}/{glob}", glob::Pattern::escape(root.as_str()));
        let Ok(paths) = glob::glob(&pattern) else {
            continue;
        };

        for path in paths.flatten() {
            let Ok(path) = Utf8PathBuf::try_from(path) else {
                continue;
            };
            let Ok(relative) = path.strip_prefix(root) else {
                continue;
            };
            if let Ok(hash) = Hash32::hash_file(&path) {
                hashes.insert(relative.to_owned(), hash);
            }
        }
    }

    hashes
}

/// Finds the directory to watch for a glob relative to `root`: the longest
/// prefix without wildcards, or the parent directory for a concrete file so
/// that atomic writes are caught.
pub fn resolve_watch_path(root: &Utf8Path, glob: &str) -> anyhow::Result<Utf8PathBuf> {
    let path = Utf8Path::new(glob);

    let components: Vec<_> = path.components().collect();
    let split_idx = components
        .iter()
        .position(|c| c.as_str().contains(['*', '?', '[']))
        .unwrap_or(components.len());

    let static_part: Utf8PathBuf = components.iter().take(split_idx).collect();
    let absolute = root.join(static_part).canonicalize_utf8()?;

    if absolute.is_file() {
        let parent = absolute.parent().unwrap_or(&absolute).to_path_buf();
        return Ok(parent);
    }

    Ok(absolute)
}

/// Drops every root already covered by a recursive watch on one of its
/// ancestors.
fn collapse_watch_paths(paths: HashSet<Utf8PathBuf>) -> Vec<Utf8PathBuf> {
    let mut sorted: Vec<_> = paths.into_iter().collect();
    sorted.sort();

    let mut roots: Vec<Utf8PathBuf> = Vec::with_capacity(sorted.len());
    for path in sorted {
        // Sorting puts every ancestor right before its descendants.
        if roots.last().is_some_and(|root| path.starts_with(root)) {
            continue;
        }
        roots.push(path);
    }

    roots
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Blueprint;

    fn scratch() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf())
            .unwrap()
            .canonicalize_utf8()
            .unwrap();
        crate::io::write(&root.join("src/views/index.jinja"), "").unwrap();
        crate::io::write(&root.join("src/vendor/zenburn.css"), "").unwrap();
        (dir, root)
    }

    #[test]
    fn test_concrete_file_watches_parent() {
        let (_dir, root) = scratch();
        let watch = resolve_watch_path(&root, "src/vendor/zenburn.css").unwrap();

        assert_eq!(watch, root.join("src/vendor"));
    }

    #[test]
    fn test_concrete_directory() {
        let (_dir, root) = scratch();
        let watch = resolve_watch_path(&root, "src/views").unwrap();

        assert_eq!(watch, root.join("src/views"));
    }

    #[test]
    fn test_directory_wildcard() {
        let (_dir, root) = scratch();
        let watch = resolve_watch_path(&root, "src/views/**/*").unwrap();

        assert_eq!(watch, root.join("src/views"));
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        let (_dir, root) = scratch();
        assert!(resolve_watch_path(&root, "src/fonts/**/*").is_err());
    }

    #[test]
    fn test_snapshot_hashes_matched_files() {
        let (_dir, root) = scratch();
        let hashes = snapshot(&root, ["src/views/**/*", "src/missing/**/*"].into_iter());

        assert_eq!(hashes.len(), 1);
        assert_eq!(
            hashes.get(Utf8Path::new("src/views/index.jinja")),
            Some(&Hash32::hash(b""))
        );
    }

    #[test]
    fn test_reserve_port_falls_back_when_taken() {
        let taken = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();

        let (_listener, reserved) = reserve_port(port).unwrap();
        assert_ne!(reserved, port);
    }

    #[test]
    fn test_collapse_keeps_outermost_roots() {
        let roots = collapse_watch_paths(HashSet::from([
            Utf8PathBuf::from("/deck/src/assets/scss"),
            Utf8PathBuf::from("/deck/src/assets"),
            Utf8PathBuf::from("/deck/src/views"),
            Utf8PathBuf::from("/deck/src/views/slides"),
        ]));

        assert_eq!(roots, ["/deck/src/assets", "/deck/src/views"]);
    }

    #[test]
    fn test_collapse_ignores_shared_name_prefix() {
        let roots = collapse_watch_paths(HashSet::from([
            Utf8PathBuf::from("/deck/src/font"),
            Utf8PathBuf::from("/deck/src/font-awesome"),
        ]));

        assert_eq!(roots, ["/deck/src/font", "/deck/src/font-awesome"]);
    }

    fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not met in time");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_reload_reaches_clients_and_drops_closed_ones() {
        let (listener, port) = reserve_port(0).unwrap();
        let clients: Clients = Arc::new(Mutex::new(vec![]));
        let _incoming = new_thread_ws_incoming(listener, clients.clone());
        let (tx_reload, _reload) = new_thread_ws_reload(clients.clone());

        let url = format!("ws://127.0.0.1:{port}");
        let (mut staying, _) = tungstenite::connect(&url).unwrap();
        let (mut leaving, _) = tungstenite::connect(&url).unwrap();
        wait_for(|| clients.lock().unwrap().len() == 2);

        tx_reload.send(()).unwrap();
        assert_eq!(staying.read().unwrap().to_text().unwrap(), "reload");
        assert_eq!(leaving.read().unwrap().to_text().unwrap(), "reload");

        leaving.close(None).ok();
        drop(leaving);

        wait_for(|| {
            tx_reload.send(()).unwrap();
            clients.lock().unwrap().len() == 1
        });
        assert_eq!(staying.read().unwrap().to_text().unwrap(), "reload");
    }

    fn two_tasks() -> Pipeline {
        let mut blueprint = Blueprint::new();
        blueprint.task("styles").watch("src/scss/*").run(|_| Ok(()));
        blueprint.task("templates").watch("src/views/*").run(|_| Ok(()));
        blueprint.finish().unwrap()
    }

    #[test]
    fn test_failed_rebuild_carries_tasks_over() {
        let (_dir, root) = scratch();
        let style = root.join("src/scss/style.scss");
        let view = root.join("src/views/index.jinja");
        crate::io::write(&style, "a{}").unwrap();

        let pipeline = two_tasks();
        let mut changes = Changes::new(&root, &pipeline);
        let names = |nodes: HashSet<NodeIndex>| {
            let mut names: Vec<_> = nodes.into_iter().map(|i| pipeline.name(i)).collect();
            names.sort();
            names
        };

        crate::io::write(&style, "b{}").unwrap();
        crate::io::write(&view, "{% if %}").unwrap();
        let dirty = changes.dirty(&pipeline, [style.as_path(), view.as_path()]);
        assert_eq!(names(dirty.clone()), ["styles", "templates"]);
        changes.failed(dirty);

        // Same bytes again, nothing to do yet.
        assert!(changes.dirty(&pipeline, [style.as_path()]).is_empty());

        crate::io::write(&view, "fixed").unwrap();
        let dirty = changes.dirty(&pipeline, [view.as_path()]);
        assert_eq!(names(dirty), ["styles", "templates"]);
        changes.rebuilt();

        crate::io::write(&view, "fixed again").unwrap();
        let dirty = changes.dirty(&pipeline, [view.as_path()]);
        assert_eq!(names(dirty), ["templates"]);
    }

    #[test]
    fn test_deleted_file_is_a_change() {
        let (_dir, root) = scratch();
        let view = root.join("src/views/index.jinja");
        let pipeline = two_tasks();
        let mut changes = Changes::new(&root, &pipeline);

        std::fs::remove_file(&view).unwrap();
        let dirty = changes.dirty(&pipeline, [view.as_path()]);

        assert_eq!(dirty.len(), 1);
        assert!(changes.dirty(&pipeline, [view.as_path()]).is_empty());
    }
}
