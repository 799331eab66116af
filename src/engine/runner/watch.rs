//! Watch mode is implemented as a three-part system:
//!
//! 1. **File watcher**: Uses the `notify` crate to monitor the static roots
//!    of every task's watch globs. Events for debounced tasks go through
//!    `notify-debouncer-full`, the rest are delivered as they happen.
//! 2. **WebSocket server**: Spawns a dedicated thread using `tungstenite`
//!    to maintain persistent connections with open browser tabs.
//! 3. **Client script**: The [`Environment`](crate::Environment) provides
//!    a lightweight JavaScript snippet that rendered templates include. It
//!    connects to the WebSocket server and listens for a `"reload"` message.
//!
//! ## The Loop
//!
//! When a file change is detected:
//! 1. The changed path is matched against each [`WatchBinding`]; only the
//!    tasks whose globs match are triggered, nothing else is rebuilt.
//! 2. The [`Dispatcher`] runs each task on its own thread, at most one run
//!    per task at a time.
//! 3. After a successful run the WebSocket thread broadcasts the reload
//!    command to all connected clients. Failed runs are logged and the
//!    watcher keeps going.

use std::collections::{BTreeSet, HashSet};
use std::env;
use std::io;
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::mpsc::{Sender, channel};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use globset::GlobSet;
use notify::{RecursiveMode, Watcher};
use notify_debouncer_full::{DebounceEventResult, new_debouncer};
use tungstenite::WebSocket;

use crate::core::Environment;
use crate::engine::TaskGraph;
use crate::engine::runner::flight::Dispatcher;
use crate::error::WatchError;
use crate::loader::{build_set, split_pattern};
use crate::task::Task;

/// Quiescence window for debounced bindings.
const DEBOUNCE: Duration = Duration::from_millis(250);

/// Association between a set of watched globs and the task they trigger.
#[derive(Debug, Clone)]
pub struct WatchBinding {
    pub task: String,
    pub globs: GlobSet,
    /// Static directories of the globs, relative to the working directory.
    pub roots: Vec<Utf8PathBuf>,
    pub debounced: bool,
}

impl WatchBinding {
    pub fn new(task: &dyn Task) -> Result<Self, globset::Error> {
        let patterns = task.watched();
        let globs = build_set(patterns)?;
        let roots = patterns
            .iter()
            .map(|pattern| split_pattern(Utf8Path::new(pattern.trim_start_matches("./"))).0)
            .collect();

        Ok(Self {
            task: task.name().to_string(),
            globs,
            roots,
            debounced: task.debounced(),
        })
    }

    /// Patterns may be written relative to the working directory or as
    /// absolute paths, so both forms of the event path are tried.
    pub fn matches(&self, absolute: &Utf8Path, relative: &Utf8Path) -> bool {
        self.globs.is_match(relative) || self.globs.is_match(absolute)
    }
}

/// One binding per task that declares watch globs.
pub(crate) fn bindings(graph: &TaskGraph) -> Result<Vec<WatchBinding>, globset::Error> {
    graph
        .tasks()
        .filter(|task| !task.watched().is_empty())
        .map(|task| WatchBinding::new(task.as_ref()))
        .collect()
}

/// Names of the tasks triggered by a change to `path`.
pub(crate) fn affected(
    bindings: &[WatchBinding],
    path: &Utf8Path,
    cwd: &Utf8Path,
    debounced: bool,
) -> BTreeSet<String> {
    let relative = path.strip_prefix(cwd).unwrap_or(path);

    bindings
        .iter()
        .filter(|binding| binding.debounced == debounced && binding.matches(path, relative))
        .map(|binding| binding.task.clone())
        .collect()
}

/// The directory actually handed to the watcher: the glob root made absolute,
/// or its nearest existing ancestor when it doesn't exist yet.
fn watch_root(root: &Utf8Path, cwd: &Utf8Path) -> Utf8PathBuf {
    if root.as_str().is_empty() {
        return cwd.to_path_buf();
    }

    let mut path = cwd.join(root);

    while !path.exists() {
        match path.parent() {
            Some(parent) => path = parent.to_path_buf(),
            None => return cwd.to_path_buf(),
        }
    }

    path
}

/// Reduces a set of paths to the minimal set of watch roots.
///
/// If we watch `/a` and `/a/b`, we only need to watch `/a` because
/// the watcher is recursive. This function sorts the paths and filters
/// out any path that is a subdirectory of a previously accepted path.
fn collapse_watch_paths(paths: HashSet<Utf8PathBuf>) -> Vec<Utf8PathBuf> {
    let mut paths: Vec<_> = paths.into_iter().collect();
    paths.sort();

    let mut filtered = Vec::new();
    for path in paths {
        if let Some(last) = filtered.last()
            && path.starts_with(last)
        {
            continue;
        }
        filtered.push(path);
    }

    filtered
}

fn roots_of<'a>(
    bindings: impl Iterator<Item = &'a WatchBinding>,
    cwd: &Utf8Path,
) -> Vec<Utf8PathBuf> {
    let roots = bindings
        .flat_map(|binding| binding.roots.iter())
        .map(|root| watch_root(root, cwd))
        .collect();

    collapse_watch_paths(roots)
}

/// Watch the filesystem forever, running the bound task for every change.
pub(crate) fn watch(
    graph: Arc<TaskGraph>,
    env: Arc<Environment>,
    reload: Option<Sender<()>>,
) -> Result<(), WatchError> {
    let cwd = Utf8PathBuf::try_from(env::current_dir()?).map_err(|e| e.into_io_error())?;
    let bindings = bindings(&graph)?;
    let dispatcher = Dispatcher::new(graph, env, reload);

    let (tx, rx) = channel::<(Vec<PathBuf>, bool)>();

    let tx_debounced = tx.clone();
    let mut debouncer = new_debouncer(DEBOUNCE, None, move |result: DebounceEventResult| {
        match result {
            Ok(events) => {
                let paths = events
                    .into_iter()
                    .filter(|e| !e.event.kind.is_access())
                    .flat_map(|e| e.event.paths)
                    .collect();
                let _ = tx_debounced.send((paths, true));
            }
            Err(errors) => {
                for error in errors {
                    tracing::error!("watch error: {error:?}");
                }
            }
        }
    })?;

    let tx_raw = tx.clone();
    let mut raw = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
        match result {
            Ok(event) if !event.kind.is_access() => {
                let _ = tx_raw.send((event.paths, false));
            }
            Ok(_) => {}
            Err(error) => tracing::error!("watch error: {error:?}"),
        }
    })?;

    drop(tx);

    for path in roots_of(bindings.iter().filter(|b| b.debounced), &cwd) {
        tracing::info!("watching {}", path);
        debouncer.watch(&path, RecursiveMode::Recursive)?;
    }

    for path in roots_of(bindings.iter().filter(|b| !b.debounced), &cwd) {
        tracing::info!("watching {} (no debounce)", path);
        raw.watch(path.as_std_path(), RecursiveMode::Recursive)?;
    }

    tracing::info!("initial build completed, now watching for changes...");

    for (paths, debounced) in rx {
        let mut triggered = BTreeSet::new();

        for path in &paths {
            if let Some(path) = Utf8Path::from_path(path) {
                triggered.extend(affected(&bindings, path, &cwd, debounced));
            }
        }

        for name in triggered {
            dispatcher.trigger(&name);
        }
    }

    Ok(())
}

/// Bind the live-reload socket on the preferred port, falling back to any
/// free port.
pub(crate) fn reserve_port(preferred: u16) -> io::Result<(TcpListener, u16)> {
    let listener = match TcpListener::bind(("127.0.0.1", preferred)) {
        Ok(sock) => sock,
        Err(_) => TcpListener::bind("127.0.0.1:0")?,
    };

    let addr = listener.local_addr()?;
    let port = addr.port();
    Ok((listener, port))
}

type Clients = Arc<Mutex<Vec<WebSocket<TcpStream>>>>;

/// Accept browser connections and broadcast a reload for every message
/// received on the returned channel.
pub(crate) fn start_reload_server(tcp: TcpListener) -> Sender<()> {
    let clients = Arc::new(Mutex::new(vec![]));

    let _thread_i = new_thread_ws_incoming(tcp, clients.clone());
    let (tx_reload, _thread_o) = new_thread_ws_reload(clients);

    tx_reload
}

fn new_thread_ws_incoming(server: TcpListener, clients: Clients) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for stream in server.incoming() {
            let socket = match stream.map_err(|e| e.to_string()).and_then(|stream| {
                tungstenite::accept(stream).map_err(|e| e.to_string())
            }) {
                Ok(socket) => socket,
                Err(e) => {
                    tracing::warn!("live-reload handshake failed: {e}");
                    continue;
                }
            };

            clients
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(socket);
        }
    })
}

fn new_thread_ws_reload(clients: Clients) -> (Sender<()>, JoinHandle<()>) {
    let (tx, rx) = channel();

    let thread = std::thread::spawn(move || {
        while rx.recv().is_ok() {
            let mut clients = clients.lock().unwrap_or_else(PoisonError::into_inner);
            let mut broken = vec![];

            for (i, socket) in clients.iter_mut().enumerate() {
                match socket.send("reload".into()) {
                    Ok(_) => {}
                    Err(tungstenite::error::Error::Io(e)) => {
                        if e.kind() == io::ErrorKind::BrokenPipe {
                            broken.push(i);
                        }
                    }
                    Err(tungstenite::error::Error::ConnectionClosed)
                    | Err(tungstenite::error::Error::AlreadyClosed) => broken.push(i),
                    Err(e) => {
                        tracing::error!("Error: {e:?}");
                    }
                }
            }

            for i in broken.into_iter().rev() {
                clients.remove(i);
            }

            // Close all but the last 10 connections
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

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    use super::*;
    use crate::engine::testing::Recorder;
    use crate::error::TransformError;
    use crate::task::TaskReport;

    fn bound(name: &str, watch: &[&str], debounce: bool) -> Arc<dyn Task> {
        struct Undebounced(Recorder);

        impl Task for Undebounced {
            fn name(&self) -> &str {
                self.0.name()
            }
            fn dependencies(&self) -> &[String] {
                self.0.dependencies()
            }
            fn watched(&self) -> &[String] {
                self.0.watched()
            }
            fn debounced(&self) -> bool {
                false
            }
            fn run(&self, env: &Environment) -> Result<TaskReport, TransformError> {
                self.0.run(env)
            }
        }

        let log = Arc::new(Mutex::new(Vec::new()));
        let mut task = Recorder::new(name, &[], &log);
        task.watch = watch.iter().map(|w| w.to_string()).collect();

        if debounce {
            Arc::new(task)
        } else {
            Arc::new(Undebounced(task))
        }
    }

    fn sample() -> Vec<WatchBinding> {
        let graph = TaskGraph::new(vec![
            bound("styles", &["src/styles/**/*.scss"], true),
            bound("scripts", &["src/js/*.js"], true),
            bound("templates", &["src/html/**/*.twig", "website.json"], true),
            bound("copy:normalize", &[], true),
            bound("sprites", &["src/sprites/*.png"], false),
        ])
        .unwrap();

        bindings(&graph).unwrap()
    }

    #[test]
    fn test_bindings_skip_unwatched_tasks() {
        let names: BTreeSet<_> = sample().into_iter().map(|b| b.task).collect();
        assert!(!names.contains("copy:normalize"));
        assert_eq!(names.len(), 4);
    }

    #[test]
    fn test_change_triggers_only_its_category() {
        let bindings = sample();
        let cwd = Utf8Path::new("/project");

        let hit = affected(&bindings, Utf8Path::new("/project/src/styles/a.scss"), cwd, true);
        assert_eq!(hit, BTreeSet::from(["styles".to_string()]));

        let hit = affected(&bindings, Utf8Path::new("/project/src/js/main.js"), cwd, true);
        assert_eq!(hit, BTreeSet::from(["scripts".to_string()]));

        let hit = affected(&bindings, Utf8Path::new("/project/website.json"), cwd, true);
        assert_eq!(hit, BTreeSet::from(["templates".to_string()]));

        let hit = affected(&bindings, Utf8Path::new("/project/README.md"), cwd, true);
        assert!(hit.is_empty());
    }

    #[test]
    fn test_debounce_flag_separates_bindings() {
        let bindings = sample();
        let cwd = Utf8Path::new("/project");
        let path = Utf8Path::new("/project/src/sprites/home.png");

        assert!(affected(&bindings, path, cwd, true).is_empty());
        assert_eq!(
            affected(&bindings, path, cwd, false),
            BTreeSet::from(["sprites".to_string()])
        );
    }

    #[test]
    fn test_absolute_patterns() {
        let graph = TaskGraph::new(vec![bound("styles", &["/abs/styles/*.scss"], true)]).unwrap();
        let bindings = bindings(&graph).unwrap();

        let hit = affected(&bindings, Utf8Path::new("/abs/styles/a.scss"), Utf8Path::new("/cwd"), true);
        assert_eq!(hit.len(), 1);
        assert_eq!(bindings[0].roots, vec![Utf8PathBuf::from("/abs/styles")]);
    }

    #[test]
    fn test_binding_roots() {
        let bindings = sample();
        let templates = bindings.iter().find(|b| b.task == "templates").unwrap();
        assert_eq!(
            templates.roots,
            vec![Utf8PathBuf::from("src/html"), Utf8PathBuf::from("")]
        );
    }

    #[test]
    fn test_watch_root_walks_up_to_existing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let cwd = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        std::fs::create_dir_all(cwd.join("src")).unwrap();

        assert_eq!(watch_root(Utf8Path::new("src/styles"), &cwd), cwd.join("src"));
        assert_eq!(watch_root(Utf8Path::new("src"), &cwd), cwd.join("src"));
        assert_eq!(watch_root(Utf8Path::new(""), &cwd), cwd);
    }

    #[test]
    fn test_collapse_watch_paths() {
        let mut paths = HashSet::new();
        paths.insert(Utf8PathBuf::from("/a"));
        paths.insert(Utf8PathBuf::from("/a/b"));
        paths.insert(Utf8PathBuf::from("/a/b/c"));
        paths.insert(Utf8PathBuf::from("/b"));
        paths.insert(Utf8PathBuf::from("/c/d"));

        let collapsed = collapse_watch_paths(paths);

        // /a/b and /a/b/c are covered by /a.
        assert_eq!(
            collapsed,
            vec![
                Utf8PathBuf::from("/a"),
                Utf8PathBuf::from("/b"),
                Utf8PathBuf::from("/c/d")
            ]
        );
    }

    #[test]
    fn test_collapse_watch_paths_siblings() {
        let mut paths = HashSet::new();
        paths.insert(Utf8PathBuf::from("/a/x"));
        paths.insert(Utf8PathBuf::from("/a/y"));

        let collapsed = collapse_watch_paths(paths);

        assert_eq!(
            collapsed,
            vec![Utf8PathBuf::from("/a/x"), Utf8PathBuf::from("/a/y")]
        );
    }

    #[test]
    fn test_collapse_watch_paths_similar_names() {
        let mut paths = HashSet::new();
        paths.insert(Utf8PathBuf::from("/foo"));
        paths.insert(Utf8PathBuf::from("/foo-bar"));

        let collapsed = collapse_watch_paths(paths);

        // /foo-bar is not a subdirectory of /foo
        assert_eq!(
            collapsed,
            vec![Utf8PathBuf::from("/foo"), Utf8PathBuf::from("/foo-bar")]
        );
    }

    #[test]
    fn test_reserve_port_falls_back() {
        let (_first, port) = reserve_port(0).unwrap();
        let (_second, other) = reserve_port(port).unwrap();
        assert_ne!(port, other);
    }

    #[test]
    fn test_reload_is_broadcast() {
        let (tcp, port) = reserve_port(0).unwrap();
        let tx = start_reload_server(tcp);

        let (mut client, _) = tungstenite::connect(format!("ws://127.0.0.1:{port}")).unwrap();

        // The server registers the client asynchronously, keep announcing
        // until the message gets through.
        let done = Arc::new(AtomicBool::new(false));
        let pinger = thread::spawn({
            let done = done.clone();
            move || {
                while !done.load(Ordering::Relaxed) {
                    tx.send(()).unwrap();
                    thread::sleep(Duration::from_millis(50));
                }
            }
        });

        let message = client.read().unwrap();
        assert_eq!(message.to_text().unwrap(), "reload");

        done.store(true, Ordering::Relaxed);
        pinger.join().unwrap();
    }
}
