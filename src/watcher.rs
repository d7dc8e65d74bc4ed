//! Control file watcher: watch → debounce → parse → validate → delete → dispatch.
//!
//! `notify` delivers raw events on its own thread; they are forwarded into a
//! single event-loop task which owns the debounce deadline and runs every
//! processing pass. The host load itself runs on the [`Dispatcher`].
use crate::config::WatchConfig;
use crate::control_file::{self, ControlFileRecord, FormatError};
use crate::dispatch::{Dispatcher, InFlightGuard, LoadJob};
use crate::loader::ProjectLoader;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Tracing target for every watcher diagnostic.
pub const LOG_TARGET: &str = "ControlFileWatcher";

/// Lifecycle of a [`ControlFileWatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    NotStarted,
    Watching,
    Stopped,
}

/// Failure to arm the filesystem watch. Logged by `start_watching`, never returned.
#[derive(Debug)]
pub enum WatchError {
    /// `start_watching` was called outside a tokio runtime.
    NoRuntime,
    /// The platform watcher could not be created.
    Create { source: notify::Error },
    /// The directory could not be watched.
    Watch {
        dir: PathBuf,
        source: notify::Error,
    },
}

impl std::fmt::Display for WatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WatchError::NoRuntime => write!(f, "no tokio runtime available to run the watcher"),
            WatchError::Create { source } => {
                write!(f, "failed to create filesystem watcher: {}", source)
            }
            WatchError::Watch { dir, source } => {
                write!(f, "failed to watch {}: {}", dir.display(), source)
            }
        }
    }
}

impl std::error::Error for WatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WatchError::NoRuntime => None,
            WatchError::Create { source } => Some(source),
            WatchError::Watch { source, .. } => Some(source),
        }
    }
}

/// Why a processing pass did not hand anything to the host.
#[derive(Debug)]
pub enum PassError {
    /// The control file exists but could not be read as text.
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Wrong line count or a missing prefix.
    Format(FormatError),
    /// The `folder:` value does not name an existing directory.
    MissingFolder { path: PathBuf },
    /// The dispatcher has shut down; nothing can be loaded.
    DispatcherClosed,
}

impl std::fmt::Display for PassError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PassError::Read { path, source } => {
                write!(f, "failed to read {}: {}", path.display(), source)
            }
            PassError::Format(e) => write!(f, "malformed control file: {}", e),
            PassError::MissingFolder { path } => {
                write!(f, "folder does not exist: {}", path.display())
            }
            PassError::DispatcherClosed => write!(f, "dispatcher is not running"),
        }
    }
}

impl std::error::Error for PassError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PassError::Read { source, .. } => Some(source),
            PassError::Format(e) => Some(e),
            PassError::MissingFolder { .. } | PassError::DispatcherClosed => None,
        }
    }
}

/// Result of one processing pass.
#[derive(Debug)]
pub enum PassOutcome {
    /// Another pass (or its load) is still in flight; this trigger was dropped.
    Busy,
    /// No control file present.
    Missing,
    /// The file was left in place and nothing was loaded.
    Rejected(PassError),
    /// The record was queued for the host.
    Dispatched(ControlFileRecord),
}

type RemoveFn = fn(&Path) -> std::io::Result<()>;

/// Everything a processing pass needs, shared with the event-loop task.
#[derive(Debug, Clone)]
struct Processor {
    control_path: PathBuf,
    in_flight: Arc<AtomicBool>,
    remove: RemoveFn,
}

impl Processor {
    fn process(&self, dispatcher: &Dispatcher) -> PassOutcome {
        let Some(guard) = InFlightGuard::try_acquire(&self.in_flight) else {
            tracing::info!(
                target: LOG_TARGET,
                "already processing a control file, ignoring trigger"
            );
            return PassOutcome::Busy;
        };

        if !self.control_path.exists() {
            tracing::debug!(
                target: LOG_TARGET,
                path = %self.control_path.display(),
                "control file no longer exists"
            );
            return PassOutcome::Missing;
        }

        let record = match self.accept() {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(
                    target: LOG_TARGET,
                    error = %e,
                    path = %self.control_path.display(),
                    "control file rejected"
                );
                return PassOutcome::Rejected(e);
            }
        };

        let job = LoadJob {
            record: record.clone(),
            guard,
        };
        match dispatcher.dispatch(job) {
            Ok(()) => PassOutcome::Dispatched(record),
            Err(job) => {
                drop(job);
                tracing::error!(
                    target: LOG_TARGET,
                    "dispatcher closed, dropping control file request"
                );
                PassOutcome::Rejected(PassError::DispatcherClosed)
            }
        }
    }

    /// Read, parse, validate and delete. Returns the record to load.
    fn accept(&self) -> Result<ControlFileRecord, PassError> {
        let contents =
            std::fs::read_to_string(&self.control_path).map_err(|e| PassError::Read {
                path: self.control_path.clone(),
                source: e,
            })?;
        let record = control_file::parse(&contents).map_err(PassError::Format)?;

        // Checked as written so the host sees the same directory.
        let folder = Path::new(&record.folder_path);
        if !folder.is_dir() {
            return Err(PassError::MissingFolder {
                path: folder.to_path_buf(),
            });
        }

        tracing::info!(
            target: LOG_TARGET,
            folder = %record.folder_path,
            maidata = %record.maidata_filename,
            track = %record.track_filename,
            "control file accepted"
        );

        if let Err(e) = (self.remove)(&self.control_path) {
            tracing::warn!(
                target: LOG_TARGET,
                error = %e,
                path = %self.control_path.display(),
                "failed to delete control file, continuing"
            );
        }

        Ok(record)
    }
}

struct ActiveWatch {
    /// Dropping this deregisters the OS watch and closes the event channel.
    _watcher: RecommendedWatcher,
    event_loop: JoinHandle<()>,
}

/// Watches one directory for the control file and forwards accepted requests
/// to a [`ProjectLoader`].
///
/// Nothing on the public surface fails: setup problems and bad control files
/// are logged and the watcher stays usable.
pub struct ControlFileWatcher {
    processor: Processor,
    dir: PathBuf,
    file_name: OsString,
    debounce: Duration,
    loader: Arc<dyn ProjectLoader>,
    state: WatcherState,
    active: Option<ActiveWatch>,
}

impl ControlFileWatcher {
    /// Watch the current working directory for the default control file.
    pub fn new(loader: Arc<dyn ProjectLoader>) -> Self {
        Self::with_config(loader, &WatchConfig::default())
    }

    pub fn with_config(loader: Arc<dyn ProjectLoader>, config: &WatchConfig) -> Self {
        let dir = absolute_dir(&config.dir);
        let file_name = OsString::from(&config.control_file);
        let processor = Processor {
            control_path: dir.join(&file_name),
            in_flight: Arc::new(AtomicBool::new(false)),
            remove: remove_file,
        };

        Self {
            processor,
            dir,
            file_name,
            debounce: config.debounce(),
            loader,
            state: WatcherState::NotStarted,
            active: None,
        }
    }

    /// Absolute path of the control file.
    pub fn control_path(&self) -> &Path {
        &self.processor.control_path
    }

    pub fn state(&self) -> WatcherState {
        self.state
    }

    /// Whether a pass or its host load is currently in flight.
    pub fn is_processing(&self) -> bool {
        self.processor.in_flight.load(Ordering::Acquire)
    }

    /// Arm the watch. Must be called from within a tokio runtime.
    ///
    /// Failures are logged and leave the watcher unarmed. If the control file
    /// already exists it is processed right away.
    pub fn start_watching(&mut self) {
        if self.active.is_some() {
            tracing::debug!(target: LOG_TARGET, "already watching");
            return;
        }

        match self.arm() {
            Ok(active) => {
                self.active = Some(active);
                self.state = WatcherState::Watching;
                tracing::info!(
                    target: LOG_TARGET,
                    path = %self.control_path().display(),
                    debounce_ms = self.debounce.as_millis() as u64,
                    "watching for control file"
                );
            }
            Err(e) => {
                tracing::error!(target: LOG_TARGET, error = %e, "failed to start watching");
            }
        }
    }

    /// Disarm the watch and cancel any pending debounce. Safe to call repeatedly.
    ///
    /// A load already handed to the host is left to finish.
    pub fn stop_watching(&mut self) {
        if let Some(active) = self.active.take() {
            let ActiveWatch {
                _watcher: watcher,
                event_loop,
            } = active;
            drop(watcher);
            event_loop.abort();
            self.state = WatcherState::Stopped;
            tracing::info!(target: LOG_TARGET, "stopped watching");
        }
    }

    fn arm(&self) -> Result<ActiveWatch, WatchError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| WatchError::NoRuntime)?;

        let (tx, rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.send(res);
        })
        .map_err(|e| WatchError::Create { source: e })?;

        watcher
            .watch(&self.dir, RecursiveMode::NonRecursive)
            .map_err(|e| WatchError::Watch {
                dir: self.dir.clone(),
                source: e,
            })?;

        // Only a file that was already there when the watch was armed skips the
        // debounce; anything written later arrives as an event.
        let present_at_start = self.control_path().exists();

        // The dispatch task outlives the event loop until its queue drains.
        let (dispatcher, _dispatch_task) = Dispatcher::spawn(Arc::clone(&self.loader));

        let event_loop = runtime.spawn(run_event_loop(
            rx,
            self.processor.clone(),
            dispatcher,
            self.file_name.clone(),
            self.debounce,
            present_at_start,
        ));

        Ok(ActiveWatch {
            _watcher: watcher,
            event_loop,
        })
    }
}

impl Drop for ControlFileWatcher {
    fn drop(&mut self) {
        self.stop_watching();
    }
}

async fn run_event_loop(
    mut events: mpsc::UnboundedReceiver<notify::Result<Event>>,
    processor: Processor,
    dispatcher: Dispatcher,
    file_name: OsString,
    debounce: Duration,
    present_at_start: bool,
) {
    if present_at_start {
        tracing::info!(target: LOG_TARGET, "control file present at startup");
        processor.process(&dispatcher);
    }

    let mut deadline: Option<Instant> = None;
    loop {
        tokio::select! {
            received = events.recv() => match received {
                Some(Ok(event)) => {
                    if is_trigger(&event, &file_name) {
                        tracing::debug!(
                            target: LOG_TARGET,
                            kind = ?event.kind,
                            "control file changed"
                        );
                        deadline = Some(Instant::now() + debounce);
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(target: LOG_TARGET, error = %e, "filesystem watcher error");
                }
                None => break,
            },
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                deadline = None;
                processor.process(&dispatcher);
            }
        }
    }
    tracing::debug!(target: LOG_TARGET, "event loop ended");
}

/// Does this event mean the control file was created, written or renamed into place?
///
/// Renames are matched on the destination name only.
fn is_trigger(event: &Event, file_name: &OsStr) -> bool {
    let named = |path: &PathBuf| path.file_name() == Some(file_name);
    match event.kind {
        EventKind::Create(_) => event.paths.iter().any(named),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => false,
        EventKind::Modify(ModifyKind::Name(_)) => event.paths.last().is_some_and(named),
        EventKind::Modify(_) => event.paths.iter().any(named),
        _ => false,
    }
}

fn remove_file(path: &Path) -> std::io::Result<()> {
    std::fs::remove_file(path)
}

fn absolute_dir(dir: &Path) -> PathBuf {
    if dir.is_absolute() {
        return dir.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) if dir == Path::new(".") => cwd,
        Ok(cwd) => cwd.join(dir),
        Err(e) => {
            tracing::warn!(target: LOG_TARGET, error = %e, "cannot resolve working directory");
            dir.to_path_buf()
        }
    }
}
