//! Serialized hand-off to the host loader.
//!
//! The dispatcher is a single task draining an unbounded queue, so loads run
//! one at a time in the order they were accepted. Each job carries the
//! in-flight guard taken by the processing pass; the guard is dropped only
//! once the host load has returned (or panicked), which keeps new control
//! files out while a load is still running.
use crate::control_file::ControlFileRecord;
use crate::loader::ProjectLoader;
use crate::watcher::LOG_TARGET;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// RAII hold on the in-flight flag. Dropping it clears the flag.
#[derive(Debug)]
pub struct InFlightGuard {
    flag: Arc<AtomicBool>,
}

impl InFlightGuard {
    /// Set the flag if it is clear. Returns `None` when another pass holds it.
    pub fn try_acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                flag: Arc::clone(flag),
            })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// One accepted control file waiting for the host.
#[derive(Debug)]
pub struct LoadJob {
    pub record: ControlFileRecord,
    pub guard: InFlightGuard,
}

/// Sender side of the host's serialized execution context.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    tx: mpsc::UnboundedSender<LoadJob>,
}

impl Dispatcher {
    /// Spawn the dispatch task on the current tokio runtime.
    ///
    /// The task ends once every `Dispatcher` clone is dropped and the queue
    /// has drained, so a load already handed over always runs to completion.
    pub fn spawn(loader: Arc<dyn ProjectLoader>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_dispatch_loop(rx, loader));
        (Self { tx }, handle)
    }

    /// Queue a job. On failure the job is handed back; dropping it releases its guard.
    pub fn dispatch(&self, job: LoadJob) -> Result<(), LoadJob> {
        self.tx.send(job).map_err(|e| e.0)
    }
}

async fn run_dispatch_loop(
    mut rx: mpsc::UnboundedReceiver<LoadJob>,
    loader: Arc<dyn ProjectLoader>,
) {
    while let Some(job) = rx.recv().await {
        run_job(job, Arc::clone(&loader)).await;
    }
    tracing::debug!(target: LOG_TARGET, "dispatcher stopped");
}

async fn run_job(job: LoadJob, loader: Arc<dyn ProjectLoader>) {
    let LoadJob { record, guard } = job;
    tracing::info!(
        target: LOG_TARGET,
        folder = %record.folder_path,
        maidata = %record.maidata_filename,
        track = %record.track_filename,
        "loading project"
    );

    let call = record.clone();
    let result = tokio::task::spawn_blocking(move || {
        loader.load_project(&call.folder_path, &call.maidata_filename, &call.track_filename)
    })
    .await;

    match result {
        Ok(Ok(())) => {
            tracing::info!(target: LOG_TARGET, folder = %record.folder_path, "project loaded");
        }
        Ok(Err(e)) => {
            tracing::error!(
                target: LOG_TARGET,
                error = %e,
                folder = %record.folder_path,
                "project load failed"
            );
        }
        Err(e) => {
            tracing::error!(
                target: LOG_TARGET,
                error = %e,
                folder = %record.folder_path,
                "project load panicked"
            );
        }
    }

    drop(guard);
}
