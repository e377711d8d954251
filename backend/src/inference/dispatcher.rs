use image::RgbImage;
use shared::BackendKind;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tokio::sync::oneshot;

use super::registry::BackendRegistry;
use super::{InferenceBackend, InferenceError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Processing,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Idle => "idle",
            WorkerState::Processing => "processing",
        }
    }
}

struct Job {
    image: RgbImage,
    reply: oneshot::Sender<Result<String, InferenceError>>,
}

struct Worker {
    sender: Option<mpsc::Sender<Job>>,
    state: Arc<Mutex<WorkerState>>,
    handle: Option<JoinHandle<()>>,
}

/// Routes generation requests to the backend of the requested kind.
///
/// Each backend is owned by one OS thread fed through a channel, so calls to
/// the same backend run one at a time while the async caller just awaits the
/// reply. If the caller stops waiting, the generation still runs to the end
/// and its result is dropped.
pub struct Dispatcher {
    workers: HashMap<BackendKind, Worker>,
}

impl Dispatcher {
    pub fn new(registry: BackendRegistry) -> Result<Self, InferenceError> {
        let mut workers = HashMap::new();
        for (kind, backend) in registry.into_backends() {
            workers.insert(kind, spawn_worker(kind, backend)?);
        }
        Ok(Self { workers })
    }

    pub async fn infer(&self, kind: BackendKind, image: RgbImage) -> Result<String, InferenceError> {
        let worker = self
            .workers
            .get(&kind)
            .ok_or_else(|| InferenceError::Unavailable(format!("{} is not loaded", kind)))?;
        let sender = worker
            .sender
            .as_ref()
            .ok_or_else(|| InferenceError::Unavailable(format!("{} worker stopped", kind)))?;

        let (reply, response) = oneshot::channel();
        sender
            .send(Job { image, reply })
            .map_err(|_| InferenceError::Unavailable(format!("{} worker stopped", kind)))?;

        response
            .await
            .map_err(|_| InferenceError::Unavailable(format!("{} worker dropped the request", kind)))?
    }

    pub fn state(&self, kind: BackendKind) -> Option<WorkerState> {
        self.workers
            .get(&kind)
            .map(|worker| *worker.state.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn states(&self) -> HashMap<BackendKind, WorkerState> {
        self.workers
            .keys()
            .filter_map(|kind| self.state(*kind).map(|state| (*kind, state)))
            .collect()
    }

    /// Closes every queue and waits for in-flight generations to finish.
    pub fn stop(&mut self) {
        for (kind, worker) in self.workers.iter_mut() {
            worker.sender.take();
            if let Some(handle) = worker.handle.take() {
                if handle.join().is_err() {
                    log::error!("{} worker panicked during shutdown", kind);
                }
            }
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_worker(
    kind: BackendKind,
    mut backend: Box<dyn InferenceBackend>,
) -> Result<Worker, InferenceError> {
    let (sender, jobs) = mpsc::channel::<Job>();
    let state = Arc::new(Mutex::new(WorkerState::Idle));

    let handle = thread::Builder::new()
        .name(format!("infer-{}", kind))
        .spawn({
            let state = state.clone();
            move || {
                while let Ok(job) = jobs.recv() {
                    log::debug!("{} worker picked up a request", kind);
                    *state.lock().unwrap_or_else(PoisonError::into_inner) = WorkerState::Processing;
                    let start_time = Instant::now();

                    let prompt = backend.prompt_template().to_string();
                    let result = panic::catch_unwind(AssertUnwindSafe(|| {
                        backend.generate(&job.image, &prompt)
                    }))
                    .unwrap_or_else(|_| {
                        log::error!("{} backend panicked during generation", kind);
                        Err(InferenceError::Model("generation panicked".to_string()))
                    });

                    log::debug!("{} generation took {:?}", kind, start_time.elapsed());
                    *state.lock().unwrap_or_else(PoisonError::into_inner) = WorkerState::Idle;

                    if job.reply.send(result).is_err() {
                        log::warn!("Caller left before {} finished; result discarded", kind);
                    }
                }
                log::debug!("{} worker shutting down", kind);
            }
        })
        .map_err(|e| InferenceError::Unavailable(format!("cannot start {} worker: {}", kind, e)))?;

    Ok(Worker {
        sender: Some(sender),
        state,
        handle: Some(handle),
    })
}
