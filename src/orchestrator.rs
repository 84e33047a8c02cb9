//! Bounded parallel dispatch of per-entry tasks.

use crossbeam_channel::{bounded, Receiver};
use log::{error, info};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::thread;

use crate::conversion::AnnotationConverter;
use crate::download::Fetcher;
use crate::error::PipelineError;
use crate::io::Manifest;
use crate::pipeline::{process_entry, TaskContext};
use crate::protos::waymo::CameraName;
use crate::types::TaskOutcome;
use crate::utils::{create_io_thread_pool, create_progress_bar};

/// Fixed-width worker pool with submit/join semantics.
pub struct TaskQueue {
    pool: rayon::ThreadPool,
}

/// Pending result of one submitted task.
pub struct TaskHandle<T> {
    receiver: Receiver<thread::Result<T>>,
}

impl<T> TaskHandle<T> {
    /// Block until the task finishes. A panic inside the task is returned as `Err`.
    pub fn join(self) -> thread::Result<T> {
        self.receiver.recv().unwrap_or_else(|_| {
            let payload: Box<dyn Any + Send> = Box::new("task finished without reporting a result");
            Err(payload)
        })
    }
}

impl TaskQueue {
    pub fn new(workers: Option<usize>) -> Result<Self, rayon::ThreadPoolBuildError> {
        Ok(Self {
            pool: create_io_thread_pool(workers)?,
        })
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn submit<F, T>(&self, task: F) -> TaskHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (sender, receiver) = bounded(1);
        self.pool.spawn(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(task));
            // The receiver may already be gone if the caller dropped the handle
            let _ = sender.send(result);
        });
        TaskHandle { receiver }
    }

    /// Wait for every handle, preserving submission order.
    pub fn join_all<T>(handles: Vec<TaskHandle<T>>) -> Vec<thread::Result<T>> {
        handles.into_iter().map(TaskHandle::join).collect()
    }
}

/// Dispatches manifest entries to the worker pool and collects their outcomes.
pub struct Orchestrator {
    queue: TaskQueue,
    fetcher: Arc<dyn Fetcher>,
    converter: AnnotationConverter,
    camera: CameraName,
}

impl Orchestrator {
    pub fn new(
        queue: TaskQueue,
        fetcher: Arc<dyn Fetcher>,
        converter: AnnotationConverter,
        camera: CameraName,
    ) -> Self {
        Self {
            queue,
            fetcher,
            converter,
            camera,
        }
    }

    pub fn workers(&self) -> usize {
        self.queue.workers()
    }

    /// Process the first `batch_size` manifest entries and return one outcome
    /// per entry, in manifest order. Blocks until every task has finished.
    pub fn run(
        &self,
        manifest: &Manifest,
        batch_size: usize,
        data_dir: &Path,
        temp_dir: &Path,
    ) -> Vec<TaskOutcome> {
        let entries = manifest.batch(batch_size);
        info!(
            "Download {} files with {} workers. Be patient, this will take a long time.",
            entries.len(),
            self.workers()
        );

        let ctx = Arc::new(TaskContext::new(data_dir, temp_dir, self.camera));
        let pb = create_progress_bar(entries.len() as u64, "Segments");

        let handles: Vec<_> = entries
            .iter()
            .map(|entry| {
                let entry = entry.clone();
                let fetcher = Arc::clone(&self.fetcher);
                let converter = self.converter.clone();
                let ctx = Arc::clone(&ctx);
                let pb = pb.clone();
                self.queue.submit(move || {
                    let outcome = process_entry(&entry, fetcher.as_ref(), &converter, &ctx);
                    pb.inc(1);
                    outcome
                })
            })
            .collect();

        let outcomes = TaskQueue::join_all(handles)
            .into_iter()
            .zip(entries)
            .map(|(joined, entry)| match joined {
                Ok(outcome) => outcome,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!("Task for {} panicked: {}", entry, message);
                    pb.inc(1);
                    TaskOutcome {
                        entry: entry.clone(),
                        output_path: None,
                        result: Err(PipelineError::Panicked(message)),
                    }
                }
            })
            .collect();

        pb.finish_with_message("done");
        outcomes
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
