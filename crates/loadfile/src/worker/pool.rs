use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::{debug, error, info, warn};

use crate::error::WorkerError;
use crate::orchestrator::Orchestrator;
use crate::worker::job::{panic_message, RunReport};

/// Fixed set of threads running [`Orchestrator::run`] for submitted job ids.
pub struct WorkerPool {
    job_sender: Sender<String>,
    result_receiver: Receiver<RunReport>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Starts `worker_count` threads reading from a queue that holds at
    /// most `queue_capacity` job ids.
    pub fn new(
        orchestrator: Orchestrator,
        worker_count: usize,
        queue_capacity: usize,
    ) -> Result<Self, WorkerError> {
        if worker_count == 0 {
            return Err(WorkerError::SpawnFailed(
                "worker_count must be > 0".to_string(),
            ));
        }

        let (job_sender, job_receiver) = bounded::<String>(queue_capacity.max(1));
        let (result_sender, result_receiver) = bounded::<RunReport>(queue_capacity.max(1));
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let job_rx = job_receiver.clone();
            let result_tx = result_sender.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let worker_orchestrator = orchestrator.clone();

            let handle = thread::Builder::new()
                .name(format!("loadfile-worker-{}", worker_id))
                .spawn(move || {
                    run_worker(
                        worker_id,
                        job_rx,
                        result_tx,
                        shutdown_flag,
                        worker_orchestrator,
                    );
                })
                .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;

            workers.push(handle);
        }

        info!("Started {} workers", worker_count);

        Ok(Self {
            job_sender,
            result_receiver,
            workers,
            shutdown,
        })
    }

    /// Queues a job id. Blocks while the queue is full.
    pub fn submit(&self, job_id: &str) -> Result<(), WorkerError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(WorkerError::ChannelClosed);
        }

        self.job_sender
            .send(job_id.to_string())
            .map_err(|_| WorkerError::ChannelClosed)
    }

    /// Queues a job id without waiting. A full queue is reported as
    /// [`WorkerError::QueueFull`] and the id is not queued.
    pub fn try_submit(&self, job_id: &str) -> Result<(), WorkerError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(WorkerError::ChannelClosed);
        }

        match self.job_sender.try_send(job_id.to_string()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(id)) => Err(WorkerError::QueueFull(id)),
            Err(TrySendError::Disconnected(_)) => Err(WorkerError::ChannelClosed),
        }
    }

    pub fn try_recv_result(&self) -> Option<RunReport> {
        self.result_receiver.try_recv().ok()
    }

    pub fn recv_result_timeout(&self, timeout: Duration) -> Option<RunReport> {
        self.result_receiver.recv_timeout(timeout).ok()
    }

    /// Asks workers to stop after their current job. Queued ids that were
    /// not picked up stay `PENDING`.
    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Closes the queue and joins every worker. Without a prior
    /// [`shutdown`](Self::shutdown) the queue is drained first.
    pub fn wait(self) {
        // Drop sender to signal workers to exit
        drop(self.job_sender);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

fn run_worker(
    worker_id: usize,
    job_receiver: Receiver<String>,
    result_sender: Sender<RunReport>,
    shutdown: Arc<AtomicBool>,
    orchestrator: Orchestrator,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match job_receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(job_id) => {
                debug!("Worker {} processing job {}", worker_id, job_id);
                let report = handle_job(&orchestrator, &job_id);

                match result_sender.try_send(report) {
                    Ok(()) => {}
                    Err(TrySendError::Full(report)) => {
                        debug!(
                            "Result queue full, dropping report for job {}",
                            report.job_id()
                        );
                    }
                    Err(TrySendError::Disconnected(_)) => {
                        debug!("Worker {} result channel disconnected", worker_id);
                    }
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                continue;
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                debug!("Worker {} job channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}

fn handle_job(orchestrator: &Orchestrator, job_id: &str) -> RunReport {
    match catch_unwind(AssertUnwindSafe(|| orchestrator.run(job_id))) {
        Ok(Ok(outcome)) => RunReport::Finished(outcome),
        Ok(Err(e)) => {
            error!("Job {} could not be run: {}", job_id, e);
            if let Err(abort_err) = orchestrator.abort(job_id, &e.to_string()) {
                warn!("Failed to abort job {}: {}", job_id, abort_err);
            }
            RunReport::LedgerFailed {
                job_id: job_id.to_string(),
                message: e.to_string(),
            }
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!("Job {} panicked: {}", job_id, message);
            if let Err(e) = orchestrator.abort(job_id, &message) {
                warn!("Failed to abort job {}: {}", job_id, e);
            }
            RunReport::Panicked {
                job_id: job_id.to_string(),
                message,
            }
        }
    }
}
