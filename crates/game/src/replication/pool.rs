use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use super::interest::ReceiverId;
use super::job::{Job, JobError, JobId, JobRunner, ReceiverBundle};

#[derive(Debug)]
pub struct JobOutcome {
    pub job_id: JobId,
    pub receivers: Vec<ReceiverId>,
    pub result: Result<Vec<ReceiverBundle>, JobError>,
}

/// Fixed set of snapshot workers fed from one job queue. Workers only see
/// the jobs they are sent and answer on the result channel.
pub struct WorkerPool {
    job_tx: Option<Sender<Job>>,
    result_rx: Receiver<JobOutcome>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(worker_count: usize, runner: JobRunner) -> io::Result<Self> {
        let (job_tx, job_rx) = unbounded::<Job>();
        let (result_tx, result_rx) = unbounded::<JobOutcome>();

        let mut workers = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let jobs = job_rx.clone();
            let results = result_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("snapshot-worker-{}", index))
                .spawn(move || worker_loop(index, jobs, results, runner))?;
            workers.push(handle);
        }

        Ok(Self {
            job_tx: Some(job_tx),
            result_rx,
            workers,
        })
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn submit(&self, job: Job) -> Result<(), JobError> {
        let Some(tx) = &self.job_tx else {
            return Err(JobError::PoolClosed);
        };
        tx.send(job).map_err(|_| JobError::PoolClosed)
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<JobOutcome, RecvTimeoutError> {
        self.result_rx.recv_timeout(timeout)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.job_tx.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(index: usize, jobs: Receiver<Job>, results: Sender<JobOutcome>, runner: JobRunner) {
    while let Ok(job) = jobs.recv() {
        let outcome = execute(&job, runner);
        if results.send(outcome).is_err() {
            break;
        }
    }
    log::debug!("snapshot worker {} exiting", index);
}

/// Runs one job behind a panic boundary so a failure only costs its own batch.
pub fn execute(job: &Job, runner: JobRunner) -> JobOutcome {
    let result = panic::catch_unwind(AssertUnwindSafe(|| runner(job))).map_err(|payload| {
        JobError::Panicked {
            job_id: job.job_id,
            message: panic_message(payload.as_ref()),
        }
    });

    JobOutcome {
        job_id: job.job_id,
        receivers: job.receiver_ids(),
        result,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
