use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::RecvTimeoutError;

use crate::world::Entity;

use super::config::ReplicationConfig;
use super::delta::DeltaGate;
use super::interest::{ReceiverContext, ReceiverId};
use super::job::{run_job, Job, JobError, JobId, JobRunner, ReceiverBundle};
use super::pool::{execute, JobOutcome, WorkerPool};
use super::quantize::Quantizer;

pub struct AssemblyInput<'a> {
    pub tick: u32,
    pub entities: Arc<[Entity]>,
    pub receivers: &'a [ReceiverContext],
    pub gate: &'a DeltaGate,
    pub force_full_sync: bool,
}

#[derive(Debug)]
pub struct FailedBatch {
    pub job_id: JobId,
    pub receivers: Vec<ReceiverId>,
    pub error: JobError,
}

#[derive(Debug, Default)]
pub struct AssembledTick {
    pub bundles: HashMap<ReceiverId, ReceiverBundle>,
    pub failed: Vec<FailedBatch>,
    pub job_count: usize,
}

impl AssembledTick {
    fn record(&mut self, outcome: JobOutcome) {
        match outcome.result {
            Ok(bundles) => {
                for bundle in bundles {
                    let receiver = bundle.receiver_id;
                    if self.bundles.insert(receiver, bundle).is_some() {
                        log::warn!("receiver {:?} produced by more than one job", receiver);
                    }
                }
            }
            Err(error) => self.failed.push(FailedBatch {
                job_id: outcome.job_id,
                receivers: outcome.receivers,
                error,
            }),
        }
    }
}

/// Splits receivers into batches, runs one job per batch and merges the bundles.
///
/// Batches are cut along receivers so each job owns a disjoint set of baselines.
/// Batches whose job failed are replayed first on the next tick, each on its own.
pub struct SnapshotAssembler {
    quantizer: Quantizer,
    interest_radius_sq: f32,
    max_entries: usize,
    receivers_per_job: usize,
    job_timeout: Duration,
    runner: JobRunner,
    pool: Option<WorkerPool>,
    next_job_id: JobId,
    retry: Vec<Vec<ReceiverId>>,
}

impl SnapshotAssembler {
    pub fn new(config: &ReplicationConfig) -> io::Result<Self> {
        Self::with_runner(config, run_job)
    }

    pub fn with_runner(config: &ReplicationConfig, runner: JobRunner) -> io::Result<Self> {
        let pool = if config.worker_count > 0 {
            Some(WorkerPool::new(config.worker_count, runner)?)
        } else {
            None
        };

        Ok(Self {
            quantizer: config.quantizer,
            interest_radius_sq: config.max_interest_radius_sq(),
            max_entries: config.max_entities_per_message,
            receivers_per_job: config.receivers_per_job.max(1),
            job_timeout: config.job_timeout,
            runner,
            pool,
            next_job_id: 0,
            retry: Vec::new(),
        })
    }

    pub fn is_parallel(&self) -> bool {
        self.pool.is_some()
    }

    pub fn pending_retries(&self) -> &[Vec<ReceiverId>] {
        &self.retry
    }

    pub fn plan(&mut self, input: &AssemblyInput<'_>) -> Vec<Job> {
        let mut receivers: Vec<&ReceiverContext> = input.receivers.iter().collect();
        receivers.sort_by_key(|r| r.receiver_id);

        let mut batches: Vec<Vec<&ReceiverContext>> = Vec::new();
        let mut isolated: HashSet<ReceiverId> = HashSet::new();

        for retry in std::mem::take(&mut self.retry) {
            let batch: Vec<&ReceiverContext> = receivers
                .iter()
                .copied()
                .filter(|r| retry.contains(&r.receiver_id) && !isolated.contains(&r.receiver_id))
                .collect();
            if batch.is_empty() {
                continue;
            }
            isolated.extend(batch.iter().map(|r| r.receiver_id));
            batches.push(batch);
        }

        let rest: Vec<&ReceiverContext> = receivers
            .into_iter()
            .filter(|r| !isolated.contains(&r.receiver_id))
            .collect();
        for chunk in rest.chunks(self.receivers_per_job) {
            batches.push(chunk.to_vec());
        }

        batches
            .into_iter()
            .map(|batch| self.build_job(input, batch))
            .collect()
    }

    pub fn assemble(&mut self, input: &AssemblyInput<'_>) -> AssembledTick {
        let jobs = self.plan(input);
        let mut tick = AssembledTick {
            job_count: jobs.len(),
            ..Default::default()
        };

        match &self.pool {
            Some(pool) => collect_parallel(pool, jobs, self.job_timeout, &mut tick),
            None => self.run_inline(jobs, &mut tick),
        }

        self.finish(input.tick, tick)
    }

    /// Same jobs, run one after another on the calling thread.
    pub fn assemble_sequential(&mut self, input: &AssemblyInput<'_>) -> AssembledTick {
        let jobs = self.plan(input);
        let mut tick = AssembledTick {
            job_count: jobs.len(),
            ..Default::default()
        };
        self.run_inline(jobs, &mut tick);
        self.finish(input.tick, tick)
    }

    fn run_inline(&self, jobs: Vec<Job>, tick: &mut AssembledTick) {
        for job in jobs {
            tick.record(execute(&job, self.runner));
        }
    }

    fn finish(&mut self, tick_number: u32, mut tick: AssembledTick) -> AssembledTick {
        tick.failed.sort_by_key(|f| f.job_id);
        for failed in &tick.failed {
            log::warn!(
                "tick {}: {} ({} receivers deferred to next tick)",
                tick_number,
                failed.error,
                failed.receivers.len()
            );
        }
        self.retry = tick.failed.iter().map(|f| f.receivers.clone()).collect();
        tick
    }

    fn build_job(&mut self, input: &AssemblyInput<'_>, batch: Vec<&ReceiverContext>) -> Job {
        let receivers: Vec<ReceiverContext> = batch.into_iter().cloned().collect();
        let ids: Vec<ReceiverId> = receivers.iter().map(|r| r.receiver_id).collect();
        let job_id = self.next_job_id;
        self.next_job_id = self.next_job_id.wrapping_add(1);

        Job {
            job_id,
            tick: input.tick,
            entities: Arc::clone(&input.entities),
            receivers,
            interest_radius_sq: self.interest_radius_sq,
            last_sent: input.gate.slice(&ids),
            force_full_sync: input.force_full_sync,
            quantizer: self.quantizer,
            max_entries: self.max_entries,
        }
    }
}

fn collect_parallel(pool: &WorkerPool, jobs: Vec<Job>, timeout: Duration, tick: &mut AssembledTick) {
    let mut pending: HashMap<JobId, Vec<ReceiverId>> = HashMap::with_capacity(jobs.len());

    for job in jobs {
        let job_id = job.job_id;
        let receivers = job.receiver_ids();
        match pool.submit(job) {
            Ok(()) => {
                pending.insert(job_id, receivers);
            }
            Err(error) => tick.failed.push(FailedBatch {
                job_id,
                receivers,
                error,
            }),
        }
    }

    let deadline = Instant::now() + timeout;
    while !pending.is_empty() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match pool.recv_timeout(remaining) {
            Ok(outcome) => {
                if pending.remove(&outcome.job_id).is_none() {
                    log::debug!("discarding late result for job {}", outcome.job_id);
                    continue;
                }
                tick.record(outcome);
            }
            Err(RecvTimeoutError::Timeout) => {
                for (job_id, receivers) in pending.drain() {
                    tick.failed.push(FailedBatch {
                        job_id,
                        receivers,
                        error: JobError::TimedOut { job_id },
                    });
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                for (job_id, receivers) in pending.drain() {
                    tick.failed.push(FailedBatch {
                        job_id,
                        receivers,
                        error: JobError::PoolClosed,
                    });
                }
            }
        }
    }
}
