mod assembler;
mod config;
mod delta;
mod interest;
mod job;
mod pool;
mod quantize;
mod state;

pub use assembler::{AssembledTick, AssemblyInput, FailedBatch, SnapshotAssembler};
pub use config::{ReplicationConfig, DEFAULT_INTEREST_RADIUS};
pub use delta::{should_send, DeltaGate, LastSentTable};
pub use interest::{
    is_within_interest, planar_distance_sq, InterestFilter, ReceiverContext, ReceiverId,
};
pub use job::{run_job, Job, JobError, JobId, JobRunner, ReceiverBundle};
pub use pool::{execute, JobOutcome, WorkerPool};
pub use quantize::{
    angle_from_index, angle_index, quantize, QuantizedState, Quantizer, ANGLE_STEPS,
    ANGLE_STEP_DEGREES, DEFAULT_HEALTH_STEP, DEFAULT_POSITION_STEP, DEFAULT_VELOCITY_STEP,
};
pub use state::{ReplicationState, TickReport};
