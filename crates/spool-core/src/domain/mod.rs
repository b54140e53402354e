//! Domain model: ids, job/worker records, the job state machine, outcomes,
//! retry decisions and errors.
//!
//! Nothing in here performs I/O.

pub mod decision;
pub mod errors;
pub mod ids;
pub mod job;
pub mod outcome;
pub mod spec;
pub mod state;
pub mod stats;
pub mod worker;

pub use decision::{Decider, Decision, DefaultDecider, RetryPolicy};
pub use errors::{ErrorKind, QueueError, Result};
pub use ids::{JobId, WorkerId};
pub use job::{Job, Transition};
pub use outcome::{Artifact, Outcome, OutcomeKind};
pub use spec::JobSpec;
pub use state::{JobState, WorkerStatus};
pub use stats::QueueStats;
pub use worker::WorkerRecord;
