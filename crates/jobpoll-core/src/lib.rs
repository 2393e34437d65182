//! Core types for jobpoll: the remote job model, its status state machine,
//! the error taxonomy shared by every crate, and cooperative cancellation.
//!
//! # Main types
//!
//! - [`JobError`] — Tagged error enum separating rejected submissions,
//!   transient transport failures, remote job failures and timeouts.
//! - [`JobResult`] — Convenience alias for `Result<T, JobError>`.
//! - [`JobStatus`] — Remote status, with wire aliases folded together.
//! - [`JobSnapshot`] — One observation of a remote job.
//! - [`JobTracker`] — Enforces monotonic status progression for one job.
//! - [`CancelToken`] / [`CancelHandle`] — Level-triggered cancellation signal.

/// Cooperative cancellation signal.
pub mod cancel;
/// Error taxonomy.
pub mod error;
/// Job status model and transition tracking.
pub mod job;

pub use cancel::{cancel_pair, CancelHandle, CancelToken};
pub use error::{is_transient_status, JobError, JobResult};
pub use job::{JobSnapshot, JobStatus, JobTracker, Transition};
