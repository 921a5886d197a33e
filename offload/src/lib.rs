//! # offload
//!
//! Concurrent scheduler that feeds fixed-width modular exponentiations to a
//! bank of hardware instances behind a [`backend::Backend`].
//!
//! ## Data flow
//!
//! ```text
//! caller --submit_modexp----------------------------+
//!                                                   v
//! caller --acquire/submit_mt/release--> outstanding queues --scheduler--> ready queue
//!                                                                            |
//!                                                                       dispatcher
//!                                                                  (backpressure, retry)
//!                                                                            v
//! caller <--wake-- completion handler <--poller-- hardware instance (round robin)
//! ```
//!
//! A [`Context`] owns one scheduler thread, one dispatcher thread and one
//! poller per instance for as long as the devices are acquired. Callers never
//! observe a lost request: every accepted request resolves to a
//! [`Completion`] carrying either the output buffer or an [`Error`].
//!
//! ## Example
//!
//! ```rust
//! use backend::implementation::CpuEmulated;
//! use offload::{Context, OffloadConfig};
//!
//! let ctx = Context::new(CpuEmulated::with_instances(2), OffloadConfig::default().with_instances(2));
//! ctx.acquire_devices().unwrap();
//! ctx.submit_modexp(&[216], &[3], &[7], 8).unwrap();
//! let done = ctx.drain(1).unwrap();
//! assert_eq!(done[0].outcome.as_deref().unwrap(), &[6]);
//! ctx.release_devices();
//! ```

mod completion;
pub mod config;
pub mod context;
mod counters;
mod dispatcher;
mod engine;
pub mod error;
mod instances;
mod outstanding;
mod poller;
pub mod queue;
pub mod request;
mod scheduler;
pub mod test_suite;


pub use config::OffloadConfig;
pub use context::{Context, LifecycleState};
pub use counters::Stats;
pub use error::{Error, OffloadResult};
pub use instances::InstanceStatus;
pub use outstanding::QueueId;
pub use queue::BoundedQueue;
pub use request::{Completion, OpKind, RequestId, RequestStatus};
