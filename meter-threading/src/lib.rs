//! # Meter Threading
//!
//! A fixed-size pool of asynchronous workers that drain a shared job channel.
//!
//! [`WorkerPool::run`] spawns exactly `num_workers` workers on a Tokio runtime. Each worker pulls
//! jobs from the channel and awaits the handler for one job at a time, so at most `num_workers`
//! handlers run concurrently. `run` completes once the channel is closed and drained and every
//! worker has finished its last job.
//!
//! There is no result channel. Handlers report their own errors, for example by logging them.
//! Cancellation works by dropping all senders, never by aborting in-flight jobs.
//!
//! ## Usage Example
//!
//! ```rust
//! use meter_threading::WorkerPoolBuilder;
//! use tokio::runtime::Handle;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let pool = WorkerPoolBuilder::new(Handle::current())
//!     .num_workers(4)
//!     .build();
//!
//! let (tx, rx) = pool.channel();
//! let producer = tokio::spawn(async move {
//!     for job in 0..10 {
//!         tx.send_async(job).await.ok();
//!     }
//! });
//!
//! pool.run(rx, |job: u32| async move {
//!     // Deliver the job here.
//!     let _ = job;
//! })
//! .await;
//! producer.await.unwrap();
//! # }
//! ```
//!
//! ## Error Handling
//!
//! A panic in a handler terminates its worker. With a panic handler configured, the panic is
//! passed to the handler and the remaining workers continue. Without one, the panic resumes in the
//! caller of `run` after all other workers finished.
#![warn(missing_docs)]

mod builder;
mod pool;

pub use self::builder::*;
pub use self::pool::*;
