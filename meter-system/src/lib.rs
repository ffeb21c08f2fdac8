//! Foundational system components for meter services.
//!
//! The [`Controller`] listens for process signals and broadcasts a [`Shutdown`] to every
//! [`ShutdownHandle`]. Services select on [`ShutdownHandle::notified`] to stop accepting work and
//! drain.
#![warn(missing_docs)]

mod controller;

pub use self::controller::*;
