//! Common functionality for the meter agent and collector.
#![warn(missing_docs)]

mod retry;

pub use crate::retry::*;
