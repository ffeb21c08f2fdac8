//! Logging facade for all meter crates.
//!
//! Crates log through the macros re-exported here. Binaries call [`init`] once during startup
//! with the `logging` section of their configuration. Tests use [`init_test!`].
//!
//! # Example
//!
//! ```
//! let error = std::io::Error::other("disk full");
//! meter_log::error!(error = &error as &dyn std::error::Error, "failed to write snapshot");
//! ```
#![warn(missing_docs)]

#[cfg(feature = "init")]
mod setup;
#[cfg(feature = "init")]
pub use setup::*;

#[cfg(feature = "test")]
mod test;
#[cfg(feature = "test")]
pub use test::*;

mod utils;
pub use utils::*;

// Expose the minimal log facade.
#[doc(inline)]
pub use tracing::{Level, debug, error, info, trace, warn};
