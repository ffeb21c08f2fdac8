//! Configuration for the meter agent and collector.
//!
//! Both processes read a `config.yml` from a config folder. Every section is optional and falls
//! back to its defaults. Values can then be overridden from the command line or the environment
//! through [`OverridableConfig`].
#![warn(missing_docs)]

mod config;

pub use crate::config::*;
