//! The meter binary.
//!
//! One executable hosts both sides of the pipeline: `meter agent run` samples runtime statistics
//! and pushes them to a collector, `meter collector run` receives and stores them. Every setting
//! can be given in `config.yml` of the config folder, as a command line argument, or through an
//! environment variable. Arguments and environment variables take precedence over the file.
//!
//! ```text
//! meter --config .meter agent run --address localhost:8080 --report-interval 10
//! ADDRESS=0.0.0.0:8080 STORE_INTERVAL=0 meter collector run
//! meter config show --format yaml
//! ```

mod cli;
mod cliapp;
mod setup;

use std::process;

#[cfg(target_os = "linux")]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

pub fn main() {
    let exit_code = match cli::execute() {
        Ok(()) => 0,
        Err(err) => {
            meter_log::ensure_error(&err);
            1
        }
    };

    process::exit(exit_code);
}
