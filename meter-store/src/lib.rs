//! Storage engine for metric samples.
//!
//! All backends implement [`MetricStore`] and apply the same merge rule: a gauge replaces the
//! stored entry, a counter adds its delta to the stored counter. See
//! [`MetricValue::merge`](meter_metrics::MetricValue::merge).
//!
//! Available backends:
//!
//!  - [`MemoryStore`]: a lock-protected map, used by the agent and as the collector default.
//!  - [`FileStore`]: a [`MemoryStore`] that is restored from and persisted to a [`SnapshotFile`].
//!  - [`SqlStore`]: a relational table in Postgres or SQLite. Counter accumulation happens inside
//!    the database's upsert, so concurrent writers from several connections stay correct.
//!
//! # Absence
//!
//! [`MetricStore::get_many`] never fails because of unknown names. Every backend returns a
//! [`Lookup`] with the found samples and the missing names. Callers that treat absence as an
//! error use [`Lookup::into_strict`].
#![warn(missing_docs)]

mod file;
mod memory;
mod sql;
mod statsd;
mod store;

pub use self::file::*;
pub use self::memory::*;
pub use self::sql::*;
pub use self::store::*;
