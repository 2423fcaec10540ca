//! Local collectors for the oxport agent.
//!
//! Each [`Collector`] samples one category of host state (processes, system
//! identity, file hashes, puppet runs) and returns a typed snapshot that the
//! agent reconciles into the metric registry. The [`network`] module holds the
//! asynchronous reachability prober, which does not fit the synchronous trait.

pub mod filehash;
pub mod network;
pub mod process;
pub mod puppet;
pub mod system;

use anyhow::Result;

/// A host-state collector polled by the agent scheduler.
///
/// Implementations are owned by a single scheduled task, so `collect` takes
/// `&mut self` and may keep refresh state (e.g. a `sysinfo::System`) between
/// cycles.
pub trait Collector: Send {
    /// Snapshot produced by one collection cycle.
    type Output;

    /// Returns the collector name (e.g., `"process"`), used for logging.
    fn name(&self) -> &str;

    /// Collects the current snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying system source cannot be read at all.
    fn collect(&mut self) -> Result<Self::Output>;
}
