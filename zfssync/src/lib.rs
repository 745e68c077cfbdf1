//! Replicate ZFS datasets between pools, possibly on different hosts
//!
//! A run resolves `[host:]pool[/path]` specifications against per-host
//! listings, optionally stamps every source dataset with a new snapshot, then
//! sends each source's snapshots after the newest one the destination already
//! has.
//!
//! - [`spec`] and [`resolver`]: specification parsing and the run's registry
//! - [`topology`]: per-host listing cache
//! - [`source`]: glob and recursive expansion of sources
//! - [`sync`]: baseline computation, snapshot creation and transfer
//! - [`orchestrator`]: error policy and summary over a whole run

pub mod dataset;
pub mod error;
pub mod orchestrator;
pub mod resolver;
pub mod source;
pub mod spec;
pub mod sync;
pub mod topology;

#[cfg(test)]
mod testutils;

pub use error::{Error, Result};
pub use orchestrator::{Options, Summary};
