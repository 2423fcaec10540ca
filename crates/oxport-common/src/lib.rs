//! Types shared by the oxport collectors, inventory adapters and registry.

pub mod snapshot;
pub mod types;
