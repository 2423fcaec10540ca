//! The oxport agent: periodic collectors feeding a Prometheus scrape endpoint.

pub mod app;
pub mod config;
pub mod credentials;
pub mod logging;
pub mod scheduler;
pub mod tasks;
