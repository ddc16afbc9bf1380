//! Royalty calculation, approval workflow, and month-end payment batching.

pub mod config;
pub mod error;
pub mod telemetry;
pub mod workflows;
