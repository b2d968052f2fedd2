//! Startup orchestration and the errors it reports.

pub mod error;
pub mod startup;
