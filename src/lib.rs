//! Startup bootstrapper: brings up logging, the relational database and the cache
//! store, and reports the first failure to a single caller.

pub mod application;
pub mod config;
pub mod infra;
pub mod util;
