//! Coordinates execution of automation jobs across worker processes
//! sharing one durable store. Each job runs on at most one worker at a
//! time (database-backed leases), stalled workers are detected by a
//! stale-lease sweep, and cancellation, resume, and shutdown stay safe
//! under concurrent access from multiple processes.

pub mod config;
pub mod db;
pub mod jobs;
pub mod runtime;

pub use config::Config;
