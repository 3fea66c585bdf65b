//! Job-lifecycle control for the security-posture dashboard: submit scan and
//! remediation jobs, poll them to completion, and shape their results.
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod services;
pub mod utils;
