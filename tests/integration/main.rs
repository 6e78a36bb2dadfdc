//! Integration test binary -- all integration tests consolidated into a single
//! binary to reduce link time.

// Allow unwrap/expect in test code
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod helpers;

mod host_bridge_e2e;
mod restart_recovery;
mod tokio_scheduling;
