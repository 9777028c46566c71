//! Test module for vts-core
//!
//! Scenario tests that drive a whole connection:
//! - Attach/detach lifecycle, reconnects and teardown
//! - Call dispatch, correlation, timeouts and error responses
//! - Authentication flow, liveness checks and recovery codes
//! - Configuration loading and defaults

mod handshake_tests;
