//! End-to-end tests for the host bridge
//!
//! These tests run script chunks in the reference VM against forwarded
//! host types and check what the script and the host observe.

#[allow(dead_code)]
mod harness;
mod properties;
