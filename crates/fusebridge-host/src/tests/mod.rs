//! Crate-level tests for the probe.
