//! Test Helper Utilities
//!
//! Shared utilities for testing canticle-classifier

#![allow(dead_code)]

pub mod bundle_fixture;
pub mod signal_generator;

pub use bundle_fixture::{fixture_artifact, fixture_bundle, write_fixture_bundle};
pub use signal_generator::{noise, silence, sine, SignalConfig};
