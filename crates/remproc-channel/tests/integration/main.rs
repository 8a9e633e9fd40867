//! Integration test entry point for remproc-channel.
//!
//! Run with: cargo test -p remproc-channel --test integration

mod adapters;
mod correlation;
mod properties;
