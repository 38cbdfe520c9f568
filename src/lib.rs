//! Streamsweep - Live stream discovery and validation
//!
//! This library crate exposes the scan engine, identity resolver, and
//! configuration used by the `streamsweep` binary.

pub mod config;
pub mod identity;
pub mod scanner;
