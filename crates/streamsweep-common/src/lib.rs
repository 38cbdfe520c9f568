//! Streamsweep-Common: Shared types and address expansion.
//!
//! This crate provides the pieces every other streamsweep crate agrees on:
//!
//! - **Address templates**: [`AddressTemplate`] parses `[start-end]` range
//!   markers and lazily expands them into batches of concrete addresses
//! - **Scan records**: [`ScanRecord`] and [`RecordUpdate`] describe a probed
//!   stream and its later enrichment
//! - **Statistics**: [`ScanStats`] tracks totals for a running session
//! - **Error Handling**: Common error types and result aliases
//!
//! # Examples
//!
//! ```
//! use streamsweep_common::AddressTemplate;
//!
//! let template = AddressTemplate::parse("http://10.0.0.[1-3]:80/s")?;
//! let batches: Vec<Vec<String>> = template.batches(2).collect();
//! assert_eq!(batches.len(), 2);
//! assert_eq!(batches[1], vec!["http://10.0.0.3:80/s".to_string()]);
//! # Ok::<(), streamsweep_common::Error>(())
//! ```

pub mod error;
pub mod template;
pub mod types;

pub use error::{Error, Result};
pub use template::{AddressBatches, AddressTemplate};
pub use types::*;
