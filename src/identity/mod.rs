//! Channel identity resolution.
//!
//! Raw names extracted from addresses or probe metadata are matched against a
//! combined mapping table (remote dataset plus user overrides). Misses fall
//! back to fingerprint history, and every observation feeds that history so
//! streams whose name keeps changing get flagged as unstable.

pub mod error;
pub mod fingerprint;
pub mod mapping;
pub mod naming;
pub mod remote;
pub mod resolver;
pub mod store;

pub use error::IdentityError;
pub use fingerprint::{fingerprint, FingerprintRecord, UnstableMapping};
pub use mapping::{MappingEntry, MappingTable};
pub use naming::name_from_address;
pub use remote::{HttpMappingSource, MappingSource, NoRemote};
pub use resolver::{IdentityResolver, ResolverSettings};
pub use store::{JsonFileStore, MappingStore, MemoryStore, RemoteCache};
