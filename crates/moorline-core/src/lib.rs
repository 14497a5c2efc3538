//! Domain types for the exchange-synchronization agent.
//!
//! This crate is pure: no I/O, no clock, no network. It holds the pieces the
//! agent reasons about: node identity, change-feed records and their
//! classification, and dotted-numeric versions and ranges. It also holds the error
//! classification carried by every capability error.

#![forbid(unsafe_code)]

pub mod change;
pub mod error;
pub mod identity;
pub mod transience;
pub mod version;

pub use change::{ChangeKind, ChangeRecord};
pub use error::{CoreError, InvalidIdentity, InvalidRange, InvalidVersion};
pub use identity::NodeIdentity;
pub use transience::Transience;
pub use version::{Version, VersionRange, highest_in_range, is_range_str, is_version_str};
