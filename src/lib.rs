//! Apply IPS patches to seekable targets in place.

pub mod error;
pub mod ips;

pub use error::IpsError;
pub use ips::{apply, list, Record};
