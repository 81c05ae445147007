//! # coursync-shared
//!
//! Types shared by the desktop client and the sync server: record field
//! sets, push notifications and their framing, document and quota payloads,
//! and the limits both sides enforce.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::ProtocolError;
