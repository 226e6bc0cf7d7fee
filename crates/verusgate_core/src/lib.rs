//! Core domain types for the Verus file gateway.
//!
//! Everything in this crate is transport-agnostic: request validation,
//! the file/metadata model, payload decompression and media-type
//! detection. The HTTP and RPC layers live in sibling crates.

pub mod decompress;
pub mod detect;
pub mod error;
pub mod file;

pub use decompress::Decompressor;
pub use detect::Detector;
pub use error::GatewayError;
pub use file::{File, FileMetadata, FileRequest};
