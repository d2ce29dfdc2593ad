//! Byte-level checks run on every upload before anything is stored.

pub mod digest;
pub mod structure;
pub mod validator;

pub use digest::content_hash;
pub use validator::{detect_media_type, normalize_media_type, validate, ValidationError, OCTET_STREAM};
