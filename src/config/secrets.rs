//! Secret handling utilities.
//!
//! Re-exports secrecy types so callers do not need a direct dependency
//! to read the database URL.

pub use secrecy::{ExposeSecret, SecretString};
