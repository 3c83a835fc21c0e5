//! Secret handling utilities.
//!
//! Re-exports the secrecy types qued uses for connection strings.

pub use secrecy::{ExposeSecret, SecretString};
