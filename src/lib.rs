//! Vigil - guardian recovery and dead-man's-switch service
//!
//! Two subsystems share one key-value store and one signed-request
//! authentication scheme:
//!
//! - **Recovery**: holds encrypted key shares on behalf of guardians and
//!   mediates k-of-n approval sessions that release re-encrypted shares to
//!   an owner back on a new device.
//! - **DMS**: holds pre-encrypted messages for named recipients, extends
//!   delivery deadlines on check-ins, and releases messages when a
//!   deadline lapses.
//!
//! The server treats every ciphertext as opaque: it never decrypts a
//! share, never verifies a Shamir split, and never reads a message.

pub mod auth;
pub mod config;
pub mod dms;
pub mod kv;
pub mod recovery;
pub mod routes;
pub mod server;
pub mod services;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{Result, VigilError};
