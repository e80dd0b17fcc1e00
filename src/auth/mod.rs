//! Request authentication
//!
//! The signed-request verifier is the only authentication primitive; the
//! two services share no cookies or bearer tokens.

pub mod signature;

pub use signature::{actions, SignatureVerifier};
