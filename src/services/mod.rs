//! External collaborators
//!
//! The core consumes two outside services: the username registry and the
//! permanent ciphertext store. Both sit behind traits so the test suite can
//! substitute in-memory fakes.

pub mod blob;
pub mod identity;

pub use blob::{BlobStore, HttpBlobStore, MemoryBlobStore};
pub use identity::{HttpIdentityResolver, IdentityResolver, ResolvedIdentity, StaticIdentityResolver};
