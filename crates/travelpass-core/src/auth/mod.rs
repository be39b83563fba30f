//! Authentication state: token storage and session tracking.
//!
//! This module provides:
//! - `CredentialStore`: async storage for the access and refresh tokens,
//!   backed by the OS keychain (`KeyringStore`) or memory (`MemoryStore`)
//! - `Session`: the injected session service that derives "logged in" from
//!   the stored access token and broadcasts `SessionEvent`s

pub mod credentials;
pub mod session;

pub use credentials::{CredentialStore, KeyringStore, MemoryStore, TokenKey};
pub use session::{Session, SessionEvent};
