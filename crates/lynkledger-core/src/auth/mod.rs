//! Authentication module for managing credentials and the client session.
//!
//! This module provides:
//! - `TokenStore`: persistent key-value storage for the access/refresh tokens,
//!   with in-memory, JSON file, and OS keychain implementations
//! - `SessionContext`: the session shared with the gateway, including the
//!   listener notified when the session ends
//!
//! Tokens live under the `token` and `refreshToken` keys.

pub mod credentials;
pub mod session;
pub mod store;

pub use credentials::KeyringTokenStore;
pub use session::{
    AuthState, SessionContext, SessionEndReason, SessionEnded, SessionEndedListener, SessionState,
};
pub use store::{
    CredentialPair, FileTokenStore, MemoryTokenStore, TokenStore, ACCESS_TOKEN_KEY,
    REFRESH_TOKEN_KEY,
};
