//! Core library for the LynkLedger client.
//!
//! Everything the client does against the LynkLedger REST backend goes
//! through [`api::Gateway`], which attaches the stored bearer token to each
//! request and transparently refreshes it once when the backend answers 401.
//!
//! - [`auth`]: credential stores and the session context shared with the gateway
//! - [`api`]: the gateway, its error taxonomy, and typed resource calls
//! - [`models`]: users, organizations, memberships and invitations
//! - [`forms`]: client-side validation of login/register/invite input
//! - [`config`]: persisted client configuration

pub mod api;
pub mod auth;
pub mod config;
pub mod forms;
pub mod models;

pub use api::{Gateway, GatewayError};
pub use auth::{SessionContext, SessionEnded, SessionState};
pub use config::Config;
