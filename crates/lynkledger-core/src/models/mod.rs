//! Data models for LynkLedger entities.
//!
//! These are the backend-owned payloads the client reads back through the
//! gateway. Unknown fields are ignored and most fields are optional so that
//! backend additions do not break the client.
//!
//! - `User`: the logged-in user's profile
//! - `Organization`, `Membership`, `MemberRole`: organization membership
//! - `Invitation`, `InvitationStatus`: pending and past invitations

pub mod organization;
pub mod user;

pub use organization::{Invitation, InvitationStatus, MemberRole, Membership, Organization};
pub use user::{ProfileUpdate, User};
