//! REST API module for the LynkLedger backend.
//!
//! This module provides the `Gateway` through which every backend call is
//! made, the error taxonomy callers see, and typed wrappers for the
//! profile, organization and invitation resources.
//!
//! The backend issues short-lived JWT access tokens and long-lived refresh
//! tokens; the gateway refreshes transparently on a first 401.

pub mod error;
pub mod gateway;
pub mod request;
pub mod resources;

pub use error::{ErrorBody, ErrorKind, FieldErrors, GatewayError};
pub use gateway::{Gateway, RequestOutcome, REFRESH_PATH};
pub use request::{PendingRequest, RequestBody, RequestDescriptor};
pub use resources::{OrganizationOverview, RegisterResponse, LOGIN_PATH};
