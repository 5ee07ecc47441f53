//! Typed calls to the LynkLedger REST resources.
//!
//! All of these are thin wrappers over [`Gateway`]; the payloads are owned by
//! the backend and only the fields the client uses are modeled.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::gateway::Gateway;
use super::request::RequestDescriptor;
use super::GatewayError;
use crate::auth::{CredentialPair, SessionEndReason};
use crate::forms::{InviteForm, RegisterForm};
use crate::models::{Invitation, MemberRole, Membership, Organization, ProfileUpdate, User};

/// Path of the login endpoint.
pub const LOGIN_PATH: &str = "/token/";

const REGISTER_PATH: &str = "/auth/register/";
const PROFILE_PATH: &str = "/profile/";
const ORGANIZATIONS_PATH: &str = "/organizations/";
const INVITATIONS_PATH: &str = "/invitations/";

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    access: String,
    refresh: String,
}

#[derive(Debug, Serialize)]
struct CreateOrganizationRequest<'a> {
    name: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest<'a> {
    first_name: &'a str,
    last_name: &'a str,
    email: &'a str,
    password: &'a str,
    organization_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterResponse {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub user: Option<User>,
}

#[derive(Debug, Serialize)]
struct InviteRequest<'a> {
    email: &'a str,
    role: MemberRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
    organization: i64,
}

#[derive(Debug, Serialize)]
struct RoleUpdate {
    role: MemberRole,
}

/// Lists come back either bare or wrapped in a DRF page.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ListResponse<T> {
    Page { results: Vec<T> },
    Plain(Vec<T>),
}

impl<T> ListResponse<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            ListResponse::Page { results } => results,
            ListResponse::Plain(items) => items,
        }
    }
}

/// Members and invitations of one organization, fetched together.
#[derive(Debug, Clone)]
pub struct OrganizationOverview {
    pub members: Vec<Membership>,
    pub invitations: Vec<Invitation>,
}

impl Gateway {
    async fn get_list<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, GatewayError> {
        let list: ListResponse<T> = self.get_json(path).await?;
        Ok(list.into_vec())
    }

    // ===== Authentication =====

    /// Log in with email and password and establish the session.
    pub async fn login(&self, email: &str, password: &str) -> Result<CredentialPair, GatewayError> {
        let request = RequestDescriptor::post(LOGIN_PATH).json(&LoginRequest {
            username: email,
            password,
        })?;
        let response = self.send_public(&request).await?;
        let body = response.bytes().await.map_err(GatewayError::from_transport)?;
        let tokens: LoginResponse = serde_json::from_slice(&body)
            .map_err(|e| GatewayError::Decode(format!("Malformed login response: {}", e)))?;

        let pair = CredentialPair {
            access_token: tokens.access,
            refresh_token: tokens.refresh,
        };
        self.session().establish(&pair, None)?;
        info!("Logged in");
        Ok(pair)
    }

    /// Create the organization, then the user account that belongs to it.
    ///
    /// The form is expected to have been validated already. The session is
    /// not established; the user logs in afterwards.
    pub async fn register(&self, form: &RegisterForm) -> Result<RegisterResponse, GatewayError> {
        let organization: Organization = self
            .post_json(
                ORGANIZATIONS_PATH,
                &CreateOrganizationRequest {
                    name: form.organization_name.trim(),
                },
            )
            .await?;

        let response = self
            .post_json(
                REGISTER_PATH,
                &RegisterRequest {
                    first_name: form.first_name.trim(),
                    last_name: form.last_name.trim(),
                    email: form.email.trim(),
                    password: &form.password,
                    organization_id: organization.id,
                },
            )
            .await?;
        info!(organization_id = organization.id, "Registered new account");
        Ok(response)
    }

    /// End the session locally.
    pub fn logout(&self) {
        self.session().teardown(SessionEndReason::UserLogout);
    }

    // ===== Profile =====

    /// Fetch the current user's profile and remember it on the session.
    pub async fn get_profile(&self) -> Result<User, GatewayError> {
        let user: User = self.get_json(PROFILE_PATH).await?;
        self.session().set_user(user.clone());
        Ok(user)
    }

    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<User, GatewayError> {
        if update.is_empty() {
            warn!("Profile update without any field set");
        }
        let user: User = self.put_json(PROFILE_PATH, update).await?;
        self.session().set_user(user.clone());
        Ok(user)
    }

    // ===== Organizations =====

    pub async fn organizations(&self) -> Result<Vec<Organization>, GatewayError> {
        self.get_list(ORGANIZATIONS_PATH).await
    }

    pub async fn organization_members(&self, org_id: i64) -> Result<Vec<Membership>, GatewayError> {
        self.get_list(&format!("{}{}/members/", ORGANIZATIONS_PATH, org_id))
            .await
    }

    pub async fn organization_invitations(&self) -> Result<Vec<Invitation>, GatewayError> {
        self.get_list(INVITATIONS_PATH).await
    }

    /// Members of `org_id` plus the invitations belonging to it.
    pub async fn organization_overview(
        &self,
        org_id: i64,
    ) -> Result<OrganizationOverview, GatewayError> {
        let (members, invitations) = futures::try_join!(
            self.organization_members(org_id),
            self.organization_invitations()
        )?;
        let invitations = invitations
            .into_iter()
            .filter(|inv| inv.organization.map(|id| id == org_id).unwrap_or(true))
            .collect();
        Ok(OrganizationOverview {
            members,
            invitations,
        })
    }

    pub async fn invite_member(
        &self,
        org_id: i64,
        invite: &InviteForm,
    ) -> Result<Invitation, GatewayError> {
        self.post_json(
            INVITATIONS_PATH,
            &InviteRequest {
                email: invite.email.trim(),
                role: invite.role,
                message: invite.message.as_deref().filter(|m| !m.trim().is_empty()),
                organization: org_id,
            },
        )
        .await
    }

    pub async fn update_member_role(
        &self,
        membership_id: i64,
        role: MemberRole,
    ) -> Result<Membership, GatewayError> {
        self.patch_json(&format!("/memberships/{}/", membership_id), &RoleUpdate { role })
            .await
    }

    pub async fn remove_member(&self, membership_id: i64) -> Result<(), GatewayError> {
        self.delete(&format!("/memberships/{}/", membership_id)).await
    }

    pub async fn cancel_invitation(&self, invitation_id: i64) -> Result<(), GatewayError> {
        self.delete(&format!("{}{}/", INVITATIONS_PATH, invitation_id))
            .await
    }

    // ===== Invitation links =====

    /// Look up an invitation by the token from its link.
    pub async fn get_invitation(&self, token: &str) -> Result<Invitation, GatewayError> {
        if token.trim().is_empty() {
            return Err(GatewayError::InvalidRequest("Invalid invitation token".to_string()));
        }
        self.get_json(&format!("{}{}/", INVITATIONS_PATH, token.trim()))
            .await
    }

    pub async fn accept_invitation(&self, token: &str) -> Result<(), GatewayError> {
        if token.trim().is_empty() {
            return Err(GatewayError::InvalidRequest("Invalid invitation token".to_string()));
        }
        self.send_empty(&RequestDescriptor::post(format!(
            "{}{}/accept/",
            INVITATIONS_PATH,
            token.trim()
        )))
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_response_shapes() {
        let plain: ListResponse<i64> = serde_json::from_str("[1, 2]").unwrap();
        assert_eq!(plain.into_vec(), vec![1, 2]);

        let page: ListResponse<i64> =
            serde_json::from_str(r#"{"count": 2, "next": null, "results": [3, 4]}"#).unwrap();
        assert_eq!(page.into_vec(), vec![3, 4]);
    }

    #[test]
    fn test_invite_request_omits_empty_message() {
        let json = serde_json::to_value(InviteRequest {
            email: "a@example.com",
            role: MemberRole::Accountant,
            message: None,
            organization: 5,
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({"email": "a@example.com", "role": "accountant", "organization": 5})
        );
    }

    #[test]
    fn test_register_request_uses_camel_case() {
        let json = serde_json::to_value(RegisterRequest {
            first_name: "Ana",
            last_name: "Ruiz",
            email: "ana@example.com",
            password: "s3cretpass",
            organization_id: 9,
        })
        .unwrap();
        assert_eq!(json["firstName"], "Ana");
        assert_eq!(json["organizationId"], 9);
    }
}
