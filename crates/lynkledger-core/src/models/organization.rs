use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role of a member inside an organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Owner,
    Admin,
    Manager,
    Accountant,
    Bookkeeper,
    Member,
    Viewer,
    #[serde(other)]
    Unknown,
}

impl MemberRole {
    pub const ASSIGNABLE: [MemberRole; 7] = [
        MemberRole::Owner,
        MemberRole::Admin,
        MemberRole::Manager,
        MemberRole::Accountant,
        MemberRole::Bookkeeper,
        MemberRole::Member,
        MemberRole::Viewer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MemberRole::Owner => "owner",
            MemberRole::Admin => "admin",
            MemberRole::Manager => "manager",
            MemberRole::Accountant => "accountant",
            MemberRole::Bookkeeper => "bookkeeper",
            MemberRole::Member => "member",
            MemberRole::Viewer => "viewer",
            MemberRole::Unknown => "unknown",
        }
    }
}

impl fmt::Display for MemberRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for MemberRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Self::ASSIGNABLE
            .iter()
            .copied()
            .find(|role| role.as_str() == wanted)
            .ok_or_else(|| {
                let names: Vec<&str> = Self::ASSIGNABLE.iter().map(|r| r.as_str()).collect();
                format!("unknown role '{}' (expected one of: {})", s, names.join(", "))
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Organization {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub member_count: Option<i64>,
    #[serde(default)]
    pub is_owner: bool,
    #[serde(default)]
    pub current_user_role: Option<MemberRole>,
}

/// A user's membership in an organization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Membership {
    pub id: i64,
    #[serde(default)]
    pub organization: Option<i64>,
    #[serde(default)]
    pub organization_name: Option<String>,
    #[serde(default)]
    pub user_email: Option<String>,
    #[serde(default)]
    pub user_full_name: Option<String>,
    pub role: MemberRole,
    #[serde(default)]
    pub can_manage_members: bool,
    #[serde(default)]
    #[cfg_attr(feature = "ts", ts(type = "string | null"))]
    pub joined_at: Option<DateTime<Utc>>,
}

impl Membership {
    pub fn display_name(&self) -> String {
        match (&self.user_full_name, &self.user_email) {
            (Some(name), _) if !name.trim().is_empty() => name.trim().to_string(),
            (_, Some(email)) => email.clone(),
            _ => format!("member #{}", self.id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Declined,
    Expired,
    #[serde(other)]
    Unknown,
}

/// An invitation to join an organization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Invitation {
    pub id: i64,
    #[serde(default)]
    pub organization: Option<i64>,
    #[serde(default)]
    pub organization_name: Option<String>,
    pub email: String,
    #[serde(default)]
    pub invited_by_name: Option<String>,
    pub role: MemberRole,
    pub status: InvitationStatus,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    #[cfg_attr(feature = "ts", ts(type = "string | null"))]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Invitation {
    /// Still pending and not past its expiry date.
    pub fn is_open(&self) -> bool {
        self.status == InvitationStatus::Pending
            && self.expires_at.map(|at| at > Utc::now()).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_member_role_from_str() {
        assert_eq!("admin".parse::<MemberRole>(), Ok(MemberRole::Admin));
        assert_eq!(" Viewer ".parse::<MemberRole>(), Ok(MemberRole::Viewer));
        assert!("superuser".parse::<MemberRole>().is_err());
        assert!("unknown".parse::<MemberRole>().is_err());
    }

    #[test]
    fn test_member_role_unknown_value_parses() {
        let role: MemberRole = serde_json::from_str(r#""auditor""#).unwrap();
        assert_eq!(role, MemberRole::Unknown);
    }

    #[test]
    fn test_parse_membership_response() {
        let json = r#"{"id": 3, "organization": 1, "organization_name": "Acme", "user": 9, "user_email": "bo@example.com", "user_full_name": "", "role": "accountant", "can_manage_members": false, "joined_at": "2024-01-02T03:04:05Z"}"#;
        let membership: Membership =
            serde_json::from_str(json).expect("Failed to parse membership test JSON");
        assert_eq!(membership.role, MemberRole::Accountant);
        assert_eq!(membership.display_name(), "bo@example.com");
    }

    #[test]
    fn test_invitation_is_open() {
        let json = r#"{"id": 4, "email": "new@example.com", "role": "member", "status": "pending", "message": ""}"#;
        let mut invitation: Invitation = serde_json::from_str(json).unwrap();
        assert!(invitation.is_open());

        invitation.expires_at = Some(Utc::now() - Duration::days(1));
        assert!(!invitation.is_open());

        invitation.expires_at = None;
        invitation.status = InvitationStatus::Accepted;
        assert!(!invitation.is_open());
    }
}
