//! Client-side validation of login, registration and invitation input.
//!
//! Validation runs before anything is sent. Failures are reported per field
//! using the same map type the backend's validation errors are parsed into,
//! keyed by the camelCase field names the forms use.

use serde::{Deserialize, Serialize};

use crate::api::error::FieldErrors;
use crate::models::MemberRole;

/// Minimum password length accepted by the backend.
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Check that a string looks like an email address.
/// Requires exactly one `@`, a non-empty local part and a dotted domain.
pub fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let mut parts = email.split('@');
    let (Some(local), Some(domain), None) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    !local.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !domain.contains("..")
}

#[derive(Default)]
struct Validator {
    errors: FieldErrors,
}

impl Validator {
    fn fail(&mut self, field: &str, message: &str) {
        self.errors
            .entry(field.to_string())
            .or_insert_with(|| message.to_string());
    }

    fn required(&mut self, field: &str, value: &str, message: &str) -> bool {
        if value.trim().is_empty() {
            self.fail(field, message);
            false
        } else {
            true
        }
    }

    fn email(&mut self, field: &str, value: &str) {
        if self.required(field, value, "Email is required") && !is_valid_email(value.trim()) {
            self.fail(field, "Invalid email address");
        }
    }

    fn password(&mut self, field: &str, value: &str) {
        if self.required(field, value, "Password is required")
            && value.chars().count() < MIN_PASSWORD_LENGTH
        {
            self.fail(field, "Password must be at least 8 characters");
        }
    }

    fn finish(self) -> Result<(), FieldErrors> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

impl LoginForm {
    pub fn validate(&self) -> Result<(), FieldErrors> {
        let mut v = Validator::default();
        v.email("email", &self.email);
        v.password("password", &self.password);
        v.finish()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterForm {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    pub organization_name: String,
}

impl RegisterForm {
    pub fn validate(&self) -> Result<(), FieldErrors> {
        let mut v = Validator::default();
        v.required("firstName", &self.first_name, "First name is required");
        v.required("lastName", &self.last_name, "Last name is required");
        v.email("email", &self.email);
        v.password("password", &self.password);
        if v.required("confirmPassword", &self.confirm_password, "Confirm your password")
            && self.confirm_password != self.password
        {
            v.fail("confirmPassword", "Passwords must match");
        }
        v.required(
            "organizationName",
            &self.organization_name,
            "Organization name is required",
        );
        v.finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteForm {
    pub email: String,
    pub role: MemberRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl InviteForm {
    pub fn validate(&self) -> Result<(), FieldErrors> {
        let mut v = Validator::default();
        v.email("email", &self.email);
        if self.role == MemberRole::Unknown {
            v.fail("role", "Choose a role");
        }
        v.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register_form() -> RegisterForm {
        RegisterForm {
            first_name: "Ana".to_string(),
            last_name: "Ruiz".to_string(),
            email: "ana@example.com".to_string(),
            password: "s3cretpass".to_string(),
            confirm_password: "s3cretpass".to_string(),
            organization_name: "Ruiz & Co".to_string(),
        }
    }

    #[test]
    fn test_is_valid_email() {
        assert!(is_valid_email("ana@example.com"));
        assert!(is_valid_email("a.b+tag@sub.example.co"));

        assert!(!is_valid_email(""));
        assert!(!is_valid_email("ana"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("ana@localhost"));
        assert!(!is_valid_email("ana@@example.com"));
        assert!(!is_valid_email("ana@example..com"));
        assert!(!is_valid_email("ana @example.com"));
    }

    #[test]
    fn test_login_form() {
        let ok = LoginForm {
            email: "ana@example.com".to_string(),
            password: "12345678".to_string(),
        };
        assert!(ok.validate().is_ok());

        let errors = LoginForm {
            email: "nope".to_string(),
            password: "short".to_string(),
        }
        .validate()
        .unwrap_err();
        assert_eq!(errors["email"], "Invalid email address");
        assert_eq!(errors["password"], "Password must be at least 8 characters");

        let errors = LoginForm::default().validate().unwrap_err();
        assert_eq!(errors["email"], "Email is required");
        assert_eq!(errors["password"], "Password is required");
    }

    #[test]
    fn test_register_form_valid() {
        assert!(register_form().validate().is_ok());
    }

    #[test]
    fn test_register_form_mismatch_and_missing() {
        let mut form = register_form();
        form.confirm_password = "different1".to_string();
        form.organization_name = "   ".to_string();
        form.first_name.clear();

        let errors = form.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
        assert_eq!(errors["confirmPassword"], "Passwords must match");
        assert_eq!(errors["organizationName"], "Organization name is required");
        assert_eq!(errors["firstName"], "First name is required");
    }

    #[test]
    fn test_invite_form() {
        let form = InviteForm {
            email: "new@example.com".to_string(),
            role: MemberRole::Viewer,
            message: None,
        };
        assert!(form.validate().is_ok());

        let form = InviteForm {
            email: "bad".to_string(),
            role: MemberRole::Unknown,
            message: Some("hi".to_string()),
        };
        let errors = form.validate().unwrap_err();
        assert!(errors.contains_key("email"));
        assert!(errors.contains_key("role"));
    }
}
