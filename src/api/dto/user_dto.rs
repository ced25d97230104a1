//! User resource DTOs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::common_dto::PaginationMeta;
use crate::error::AppError;

const MAX_EMAIL_LEN: usize = 254;
const MAX_NAME_LEN: usize = 100;

/// Request body for `POST /api/v1/users`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateUserRequest {
    /// Unique e-mail address.
    pub email: String,
    /// Display name.
    pub name: String,
    /// Optional free-form profile data. Stored as-is; redacted in logs.
    #[serde(default)]
    pub profile: Option<serde_json::Value>,
}

/// Request body for `PATCH /api/v1/users/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateUserRequest {
    /// New display name.
    pub name: String,
}

/// A stored user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserDto {
    /// User UUID.
    pub id: Uuid,
    /// Unique e-mail address.
    pub email: String,
    /// Display name.
    pub name: String,
    /// Free-form profile data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<serde_json::Value>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Paginated list of users.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserListResponse {
    /// Users on this page, newest first.
    pub data: Vec<UserDto>,
    /// Pagination metadata.
    pub pagination: PaginationMeta,
}

fn validate_name(name: &str) -> Result<String, AppError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::InvalidRequest("name must not be empty".to_string()));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(AppError::InvalidRequest(format!(
            "name must be at most {MAX_NAME_LEN} characters"
        )));
    }
    Ok(name.to_string())
}

impl CreateUserRequest {
    /// Returns the trimmed, lower-cased email and trimmed name.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidRequest`] on a malformed email or name.
    pub fn validated(&self) -> Result<(String, String), AppError> {
        let email = self.email.trim().to_lowercase();
        let well_formed = email.len() <= MAX_EMAIL_LEN
            && email
                .split_once('@')
                .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
        if !well_formed {
            return Err(AppError::InvalidRequest(format!(
                "invalid email address: {}",
                self.email
            )));
        }
        Ok((email, validate_name(&self.name)?))
    }
}

impl UpdateUserRequest {
    /// Returns the trimmed name.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidRequest`] on an empty or oversized name.
    pub fn validated(&self) -> Result<String, AppError> {
        validate_name(&self.name)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn request(email: &str, name: &str) -> CreateUserRequest {
        CreateUserRequest {
            email: email.to_string(),
            name: name.to_string(),
            profile: None,
        }
    }

    #[test]
    fn normalizes_valid_input() {
        let Ok((email, name)) = request(" Ada@Example.COM ", "  Ada ").validated() else {
            panic!("valid input rejected");
        };
        assert_eq!(email, "ada@example.com");
        assert_eq!(name, "Ada");
    }

    #[test]
    fn rejects_bad_email() {
        for email in ["", "ada", "@example.com", "ada@localhost"] {
            assert!(request(email, "Ada").validated().is_err(), "{email}");
        }
    }

    #[test]
    fn rejects_blank_or_long_name() {
        assert!(request("a@b.io", "   ").validated().is_err());
        assert!(request("a@b.io", &"x".repeat(101)).validated().is_err());
        assert!(UpdateUserRequest { name: "Bo".into() }.validated().is_ok());
    }
}
