//! Type definitions for authentication and the session identity

use serde::{Deserialize, Serialize};
use std::fmt;

/// Authentication tokens (access + refresh)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: String,
}

/// User role as reported by the profile endpoint
///
/// Any role string the client does not know, and a missing role, deserialize
/// to `Unknown` so the session can be rejected as corrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Teacher,
    Admin,
    #[default]
    #[serde(other)]
    Unknown,
}

impl Role {
    /// Canonical landing route for this role
    ///
    /// Shared by the guard's "already signed in" and legacy dashboard rules.
    pub fn landing_route(self) -> Option<&'static str> {
        match self {
            Role::Student => Some("/student/courses"),
            Role::Teacher => Some("/teacher/courses"),
            Role::Admin => Some("/admin/users"),
            Role::Unknown => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
            Role::Admin => "admin",
            Role::Unknown => "unknown",
        }
    }

    /// Parse a cached role tag
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "student" => Role::Student,
            "teacher" => Role::Teacher,
            "admin" => Role::Admin,
            _ => Role::Unknown,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of the signed-in user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub role: Role,
}

/// Username/password pair for `POST /users/token/`
#[derive(Debug, Clone, Serialize)]
pub struct LoginCredentials {
    pub username: String,
    pub password: String,
}

/// Account creation payload for `POST /users/register/`
#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub email: String,
    pub role: Role,
}

/// Editable profile fields for `PUT /users/profile/`
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DirectPasswordReset {
    pub username: String,
    pub email: String,
    pub new_password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PasswordChange {
    pub old_password: String,
    pub new_password: String,
}

/// Response of the token endpoint
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TokenResponse {
    pub access: String,
    pub refresh: String,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct RefreshRequest<'a> {
    pub refresh: &'a str,
}

/// Response of the refresh endpoint; `refresh` is set when the server rotates it
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RefreshResponse {
    pub access: String,
    #[serde(default)]
    pub refresh: Option<String>,
}
