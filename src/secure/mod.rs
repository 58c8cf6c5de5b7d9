//! Caller authentication and per-dataset authorization

pub mod authorize;
pub mod blocklist;
pub mod gate;
pub mod identity;

use crate::error::{ServiceError, ServiceResult};
use std::fmt;
use std::str::FromStr;

pub use authorize::{Authorizer, FileAuthorizer, PermissionAuthorizer};
pub use blocklist::TokenBlocklist;
pub use gate::{AuthorizationGate, Caller};
pub use identity::{extract_token, Identity, IdentityResolver};

/// Ordered access right: `None < Read < ReadWrite < Admin`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AccessLevel {
    #[default]
    None,
    Read,
    ReadWrite,
    Admin,
}

impl AccessLevel {
    /// Level implied by one identity-service role token
    pub fn from_role(role: &str) -> Option<Self> {
        match role {
            "admin" => Some(AccessLevel::Admin),
            "manage" | "edit" => Some(AccessLevel::ReadWrite),
            "view" => Some(AccessLevel::Read),
            _ => None,
        }
    }

    /// Highest level any of `roles` implies
    pub fn from_roles<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        roles
            .into_iter()
            .filter_map(|r| Self::from_role(r.as_ref()))
            .max()
            .unwrap_or_default()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::None => "noauth",
            AccessLevel::Read => "readonly",
            AccessLevel::ReadWrite => "readwrite",
            AccessLevel::Admin => "admin",
        }
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessLevel {
    type Err = ServiceError;

    fn from_str(s: &str) -> ServiceResult<Self> {
        match s {
            "noauth" => Ok(AccessLevel::None),
            "readonly" => Ok(AccessLevel::Read),
            "readwrite" => Ok(AccessLevel::ReadWrite),
            "admin" => Ok(AccessLevel::Admin),
            other => Err(ServiceError::config(format!(
                "invalid authorization string: {}",
                other
            ))),
        }
    }
}
