//! # User Roles
//!
//! Roles arrive as free-form strings (token claims, profile lookups). They are
//! parsed into a closed enumeration so that authorization is a strict equality
//! check on variants. Strings that do not name a known role become
//! [`UserRole::Unknown`], which never equals any configured privileged role.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Known user roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UserRole {
    /// Top-tier administrative role
    Master,
    /// Business operator
    Manager,
    /// Regular end user
    User,
    /// Any role string the gateway does not recognise
    Unknown,
}

impl UserRole {
    /// Parse a role string; trims whitespace and compares case-insensitively.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "MASTER" => Self::Master,
            "MANAGER" => Self::Manager,
            "USER" => Self::User,
            _ => Self::Unknown,
        }
    }

    /// Canonical name, as propagated in the `X-User-Role` header
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Master => "MASTER",
            Self::Manager => "MANAGER",
            Self::User => "USER",
            Self::Unknown => "UNKNOWN",
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

impl FromStr for UserRole {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for UserRole {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for UserRole {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}
