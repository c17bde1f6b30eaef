use serde::{Deserialize, Serialize};

use crate::error::RoleError;

/// Role
///
/// The privilege taxonomy shared bit-exactly with the `profiles.role` column:
/// `0` client, `1` employee, `2` admin. Variants are ordered, so `role >= Role::Employee`
/// reads as "staff".
///
/// A missing or NULL role is always a client; see [`Role::coalesce`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "i16", into = "i16")]
pub enum Role {
    #[default]
    Client,
    Employee,
    Admin,
}

impl Role {
    /// Collapses an optional, possibly NULL role into a valid one.
    /// Anything unreadable degrades to `Client`, never upwards.
    pub fn coalesce(raw: Option<i16>) -> Self {
        raw.and_then(|v| Role::try_from(v).ok()).unwrap_or_default()
    }

    pub fn is_admin(self) -> bool {
        self == Role::Admin
    }

    /// Employees and admins alike.
    pub fn is_employee(self) -> bool {
        self >= Role::Employee
    }

    pub fn is_client(self) -> bool {
        self == Role::Client
    }

    pub fn as_i16(self) -> i16 {
        match self {
            Role::Client => 0,
            Role::Employee => 1,
            Role::Admin => 2,
        }
    }

    /// Display label used by the client-management listing.
    pub fn label(self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Employee => "employee",
            Role::Admin => "admin",
        }
    }
}

impl TryFrom<i16> for Role {
    type Error = RoleError;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Role::Client),
            1 => Ok(Role::Employee),
            2 => Ok(Role::Admin),
            other => Err(RoleError(other.into())),
        }
    }
}

// Used by sqlx `try_from` on nullable role columns.
impl TryFrom<Option<i16>> for Role {
    type Error = RoleError;

    fn try_from(value: Option<i16>) -> Result<Self, Self::Error> {
        value.map_or(Ok(Role::Client), Role::try_from)
    }
}

impl From<Role> for i16 {
    fn from(role: Role) -> i16 {
        role.as_i16()
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
