use std::borrow::Cow;

use derive_more::{Display, From, FromStr, Into};
use serde::{Deserialize, Serialize};

/// Numeric user identifier assigned by the storefront API.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, FromStr, From, Into,
)]
#[serde(transparent)]
pub struct UserId(pub i64);

/// Numeric product identifier assigned by the storefront API.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    FromStr,
    From,
    Into,
)]
#[serde(transparent)]
pub struct ProductId(pub i64);

/// Bearer credential issued by `POST /api/auth/login`.
///
/// `Debug` is redacted so the token never ends up in logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, From, Into)]
#[serde(transparent)]
pub struct BearerToken(String);

impl BearerToken {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BearerToken(<redacted>)")
    }
}

/// Account role as stored in the persisted identity.
///
/// `Public` is the implicit role of a client without a session. Role strings
/// the client does not know are kept as `Unknown` and get no capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    Admin,
    Vendedor,
    Usuario,
    Public,
    Unknown(String),
}

impl Role {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Admin => "admin",
            Self::Vendedor => "vendedor",
            Self::Usuario => "usuario",
            Self::Public => "public",
            Self::Unknown(s) => s,
        }
    }
}

impl Default for Role {
    /// Accounts created without an explicit role are regular customers.
    fn default() -> Self {
        Self::Usuario
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Role {
    fn from(s: String) -> Self {
        match s.as_str() {
            "admin" => Self::Admin,
            "vendedor" => Self::Vendedor,
            "usuario" => Self::Usuario,
            "public" => Self::Public,
            _ => Self::Unknown(s),
        }
    }
}

impl From<&str> for Role {
    fn from(s: &str) -> Self {
        Self::from(s.to_owned())
    }
}

impl From<Role> for String {
    fn from(r: Role) -> Self {
        match r {
            Role::Unknown(s) => s,
            other => other.as_str().to_owned(),
        }
    }
}

/// Opaque capability tag checked by the permission table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display)]
pub struct Capability(Cow<'static, str>);

impl Capability {
    /// Sentinel capability: a role holding it passes every check.
    pub const ALL: Self = Self::from_static("all");
    pub const AUTH: Self = Self::from_static("auth");
    pub const VIEW_PRODUCTS: Self = Self::from_static("view_products");
    pub const MANAGE_PRODUCTS: Self = Self::from_static("manage_products");
    pub const VIEW_PROFILE: Self = Self::from_static("view_profile");
    pub const MANAGE_FAVORITES: Self = Self::from_static("manage_favorites");
    pub const VIEW_CART: Self = Self::from_static("view_cart");

    #[must_use]
    pub const fn from_static(tag: &'static str) -> Self {
        Self(Cow::Borrowed(tag))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Capability {
    fn from(s: String) -> Self {
        Self(Cow::Owned(s))
    }
}

impl From<&'static str> for Capability {
    fn from(s: &'static str) -> Self {
        Self::from_static(s)
    }
}
