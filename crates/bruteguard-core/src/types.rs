use serde::{Deserialize, Serialize};

use crate::error::GuardError;

/// Which operator-maintained list a subnet belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListKind {
    Blacklist,
    Whitelist,
}

impl ListKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListKind::Blacklist => "blacklist",
            ListKind::Whitelist => "whitelist",
        }
    }
}

impl std::fmt::Display for ListKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ListKind {
    type Err = GuardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "blacklist" => Ok(ListKind::Blacklist),
            "whitelist" => Ok(ListKind::Whitelist),
            other => Err(GuardError::InvalidRequest(format!(
                "unknown list kind: {}",
                other
            ))),
        }
    }
}

/// A CIDR range registered in one of the lists.
///
/// Identity is the `(list_kind, cidr)` pair. The CIDR is kept exactly as the
/// operator entered it; it is only parsed when the membership cache is rebuilt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Subnet {
    pub list_kind: ListKind,
    pub cidr: String,
}

impl Subnet {
    pub fn new(list_kind: ListKind, cidr: impl Into<String>) -> Self {
        Self {
            list_kind,
            cidr: cidr.into(),
        }
    }
}

/// Result of looking an address up in the membership cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IpListStatus {
    InBlacklist,
    InWhitelist,
    NotInList,
}

/// Independent rate-limit key spaces, checked in declaration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Login,
    Password,
    Ip,
}

impl Dimension {
    /// Fixed evaluation order of a rate-limit check.
    pub const ORDER: [Dimension; 3] = [Dimension::Login, Dimension::Password, Dimension::Ip];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Login => "login",
            Dimension::Password => "password",
            Dimension::Ip => "ip",
        }
    }

    /// Shared-store key holding the bucket for `value` in this dimension.
    pub fn bucket_key(&self, value: &str) -> String {
        format!("ratelimit:{}:{}", self.as_str(), value)
    }
}

impl std::fmt::Display for Dimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One authentication attempt to be admitted or rejected
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthRequest {
    pub login: String,
    pub password: String,
    pub ip: String,
}

impl AuthRequest {
    pub fn new(
        login: impl Into<String>,
        password: impl Into<String>,
        ip: impl Into<String>,
    ) -> Self {
        Self {
            login: login.into(),
            password: password.into(),
            ip: ip.into(),
        }
    }
}

// Passwords must not end up in logs through `{:?}`.
impl std::fmt::Debug for AuthRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthRequest")
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .field("ip", &self.ip)
            .finish()
    }
}

/// Administrative bucket reset. At least one field must be set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResetRequest {
    #[serde(default)]
    pub login: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
}

impl ResetRequest {
    pub fn login(&self) -> Option<&str> {
        self.login.as_deref().filter(|s| !s.is_empty())
    }

    pub fn ip(&self) -> Option<&str> {
        self.ip.as_deref().filter(|s| !s.is_empty())
    }
}

/// Why an admission verdict came out the way it did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VerdictReason {
    Blacklisted,
    Whitelisted,
    WithinLimits,
    RateLimited { dimension: Dimension },
}

/// Admission decision for one authentication attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub ok: bool,
    pub list_status: IpListStatus,
    pub reason: VerdictReason,
}

impl Verdict {
    pub fn blacklisted() -> Self {
        Self {
            ok: false,
            list_status: IpListStatus::InBlacklist,
            reason: VerdictReason::Blacklisted,
        }
    }

    pub fn whitelisted() -> Self {
        Self {
            ok: true,
            list_status: IpListStatus::InWhitelist,
            reason: VerdictReason::Whitelisted,
        }
    }

    pub fn within_limits() -> Self {
        Self {
            ok: true,
            list_status: IpListStatus::NotInList,
            reason: VerdictReason::WithinLimits,
        }
    }

    pub fn rate_limited(dimension: Dimension) -> Self {
        Self {
            ok: false,
            list_status: IpListStatus::NotInList,
            reason: VerdictReason::RateLimited { dimension },
        }
    }
}
