use thiserror::Error;

use crate::types::{Dimension, ListKind};

#[derive(Error, Debug)]
pub enum GuardError {
    #[error("Invalid CIDR in {list}: {cidr}: {reason}")]
    InvalidCidr {
        list: ListKind,
        cidr: String,
        reason: String,
    },

    #[error("Invalid IP address: {0}")]
    InvalidAddress(String),

    #[error("Only IPv4 addresses are supported: {0}")]
    UnsupportedAddressFamily(String),

    #[error("IP lists not initialized")]
    Uninitialized,

    #[error("Repository unavailable: {0}")]
    RepositoryUnavailable(#[from] sqlx::Error),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Optimistic writes on one bucket kept losing to concurrent callers.
    ///
    /// The attempt is denied and reported as unavailable (HTTP 503), so the
    /// caller may retry.
    #[error("Store contention on {0}")]
    StoreContention(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("{dimension} limit exceeded")]
    BucketExceeded { dimension: Dimension },

    #[error("Subnet not found in {list}: {cidr}")]
    SubnetNotFound { list: ListKind, cidr: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GuardError {
    /// Errors caused by the caller's input rather than by the service.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            GuardError::InvalidAddress(_)
                | GuardError::UnsupportedAddressFamily(_)
                | GuardError::InvalidRequest(_)
        )
    }

    /// A normal rate-limit denial, not a system fault.
    pub fn is_denial(&self) -> bool {
        matches!(self, GuardError::BucketExceeded { .. })
    }

    /// A dependency (repository, shared store) failed or did not answer in time.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            GuardError::RepositoryUnavailable(_)
                | GuardError::StoreUnavailable(_)
                | GuardError::StoreContention(_)
                | GuardError::Timeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, GuardError>;
