use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ListKind, Subnet};

/// Durable store of `(list_kind, cidr)` pairs
#[async_trait]
pub trait SubnetRepository: Send + Sync {
    /// Insert a subnet. Inserting an existing pair is a no-op.
    async fn create(&self, subnet: &Subnet) -> Result<()>;

    /// Remove the exact pair, failing with `SubnetNotFound` when nothing matched.
    async fn delete(&self, list_kind: ListKind, cidr: &str) -> Result<()>;

    /// All subnets of one list, ordered by CIDR string.
    async fn list_by_kind(&self, list_kind: ListKind) -> Result<Vec<Subnet>>;
}
