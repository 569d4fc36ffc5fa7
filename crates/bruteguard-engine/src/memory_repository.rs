use async_trait::async_trait;
use bruteguard_core::{GuardError, ListKind, Result, Subnet, SubnetRepository};
use std::collections::BTreeSet;
use tokio::sync::RwLock;

/// Process-local subnet repository
///
/// Keeps the same contract as the PostgreSQL one: idempotent create,
/// `SubnetNotFound` on a delete that removes nothing, CIDR-ordered listing.
#[derive(Default)]
pub struct MemoryRepository {
    subnets: RwLock<BTreeSet<Subnet>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_subnets(subnets: impl IntoIterator<Item = Subnet>) -> Self {
        Self {
            subnets: RwLock::new(subnets.into_iter().collect()),
        }
    }
}

#[async_trait]
impl SubnetRepository for MemoryRepository {
    async fn create(&self, subnet: &Subnet) -> Result<()> {
        self.subnets.write().await.insert(subnet.clone());
        Ok(())
    }

    async fn delete(&self, list_kind: ListKind, cidr: &str) -> Result<()> {
        let removed = self
            .subnets
            .write()
            .await
            .remove(&Subnet::new(list_kind, cidr));

        if !removed {
            return Err(GuardError::SubnetNotFound {
                list: list_kind,
                cidr: cidr.to_string(),
            });
        }
        Ok(())
    }

    async fn list_by_kind(&self, list_kind: ListKind) -> Result<Vec<Subnet>> {
        // BTreeSet orders by (list_kind, cidr), so each kind comes out CIDR-sorted.
        Ok(self
            .subnets
            .read()
            .await
            .iter()
            .filter(|s| s.list_kind == list_kind)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let repo = MemoryRepository::new();
        let subnet = Subnet::new(ListKind::Blacklist, "10.0.0.0/8");
        repo.create(&subnet).await.unwrap();
        repo.create(&subnet).await.unwrap();

        assert_eq!(repo.list_by_kind(ListKind::Blacklist).await.unwrap(), vec![subnet]);
    }

    #[tokio::test]
    async fn test_same_cidr_in_both_lists() {
        let repo = MemoryRepository::new();
        repo.create(&Subnet::new(ListKind::Blacklist, "10.0.0.0/8")).await.unwrap();
        repo.create(&Subnet::new(ListKind::Whitelist, "10.0.0.0/8")).await.unwrap();

        repo.delete(ListKind::Blacklist, "10.0.0.0/8").await.unwrap();
        assert!(repo.list_by_kind(ListKind::Blacklist).await.unwrap().is_empty());
        assert_eq!(repo.list_by_kind(ListKind::Whitelist).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_missing() {
        let repo = MemoryRepository::with_subnets([Subnet::new(ListKind::Whitelist, "1.1.1.0/24")]);
        let err = repo.delete(ListKind::Whitelist, "2.2.2.0/24").await.unwrap_err();
        assert!(matches!(err, GuardError::SubnetNotFound { .. }));
        assert_eq!(repo.list_by_kind(ListKind::Whitelist).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_listing_is_cidr_ordered() {
        let repo = MemoryRepository::new();
        for cidr in ["192.168.0.0/16", "10.0.0.0/8", "172.16.0.0/12"] {
            repo.create(&Subnet::new(ListKind::Blacklist, cidr)).await.unwrap();
        }

        let cidrs: Vec<String> = repo
            .list_by_kind(ListKind::Blacklist)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.cidr)
            .collect();
        assert_eq!(cidrs, ["10.0.0.0/8", "172.16.0.0/12", "192.168.0.0/16"]);
    }
}
