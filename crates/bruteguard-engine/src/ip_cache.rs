//! In-memory blacklist/whitelist membership
//!
//! The cache holds an immutable [`Snapshot`] behind an `Arc`. A refresh builds a
//! complete new snapshot without holding any lock and then swaps the pointer
//! under a short write lock. Readers clone the pointer and query it lock-free,
//! so they see either the old or the new snapshot, never a mixture.

use bruteguard_core::{GuardError, IpListStatus, ListKind, Result, Subnet};
use ipnet::{Ipv4Net, Ipv6Net};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

/// Set of IPv4 ranges answering "is this address inside any of them"
#[derive(Debug, Default)]
struct NetSet {
    // Sorted by network address, no two ranges overlap.
    nets: Vec<Ipv4Net>,
}

impl NetSet {
    fn build(list: ListKind, subnets: &[Subnet]) -> Result<Self> {
        let mut nets = Vec::with_capacity(subnets.len());
        for subnet in subnets {
            nets.push(parse_cidr(list, &subnet.cidr)?);
        }

        let mut nets = Ipv4Net::aggregate(&nets);
        nets.sort();
        Ok(Self { nets })
    }

    fn contains(&self, addr: Ipv4Addr) -> bool {
        let candidates = self.nets.partition_point(|net| net.network() <= addr);
        candidates > 0 && self.nets[candidates - 1].contains(&addr)
    }

    fn len(&self) -> usize {
        self.nets.len()
    }
}

fn parse_cidr(list: ListKind, cidr: &str) -> Result<Ipv4Net> {
    match cidr.parse::<Ipv4Net>() {
        Ok(net) => Ok(net.trunc()),
        Err(_) => {
            let reason = if cidr.parse::<Ipv6Net>().is_ok() {
                "IPv6 ranges are not supported"
            } else {
                "not a valid IPv4 CIDR"
            };
            Err(GuardError::InvalidCidr {
                list,
                cidr: cidr.to_string(),
                reason: reason.to_string(),
            })
        }
    }
}

/// Parse `ip`, accepting IPv4 and IPv4-mapped IPv6 only.
fn parse_ipv4(ip: &str) -> Result<Ipv4Addr> {
    match ip.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => Ok(v4),
        Ok(IpAddr::V6(v6)) => v6
            .to_ipv4_mapped()
            .ok_or_else(|| GuardError::UnsupportedAddressFamily(ip.to_string())),
        Err(_) => Err(GuardError::InvalidAddress(ip.to_string())),
    }
}

/// Both lists as read from the repository at one point in time
#[derive(Debug)]
pub struct Snapshot {
    blacklist: NetSet,
    whitelist: NetSet,
    loaded_at: Instant,
}

impl Snapshot {
    pub fn build(blacklist: &[Subnet], whitelist: &[Subnet]) -> Result<Self> {
        Ok(Self {
            blacklist: NetSet::build(ListKind::Blacklist, blacklist)?,
            whitelist: NetSet::build(ListKind::Whitelist, whitelist)?,
            loaded_at: Instant::now(),
        })
    }

    /// Blacklist wins over whitelist; any containing range is a match.
    pub fn status(&self, addr: Ipv4Addr) -> IpListStatus {
        if self.blacklist.contains(addr) {
            IpListStatus::InBlacklist
        } else if self.whitelist.contains(addr) {
            IpListStatus::InWhitelist
        } else {
            IpListStatus::NotInList
        }
    }
}

/// Point-in-time description of the installed snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub blacklist_ranges: usize,
    pub whitelist_ranges: usize,
    pub age: Duration,
}

pub struct IpListCache {
    ttl: Duration,
    current: RwLock<Option<Arc<Snapshot>>>,
}

impl IpListCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            current: RwLock::new(None),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// True before the first successful refresh and once the snapshot is older than the TTL.
    pub async fn needs_refresh(&self) -> bool {
        match self.current.read().await.as_ref() {
            None => true,
            Some(snapshot) => snapshot.loaded_at.elapsed() > self.ttl,
        }
    }

    /// Rebuild both lists from scratch and install them.
    ///
    /// On error nothing is installed and the previous snapshot stays in force.
    pub async fn refresh(&self, blacklist: &[Subnet], whitelist: &[Subnet]) -> Result<()> {
        let snapshot = Arc::new(Snapshot::build(blacklist, whitelist)?);
        debug!(
            blacklist_ranges = snapshot.blacklist.len(),
            whitelist_ranges = snapshot.whitelist.len(),
            "Installing IP list snapshot"
        );

        *self.current.write().await = Some(snapshot);
        Ok(())
    }

    /// Look `ip` up in the installed snapshot.
    pub async fn check_ip(&self, ip: &str) -> Result<IpListStatus> {
        let snapshot = self
            .current
            .read()
            .await
            .clone()
            .ok_or(GuardError::Uninitialized)?;

        let addr = parse_ipv4(ip)?;
        Ok(snapshot.status(addr))
    }

    pub async fn stats(&self) -> Option<CacheStats> {
        self.current.read().await.as_ref().map(|snapshot| CacheStats {
            blacklist_ranges: snapshot.blacklist.len(),
            whitelist_ranges: snapshot.whitelist.len(),
            age: snapshot.loaded_at.elapsed(),
        })
    }
}
