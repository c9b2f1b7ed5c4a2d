//! IP address management: subnets, allocation pools, atomic IP
//! allocation/release via compare-and-create on the coordination store (§4.D).

use chrono::Utc;
use fleetd_core::network::{AllocationPool, AllocationStatus, IpAllocation, Subnet};
use fleetd_core::{ClusterError, ClusterResult};
use fleetd_registry::Registry;
use ipnet::Contains;
use std::net::Ipv4Addr;
use uuid::Uuid;

/// Bounded retry count for the no-IP allocation path before giving up with
/// `Exhausted` (§4.D: "retry with the next candidate up to a bounded number
/// of attempts").
const MAX_ALLOCATION_ATTEMPTS: usize = 16;

#[derive(Debug, Clone, Default)]
pub struct AllocateOptions {
    /// Request a specific address; `None` picks the first free one.
    pub ip: Option<Ipv4Addr>,
    pub instance_id: Option<String>,
    pub port_id: Option<String>,
    pub hostname: Option<String>,
    pub mac: Option<String>,
}

#[derive(Clone)]
pub struct Ipam {
    registry: Registry,
}

impl Ipam {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    /// Fills in a default allocation pool (`network+2 .. broadcast-1`) when
    /// the caller supplies none, per §4.D.
    pub async fn create_subnet(
        &self,
        network_id: &str,
        cidr: ipnet::Ipv4Net,
        gateway_ip: Option<Ipv4Addr>,
        dhcp: bool,
        dns: Vec<Ipv4Addr>,
        mut allocation_pools: Vec<AllocationPool>,
    ) -> ClusterResult<Subnet> {
        if allocation_pools.is_empty() {
            allocation_pools.push(default_pool(cidr));
        }
        let subnet = Subnet {
            schema_version: 1,
            id: Uuid::new_v4().to_string(),
            network_id: network_id.to_string(),
            cidr,
            gateway_ip,
            dhcp,
            dns,
            allocation_pools,
            created_at: Utc::now(),
        };
        self.registry.put_subnet(&subnet).await?;
        Ok(subnet)
    }

    /// Rejects deletion while any allocation still references the subnet (§4.D).
    pub async fn delete_subnet(&self, subnet_id: &str) -> ClusterResult<()> {
        let active = self.registry.list_allocations(subnet_id).await?;
        if active
            .iter()
            .any(|a| a.status == AllocationStatus::Allocated)
        {
            return Err(ClusterError::failed_precondition(format!(
                "subnet {subnet_id} has active allocations"
            )));
        }
        self.registry.delete_subnet(subnet_id).await
    }

    pub async fn list_subnets(&self, network_id: Option<&str>) -> ClusterResult<Vec<Subnet>> {
        let all = self.registry.list_subnets().await?;
        Ok(match network_id {
            Some(nid) => all.into_iter().filter(|s| s.network_id == nid).collect(),
            None => all,
        })
    }

    pub async fn list_allocations(&self, subnet_id: &str) -> ClusterResult<Vec<IpAllocation>> {
        self.registry.list_allocations(subnet_id).await
    }

    /// `release` is idempotent: deleting an already-absent allocation is not
    /// an error (§4.D invariant).
    pub async fn release_ip(&self, subnet_id: &str, ip: Ipv4Addr) -> ClusterResult<()> {
        self.registry
            .release_allocation(subnet_id, &ip.to_string())
            .await
    }

    pub async fn allocate_ip(
        &self,
        subnet_id: &str,
        options: AllocateOptions,
    ) -> ClusterResult<IpAllocation> {
        let subnet = self
            .registry
            .get_subnet(subnet_id)
            .await?
            .ok_or_else(|| ClusterError::not_found(format!("subnet {subnet_id}")))?;

        if let Some(ip) = options.ip {
            validate_in_subnet(&subnet, ip)?;
            return self.try_create(&subnet, ip, &options).await;
        }

        let existing = self.registry.list_allocations(subnet_id).await?;
        let mut allocated: std::collections::HashSet<Ipv4Addr> = existing
            .iter()
            .filter(|a| a.status == AllocationStatus::Allocated)
            .map(|a| a.ip_address)
            .collect();
        if let Some(gw) = subnet.gateway_ip {
            allocated.insert(gw);
        }

        let mut attempts = 0usize;
        for pool in &subnet.allocation_pools {
            for candidate in pool.iter() {
                if allocated.contains(&candidate) {
                    continue;
                }
                if attempts >= MAX_ALLOCATION_ATTEMPTS {
                    return Err(ClusterError::resource_exhausted(format!(
                        "no free ip in subnet {subnet_id} after {attempts} attempts"
                    )));
                }
                attempts += 1;
                match self.try_create(&subnet, candidate, &options).await {
                    Ok(a) => return Ok(a),
                    Err(e) if e.kind() == fleetd_core::ErrorKind::AlreadyExists => {
                        // Lost the race for this candidate; mark it taken
                        // locally and try the next one.
                        allocated.insert(candidate);
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Err(ClusterError::resource_exhausted(format!(
            "subnet {subnet_id} has no free addresses"
        )))
    }

    async fn try_create(
        &self,
        subnet: &Subnet,
        ip: Ipv4Addr,
        options: &AllocateOptions,
    ) -> ClusterResult<IpAllocation> {
        let allocation = IpAllocation {
            schema_version: 1,
            id: Uuid::new_v4().to_string(),
            subnet_id: subnet.id.clone(),
            ip_address: ip,
            mac: options.mac.clone(),
            instance_id: options.instance_id.clone(),
            port_id: options.port_id.clone(),
            hostname: options.hostname.clone(),
            status: AllocationStatus::Allocated,
            created_at: Utc::now(),
        };
        let created = self.registry.create_allocation_if_absent(&allocation).await?;
        if created {
            Ok(allocation)
        } else {
            Err(ClusterError::already_exists(format!(
                "{} already allocated in subnet {}",
                ip, subnet.id
            )))
        }
    }
}

fn validate_in_subnet(subnet: &Subnet, ip: Ipv4Addr) -> ClusterResult<()> {
    if !subnet.cidr.contains(&ip) {
        return Err(ClusterError::invalid_argument(format!(
            "{ip} not in subnet {}",
            subnet.cidr
        )));
    }
    let in_pool = subnet.allocation_pools.iter().any(|p| p.contains(ip));
    let is_gateway = subnet.gateway_ip == Some(ip);
    if !in_pool && !is_gateway {
        return Err(ClusterError::invalid_argument(format!(
            "{ip} outside allocation pools for subnet {}",
            subnet.id
        )));
    }
    Ok(())
}

/// `network+2 .. broadcast-1`, skipping the network address, the reserved
/// gateway at `network+1`, and the broadcast address. `/31` and `/32`
/// subnets have no room for that range; this returns a degenerate pool
/// (`start > end`) rather than rejecting the subnet, since
/// `AllocationPool::iter()` already treats `start > end` as empty (§8:
/// "/31 and /32 accepted with empty or degenerate pool; allocate must
/// return ResourceExhausted").
fn default_pool(cidr: ipnet::Ipv4Net) -> AllocationPool {
    let network = u32::from(cidr.network());
    let broadcast = u32::from(cidr.broadcast());
    AllocationPool {
        start: Ipv4Addr::from(network.saturating_add(2)),
        end: Ipv4Addr::from(broadcast.saturating_sub(1)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetd_store::LocalStore;

    fn registry() -> Registry {
        Registry::new(LocalStore::new())
    }

    async fn sample_subnet(ipam: &Ipam) -> Subnet {
        ipam.create_subnet(
            "net1",
            "10.0.1.0/24".parse().unwrap(),
            Some("10.0.1.1".parse().unwrap()),
            true,
            vec![],
            vec![],
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn default_pool_skips_network_gateway_and_broadcast() {
        let ipam = Ipam::new(registry());
        let subnet = sample_subnet(&ipam).await;
        let pool = &subnet.allocation_pools[0];
        assert_eq!(pool.start, "10.0.1.2".parse::<Ipv4Addr>().unwrap());
        assert_eq!(pool.end, "10.0.1.254".parse::<Ipv4Addr>().unwrap());
    }

    #[tokio::test]
    async fn ip_round_trip_allocate_release_allocate() {
        let ipam = Ipam::new(registry());
        let subnet = sample_subnet(&ipam).await;
        let ip: Ipv4Addr = "10.0.1.50".parse().unwrap();

        let first = ipam
            .allocate_ip(
                &subnet.id,
                AllocateOptions {
                    ip: Some(ip),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(first.ip_address, ip);

        ipam.release_ip(&subnet.id, ip).await.unwrap();

        let second = ipam
            .allocate_ip(
                &subnet.id,
                AllocateOptions {
                    ip: Some(ip),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(second.ip_address, ip);
    }

    #[tokio::test]
    async fn specific_ip_double_allocate_fails() {
        let ipam = Ipam::new(registry());
        let subnet = sample_subnet(&ipam).await;
        let ip: Ipv4Addr = "10.0.1.50".parse().unwrap();
        let opts = AllocateOptions {
            ip: Some(ip),
            ..Default::default()
        };
        ipam.allocate_ip(&subnet.id, opts.clone()).await.unwrap();
        let err = ipam.allocate_ip(&subnet.id, opts).await.unwrap_err();
        assert_eq!(err.kind(), fleetd_core::ErrorKind::AlreadyExists);
    }

    #[tokio::test]
    async fn no_ip_allocation_hands_out_first_two_pool_addresses_in_order() {
        let ipam = Ipam::new(registry());
        let subnet = sample_subnet(&ipam).await;

        let a = ipam
            .allocate_ip(&subnet.id, AllocateOptions::default())
            .await
            .unwrap();
        let b = ipam
            .allocate_ip(&subnet.id, AllocateOptions::default())
            .await
            .unwrap();

        assert_eq!(a.ip_address, "10.0.1.2".parse::<Ipv4Addr>().unwrap());
        assert_eq!(b.ip_address, "10.0.1.3".parse::<Ipv4Addr>().unwrap());

        ipam.release_ip(&subnet.id, a.ip_address).await.unwrap();
        let c = ipam
            .allocate_ip(&subnet.id, AllocateOptions::default())
            .await
            .unwrap();
        assert_eq!(c.ip_address, "10.0.1.2".parse::<Ipv4Addr>().unwrap());
    }

    #[tokio::test]
    async fn slash_31_subnet_accepted_with_degenerate_pool() {
        let ipam = Ipam::new(registry());
        let subnet = ipam
            .create_subnet("net1", "10.0.2.0/31".parse().unwrap(), None, false, vec![], vec![])
            .await
            .unwrap();
        let pool = &subnet.allocation_pools[0];
        assert!(pool.start > pool.end);

        let err = ipam
            .allocate_ip(&subnet.id, AllocateOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), fleetd_core::ErrorKind::ResourceExhausted);
    }

    #[tokio::test]
    async fn slash_32_subnet_accepted_with_degenerate_pool() {
        let ipam = Ipam::new(registry());
        let subnet = ipam
            .create_subnet("net1", "10.0.3.0/32".parse().unwrap(), None, false, vec![], vec![])
            .await
            .unwrap();
        let pool = &subnet.allocation_pools[0];
        assert!(pool.start > pool.end);

        let err = ipam
            .allocate_ip(&subnet.id, AllocateOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), fleetd_core::ErrorKind::ResourceExhausted);
    }

    #[tokio::test]
    async fn delete_subnet_rejects_active_allocations() {
        let ipam = Ipam::new(registry());
        let subnet = sample_subnet(&ipam).await;
        ipam.allocate_ip(&subnet.id, AllocateOptions::default())
            .await
            .unwrap();
        let err = ipam.delete_subnet(&subnet.id).await.unwrap_err();
        assert_eq!(err.kind(), fleetd_core::ErrorKind::FailedPrecondition);
    }
}
