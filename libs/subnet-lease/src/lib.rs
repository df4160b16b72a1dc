//! # subnet-lease
//!
//! `subnet-lease` defines a trait `Registry` that provides the four operations
//! needed to record which cluster owns which subnet: a full scan, a single read,
//! a conditional insert and a delete.
//!
//! This trait is not meant to be used by callers directly. Instead, it's wrapped
//! in a `LeaseManager` type which takes a generic parameter that must implement `Registry`.
//! `LeaseManager` uses those methods to claim a subnet for a cluster name with mutual
//! exclusion, reconciling against concurrent claimants, while keeping a nicer
//! interface for the provisioning code to interact with.
//!
//! All mutual exclusion is delegated to the registry's conditional insert, no
//! in-process locking is done here.
//!
//! [`Registry`]: crate::Registry
//! [`LeaseManager`]: crate::LeaseManager
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

pub mod backoff;
pub mod inventory;
pub mod memory;
pub mod metrics;

pub use backoff::{BackoffPolicy, Sleep, TokioSleep};
pub use inventory::{StaticSubnets, SubnetInventory};
pub use memory::MemoryRegistry;

use std::collections::HashSet;

/// boxed error for collaborators whose error type is erased
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A registry record asserting `subnet_id` is owned by `cluster`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Claim {
    pub subnet_id: String,
    pub cluster: String,
}

impl Claim {
    pub fn new(subnet_id: impl Into<String>, cluster: impl Into<String>) -> Self {
        Self {
            subnet_id: subnet_id.into(),
            cluster: cluster.into(),
        }
    }
}

/// result of a conditional insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// no claim existed for the subnet, ours was written
    Inserted,
    /// someone else holds a claim on the subnet
    AlreadyRegistered,
}

#[async_trait]
pub trait Registry: Send + Sync + 'static {
    // send/sync/static required for async trait bounds
    type Error: std::error::Error + Send + Sync + 'static;
    /// every claim in the registry, in the registry's scan order
    async fn scan_all(&self) -> Result<Vec<Claim>, Self::Error>;
    async fn get(&self, subnet_id: &str) -> Result<Option<Claim>, Self::Error>;
    /// write the claim only if no claim exists for `subnet_id`
    async fn insert_if_absent(
        &self,
        subnet_id: &str,
        cluster: &str,
    ) -> Result<InsertOutcome, Self::Error>;
    /// deleting an absent claim is not an error
    async fn delete(&self, subnet_id: &str) -> Result<(), Self::Error>;
}

#[derive(Debug, Clone)]
pub struct LeaseManager<R, I, S = TokioSleep> {
    registry: R,
    inventory: I,
    sleeper: S,
    backoff: BackoffPolicy,
}

impl<R, I> LeaseManager<R, I, TokioSleep>
where
    R: Registry,
    I: SubnetInventory,
{
    pub fn new(registry: R, inventory: I) -> Self {
        Self::with_backoff(registry, inventory, BackoffPolicy::default(), TokioSleep)
    }
}

impl<R, I, S> LeaseManager<R, I, S>
where
    R: Registry,
    I: SubnetInventory,
    S: Sleep,
{
    pub fn with_backoff(registry: R, inventory: I, backoff: BackoffPolicy, sleeper: S) -> Self {
        Self {
            registry,
            inventory,
            sleeper,
            backoff,
        }
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn backoff(&self) -> BackoffPolicy {
        self.backoff
    }

    /// Query the inventory and claim a subnet for `cluster`.
    ///
    /// When the pool is exhausted we wait for the backoff delay and start over
    /// with a fresh inventory, up to `BackoffPolicy::attempts` times in total.
    /// An empty inventory is never retried.
    pub async fn acquire_subnet(&self, cluster: &str) -> Result<String, LeaseError<R::Error>> {
        validate_cluster(cluster)?;
        let attempts = self.backoff.attempts();
        let mut attempt = 1;
        loop {
            let subnets = self
                .inventory
                .list_subnets()
                .await
                .map_err(|err| LeaseError::Inventory(Box::new(err)))?;
            if subnets.is_empty() {
                warn!(cluster, "subnet inventory is empty");
                metrics::SUBNET_POOL_EXHAUSTED.inc();
                return Err(LeaseError::OutOfSubnets {
                    cluster: cluster.to_owned(),
                    pool_size: 0,
                });
            }
            trace!(cluster, pool_size = subnets.len(), attempt, "listed subnets");

            match self.claim_subnet(&subnets, cluster).await {
                Err(LeaseError::OutOfSubnets { cluster, pool_size }) => {
                    error!(
                        %cluster,
                        pool_size,
                        attempt,
                        attempts,
                        "all subnets are in use - either deploy more or remove some clusters"
                    );
                    if attempt >= attempts {
                        return Err(LeaseError::OutOfSubnets { cluster, pool_size });
                    }
                    debug!(delay = ?self.backoff.delay(), "waiting before trying to claim again");
                    self.sleeper.sleep(self.backoff.delay()).await;
                    attempt += 1;
                }
                res => return res,
            }
        }
    }

    /// Claim one of `inventory` for `cluster`.
    ///
    /// Takes a single snapshot of the registry. If the cluster already owns
    /// claims, the last one in scan order is kept and the others are freed.
    /// Otherwise each unclaimed candidate is conditionally inserted, then read
    /// back to confirm we are the owner.
    /// Returns
    ///     `Ok(subnet)` the claimed subnet
    ///     `Err(OutOfSubnets)` no candidate could be claimed
    ///     `Err(Registry)` registry transport failure, never retried here
    pub async fn claim_subnet(
        &self,
        inventory: &[String],
        cluster: &str,
    ) -> Result<String, LeaseError<R::Error>> {
        validate_cluster(cluster)?;
        let snapshot = self.registry.scan_all().await?;

        let mut owned = snapshot
            .iter()
            .filter(|claim| claim.cluster == cluster)
            .map(|claim| claim.subnet_id.as_str())
            .collect::<Vec<_>>();
        if let Some(keep) = owned.pop() {
            for duplicate in owned {
                info!(subnet = duplicate, cluster, "freeing duplicate claim");
                self.free_subnet(duplicate).await?;
                metrics::SUBNET_DUPLICATE_CLAIMS_FREED.inc();
            }
            debug!(subnet = keep, cluster, "cluster already holds a claim");
            metrics::SUBNET_CLAIMS_REUSED.inc();
            return Ok(keep.to_owned());
        }

        let claimed = snapshot
            .iter()
            .map(|claim| claim.subnet_id.as_str())
            .collect::<HashSet<_>>();
        for subnet in inventory
            .iter()
            .filter(|subnet| !claimed.contains(subnet.as_str()))
        {
            if self.registry.insert_if_absent(subnet, cluster).await?
                == InsertOutcome::AlreadyRegistered
            {
                debug!(%subnet, cluster, "subnet was registered just before us - continuing");
                metrics::SUBNET_CLAIM_CONFLICTS.inc();
                continue;
            }
            // the insert went through, but only the read back makes us the owner
            match self.registry.get(subnet).await? {
                Some(claim) if claim.cluster == cluster => {
                    info!(%subnet, cluster, "claimed subnet");
                    metrics::SUBNET_CLAIMS_CREATED.inc();
                    return Ok(subnet.clone());
                }
                Some(claim) => {
                    info!("subnet {subnet} already claimed for cluster {}", claim.cluster);
                    metrics::SUBNET_CLAIM_RACES_LOST.inc();
                }
                None => {
                    warn!(%subnet, cluster, "claim disappeared before it was confirmed");
                    metrics::SUBNET_CLAIM_RACES_LOST.inc();
                }
            }
        }

        metrics::SUBNET_POOL_EXHAUSTED.inc();
        Err(LeaseError::OutOfSubnets {
            cluster: cluster.to_owned(),
            pool_size: inventory.len(),
        })
    }

    /// remove the claim on `subnet_id`, whoever owns it
    pub async fn free_subnet(&self, subnet_id: &str) -> Result<(), LeaseError<R::Error>> {
        self.registry.delete(subnet_id).await?;
        metrics::SUBNET_CLAIMS_RELEASED.inc();
        Ok(())
    }

    /// Free every claim owned by `cluster`, used when tearing the cluster down.
    /// Returns the freed subnets in scan order.
    pub async fn release_cluster(&self, cluster: &str) -> Result<Vec<String>, LeaseError<R::Error>> {
        validate_cluster(cluster)?;
        let mut released = Vec::new();
        for claim in self.registry.scan_all().await? {
            if claim.cluster == cluster {
                self.free_subnet(&claim.subnet_id).await?;
                released.push(claim.subnet_id);
            }
        }
        if released.is_empty() {
            debug!(cluster, "no claims to release");
        } else {
            info!(cluster, ?released, "released subnet claims");
        }
        Ok(released)
    }

    /// current claims, in registry scan order
    pub async fn claims(&self) -> Result<Vec<Claim>, LeaseError<R::Error>> {
        Ok(self.registry.scan_all().await?)
    }
}

fn validate_cluster<E>(cluster: &str) -> Result<(), LeaseError<E>> {
    if cluster.trim().is_empty() {
        return Err(LeaseError::EmptyClusterName);
    }
    Ok(())
}

#[derive(Error, Debug)]
pub enum LeaseError<E> {
    #[error("all subnets are in use ({pool_size} in pool), no subnet for cluster {cluster}")]
    OutOfSubnets { cluster: String, pool_size: usize },
    #[error("cluster name must not be empty")]
    EmptyClusterName,
    #[error(transparent)]
    Registry(#[from] E),
    #[error("error listing subnet inventory")]
    Inventory(#[source] BoxError),
}

impl<E> LeaseError<E> {
    pub fn is_out_of_subnets(&self) -> bool {
        matches!(self, LeaseError::OutOfSubnets { .. })
    }
}
