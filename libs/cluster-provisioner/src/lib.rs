//! # cluster-provisioner
//!
//! Ties the pieces of creating a tenant cluster together: the shared
//! resources come from a `ResourceResolver`, the subnet from a
//! `LeaseManager`, and the cluster itself from a `ClusterControl`.
//!
//! Deleting a cluster releases its subnet claims once the control plane has
//! accepted the delete.
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use resource_resolver::{ResolveError, ResourceInventory, ResourceResolver};
use subnet_lease::{
    Claim, LeaseError, LeaseManager, Registry, Sleep, SubnetInventory, TokioSleep,
};

pub mod control;
pub mod pcluster;

pub use control::{ClusterControl, ClusterRequest, ControlError};
pub use pcluster::PclusterCli;

/// longest name the cluster control plane accepts
pub const MAX_CLUSTER_NAME_LEN: usize = 60;

#[derive(Debug)]
pub struct Provisioner<R, I, V, C, S = TokioSleep> {
    leases: LeaseManager<R, I, S>,
    resolver: ResourceResolver<V>,
    control: C,
}

impl<R, I, V, C, S> Provisioner<R, I, V, C, S>
where
    R: Registry,
    I: SubnetInventory,
    V: ResourceInventory,
    C: ClusterControl,
    S: Sleep,
{
    pub fn new(leases: LeaseManager<R, I, S>, resolver: ResourceResolver<V>, control: C) -> Self {
        Self {
            leases,
            resolver,
            control,
        }
    }

    pub fn leases(&self) -> &LeaseManager<R, I, S> {
        &self.leases
    }

    /// Create the cluster `name`.
    ///
    /// Shared resources are resolved before a subnet is claimed so a
    /// misconfigured account never holds a claim. A failed create keeps the
    /// claim, retrying the same name reuses it.
    #[instrument(skip(self))]
    pub async fn create(&self, name: &str) -> Result<Value, ProvisionError<R::Error, V::Error>> {
        validate_name(name)?;

        let keypair = self.resolver.resolve_keypair().await?;
        let filesystem_id = self.resolver.resolve_filesystem().await?;
        let security_group_id = self.resolver.resolve_security_group().await?;
        debug!(%keypair, %filesystem_id, %security_group_id, "resolved shared resources");

        let subnet_id = self.leases.acquire_subnet(name).await?;
        let request = ClusterRequest {
            name: name.to_owned(),
            subnet_id,
            keypair,
            filesystem_id,
            security_group_id,
        };

        match self.control.create(&request).await {
            Ok(out) => {
                info!(subnet = %request.subnet_id, "cluster creation requested");
                Ok(out)
            }
            Err(err) => {
                warn!(subnet = %request.subnet_id, %err, "cluster creation failed, keeping subnet claim");
                Err(err.into())
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn describe(&self, name: &str) -> Result<Value, ProvisionError<R::Error, V::Error>> {
        validate_name(name)?;
        Ok(self.control.describe(name).await?)
    }

    /// Delete the cluster `name` and free its subnet claims. Claims are kept
    /// if the control plane refuses the delete.
    #[instrument(skip(self))]
    pub async fn delete(&self, name: &str) -> Result<Value, ProvisionError<R::Error, V::Error>> {
        validate_name(name)?;
        let out = self.control.delete(name).await?;
        let released = self.leases.release_cluster(name).await?;
        info!(?released, "cluster deletion requested");
        Ok(out)
    }

    /// every subnet claim in the registry
    pub async fn claims(&self) -> Result<Vec<Claim>, ProvisionError<R::Error, V::Error>> {
        Ok(self.leases.claims().await?)
    }

    /// Free the claims of `name` without touching the cluster, for clusters
    /// that were removed out of band.
    pub async fn release(&self, name: &str) -> Result<Vec<String>, ProvisionError<R::Error, V::Error>> {
        validate_name(name)?;
        Ok(self.leases.release_cluster(name).await?)
    }
}

/// Cluster names start with a letter and contain only letters, digits and
/// hyphens.
pub fn validate_name<R, V>(name: &str) -> Result<(), ProvisionError<R, V>> {
    let invalid = |reason: &str| {
        Err(ProvisionError::InvalidRequest(format!(
            "invalid cluster name {name:?}: {reason}"
        )))
    };
    let Some(first) = name.chars().next() else {
        return invalid("must not be empty");
    };
    if !first.is_ascii_alphabetic() {
        return invalid("must start with a letter");
    }
    if name.len() > MAX_CLUSTER_NAME_LEN {
        return invalid("too long");
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return invalid("only letters, digits and '-' are allowed");
    }
    Ok(())
}

#[derive(Debug, Error)]
pub enum ProvisionError<R, V> {
    #[error("{0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Lease(#[from] LeaseError<R>),
    #[error(transparent)]
    Resolve(#[from] ResolveError<V>),
    #[error(transparent)]
    Control(#[from] ControlError),
}

impl<R, V> ProvisionError<R, V> {
    /// the request itself is wrong, as opposed to the environment
    pub fn is_invalid_request(&self) -> bool {
        matches!(
            self,
            ProvisionError::InvalidRequest(_)
                | ProvisionError::Lease(LeaseError::EmptyClusterName)
        )
    }
}

#[cfg(test)]
mod tests {
    use std::{
        convert::Infallible,
        sync::{Arc, Mutex},
        time::Duration,
    };

    use async_trait::async_trait;
    use resource_resolver::{ResourceKind, StaticInventory, TaggedResource, Tags};
    use serde_json::json;
    use subnet_lease::{BackoffPolicy, MemoryRegistry, StaticSubnets};
    use tracing_test::traced_test;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Create(ClusterRequest),
        Describe(String),
        Delete(String),
    }

    /// records calls, fails every call when `failing` is set
    #[derive(Debug, Clone, Default)]
    struct FakeControl {
        calls: Arc<Mutex<Vec<Call>>>,
        failing: bool,
    }

    impl FakeControl {
        fn failing() -> Self {
            Self {
                failing: true,
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn answer(&self, call: Call) -> Result<Value, ControlError> {
            self.calls.lock().unwrap().push(call);
            if self.failing {
                return Err(ControlError::Decode {
                    command: "pcluster fake".into(),
                    source: serde_json::from_str::<Value>("not json").unwrap_err(),
                });
            }
            Ok(json!({ "clusterStatus": "CREATE_IN_PROGRESS" }))
        }
    }

    #[async_trait]
    impl ClusterControl for FakeControl {
        async fn create(&self, request: &ClusterRequest) -> Result<Value, ControlError> {
            self.answer(Call::Create(request.clone()))
        }
        async fn describe(&self, cluster: &str) -> Result<Value, ControlError> {
            self.answer(Call::Describe(cluster.to_owned()))
        }
        async fn delete(&self, cluster: &str) -> Result<Value, ControlError> {
            self.answer(Call::Delete(cluster.to_owned()))
        }
    }

    fn goal() -> Tags {
        [("HPC_Goal", "compute_cluster")].into_iter().collect()
    }

    fn billed() -> Tags {
        [("HPC_Goal", "compute_cluster"), ("SBO_Billing", "hpc")]
            .into_iter()
            .collect()
    }

    fn resources() -> StaticInventory {
        StaticInventory::new()
            .with(
                ResourceKind::KeyPair,
                [TaggedResource::new("compute-cluster-key", goal())],
            )
            .with(
                ResourceKind::FileSystem,
                [
                    TaggedResource::new("fs-123", billed()),
                    TaggedResource::new("fs-234", goal()),
                ],
            )
            .with(
                ResourceKind::SecurityGroup,
                [TaggedResource::new("sg-1", goal())],
            )
    }

    type TestProvisioner =
        Provisioner<MemoryRegistry, StaticSubnets, StaticInventory, FakeControl>;

    fn provisioner(
        registry: MemoryRegistry,
        resources: StaticInventory,
        control: FakeControl,
    ) -> TestProvisioner {
        let leases = LeaseManager::with_backoff(
            registry,
            StaticSubnets::new(["subnet-1", "subnet-2"]),
            BackoffPolicy::new(1, Duration::ZERO),
            TokioSleep,
        );
        Provisioner::new(leases, ResourceResolver::with_default_tags(resources), control)
    }

    #[tokio::test]
    #[traced_test]
    async fn create_claims_subnet_and_passes_resources() {
        let registry = MemoryRegistry::new();
        let control = FakeControl::default();
        let prov = provisioner(registry.clone(), resources(), control.clone());

        let out = prov.create("tenant-a").await.unwrap();

        assert_eq!(out["clusterStatus"], "CREATE_IN_PROGRESS");
        assert_eq!(
            control.calls(),
            vec![Call::Create(ClusterRequest {
                name: "tenant-a".into(),
                subnet_id: "subnet-1".into(),
                keypair: "compute-cluster-key".into(),
                filesystem_id: "fs-123".into(),
                security_group_id: "sg-1".into(),
            })]
        );
        assert_eq!(
            registry.get("subnet-1").await.unwrap(),
            Some(Claim::new("subnet-1", "tenant-a"))
        );
        assert!(logs_contain("cluster creation requested"));
    }

    #[tokio::test]
    async fn create_twice_reuses_the_claim() {
        let registry = MemoryRegistry::new();
        let control = FakeControl::default();
        let prov = provisioner(registry.clone(), resources(), control.clone());

        prov.create("tenant-a").await.unwrap();
        prov.create("tenant-a").await.unwrap();

        let subnets = control
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Create(req) => Some(req.subnet_id),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(subnets, vec!["subnet-1", "subnet-1"]);
        assert_eq!(registry.scan_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unresolvable_resource_claims_nothing() {
        let registry = MemoryRegistry::new();
        let control = FakeControl::default();
        let resources = resources().with(
            ResourceKind::SecurityGroup,
            [TaggedResource::new("sg-2", goal())],
        );
        let prov = provisioner(registry.clone(), resources, control.clone());

        let err = prov.create("tenant-a").await.unwrap_err();

        match err {
            ProvisionError::Resolve(ResolveError::CouldNotDetermineSecurityGroup {
                candidates,
            }) => assert_eq!(candidates, vec!["sg-1", "sg-2"]),
            other => panic!("unexpected error {other:?}"),
        }
        assert!(registry.scan_all().await.unwrap().is_empty());
        assert!(control.calls().is_empty());
    }

    #[tokio::test]
    async fn out_of_subnets_does_not_reach_control() {
        let registry = MemoryRegistry::with_claims([
            Claim::new("subnet-1", "tenant-x"),
            Claim::new("subnet-2", "tenant-y"),
        ]);
        let control = FakeControl::default();
        let prov = provisioner(registry, resources(), control.clone());

        let err = prov.create("tenant-a").await.unwrap_err();

        assert!(matches!(
            err,
            ProvisionError::Lease(LeaseError::OutOfSubnets { pool_size: 2, .. })
        ));
        assert!(control.calls().is_empty());
    }

    #[tokio::test]
    #[traced_test]
    async fn failed_create_keeps_claim() {
        let registry = MemoryRegistry::new();
        let prov = provisioner(registry.clone(), resources(), FakeControl::failing());

        let err = prov.create("tenant-a").await.unwrap_err();

        assert!(matches!(err, ProvisionError::Control(_)));
        assert_eq!(
            registry.scan_all().await.unwrap(),
            vec![Claim::new("subnet-1", "tenant-a")]
        );
        assert!(logs_contain("keeping subnet claim"));
    }

    #[tokio::test]
    async fn delete_releases_claims() {
        let registry = MemoryRegistry::with_claims([
            Claim::new("subnet-1", "tenant-a"),
            Claim::new("subnet-2", "tenant-b"),
        ]);
        let control = FakeControl::default();
        let prov = provisioner(registry.clone(), resources(), control.clone());

        prov.delete("tenant-a").await.unwrap();

        assert_eq!(control.calls(), vec![Call::Delete("tenant-a".into())]);
        assert_eq!(
            registry.scan_all().await.unwrap(),
            vec![Claim::new("subnet-2", "tenant-b")]
        );
    }

    #[tokio::test]
    async fn refused_delete_keeps_claims() {
        let registry = MemoryRegistry::with_claims([Claim::new("subnet-1", "tenant-a")]);
        let prov = provisioner(registry.clone(), resources(), FakeControl::failing());

        assert!(prov.delete("tenant-a").await.is_err());
        assert_eq!(registry.scan_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn describe_delegates() {
        let control = FakeControl::default();
        let prov = provisioner(MemoryRegistry::new(), resources(), control.clone());

        prov.describe("tenant-a").await.unwrap();

        assert_eq!(control.calls(), vec![Call::Describe("tenant-a".into())]);
    }

    #[tokio::test]
    async fn release_and_claims() {
        let registry = MemoryRegistry::with_claims([
            Claim::new("subnet-1", "tenant-a"),
            Claim::new("subnet-2", "tenant-a"),
        ]);
        let control = FakeControl::default();
        let prov = provisioner(registry, resources(), control.clone());

        assert_eq!(prov.claims().await.unwrap().len(), 2);
        assert_eq!(
            prov.release("tenant-a").await.unwrap(),
            vec!["subnet-1", "subnet-2"]
        );
        assert!(prov.claims().await.unwrap().is_empty());
        assert!(control.calls().is_empty());
    }

    #[tokio::test]
    async fn invalid_names_are_rejected_up_front() {
        let control = FakeControl::default();
        let prov = provisioner(MemoryRegistry::new(), resources(), control.clone());

        let long = "a".repeat(61);
        for name in ["", "1tenant", "tenant_a", "tenant a", long.as_str()] {
            let err = prov.create(name).await.unwrap_err();
            assert!(err.is_invalid_request(), "{name:?} should be rejected");
            assert!(prov.delete(name).await.unwrap_err().is_invalid_request());
        }
        assert!(control.calls().is_empty());
    }

    #[test]
    fn valid_names() {
        let long = "a".repeat(MAX_CLUSTER_NAME_LEN);
        for name in ["tenant-a", "A", "proj42-vlab", long.as_str()] {
            assert!(
                validate_name::<Infallible, Infallible>(name).is_ok(),
                "{name:?} should be accepted"
            );
        }
    }
}
