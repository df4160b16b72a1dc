//! runs one subcommand against the configured registry and inventories
use serde_json::{Value, json};

use cluster_provisioner::{PclusterCli, Provisioner};
use config::{
    InventoryConfig, ProvisionerConfig,
    wire::{Resource, TagPair},
};
use provisioner_core::{config::cli::Command, prelude::*};
use resource_resolver::{
    ResourceInventory, ResourceKind, ResourceResolver, StaticInventory, Tag, TaggedResource,
};
use subnet_lease::{BackoffPolicy, Claim, LeaseManager, Registry, SubnetInventory, TokioSleep};

pub(crate) fn tag(pair: &TagPair) -> Tag {
    Tag::new(&pair.key, &pair.value)
}

/// resources listed in the config file
pub(crate) fn static_resources(inventory: &InventoryConfig) -> StaticInventory {
    let tagged = |resources: &[Resource]| {
        resources
            .iter()
            .map(|r| TaggedResource::new(r.id.clone(), r.tags.clone().into_iter().collect()))
            .collect::<Vec<_>>()
    };
    StaticInventory::new()
        .with(ResourceKind::KeyPair, tagged(&inventory.keypairs))
        .with(ResourceKind::FileSystem, tagged(&inventory.filesystems))
        .with(ResourceKind::SecurityGroup, tagged(&inventory.security_groups))
}

pub(crate) async fn execute<R, I, V>(
    command: Command,
    cfg: &ProvisionerConfig,
    registry: R,
    subnets: I,
    resources: V,
) -> Result<()>
where
    R: Registry,
    I: SubnetInventory,
    V: ResourceInventory,
{
    let tags = cfg.tags();
    let (goal, billing) = (tag(&tags.goal), tag(&tags.billing));
    let backoff = cfg.backoff();

    let leases = LeaseManager::with_backoff(
        registry,
        subnets,
        BackoffPolicy::new(backoff.attempts, backoff.delay),
        TokioSleep,
    );
    let resolver = ResourceResolver::new(resources, goal.clone(), billing.clone());
    let control = PclusterCli::new(cfg.cluster().clone(), [goal, billing]);
    let provisioner = Provisioner::new(leases, resolver, control);

    let out = match command {
        Command::Create { cluster } => provisioner.create(&cluster).await?,
        Command::Describe { cluster } => provisioner.describe(&cluster).await?,
        Command::Delete { cluster } => provisioner.delete(&cluster).await?,
        Command::Claims => claims_json(&provisioner.claims().await?),
        Command::Release { cluster } => {
            let released = provisioner.release(&cluster).await?;
            info!(%cluster, count = released.len(), "released subnet claims");
            json!({ "cluster": cluster, "released": released })
        }
    };
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn claims_json(claims: &[Claim]) -> Value {
    claims
        .iter()
        .map(|claim| json!({ "subnet_id": claim.subnet_id, "cluster": claim.cluster }))
        .collect()
}
