//! # resource-resolver
//!
//! Lookups for the resources a cluster shares with everything else in the
//! account: the ssh keypair, the shared filesystem and the security group.
//! Each one is found by tag and there must be exactly one match, anything
//! else is a configuration problem that retrying won't fix.
//!
//! The inventory is behind the `ResourceInventory` trait, filtering is the
//! pure [`TagFilter::matches`] predicate.
use std::fmt;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

pub mod inventory;
pub mod tags;

pub use inventory::StaticInventory;
pub use tags::{Tag, TagFilter, Tags};

/// default tag every provisioning resource carries
pub const DEFAULT_GOAL_TAG: (&str, &str) = ("HPC_Goal", "compute_cluster");
/// default accounting co-tag required on filesystems
pub const DEFAULT_BILLING_TAG: (&str, &str) = ("SBO_Billing", "hpc");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    KeyPair,
    FileSystem,
    SecurityGroup,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResourceKind::KeyPair => "keypair",
            ResourceKind::FileSystem => "filesystem",
            ResourceKind::SecurityGroup => "security group",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedResource {
    pub id: String,
    pub tags: Tags,
}

impl TaggedResource {
    pub fn new(id: impl Into<String>, tags: Tags) -> Self {
        Self {
            id: id.into(),
            tags,
        }
    }
}

/// Read-only source of tagged resources. Implementations may filter
/// server side, but must return only resources `filter` matches.
#[async_trait]
pub trait ResourceInventory: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;
    async fn list_matching(
        &self,
        kind: ResourceKind,
        filter: &TagFilter,
    ) -> Result<Vec<TaggedResource>, Self::Error>;
}

#[derive(Debug, Clone)]
pub struct ResourceResolver<I> {
    inventory: I,
    goal: Tag,
    billing: Tag,
}

impl<I: ResourceInventory> ResourceResolver<I> {
    pub fn new(inventory: I, goal: Tag, billing: Tag) -> Self {
        Self {
            inventory,
            goal,
            billing,
        }
    }

    /// resolver using the default goal and billing tags
    pub fn with_default_tags(inventory: I) -> Self {
        Self::new(
            inventory,
            Tag::new(DEFAULT_GOAL_TAG.0, DEFAULT_GOAL_TAG.1),
            Tag::new(DEFAULT_BILLING_TAG.0, DEFAULT_BILLING_TAG.1),
        )
    }

    pub fn goal(&self) -> &Tag {
        &self.goal
    }

    pub fn billing(&self) -> &Tag {
        &self.billing
    }

    pub async fn resolve_keypair(&self) -> Result<String, ResolveError<I::Error>> {
        let found = self.goal_tagged(ResourceKind::KeyPair).await?;
        exactly_one(found)
            .map_err(|candidates| ResolveError::CouldNotDetermineKeyPair { candidates })
    }

    /// Filesystems must also carry the billing co-tag. Candidates without it
    /// are dropped before counting rather than treated as an error.
    pub async fn resolve_filesystem(&self) -> Result<String, ResolveError<I::Error>> {
        let found = self.goal_tagged(ResourceKind::FileSystem).await?;
        let (billed, unbilled): (Vec<_>, Vec<_>) = found
            .into_iter()
            .partition(|fs| fs.tags.has(&self.billing));
        if !unbilled.is_empty() {
            debug!(
                billing = %self.billing,
                skipped = ?unbilled.iter().map(|fs| &fs.id).collect::<Vec<_>>(),
                "ignoring filesystems without billing tag"
            );
        }
        if billed.is_empty() {
            let candidates = unbilled.into_iter().map(|fs| fs.id).collect();
            warn!(?candidates, "no filesystem carries the billing tag");
            return Err(ResolveError::CouldNotDetermineFileSystem { candidates });
        }
        exactly_one(billed)
            .map_err(|candidates| ResolveError::CouldNotDetermineFileSystem { candidates })
    }

    pub async fn resolve_security_group(&self) -> Result<String, ResolveError<I::Error>> {
        let found = self.goal_tagged(ResourceKind::SecurityGroup).await?;
        exactly_one(found)
            .map_err(|candidates| ResolveError::CouldNotDetermineSecurityGroup { candidates })
    }

    async fn goal_tagged(
        &self,
        kind: ResourceKind,
    ) -> Result<Vec<TaggedResource>, ResolveError<I::Error>> {
        let filter = TagFilter::new([self.goal.clone()]);
        let found = self
            .inventory
            .list_matching(kind, &filter)
            .await
            .map_err(ResolveError::Inventory)?;
        debug!(%kind, goal = %self.goal, count = found.len(), "listed tagged resources");
        Ok(found)
    }
}

/// the single id, or every candidate id when there isn't exactly one
fn exactly_one(mut found: Vec<TaggedResource>) -> Result<String, Vec<String>> {
    if found.len() == 1
        && let Some(resource) = found.pop()
    {
        return Ok(resource.id);
    }
    Err(found.into_iter().map(|resource| resource.id).collect())
}

#[derive(Error, Debug)]
pub enum ResolveError<E> {
    #[error("could not determine keypair: {candidates:?}")]
    CouldNotDetermineKeyPair { candidates: Vec<String> },
    #[error("could not determine filesystem: {candidates:?}")]
    CouldNotDetermineFileSystem { candidates: Vec<String> },
    #[error("could not determine security group: {candidates:?}")]
    CouldNotDetermineSecurityGroup { candidates: Vec<String> },
    #[error("error listing resources")]
    Inventory(#[source] E),
}

impl<E> ResolveError<E> {
    /// the candidates found, for the could-not-determine variants
    pub fn candidates(&self) -> Option<&[String]> {
        match self {
            ResolveError::CouldNotDetermineKeyPair { candidates }
            | ResolveError::CouldNotDetermineFileSystem { candidates }
            | ResolveError::CouldNotDetermineSecurityGroup { candidates } => Some(candidates),
            ResolveError::Inventory(_) => None,
        }
    }
}
