use std::{collections::HashMap, convert::Infallible};

use async_trait::async_trait;

use crate::{ResourceInventory, ResourceKind, TagFilter, TaggedResource};

/// Resources known up front, usually from config. Filtering happens locally.
#[derive(Debug, Clone, Default)]
pub struct StaticInventory {
    resources: HashMap<ResourceKind, Vec<TaggedResource>>,
}

impl StaticInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// add resources of `kind`, keeping insertion order
    pub fn with(
        mut self,
        kind: ResourceKind,
        resources: impl IntoIterator<Item = TaggedResource>,
    ) -> Self {
        self.resources.entry(kind).or_default().extend(resources);
        self
    }
}

#[async_trait]
impl ResourceInventory for StaticInventory {
    type Error = Infallible;

    async fn list_matching(
        &self,
        kind: ResourceKind,
        filter: &TagFilter,
    ) -> Result<Vec<TaggedResource>, Self::Error> {
        Ok(self
            .resources
            .get(&kind)
            .map(|resources| {
                resources
                    .iter()
                    .filter(|resource| filter.matches(&resource.tags))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
