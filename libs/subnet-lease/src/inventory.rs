//! Where candidate subnets come from.
use std::convert::Infallible;

use async_trait::async_trait;

/// The candidate pool of subnets, in the order they should be tried.
/// Implementations only read; subnets are never created or removed here.
#[async_trait]
pub trait SubnetInventory: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;
    async fn list_subnets(&self) -> Result<Vec<String>, Self::Error>;
}

/// fixed list of subnets, usually from config
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticSubnets {
    subnets: Vec<String>,
}

impl StaticSubnets {
    pub fn new<S: Into<String>>(subnets: impl IntoIterator<Item = S>) -> Self {
        Self {
            subnets: subnets.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl SubnetInventory for StaticSubnets {
    type Error = Infallible;

    async fn list_subnets(&self) -> Result<Vec<String>, Self::Error> {
        Ok(self.subnets.clone())
    }
}
