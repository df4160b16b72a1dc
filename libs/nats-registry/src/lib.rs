//! # nats-registry
//!
//! Subnet claim registry backed by a NATS JetStream key-value bucket, for
//! running several provisioners against one shared set of claims.
//!
//! - **`client`** connects with the configured auth mode, retrying the
//!   initial connect, and opens the claims bucket.
//! - **`NatsRegistry`**, an implementation of `subnet_lease::Registry` whose
//!   conditional insert is the bucket's atomic `create`.

pub mod client;
pub mod error;
pub mod registry;

pub use error::{RegistryError, RegistryResult};
pub use registry::{ClaimRecord, NatsRegistry, claim_key};

/// Connect to NATS, open the claims bucket and check it refuses duplicate
/// creates before handing out the registry.
pub async fn connect(config: &config::NatsConfig) -> RegistryResult<NatsRegistry> {
    let client = client::connect(config).await?;
    let registry = NatsRegistry::open(&client, config).await?;
    registry.check_exclusive_create().await?;
    Ok(registry)
}
