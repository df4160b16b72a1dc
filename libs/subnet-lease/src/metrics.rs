//! Subnet claim metrics.
//!
//! Metrics are lazily initialized on first access via `lazy_static!`.

use lazy_static::lazy_static;
use prometheus::{IntCounter, register_int_counter};

lazy_static! {
    /// Count of subnets newly claimed and confirmed
    pub static ref SUBNET_CLAIMS_CREATED: IntCounter = register_int_counter!(
        "subnet_claims_created",
        "count of subnets newly claimed and confirmed by read back"
    ).unwrap();

    /// Count of claims answered from an existing claim held by the cluster
    pub static ref SUBNET_CLAIMS_REUSED: IntCounter = register_int_counter!(
        "subnet_claims_reused",
        "count of claim requests answered by a claim the cluster already held"
    ).unwrap();

    /// Count of conditional inserts refused because the subnet was taken
    pub static ref SUBNET_CLAIM_CONFLICTS: IntCounter = register_int_counter!(
        "subnet_claim_conflicts",
        "count of conditional inserts refused because the subnet was already registered"
    ).unwrap();

    /// Count of inserts whose read back showed another owner
    pub static ref SUBNET_CLAIM_RACES_LOST: IntCounter = register_int_counter!(
        "subnet_claim_races_lost",
        "count of accepted inserts whose read back showed a different owner"
    ).unwrap();

    /// Count of duplicate claims freed while collapsing a cluster's claims
    pub static ref SUBNET_DUPLICATE_CLAIMS_FREED: IntCounter = register_int_counter!(
        "subnet_duplicate_claims_freed",
        "count of duplicate claims freed for a single cluster"
    ).unwrap();

    /// Count of claim attempts that found no free subnet
    pub static ref SUBNET_POOL_EXHAUSTED: IntCounter = register_int_counter!(
        "subnet_pool_exhausted",
        "count of claim attempts that found every subnet in use"
    ).unwrap();

    /// Count of claims deleted from the registry
    pub static ref SUBNET_CLAIMS_RELEASED: IntCounter = register_int_counter!(
        "subnet_claims_released",
        "count of subnet claims deleted from the registry"
    ).unwrap();
}
