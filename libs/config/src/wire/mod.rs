use std::{collections::BTreeMap, path::PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize, de};

/// top-level config type
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub registry: Registry,
    #[serde(default)]
    pub inventory: Inventory,
    #[serde(default)]
    pub tags: TagConfig,
    #[serde(default)]
    pub backoff: Backoff,
    #[serde(default)]
    pub cluster: ClusterSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct Registry {
    #[serde(default)]
    pub backend: BackendMode,
    pub nats: Option<Nats>,
}

/// where subnet claims are stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendMode {
    /// in-process only, claims are gone when the process exits
    #[default]
    Memory,
    /// NATS JetStream key-value bucket
    Nats,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Nats {
    pub servers: Vec<String>,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    #[serde(default)]
    pub security_mode: NatsSecurityMode,
    pub username: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
    pub nkey_seed_path: Option<PathBuf>,
    pub tls_cert_path: Option<PathBuf>,
    pub tls_key_path: Option<PathBuf>,
    pub tls_ca_path: Option<PathBuf>,
    pub creds_file_path: Option<PathBuf>,
    #[serde(default, deserialize_with = "deserialize_optional_duration")]
    pub connect_timeout: Option<u64>,
    #[serde(default = "default_connect_retry_max")]
    pub connect_retry_max: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NatsSecurityMode {
    #[default]
    None,
    UserPassword,
    Token,
    Nkey,
    Tls,
    CredsFile,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Inventory {
    #[serde(default)]
    pub source: InventorySource,
    #[serde(default)]
    pub subnets: Vec<String>,
    #[serde(default)]
    pub keypairs: Vec<Resource>,
    #[serde(default)]
    pub filesystems: Vec<Resource>,
    #[serde(default)]
    pub security_groups: Vec<Resource>,
    #[serde(default = "default_aws_binary")]
    pub aws_binary: PathBuf,
    pub region: Option<String>,
}

impl Default for Inventory {
    fn default() -> Self {
        Self {
            source: InventorySource::default(),
            subnets: Vec::new(),
            keypairs: Vec::new(),
            filesystems: Vec::new(),
            security_groups: Vec::new(),
            aws_binary: default_aws_binary(),
            region: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InventorySource {
    /// lists from this file
    #[default]
    Static,
    /// ask the `aws` command line tool
    AwsCli,
}

/// a statically configured resource and its tags
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Resource {
    pub id: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TagConfig {
    #[serde(default = "default_goal_tag")]
    pub goal: TagPair,
    #[serde(default = "default_billing_tag")]
    pub billing: TagPair,
}

impl Default for TagConfig {
    fn default() -> Self {
        Self {
            goal: default_goal_tag(),
            billing: default_billing_tag(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TagPair {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct Backoff {
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    /// seconds
    #[serde(default = "default_delay", deserialize_with = "deserialize_duration")]
    pub delay: u64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            delay: default_delay(),
        }
    }
}

/// what goes into the rendered cluster configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ClusterSettings {
    #[serde(default = "default_pcluster_binary")]
    pub pcluster_binary: PathBuf,
    pub region: Option<String>,
    #[serde(default = "default_os")]
    pub os: String,
    #[serde(default = "default_head_node_instance_type")]
    pub head_node_instance_type: String,
    #[serde(default = "default_compute_instance_type")]
    pub compute_instance_type: String,
    #[serde(default = "default_queue_name")]
    pub queue_name: String,
    #[serde(default)]
    pub min_count: u32,
    #[serde(default = "default_max_count")]
    pub max_count: u32,
    #[serde(default = "default_mount_dir")]
    pub mount_dir: String,
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            pcluster_binary: default_pcluster_binary(),
            region: None,
            os: default_os(),
            head_node_instance_type: default_head_node_instance_type(),
            compute_instance_type: default_compute_instance_type(),
            queue_name: default_queue_name(),
            min_count: 0,
            max_count: default_max_count(),
            mount_dir: default_mount_dir(),
            work_dir: default_work_dir(),
        }
    }
}

pub fn default_bucket() -> String {
    "subnet_claims".to_owned()
}

pub fn default_key_prefix() -> String {
    "subnet".to_owned()
}

pub const fn default_connect_retry_max() -> u32 {
    3
}

pub fn default_aws_binary() -> PathBuf {
    PathBuf::from("aws")
}

pub fn default_goal_tag() -> TagPair {
    TagPair {
        key: "HPC_Goal".to_owned(),
        value: "compute_cluster".to_owned(),
    }
}

pub fn default_billing_tag() -> TagPair {
    TagPair {
        key: "SBO_Billing".to_owned(),
        value: "hpc".to_owned(),
    }
}

pub const fn default_attempts() -> u32 {
    2
}

pub const fn default_delay() -> u64 {
    10
}

pub fn default_pcluster_binary() -> PathBuf {
    PathBuf::from("pcluster")
}

pub fn default_os() -> String {
    "alinux2".to_owned()
}

pub fn default_head_node_instance_type() -> String {
    "t3.medium".to_owned()
}

pub fn default_compute_instance_type() -> String {
    "c5.xlarge".to_owned()
}

pub fn default_queue_name() -> String {
    "compute".to_owned()
}

pub const fn default_max_count() -> u32 {
    4
}

pub fn default_mount_dir() -> String {
    "/shared".to_owned()
}

pub fn default_work_dir() -> PathBuf {
    std::env::temp_dir().join("provisioner")
}

/// Parse a duration string with optional time units
/// Accepts: "10", "10s", "5m", "1h"
/// If no unit is specified, assumes seconds
pub(crate) fn parse_duration(s: &str) -> Result<u64> {
    let s = s.trim();
    if s.is_empty() {
        return Err(anyhow::Error::msg("empty duration string"));
    }

    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    // split units
    let (num, unit) = s.split_at(end);
    let num = num.parse::<u64>().context("invalid number")?;

    let num_seconds = match unit.trim() {
        "" | "s" => 1,
        "m" => 60,
        "h" => 3600,
        other => anyhow::bail!(
            "unknown time unit '{}', only 'h', 'm', or 's' are supported",
            other
        ),
    };

    num.checked_mul(num_seconds)
        .context("duration value overflow")
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireDuration {
    Seconds(u64),
    String(String),
}

impl WireDuration {
    fn into_secs<E: de::Error>(self) -> Result<u64, E> {
        match self {
            WireDuration::Seconds(val) => Ok(val),
            WireDuration::String(s) => parse_duration(&s).map_err(E::custom),
        }
    }
}

fn deserialize_duration<'de, D>(de: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    WireDuration::deserialize(de)?.into_secs()
}

fn deserialize_optional_duration<'de, D>(de: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<WireDuration>::deserialize(de)?
        .map(WireDuration::into_secs)
        .transpose()
}
