use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, bail};
use tracing::debug;

pub mod wire;

use wire::{BackendMode, ClusterSettings, InventorySource, NatsSecurityMode, Resource, TagPair};

/// provisioner config, validated from [`wire::Config`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionerConfig {
    registry: RegistryConfig,
    inventory: InventoryConfig,
    tags: TagConfig,
    backoff: BackoffConfig,
    cluster: ClusterSettings,
    path: Option<PathBuf>,
}

/// which registry holds subnet claims
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryConfig {
    Memory,
    Nats(NatsConfig),
}

/// connection settings for the NATS claim registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatsConfig {
    pub servers: Vec<String>,
    pub bucket: String,
    pub key_prefix: String,
    pub security_mode: NatsSecurityMode,
    pub username: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
    pub nkey_seed_path: Option<PathBuf>,
    pub tls_cert_path: Option<PathBuf>,
    pub tls_key_path: Option<PathBuf>,
    pub tls_ca_path: Option<PathBuf>,
    pub creds_file_path: Option<PathBuf>,
    pub connect_timeout: Option<Duration>,
    pub connect_retry_max: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryConfig {
    pub source: InventorySource,
    pub subnets: Vec<String>,
    pub keypairs: Vec<Resource>,
    pub filesystems: Vec<Resource>,
    pub security_groups: Vec<Resource>,
    pub aws_binary: PathBuf,
    pub region: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagConfig {
    pub goal: TagPair,
    pub billing: TagPair,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    pub attempts: u32,
    pub delay: Duration,
}

impl ProvisionerConfig {
    /// attempts to decode the config first as JSON, then YAML, finally erroring if neither work
    pub fn parse<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("failed to find config at {}", &path.display()))?;
        let mut config = Self::new(s)?;
        config.path = Some(path.to_path_buf());
        debug!(?config);
        Ok(config)
    }

    /// attempts to decode the config first as JSON, then YAML, finally erroring if neither work
    pub fn parse_str<S: AsRef<str>>(s: S) -> Result<Self> {
        let config = Self::new(s)?;
        debug!(?config);
        Ok(config)
    }

    fn new<S: AsRef<str>>(s: S) -> Result<Self> {
        let s = s.as_ref();
        let cfg = match serde_json::from_str::<wire::Config>(s) {
            Ok(cfg) => cfg,
            Err(json_err) => serde_yaml::from_str::<wire::Config>(s)
                .with_context(|| format!("config is neither JSON ({json_err}) nor YAML"))?,
        };
        Self::try_from(cfg)
    }

    pub fn registry(&self) -> &RegistryConfig {
        &self.registry
    }
    pub fn inventory(&self) -> &InventoryConfig {
        &self.inventory
    }
    pub fn tags(&self) -> &TagConfig {
        &self.tags
    }
    pub fn backoff(&self) -> BackoffConfig {
        self.backoff
    }
    pub fn cluster(&self) -> &ClusterSettings {
        &self.cluster
    }
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        // the default wire config always validates
        let cfg = wire::Config::default();
        Self {
            registry: RegistryConfig::Memory,
            inventory: cfg.inventory.into(),
            tags: cfg.tags.into(),
            backoff: BackoffConfig {
                attempts: cfg.backoff.attempts,
                delay: Duration::from_secs(cfg.backoff.delay),
            },
            cluster: cfg.cluster,
            path: None,
        }
    }
}

impl TryFrom<wire::Config> for ProvisionerConfig {
    type Error = anyhow::Error;

    fn try_from(cfg: wire::Config) -> Result<Self> {
        let registry = match cfg.registry.backend {
            BackendMode::Memory => RegistryConfig::Memory,
            BackendMode::Nats => {
                let nats = cfg
                    .registry
                    .nats
                    .context("registry backend is nats but no `registry.nats` section was given")?;
                RegistryConfig::Nats(NatsConfig::try_from(nats)?)
            }
        };

        if cfg.backoff.attempts == 0 {
            bail!("backoff.attempts must be at least 1");
        }
        let backoff = BackoffConfig {
            attempts: cfg.backoff.attempts,
            delay: Duration::from_secs(cfg.backoff.delay),
        };

        if cfg.cluster.min_count > cfg.cluster.max_count {
            bail!(
                "cluster.min_count ({}) is larger than cluster.max_count ({})",
                cfg.cluster.min_count,
                cfg.cluster.max_count
            );
        }

        Ok(Self {
            registry,
            inventory: cfg.inventory.into(),
            tags: cfg.tags.into(),
            backoff,
            cluster: cfg.cluster,
            path: None,
        })
    }
}

impl TryFrom<wire::Nats> for NatsConfig {
    type Error = anyhow::Error;

    fn try_from(nats: wire::Nats) -> Result<Self> {
        if nats.servers.is_empty() {
            bail!("registry.nats.servers must list at least one server");
        }
        if nats.bucket.trim().is_empty() {
            bail!("registry.nats.bucket must not be empty");
        }
        Ok(Self {
            servers: nats.servers,
            bucket: nats.bucket,
            key_prefix: nats.key_prefix,
            security_mode: nats.security_mode,
            username: nats.username,
            password: nats.password,
            token: nats.token,
            nkey_seed_path: nats.nkey_seed_path,
            tls_cert_path: nats.tls_cert_path,
            tls_key_path: nats.tls_key_path,
            tls_ca_path: nats.tls_ca_path,
            creds_file_path: nats.creds_file_path,
            connect_timeout: nats.connect_timeout.map(Duration::from_secs),
            connect_retry_max: nats.connect_retry_max,
        })
    }
}

impl From<wire::Inventory> for InventoryConfig {
    fn from(inv: wire::Inventory) -> Self {
        Self {
            source: inv.source,
            subnets: inv.subnets,
            keypairs: inv.keypairs,
            filesystems: inv.filesystems,
            security_groups: inv.security_groups,
            aws_binary: inv.aws_binary,
            region: inv.region,
        }
    }
}

impl From<wire::TagConfig> for TagConfig {
    fn from(tags: wire::TagConfig) -> Self {
        Self {
            goal: tags.goal,
            billing: tags.billing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static SAMPLE: &str = include_str!("../sample/config.yaml");

    #[test]
    fn test_sample_yaml() {
        let cfg = ProvisionerConfig::parse_str(SAMPLE).unwrap();
        let RegistryConfig::Nats(nats) = cfg.registry() else {
            panic!("expected nats registry");
        };
        assert_eq!(nats.servers, vec!["nats://127.0.0.1:4222".to_owned()]);
        assert_eq!(nats.security_mode, NatsSecurityMode::UserPassword);
        assert_eq!(nats.connect_timeout, Some(Duration::from_secs(5)));
        assert_eq!(nats.key_prefix, "subnet");
        assert_eq!(cfg.inventory().source, InventorySource::Static);
        assert_eq!(cfg.inventory().filesystems[0].id, "fs-0123456789abcdef0");
        assert_eq!(cfg.tags().billing.value, "hpc");
        assert_eq!(
            cfg.backoff(),
            BackoffConfig {
                attempts: 2,
                delay: Duration::from_secs(10)
            }
        );
        assert_eq!(cfg.cluster().region.as_deref(), Some("us-east-1"));
        assert!(cfg.path().is_none());
    }

    #[test]
    fn test_json_config() {
        let cfg = ProvisionerConfig::parse_str(
            r#"{
                "inventory": { "source": "aws_cli", "region": "eu-west-1" },
                "backoff": { "attempts": 5, "delay": "1m" }
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.registry(), &RegistryConfig::Memory);
        assert_eq!(cfg.inventory().source, InventorySource::AwsCli);
        assert_eq!(cfg.inventory().aws_binary, PathBuf::from("aws"));
        assert_eq!(cfg.backoff().attempts, 5);
        assert_eq!(cfg.backoff().delay, Duration::from_secs(60));
    }

    #[test]
    fn test_default_matches_empty_config() {
        let cfg = ProvisionerConfig::parse_str("{}").unwrap();
        assert_eq!(cfg, ProvisionerConfig::default());
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let err = ProvisionerConfig::parse_str("backoff:\n  attempts: 0\n").unwrap_err();
        assert!(err.to_string().contains("at least 1"));
    }

    #[test]
    fn test_nats_backend_requires_section() {
        let err = ProvisionerConfig::parse_str("registry:\n  backend: nats\n").unwrap_err();
        assert!(err.to_string().contains("registry.nats"));
    }

    #[test]
    fn test_nats_backend_requires_servers() {
        let err = ProvisionerConfig::parse_str(
            "registry:\n  backend: nats\n  nats:\n    servers: []\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("at least one server"));
    }

    #[test]
    fn test_min_count_above_max_rejected() {
        let err =
            ProvisionerConfig::parse_str("cluster:\n  min_count: 5\n  max_count: 2\n").unwrap_err();
        assert!(err.to_string().contains("min_count"));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(ProvisionerConfig::parse_str("registry: [1, 2").is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = ProvisionerConfig::parse("/definitely/not/here.yaml").unwrap_err();
        assert!(err.to_string().contains("failed to find config"));
    }
}
