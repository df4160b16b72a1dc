//! Subnet claims stored in a JetStream KV bucket.
//!
//! One key per claimed subnet, `{prefix}/{subnet id}`, holding a JSON
//! [`ClaimRecord`]. The conditional insert is the bucket's `create`, which
//! only succeeds when the key has no live value.

use std::time::{SystemTime, UNIX_EPOCH};

use async_nats::{
    Client,
    jetstream::kv::{CreateErrorKind, Store},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use config::NatsConfig;
use subnet_lease::{Claim, InsertOutcome, Registry};

use crate::client;
use crate::error::{RegistryError, RegistryResult};

/// Revisions kept per key in the claims bucket.
const CLAIMS_HISTORY: i64 = 16;

/// Value stored under a claim key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub subnet_id: String,
    pub cluster: String,
    pub claimed_at: DateTime<Utc>,
}

impl From<ClaimRecord> for Claim {
    fn from(record: ClaimRecord) -> Self {
        Claim::new(record.subnet_id, record.cluster)
    }
}

/// KV key of the claim on `subnet_id`.
///
/// Letters, digits, `-` and `_` are kept, every other byte becomes `=XX`
/// (hex). `=` is always escaped, so distinct ids never share a key.
pub fn claim_key(prefix: &str, subnet_id: &str) -> String {
    let mut key = String::with_capacity(prefix.len() + 1 + subnet_id.len());
    key.push_str(prefix);
    key.push('/');
    for byte in subnet_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            key.push(char::from(byte));
        } else {
            key.push_str(&format!("={byte:02X}"));
        }
    }
    key
}

fn encode(record: &ClaimRecord) -> RegistryResult<Vec<u8>> {
    serde_json::to_vec(record).map_err(|e| RegistryError::Codec(e.to_string()))
}

fn decode(key: &str, data: &[u8]) -> RegistryResult<ClaimRecord> {
    serde_json::from_slice(data)
        .map_err(|e| RegistryError::Codec(format!("bad claim record at '{key}': {e}")))
}

/// A bucket holds exclusive claims only if the second `create` of a key is refused.
fn check_exclusive(first: InsertOutcome, second: InsertOutcome) -> RegistryResult<()> {
    match (first, second) {
        (InsertOutcome::Inserted, InsertOutcome::AlreadyRegistered) => Ok(()),
        (InsertOutcome::Inserted, InsertOutcome::Inserted) => Err(RegistryError::NotExclusive(
            "a second create of the same key succeeded".into(),
        )),
        (InsertOutcome::AlreadyRegistered, _) => Err(RegistryError::NotExclusive(
            "a fresh key was reported as existing".into(),
        )),
    }
}

#[derive(Debug, Clone)]
pub struct NatsRegistry {
    prefix: String,
    store: Store,
}

impl NatsRegistry {
    /// Open (or create) the configured claims bucket over `client`.
    pub async fn open(client: &Client, config: &NatsConfig) -> RegistryResult<Self> {
        let store = client::open_bucket(client, &config.bucket, CLAIMS_HISTORY).await?;
        debug!(bucket = %config.bucket, prefix = %config.key_prefix, "claims bucket open");
        Ok(Self::with_store(store, &config.key_prefix))
    }

    pub fn with_store(store: Store, prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            store,
        }
    }

    fn key(&self, subnet_id: &str) -> String {
        claim_key(&self.prefix, subnet_id)
    }

    /// KV `create`, the only write that claims go through
    async fn create(&self, key: &str, payload: Vec<u8>) -> RegistryResult<InsertOutcome> {
        match self.store.create(key, payload.into()).await {
            Ok(revision) => {
                trace!(%key, revision, "key created");
                Ok(InsertOutcome::Inserted)
            }
            Err(err) if matches!(err.kind(), CreateErrorKind::AlreadyExists) => {
                Ok(InsertOutcome::AlreadyRegistered)
            }
            Err(err) => Err(RegistryError::Transport(format!(
                "KV create failed for key '{key}': {err}"
            ))),
        }
    }

    /// Create a scratch key twice and expect the second create to be refused,
    /// which is what `insert_if_absent` relies on. The key sits outside the
    /// claim prefix and is purged afterwards.
    pub async fn check_exclusive_create(&self) -> RegistryResult<()> {
        let nonce = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let key = format!("{}-selftest/{}-{nonce}", self.prefix, std::process::id());

        let first = self.create(&key, b"first".to_vec()).await?;
        let second = self.create(&key, b"second".to_vec()).await;
        let purged = self.store.purge(&key).await.map_err(|e| {
            RegistryError::Transport(format!("KV purge failed for key '{key}': {e}"))
        });
        check_exclusive(first, second?)?;
        purged?;
        info!(%key, "claims bucket refuses duplicate creates");
        Ok(())
    }

    async fn load(&self, key: &str) -> RegistryResult<Option<ClaimRecord>> {
        let value = self.store.get(key).await.map_err(|e| {
            RegistryError::Transport(format!("KV read failed for key '{key}': {e}"))
        })?;
        value.map(|bytes| decode(key, &bytes)).transpose()
    }
}

#[async_trait]
impl Registry for NatsRegistry {
    type Error = RegistryError;

    async fn scan_all(&self) -> Result<Vec<Claim>, Self::Error> {
        let scope = format!("{}/", self.prefix);

        let mut keys = self.store.keys().await.map_err(|e| {
            RegistryError::Transport(format!("failed to list claim KV keys: {e}"))
        })?;
        let mut claim_keys = Vec::new();
        while let Some(key) = keys.try_next().await.map_err(|e| {
            RegistryError::Transport(format!("failed reading claim KV keys: {e}"))
        })? {
            if key.starts_with(&scope) {
                claim_keys.push(key);
            }
        }
        claim_keys.sort();

        let mut claims: Vec<Claim> = Vec::with_capacity(claim_keys.len());
        for key in claim_keys {
            // deleted between listing and reading
            if let Some(record) = self.load(&key).await? {
                claims.push(record.into());
            }
        }
        trace!(count = claims.len(), "scanned claims");
        Ok(claims)
    }

    async fn get(&self, subnet_id: &str) -> Result<Option<Claim>, Self::Error> {
        Ok(self.load(&self.key(subnet_id)).await?.map(Claim::from))
    }

    async fn insert_if_absent(
        &self,
        subnet_id: &str,
        cluster: &str,
    ) -> Result<InsertOutcome, Self::Error> {
        let key = self.key(subnet_id);
        let payload = encode(&ClaimRecord {
            subnet_id: subnet_id.to_owned(),
            cluster: cluster.to_owned(),
            claimed_at: Utc::now(),
        })?;

        let outcome = self.create(&key, payload).await?;
        match outcome {
            InsertOutcome::Inserted => debug!(%key, cluster, "claim written"),
            InsertOutcome::AlreadyRegistered => trace!(%key, "claim exists, not inserting"),
        }
        Ok(outcome)
    }

    async fn delete(&self, subnet_id: &str) -> Result<(), Self::Error> {
        let key = self.key(subnet_id);
        self.store
            .delete(&key)
            .await
            .map_err(|e| RegistryError::Transport(format!("KV delete failed for key '{key}': {e}")))
    }
}
