use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use thiserror::Error;
use tracing::trace;

use crate::{Claim, InsertOutcome, Registry};

/// In-process registry. Clones share the same claims, scans return claims
/// in subnet id order.
#[derive(Debug, Clone, Default)]
pub struct MemoryRegistry {
    inner: Arc<Mutex<BTreeMap<String, String>>>,
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("memory registry lock poisoned")]
    Poisoned,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// registry seeded with existing claims
    pub fn with_claims(claims: impl IntoIterator<Item = Claim>) -> Self {
        let claims = claims
            .into_iter()
            .map(|claim| (claim.subnet_id, claim.cluster))
            .collect();
        Self {
            inner: Arc::new(Mutex::new(claims)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, String>>, MemoryError> {
        self.inner.lock().map_err(|_| MemoryError::Poisoned)
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    type Error = MemoryError;

    async fn scan_all(&self) -> Result<Vec<Claim>, Self::Error> {
        Ok(self
            .lock()?
            .iter()
            .map(|(subnet, cluster)| Claim::new(subnet, cluster))
            .collect())
    }

    async fn get(&self, subnet_id: &str) -> Result<Option<Claim>, Self::Error> {
        Ok(self
            .lock()?
            .get(subnet_id)
            .map(|cluster| Claim::new(subnet_id, cluster)))
    }

    async fn insert_if_absent(
        &self,
        subnet_id: &str,
        cluster: &str,
    ) -> Result<InsertOutcome, Self::Error> {
        let mut guard = self.lock()?;
        if guard.contains_key(subnet_id) {
            trace!(subnet_id, "claim exists, not inserting");
            return Ok(InsertOutcome::AlreadyRegistered);
        }
        guard.insert(subnet_id.to_owned(), cluster.to_owned());
        Ok(InsertOutcome::Inserted)
    }

    async fn delete(&self, subnet_id: &str) -> Result<(), Self::Error> {
        self.lock()?.remove(subnet_id);
        Ok(())
    }
}
