//! Merchant Directory
//!
//! Maps wallet addresses to merchant identities, creating one on first sight.

use std::sync::Arc;

use crate::error::Result;
use crate::model::{normalize_wallet, Merchant};
use crate::store::{BillingStore, Insert};

/// Wallet → merchant resolution
#[derive(Clone)]
pub struct MerchantDirectory {
    store: Arc<dyn BillingStore>,
}

impl MerchantDirectory {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    /// Find the merchant for `wallet`, creating it if unseen
    ///
    /// Concurrent callers for the same new wallet converge on one row: the
    /// store rejects the second insert and hands back the winner.
    pub async fn resolve_or_create(&self, wallet: &str) -> Result<Merchant> {
        Ok(self.register(wallet).await?.0)
    }

    /// Idempotent registration; the flag is true when a new merchant was created
    pub async fn register(&self, wallet: &str) -> Result<(Merchant, bool)> {
        let wallet = normalize_wallet(wallet);

        if let Some(existing) = self.store.merchant_by_wallet(&wallet).await? {
            return Ok((existing, false));
        }

        match self.store.insert_merchant(Merchant::new(&wallet)).await? {
            Insert::Created(merchant) => {
                tracing::info!(
                    merchant_id = %merchant.id,
                    wallet = %merchant.wallet,
                    "Created merchant"
                );
                Ok((merchant, true))
            }
            Insert::Existing(merchant) => {
                tracing::debug!(wallet = %merchant.wallet, "Merchant created concurrently, reusing");
                Ok((merchant, false))
            }
        }
    }

    /// Look up without creating
    pub async fn lookup(&self, wallet: &str) -> Result<Option<Merchant>> {
        self.store.merchant_by_wallet(&normalize_wallet(wallet)).await
    }

    pub async fn by_id(&self, id: uuid::Uuid) -> Result<Option<Merchant>> {
        self.store.merchant_by_id(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_resolve_creates_once() {
        let store = Arc::new(MemoryStore::new());
        let directory = MerchantDirectory::new(store.clone());

        let first = directory.resolve_or_create("0xAbC").await.unwrap();
        let second = directory.resolve_or_create("0xabc").await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.wallet, "0xabc");
        assert_eq!(store.merchant_count().await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_resolution_single_row() {
        let store = Arc::new(MemoryStore::new());
        let directory = MerchantDirectory::new(store.clone());

        let (a, b, c) = tokio::join!(
            directory.resolve_or_create("0xNEW"),
            directory.resolve_or_create("0xnew"),
            directory.resolve_or_create(" 0xNew "),
        );

        let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());
        assert_eq!(a.id, b.id);
        assert_eq!(b.id, c.id);
        assert_eq!(store.merchant_count().await, 1);
    }

    #[tokio::test]
    async fn test_register_reports_creation() {
        let directory = MerchantDirectory::new(Arc::new(MemoryStore::new()));

        let (_, created) = directory.register("0x01").await.unwrap();
        assert!(created);
        let (_, created) = directory.register("0x01").await.unwrap();
        assert!(!created);

        assert!(directory.lookup("0x02").await.unwrap().is_none());
    }
}
