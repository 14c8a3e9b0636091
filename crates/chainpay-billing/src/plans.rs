//! Plan Catalog

use std::sync::Arc;

use chainpay_ledger::U256;
use uuid::Uuid;

use crate::error::{BillingError, Result};
use crate::merchants::MerchantDirectory;
use crate::model::{BillingInterval, Plan};
use crate::store::BillingStore;

/// Creates and lists merchant plans
#[derive(Clone)]
pub struct PlanCatalog {
    store: Arc<dyn BillingStore>,
    merchants: MerchantDirectory,
}

impl PlanCatalog {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self {
            merchants: MerchantDirectory::new(store.clone()),
            store,
        }
    }

    /// Create a plan for an existing merchant
    pub async fn create(
        &self,
        merchant_wallet: &str,
        name: &str,
        amount: U256,
        interval: BillingInterval,
    ) -> Result<Plan> {
        let name = name.trim();
        if name.is_empty() {
            return Err(BillingError::Validation("plan name is required".into()));
        }
        if amount.is_zero() {
            return Err(BillingError::Validation("plan amount must be positive".into()));
        }

        let merchant = self
            .merchants
            .lookup(merchant_wallet)
            .await?
            .ok_or_else(|| BillingError::MerchantNotFound(merchant_wallet.to_string()))?;

        let plan = self
            .store
            .insert_plan(Plan::new(merchant.id, name, amount, interval))
            .await?;

        tracing::info!(
            plan_id = %plan.id,
            merchant_id = %merchant.id,
            interval = %plan.interval,
            "Created plan"
        );
        Ok(plan)
    }

    pub async fn get(&self, plan_id: Uuid) -> Result<Plan> {
        self.store
            .plan_by_id(plan_id)
            .await?
            .ok_or_else(|| BillingError::PlanNotFound(plan_id.to_string()))
    }

    /// Plans for one merchant wallet, or all plans; unknown wallets list nothing
    pub async fn list(&self, merchant_wallet: Option<&str>) -> Result<Vec<Plan>> {
        match merchant_wallet {
            Some(wallet) => match self.merchants.lookup(wallet).await? {
                Some(merchant) => self.store.list_plans(Some(merchant.id)).await,
                None => Ok(Vec::new()),
            },
            None => self.store.list_plans(None).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_create_and_list() {
        let store = Arc::new(MemoryStore::new());
        MerchantDirectory::new(store.clone())
            .register("0xMM")
            .await
            .unwrap();
        let catalog = PlanCatalog::new(store);

        let plan = catalog
            .create("0xmm", "Pro", U256::from(10u8), BillingInterval::Monthly)
            .await
            .unwrap();

        let listed = catalog.list(Some("0xMM")).await.unwrap();
        assert_eq!(listed, vec![plan.clone()]);
        assert_eq!(catalog.get(plan.id).await.unwrap().name, "Pro");
        assert!(catalog.list(Some("0xother")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_merchant() {
        let catalog = PlanCatalog::new(Arc::new(MemoryStore::new()));
        let err = catalog
            .create("0xnobody", "Pro", U256::from(1u8), BillingInterval::Weekly)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::MerchantNotFound(_)));
    }

    #[tokio::test]
    async fn test_rejects_zero_amount() {
        let catalog = PlanCatalog::new(Arc::new(MemoryStore::new()));
        let err = catalog
            .create("0xmm", "Free", U256::ZERO, BillingInterval::Weekly)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }
}
