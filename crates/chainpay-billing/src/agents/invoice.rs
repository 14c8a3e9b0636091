use serde::Serialize;
use uuid::Uuid;

use super::{AgentRunner, Scope};
use crate::error::{BillingError, Result};
use crate::model::{to_display_units, Payment};
use crate::prompts::invoice_prompt;

#[derive(Clone, Debug, Serialize)]
pub struct GeneratedInvoice {
    pub payment_id: Uuid,
    pub invoice_number: String,
    /// Display units, 4 decimals
    pub amount: String,
    pub text: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct InvoiceReport {
    pub status: String,
    pub processed: usize,
    pub invoices: Vec<GeneratedInvoice>,
    pub failed: usize,
}

impl InvoiceReport {
    fn empty() -> Self {
        Self {
            status: "no-new-payments".into(),
            processed: 0,
            invoices: Vec::new(),
            failed: 0,
        }
    }
}

impl AgentRunner {
    pub(super) async fn run_invoices(&self, scope: Scope) -> Result<InvoiceReport> {
        if scope == Scope::Unknown {
            return Ok(InvoiceReport::empty());
        }

        let pending = self
            .store
            .payments_pending_invoice(scope.merchant_id(), self.config.invoice_batch)
            .await?;

        if pending.is_empty() {
            return Ok(InvoiceReport::empty());
        }

        let mut report = InvoiceReport {
            status: "ok".into(),
            ..InvoiceReport::empty()
        };

        for payment in pending {
            match self.invoice_one(&payment).await {
                Ok(Some(invoice)) => {
                    report.processed += 1;
                    report.invoices.push(invoice);
                }
                Ok(None) => {
                    tracing::debug!(payment_id = %payment.id, "Invoice written by a concurrent run");
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(payment_id = %payment.id, "Invoice generation failed: {}", e);
                }
            }
        }

        tracing::info!(
            processed = report.processed,
            failed = report.failed,
            "Invoice run complete"
        );
        Ok(report)
    }

    async fn invoice_one(&self, payment: &Payment) -> Result<Option<GeneratedInvoice>> {
        let merchant = self
            .merchants
            .by_id(payment.merchant_id)
            .await?
            .ok_or_else(|| BillingError::MerchantNotFound(payment.merchant_id.to_string()))?;

        let text = self
            .generator
            .generate(&invoice_prompt(&merchant, payment, &self.config.currency_symbol))
            .await?;

        if !self.store.mark_invoice_sent(payment.id, &text).await? {
            return Ok(None);
        }

        Ok(Some(GeneratedInvoice {
            payment_id: payment.id,
            invoice_number: payment.invoice_number(),
            amount: to_display_units(payment.amount),
            text,
        }))
    }
}
