use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::models::{
    InitializeTransaction, InitializedTransaction, PaymentError, PaymentProvider, RefundReceipt,
    VerifiedTransaction,
};

/// Contract every payment provider adapter fulfils.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn provider(&self) -> PaymentProvider;

    async fn initialize(
        &self,
        request: &InitializeTransaction,
    ) -> Result<InitializedTransaction, PaymentError>;

    async fn verify(&self, reference: &str) -> Result<VerifiedTransaction, PaymentError>;

    async fn refund(&self, reference: &str, amount_minor: i64) -> Result<RefundReceipt, PaymentError>;

    fn verify_webhook_signature(&self, raw_body: &[u8], signature: &str) -> bool;
}

/// Configured adapters keyed by provider.
#[derive(Clone, Default)]
pub struct PaymentGateways {
    gateways: HashMap<PaymentProvider, Arc<dyn PaymentGateway>>,
}

impl PaymentGateways {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.register(gateway);
        self
    }

    pub fn register(&mut self, gateway: Arc<dyn PaymentGateway>) {
        self.gateways.insert(gateway.provider(), gateway);
    }

    pub fn get(&self, provider: PaymentProvider) -> Result<Arc<dyn PaymentGateway>, PaymentError> {
        self.gateways
            .get(&provider)
            .cloned()
            .ok_or(PaymentError::NotConfigured)
    }

    pub fn is_empty(&self) -> bool {
        self.gateways.is_empty()
    }

    pub fn providers(&self) -> Vec<PaymentProvider> {
        self.gateways.keys().copied().collect()
    }
}
