use async_trait::async_trait;
use common::PaymentMethod;
use serde_json::json;
use storage::{Order, Payment, ProviderData};

use crate::adapter::{
    CallbackRequest, Initiation, NormalizedEvent, PaymentAdapter, ProviderReply, Reconciled,
};
use crate::error::{CallbackError, Result};

/// Cash or card on delivery. There is no redirect and no callback; the
/// payment stays pending until settled out of band.
#[derive(Debug, Clone, Copy)]
pub struct OfflineAdapter {
    method: PaymentMethod,
}

impl OfflineAdapter {
    pub fn new(method: PaymentMethod) -> Self {
        Self { method }
    }
}

#[async_trait]
impl PaymentAdapter for OfflineAdapter {
    fn method(&self) -> PaymentMethod {
        self.method
    }

    async fn initiate(&self, _order: &Order, _payment: &Payment) -> Result<Initiation> {
        Ok(Initiation {
            provider_payment_id: None,
            redirect_url: None,
            provider_data: ProviderData::Offline {
                method: self.method,
            },
        })
    }

    fn verify_callback(
        &self,
        _request: &CallbackRequest,
    ) -> std::result::Result<NormalizedEvent, CallbackError> {
        Err(CallbackError::Malformed(format!(
            "{} payments have no callbacks",
            self.method
        )))
    }

    fn reply(
        &self,
        _event: Option<&NormalizedEvent>,
        result: &std::result::Result<Reconciled, CallbackError>,
    ) -> ProviderReply {
        match result {
            Ok(_) => ProviderReply::ok(json!({ "ok": true })),
            Err(err) => ProviderReply::with_status(400, json!({ "error": err.to_string() })),
        }
    }
}
