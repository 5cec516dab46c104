//! Click merchant API: prepare (`action=0`) and complete (`action=1`).

use std::collections::HashMap;

use async_trait::async_trait;
use common::{Money, PaymentMethod, PaymentStatus};
use md5::{Digest, Md5};
use serde_json::{Map, Value, json};
use storage::{Order, Payment, ProviderData};

use super::secure_eq;
use crate::adapter::{
    CallbackRequest, Initiation, NormalizedEvent, Outcome, PaymentAdapter, Phase, ProviderReply,
    Reconciled, TransactionRef,
};
use crate::error::{CallbackError, PaymentError, Result};

const PAY_URL: &str = "https://my.click.uz/services/pay";

#[derive(Debug, Clone, Default)]
pub struct ClickConfig {
    pub service_id: String,
    pub merchant_id: String,
    pub secret_key: String,
}

/// Click adapter.
#[derive(Debug, Clone)]
pub struct ClickAdapter {
    config: ClickConfig,
}

impl ClickAdapter {
    pub fn new(config: ClickConfig) -> Self {
        Self { config }
    }

    /// Lowercase hex MD5 over `click_trans_id`, `service_id`,
    /// `click_paydoc_id`, `merchant_trans_id`, `amount`, `action`,
    /// `sign_time` and the secret key, in that order.
    pub fn sign(&self, fields: [&str; 7]) -> String {
        let mut hasher = Md5::new();
        for field in fields {
            hasher.update(field.as_bytes());
        }
        hasher.update(self.config.secret_key.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn provider_data_base(&self, payment_url: String) -> ProviderData {
        ProviderData::Click {
            service_id: self.config.service_id.clone(),
            merchant_id: self.config.merchant_id.clone(),
            payment_url,
            click_trans_id: None,
            click_paydoc_id: None,
            sign_time: None,
        }
    }
}

/// Reads the callback either as a form or as a flat JSON object.
fn parse_fields(request: &CallbackRequest) -> std::result::Result<HashMap<String, String>, CallbackError> {
    let is_json = request
        .header("content-type")
        .is_some_and(|ct| ct.contains("json"));

    if is_json {
        let object: Map<String, Value> = serde_json::from_slice(&request.body)
            .map_err(|e| CallbackError::Malformed(e.to_string()))?;
        Ok(object
            .into_iter()
            .filter_map(|(key, value)| match value {
                Value::String(s) => Some((key, s)),
                Value::Number(n) => Some((key, n.to_string())),
                _ => None,
            })
            .collect())
    } else {
        serde_urlencoded::from_bytes::<Vec<(String, String)>>(&request.body)
            .map(|pairs| pairs.into_iter().collect())
            .map_err(|e| CallbackError::Malformed(e.to_string()))
    }
}

fn required<'a>(
    fields: &'a HashMap<String, String>,
    name: &str,
) -> std::result::Result<&'a str, CallbackError> {
    fields
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| CallbackError::Malformed(format!("missing {name}")))
}

fn raw_field(event: Option<&NormalizedEvent>, key: &str) -> Value {
    event
        .and_then(|e| e.raw.get(key))
        .cloned()
        .unwrap_or(Value::Null)
}

fn error_code(err: &CallbackError) -> (i64, &'static str) {
    match err {
        CallbackError::SignatureInvalid => (-1, "SIGN CHECK FAILED!"),
        CallbackError::AmountMismatch => (-2, "Incorrect parameter amount"),
        CallbackError::UnknownMethod(_) => (-3, "Action not found"),
        CallbackError::ConflictingState { current } if current.is_settled() => {
            (-4, "Already paid")
        }
        CallbackError::PaymentNotFound => (-5, "Transaction does not exist"),
        CallbackError::Internal(_) => (-7, "Failed to update transaction"),
        CallbackError::Malformed(_) => (-8, "Error in request from click"),
        CallbackError::ConflictingState { .. } | CallbackError::NotPayable => {
            (-9, "Transaction cancelled")
        }
    }
}

#[async_trait]
impl PaymentAdapter for ClickAdapter {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Click
    }

    async fn initiate(&self, _order: &Order, payment: &Payment) -> Result<Initiation> {
        let amount = payment.amount.to_string();
        let query = serde_urlencoded::to_string([
            ("service_id", self.config.service_id.as_str()),
            ("merchant_id", self.config.merchant_id.as_str()),
            ("amount", amount.as_str()),
            ("transaction_param", payment.transaction_id.as_str()),
        ])
        .map_err(|e| PaymentError::Provider(e.to_string()))?;
        let payment_url = format!("{PAY_URL}?{query}");

        Ok(Initiation {
            provider_payment_id: None,
            redirect_url: Some(payment_url.clone()),
            provider_data: self.provider_data_base(payment_url),
        })
    }

    fn verify_callback(
        &self,
        request: &CallbackRequest,
    ) -> std::result::Result<NormalizedEvent, CallbackError> {
        // Unconfigured; an empty secret signs anything.
        if self.config.secret_key.is_empty() || self.config.service_id.is_empty() {
            return Err(CallbackError::SignatureInvalid);
        }
        let fields = parse_fields(request)?;

        let click_trans_id = required(&fields, "click_trans_id")?;
        let service_id = required(&fields, "service_id")?;
        let click_paydoc_id = required(&fields, "click_paydoc_id")?;
        let merchant_trans_id = required(&fields, "merchant_trans_id")?;
        let amount = required(&fields, "amount")?;
        let action = required(&fields, "action")?;
        let sign_time = required(&fields, "sign_time")?;
        let sign_string = required(&fields, "sign_string")?;

        let expected = self.sign([
            click_trans_id,
            service_id,
            click_paydoc_id,
            merchant_trans_id,
            amount,
            action,
            sign_time,
        ]);
        if !secure_eq(&expected, &sign_string.to_ascii_lowercase()) {
            return Err(CallbackError::SignatureInvalid);
        }
        if service_id != self.config.service_id {
            return Err(CallbackError::Malformed("service_id mismatch".into()));
        }

        let amount: Money = amount
            .parse()
            .map_err(|_| CallbackError::Malformed("amount".into()))?;
        let error: i64 = fields
            .get("error")
            .map(|e| e.parse())
            .transpose()
            .map_err(|_| CallbackError::Malformed("error".into()))?
            .unwrap_or(0);

        let outcome = match action {
            "0" | "1" if error < 0 => Outcome::Failure,
            "0" => Outcome::Pending,
            "1" => Outcome::Success,
            other => return Err(CallbackError::UnknownMethod(other.to_string())),
        };

        let transaction_ref = TransactionRef::TransactionId(merchant_trans_id.to_string());
        let provider_payment_id = Some(click_trans_id.to_string());
        let raw = Value::Object(
            fields
                .into_iter()
                .map(|(k, v)| (k, Value::String(v)))
                .collect(),
        );

        Ok(NormalizedEvent {
            transaction_ref,
            phase: Phase::Notify,
            outcome,
            amount: Some(amount),
            provider_payment_id,
            raw,
        })
    }

    fn provider_data(
        &self,
        existing: Option<&ProviderData>,
        event: &NormalizedEvent,
    ) -> Option<ProviderData> {
        let mut data = match existing {
            Some(data @ ProviderData::Click { .. }) => data.clone(),
            _ => self.provider_data_base(String::new()),
        };
        if let ProviderData::Click {
            click_trans_id,
            click_paydoc_id,
            sign_time,
            ..
        } = &mut data
        {
            let field = |key: &str| event.raw.get(key).and_then(Value::as_str).map(String::from);
            *click_trans_id = field("click_trans_id");
            *click_paydoc_id = field("click_paydoc_id");
            *sign_time = field("sign_time");
        }
        Some(data)
    }

    fn reply(
        &self,
        event: Option<&NormalizedEvent>,
        result: &std::result::Result<Reconciled, CallbackError>,
    ) -> ProviderReply {
        let mut body = json!({
            "click_trans_id": raw_field(event, "click_trans_id"),
            "merchant_trans_id": raw_field(event, "merchant_trans_id"),
        });

        let (error, note, status) = match result {
            Ok(reconciled) => {
                let id_key = match event.and_then(|e| e.raw.get("action")).and_then(Value::as_str) {
                    Some("0") => "merchant_prepare_id",
                    _ => "merchant_confirm_id",
                };
                body[id_key] = json!(reconciled.payment.transaction_id);
                if reconciled.payment.status == PaymentStatus::Failed {
                    (-9, "Transaction cancelled", 200)
                } else {
                    (0, "Success", 200)
                }
            }
            Err(err) => {
                let (code, note) = error_code(err);
                (code, note, if err.is_retryable() { 500 } else { 200 })
            }
        };
        body["error"] = json!(error);
        body["error_note"] = json!(note);

        ProviderReply::with_status(status, body)
    }
}
