//! Telegram Payments via Bot API webhook updates.

use async_trait::async_trait;
use common::{Money, PaymentId, PaymentMethod};
use serde::Deserialize;
use serde_json::{Value, json};
use storage::{Order, Payment, ProviderData};

use super::secure_eq;
use crate::adapter::{
    CallbackRequest, Initiation, NormalizedEvent, Outcome, PaymentAdapter, Phase, ProviderReply,
    Reconciled, TransactionRef,
};
use crate::error::{CallbackError, Result};

pub const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_username: String,
    pub webhook_secret: String,
    /// ISO 4217 code used for invoices.
    pub currency: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_username: String::new(),
            webhook_secret: String::new(),
            currency: "UZS".into(),
        }
    }
}

/// Telegram Payments adapter.
#[derive(Debug, Clone)]
pub struct TelegramAdapter {
    config: TelegramConfig,
}

#[derive(Debug, Deserialize)]
struct InvoicePayload {
    payment_id: PaymentId,
}

#[derive(Debug, Deserialize)]
struct PreCheckoutQuery {
    id: String,
    total_amount: i64,
    invoice_payload: String,
}

#[derive(Debug, Deserialize)]
struct SuccessfulPayment {
    invoice_payload: String,
    telegram_payment_charge_id: String,
}

impl TelegramAdapter {
    pub fn new(config: TelegramConfig) -> Self {
        Self { config }
    }

    /// Invoice payload identifying a payment.
    pub fn invoice_payload(payment_id: PaymentId) -> String {
        json!({ "payment_id": payment_id }).to_string()
    }
}

fn payment_ref(payload: &str) -> std::result::Result<TransactionRef, CallbackError> {
    serde_json::from_str::<InvoicePayload>(payload)
        .map(|p| TransactionRef::PaymentId(p.payment_id))
        .map_err(|_| CallbackError::PaymentNotFound)
}

fn error_message(err: &CallbackError) -> String {
    match err {
        CallbackError::AmountMismatch => "Amount does not match the order".into(),
        CallbackError::NotPayable => "This order can no longer be paid".into(),
        CallbackError::ConflictingState { current } => format!("Payment is already {current}"),
        CallbackError::PaymentNotFound => "Payment not found".into(),
        _ => "Payment could not be verified".into(),
    }
}

#[async_trait]
impl PaymentAdapter for TelegramAdapter {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Telegram
    }

    async fn initiate(&self, _order: &Order, payment: &Payment) -> Result<Initiation> {
        let deep_link = format!(
            "https://t.me/{}?start=pay_{}",
            self.config.bot_username, payment.id
        );
        Ok(Initiation {
            provider_payment_id: None,
            redirect_url: Some(deep_link.clone()),
            provider_data: ProviderData::Telegram {
                invoice_payload: Self::invoice_payload(payment.id),
                deep_link,
                telegram_payment_charge_id: None,
                provider_payment_charge_id: None,
                currency: Some(self.config.currency.clone()),
            },
        })
    }

    fn verify_callback(
        &self,
        request: &CallbackRequest,
    ) -> std::result::Result<NormalizedEvent, CallbackError> {
        let token = request.header(SECRET_HEADER).unwrap_or("");
        if self.config.webhook_secret.is_empty() || !secure_eq(token, &self.config.webhook_secret)
        {
            return Err(CallbackError::SignatureInvalid);
        }

        let raw: Value = serde_json::from_slice(&request.body)
            .map_err(|e| CallbackError::Malformed(e.to_string()))?;

        if let Some(query) = raw.get("pre_checkout_query") {
            let query: PreCheckoutQuery = serde_json::from_value(query.clone())
                .map_err(|e| CallbackError::Malformed(e.to_string()))?;
            return Ok(NormalizedEvent {
                transaction_ref: payment_ref(&query.invoice_payload)?,
                phase: Phase::Check,
                outcome: Outcome::Pending,
                amount: Some(Money::from_minor_units(query.total_amount)),
                provider_payment_id: None,
                raw,
            });
        }

        if let Some(paid) = raw.pointer("/message/successful_payment") {
            let paid: SuccessfulPayment = serde_json::from_value(paid.clone())
                .map_err(|e| CallbackError::Malformed(e.to_string()))?;
            return Ok(NormalizedEvent {
                transaction_ref: payment_ref(&paid.invoice_payload)?,
                phase: Phase::Notify,
                outcome: Outcome::Success,
                amount: None,
                provider_payment_id: Some(paid.telegram_payment_charge_id),
                raw,
            });
        }

        Err(CallbackError::Malformed("unsupported update".into()))
    }

    fn provider_data(
        &self,
        existing: Option<&ProviderData>,
        event: &NormalizedEvent,
    ) -> Option<ProviderData> {
        let paid = event.raw.pointer("/message/successful_payment")?;
        let field = |key: &str| paid.get(key).and_then(Value::as_str).map(String::from);

        let mut data = match existing {
            Some(data @ ProviderData::Telegram { .. }) => data.clone(),
            _ => ProviderData::Telegram {
                invoice_payload: field("invoice_payload").unwrap_or_default(),
                deep_link: String::new(),
                telegram_payment_charge_id: None,
                provider_payment_charge_id: None,
                currency: None,
            },
        };
        if let ProviderData::Telegram {
            telegram_payment_charge_id,
            provider_payment_charge_id,
            currency,
            ..
        } = &mut data
        {
            *telegram_payment_charge_id = field("telegram_payment_charge_id");
            *provider_payment_charge_id = field("provider_payment_charge_id");
            *currency = field("currency").or(currency.take());
        }
        Some(data)
    }

    fn reply(
        &self,
        event: Option<&NormalizedEvent>,
        result: &std::result::Result<Reconciled, CallbackError>,
    ) -> ProviderReply {
        let status = match result {
            Err(err) if err.is_retryable() => 500,
            _ => 200,
        };

        let mut body = match result {
            Ok(_) => json!({ "ok": true }),
            Err(err) => json!({ "ok": false, "error_message": error_message(err) }),
        };

        if let Some(query_id) = event
            .and_then(|e| e.raw.pointer("/pre_checkout_query/id"))
            .cloned()
        {
            body["method"] = json!("answerPreCheckoutQuery");
            body["pre_checkout_query_id"] = query_id;
        }

        ProviderReply::with_status(status, body)
    }
}
