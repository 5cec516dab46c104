//! Payme merchant API (JSON-RPC over a single endpoint).

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::Utc;
use common::{Money, PaymentMethod, PaymentStatus};
use serde_json::{Value, json};
use storage::{Order, Payment, ProviderData};

use super::secure_eq;
use crate::adapter::{
    CallbackRequest, Initiation, NormalizedEvent, Outcome, PaymentAdapter, Phase, ProviderReply,
    Reconciled, TransactionRef,
};
use crate::error::{CallbackError, PaymentError, Result};

const CHECKOUT_URL: &str = "https://checkout.paycom.uz";
const LOGIN: &str = "Paycom";

const CHECK_PERFORM: &str = "CheckPerformTransaction";
const CREATE: &str = "CreateTransaction";
const PERFORM: &str = "PerformTransaction";
const CANCEL: &str = "CancelTransaction";
const CHECK: &str = "CheckTransaction";

#[derive(Debug, Clone, Default)]
pub struct PaymeConfig {
    pub merchant_id: String,
    pub key: String,
}

/// Payme adapter.
#[derive(Debug, Clone)]
pub struct PaymeAdapter {
    config: PaymeConfig,
}

impl PaymeAdapter {
    pub fn new(config: PaymeConfig) -> Self {
        Self { config }
    }

    /// `Authorization` header value Payme sends with every call.
    pub fn authorization(&self) -> String {
        format!(
            "Basic {}",
            STANDARD.encode(format!("{LOGIN}:{}", self.config.key))
        )
    }

    fn authorized(&self, request: &CallbackRequest) -> bool {
        if self.config.key.is_empty() {
            return false;
        }
        let Some(encoded) = request
            .header("authorization")
            .and_then(|h| h.strip_prefix("Basic "))
        else {
            return false;
        };
        let Ok(decoded) = STANDARD.decode(encoded.trim()) else {
            return false;
        };
        let expected = format!("{LOGIN}:{}", self.config.key);
        secure_eq(&String::from_utf8_lossy(&decoded), &expected)
    }
}

fn rpc_method(event: &NormalizedEvent) -> &str {
    event.raw.get("method").and_then(Value::as_str).unwrap_or("")
}

fn tiyin(params: &Value) -> std::result::Result<Money, CallbackError> {
    params
        .get("amount")
        .and_then(Value::as_i64)
        .map(Money::from_minor_units)
        .ok_or_else(|| CallbackError::Malformed("amount".into()))
}

fn account_transaction(params: &Value) -> std::result::Result<TransactionRef, CallbackError> {
    params
        .pointer("/account/transaction_id")
        .and_then(Value::as_str)
        .map(|id| TransactionRef::TransactionId(id.to_string()))
        .ok_or(CallbackError::PaymentNotFound)
}

fn payme_id(params: &Value) -> std::result::Result<String, CallbackError> {
    params
        .get("id")
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| CallbackError::Malformed("id".into()))
}

/// Payme transaction state for a payment status.
fn state(status: PaymentStatus) -> i32 {
    match status {
        PaymentStatus::Pending | PaymentStatus::Processing => 1,
        PaymentStatus::Paid => 2,
        PaymentStatus::Failed | PaymentStatus::Cancelled => -1,
        PaymentStatus::Refunded | PaymentStatus::PartiallyRefunded => -2,
    }
}

struct Times {
    create: i64,
    perform: i64,
    cancel: i64,
    reason: Option<i32>,
}

fn times(payment: &Payment) -> Times {
    match &payment.provider_data {
        Some(ProviderData::Payme {
            create_time,
            perform_time,
            cancel_time,
            cancel_reason,
            ..
        }) => Times {
            create: create_time.unwrap_or_else(|| payment.created_at.timestamp_millis()),
            perform: perform_time.unwrap_or(0),
            cancel: cancel_time.unwrap_or(0),
            reason: *cancel_reason,
        },
        _ => Times {
            create: payment.created_at.timestamp_millis(),
            perform: 0,
            cancel: 0,
            reason: None,
        },
    }
}

fn error_code(method: &str, err: &CallbackError) -> (i64, &'static str) {
    match err {
        CallbackError::SignatureInvalid => (-32504, "Insufficient privilege"),
        CallbackError::Malformed(_) => (-32700, "Parse error"),
        CallbackError::UnknownMethod(_) => (-32601, "Method not found"),
        CallbackError::PaymentNotFound if matches!(method, CHECK_PERFORM | CREATE) => {
            (-31050, "Order not found")
        }
        CallbackError::PaymentNotFound => (-31003, "Transaction not found"),
        CallbackError::AmountMismatch => (-31001, "Wrong amount"),
        CallbackError::NotPayable => (-31051, "Order cannot be paid"),
        CallbackError::ConflictingState { .. } => (-31008, "Unable to perform operation"),
        CallbackError::Internal(_) => (-32400, "System error"),
    }
}

#[async_trait]
impl PaymentAdapter for PaymeAdapter {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Payme
    }

    async fn initiate(&self, _order: &Order, payment: &Payment) -> Result<Initiation> {
        let amount = payment
            .amount
            .to_minor_units()
            .ok_or_else(|| PaymentError::Provider("amount out of range".into()))?;
        let params = format!(
            "m={};ac.transaction_id={};a={}",
            self.config.merchant_id, payment.transaction_id, amount
        );
        let checkout_url = format!("{CHECKOUT_URL}/{}", STANDARD.encode(params));

        Ok(Initiation {
            provider_payment_id: None,
            redirect_url: Some(checkout_url.clone()),
            provider_data: ProviderData::Payme {
                merchant_id: self.config.merchant_id.clone(),
                checkout_url,
                transaction_id: None,
                create_time: None,
                perform_time: None,
                cancel_time: None,
                cancel_reason: None,
            },
        })
    }

    fn verify_callback(
        &self,
        request: &CallbackRequest,
    ) -> std::result::Result<NormalizedEvent, CallbackError> {
        if !self.authorized(request) {
            return Err(CallbackError::SignatureInvalid);
        }

        let raw: Value = serde_json::from_slice(&request.body)
            .map_err(|e| CallbackError::Malformed(e.to_string()))?;
        let method = raw
            .get("method")
            .and_then(Value::as_str)
            .ok_or_else(|| CallbackError::Malformed("method".into()))?;
        let params = raw.get("params").cloned().unwrap_or(Value::Null);

        let (transaction_ref, phase, outcome, amount, provider_payment_id) = match method {
            CHECK_PERFORM => (
                account_transaction(&params)?,
                Phase::Check,
                Outcome::Pending,
                Some(tiyin(&params)?),
                None,
            ),
            CREATE => (
                account_transaction(&params)?,
                Phase::Notify,
                Outcome::Pending,
                Some(tiyin(&params)?),
                Some(payme_id(&params)?),
            ),
            PERFORM => {
                let id = payme_id(&params)?;
                (
                    TransactionRef::ProviderPaymentId(id.clone()),
                    Phase::Notify,
                    Outcome::Success,
                    None,
                    Some(id),
                )
            }
            CANCEL => {
                let id = payme_id(&params)?;
                (
                    TransactionRef::ProviderPaymentId(id.clone()),
                    Phase::Notify,
                    Outcome::Cancelled,
                    None,
                    Some(id),
                )
            }
            CHECK => {
                let id = payme_id(&params)?;
                (
                    TransactionRef::ProviderPaymentId(id.clone()),
                    Phase::Query,
                    Outcome::Pending,
                    None,
                    Some(id),
                )
            }
            other => return Err(CallbackError::UnknownMethod(other.to_string())),
        };

        Ok(NormalizedEvent {
            transaction_ref,
            phase,
            outcome,
            amount,
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
            Some(data @ ProviderData::Payme { .. }) => data.clone(),
            _ => ProviderData::Payme {
                merchant_id: self.config.merchant_id.clone(),
                checkout_url: String::new(),
                transaction_id: None,
                create_time: None,
                perform_time: None,
                cancel_time: None,
                cancel_reason: None,
            },
        };

        let now = Utc::now().timestamp_millis();
        let params = event.raw.get("params");
        if let ProviderData::Payme {
            transaction_id,
            create_time,
            perform_time,
            cancel_time,
            cancel_reason,
            ..
        } = &mut data
        {
            match rpc_method(event) {
                CREATE => {
                    *transaction_id = event.provider_payment_id.clone();
                    *create_time = Some(
                        params
                            .and_then(|p| p.get("time"))
                            .and_then(Value::as_i64)
                            .unwrap_or(now),
                    );
                }
                PERFORM => *perform_time = Some(now),
                CANCEL => {
                    *cancel_time = Some(now);
                    *cancel_reason = params
                        .and_then(|p| p.get("reason"))
                        .and_then(Value::as_i64)
                        .and_then(|r| i32::try_from(r).ok());
                }
                _ => return None,
            }
        }
        Some(data)
    }

    fn reply(
        &self,
        event: Option<&NormalizedEvent>,
        result: &std::result::Result<Reconciled, CallbackError>,
    ) -> ProviderReply {
        let id = event
            .and_then(|e| e.raw.get("id"))
            .cloned()
            .unwrap_or(Value::Null);
        let method = event.map(rpc_method).unwrap_or("");

        match result {
            Ok(reconciled) => {
                let payment = &reconciled.payment;
                let t = times(payment);
                let transaction = payment.transaction_id.clone();
                let state = state(payment.status);
                let body = match method {
                    CHECK_PERFORM => json!({ "allow": true }),
                    CREATE => json!({
                        "create_time": t.create,
                        "transaction": transaction,
                        "state": state,
                    }),
                    PERFORM => json!({
                        "transaction": transaction,
                        "perform_time": t.perform,
                        "state": state,
                    }),
                    CANCEL => json!({
                        "transaction": transaction,
                        "cancel_time": t.cancel,
                        "state": state,
                    }),
                    _ => json!({
                        "create_time": t.create,
                        "perform_time": t.perform,
                        "cancel_time": t.cancel,
                        "transaction": transaction,
                        "state": state,
                        "reason": t.reason,
                    }),
                };
                ProviderReply::ok(json!({ "jsonrpc": "2.0", "id": id, "result": body }))
            }
            Err(err) => {
                let (code, message) = error_code(method, err);
                let status = if err.is_retryable() { 500 } else { 200 };
                ProviderReply::with_status(
                    status,
                    json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": { "code": code, "message": message },
                    }),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::OrderId;

    fn adapter() -> PaymeAdapter {
        PaymeAdapter::new(PaymeConfig {
            merchant_id: "m-1".into(),
            key: "k3y".into(),
        })
    }

    fn call(adapter: &PaymeAdapter, body: Value) -> CallbackRequest {
        CallbackRequest::json(
            vec![("Authorization".into(), adapter.authorization())],
            &body,
        )
    }

    #[test]
    fn create_transaction_binds_payme_id() {
        let adapter = adapter();
        let event = adapter
            .verify_callback(&call(
                &adapter,
                json!({
                    "id": 7,
                    "method": "CreateTransaction",
                    "params": {
                        "id": "pm-1",
                        "time": 1_700_000_000_000_i64,
                        "amount": 150_000,
                        "account": { "transaction_id": "TXN_1_abc" }
                    }
                }),
            ))
            .unwrap();

        assert_eq!(event.phase, Phase::Notify);
        assert_eq!(event.outcome, Outcome::Pending);
        assert_eq!(event.amount, Some(Money::from_minor_units(150_000)));
        assert_eq!(event.provider_payment_id.as_deref(), Some("pm-1"));

        let data = adapter.provider_data(None, &event).unwrap();
        assert!(matches!(
            data,
            ProviderData::Payme { transaction_id: Some(ref id), create_time: Some(1_700_000_000_000), .. } if id == "pm-1"
        ));
    }

    #[test]
    fn missing_credentials_are_rejected() {
        let adapter = adapter();
        let request = CallbackRequest::json(vec![], &json!({"method": "CheckTransaction"}));
        let err = adapter.verify_callback(&request).unwrap_err();
        assert_eq!(err, CallbackError::SignatureInvalid);
        assert_eq!(adapter.reply(None, &Err(err)).body["error"]["code"], -32504);

        let wrong = PaymeAdapter::new(PaymeConfig {
            merchant_id: "m-1".into(),
            key: "other".into(),
        });
        assert!(adapter.verify_callback(&call(&wrong, json!({}))).is_err());
    }

    #[test]
    fn unconfigured_key_rejects_empty_password() {
        let adapter = PaymeAdapter::new(PaymeConfig::default());
        let request = CallbackRequest::json(
            vec![("Authorization".into(), "Basic UGF5Y29tOg==".into())],
            &json!({"id": 1, "method": "CheckTransaction", "params": {"id": "pm-1"}}),
        );
        assert_eq!(adapter.authorization(), "Basic UGF5Y29tOg==");
        assert_eq!(
            adapter.verify_callback(&request).unwrap_err(),
            CallbackError::SignatureInvalid
        );
    }

    #[test]
    fn unknown_method_and_bad_json() {
        let adapter = adapter();
        let err = adapter
            .verify_callback(&call(&adapter, json!({"method": "ChangePassword", "params": {}})))
            .unwrap_err();
        assert_eq!(adapter.reply(None, &Err(err)).body["error"]["code"], -32601);

        let request = CallbackRequest::new(
            vec![("Authorization".into(), adapter.authorization())],
            b"{not json".to_vec(),
        );
        let err = adapter.verify_callback(&request).unwrap_err();
        assert_eq!(adapter.reply(None, &Err(err)).body["error"]["code"], -32700);
    }

    #[test]
    fn not_found_code_depends_on_method() {
        let adapter = adapter();
        let create = adapter
            .verify_callback(&call(
                &adapter,
                json!({"id": 1, "method": "CreateTransaction", "params": {"id": "pm", "amount": 1, "account": {"transaction_id": "x"}}}),
            ))
            .unwrap();
        let reply = adapter.reply(Some(&create), &Err(CallbackError::PaymentNotFound));
        assert_eq!(reply.body["error"]["code"], -31050);
        assert_eq!(reply.body["id"], 1);

        let perform = adapter
            .verify_callback(&call(
                &adapter,
                json!({"id": 2, "method": "PerformTransaction", "params": {"id": "pm"}}),
            ))
            .unwrap();
        let reply = adapter.reply(Some(&perform), &Err(CallbackError::PaymentNotFound));
        assert_eq!(reply.body["error"]["code"], -31003);
    }

    #[tokio::test]
    async fn checkout_url_encodes_account() {
        let adapter = adapter();
        let payment = Payment::pending(
            OrderId::new(),
            Money::from_minor_units(150_000),
            PaymentMethod::Payme,
            "TXN_9_def",
        );
        let now = Utc::now();
        let order = Order {
            id: payment.order_id,
            store_id: common::StoreId::new(),
            customer_id: common::CustomerId::new(),
            status: common::OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            total_amount: payment.amount,
            customer_info: Default::default(),
            delivery_address: None,
            delivery_method: Default::default(),
            notes: None,
            items: vec![],
            created_at: now,
            updated_at: now,
        };

        let initiation = adapter.initiate(&order, &payment).await.unwrap();
        let url = initiation.redirect_url.unwrap();
        let encoded = url.strip_prefix("https://checkout.paycom.uz/").unwrap();
        let decoded = String::from_utf8(STANDARD.decode(encoded).unwrap()).unwrap();
        assert_eq!(decoded, "m=m-1;ac.transaction_id=TXN_9_def;a=150000");
    }

    #[test]
    fn states_follow_payment_status() {
        assert_eq!(state(PaymentStatus::Processing), 1);
        assert_eq!(state(PaymentStatus::Paid), 2);
        assert_eq!(state(PaymentStatus::Cancelled), -1);
        assert_eq!(state(PaymentStatus::Refunded), -2);
    }
}
