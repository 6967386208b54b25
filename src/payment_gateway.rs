use crate::config::Config;
use crate::errors::AppError;
use crate::models::BankDetails;
use bigdecimal::{BigDecimal, ToPrimitive};
use reqwest::Client;
use serde_json::{json, Value};
use uuid::Uuid;

/// Outcome of a single transfer attempt.
///
/// `success: false` is a durable, retryable decline; transport-level
/// problems are returned as errors so the circuit breaker can count them,
/// and the gate folds both shapes into a failed Disbursement record.
#[derive(Debug, Clone)]
pub struct DisbursementResult {
    pub success: bool,
    pub reference_id: String,
    pub error: Option<String>,
    pub gateway_response: Option<Value>,
}

impl DisbursementResult {
    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            reference_id: String::new(),
            error: Some(reason.into()),
            gateway_response: None,
        }
    }
}

/// One gateway POST either succeeds, or the gateway itself declines the
/// request (4xx with a structured error body).
enum PostOutcome {
    Success(Value),
    Declined { description: String, raw: Value },
}

/// Client for the payment gateway (Razorpay-compatible payout API).
///
/// A real payout is three calls: create a contact, attach a fund account,
/// create the payout (amount in paise, IMPS). Without credentials the
/// client runs in mock mode and every transfer succeeds with a `mock-*`
/// reference, which keeps development environments fully functional.
pub struct PaymentGateway {
    client: Client,
    base_url: String,
    key_id: Option<String>,
    key_secret: Option<String>,
    account_number: Option<String>,
}

impl PaymentGateway {
    pub fn new(config: &Config, client: Client) -> Self {
        Self {
            client,
            base_url: config.razorpay_base_url.clone(),
            key_id: config.razorpay_key_id.clone(),
            key_secret: config.razorpay_key_secret.clone(),
            account_number: config.razorpay_account_number.clone(),
        }
    }

    fn credentials(&self) -> Option<(&str, &str, &str)> {
        match (&self.key_id, &self.key_secret, &self.account_number) {
            (Some(id), Some(secret), Some(account)) => {
                Some((id.as_str(), secret.as_str(), account.as_str()))
            }
            _ => None,
        }
    }

    /// Execute a single synchronous bank transfer.
    ///
    /// # Arguments
    ///
    /// * `amount` - Transfer amount in INR; converted to paise for the API.
    /// * `bank` - Destination account (must be verified by the caller).
    /// * `lead_id` - Used as the gateway reference and in narrations.
    /// * `customer_email` - Attached to the gateway contact.
    pub async fn transfer(
        &self,
        amount: &BigDecimal,
        bank: &BankDetails,
        lead_id: &str,
        customer_email: &str,
    ) -> Result<DisbursementResult, AppError> {
        let Some((key_id, key_secret, account_number)) = self.credentials() else {
            tracing::warn!("Payment gateway keys not configured, using mock disbursement");
            return Ok(self.mock_transfer(amount, bank, lead_id));
        };

        let narration = format!("Loan disbursement for lead {}", lead_id);

        // Step 1: create contact
        let contact = match self
            .post(
                "/v1/contacts",
                key_id,
                key_secret,
                json!({
                    "name": bank.account_holder_name,
                    "email": customer_email,
                    "type": "customer",
                    "reference_id": lead_id,
                }),
            )
            .await?
        {
            PostOutcome::Success(value) => value,
            PostOutcome::Declined { description, raw } => {
                return Ok(DisbursementResult {
                    success: false,
                    reference_id: String::new(),
                    error: Some(description),
                    gateway_response: Some(raw),
                })
            }
        };
        let contact_id = contact
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                AppError::ExternalApiError("contact creation response missing 'id'".to_string())
            })?
            .to_string();
        tracing::debug!("Gateway contact created: {}", contact_id);

        // Step 2: create fund account
        let fund_account = match self
            .post(
                "/v1/fund_accounts",
                key_id,
                key_secret,
                json!({
                    "contact_id": contact_id,
                    "account_type": "bank_account",
                    "bank_account": {
                        "name": bank.account_holder_name,
                        "ifsc": bank.ifsc_code,
                        "account_number": bank.account_number,
                    }
                }),
            )
            .await?
        {
            PostOutcome::Success(value) => value,
            PostOutcome::Declined { description, raw } => {
                return Ok(DisbursementResult {
                    success: false,
                    reference_id: String::new(),
                    error: Some(description),
                    gateway_response: Some(raw),
                })
            }
        };
        let fund_account_id = fund_account
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                AppError::ExternalApiError("fund account response missing 'id'".to_string())
            })?
            .to_string();
        tracing::debug!("Gateway fund account created: {}", fund_account_id);

        // Step 3: create payout, amount in paise
        let paise = (amount.clone() * BigDecimal::from(100))
            .round(0)
            .to_i64()
            .ok_or_else(|| {
                AppError::InternalError(format!("amount {} cannot be converted to paise", amount))
            })?;

        let payout = match self
            .post(
                "/v1/payouts",
                key_id,
                key_secret,
                json!({
                    "account_number": account_number,
                    "fund_account_id": fund_account_id,
                    "amount": paise,
                    "currency": "INR",
                    "mode": "IMPS",
                    "purpose": "payout",
                    "queue_if_low_balance": true,
                    "reference_id": lead_id,
                    "narration": narration,
                }),
            )
            .await?
        {
            PostOutcome::Success(value) => value,
            PostOutcome::Declined { description, raw } => {
                return Ok(DisbursementResult {
                    success: false,
                    reference_id: String::new(),
                    error: Some(description),
                    gateway_response: Some(raw),
                })
            }
        };

        let reference_id = payout
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AppError::ExternalApiError("payout response missing 'id'".to_string()))?
            .to_string();

        tracing::info!("✓ Payout created: {}", reference_id);
        Ok(DisbursementResult {
            success: true,
            reference_id: reference_id.clone(),
            error: None,
            gateway_response: Some(json!({
                "id": reference_id,
                "status": payout.get("status").cloned().unwrap_or(Value::Null),
                "amount": amount.to_f64().unwrap_or(0.0),
                "currency": "INR",
                "created_at": payout.get("created_at").cloned().unwrap_or(Value::Null),
                "description": narration,
                "metadata": {
                    "leadId": lead_id,
                    "contactId": contact_id,
                    "fundAccountId": fund_account_id,
                    "bankName": bank.bank_name,
                    "accountNumber": bank.account_number,
                    "ifscCode": bank.ifsc_code,
                    "disbursementType": "loan",
                }
            })),
        })
    }

    /// Mock transfer used when the gateway is unconfigured: always succeeds
    /// with a synthetic reference so development flows stay end-to-end.
    fn mock_transfer(&self, amount: &BigDecimal, bank: &BankDetails, lead_id: &str) -> DisbursementResult {
        let reference_id = format!("mock-{}", Uuid::new_v4().simple());
        DisbursementResult {
            success: true,
            reference_id: reference_id.clone(),
            error: None,
            gateway_response: Some(json!({
                "id": reference_id,
                "status": "processed",
                "amount": amount.to_f64().unwrap_or(0.0),
                "currency": "INR",
                "description": format!("Loan disbursement for lead {}", lead_id),
                "metadata": {
                    "leadId": lead_id,
                    "bankName": bank.bank_name,
                    "accountNumber": bank.account_number,
                    "ifscCode": bank.ifsc_code,
                    "disbursementType": "loan",
                }
            })),
        }
    }

    /// One authenticated POST against the gateway.
    ///
    /// Transport failures and 5xx responses are hard errors (counted by the
    /// circuit breaker); 4xx responses are structured declines.
    async fn post(
        &self,
        path: &str,
        key_id: &str,
        key_secret: &str,
        body: Value,
    ) -> Result<PostOutcome, AppError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .basic_auth(key_id, Some(key_secret))
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Gateway request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            let value: Value = response.json().await.map_err(|e| {
                AppError::ExternalApiError(format!("Failed to parse gateway response: {}", e))
            })?;
            return Ok(PostOutcome::Success(value));
        }

        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        if status.is_server_error() {
            return Err(AppError::ExternalApiError(format!(
                "Gateway returned {}: {}",
                status, error_text
            )));
        }

        let raw: Value = serde_json::from_str(&error_text).unwrap_or(Value::Null);
        let description = raw
            .get("error")
            .and_then(|e| e.get("description"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .or_else(|| {
                raw.get("error")
                    .and_then(|e| e.get("code"))
                    .and_then(|v| v.as_str())
                    .map(|code| format!("Gateway error {}", code))
            })
            .unwrap_or_else(|| format!("Disbursement failed ({})", status));

        tracing::warn!("Gateway declined {}: {}", path, description);
        Ok(PostOutcome::Declined { description, raw })
    }
}
