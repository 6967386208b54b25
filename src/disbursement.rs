/// Disbursement gate: eligibility, bank-details lifecycle and the payout
/// state machine
///
/// Disbursement is the one irreversible money-movement step in the
/// pipeline, so it is gated behind multi-party verification state: a Loan
/// lead must be Approved, its bank details verified by a back-office
/// actor, and no non-failed disbursement may exist. Failed attempts stay
/// on the record and re-open eligibility for a retry.
use crate::db_storage::LeadStorage;
use crate::errors::AppError;
use crate::handlers::AppState;
use crate::models::{
    BankDetails, BankDetailsRequest, DisburseRequest, Disbursement, DisbursementStatus, Lead,
    ServiceType, UserRole, VerifyBankDetailsRequest,
};
use crate::payment_gateway::{DisbursementResult, PaymentGateway};
use crate::workflow::{append_history, resolve_acting_user};
use chrono::Utc;
use failsafe::futures::CircuitBreaker;
use regex::Regex;
use serde::Serialize;
use std::sync::Arc;
use std::sync::OnceLock;
use uuid::Uuid;

/// Per-check breakdown of the eligibility predicate, for UI display and
/// for the 422 reasons returned on a rejected disbursement.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EligibilityReport {
    pub eligible: bool,
    pub is_loan: bool,
    pub is_approved: bool,
    pub bank_details_verified: bool,
    pub no_blocking_disbursements: bool,
    pub reasons: Vec<String>,
}

/// Evaluate the eligibility predicate with per-check detail.
pub fn check_eligibility(lead: &Lead) -> EligibilityReport {
    let is_loan = lead.service_type == ServiceType::Loan;
    let is_approved = lead.status == "Approved";
    let bank_details_verified = lead
        .bank_details
        .as_ref()
        .map(|bank| bank.verified_by.is_some() && bank.verified_at.is_some())
        .unwrap_or(false);
    // Exactly one non-failed disbursement may ever exist per lead; failed
    // attempts re-open eligibility for a retry.
    let no_blocking_disbursements = lead.disbursements.is_empty()
        || lead
            .disbursements
            .iter()
            .all(|d| d.status == DisbursementStatus::Failed);

    let mut reasons = Vec::new();
    if !is_loan {
        reasons.push(format!("lead must be a Loan (found {})", lead.service_type));
    }
    if !is_approved {
        reasons.push(format!("status must be 'Approved' (found '{}')", lead.status));
    }
    if !bank_details_verified {
        if lead.bank_details.is_none() {
            reasons.push("bank details missing".to_string());
        } else {
            reasons.push("bank details not verified".to_string());
        }
    }
    if !no_blocking_disbursements {
        reasons.push("a completed or in-flight disbursement already exists".to_string());
    }

    EligibilityReport {
        eligible: is_loan && is_approved && bank_details_verified && no_blocking_disbursements,
        is_loan,
        is_approved,
        bank_details_verified,
        no_blocking_disbursements,
        reasons,
    }
}

/// The bare eligibility predicate.
pub fn is_eligible(lead: &Lead) -> bool {
    check_eligibility(lead).eligible
}

/// Validate bank details before they are accepted onto a lead. Returns all
/// problems found, empty when valid.
pub fn validate_bank_details(details: &BankDetails) -> Vec<String> {
    static IFSC_RE: OnceLock<Regex> = OnceLock::new();
    let ifsc_re =
        IFSC_RE.get_or_init(|| Regex::new(r"^[A-Z]{4}0[A-Z0-9]{6}$").expect("IFSC regex is valid"));

    let mut errors = Vec::new();
    if details.account_holder_name.trim().len() < 2 {
        errors.push("Account holder name is required and must be at least 2 characters".to_string());
    }
    if details.account_number.len() < 8 || !details.account_number.chars().all(|c| c.is_ascii_digit()) {
        errors.push("Account number is required and must be at least 8 digits".to_string());
    }
    if details.bank_name.trim().len() < 2 {
        errors.push("Bank name is required".to_string());
    }
    if !ifsc_re.is_match(&details.ifsc_code) {
        errors.push("Valid IFSC code is required (format: XXXX0XXXXXX)".to_string());
    }
    errors
}

/// Add or replace the bank details on a lead.
///
/// Editing clears any previous verification: stale verifiedBy/verifiedAt
/// on changed account data must never gate a payout.
pub async fn upsert_bank_details(
    state: &Arc<AppState>,
    lead_id: &str,
    req: &BankDetailsRequest,
) -> Result<Lead, AppError> {
    let storage = LeadStorage::new(state.db.clone());
    let acting_user = resolve_acting_user(&storage, &req.acting_user_id).await?;
    let mut lead = storage.get_lead(lead_id).await?;

    let details = BankDetails {
        account_holder_name: req.account_holder_name.trim().to_string(),
        account_number: req.account_number.trim().to_string(),
        bank_name: req.bank_name.trim().to_string(),
        ifsc_code: req.ifsc_code.trim().to_uppercase(),
        branch_name: req.branch_name.clone(),
        account_type: req.account_type,
        verified_by: None,
        verified_at: None,
    };

    let errors = validate_bank_details(&details);
    if !errors.is_empty() {
        return Err(AppError::BadRequest(errors.join("; ")));
    }

    let was_verified = lead
        .bank_details
        .as_ref()
        .map(|bank| bank.verified_by.is_some())
        .unwrap_or(false);
    let remarks = if was_verified {
        "Bank details updated; verification reset"
    } else if lead.bank_details.is_some() {
        "Bank details updated"
    } else {
        "Bank details added"
    };

    lead.bank_details = Some(details);
    let current = lead.status.clone();
    append_history(&mut lead, current, &acting_user.id, Some(remarks.to_string()));
    storage.save_lead(&mut lead).await?;

    Ok(lead)
}

/// Mark the lead's bank details as verified. Back-office/admin only.
pub async fn verify_bank_details(
    state: &Arc<AppState>,
    lead_id: &str,
    req: &VerifyBankDetailsRequest,
) -> Result<Lead, AppError> {
    let storage = LeadStorage::new(state.db.clone());
    let acting_user = resolve_acting_user(&storage, &req.acting_user_id).await?;
    if !matches!(acting_user.role, UserRole::BackOffice | UserRole::Admin) {
        return Err(AppError::Unauthorized(
            "only back-office or admin users may verify bank details".to_string(),
        ));
    }

    let mut lead = storage.get_lead(lead_id).await?;
    match lead.bank_details.as_mut() {
        Some(bank) => {
            bank.verified_by = Some(acting_user.id.clone());
            bank.verified_at = Some(Utc::now());
        }
        None => {
            return Err(AppError::BadRequest(format!(
                "lead {} has no bank details to verify",
                lead.id
            )))
        }
    }

    let current = lead.status.clone();
    append_history(
        &mut lead,
        current,
        &acting_user.id,
        Some("Bank details verified".to_string()),
    );
    storage.save_lead(&mut lead).await?;

    Ok(lead)
}

/// Fold a gateway result into the aggregate.
///
/// Exactly one Disbursement record is appended, whatever the outcome.
/// Success flips the lead to "Disbursed" and documents the reference on
/// the trail; failure leaves the status untouched and records the reason,
/// re-opening eligibility for a user-driven retry.
pub fn settle_disbursement(
    lead: &mut Lead,
    mut disbursement: Disbursement,
    result: DisbursementResult,
    acting_user_id: &str,
) {
    let now = Utc::now();
    if result.success {
        disbursement.reference_id = result.reference_id.clone();
        disbursement.status = DisbursementStatus::Completed;
        disbursement.completed_at = Some(now);
        disbursement.gateway_response = result.gateway_response;

        lead.status = "Disbursed".to_string();
        let remarks = format!(
            "Loan amount ₹{} disbursed successfully. Reference: {}",
            disbursement.amount, disbursement.reference_id
        );
        lead.disbursements.push(disbursement);
        append_history(lead, "Disbursed", acting_user_id, Some(remarks));
        tracing::info!("✓ Disbursement completed for lead {}", lead.id);
    } else {
        let reason = result
            .error
            .clone()
            .unwrap_or_else(|| "payment processing failed".to_string());
        disbursement.status = DisbursementStatus::Failed;
        disbursement.failure_reason = Some(reason.clone());
        disbursement.completed_at = Some(now);
        disbursement.gateway_response = result.gateway_response;

        lead.disbursements.push(disbursement);
        let current = lead.status.clone();
        append_history(
            lead,
            current,
            acting_user_id,
            Some(format!("Disbursement failed: {}", reason)),
        );
        tracing::warn!("Disbursement failed for lead {}: {}", lead.id, reason);
    }
}

/// Execute a single payout attempt for an eligible lead.
///
/// Re-evaluates the eligibility predicate server-side, guards against
/// concurrent attempts, then runs one synchronous gateway transfer through
/// the circuit breaker and persists the settled aggregate in one write.
pub async fn disburse(
    state: &Arc<AppState>,
    lead_id: &str,
    req: &DisburseRequest,
) -> Result<Lead, AppError> {
    let storage = LeadStorage::new(state.db.clone());
    let acting_user = resolve_acting_user(&storage, &req.acting_user_id).await?;
    let mut lead = storage.get_lead(lead_id).await?;

    let report = check_eligibility(&lead);
    if !report.eligible {
        return Err(AppError::NotEligible(format!(
            "lead {} is not eligible for disbursement: {}",
            lead.id,
            report.reasons.join("; ")
        )));
    }
    let bank = match lead.bank_details.clone() {
        Some(bank) => bank,
        None => {
            return Err(AppError::InternalError(
                "eligible lead unexpectedly has no bank details".to_string(),
            ))
        }
    };

    // Reject concurrent attempts on the same lead while a gateway call is
    // in flight. The versioned save below is the actual correctness
    // backstop; this guard just fails fast.
    if state.disbursing_leads_cache.get(lead_id).await.is_some() {
        return Err(AppError::Conflict(format!(
            "a disbursement for lead {} is already in progress",
            lead_id
        )));
    }
    state
        .disbursing_leads_cache
        .insert(lead_id.to_string(), Utc::now().timestamp())
        .await;

    let disbursement = Disbursement {
        id: format!("disb-{}", Uuid::new_v4()),
        amount: lead.value.clone(),
        reference_id: String::new(),
        status: DisbursementStatus::Initiated,
        initiated_by: acting_user.id.clone(),
        initiated_at: Utc::now(),
        completed_at: None,
        failure_reason: None,
        gateway_response: None,
    };

    tracing::info!(
        "Starting disbursement {} for lead {} (amount {})",
        disbursement.id,
        lead.id,
        disbursement.amount
    );

    let gateway = PaymentGateway::new(&state.config, state.http.clone());
    let result = match state
        .payment_breaker
        .call(gateway.transfer(&lead.value, &bank, &lead.id, &lead.email))
        .await
    {
        Ok(result) => result,
        Err(failsafe::Error::Inner(e)) => DisbursementResult::failure(e.to_string()),
        Err(failsafe::Error::Rejected) => DisbursementResult::failure(
            "payment gateway temporarily unavailable; please retry later".to_string(),
        ),
    };

    settle_disbursement(&mut lead, disbursement, result, &acting_user.id);

    let save_result = storage.save_lead(&mut lead).await;
    state.disbursing_leads_cache.invalidate(lead_id).await;
    save_result?;

    Ok(lead)
}
