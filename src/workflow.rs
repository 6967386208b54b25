/// Lead workflow coordination shared by the HTTP handlers
///
/// This module owns the status-change workflow:
/// 1. Append an immutable history entry and update the lead status
/// 2. Persist the aggregate (durable before any side effect)
/// 3. Fan out approval side effects (AI call, AI-generated email)
/// 4. Record successful dispatch outcomes as "system" history entries
///
/// It also records CIBIL credit checks and sends custom emails, both of
/// which append to the same audit trail.
use crate::db_storage::LeadStorage;
use crate::errors::AppError;
use crate::handlers::AppState;
use crate::models::{
    ChangeStatusRequest, ChangeStatusResponse, CibilCheckRequest, CibilReport, CustomEmailRequest,
    Lead, LeadHistory, ServiceType, User,
};
use crate::services::{AiCallService, CibilService, EmailService};
use chrono::Utc;
use phonenumber::country::Id as CountryId;
use phonenumber::Mode;
use regex::Regex;
use std::sync::Arc;
use std::sync::OnceLock;

/// User id recorded on history entries written by automated dispatches.
pub const SYSTEM_USER: &str = "system";

/// Status that triggers approval notifications for a service type.
pub fn expected_approval_status(service_type: ServiceType) -> &'static str {
    match service_type {
        ServiceType::Loan => "Approved",
        ServiceType::Investment => "Activated",
        ServiceType::Insurance => "Policy Issued",
    }
}

/// Append a history entry to a lead. Entries are immutable once appended;
/// this is the only way workflow code touches the trail.
pub fn append_history(lead: &mut Lead, status: impl Into<String>, user: &str, remarks: Option<String>) {
    lead.history.push(LeadHistory {
        status: status.into(),
        timestamp: Utc::now(),
        user: user.to_string(),
        remarks,
        cibil_data: None,
    });
}

/// Apply a status change: appends exactly one history entry and sets the
/// current status. Persistence and side effects are the caller's job.
pub fn apply_status_change(lead: &mut Lead, new_status: &str, acting_user_id: &str, remarks: Option<String>) {
    append_history(lead, new_status, acting_user_id, remarks);
    lead.status = new_status.to_string();
}

/// Record a credit check on the trail without touching the lead status.
/// The entry carries the status literal "Eligibility Check" regardless of
/// the lead's current status.
pub fn append_credit_check(lead: &mut Lead, report: CibilReport, acting_user_id: &str) {
    let remarks = format!(
        "CIBIL check completed. Score: {} ({})",
        report.score, report.risk_category
    );
    lead.history.push(LeadHistory {
        status: "Eligibility Check".to_string(),
        timestamp: Utc::now(),
        user: acting_user_id.to_string(),
        remarks: Some(remarks),
        cibil_data: Some(report),
    });
}

/// The "current" credit report for display purposes: the most recent
/// history entry carrying cibil data. There is no dedicated field, so this
/// scans the trail from the end.
pub fn latest_cibil_report(lead: &Lead) -> Option<&CibilReport> {
    lead.history
        .iter()
        .rev()
        .find_map(|entry| entry.cibil_data.as_ref())
}

/// Validate email address shape. Deliberately loose: one '@', a dot in the
/// domain, no whitespace.
pub fn is_valid_email(email: &str) -> bool {
    static EMAIL_RE: OnceLock<Regex> = OnceLock::new();
    let re = EMAIL_RE.get_or_init(|| {
        Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email regex is valid")
    });
    email.len() >= 5 && re.is_match(email)
}

/// Validate a PAN (permanent account number): five letters, four digits,
/// one letter, e.g. "ABCDE1234F".
pub fn is_valid_pan(pan: &str) -> bool {
    static PAN_RE: OnceLock<Regex> = OnceLock::new();
    let re = PAN_RE.get_or_init(|| Regex::new(r"^[A-Z]{5}[0-9]{4}[A-Z]$").expect("PAN regex is valid"));
    re.is_match(pan)
}

/// Validate and normalize an Indian phone number to E.164.
///
/// Returns the normalized "+91..." form for valid numbers, `None` otherwise.
pub fn normalize_in_phone(phone: &str) -> Option<String> {
    let parsed = phonenumber::parse(Some(CountryId::IN), phone).ok()?;
    if !phonenumber::is_valid(&parsed) {
        return None;
    }
    Some(parsed.format().mode(Mode::E164).to_string())
}

pub(crate) async fn resolve_acting_user(storage: &LeadStorage, acting_user_id: &str) -> Result<User, AppError> {
    storage
        .get_user(acting_user_id)
        .await
        .map_err(|_| AppError::Unauthorized(format!("Unknown acting user {}", acting_user_id)))
}

/// Apply a requested status change to a lead and fan out consequences.
///
/// The status-change history entry is durably written before any dispatch
/// is attempted; each successful dispatch appends its own "system" entry
/// afterwards. Dispatch failures become warnings in the response and never
/// roll back the committed status change. Intentionally not idempotent:
/// repeating the same status appends again and re-fires side effects.
pub async fn change_status(
    state: &Arc<AppState>,
    lead_id: &str,
    req: &ChangeStatusRequest,
) -> Result<ChangeStatusResponse, AppError> {
    let new_status = req.status.trim();
    if new_status.is_empty() {
        return Err(AppError::BadRequest("status must not be empty".to_string()));
    }

    let storage = LeadStorage::new(state.db.clone());
    let acting_user = resolve_acting_user(&storage, &req.acting_user_id).await?;
    let mut lead = storage.get_lead(lead_id).await?;

    apply_status_change(&mut lead, new_status, &acting_user.id, req.remarks.clone());
    storage.save_lead(&mut lead).await?;
    tracing::info!(
        "Lead {} status changed to '{}' by {}",
        lead.id,
        new_status,
        acting_user.id
    );

    let mut warnings = Vec::new();
    if new_status == expected_approval_status(lead.service_type) {
        let mut dispatched = false;

        if !lead.phone.trim().is_empty() {
            let call_service = AiCallService::new(&state.config, state.http.clone());
            match call_service
                .place_call(&lead.phone, &lead.name, lead.service_type, &lead.status, &lead.id)
                .await
            {
                Ok(result) if result.success => {
                    let call_id = result.call_id.unwrap_or_else(|| "unknown".to_string());
                    let current = lead.status.clone();
                    append_history(
                        &mut lead,
                        current,
                        SYSTEM_USER,
                        Some(format!("AI call placed successfully. Call ID: {}", call_id)),
                    );
                    dispatched = true;
                }
                Ok(result) => {
                    let reason = result
                        .message
                        .unwrap_or_else(|| "call provider declined".to_string());
                    tracing::warn!("AI call for lead {} not placed: {}", lead.id, reason);
                    warnings.push(format!("status updated but call could not be placed: {}", reason));
                }
                Err(e) => {
                    tracing::warn!("AI call for lead {} failed: {}", lead.id, e);
                    warnings.push(format!("status updated but call could not be placed: {}", e));
                }
            }
        }

        if !lead.email.trim().is_empty() {
            let email_service = EmailService::new(&state.config, state.http.clone());
            let content = email_service
                .generate_status_email(lead.service_type, &lead.status, &lead.name)
                .await;
            match email_service.send(&lead.email, &content, &lead.id).await {
                Ok(result) if result.success => {
                    let email_id = result.email_id.unwrap_or_else(|| "unknown".to_string());
                    let current = lead.status.clone();
                    append_history(
                        &mut lead,
                        current,
                        SYSTEM_USER,
                        Some(format!("Approval email sent successfully. Email ID: {}", email_id)),
                    );
                    dispatched = true;
                }
                Ok(result) => {
                    let reason = result
                        .message
                        .unwrap_or_else(|| "email provider declined".to_string());
                    tracing::warn!("Approval email for lead {} not sent: {}", lead.id, reason);
                    warnings.push(format!("status updated but email could not be sent: {}", reason));
                }
                Err(e) => {
                    tracing::warn!("Approval email for lead {} failed: {}", lead.id, e);
                    warnings.push(format!("status updated but email could not be sent: {}", e));
                }
            }
        }

        if dispatched {
            storage.save_lead(&mut lead).await?;
        }
    }

    Ok(ChangeStatusResponse { lead, warnings })
}

/// Run a credit check and record the result on the audit trail.
///
/// Does not change the lead status; multiple checks may be recorded and
/// the most recent one wins for display.
pub async fn record_credit_check(
    state: &Arc<AppState>,
    lead_id: &str,
    req: &CibilCheckRequest,
) -> Result<Lead, AppError> {
    let pan = req.pan.trim().to_uppercase();
    if !is_valid_pan(&pan) {
        return Err(AppError::BadRequest(
            "valid PAN number required (format: ABCDE1234F)".to_string(),
        ));
    }

    let storage = LeadStorage::new(state.db.clone());
    let acting_user = resolve_acting_user(&storage, &req.acting_user_id).await?;
    let mut lead = storage.get_lead(lead_id).await?;

    let cibil = CibilService::new(&state.config, state.http.clone());
    let report = cibil
        .fetch_report(
            &lead.name,
            &lead.email,
            &lead.phone,
            &pan,
            req.dob.as_deref(),
            req.address.as_deref(),
        )
        .await?;

    tracing::info!(
        "CIBIL check for lead {}: score {} ({})",
        lead.id,
        report.score,
        report.risk_category
    );
    append_credit_check(&mut lead, report, &acting_user.id);
    storage.save_lead(&mut lead).await?;

    Ok(lead)
}

/// Compose and send a one-off email to the lead's address.
///
/// Content comes either verbatim from the request or from the AI generator
/// expanding the agent's prompt. Unlike approval dispatches, a send failure
/// here is a hard error: the email is the operation, so nothing is
/// recorded and 502 is surfaced.
pub async fn send_custom_email(
    state: &Arc<AppState>,
    lead_id: &str,
    req: &CustomEmailRequest,
) -> Result<Lead, AppError> {
    let storage = LeadStorage::new(state.db.clone());
    let acting_user = resolve_acting_user(&storage, &req.acting_user_id).await?;
    let mut lead = storage.get_lead(lead_id).await?;

    if !is_valid_email(&lead.email) {
        return Err(AppError::BadRequest(format!(
            "lead {} has no valid email address",
            lead.id
        )));
    }

    let email_service = EmailService::new(&state.config, state.http.clone());
    let content = match (&req.subject, &req.body, &req.prompt) {
        (Some(subject), Some(body), _) => crate::models::EmailContent {
            subject: subject.clone(),
            html: body.replace('\n', "<br>"),
            text: body.clone(),
        },
        (_, _, Some(prompt)) if !prompt.trim().is_empty() => {
            email_service.generate_custom_email(prompt, &lead).await
        }
        _ => {
            return Err(AppError::BadRequest(
                "either subject and body, or a prompt, is required".to_string(),
            ))
        }
    };

    let result = email_service.send(&lead.email, &content, &lead.id).await?;
    if !result.success {
        return Err(AppError::ExternalApiError(
            result
                .message
                .unwrap_or_else(|| "email could not be sent".to_string()),
        ));
    }

    let current = lead.status.clone();
    append_history(
        &mut lead,
        current,
        &acting_user.id,
        Some(format!("Custom email sent: {}", content.subject)),
    );
    storage.save_lead(&mut lead).await?;

    Ok(lead)
}
