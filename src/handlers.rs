use crate::circuit_breaker::PaymentCircuitBreaker;
use crate::config::Config;
use crate::db_storage::LeadStorage;
use crate::disbursement;
use crate::errors::AppError;
use crate::models::*;
use crate::workflow;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use bigdecimal::BigDecimal;
use chrono::Utc;
use moka::future::Cache;
use serde_json::json;
use sqlx::PgPool;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub db: PgPool,
    /// Application configuration.
    pub config: Config,
    /// Shared HTTP client for all external collaborators (30s timeout).
    pub http: reqwest::Client,
    /// In-flight disbursement guard: lead ids with a gateway call running.
    /// Entries expire after 5 minutes as a safety valve.
    pub disbursing_leads_cache: Cache<String, i64>,
    /// Circuit breaker shared by all payment gateway calls.
    pub payment_breaker: Arc<PaymentCircuitBreaker>,
}

/// Health check endpoint.
///
/// Returns the service status, version, and health information.
///
/// # Returns
///
/// * `(StatusCode, Json<serde_json::Value>)` - HTTP 200 OK with health status JSON.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "crm-workflow-api",
            "version": "0.1.0"
        })),
    )
}

/// POST /api/v1/leads
///
/// Creates a new lead with status "New" and a seeded history entry.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `req` - JSON body with the lead fields and the acting user.
///
/// # Returns
///
/// * `Result<(StatusCode, Json<Lead>), AppError>` - 201 with the created lead.
pub async fn create_lead(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateLeadRequest>,
) -> Result<(StatusCode, Json<Lead>), AppError> {
    tracing::info!("POST /leads - {} ({})", req.name, req.service_type);

    let storage = LeadStorage::new(state.db.clone());
    let acting_user = workflow::resolve_acting_user(&storage, &req.acting_user_id).await?;

    if req.name.trim().is_empty() {
        return Err(AppError::BadRequest("lead name must not be empty".to_string()));
    }
    if !req.email.trim().is_empty() && !workflow::is_valid_email(req.email.trim()) {
        return Err(AppError::BadRequest(format!("invalid email address '{}'", req.email)));
    }
    if req.value < BigDecimal::from(0) {
        return Err(AppError::BadRequest("lead value must be non-negative".to_string()));
    }
    if !req.service_type.sub_categories().contains(&req.sub_category.as_str()) {
        return Err(AppError::BadRequest(format!(
            "'{}' is not a valid {} sub-category",
            req.sub_category, req.service_type
        )));
    }

    let now = Utc::now();
    let mut lead = Lead {
        id: format!("LEAD-{}", Uuid::new_v4().simple()),
        name: req.name.trim().to_string(),
        email: req.email.trim().to_string(),
        phone: req.phone.trim().to_string(),
        service_type: req.service_type,
        sub_category: req.sub_category.clone(),
        status: "New".to_string(),
        value: req.value.clone(),
        assigned_to: req.assigned_to.clone().unwrap_or_else(|| acting_user.id.clone()),
        documents: vec![],
        history: vec![LeadHistory {
            status: "New".to_string(),
            timestamp: now,
            user: acting_user.id.clone(),
            remarks: Some("Lead created".to_string()),
            cibil_data: None,
        }],
        bank_details: None,
        disbursements: vec![],
        created_at: now,
        version: 0,
    };

    storage.insert_lead(&mut lead).await?;
    tracing::info!("Lead {} created by {}", lead.id, acting_user.id);

    Ok((StatusCode::CREATED, Json(lead)))
}

/// GET /api/v1/leads?acting_user_id=U
///
/// Lists the leads visible to the acting user: sales see their own,
/// back-office see their service-type slice, admins see everything.
pub async fn list_leads(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LeadQueryParams>,
) -> Result<Json<Vec<Lead>>, AppError> {
    let storage = LeadStorage::new(state.db.clone());
    let acting_user = workflow::resolve_acting_user(&storage, &params.acting_user_id).await?;
    let leads = storage.list_for_user(&acting_user).await?;
    Ok(Json(leads))
}

/// GET /api/v1/leads/:id
pub async fn get_lead(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Lead>, AppError> {
    let storage = LeadStorage::new(state.db.clone());
    let lead = storage.get_lead(&id).await?;
    Ok(Json(lead))
}

/// POST /api/v1/leads/:id/status
///
/// Applies a status change, records it on the audit trail and fires
/// approval side effects. Dispatch failures are reported as warnings; the
/// status change itself is already committed.
pub async fn change_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<ChangeStatusRequest>,
) -> Result<Json<ChangeStatusResponse>, AppError> {
    tracing::info!("POST /leads/{}/status - '{}'", id, req.status);
    let response = workflow::change_status(&state, &id, &req).await?;
    Ok(Json(response))
}

/// POST /api/v1/leads/:id/assign
///
/// Reassigns a lead to another user. A plain overwrite; the transfer is
/// recorded only as a history remark.
pub async fn reassign_lead(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<ReassignLeadRequest>,
) -> Result<Json<Lead>, AppError> {
    let storage = LeadStorage::new(state.db.clone());
    let acting_user = workflow::resolve_acting_user(&storage, &req.acting_user_id).await?;
    let assignee = storage
        .get_user(&req.assigned_to)
        .await
        .map_err(|_| AppError::BadRequest(format!("unknown assignee {}", req.assigned_to)))?;

    let mut lead = storage.get_lead(&id).await?;
    lead.assigned_to = assignee.id.clone();
    let current = lead.status.clone();
    workflow::append_history(
        &mut lead,
        current,
        &acting_user.id,
        Some(format!("Reassigned to {}", assignee.name)),
    );
    storage.save_lead(&mut lead).await?;

    Ok(Json(lead))
}

/// POST /api/v1/leads/:id/cibil
///
/// Runs a credit check and appends the result to the lead history without
/// changing the pipeline status.
pub async fn cibil_check(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<CibilCheckRequest>,
) -> Result<Json<Lead>, AppError> {
    tracing::info!("POST /leads/{}/cibil", id);
    let lead = workflow::record_credit_check(&state, &id, &req).await?;
    Ok(Json(lead))
}

/// GET /api/v1/leads/:id/eligibility
///
/// Returns the disbursement eligibility breakdown for a lead.
pub async fn disbursement_eligibility(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<disbursement::EligibilityReport>, AppError> {
    let storage = LeadStorage::new(state.db.clone());
    let lead = storage.get_lead(&id).await?;
    Ok(Json(disbursement::check_eligibility(&lead)))
}

/// POST /api/v1/leads/:id/disburse
///
/// Executes a payout attempt for an eligible Loan lead. Always appends
/// exactly one disbursement record; see the gate module for semantics.
pub async fn disburse_lead(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<DisburseRequest>,
) -> Result<Json<Lead>, AppError> {
    tracing::info!("POST /leads/{}/disburse by {}", id, req.acting_user_id);
    let lead = disbursement::disburse(&state, &id, &req).await?;
    Ok(Json(lead))
}

/// PUT /api/v1/leads/:id/bank-details
///
/// Adds or replaces the lead's bank details. Editing resets verification.
pub async fn upsert_bank_details(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<BankDetailsRequest>,
) -> Result<Json<Lead>, AppError> {
    let lead = disbursement::upsert_bank_details(&state, &id, &req).await?;
    Ok(Json(lead))
}

/// POST /api/v1/leads/:id/bank-details/verify
///
/// Marks the bank details verified. Back-office and admin only.
pub async fn verify_bank_details(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<VerifyBankDetailsRequest>,
) -> Result<Json<Lead>, AppError> {
    let lead = disbursement::verify_bank_details(&state, &id, &req).await?;
    Ok(Json(lead))
}

/// POST /api/v1/leads/:id/documents
///
/// Appends a document reference. Document names are unique per lead.
pub async fn add_document(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<AddDocumentRequest>,
) -> Result<Json<Lead>, AppError> {
    let storage = LeadStorage::new(state.db.clone());
    workflow::resolve_acting_user(&storage, &req.acting_user_id).await?;

    if req.name.trim().is_empty() || req.url.trim().is_empty() {
        return Err(AppError::BadRequest("document name and url are required".to_string()));
    }

    let mut lead = storage.get_lead(&id).await?;
    if lead.documents.iter().any(|d| d.name == req.name) {
        return Err(AppError::BadRequest(format!(
            "document '{}' already exists on lead {}",
            req.name, lead.id
        )));
    }

    lead.documents.push(LeadDocument {
        name: req.name.trim().to_string(),
        url: req.url.trim().to_string(),
    });
    storage.save_lead(&mut lead).await?;

    Ok(Json(lead))
}

/// DELETE /api/v1/leads/:id/documents/:name?acting_user_id=U
pub async fn remove_document(
    State(state): State<Arc<AppState>>,
    Path((id, name)): Path<(String, String)>,
    Query(params): Query<LeadQueryParams>,
) -> Result<Json<Lead>, AppError> {
    let storage = LeadStorage::new(state.db.clone());
    workflow::resolve_acting_user(&storage, &params.acting_user_id).await?;
    let mut lead = storage.get_lead(&id).await?;

    let before = lead.documents.len();
    lead.documents.retain(|d| d.name != name);
    if lead.documents.len() == before {
        return Err(AppError::NotFound(format!(
            "document '{}' not found on lead {}",
            name, id
        )));
    }

    storage.save_lead(&mut lead).await?;
    Ok(Json(lead))
}

/// POST /api/v1/leads/:id/email
///
/// Sends a one-off email to the lead, either verbatim or AI-expanded from
/// the agent's prompt. Success is recorded on the history trail.
pub async fn send_custom_email(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<CustomEmailRequest>,
) -> Result<Json<Lead>, AppError> {
    tracing::info!("POST /leads/{}/email", id);
    let lead = workflow::send_custom_email(&state, &id, &req).await?;
    Ok(Json(lead))
}

/// GET /api/v1/pipeline/:service_type/statuses
///
/// Returns the ordered (advisory) status vocabulary for a service type.
pub async fn pipeline_statuses(
    Path(service_type): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let service_type = ServiceType::from_str(&service_type).map_err(AppError::BadRequest)?;
    Ok(Json(json!({
        "serviceType": service_type,
        "statuses": service_type.pipeline_statuses(),
    })))
}

/// POST /api/v1/users
///
/// Creates a user. Admin only.
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<User>), AppError> {
    let storage = LeadStorage::new(state.db.clone());
    let acting_user = workflow::resolve_acting_user(&storage, &req.acting_user_id).await?;
    if acting_user.role != UserRole::Admin {
        return Err(AppError::Unauthorized("only admins may create users".to_string()));
    }

    if req.name.trim().is_empty() {
        return Err(AppError::BadRequest("user name must not be empty".to_string()));
    }
    if !workflow::is_valid_email(req.email.trim()) {
        return Err(AppError::BadRequest(format!("invalid email address '{}'", req.email)));
    }

    let user = User {
        id: format!("USER-{}", Uuid::new_v4().simple()),
        name: req.name.trim().to_string(),
        email: req.email.trim().to_string(),
        role: req.role,
        avatar: req.avatar.clone(),
        service_types: req.service_types.clone(),
        created_at: Utc::now(),
    };
    storage.save_user(&user).await?;
    tracing::info!("User {} ({}) created by {}", user.id, user.role, acting_user.id);

    Ok((StatusCode::CREATED, Json(user)))
}

/// GET /api/v1/users
pub async fn list_users(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<User>>, AppError> {
    let storage = LeadStorage::new(state.db.clone());
    let users = storage.list_users().await?;
    Ok(Json(users))
}
