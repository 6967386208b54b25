use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============ Enumerations ============

/// Role of a CRM user, controlling which leads are visible and which
/// actions are permitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserRole {
    /// Sales agents own leads via `assigned_to`.
    #[serde(rename = "sales")]
    Sales,
    /// Back-office staff verify documents/bank details and disburse.
    #[serde(rename = "back-office")]
    BackOffice,
    /// Administrators manage users and see everything.
    #[serde(rename = "admin")]
    Admin,
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserRole::Sales => write!(f, "sales"),
            UserRole::BackOffice => write!(f, "back-office"),
            UserRole::Admin => write!(f, "admin"),
        }
    }
}

/// Financial service line a lead belongs to. Each service type carries its
/// own pipeline status vocabulary and sub-categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceType {
    Loan,
    Investment,
    Insurance,
}

impl ServiceType {
    /// Ordered pipeline status vocabulary for this service type.
    ///
    /// Advisory only: `Lead.status` stays free text at the storage layer,
    /// this is what UIs offer in their status dropdowns.
    pub fn pipeline_statuses(&self) -> &'static [&'static str] {
        match self {
            ServiceType::Loan => &[
                "New",
                "KYC Pending",
                "Documents Needed",
                "Eligibility Check",
                "Approved",
                "Rejected",
                "Disbursed",
            ],
            ServiceType::Investment => &[
                "New",
                "Risk Profiling",
                "KYC Verification",
                "Investment Planning",
                "Portfolio Creation",
                "Activated",
                "Completed",
            ],
            ServiceType::Insurance => &[
                "New",
                "KYC Pending",
                "Medical Check",
                "Underwriting",
                "Approved / Rejected",
                "Policy Issued",
                "Completed",
            ],
        }
    }

    /// Valid sub-categories for this service type, checked on lead creation.
    pub fn sub_categories(&self) -> &'static [&'static str] {
        match self {
            ServiceType::Loan => &["Personal Loan", "Business Loan", "Home Loan", "Vehicle Loan"],
            ServiceType::Investment => &["SIP/Mutual Funds", "Stocks/Demat", "Fixed Deposits", "Bonds"],
            ServiceType::Insurance => &[
                "Health Insurance",
                "Life Insurance",
                "Vehicle Insurance",
                "Term Plans",
            ],
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceType::Loan => write!(f, "Loan"),
            ServiceType::Investment => write!(f, "Investment"),
            ServiceType::Insurance => write!(f, "Insurance"),
        }
    }
}

impl FromStr for ServiceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Loan" => Ok(ServiceType::Loan),
            "Investment" => Ok(ServiceType::Investment),
            "Insurance" => Ok(ServiceType::Insurance),
            other => Err(format!("unknown service type '{}'", other)),
        }
    }
}

/// Bank account type accepted by the payment gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountType {
    #[serde(rename = "savings")]
    Savings,
    #[serde(rename = "current")]
    Current,
}

/// Lifecycle of a single disbursement attempt.
///
/// `Processing` is part of the persisted vocabulary but never assigned by
/// this service: the gateway call is awaited synchronously, so a record
/// jumps straight from `Initiated` to `Completed` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisbursementStatus {
    #[serde(rename = "initiated")]
    Initiated,
    #[serde(rename = "processing")]
    Processing,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
}

impl fmt::Display for DisbursementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisbursementStatus::Initiated => write!(f, "initiated"),
            DisbursementStatus::Processing => write!(f, "processing"),
            DisbursementStatus::Completed => write!(f, "completed"),
            DisbursementStatus::Failed => write!(f, "failed"),
        }
    }
}

// ============ Lead aggregate ============

/// A prospective customer tracked through a service-specific pipeline.
///
/// The whole aggregate is persisted as one JSONB document; `version` is a
/// storage-level concurrency token and never part of the serialized body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    /// Opaque unique identifier (e.g. "LEAD-<uuid>").
    pub id: String,
    /// Customer name.
    pub name: String,
    /// Customer email; approval emails go here when non-empty.
    pub email: String,
    /// Customer phone; approval calls go here when non-empty.
    pub phone: String,
    /// Service line of the lead.
    pub service_type: ServiceType,
    /// Service-specific sub-category (validated on create, stored as text).
    pub sub_category: String,
    /// Current pipeline status. Free text at the storage layer; writers keep
    /// it in sync with the most recent history entry.
    pub status: String,
    /// Monetary value of the lead (non-negative; disbursed in INR).
    pub value: BigDecimal,
    /// Id of the sales user who owns this lead. Reassignment is a plain
    /// overwrite.
    pub assigned_to: String,
    /// Uploaded documents, append/remove only.
    #[serde(default)]
    pub documents: Vec<LeadDocument>,
    /// Append-only audit trail. Entries are never mutated or removed.
    #[serde(default)]
    pub history: Vec<LeadHistory>,
    /// At most one bank account per lead; carries its own verification
    /// sub-lifecycle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bank_details: Option<BankDetails>,
    /// Append-only disbursement attempts. At most one non-failed record may
    /// ever exist.
    #[serde(default)]
    pub disbursements: Vec<Disbursement>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Optimistic-concurrency token maintained by the storage layer.
    #[serde(skip)]
    pub version: i64,
}

/// An uploaded document reference. No versioning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadDocument {
    pub name: String,
    pub url: String,
}

/// Immutable audit record of a status assignment or workflow event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadHistory {
    /// Status the lead carried when the entry was written.
    pub status: String,
    /// Wall-clock time of the coordinator process.
    pub timestamp: DateTime<Utc>,
    /// Id of the acting user, or "system" for dispatch outcomes.
    pub user: String,
    /// Optional free-text remarks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remarks: Option<String>,
    /// Credit-check payload when the entry records a CIBIL lookup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cibil_data: Option<CibilReport>,
}

/// Bank account details for disbursement. Verification is a one-way flag
/// set by a back-office actor; editing the details resets it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BankDetails {
    pub account_holder_name: String,
    pub account_number: String,
    pub bank_name: String,
    pub ifsc_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,
    pub account_type: AccountType,
    /// Id of the back-office user who verified these details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_by: Option<String>,
    /// When verification happened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime<Utc>>,
}

/// A single attempted fund transfer tied to a Loan lead.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Disbursement {
    /// Opaque unique identifier (e.g. "disb-<uuid>").
    pub id: String,
    /// Amount transferred; equals the lead value at initiation time.
    pub amount: BigDecimal,
    /// Gateway reference id; empty until the transfer resolves.
    pub reference_id: String,
    pub status: DisbursementStatus,
    /// Id of the user who requested the payout.
    pub initiated_by: String,
    pub initiated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// Raw gateway response for audit/debugging.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_response: Option<serde_json::Value>,
}

// ============ User ============

/// A CRM user. Created by admins; role and `service_types` determine which
/// leads the user may view and act on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: UserRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    /// Back-office only: restricts visible leads to these service types.
    /// `None` means no restriction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_types: Option<Vec<ServiceType>>,
    pub created_at: DateTime<Utc>,
}

// ============ Credit check ============

/// Result of a CIBIL credit-score lookup, stored verbatim inside the
/// history entry that recorded the check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CibilReport {
    /// Credit score in the 550-850 range.
    pub score: i32,
    /// "Low Risk" (>= 750), "Medium Risk" (>= 650) or "High Risk".
    pub risk_category: String,
    pub total_accounts: i32,
    pub overdue_accounts: i32,
    pub credit_report_date: NaiveDate,
    pub generated_at: DateTime<Utc>,
    /// Which bureau (or mock) produced the report.
    pub data_source: String,
    /// Bureau confidence in the 70-100 range.
    pub confidence_score: i32,
}

// ============ API Request/Response Models ============

/// Request payload for creating a lead.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLeadRequest {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub service_type: ServiceType,
    pub sub_category: String,
    pub value: BigDecimal,
    /// Sales user to own the lead; defaults to the acting user.
    #[serde(default)]
    pub assigned_to: Option<String>,
    pub acting_user_id: String,
}

/// Request payload for a status change.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeStatusRequest {
    pub status: String,
    pub acting_user_id: String,
    #[serde(default)]
    pub remarks: Option<String>,
}

/// Response for a status change: the updated aggregate plus soft warnings
/// for dispatches that could not be delivered.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeStatusResponse {
    pub lead: Lead,
    pub warnings: Vec<String>,
}

/// Request payload for reassigning a lead to another sales user.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReassignLeadRequest {
    pub assigned_to: String,
    pub acting_user_id: String,
}

/// Request payload for a CIBIL credit check.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CibilCheckRequest {
    pub pan: String,
    #[serde(default)]
    pub dob: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    pub acting_user_id: String,
}

/// Request payload for a disbursement attempt.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisburseRequest {
    pub acting_user_id: String,
}

/// Request payload for adding/replacing bank details on a lead.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BankDetailsRequest {
    pub account_holder_name: String,
    pub account_number: String,
    pub bank_name: String,
    pub ifsc_code: String,
    #[serde(default)]
    pub branch_name: Option<String>,
    pub account_type: AccountType,
    pub acting_user_id: String,
}

/// Request payload for bank-details verification.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyBankDetailsRequest {
    pub acting_user_id: String,
}

/// Request payload for appending a document to a lead.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddDocumentRequest {
    pub name: String,
    pub url: String,
    pub acting_user_id: String,
}

/// Request payload for a custom email. Either `subject` + `body` are given
/// verbatim, or `prompt` is expanded by the AI generator.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomEmailRequest {
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    pub acting_user_id: String,
}

/// Request payload for creating a user (admin only).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    pub name: String,
    pub email: String,
    pub role: UserRole,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub service_types: Option<Vec<ServiceType>>,
    pub acting_user_id: String,
}

/// Query parameters for listing leads.
#[derive(Debug, Deserialize)]
pub struct LeadQueryParams {
    pub acting_user_id: String,
}

// ============ Collaborator result models ============

/// Outcome of an AI call dispatch. `success: false` covers both declines
/// and "not configured"; the caller treats either as a soft failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallDispatchResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Outcome of an email dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailDispatchResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Generated email content in both renderings.
#[derive(Debug, Clone)]
pub struct EmailContent {
    pub subject: String,
    pub html: String,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lead_serializes_camel_case() {
        let lead = Lead {
            id: "LEAD-1".to_string(),
            name: "John Doe".to_string(),
            email: "john@example.com".to_string(),
            phone: "+919876543210".to_string(),
            service_type: ServiceType::Loan,
            sub_category: "Personal Loan".to_string(),
            status: "New".to_string(),
            value: BigDecimal::from(50_000),
            assigned_to: "user-1".to_string(),
            documents: vec![],
            history: vec![],
            bank_details: None,
            disbursements: vec![],
            created_at: Utc::now(),
            version: 3,
        };

        let json = serde_json::to_value(&lead).unwrap();
        assert_eq!(json["serviceType"], "Loan");
        assert_eq!(json["subCategory"], "Personal Loan");
        assert_eq!(json["assignedTo"], "user-1");
        // The concurrency token never leaves the storage layer.
        assert!(json.get("version").is_none());
    }

    #[test]
    fn user_role_round_trips() {
        let role: UserRole = serde_json::from_str("\"back-office\"").unwrap();
        assert_eq!(role, UserRole::BackOffice);
        assert_eq!(serde_json::to_string(&role).unwrap(), "\"back-office\"");
    }

    #[test]
    fn pipeline_vocabularies_are_service_specific() {
        assert!(ServiceType::Loan.pipeline_statuses().contains(&"Approved"));
        assert!(ServiceType::Investment.pipeline_statuses().contains(&"Activated"));
        assert!(ServiceType::Insurance.pipeline_statuses().contains(&"Policy Issued"));
        assert!(!ServiceType::Investment.pipeline_statuses().contains(&"Approved"));
    }
}
