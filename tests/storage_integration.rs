use std::env;
use uuid::Uuid;

use bigdecimal::BigDecimal;
use chrono::Utc;
use crm_workflow_api::data::db_storage::LeadStorage;
use crm_workflow_api::db::Database;
use crm_workflow_api::errors::AppError;
use crm_workflow_api::models::{Lead, LeadHistory, ServiceType};
use crm_workflow_api::workflow::apply_status_change;

/// Integration smoke test for the lead aggregate store.
/// Marked ignored to avoid running against production by accident; set TEST_DATABASE_URL to run.
#[tokio::test]
#[ignore]
async fn lead_round_trip_and_version_conflict() -> anyhow::Result<()> {
    let db_url = env::var("TEST_DATABASE_URL")
        .or_else(|_| env::var("DATABASE_URL"))
        .map_err(|_| anyhow::anyhow!("Set TEST_DATABASE_URL or DATABASE_URL to run this test"))?;

    let db = Database::new(&db_url).await?;
    let storage = LeadStorage::new(db.pool.clone());

    // Unique id to avoid conflicts on repeated runs.
    let now = Utc::now();
    let mut lead = Lead {
        id: format!("LEAD-TEST-{}", Uuid::new_v4().simple()),
        name: "Smoke Test".to_string(),
        email: "smoke.test@example.com".to_string(),
        phone: "+919876543210".to_string(),
        service_type: ServiceType::Loan,
        sub_category: "Personal Loan".to_string(),
        status: "New".to_string(),
        value: BigDecimal::from(50_000),
        assigned_to: "1".to_string(),
        documents: vec![],
        history: vec![LeadHistory {
            status: "New".to_string(),
            timestamp: now,
            user: "1".to_string(),
            remarks: Some("Lead created".to_string()),
            cibil_data: None,
        }],
        bank_details: None,
        disbursements: vec![],
        created_at: now,
        version: 0,
    };

    storage
        .insert_lead(&mut lead)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert_eq!(lead.version, 1);

    // Round trip preserves the aggregate and the version.
    let mut loaded = storage
        .get_lead(&lead.id)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert_eq!(loaded.version, 1);
    assert_eq!(loaded.status, "New");
    assert_eq!(loaded.history.len(), 1);

    // A coordinated save advances the version.
    apply_status_change(&mut loaded, "KYC Pending", "1", None);
    storage
        .save_lead(&mut loaded)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert_eq!(loaded.version, 2);

    // Writing through a stale snapshot is rejected.
    let mut stale = lead.clone();
    apply_status_change(&mut stale, "Rejected", "1", None);
    match storage.save_lead(&mut stale).await {
        Err(AppError::Conflict(_)) => {}
        other => anyhow::bail!("expected version conflict, got {:?}", other.map(|_| ())),
    }

    Ok(())
}
