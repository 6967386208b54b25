//! Seeds the demo users and leads for local development.
//!
//! Usage: `cargo run --bin seed_demo_data` (requires DATABASE_URL).
//! Safe to run repeatedly: everything is upserted by id.

use bigdecimal::BigDecimal;
use chrono::Utc;
use crm_workflow_api::config::Config;
use crm_workflow_api::db::Database;
use crm_workflow_api::db_storage::LeadStorage;
use crm_workflow_api::models::{Lead, LeadHistory, ServiceType, User, UserRole};

fn demo_user(id: &str, name: &str, email: &str, role: UserRole) -> User {
    User {
        id: id.to_string(),
        name: name.to_string(),
        email: email.to_string(),
        role,
        avatar: Some(format!("https://i.pravatar.cc/40?u={}", id)),
        service_types: match role {
            UserRole::BackOffice => Some(vec![
                ServiceType::Loan,
                ServiceType::Investment,
                ServiceType::Insurance,
            ]),
            _ => None,
        },
        created_at: Utc::now(),
    }
}

#[allow(clippy::too_many_arguments)]
fn demo_lead(
    id: &str,
    name: &str,
    email: &str,
    phone: &str,
    service_type: ServiceType,
    sub_category: &str,
    status: &str,
    value: i64,
    assigned_to: &str,
) -> Lead {
    let now = Utc::now();
    Lead {
        id: id.to_string(),
        name: name.to_string(),
        email: email.to_string(),
        phone: phone.to_string(),
        service_type,
        sub_category: sub_category.to_string(),
        status: status.to_string(),
        value: BigDecimal::from(value),
        assigned_to: assigned_to.to_string(),
        documents: vec![],
        history: vec![LeadHistory {
            status: status.to_string(),
            timestamp: now,
            user: "system".to_string(),
            remarks: Some("Demo lead seeded".to_string()),
            cibil_data: None,
        }],
        bank_details: None,
        disbursements: vec![],
        created_at: now,
        version: 0,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    let db = Database::new(&config.database_url).await?;
    let storage = LeadStorage::new(db.pool.clone());

    let users = vec![
        demo_user("1", "Alex Sales", "alex@crm.example.com", UserRole::Sales),
        demo_user("2", "Betty Office", "betty@crm.example.com", UserRole::BackOffice),
        demo_user("3", "Charlie Admin", "charlie@crm.example.com", UserRole::Admin),
    ];
    for user in &users {
        storage
            .save_user(user)
            .await
            .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    }
    tracing::info!("Seeded {} users", users.len());

    let leads = vec![
        demo_lead(
            "LEAD-001",
            "John Doe",
            "john.doe@example.com",
            "+919876500104",
            ServiceType::Loan,
            "Personal Loan",
            "New",
            50_000,
            "1",
        ),
        demo_lead(
            "LEAD-002",
            "Jane Smith",
            "jane.smith@example.com",
            "+919876500168",
            ServiceType::Investment,
            "SIP/Mutual Funds",
            "Risk Profiling",
            120_000,
            "1",
        ),
        demo_lead(
            "LEAD-003",
            "Peter Jones",
            "peter.jones@example.com",
            "+919876500182",
            ServiceType::Insurance,
            "Health Insurance",
            "KYC Pending",
            75_000,
            "1",
        ),
        demo_lead(
            "LEAD-004",
            "Mary Williams",
            "mary.williams@example.com",
            "+919876500151",
            ServiceType::Loan,
            "Home Loan",
            "Eligibility Check",
            350_000,
            "1",
        ),
        demo_lead(
            "LEAD-005",
            "David Brown",
            "david.brown@example.com",
            "+919876500199",
            ServiceType::Investment,
            "Stocks/Demat",
            "Activated",
            250_000,
            "1",
        ),
    ];
    storage
        .save_leads(&leads)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    tracing::info!("Seeded {} leads", leads.len());

    Ok(())
}
