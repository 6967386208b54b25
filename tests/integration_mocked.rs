/// Integration tests with mocked external APIs
/// Tests the collaborator clients (AI call, email, credit bureau, payment
/// gateway) against wiremock servers without hitting real services.
use bigdecimal::BigDecimal;
use chrono::Utc;
use crm_workflow_api::config::Config;
use crm_workflow_api::errors::AppError;
use crm_workflow_api::models::{AccountType, BankDetails, ServiceType};
use crm_workflow_api::payment_gateway::PaymentGateway;
use crm_workflow_api::services::{mock_report, AiCallService, CibilService, EmailService};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Helper function to create a test config with every collaborator pointed
/// at the given base URL.
fn create_test_config(base_url: String) -> Config {
    Config {
        database_url: "postgresql://test".to_string(),
        port: 8080,
        call_api_base_url: base_url.clone(),
        call_api_key: Some("test_call_key".to_string()),
        openrouter_base_url: base_url.clone(),
        openrouter_api_key: Some("test_openrouter_key".to_string()),
        email_api_base_url: base_url.clone(),
        email_api_key: Some("test_email_key".to_string()),
        email_from: "CRM Team <no-reply@crm.example.com>".to_string(),
        razorpay_base_url: base_url,
        razorpay_key_id: Some("rzp_test_key".to_string()),
        razorpay_key_secret: Some("rzp_test_secret".to_string()),
        razorpay_account_number: Some("2323230032510196".to_string()),
        cibil_base_url: None,
        cibil_api_key: None,
    }
}

fn verified_bank() -> BankDetails {
    BankDetails {
        account_holder_name: "Mary Williams".to_string(),
        account_number: "123456789012".to_string(),
        bank_name: "State Bank".to_string(),
        ifsc_code: "SBIN0001234".to_string(),
        branch_name: None,
        account_type: AccountType::Savings,
        verified_by: Some("2".to_string()),
        verified_at: Some(Utc::now()),
    }
}

#[tokio::test]
async fn ai_call_success_returns_call_id() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/calls"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "call_id": "call-abc123",
            "status": "queued"
        })))
        .mount(&mock_server)
        .await;

    let config = create_test_config(mock_server.uri());
    let service = AiCallService::new(&config, reqwest::Client::new());

    let result = service
        .place_call("+919876543210", "Mary Williams", ServiceType::Loan, "Approved", "LEAD-1")
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.call_id.as_deref(), Some("call-abc123"));
}

#[tokio::test]
async fn ai_call_provider_error_surfaces_as_external_api_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/calls"))
        .respond_with(ResponseTemplate::new(500).set_body_string("provider exploded"))
        .mount(&mock_server)
        .await;

    let config = create_test_config(mock_server.uri());
    let service = AiCallService::new(&config, reqwest::Client::new());

    let result = service
        .place_call("+919876543210", "Mary Williams", ServiceType::Loan, "Approved", "LEAD-1")
        .await;

    assert!(matches!(result, Err(AppError::ExternalApiError(_))));
}

#[tokio::test]
async fn ai_call_without_key_is_a_soft_failure() {
    let mut config = create_test_config("http://localhost:9".to_string());
    config.call_api_key = None;
    let service = AiCallService::new(&config, reqwest::Client::new());

    // No network call happens: the placeholder base URL is never hit.
    let result = service
        .place_call("+919876543210", "Mary Williams", ServiceType::Loan, "Approved", "LEAD-1")
        .await
        .unwrap();

    assert!(!result.success);
    assert!(result.message.unwrap().contains("not configured"));
}

#[tokio::test]
async fn email_send_success_returns_email_id() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/emails"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "em_42" })),
        )
        .mount(&mock_server)
        .await;

    let config = create_test_config(mock_server.uri());
    let service = EmailService::new(&config, reqwest::Client::new());

    let content = crm_workflow_api::models::EmailContent {
        subject: "Your Loan Has Been Approved".to_string(),
        html: "<p>hi</p>".to_string(),
        text: "hi".to_string(),
    };
    let result = service
        .send("mary.williams@example.com", &content, "LEAD-1")
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.email_id.as_deref(), Some("em_42"));
}

#[tokio::test]
async fn status_email_generation_uses_ai_content_when_available() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [
                { "message": { "content": "Congratulations on your approval!" } }
            ]
        })))
        .mount(&mock_server)
        .await;

    let config = create_test_config(mock_server.uri());
    let service = EmailService::new(&config, reqwest::Client::new());

    let content = service
        .generate_status_email(ServiceType::Loan, "Approved", "Mary Williams")
        .await;

    assert_eq!(content.text, "Congratulations on your approval!");
    assert_eq!(content.subject, "Your Loan Has Been Approved");
}

#[tokio::test]
async fn status_email_generation_falls_back_to_template() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let config = create_test_config(mock_server.uri());
    let service = EmailService::new(&config, reqwest::Client::new());

    let content = service
        .generate_status_email(ServiceType::Loan, "Approved", "Mary Williams")
        .await;

    // Generation never fails; the template takes over.
    assert!(content.text.contains("Dear Mary Williams"));
    assert!(content.text.contains("approved"));
}

#[tokio::test]
async fn mock_credit_reports_are_deterministic_per_pan() {
    let first = mock_report("ABCDE1234F");
    let second = mock_report("ABCDE1234F");
    assert_eq!(first.score, second.score);
    assert_eq!(first.risk_category, second.risk_category);
    assert_eq!(first.total_accounts, second.total_accounts);

    assert!((550..=850).contains(&first.score));
    assert!((1..=10).contains(&first.total_accounts));
    assert!(first.overdue_accounts <= first.total_accounts * 3 / 10);
    assert!((70..=100).contains(&first.confidence_score));

    let expected_risk = if first.score >= 750 {
        "Low Risk"
    } else if first.score >= 650 {
        "Medium Risk"
    } else {
        "High Risk"
    };
    assert_eq!(first.risk_category, expected_risk);

    // A different PAN may produce a different score.
    let other = mock_report("ZZZZZ9999Z");
    assert!((550..=850).contains(&other.score));
}

#[tokio::test]
async fn remote_credit_bureau_is_used_when_configured() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/score"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "score": 780,
            "riskCategory": "Low Risk",
            "totalAccounts": 5,
            "overdueAccounts": 0,
            "creditReportDate": "2026-08-01",
            "generatedAt": "2026-08-01T10:00:00Z",
            "dataSource": "Bureau",
            "confidenceScore": 95
        })))
        .mount(&mock_server)
        .await;

    let mut config = create_test_config(mock_server.uri());
    config.cibil_base_url = Some(mock_server.uri());
    config.cibil_api_key = Some("bureau_key".to_string());
    let service = CibilService::new(&config, reqwest::Client::new());

    let report = service
        .fetch_report(
            "Mary Williams",
            "mary.williams@example.com",
            "+919876500151",
            "ABCDE1234F",
            None,
            None,
        )
        .await
        .unwrap();

    assert_eq!(report.score, 780);
    assert_eq!(report.risk_category, "Low Risk");
}

#[tokio::test]
async fn unconfigured_gateway_disburses_in_mock_mode() {
    let mut config = create_test_config("http://localhost:9".to_string());
    config.razorpay_key_id = None;
    config.razorpay_key_secret = None;
    config.razorpay_account_number = None;
    let gateway = PaymentGateway::new(&config, reqwest::Client::new());

    let result = gateway
        .transfer(
            &BigDecimal::from(500_000),
            &verified_bank(),
            "LEAD-1",
            "mary.williams@example.com",
        )
        .await
        .unwrap();

    assert!(result.success);
    assert!(result.reference_id.starts_with("mock-"));
    let response = result.gateway_response.unwrap();
    assert_eq!(response["currency"], "INR");
    assert_eq!(response["metadata"]["leadId"], "LEAD-1");
}

#[tokio::test]
async fn configured_gateway_runs_the_three_step_payout() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/contacts"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "cont_1" })),
        )
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/fund_accounts"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "fa_1" })),
        )
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/payouts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "pout_1",
            "status": "processing",
            "created_at": 1754000000
        })))
        .mount(&mock_server)
        .await;

    let config = create_test_config(mock_server.uri());
    let gateway = PaymentGateway::new(&config, reqwest::Client::new());

    let result = gateway
        .transfer(
            &BigDecimal::from(500_000),
            &verified_bank(),
            "LEAD-1",
            "mary.williams@example.com",
        )
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.reference_id, "pout_1");
    let response = result.gateway_response.unwrap();
    assert_eq!(response["metadata"]["contactId"], "cont_1");
    assert_eq!(response["metadata"]["fundAccountId"], "fa_1");
}

#[tokio::test]
async fn gateway_decline_is_a_failed_result_not_an_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/contacts"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "cont_1" })),
        )
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/fund_accounts"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "fa_1" })),
        )
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/payouts"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": {
                "code": "BAD_REQUEST_ERROR",
                "description": "insufficient gateway balance"
            }
        })))
        .mount(&mock_server)
        .await;

    let config = create_test_config(mock_server.uri());
    let gateway = PaymentGateway::new(&config, reqwest::Client::new());

    let result = gateway
        .transfer(
            &BigDecimal::from(500_000),
            &verified_bank(),
            "LEAD-1",
            "mary.williams@example.com",
        )
        .await
        .unwrap();

    // A decline is durable and retryable: success=false, never Err.
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("insufficient gateway balance"));
    assert!(result.reference_id.is_empty());
}

#[tokio::test]
async fn gateway_server_error_is_a_hard_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/contacts"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&mock_server)
        .await;

    let config = create_test_config(mock_server.uri());
    let gateway = PaymentGateway::new(&config, reqwest::Client::new());

    let result = gateway
        .transfer(
            &BigDecimal::from(500_000),
            &verified_bank(),
            "LEAD-1",
            "mary.williams@example.com",
        )
        .await;

    // 5xx counts toward the circuit breaker, so it must be an Err here.
    assert!(matches!(result, Err(AppError::ExternalApiError(_))));
}
